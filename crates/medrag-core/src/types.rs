use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a conversation; primary key for checkpoints.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document returned by the vector index with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub doc_id: String,
    pub text: String,
    pub score: f32,
}

impl ScoredDocument {
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
            score,
        }
    }
}

/// One completed exchange kept in the conversation memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub query: String,
    pub answer: String,
}

/// Grader output consumed by the executor for branching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    #[default]
    Continue,
    Fallback,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDecision::Continue => "continue",
            RouteDecision::Fallback => "fallback",
        }
    }
}

/// Rewriter classification of the user query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// A plain question answered from retrieved text.
    #[default]
    Lookup,
    /// Filtering, counting, comparison or listing across records.
    Analytical,
}

/// Typed conversation state passed between graph nodes and persisted as the
/// checkpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub raw_query: String,
    #[serde(default)]
    pub rewritten_query: String,
    #[serde(default)]
    pub query_kind: QueryKind,
    #[serde(default)]
    pub retrieved_docs: Vec<ScoredDocument>,
    #[serde(default)]
    pub graded_docs: Vec<ScoredDocument>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub turn_history: VecDeque<Turn>,
    #[serde(default)]
    pub route_decision: RouteDecision,
    #[serde(default)]
    pub turn_count: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            raw_query: String::new(),
            rewritten_query: String::new(),
            query_kind: QueryKind::default(),
            retrieved_docs: Vec::new(),
            graded_docs: Vec::new(),
            answer: None,
            turn_history: VecDeque::new(),
            route_decision: RouteDecision::default(),
            turn_count: 0,
            updated_at: None,
        }
    }

    /// Reset the per-turn fields and record the new utterance.
    /// `turn_history` is carried over untouched.
    pub fn begin_turn(&mut self, raw_query: impl Into<String>) {
        self.raw_query = raw_query.into();
        self.rewritten_query.clear();
        self.query_kind = QueryKind::default();
        self.retrieved_docs.clear();
        self.graded_docs.clear();
        self.answer = None;
        self.route_decision = RouteDecision::default();
    }

    /// Append `(raw_query, answer)` to the history, evicting the oldest
    /// entries so at most `window` remain.
    pub fn complete_turn(&mut self, window: usize) {
        let answer = self.answer.clone().unwrap_or_default();
        self.turn_history.push_back(Turn {
            query: self.raw_query.clone(),
            answer,
        });
        while self.turn_history.len() > window {
            self.turn_history.pop_front();
        }
        self.turn_count += 1;
        self.updated_at = Some(Utc::now());
    }

    /// The most recent `limit` turns, oldest first.
    pub fn recent_turns(&self, limit: usize) -> Vec<Turn> {
        let skip = self.turn_history.len().saturating_sub(limit);
        self.turn_history.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_turn_resets_per_turn_fields() {
        let mut state = ConversationState::new(ConversationId::from_string("c1"));
        state.rewritten_query = "old".into();
        state.retrieved_docs.push(ScoredDocument::new("d1", "text", 0.9));
        state.graded_docs.push(ScoredDocument::new("d1", "text", 0.9));
        state.answer = Some("old answer".into());
        state.route_decision = RouteDecision::Fallback;
        state.turn_history.push_back(Turn {
            query: "q".into(),
            answer: "a".into(),
        });

        state.begin_turn("new question");

        assert_eq!(state.raw_query, "new question");
        assert!(state.rewritten_query.is_empty());
        assert!(state.retrieved_docs.is_empty());
        assert!(state.graded_docs.is_empty());
        assert!(state.answer.is_none());
        assert_eq!(state.route_decision, RouteDecision::Continue);
        assert_eq!(state.turn_history.len(), 1);
    }

    #[test]
    fn test_complete_turn_evicts_oldest() {
        let mut state = ConversationState::new(ConversationId::from_string("c1"));
        for i in 0..5 {
            state.begin_turn(format!("q{}", i));
            state.answer = Some(format!("a{}", i));
            state.complete_turn(3);
        }

        assert_eq!(state.turn_history.len(), 3);
        assert_eq!(state.turn_history[0].query, "q2");
        assert_eq!(state.turn_history[2].answer, "a4");
        assert_eq!(state.turn_count, 5);
        assert!(state.updated_at.is_some());
    }

    #[test]
    fn test_recent_turns() {
        let mut state = ConversationState::new(ConversationId::from_string("c1"));
        for i in 0..3 {
            state.begin_turn(format!("q{}", i));
            state.answer = Some(format!("a{}", i));
            state.complete_turn(10);
        }

        let recent = state.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, "q1");
        assert_eq!(recent[1].query, "q2");
        assert_eq!(state.recent_turns(10).len(), 3);
    }

    #[test]
    fn test_state_deserializes_with_missing_fields() {
        let json = r#"{"conversation_id":"abc","turn_history":[{"query":"q","answer":"a"}]}"#;
        let state: ConversationState = serde_json::from_str(json).unwrap();
        assert_eq!(state.conversation_id.as_str(), "abc");
        assert_eq!(state.turn_history.len(), 1);
        assert_eq!(state.route_decision, RouteDecision::Continue);
        assert_eq!(state.turn_count, 0);
    }

    #[test]
    fn test_route_decision_serde() {
        let json = serde_json::to_string(&RouteDecision::Fallback).unwrap();
        assert_eq!(json, "\"fallback\"");
        assert_eq!(RouteDecision::Continue.as_str(), "continue");
    }
}
