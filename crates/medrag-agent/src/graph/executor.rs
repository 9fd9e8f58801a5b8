use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info};

use medrag_core::config::AppConfig;
use medrag_core::error::{RagError, Result};
use medrag_core::traits::{CheckpointStore, TextGenerator, VectorIndex};
use medrag_core::types::{ConversationId, ConversationState, RouteDecision, Turn};

use super::locks::ConversationLocks;
use super::step::{next_step, GraphStep};
use crate::nodes::{Fallback, Generator, Grader, Retriever, Rewriter};

/// Timing of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: GraphStep,
    pub elapsed_ms: u64,
}

/// Result of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub answer: String,
    pub route: RouteDecision,
    /// Steps in execution order.
    pub steps: Vec<StepRecord>,
}

/// Drives one conversation turn through the graph.
///
/// The executor owns sequencing and persistence; nodes only compute their
/// output. A fatal node error aborts the turn before anything is saved, so a
/// failed turn leaves the checkpoint exactly as it was.
pub struct RagGraph {
    rewriter: Rewriter,
    retriever: Retriever,
    grader: Grader,
    generator: Generator,
    fallback: Fallback,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: ConversationLocks,
    config: AppConfig,
}

impl RagGraph {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        index: Arc<dyn VectorIndex>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: AppConfig,
    ) -> Self {
        let deadline = config.model.timeout();
        Self {
            rewriter: Rewriter::new(llm.clone(), config.model.clone()),
            retriever: Retriever::new(index, config.retrieval.clone()),
            grader: Grader::new(llm.clone(), config.grader.clone(), deadline),
            generator: Generator::new(llm.clone(), config.model.clone()),
            fallback: Fallback::new(llm, config.fallback.clone(), deadline),
            checkpoints,
            locks: ConversationLocks::new(),
            config,
        }
    }

    /// Run one turn for `conversation_id` and persist the result.
    pub async fn invoke(
        &self,
        conversation_id: &ConversationId,
        raw_query: &str,
    ) -> Result<TurnOutcome> {
        if raw_query.trim().is_empty() {
            return Err(RagError::InvalidInput("query is empty".into()));
        }

        let _guard = self.locks.acquire(conversation_id.as_str()).await;
        let start = Instant::now();

        let mut state = self
            .load(conversation_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(conversation_id.clone()));
        state.conversation_id = conversation_id.clone();
        state.begin_turn(raw_query);

        let steps = self.run(&mut state).await?;

        state.complete_turn(self.config.agent.history_window);
        self.save(conversation_id, &state).await?;

        let answer = state.answer.clone().unwrap_or_default();
        info!(
            conversation_id = %conversation_id,
            route = state.route_decision.as_str(),
            turn = state.turn_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Turn complete"
        );

        Ok(TurnOutcome {
            conversation_id: conversation_id.clone(),
            answer,
            route: state.route_decision,
            steps,
        })
    }

    /// Checkpointed turn history, oldest first. Empty for unknown ids.
    pub async fn history(&self, conversation_id: &ConversationId) -> Result<Vec<Turn>> {
        Ok(self
            .load(conversation_id)
            .await?
            .map(|s| s.turn_history.into_iter().collect())
            .unwrap_or_default())
    }

    async fn run(&self, state: &mut ConversationState) -> Result<Vec<StepRecord>> {
        let mut steps = Vec::new();
        let mut step = GraphStep::Rewrite;

        while step != GraphStep::Done {
            let step_start = Instant::now();
            if let Err(e) = self.run_step(step, state).await {
                error!(
                    conversation_id = %state.conversation_id,
                    step = %step,
                    error = %e,
                    "Graph step failed"
                );
                return Err(e);
            }

            let elapsed_ms = step_start.elapsed().as_millis() as u64;
            debug!(
                conversation_id = %state.conversation_id,
                step = %step,
                elapsed_ms,
                "Step complete"
            );
            steps.push(StepRecord { step, elapsed_ms });
            step = next_step(step, state.route_decision);
        }

        Ok(steps)
    }

    async fn run_step(&self, step: GraphStep, state: &mut ConversationState) -> Result<()> {
        match step {
            GraphStep::Rewrite => {
                let history = state.recent_turns(self.config.agent.prompt_turns);
                let rewrite = self.rewriter.rewrite(&state.raw_query, &history).await?;
                state.rewritten_query = rewrite.query;
                state.query_kind = rewrite.kind;
            }
            GraphStep::Retrieve => {
                state.retrieved_docs = self
                    .retriever
                    .retrieve(&state.rewritten_query, self.config.retrieval.top_k)
                    .await?;
            }
            GraphStep::Grade => {
                let grading = self
                    .grader
                    .grade(&state.rewritten_query, &state.retrieved_docs)
                    .await;
                state.graded_docs = grading.graded;
                state.route_decision = grading.decision;
            }
            GraphStep::Generate => {
                let history = state.recent_turns(self.config.agent.prompt_turns);
                let answer = self
                    .generator
                    .generate(&state.rewritten_query, &state.graded_docs, &history)
                    .await?;
                state.answer = Some(answer);
            }
            GraphStep::Fallback => {
                state.answer = Some(self.fallback.respond(&state.rewritten_query).await);
            }
            GraphStep::Done => {}
        }
        Ok(())
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<ConversationState>> {
        let deadline = self.config.storage.timeout();
        match tokio::time::timeout(deadline, self.checkpoints.load(id)).await {
            Ok(result) => result.map_err(into_checkpoint_error),
            Err(_) => Err(RagError::Checkpoint(format!(
                "load deadline of {}s exceeded",
                deadline.as_secs()
            ))),
        }
    }

    async fn save(&self, id: &ConversationId, state: &ConversationState) -> Result<()> {
        let deadline = self.config.storage.timeout();
        match tokio::time::timeout(deadline, self.checkpoints.save(id, state)).await {
            Ok(result) => result.map_err(into_checkpoint_error),
            Err(_) => Err(RagError::Checkpoint(format!(
                "save deadline of {}s exceeded",
                deadline.as_secs()
            ))),
        }
    }
}

fn into_checkpoint_error(e: RagError) -> RagError {
    match e {
        RagError::Checkpoint(_) => e,
        other => RagError::Checkpoint(other.to_string()),
    }
}
