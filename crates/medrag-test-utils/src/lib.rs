//! Deterministic stand-ins for the external capabilities the graph consumes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use medrag_core::error::{ProviderError, RagError, Result};
use medrag_core::traits::{CheckpointStore, TextGenerator, VectorIndex};
use medrag_core::types::{ConversationId, ConversationState, ScoredDocument};

/// Canned outcome of one generator call.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Error(ProviderError),
    /// Never answers; only a caller-side deadline ends the call.
    Stall,
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }

    pub fn error(e: ProviderError) -> Self {
        Reply::Error(e)
    }
}

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
    hits: usize,
}

impl Rule {
    /// Pop the next reply; the last one repeats forever.
    fn next_reply(&mut self) -> Reply {
        self.hits += 1;
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or(Reply::Text(String::new()))
        } else {
            self.replies
                .front()
                .cloned()
                .unwrap_or(Reply::Text(String::new()))
        }
    }
}

/// Text generator answering from rules keyed on prompt substrings.
///
/// Rules are checked in insertion order; the first whose needle appears in
/// the prompt answers. Unmatched prompts use the fallback rule.
pub struct ScriptedGenerator {
    rules: Mutex<Vec<Rule>>,
    fallback: Mutex<Rule>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback: Mutex::new(Rule {
                needle: String::new(),
                replies: VecDeque::from(vec![Reply::Error(ProviderError::Request(
                    "no scripted reply".into(),
                ))]),
                hits: 0,
            }),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, needle: impl Into<String>, reply: Reply) -> Self {
        self.on_sequence(needle, vec![reply])
    }

    pub fn on_sequence(self, needle: impl Into<String>, replies: Vec<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.into(),
            replies: replies.into(),
            hits: 0,
        });
        self
    }

    pub fn fallback_reply(self, reply: Reply) -> Self {
        self.fallback_sequence(vec![reply])
    }

    pub fn fallback_sequence(self, replies: Vec<Reply>) -> Self {
        {
            let mut fb = self.fallback.lock().unwrap();
            fb.replies = replies.into();
        }
        self
    }

    /// Number of calls answered by the rule registered for `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.needle == needle)
            .map(|r| r.hits)
            .sum()
    }

    pub fn total_calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn reply_for(&self, prompt: &str) -> Reply {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| prompt.contains(&r.needle)) {
            return rule.next_reply();
        }
        drop(rules);
        self.fallback.lock().unwrap().next_reply()
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, std::result::Result<String, ProviderError>> {
        let reply = self.reply_for(prompt);
        Box::pin(async move {
            match reply {
                Reply::Text(text) => Ok(text),
                Reply::Error(e) => Err(e),
                Reply::Stall => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Timeout { secs: 3600 })
                }
            }
        })
    }
}

/// Vector index returning a fixed result list.
pub struct FixedIndex {
    docs: Vec<ScoredDocument>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl FixedIndex {
    pub fn new(docs: Vec<ScoredDocument>) -> Self {
        Self {
            docs,
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Build from `(doc_id, text, score)` triples.
    pub fn from_scores(entries: &[(&str, &str, f32)]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|(id, text, score)| ScoredDocument::new(*id, *text, *score))
                .collect(),
        )
    }

    pub fn set_unavailable(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every search, e.g. past a caller's deadline.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VectorIndex for FixedIndex {
    fn search(&self, _query: &str, k: usize) -> BoxFuture<'_, Result<Vec<ScoredDocument>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail.load(Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        let docs: Vec<ScoredDocument> = self.docs.iter().take(k).cloned().collect();
        Box::pin(async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if fail {
                return Err(RagError::Database("index unavailable".into()));
            }
            Ok(docs)
        })
    }
}

/// In-memory checkpoint store that counts saves and can be told to fail.
#[derive(Default)]
pub struct MemoryCheckpoints {
    states: Mutex<HashMap<String, ConversationState>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    save_delay_ms: AtomicUsize,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Slow every save down, widening race windows in concurrency tests.
    pub fn set_save_delay(&self, delay: Duration) {
        self.save_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Snapshot of what is stored for `id`.
    pub fn get(&self, id: &str) -> Option<ConversationState> {
        self.states.lock().unwrap().get(id).cloned()
    }

    pub fn insert(&self, state: ConversationState) {
        self.states
            .lock()
            .unwrap()
            .insert(state.conversation_id.0.clone(), state);
    }
}

impl CheckpointStore for MemoryCheckpoints {
    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<ConversationState>>> {
        let found = self.get(id.as_str());
        Box::pin(async move { Ok(found) })
    }

    fn save(&self, id: &ConversationId, state: &ConversationState) -> BoxFuture<'_, Result<()>> {
        let key = id.0.clone();
        let state = state.clone();
        Box::pin(async move {
            let delay = self.save_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(RagError::Checkpoint("store offline".into()));
            }
            self.states.lock().unwrap().insert(key, state);
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// A JSON rewrite reply in the shape the rewriter asks for.
pub fn rewrite_json(question: &str, analytical: bool) -> String {
    serde_json::json!({
        "rephrased_question": question,
        "tool_flag": analytical,
    })
    .to_string()
}
