//! The conversational RAG graph.
//!
//! A turn runs Rewrite → Retrieve → Grade → {Generate | Fallback} over one
//! [`ConversationState`](medrag_core::types::ConversationState), loaded from
//! and written back to a checkpoint store by [`RagGraph`].

pub mod graph;
pub mod nodes;
pub mod prompts;

pub use graph::{next_step, ConversationLocks, GraphStep, RagGraph, StepRecord, TurnOutcome};
pub use nodes::{Fallback, Generator, Grader, Grading, Retriever, Rewrite, Rewriter};
