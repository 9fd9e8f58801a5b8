//! Turn execution.
//!
//! A turn is one forward pass through a fixed state machine:
//!
//! ```text
//! Rewrite → Retrieve → Grade ─┬─ Continue → Generate ─┬→ Done
//!                             └─ Fallback → Fallback ─┘
//! ```
//!
//! `RagGraph` serializes turns per conversation, loads the checkpoint, drives
//! the steps and persists the state once the turn reaches `Done`.

pub mod executor;
pub mod locks;
pub mod step;

pub use executor::{RagGraph, StepRecord, TurnOutcome};
pub use locks::{ConversationGuard, ConversationLocks};
pub use step::{next_step, GraphStep};
