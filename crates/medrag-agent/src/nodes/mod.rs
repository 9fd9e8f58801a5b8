//! Graph nodes. Each node reads what it needs from the conversation state and
//! returns its output; the executor applies it and picks the next step.

pub mod fallback;
pub mod generator;
pub mod grader;
pub mod retriever;
pub mod rewriter;

pub use fallback::Fallback;
pub use generator::Generator;
pub use grader::{Grader, Grading};
pub use retriever::Retriever;
pub use rewriter::{Rewrite, Rewriter};
