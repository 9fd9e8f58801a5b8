use serde::{Deserialize, Serialize};

use medrag_core::types::RouteDecision;

/// A step of the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphStep {
    Rewrite,
    Retrieve,
    Grade,
    Generate,
    Fallback,
    Done,
}

impl GraphStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphStep::Rewrite => "rewrite",
            GraphStep::Retrieve => "retrieve",
            GraphStep::Grade => "grade",
            GraphStep::Generate => "generate",
            GraphStep::Fallback => "fallback",
            GraphStep::Done => "done",
        }
    }
}

impl std::fmt::Display for GraphStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition function. `route` is only consulted after `Grade`.
pub fn next_step(step: GraphStep, route: RouteDecision) -> GraphStep {
    match step {
        GraphStep::Rewrite => GraphStep::Retrieve,
        GraphStep::Retrieve => GraphStep::Grade,
        GraphStep::Grade => match route {
            RouteDecision::Continue => GraphStep::Generate,
            RouteDecision::Fallback => GraphStep::Fallback,
        },
        GraphStep::Generate | GraphStep::Fallback | GraphStep::Done => GraphStep::Done,
    }
}
