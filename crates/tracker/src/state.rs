use proto::InvocationPhase;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one invocation.
///
/// Ordered `Streaming < Call < Result`; an entry only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationState {
    Streaming,
    Call,
    Result,
}

impl InvocationState {
    /// State reported by a phase.
    pub fn of(phase: &InvocationPhase) -> Self {
        match phase {
            InvocationPhase::Streaming { .. } => Self::Streaming,
            InvocationPhase::Call { .. } => Self::Call,
            InvocationPhase::Result { .. } => Self::Result,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Result
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Call => "call",
            Self::Result => "result",
        }
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
