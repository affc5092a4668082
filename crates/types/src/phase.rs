use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the turn lifecycle for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnPhase {
    #[default]
    Idle,
    Listening,
    Processing,
    Streaming,
    WaitingForTool,
    Interrupted,
    Completed,
    Speaking,
}

impl TurnPhase {
    pub const ALL: [TurnPhase; 8] = [
        Self::Idle,
        Self::Listening,
        Self::Processing,
        Self::Streaming,
        Self::WaitingForTool,
        Self::Interrupted,
        Self::Completed,
        Self::Speaking,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Listening => "LISTENING",
            Self::Processing => "PROCESSING",
            Self::Streaming => "STREAMING",
            Self::WaitingForTool => "WAITING_FOR_TOOL",
            Self::Interrupted => "INTERRUPTED",
            Self::Completed => "COMPLETED",
            Self::Speaking => "SPEAKING",
        }
    }

    /// Phases that may follow `self` through a regular transition.
    pub fn allowed_next(self) -> &'static [TurnPhase] {
        match self {
            Self::Idle => &[Self::Listening],
            Self::Listening => &[Self::Processing, Self::Interrupted],
            Self::Processing => &[Self::Streaming, Self::WaitingForTool, Self::Interrupted],
            Self::Streaming => &[Self::WaitingForTool, Self::Completed, Self::Interrupted],
            Self::WaitingForTool => &[Self::Streaming, Self::Interrupted],
            Self::Interrupted => &[Self::Listening, Self::Idle],
            Self::Completed => &[Self::Idle, Self::Listening, Self::Speaking],
            Self::Speaking => &[Self::Idle, Self::Interrupted],
        }
    }

    pub fn can_transition_to(self, next: TurnPhase) -> bool {
        self.allowed_next().contains(&next)
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
