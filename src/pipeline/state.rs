//! Turn state machine.

use serde::Serialize;

/// States of one streaming turn.
///
/// ```text
/// Idle ─▶ AwaitingFirstToken ─first fragment─▶ Accumulating
///                                               │  ▲
///                          trimmed pending ≥ N  ▼  │ synthesis done / dropped
///                                              Flushing
/// Accumulating ─stream ended─▶ Draining ─final flush─▶ Done
/// any non-terminal ─error─▶ Failed
/// any non-terminal ─cancel─▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TurnState {
    #[default]
    Idle,
    /// Generation requested, nothing received yet.
    AwaitingFirstToken,
    /// Appending fragments to the pending buffer.
    Accumulating,
    /// A synthesis call for the pending text is in flight.
    Flushing,
    /// Upstream ended; a last flush may follow.
    Draining,
    Done,
    Failed,
    /// Interrupted by the caller.  Terminal; never resumed.
    Cancelled,
}

impl TurnState {
    /// ```
    /// use voice_turn::pipeline::TurnState;
    ///
    /// assert!(!TurnState::Accumulating.is_terminal());
    /// assert!(TurnState::Done.is_terminal());
    /// assert!(TurnState::Failed.is_terminal());
    /// assert!(TurnState::Cancelled.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed | TurnState::Cancelled)
    }

    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::AwaitingFirstToken => "awaiting-first-token",
            TurnState::Accumulating => "accumulating",
            TurnState::Flushing => "flushing",
            TurnState::Draining => "draining",
            TurnState::Done => "done",
            TurnState::Failed => "failed",
            TurnState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(TurnState::default(), TurnState::Idle);
        assert!(!TurnState::Idle.is_terminal());
    }

    #[test]
    fn labels_are_unique() {
        let all = [
            TurnState::Idle,
            TurnState::AwaitingFirstToken,
            TurnState::Accumulating,
            TurnState::Flushing,
            TurnState::Draining,
            TurnState::Done,
            TurnState::Failed,
            TurnState::Cancelled,
        ];
        let labels: std::collections::HashSet<_> = all.iter().map(|s| s.label()).collect();
        assert_eq!(labels.len(), all.len());
        assert_eq!(TurnState::Flushing.to_string(), "flushing");
    }
}
