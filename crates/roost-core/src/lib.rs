//! Shared types for the roost bot-hosting orchestrator.
//!
//! These are the vocabulary types passed between the supervisor, the
//! persistence layer and the RPC services; they carry no I/O of their own.

use serde::{Deserialize, Serialize};

/// The interpreter family a bot runs under. Fixed at deploy time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    Python,
    Node,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Python => "python",
            Runtime::Node => "node",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "python" => Some(Runtime::Python),
            "node" | "node-runtime" | "nodejs" => Some(Runtime::Node),
            _ => None,
        }
    }
}

/// Lifecycle state of a bot.
///
/// `Installing` only occurs during deploy; `Starting` and `Stopping` are
/// transient; `Stopped` and `Error` are the resting states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotState {
    Stopped,
    Installing,
    Starting,
    Running,
    Stopping,
    Error,
}

impl BotState {
    pub fn as_str(self) -> &'static str {
        match self {
            BotState::Stopped => "stopped",
            BotState::Installing => "installing",
            BotState::Starting => "starting",
            BotState::Running => "running",
            BotState::Stopping => "stopping",
            BotState::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stopped" => Some(BotState::Stopped),
            "installing" => Some(BotState::Installing),
            "starting" => Some(BotState::Starting),
            "running" => Some(BotState::Running),
            "stopping" => Some(BotState::Stopping),
            "error" => Some(BotState::Error),
            _ => None,
        }
    }
}

/// Which pipe of the child process a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    Stdout,
    Stderr,
}

/// One line of child output, fanned out to observers as it is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunk {
    pub source: LogSource,
    pub line: String,
}

/// Latest resource sample for a running bot process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage in hundredths of a percent.
    pub cpu_percent_x100: u32,
    pub rss_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_parse_accepts_aliases() {
        assert_eq!(Runtime::parse("python"), Some(Runtime::Python));
        assert_eq!(Runtime::parse("node"), Some(Runtime::Node));
        assert_eq!(Runtime::parse("node-runtime"), Some(Runtime::Node));
        assert_eq!(Runtime::parse("NODE"), Some(Runtime::Node));
        assert_eq!(Runtime::parse("ruby"), None);
    }

    #[test]
    fn bot_state_round_trips_through_strings() {
        for state in [
            BotState::Stopped,
            BotState::Installing,
            BotState::Starting,
            BotState::Running,
            BotState::Stopping,
            BotState::Error,
        ] {
            assert_eq!(BotState::parse(state.as_str()), Some(state));
        }
        assert_eq!(BotState::parse("paused"), None);
    }
}
