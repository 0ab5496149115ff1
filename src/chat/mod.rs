//! The chat turn pipeline.
//!
//! A turn records the user's message and snapshots the room ([`open_turn`]),
//! relays the provider's output as cumulative frames ([`stream_turn`]) and, when
//! the stream ends cleanly, persists the reply ([`commit_reply`]).

mod bridge;
mod commit;
mod context;

use serde::Serialize;

use crate::db::Message;

pub use bridge::{resolve_model, stream_turn, PROVIDER_FAILURE};
pub use commit::commit_reply;
pub use context::{build_prompt, open_turn, NewMessage, TurnContext, AUXILIARY_PREFIX};

/// One line of the streaming response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    /// Everything generated so far, not just the latest delta.
    Content { content: String },
    Error { error: String },
}

impl Frame {
    pub fn content(content: impl Into<String>) -> Frame {
        Frame::Content { content: content.into() }
    }

    pub fn error(error: impl Into<String>) -> Frame {
        Frame::Error { error: error.into() }
    }

    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    ContextAssembled,
    Streaming,
    Committed,
    Failed,
}

impl TurnState {
    pub fn can_advance_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Idle, ContextAssembled)
                | (ContextAssembled, Streaming)
                | (ContextAssembled, Failed)
                | (Streaming, Committed)
                | (Streaming, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Committed | TurnState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Committed(Message),
    /// The client already received an error frame; nothing was persisted for the reply.
    Failed,
}
