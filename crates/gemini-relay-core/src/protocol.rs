//! Browser <-> relay wire protocol.
//!
//! Every server -> client message is a JSON object `{type, payload}`; every
//! client -> server message is a JSON object carrying an `action` tag.

use serde::{Deserialize, Serialize};

/// An outbound frame sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    /// A line for the terminal pane: status notices and command echoes.
    Terminal {
        content: String,
        #[serde(rename = "type")]
        kind: TerminalKind,
    },

    /// Content of a `[TOOL]...[/TOOL]` segment.
    ToolOutput { content: String },

    /// Content of a `[THINKING]...[/THINKING]` segment.
    ThinkingOutput { content: String },

    /// Plain engine output, forwarded verbatim.
    GeminiOutput { content: String },

    /// Classification of a command the client just sent.
    CommandType {
        #[serde(rename = "type")]
        kind: CommandKind,
        command: String,
    },

    EngineStarted {},

    EngineStopped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<bool>,
    },
}

impl Frame {
    /// A terminal status line.
    pub fn output(content: impl Into<String>) -> Self {
        Frame::Terminal {
            content: content.into(),
            kind: TerminalKind::Output,
        }
    }

    /// A terminal echo of a command typed by the client.
    pub fn command_echo(command: impl Into<String>) -> Self {
        Frame::Terminal {
            content: command.into(),
            kind: TerminalKind::Command,
        }
    }

    pub fn engine_stopped() -> Self {
        Frame::EngineStopped { error: None }
    }

    pub fn engine_failed() -> Self {
        Frame::EngineStopped { error: Some(true) }
    }

    /// The wire name of this frame's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Terminal { .. } => "terminal",
            Frame::ToolOutput { .. } => "tool_output",
            Frame::ThinkingOutput { .. } => "thinking_output",
            Frame::GeminiOutput { .. } => "gemini_output",
            Frame::CommandType { .. } => "command_type",
            Frame::EngineStarted {} => "engine_started",
            Frame::EngineStopped { .. } => "engine_stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Output,
    Command,
}

/// How a client command is annotated for the UI, decided by its first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SlashCommand,
    AtCommand,
    ShellCommand,
    Normal,
}

impl CommandKind {
    pub fn classify(command: &str) -> Self {
        match command.chars().next() {
            Some('/') => CommandKind::SlashCommand,
            Some('@') => CommandKind::AtCommand,
            Some('!') => CommandKind::ShellCommand,
            _ => CommandKind::Normal,
        }
    }

    /// Human-readable name, or `None` for plain prompts.
    pub fn label(self) -> Option<&'static str> {
        match self {
            CommandKind::SlashCommand => Some("slash command"),
            CommandKind::AtCommand => Some("at command"),
            CommandKind::ShellCommand => Some("shell command"),
            CommandKind::Normal => None,
        }
    }
}

/// An inbound client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    StartEngine,

    StopEngine,

    SendCommand {
        #[serde(default)]
        command: Option<String>,
    },
}
