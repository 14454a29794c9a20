//! Execution result types.

use std::time::Duration;

use super::prompt::PromptContext;

/// Cleaned output of a command plus the prompt context after it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Output with echo, prompts and ANSI codes removed.
    pub output: String,
    /// Where the shell ended up.
    pub prompt: PromptContext,
    /// Time from send to end of drain.
    pub duration: Duration,
}

impl CommandOutput {
    /// Get output lines.
    pub fn output_lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }
}

/// What an `execute` call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The command ran.
    Output(CommandOutput),
    /// The command named a full-screen editor and was not run. The caller
    /// should open `path` through the file API instead.
    Editor { path: String },
}

impl ExecuteOutcome {
    pub fn is_editor(&self) -> bool {
        matches!(self, Self::Editor { .. })
    }

    /// The command output, if the command ran.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            Self::Output(output) => Some(output),
            Self::Editor { .. } => None,
        }
    }
}
