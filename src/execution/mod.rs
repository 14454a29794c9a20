//! Command execution on interactive sessions.
//!
//! One `execute` call walks the phases in [`ExecutionPhase`]: validate and
//! classify the command, send it, drain until the channel goes quiet, clean
//! the output and finally probe the prompt context.
//!
//! Full-screen editors are never run; the call returns
//! [`ExecuteOutcome::Editor`] so the client can switch to the file API.
//! Other full-screen programs (pagers, multiplexers, ...) are refused with
//! [`crate::BridgeError::UnsupportedCommand`].

mod command;
mod executor;
mod phase;
mod prompt;
mod result;

pub use command::{
    check_command, classify, sanitize_for_display, shell_quote, CommandKind, EDITORS,
    INTERACTIVE_PROGRAMS, MAX_COMMAND_LENGTH,
};
pub use executor::CommandExecutor;
pub use phase::ExecutionPhase;
pub use prompt::{probe_prompt, PromptContext, PROBE_COMMAND, PROMPT_MARKER};
pub use result::{CommandOutput, ExecuteOutcome};
