//! Prompt context probing.
//!
//! After each command the shell is asked who and where it is, so a client
//! can draw its own `user@host:dir$` prompt.

use serde::Serialize;
use tracing::debug;

use crate::channel::InteractiveChannel;
use crate::output::OutputSanitizer;
use crate::Result;

/// Marker in front of the probe reply.
pub const PROMPT_MARKER: &str = "__PROMPT__";

/// Shell command that prints `__PROMPT__user@host:dir`.
pub const PROBE_COMMAND: &str = r#"echo "__PROMPT__$(whoami)@$(hostname):$(pwd)""#;

pub const FALLBACK_USERNAME: &str = "user";
pub const FALLBACK_HOSTNAME: &str = "localhost";
pub const FALLBACK_WORKING_DIR: &str = "~";

/// Who and where the remote shell currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub username: String,
    pub hostname: String,
    pub working_dir: String,
}

impl Default for PromptContext {
    fn default() -> Self {
        Self {
            username: FALLBACK_USERNAME.to_string(),
            hostname: FALLBACK_HOSTNAME.to_string(),
            working_dir: FALLBACK_WORKING_DIR.to_string(),
        }
    }
}

impl PromptContext {
    /// Parse a probe reply. Anything unexpected yields the fallback values.
    pub fn parse(output: &str) -> Self {
        output
            .lines()
            .filter_map(|line| line.split_once(PROMPT_MARKER).map(|(_, rest)| rest.trim()))
            // An echoed probe still has its `$(...)` substitutions.
            .filter(|rest| !rest.contains("$("))
            .find_map(Self::parse_reply)
            .unwrap_or_default()
    }

    fn parse_reply(reply: &str) -> Option<Self> {
        let (username, rest) = reply.split_once('@')?;
        let (hostname, working_dir) = rest.split_once(':')?;
        if username.is_empty() || hostname.is_empty() {
            return None;
        }
        let working_dir = if working_dir.is_empty() {
            FALLBACK_WORKING_DIR
        } else {
            working_dir
        };
        Some(Self {
            username: username.to_string(),
            hostname: hostname.to_string(),
            working_dir: working_dir.to_string(),
        })
    }
}

/// Send the probe and parse whatever comes back within the probe window.
///
/// Channel failures propagate; an unparseable reply does not.
pub async fn probe_prompt(channel: &mut InteractiveChannel) -> Result<PromptContext> {
    let window = channel.policy().probe_timeout;
    let raw = channel.round_trip(PROBE_COMMAND, window).await?;
    let context = PromptContext::parse(&OutputSanitizer::strip_ansi(&raw));
    debug!(
        user = %context.username,
        host = %context.hostname,
        dir = %context.working_dir,
        "prompt context"
    );
    Ok(context)
}
