//! Tab completion without a terminal.
//!
//! The last word of a multi-word input is completed as a path
//! (`compgen -f`); a single word is completed as a command name
//! (`compgen -c`). The query runs on the session's interactive shell, so
//! it sees the same working directory and `PATH` as executed commands.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::BridgeError;
use crate::execution::shell_quote;
use crate::output::OutputSanitizer;
use crate::session::{SessionId, SessionRegistry};
use crate::Result;

/// What the completed token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Path,
    Command,
}

/// The token to complete and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPlan {
    pub token: String,
    pub kind: CompletionKind,
}

impl CompletionPlan {
    /// Decide what to complete in `input`.
    pub fn for_input(input: &str) -> Self {
        if input.contains(' ') {
            // A trailing space means a new, empty word.
            let token = input.rsplit(' ').next().unwrap_or_default();
            Self {
                token: token.to_string(),
                kind: CompletionKind::Path,
            }
        } else {
            Self {
                token: input.to_string(),
                kind: CompletionKind::Command,
            }
        }
    }

    /// Shell command listing the candidates, one per line.
    pub fn query(&self) -> String {
        let flag = match self.kind {
            CompletionKind::Path => "-f",
            CompletionKind::Command => "-c",
        };
        format!("compgen {} -- {}", flag, shell_quote(&self.token))
    }

    /// Extract sorted, de-duplicated candidates from raw query output.
    pub fn parse_candidates(&self, raw: &[u8]) -> Vec<String> {
        let cleaned = OutputSanitizer::clean(raw, &self.query());
        let mut candidates: Vec<String> = cleaned
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && line.starts_with(self.token.as_str()))
            .map(String::from)
            .collect();
        candidates.sort();
        candidates.dedup();
        candidates
    }
}

/// Candidates plus the token they replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub suggestions: Vec<String>,
    pub partial: String,
}

/// Runs completion queries on registered sessions.
pub struct CompletionEngine {
    registry: Arc<SessionRegistry>,
}

impl CompletionEngine {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Complete the partial command line `input`.
    pub async fn complete(&self, id: &SessionId, input: &str) -> Result<Completion> {
        let session = self.registry.get(id)?;
        if input.contains(['\0', '\n', '\r']) {
            return Err(BridgeError::InvalidCommand(
                "completion input must be a single line".into(),
            ));
        }

        let plan = CompletionPlan::for_input(input);
        let raw = {
            let mut channel = session.lock_channel().await;
            let window = channel.policy().probe_timeout;
            channel.round_trip(&plan.query(), window).await
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                self.registry.evict_if_fatal(id, &e).await;
                return Err(e);
            }
        };

        let suggestions = plan.parse_candidates(&raw);
        debug!(session = %id, token = %plan.token, count = suggestions.len(), "completion");
        Ok(Completion {
            suggestions,
            partial: plan.token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DrainPolicy, InteractiveChannel};
    use crate::testing::{FakeConnection, ScriptedShell};

    fn setup(shell: ScriptedShell) -> (CompletionEngine, Arc<SessionRegistry>, SessionId) {
        let registry = Arc::new(SessionRegistry::new());
        let channel = InteractiveChannel::new(Box::new(shell), DrainPolicy::default());
        let id = registry
            .create("10.0.0.2", "pi", Arc::new(FakeConnection::new()), channel)
            .unwrap();
        (CompletionEngine::new(registry.clone()), registry, id)
    }

    #[test]
    fn test_plan_path_completion() {
        let plan = CompletionPlan::for_input("ls /et");
        assert_eq!(plan.kind, CompletionKind::Path);
        assert_eq!(plan.token, "/et");
        assert_eq!(plan.query(), "compgen -f -- '/et'");
    }

    #[test]
    fn test_plan_command_completion() {
        let plan = CompletionPlan::for_input("sys");
        assert_eq!(plan.kind, CompletionKind::Command);
        assert_eq!(plan.token, "sys");
        assert_eq!(plan.query(), "compgen -c -- 'sys'");
    }

    #[test]
    fn test_plan_trailing_space() {
        let plan = CompletionPlan::for_input("cat ");
        assert_eq!(plan.kind, CompletionKind::Path);
        assert_eq!(plan.token, "");
    }

    #[test]
    fn test_query_quotes_token() {
        let plan = CompletionPlan::for_input("cat it's");
        assert_eq!(plan.query(), "compgen -f -- 'it'\\''s'");
    }

    #[test]
    fn test_parse_candidates_filters_sorts_and_dedups() {
        let plan = CompletionPlan::for_input("gi");
        let raw = b"gitk\ngit\ngio\ngit\nbash\n$ ";
        assert_eq!(plan.parse_candidates(raw), vec!["gio", "git", "gitk"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_path() {
        let shell = ScriptedShell::new().respond_to("compgen -f", b"/etc\n/etc-backup\n$ ");
        let (engine, _, id) = setup(shell);

        let completion = engine.complete(&id, "ls /et").await.unwrap();
        assert_eq!(completion.suggestions, vec!["/etc", "/etc-backup"]);
        assert_eq!(completion.partial, "/et");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_unknown_session() {
        let (engine, registry, id) = setup(ScriptedShell::new());
        registry.remove(&id).await.unwrap();

        let err = engine.complete(&id, "ls").await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_no_matches() {
        let (engine, _, id) = setup(ScriptedShell::new());

        let completion = engine.complete(&id, "zzz").await.unwrap();
        assert!(completion.suggestions.is_empty());
        assert_eq!(completion.partial, "zzz");
    }
}
