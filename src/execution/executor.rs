//! Command execution engine.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::command::{check_command, classify, sanitize_for_display, CommandKind};
use super::phase::ExecutionPhase;
use super::prompt::probe_prompt;
use super::result::{CommandOutput, ExecuteOutcome};
use crate::channel::InteractiveChannel;
use crate::error::BridgeError;
use crate::output::OutputSanitizer;
use crate::session::{SessionId, SessionRegistry};
use crate::Result;

/// Runs commands on registered sessions.
pub struct CommandExecutor {
    registry: Arc<SessionRegistry>,
}

impl CommandExecutor {
    /// Create a new command executor.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Execute `command` on the session's interactive channel.
    ///
    /// Editor and unsupported commands are settled before the channel is
    /// touched. Concurrent calls on the same session queue on its channel
    /// lock. A transport failure closes and removes the session.
    pub async fn execute(&self, id: &SessionId, command: &str) -> Result<ExecuteOutcome> {
        let session = self.registry.get(id)?;
        let mut phase = ExecutionPhase::Idle;

        phase.transition_to(ExecutionPhase::Validating)?;
        if let Err(reason) = check_command(command) {
            phase.transition_to(ExecutionPhase::Rejected)?;
            return Err(BridgeError::InvalidCommand(reason));
        }
        match classify(command) {
            CommandKind::Plain => {}
            CommandKind::Editor { path } => {
                phase.transition_to(ExecutionPhase::Rejected)?;
                info!(session = %id, path = %path, "editor requested, redirecting to file API");
                return Ok(ExecuteOutcome::Editor { path });
            }
            CommandKind::Interactive { program } => {
                phase.transition_to(ExecutionPhase::Rejected)?;
                warn!(session = %id, program = %program, "refusing interactive program");
                return Err(BridgeError::UnsupportedCommand(program));
            }
        }

        let result = {
            let mut channel = session.lock_channel().await;
            run(&mut channel, &mut phase, command).await
        };

        match result {
            Ok(output) => {
                debug!(
                    session = %id,
                    command = %sanitize_for_display(command),
                    elapsed_ms = output.duration.as_millis() as u64,
                    "command finished"
                );
                Ok(ExecuteOutcome::Output(output))
            }
            Err(e) => {
                self.registry.evict_if_fatal(id, &e).await;
                Err(e)
            }
        }
    }
}

async fn run(
    channel: &mut InteractiveChannel,
    phase: &mut ExecutionPhase,
    command: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();

    phase.transition_to(ExecutionPhase::Sending)?;
    channel.discard_pending()?;
    channel.send(command).await?;

    phase.transition_to(ExecutionPhase::Draining)?;
    let idle = channel.policy().idle_timeout;
    let raw = channel.drain_available(idle).await?;
    let duration = started.elapsed();

    phase.transition_to(ExecutionPhase::Cleaning)?;
    let output = OutputSanitizer::clean(&raw, command);
    let prompt = probe_prompt(channel).await?;

    phase.transition_to(ExecutionPhase::Done)?;
    Ok(CommandOutput {
        output,
        prompt,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DrainPolicy;
    use crate::testing::{FakeConnection, ScriptedShell, WrittenLog};
    use std::time::Duration;

    fn setup(
        shell: ScriptedShell,
    ) -> (CommandExecutor, Arc<SessionRegistry>, SessionId, WrittenLog) {
        let registry = Arc::new(SessionRegistry::new());
        let written = shell.written();
        let channel = InteractiveChannel::new(Box::new(shell), DrainPolicy::default());
        let id = registry
            .create("10.0.0.2", "pi", Arc::new(FakeConnection::new()), channel)
            .unwrap();
        (CommandExecutor::new(registry.clone()), registry, id, written)
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_cleans_output() {
        let shell = ScriptedShell::new()
            .with_prompt("pi", "raspberrypi", "/home/pi")
            .respond_to("echo hi", b"$ echo hi\nhi\n$ ");
        let (executor, _, id, _) = setup(shell);

        let outcome = executor.execute(&id, "echo hi").await.unwrap();
        let output = outcome.output().unwrap();
        assert_eq!(output.output, "hi");
        assert_eq!(output.prompt.username, "pi");
        assert_eq!(output.prompt.hostname, "raspberrypi");
        assert_eq!(output.prompt.working_dir, "/home/pi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_editor_is_redirected_without_writing() {
        let (executor, _, id, written) = setup(ScriptedShell::new());

        let outcome = executor.execute(&id, "vi /tmp/x").await.unwrap();
        assert_eq!(
            outcome,
            ExecuteOutcome::Editor {
                path: "/tmp/x".into()
            }
        );
        assert!(written.raw().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_program_is_rejected_without_writing() {
        let (executor, registry, id, written) = setup(ScriptedShell::new());

        let err = executor.execute(&id, "less file").await.unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedCommand(ref p) if p == "less"));
        assert!(written.raw().is_empty());
        // The session survives a rejected command.
        assert!(registry.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_is_rejected() {
        let (executor, _, id, written) = setup(ScriptedShell::new());

        let err = executor.execute(&id, "   ").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidCommand(_)));
        assert!(written.raw().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_after_disconnect() {
        let (executor, registry, id, _) = setup(ScriptedShell::new());

        assert!(registry.remove(&id).await.unwrap());
        let err = executor.execute(&id, "ls").await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_removes_session() {
        let shell = ScriptedShell::new();
        let closer = shell.close_handle();
        let (executor, registry, id, _) = setup(shell);

        closer.close();
        let err = executor.execute(&id, "uptime").await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionClosed));
        assert!(!registry.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_session_calls_are_serialized() {
        let shell = ScriptedShell::new()
            .respond_to_after("echo one", Duration::from_millis(500), b"one\n")
            .respond_to_after("echo two", Duration::from_millis(500), b"two\n");
        let (executor, _, id, written) = setup(shell);
        let executor = Arc::new(executor);

        let first = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&id, "echo one").await })
        };
        let second = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&id, "echo two").await })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.output().unwrap().output, "one");
        assert_eq!(second.output().unwrap().output, "two");

        // Each command was followed by its own probe before the next started.
        let lines = written.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("echo "));
        assert!(lines[1].contains("__PROMPT__"));
        assert!(lines[2].starts_with("echo "));
        assert!(lines[3].contains("__PROMPT__"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_prompt_reply_stays_out_of_next_output() {
        let shell = ScriptedShell::new()
            .with_prompt("pi", "box", "/srv")
            .with_prompt_delay(Duration::from_millis(500))
            .respond_to("echo a", b"a\n$ ")
            .respond_to("echo b", b"b\n$ ")
            .respond_to("echo c", b"c\n$ ");
        let (executor, _, id, _) = setup(shell);

        let a = executor.execute(&id, "echo a").await.unwrap();
        assert_eq!(a.output().unwrap().output, "a");

        let b = executor.execute(&id, "echo b").await.unwrap();
        assert_eq!(b.output().unwrap().output, "b");

        // A reply that is already buffered is dropped before sending.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let c = executor.execute(&id, "echo c").await.unwrap();
        assert_eq!(c.output().unwrap().output, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_command_returns_partial_output() {
        let mut shell = ScriptedShell::new();
        for seq in 0..200u64 {
            let line = format!("64 bytes from 8.8.8.8: icmp_seq={} ttl=117\n", seq);
            shell.push_delayed_output(Duration::from_millis(500 * seq), line.as_bytes());
        }
        let (executor, registry, id, _) = setup(shell);

        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            executor.execute(&id, "ping 8.8.8.8"),
        )
        .await
        .expect("execute must return while the command is still running")
        .unwrap();

        let output = &outcome.output().unwrap().output;
        assert!(output.starts_with("64 bytes from 8.8.8.8: icmp_seq=0 ttl=117"));
        assert!(!output.contains("icmp_seq=199"));
        // The session stays usable.
        assert!(registry.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_independent() {
        let registry = Arc::new(SessionRegistry::new());
        let mut ids = Vec::new();
        for name in ["alpha", "beta"] {
            let shell = ScriptedShell::new().respond_to_after(
                "uname -n",
                Duration::from_millis(300),
                format!("{}\n", name).as_bytes(),
            );
            let channel = InteractiveChannel::new(Box::new(shell), DrainPolicy::default());
            ids.push(
                registry
                    .create(name, "pi", Arc::new(FakeConnection::new()), channel)
                    .unwrap(),
            );
        }
        let executor = CommandExecutor::new(registry);

        let (a, b) = tokio::join!(
            executor.execute(&ids[0], "uname -n"),
            executor.execute(&ids[1], "uname -n")
        );
        assert_eq!(a.unwrap().output().unwrap().output, "alpha");
        assert_eq!(b.unwrap().output().unwrap().output, "beta");
    }
}
