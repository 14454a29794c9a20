//! Installing, listing and removing power schedules on a host.
//!
//! Every operation opens its own connection, runs a handful of commands
//! and closes it again, independent of the session registry.
//!
//! File contents travel inside the command line, base64 encoded, never on
//! stdin. Stdin of an elevated command holds the sudo password and nothing
//! else, so a host that does not prompt (NOPASSWD, cached timestamp) leaves
//! the password unread instead of handing it to the payload.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use tracing::{info, warn};

use super::schedule::{
    install_entry, managed_entries, parse_sleep_marker, remove_entry, render_script,
    script_path, sleep_seconds, ClockTime, Schedule,
};
use crate::error::BridgeError;
use crate::execution::shell_quote;
use crate::transport::{Connection, ExecOutput, HostTarget, Transport};
use crate::Result;

/// Result of installing a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDetails {
    pub id: String,
    pub shutdown: ClockTime,
    pub wakeup: ClockTime,
    pub sleep_seconds: u32,
    pub script: String,
}

/// One-shot crontab editing over a [`Transport`].
pub struct PowerManager {
    transport: Arc<dyn Transport>,
}

impl PowerManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Install a shutdown at `shutdown` that wakes the host at `wake`.
    ///
    /// Replaces any managed entry for the same shutdown time.
    pub async fn schedule(
        &self,
        target: &HostTarget,
        shutdown: ClockTime,
        wake: ClockTime,
    ) -> Result<ScheduleDetails> {
        let sleep = sleep_seconds(shutdown, wake);
        let script = script_path(shutdown);

        self.with_connection(target, |remote| {
            let script = script.clone();
            async move {
                let install = format!(
                    "mkdir -p /usr/local/bin && cat > {path} && chmod 755 {path}",
                    path = shell_quote(&script)
                );
                remote
                    .run(&install, Some(render_script(sleep).as_bytes()))
                    .await?;

                let crontab = remote.read_crontab().await?;
                remote.write_crontab(&install_entry(&crontab, shutdown)).await
            }
        })
        .await?;

        info!(
            host = %target.host,
            shutdown = %shutdown,
            wakeup = %wake,
            sleep_seconds = sleep,
            "power schedule installed"
        );
        Ok(ScheduleDetails {
            id: shutdown.compact(),
            shutdown,
            wakeup: wake,
            sleep_seconds: sleep,
            script,
        })
    }

    /// Schedules currently installed on the host, in crontab order.
    ///
    /// An entry whose script is missing or has no sleep marker is skipped.
    pub async fn list(&self, target: &HostTarget) -> Result<Vec<Schedule>> {
        self.with_connection(target, |remote| async move {
            let crontab = remote.read_crontab().await?;

            let mut schedules = Vec::new();
            for shutdown in managed_entries(&crontab) {
                let path = script_path(shutdown);
                let read = format!("cat -- {}", shell_quote(&path));
                let sleep = match remote.connection.exec(&read, None).await?.check(&read) {
                    Ok(output) => parse_sleep_marker(&output.stdout_text()),
                    Err(e) => {
                        warn!(script = %path, error = %e, "cannot read schedule script");
                        None
                    }
                };
                match sleep {
                    Some(sleep) => schedules.push(Schedule::new(shutdown, shutdown.after(sleep))),
                    None => warn!(script = %path, "schedule script has no sleep marker"),
                }
            }
            Ok(schedules)
        })
        .await
    }

    /// Remove the schedule `id` (`HHMM`) and its script.
    pub async fn remove(&self, target: &HostTarget, id: &str) -> Result<()> {
        self.with_connection(target, |remote| async move {
            let crontab = remote.read_crontab().await?;
            let table = remove_entry(&crontab, id)
                .ok_or_else(|| BridgeError::ScheduleNotFound(id.to_string()))?;
            remote.write_crontab(&table).await?;

            let shutdown = managed_entries(&crontab)
                .into_iter()
                .find(|time| time.compact() == id);
            if let Some(shutdown) = shutdown {
                let rm = format!("rm -f -- {}", shell_quote(&script_path(shutdown)));
                remote.run(&rm, None).await?;
            }
            Ok(())
        })
        .await?;

        info!(host = %target.host, id, "power schedule removed");
        Ok(())
    }

    /// Open a connection, run `work`, and close the connection whatever
    /// the outcome.
    async fn with_connection<F, Fut, T>(&self, target: &HostTarget, work: F) -> Result<T>
    where
        F: FnOnce(Remote) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let connection = self.transport.open(target).await?;
        let remote = Remote {
            connection: Arc::clone(&connection),
            elevate: target.username != "root",
            password: target.password.clone(),
        };

        let result = work(remote).await;
        if let Err(e) = connection.close().await {
            warn!(host = %target.host, error = %e, "error closing connection");
        }
        result
    }
}

/// Command runner for one connection, elevating through `sudo` for
/// non-root logins.
struct Remote {
    connection: Arc<dyn Connection>,
    elevate: bool,
    password: String,
}

impl Remote {
    /// Run `command` with root privileges, feeding `payload` to its stdin.
    async fn run(&self, command: &str, payload: Option<&[u8]>) -> Result<ExecOutput> {
        let command_line = match payload {
            Some(payload) => pipe_payload(command, payload),
            None => command.to_string(),
        };
        if !self.elevate {
            return self
                .connection
                .exec(&command_line, None)
                .await?
                .check(command);
        }

        // `sudo -S` reads the password line only if it has to prompt.
        let wrapped = format!("sudo -S -p '' sh -c {}", shell_quote(&command_line));
        let mut password = Vec::with_capacity(self.password.len() + 1);
        password.extend_from_slice(self.password.as_bytes());
        password.push(b'\n');
        self.connection
            .exec(&wrapped, Some(&password))
            .await?
            .check(command)
    }

    /// Root's crontab, empty when none exists yet.
    async fn read_crontab(&self) -> Result<String> {
        match self.run("crontab -l", None).await {
            Ok(output) => Ok(output.stdout_text()),
            Err(BridgeError::RemoteCommand { stderr, .. }) if stderr.contains("no crontab") => {
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn write_crontab(&self, table: &str) -> Result<()> {
        self.run("crontab -", Some(table.as_bytes())).await?;
        Ok(())
    }
}

/// `command` reading `payload` from a decoded base64 literal.
fn pipe_payload(command: &str, payload: &[u8]) -> String {
    format!(
        "printf '%s' '{}' | base64 -d | {{ {}; }}",
        BASE64.encode(payload),
        command
    )
}
