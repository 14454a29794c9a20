//! [`ShellIo`] over a russh shell channel.
//!
//! The channel is owned by a pump task. Input and output travel over
//! bounded queues; `try_read` never awaits. A full output queue stalls the
//! pump, which stops the channel window from reopening, so a command that
//! keeps printing after its drain was cut off is throttled by the remote
//! side instead of piling up in memory. When the remote side closes the
//! channel, or the connection is torn down, the pump exits and drops its
//! output sender, which turns the next `try_read` into `SessionClosed`.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

use super::ShellIo;
use crate::error::BridgeError;
use crate::Result;

const INPUT_QUEUE: usize = 64;
const OUTPUT_QUEUE: usize = 1024;

/// Shell channel driven by a background pump task.
pub struct SshShell {
    input: mpsc::Sender<Vec<u8>>,
    output: mpsc::Receiver<Vec<u8>>,
}

impl SshShell {
    /// Take ownership of an open shell channel and start pumping it.
    pub fn spawn(channel: Channel<Msg>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE);
        tokio::spawn(pump(channel, input_rx, output_tx));

        Self {
            input: input_tx,
            output: output_rx,
        }
    }
}

async fn pump(
    mut channel: Channel<Msg>,
    mut input: mpsc::Receiver<Vec<u8>>,
    output: mpsc::Sender<Vec<u8>>,
) {
    loop {
        tokio::select! {
            data = input.recv() => match data {
                Some(bytes) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!(error = %e, "shell channel write failed");
                        break;
                    }
                }
                // SshShell dropped: the session is gone.
                None => {
                    let _ = channel.close().await;
                    break;
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if output.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!("remote shell channel closed");
                    break;
                }
                Some(_) => {}
            },
        }
    }
}

#[async_trait]
impl ShellIo for SshShell {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input
            .send(data.to_vec())
            .await
            .map_err(|_| BridgeError::SessionClosed)
    }

    fn try_read(&mut self) -> Result<Option<Vec<u8>>> {
        match self.output.try_recv() {
            Ok(chunk) => Ok(Some(chunk)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BridgeError::SessionClosed),
        }
    }
}
