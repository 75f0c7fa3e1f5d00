//! Control message protocol: one JSON object per line.
//!
//! Recognized kinds are `SKIP_WAITING` (promote the current bucket
//! immediately), `CLEAR_CACHE` (delete every bucket), and `GET_VERSION`
//! (reply with `{"version": ..., "cacheName": ...}` on the output channel).
//! Malformed lines and unknown kinds are ignored.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::{BucketStore, CacheManager};

/// A recognized control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  #[serde(rename = "CLEAR_CACHE")]
  ClearCache,
  #[serde(rename = "GET_VERSION")]
  GetVersion,
}

/// Parse one wire line. Returns None for anything unrecognized.
pub fn parse(line: &str) -> Option<ControlMessage> {
  serde_json::from_str(line.trim()).ok()
}

/// Pumps control messages from an async reader onto a channel.
pub struct ControlListener {
  rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl ControlListener {
  /// Start reading messages from the given source, one JSON object per line.
  pub fn new<R>(reader: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      use tokio::io::AsyncBufReadExt;

      let mut lines = BufReader::new(reader).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        if let Some(msg) = parse(&line) {
          if tx.send(msg).is_err() {
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next message. None once the source is exhausted.
  pub async fn next(&mut self) -> Option<ControlMessage> {
    self.rx.recv().await
  }
}

/// Dispatch control messages against a manager until the listener runs dry.
///
/// Lifecycle failures are logged and swallowed so one bad message cannot kill
/// the loop; only reply-channel write errors propagate.
pub async fn run<S, W>(
  manager: &CacheManager<S>,
  mut listener: ControlListener,
  mut out: W,
) -> Result<()>
where
  S: BucketStore,
  W: AsyncWrite + Unpin,
{
  while let Some(msg) = listener.next().await {
    match msg {
      ControlMessage::SkipWaiting => {
        if let Err(e) = manager.promote() {
          warn!(error = %e, "promote failed");
        }
      }
      ControlMessage::ClearCache => {
        if let Err(e) = manager.teardown() {
          warn!(error = %e, "teardown failed");
        }
      }
      ControlMessage::GetVersion => {
        let reply = serde_json::to_string(&manager.version_info())
          .map_err(|e| eyre!("Failed to serialize version reply: {}", e))?;
        out
          .write_all(reply.as_bytes())
          .await
          .map_err(|e| eyre!("Failed to write version reply: {}", e))?;
        out
          .write_all(b"\n")
          .await
          .map_err(|e| eyre!("Failed to write version reply: {}", e))?;
      }
    }
  }

  Ok(())
}
