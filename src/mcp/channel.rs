//! Line-delimited JSON channel to a worker process
//!
//! One JSON document per line in both directions. Reads are buffered by
//! `LineFramer` because a single read can end mid-line or carry several lines.

use serde::Serialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::config::WorkerCommand;

const READ_CHUNK: usize = 8192;
const INBOUND_CAPACITY: usize = 256;

/// Messages decoded from the worker. Yields `None` once the worker is gone.
pub type Inbound = mpsc::Receiver<Value>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
  #[error("Failed to spawn worker `{program}`: {source}")]
  Spawn {
    program: String,
    source: std::io::Error,
  },

  #[error("Worker is missing its {0} pipe")]
  MissingPipe(&'static str),

  #[error("Channel closed")]
  Closed,

  #[error("Write to worker failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("Failed to encode message: {0}")]
  Encode(#[from] serde_json::Error),
}

/// ---------------------------------------------------------------------------
/// Framing
/// ---------------------------------------------------------------------------

/// Reassembles newline-terminated lines from arbitrary read chunks.
#[derive(Debug, Default)]
pub struct LineFramer {
  buffer: Vec<u8>,
}

impl LineFramer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feed one read's worth of bytes, returning every line it completed.
  /// Line terminators (`\n`, `\r\n`) are stripped.
  pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
    self.buffer.extend_from_slice(chunk);

    let mut lines = Vec::new();
    while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
      let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
      line.pop();
      if line.last() == Some(&b'\r') {
        line.pop();
      }
      lines.push(line);
    }
    lines
  }

  /// Bytes of an unfinished line still waiting for its newline
  pub fn pending_len(&self) -> usize {
    self.buffer.len()
  }
}

/// Decode one framed line. Blank lines give `None` quietly; anything that is
/// not JSON is logged and dropped.
pub fn decode_line(line: &[u8]) -> Option<Value> {
  let text = String::from_utf8_lossy(line);
  let text = text.trim();
  if text.is_empty() {
    return None;
  }
  match serde_json::from_str::<Value>(text) {
    Ok(value) => Some(value),
    Err(e) => {
      let preview: String = text.chars().take(200).collect();
      warn!(error = %e, line = %preview, "Dropping malformed line from worker");
      None
    }
  }
}

/// ---------------------------------------------------------------------------
/// Channel
/// ---------------------------------------------------------------------------

pub struct MessageChannel {
  writer: Mutex<Option<BoxedWriter>>,
  closed: Arc<AtomicBool>,
  reader: AbortHandle,
  child: Mutex<Option<Child>>,
}

impl MessageChannel {
  /// Spawn the worker with piped stdio and attach to it.
  pub fn spawn(command: &WorkerCommand) -> Result<(Self, Inbound), ChannelError> {
    let mut cmd = Command::new(&command.program);
    cmd
      .args(&command.args)
      .envs(&command.env)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ChannelError::Spawn {
      program: command.program.clone(),
      source,
    })?;

    let stdin = child.stdin.take().ok_or(ChannelError::MissingPipe("stdin"))?;
    let stdout = child.stdout.take().ok_or(ChannelError::MissingPipe("stdout"))?;

    // Workers log to stderr in plain text; keep it out of the message stream
    if let Some(stderr) = child.stderr.take() {
      tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
          debug!(line = %line, "worker stderr");
        }
      });
    }

    debug!(program = %command.program, pid = ?child.id(), "Spawned provider worker");

    Ok(Self::attach(stdout, stdin, Some(child)))
  }

  /// Attach to any byte stream pair (in-process workers, tests).
  pub fn from_io<R, W>(reader: R, writer: W) -> (Self, Inbound)
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    Self::attach(reader, writer, None)
  }

  fn attach<R, W>(reader: R, writer: W, child: Option<Child>) -> (Self, Inbound)
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let closed = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn(read_loop(reader, tx, closed.clone()));

    let channel = Self {
      writer: Mutex::new(Some(Box::new(writer))),
      closed,
      reader: task.abort_handle(),
      child: Mutex::new(child),
    };
    (channel, rx)
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  /// Write one message line. `bytes` must not contain a newline.
  pub async fn send(&self, bytes: &[u8]) -> Result<(), ChannelError> {
    if self.is_closed() {
      return Err(ChannelError::Closed);
    }
    let mut guard = self.writer.lock().await;
    let writer = guard.as_mut().ok_or(ChannelError::Closed)?;

    let result = async {
      writer.write_all(bytes).await?;
      writer.write_all(b"\n").await?;
      writer.flush().await
    }
    .await;

    if let Err(e) = result {
      warn!(error = %e, "Write to worker failed, closing channel");
      self.closed.store(true, Ordering::SeqCst);
      guard.take();
      return Err(ChannelError::Io(e));
    }
    Ok(())
  }

  pub async fn send_json<T: Serialize>(&self, message: &T) -> Result<(), ChannelError> {
    let line = serde_json::to_vec(message)?;
    self.send(&line).await
  }

  /// Stop reading, close the worker's stdin and reap the process.
  pub async fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
    self.reader.abort();

    if let Some(mut writer) = self.writer.lock().await.take() {
      let _ = writer.shutdown().await;
    }

    if let Some(mut child) = self.child.lock().await.take() {
      let _ = child.kill().await;
      match child.wait().await {
        Ok(status) => debug!(%status, "Provider worker exited"),
        Err(e) => warn!(error = %e, "Failed to reap provider worker"),
      }
    }
  }
}

impl Drop for MessageChannel {
  fn drop(&mut self) {
    self.reader.abort();
  }
}

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<Value>, closed: Arc<AtomicBool>)
where
  R: AsyncRead + Unpin,
{
  let mut framer = LineFramer::new();
  let mut chunk = vec![0u8; READ_CHUNK];

  'read: loop {
    match reader.read(&mut chunk).await {
      Ok(0) => {
        debug!("Worker stdout reached EOF");
        break;
      }
      Ok(n) => {
        for line in framer.push(&chunk[..n]) {
          let Some(message) = decode_line(&line) else {
            continue;
          };
          if tx.send(message).await.is_err() {
            break 'read;
          }
        }
      }
      Err(e) => {
        warn!(error = %e, "Read from worker failed");
        break;
      }
    }
  }

  if framer.pending_len() > 0 {
    debug!(bytes = framer.pending_len(), "Discarding unterminated trailing line");
  }
  // Mark closed before `tx` drops so waiters never see an open channel after EOF
  closed.store(true, Ordering::SeqCst);
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
