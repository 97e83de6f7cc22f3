// src/protocol/writer.rs

//! Writer side of the line protocol: one command per line, paced.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

use crate::backend::quote::single_line;
use crate::errors::Result;

struct WriterState {
    sink: Box<dyn AsyncWrite + Send + Unpin>,
    last_sent: Option<Instant>,
    min_interval: Duration,
}

/// Serialised access to the worker's stdin.
///
/// Sends are strictly ordered; a send waits until `min_interval` has passed
/// since the previous one.
pub struct CommandWriter {
    state: Mutex<WriterState>,
}

impl fmt::Debug for CommandWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandWriter").finish_non_exhaustive()
    }
}

impl CommandWriter {
    pub fn new(sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            state: Mutex::new(WriterState {
                sink: Box::new(sink),
                last_sent: None,
                min_interval: Duration::ZERO,
            }),
        }
    }

    pub async fn set_min_interval(&self, interval: Duration) {
        self.state.lock().await.min_interval = interval;
    }

    /// Write `line` followed by a newline. Embedded line breaks are
    /// replaced by spaces.
    pub async fn send(&self, line: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_sent {
            sleep_until(last + state.min_interval).await;
        }

        let mut payload = single_line(line);
        payload.push('\n');
        trace!(command = %payload.trim_end(), "writing command");

        state.sink.write_all(payload.as_bytes()).await?;
        state.sink.flush().await?;
        state.last_sent = Some(Instant::now());
        Ok(())
    }
}
