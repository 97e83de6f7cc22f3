// src/protocol/reader.rs

//! Reader side of the line protocol.
//!
//! Progress bars redraw with a bare `\r`, so segments are split on both
//! `\n` and `\r`; empty segments are dropped.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::output::router::OutputRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Read `reader` until EOF, routing every non-empty segment as it arrives.
///
/// Returns the number of segments delivered.
pub async fn pump_lines<R>(reader: R, stream: OutputStream, router: OutputRouter) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();
    let mut delivered = 0;

    loop {
        let buf = match reader.fill_buf().await {
            Ok(buf) => buf,
            Err(e) => {
                warn!(?stream, error = %e, "reading worker output failed");
                break;
            }
        };
        if buf.is_empty() {
            break;
        }

        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if flush_segment(&mut pending, stream, &router) {
                    delivered += 1;
                }
            } else {
                pending.push(byte);
            }
        }
        reader.consume(len);
    }

    if flush_segment(&mut pending, stream, &router) {
        delivered += 1;
    }

    debug!(?stream, delivered, "worker output stream closed");
    delivered
}

fn flush_segment(pending: &mut Vec<u8>, stream: OutputStream, router: &OutputRouter) -> bool {
    if pending.is_empty() {
        return false;
    }
    let segment = String::from_utf8_lossy(pending).into_owned();
    pending.clear();

    if segment.trim().is_empty() {
        return false;
    }
    router.route(stream, &segment);
    true
}

/// Spawn a task running [`pump_lines`] for the lifetime of the stream.
pub fn spawn_reader<R>(reader: R, stream: OutputStream, router: OutputRouter) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(pump_lines(reader, stream, router))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::output::interpreter::Interpreter;
    use crate::output::markers::LineMarkers;

    #[tokio::test]
    async fn splits_on_carriage_returns_and_newlines() {
        let router = OutputRouter::new();
        let interp = Arc::new(Interpreter::new(LineMarkers::new("^never$").unwrap(), 1));
        router.attach(interp.clone());

        let input: &[u8] = b"loading\r\n 10%|#\r 20%|##\r\n\n  \ndone";
        let delivered = pump_lines(input, OutputStream::Stderr, router).await;

        assert_eq!(delivered, 4);
        assert_eq!(
            interp.recent_lines(),
            vec!["loading", " 10%|#", " 20%|##", "done"]
        );
    }
}
