//! Line-by-line relay of upstream event streams

use std::io;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use tokio::sync::mpsc;
use tollgate_core::Usage;

/// Body of a streaming completion as handed to the caller
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Length of the `data: ` prefix on event lines
const DATA_PREFIX_LEN: usize = 6;

/// Splits a byte stream into lines, dropping the terminator
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    buffer: BytesMut,
}

impl LineSplitter {
    /// Feed a chunk and drain every complete line
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            lines.push(line.freeze());
        }
        lines
    }

    /// Trailing bytes after the last terminator
    pub(crate) fn finish(self) -> Option<Bytes> {
        (!self.buffer.is_empty()).then(|| self.buffer.freeze())
    }
}

/// Usage from the last event line that carries one
///
/// Scans every line from the end. A candidate must be at least as long as
/// the `data: ` prefix and parse as JSON after it with a `usage` object.
/// The space after `data:` is optional.
pub fn find_usage(lines: &[Bytes]) -> Option<Usage> {
    lines.iter().rev().find_map(|line| {
        if line.len() < DATA_PREFIX_LEN {
            return None;
        }
        let payload = line.strip_prefix(b"data:").unwrap_or(&line[DATA_PREFIX_LEN..]);
        let mut event: serde_json::Value = serde_json::from_slice(payload).ok()?;
        let usage = event.get_mut("usage")?.take();
        if !usage.is_object() {
            return None;
        }
        serde_json::from_value(usage).ok()
    })
}

/// Forward `upstream` line by line into a caller body
///
/// Returns the caller body and a handle that resolves to every line read
/// once the upstream closes. Each line has its newline restored on the way
/// out. When the caller goes away the upstream is dropped and the handle
/// resolves with what was read so far.
pub(crate) fn relay_lines<S, E>(upstream: S) -> (EventStream, tokio::task::JoinHandle<Vec<Bytes>>)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(32);

    let pump = tokio::spawn(async move {
        let mut upstream = Box::pin(upstream);
        let mut splitter = LineSplitter::default();
        let mut lines = Vec::new();

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, "upstream stream interrupted");
                    let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                    return lines;
                }
            };

            for line in splitter.push(&chunk) {
                if !forward(&tx, &line).await {
                    tracing::debug!("caller disconnected mid-stream");
                    lines.push(line);
                    return lines;
                }
                lines.push(line);
            }
        }

        if let Some(line) = splitter.finish() {
            forward(&tx, &line).await;
            lines.push(line);
        }
        lines
    });

    let body = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    (Box::pin(body), pump)
}

async fn forward(tx: &mpsc::Sender<Result<Bytes, io::Error>>, line: &Bytes) -> bool {
    let mut framed = BytesMut::with_capacity(line.len() + 1);
    framed.extend_from_slice(line);
    framed.extend_from_slice(b"\n");
    tx.send(Ok(framed.freeze())).await.is_ok()
}
