use std::collections::VecDeque;
use std::io;

use termdeck_core::bridge_ipc::{BridgeFrame, NdjsonFrameDecoder};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Reads bridge frames off a byte stream. Undecodable lines are logged and
/// skipped. A line longer than `max_frame_bytes` is discarded without being
/// buffered in full.
pub(crate) struct FrameReader<R> {
    reader: R,
    decoder: NdjsonFrameDecoder<BridgeFrame>,
    ready: VecDeque<BridgeFrame>,
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            decoder: NdjsonFrameDecoder::new(max_frame_bytes),
            ready: VecDeque::new(),
            chunk: vec![0; READ_CHUNK_BYTES],
            eof: false,
        }
    }

    /// Next decoded frame, or `None` once the stream has ended. Cancel safe:
    /// a dropped call loses no bytes.
    pub(crate) async fn next_frame(&mut self) -> io::Result<Option<BridgeFrame>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(None);
            }
            let n = self.reader.read(&mut self.chunk).await?;
            let report = if n == 0 {
                self.eof = true;
                self.decoder.finish()
            } else {
                self.decoder.push_chunk(&self.chunk[..n])
            };
            for err in report.errors {
                warn!(event = "bridge_decode_error", error = %err);
            }
            self.ready.extend(report.frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use termdeck_core::bridge_ipc::{encode_frame, CallEnvelope, DEFAULT_MAX_FRAME_BYTES};

    fn invoke_line(request_id: u64) -> Vec<u8> {
        let frame = BridgeFrame::invoke(
            "IPC-bridge",
            request_id,
            CallEnvelope::new("terminal:list", Vec::new()),
        );
        encode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("encode")
    }

    #[tokio::test]
    async fn frames_split_across_reads_are_reassembled() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, DEFAULT_MAX_FRAME_BYTES);
        let line = invoke_line(1);
        let (head, tail) = line.split_at(10);
        let (head, tail) = (head.to_vec(), tail.to_vec());
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(&head).await.expect("head");
            tokio::task::yield_now().await;
            tx.write_all(&tail).await.expect("tail");
            tx.write_all(b"\n  \nnot json\n").await.expect("noise");
        });

        let frame = reader.next_frame().await.expect("read").expect("frame");
        assert_eq!(frame.channel, "IPC-bridge");
        assert!(reader.next_frame().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn oversized_line_is_discarded_and_stream_recovers() {
        let max = 256;
        let mut bytes = vec![b'x'; max * 40];
        bytes.push(b'\n');
        bytes.extend(invoke_line(2));
        let mut reader = FrameReader::new(bytes.as_slice(), max);

        let frame = reader.next_frame().await.expect("read").expect("frame");
        assert_eq!(
            serde_json::to_value(&frame).expect("json")["requestId"],
            json!(2)
        );
        assert!(reader.next_frame().await.expect("read").is_none());
    }
}
