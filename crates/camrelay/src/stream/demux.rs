//! JPEG frame extraction from a concatenated byte stream.
//!
//! The transcoder writes images back to back with no container. Frames are
//! recovered by scanning for the SOI (`FF D8`) and EOI (`FF D9`) markers.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::StreamError;

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// One complete JPEG image, SOI through EOI inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame(Bytes);

impl VideoFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|i| i + from)
}

/// Incremental SOI/EOI scanner with a bounded buffer.
///
/// Each byte is scanned once: both searches resume where the previous
/// push stopped.
#[derive(Debug)]
pub struct FrameDemuxer {
    buffer: BytesMut,
    max_buffer: usize,
    /// SOI offset of the pending frame
    frame_start: Option<usize>,
    /// Offset where the next SOI search resumes
    soi_from: usize,
    /// Offset where the next EOI search resumes
    eoi_from: usize,
}

impl FrameDemuxer {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffer,
            frame_start: None,
            soi_from: 0,
            eoi_from: 0,
        }
    }

    /// Bytes held while waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return every frame it completes, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<VideoFrame>, StreamError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.extract() {
            frames.push(frame);
        }

        if self.buffer.len() > self.max_buffer {
            let buffered = self.buffer.len();
            self.clear();
            return Err(StreamError::MalformedStream {
                buffered,
                limit: self.max_buffer,
            });
        }
        Ok(frames)
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_scan();
    }

    fn reset_scan(&mut self) {
        self.frame_start = None;
        self.soi_from = 0;
        self.eoi_from = 0;
    }

    /// Last offset a marker split across pushes can start at.
    fn tail(&self) -> usize {
        self.buffer.len().saturating_sub(1)
    }

    fn extract(&mut self) -> Option<VideoFrame> {
        let start = match self.frame_start {
            Some(start) => start,
            None => match find_marker(&self.buffer, &SOI, self.soi_from) {
                Some(start) => {
                    self.frame_start = Some(start);
                    self.eoi_from = start + SOI.len();
                    start
                }
                None => {
                    self.soi_from = self.tail();
                    return None;
                }
            },
        };

        match find_marker(&self.buffer, &EOI, self.eoi_from) {
            Some(end) => {
                let stop = end + EOI.len();
                let mut consumed = self.buffer.split_to(stop);
                let frame = consumed.split_off(start).freeze();
                self.reset_scan();
                Some(VideoFrame(frame))
            }
            None => {
                self.eoi_from = self.tail().max(start + SOI.len());
                None
            }
        }
    }
}

/// Pull-based frame sequence over an async byte source.
///
/// `next_frame` yields `Ok(Some(frame))` in stream order, `Ok(None)` once the
/// source reaches end-of-stream (a trailing partial frame is discarded), and
/// `Err` on read failure or a malformed stream.
pub struct FrameReader<R> {
    source: R,
    demuxer: FrameDemuxer,
    chunk: Vec<u8>,
    pending: VecDeque<VideoFrame>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(source: R, chunk_size: usize, max_buffer: usize) -> Self {
        Self {
            source,
            demuxer: FrameDemuxer::new(max_buffer),
            chunk: vec![0; chunk_size.max(1)],
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub async fn next_frame(&mut self) -> Result<Option<VideoFrame>, StreamError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.finished {
                return Ok(None);
            }

            let n = match self.source.read(&mut self.chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.finish();
                    return Err(StreamError::Read(e));
                }
            };
            if n == 0 {
                if self.demuxer.buffered() > 0 {
                    log::debug!(
                        "[STREAM] discarding {} bytes of incomplete frame at end of stream",
                        self.demuxer.buffered()
                    );
                }
                self.finish();
                continue;
            }

            match self.demuxer.push(&self.chunk[..n]) {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.demuxer.clear();
    }
}
