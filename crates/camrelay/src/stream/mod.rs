//! Live MJPEG relay: transcoder supervision, frame demuxing and multipart output.

pub mod demux;
pub mod multipart;
pub mod supervisor;

use std::time::Duration;

use async_trait::async_trait;

pub use demux::{FrameDemuxer, FrameReader, VideoFrame};
pub use multipart::MultipartStreamer;
pub use supervisor::{ProcessExit, ProcessMonitor, SessionState, StreamSession, StreamSupervisor};

/// Errors raised while opening or relaying a video stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("unknown stream '{0}'")]
    UnknownStream(String),

    #[error("invalid stream source: {0}")]
    InvalidSource(String),

    #[error("failed to spawn transcoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder stdout was not captured")]
    MissingStdout,

    #[error("read from transcoder failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("malformed stream: {buffered} bytes buffered without a complete frame (limit {limit})")]
    MalformedStream { buffered: usize, limit: usize },

    #[error("transcoder ended before producing a frame")]
    NoFrames,

    #[error("no frame received within {0:?}")]
    FirstFrameTimeout(Duration),
}

/// A pull-based sequence of frames.
///
/// `Ok(None)` marks the end of the sequence; after an `Err` the source is
/// finished and yields `Ok(None)`.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, StreamError>;
}

#[async_trait]
impl<R> FrameSource for FrameReader<R>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, StreamError> {
        FrameReader::next_frame(self).await
    }
}
