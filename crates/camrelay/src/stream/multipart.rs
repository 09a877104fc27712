//! `multipart/x-mixed-replace` framing for browser MJPEG playback.
//!
//! An `<img src="/api/video">` element renders each part as it arrives and
//! replaces the previous one.

use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};

use super::{FrameSource, StreamError, VideoFrame};

/// Boundary advertised in the content type and written before every part.
pub const BOUNDARY: &str = "frame";

#[derive(Debug, Clone)]
pub struct MultipartStreamer {
    boundary: String,
}

impl Default for MultipartStreamer {
    fn default() -> Self {
        Self::new(BOUNDARY)
    }
}

impl MultipartStreamer {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value of the response `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace; boundary={}", self.boundary)
    }

    /// `--<boundary>\r\nContent-Type: image/jpeg\r\n\r\n<frame>\r\n`
    pub fn encode_part(&self, frame: &VideoFrame) -> Bytes {
        let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", self.boundary);
        let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
        part.extend_from_slice(header.as_bytes());
        part.extend_from_slice(frame.as_bytes());
        part.extend_from_slice(b"\r\n");
        part.freeze()
    }

    /// Lazily encode `first` followed by every frame pulled from `source`.
    ///
    /// The stream ends with the source and stops after the first error.
    /// Dropping it drops the source.
    pub fn stream<S>(
        &self,
        first: Option<VideoFrame>,
        source: S,
    ) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static
    where
        S: FrameSource + 'static,
    {
        let head = {
            let streamer = self.clone();
            stream::iter(first.map(move |frame| Ok(streamer.encode_part(&frame))))
        };

        let streamer = self.clone();
        let tail = stream::try_unfold(source, move |mut source| {
            let streamer = streamer.clone();
            async move {
                let next = source.next_frame().await?;
                Ok::<_, StreamError>(next.map(|frame| (streamer.encode_part(&frame), source)))
            }
        });

        head.chain(tail)
            .inspect_err(|e| log::error!("[STREAM] relay stopped: {}", e))
    }

    /// Streaming HTTP response over `source`.
    pub fn into_response<S>(&self, first: Option<VideoFrame>, source: S) -> Response
    where
        S: FrameSource + 'static,
    {
        let body = Body::from_stream(self.stream(first, source));
        (
            [
                (header::CONTENT_TYPE, self.content_type()),
                (
                    header::CACHE_CONTROL,
                    "no-cache, no-store, must-revalidate".to_string(),
                ),
                (header::PRAGMA, "no-cache".to_string()),
            ],
            body,
        )
            .into_response()
    }
}
