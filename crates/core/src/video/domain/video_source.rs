use crate::shared::frame::Frame;
use crate::shared::source_info::SourceInfo;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot open video source {locator}: {reason}")]
    Open { locator: String, reason: String },
    #[error("{0} contains no video stream")]
    NoVideoStream(String),
    #[error("video source is not open")]
    NotOpen,
}

/// Outcome of one read attempt.
#[derive(Debug)]
pub enum FrameRead {
    Frame(Frame),
    /// The source is still open but this read produced nothing usable.
    Retry(String),
    EndOfStream,
}

/// A pull-based live or recorded video source.
///
/// `read` keeps decoder state between calls so the caller controls pacing.
pub trait VideoSource: Send {
    fn open(&mut self) -> Result<SourceInfo, Box<dyn std::error::Error>>;

    fn read(&mut self) -> Result<FrameRead, Box<dyn std::error::Error>>;

    /// Releases the source. Safe to call more than once.
    fn close(&mut self);
}
