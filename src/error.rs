//! Error kinds surfaced by the handlers.
//!
//! Backend clients return `anyhow::Result`; the pipelines fold those into
//! [`HandlerError::Backend`]. Each variant knows its HTTP-style status so the
//! handlers can turn any failure into a response envelope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// No usable `question` in any recognized event shape.
    #[error("Could not find 'question' in the request")]
    MissingQuestion,

    /// Neither a storage notification nor an invocation with a body.
    #[error("Invalid event format - missing required fields")]
    InvalidEvent,

    /// Malformed base64, undecodable bytes or unparseable JSON in the body.
    #[error("{0}")]
    InvalidBody(String),

    /// Every shape was tried and no file content came out.
    #[error("{0}")]
    NoFileData(String),

    /// A stored object is not valid UTF-8.
    #[error("object is not valid UTF-8: {0}")]
    Decode(String),

    /// The index accepted the batch call but rejected documents inside it.
    #[error("Failed to upload documents to Kendra: {0}")]
    PartialIndexFailure(String),

    /// Any error returned by an external service client.
    #[error("{0:#}")]
    Backend(#[from] anyhow::Error),
}

impl HandlerError {
    /// 400 for problems with the caller's input, 500 for everything else.
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::MissingQuestion
            | HandlerError::InvalidEvent
            | HandlerError::InvalidBody(_)
            | HandlerError::NoFileData(_) => 400,
            HandlerError::Decode(_)
            | HandlerError::PartialIndexFailure(_)
            | HandlerError::Backend(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;
