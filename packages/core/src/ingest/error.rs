//! Error types for the ingestion pipeline
//!
//! Every variant is recovered locally: the pipeline logs it, counts it in
//! the cycle report and moves on to the next source, candidate or
//! subscriber.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// A source client could not produce candidates this cycle.
    #[error("Source unavailable ({provider}): {message}")]
    SourceUnavailable { provider: String, message: String },

    /// The AI classifier failed for one candidate.
    #[error("Classification unavailable: {message}")]
    ClassificationUnavailable { message: String },

    /// A store write failed for one candidate.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A notification could not be delivered to one subscriber.
    #[error("Delivery to {recipient} failed: {message}")]
    Delivery { recipient: String, message: String },
}

impl IngestError {
    pub fn source_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn classification_unavailable(message: impl Into<String>) -> Self {
        Self::ClassificationUnavailable {
            message: message.into(),
        }
    }

    pub fn delivery(recipient: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            recipient: recipient.into(),
            message: message.into(),
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
