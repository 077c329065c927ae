//! Embedding clients that turn segment text into vectors.

pub mod openai;

pub use openai::OpenAiEmbedder;

use thiserror::Error;

/// Ordered embedding values for one piece of text.
pub type EmbeddingVector = Vec<f64>;

/// Capability to embed a single text.
pub trait Embedder {
    /// Embeds `text`, issuing exactly one remote request.
    fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        (**self).embed(text)
    }
}

/// Failures surfaced by an embedding request.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider rejected the request because of rate limiting.
    #[error("rate limit reached: {message}")]
    RateLimited {
        /// Provider error message.
        message: String,
    },
    /// The provider answered with a non-success status.
    #[error("embeddings request failed ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The request never produced a response.
    #[error("embeddings request could not be completed")]
    Transport(#[source] reqwest::Error),
    /// The response could not be turned into a vector.
    #[error("failed to decode embeddings response: {0}")]
    Decode(String),
}
