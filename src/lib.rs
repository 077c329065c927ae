#![warn(missing_docs)]
//! Singer mapper that splits documents into overlapping segments and
//! annotates each segment with an OpenAI embedding.

pub mod about;
pub mod config;
pub mod embedder;
pub mod mapper;
pub mod messages;
pub mod splitter;
pub mod stream;

pub use about::{AboutFormat, AboutInfo};
pub use config::{ConfigError, ConfigSource, MapperConfig, ValidationReport};
pub use embedder::{Embedder, EmbeddingError, EmbeddingVector, OpenAiEmbedder};
pub use mapper::{GptEmbeddingMapper, MapperError, EMBEDDINGS_PROPERTY, SEGMENT_NUMBER_PROPERTY};
pub use messages::{Message, RecordMessage, SchemaMessage};
pub use splitter::{Chunker, RecursiveCharacterSplitter, Segment, SplitterConfig};
pub use stream::{run_stream, StreamStats};
