//! Schema and record transforms that fan documents out into embedded segments.

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, MapperConfig};
use crate::embedder::{Embedder, EmbeddingError};
use crate::messages::{RecordMessage, SchemaMessage};
use crate::splitter::{Chunker, Segments};

/// Property holding each output record's embedding vector.
pub const EMBEDDINGS_PROPERTY: &str = "embeddings";
/// Property holding each output record's zero-based segment index.
pub const SEGMENT_NUMBER_PROPERTY: &str = "segment_number";

/// Errors that stop a sync.
#[derive(Debug, Error)]
pub enum MapperError {
    /// The embedding provider rate limited the sync.
    #[error("Sync aborted due to OpenAI rate limit reached. Error message:\n{message}")]
    SyncAborted {
        /// Provider error message.
        message: String,
    },
    /// Any other embedding failure.
    #[error(transparent)]
    Embedding(EmbeddingError),
    /// A record could not be split.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// An input line was not a valid Singer message.
    #[error("malformed message on line {line}: {reason}")]
    Protocol {
        /// One-based input line number.
        line: usize,
        /// Parser explanation.
        reason: String,
    },
    /// Settings could not build the mapper.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The message stream could not be read or written.
    #[error("message stream I/O failed")]
    Io(#[from] std::io::Error),
}

impl From<EmbeddingError> for MapperError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::RateLimited { message } => Self::SyncAborted { message },
            other => Self::Embedding(other),
        }
    }
}

/// Splits documents into segments, then vectorizes each segment.
pub struct GptEmbeddingMapper<E> {
    config: MapperConfig,
    chunker: Chunker,
    embedder: E,
}

impl<E: Embedder> GptEmbeddingMapper<E> {
    /// Builds a mapper from settings and an embedding client.
    pub fn new(config: MapperConfig, embedder: E) -> Result<Self, MapperError> {
        let chunker = Chunker::new(config.split_documents, &config.splitter_config)
            .map_err(ConfigError::from)?;
        Ok(Self {
            config,
            chunker,
            embedder,
        })
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Returns the embedding client.
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Adds the `embeddings`, metadata and `segment_number` properties to a schema
    /// and makes `segment_number` part of the key.
    pub fn map_schema_message(&self, mut message: SchemaMessage) -> SchemaMessage {
        let slot = message
            .schema
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(properties) = slot {
            properties.insert(
                EMBEDDINGS_PROPERTY.to_string(),
                json!({"type": ["array"], "items": {"type": ["number"]}}),
            );
            let metadata_property = &self.config.document_metadata_property;
            if !properties.contains_key(metadata_property) {
                properties.insert(
                    metadata_property.clone(),
                    json!({"type": ["object"], "properties": {}}),
                );
            }
            properties.insert(
                SEGMENT_NUMBER_PROPERTY.to_string(),
                json!({"type": ["integer"]}),
            );
        }

        if !message
            .key_properties
            .iter()
            .any(|key| key == SEGMENT_NUMBER_PROPERTY)
        {
            message
                .key_properties
                .push(SEGMENT_NUMBER_PROPERTY.to_string());
        }
        message
    }

    /// Splits one record into zero or more records, one per segment of its text.
    ///
    /// Each record is a copy of the input with the text and metadata
    /// properties replaced by the segment's, plus `segment_number`.
    pub fn split_record(&self, record: Map<String, Value>) -> Result<SplitRecords<'_>, MapperError> {
        let text_property = self.config.document_text_property.as_str();
        let metadata_property = self.config.document_metadata_property.as_str();

        let text = match record.get(text_property) {
            Some(Value::String(text)) => text,
            Some(_) => {
                return Err(MapperError::InvalidRecord(format!(
                    "property `{text_property}` must be a string"
                )))
            }
            None => {
                return Err(MapperError::InvalidRecord(format!(
                    "missing document text property `{text_property}`"
                )))
            }
        };
        let metadata = match record.get(metadata_property) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(metadata)) => metadata.clone(),
            Some(_) => {
                return Err(MapperError::InvalidRecord(format!(
                    "property `{metadata_property}` must be an object"
                )))
            }
        };

        let segments = self.chunker.chunk(text, metadata);
        match segments.len() {
            0 => debug!("Document produced no segments"),
            1 => debug!("Document not split"),
            n => debug!("Document split into {} segments", n),
        }
        Ok(SplitRecords {
            base: record,
            segments,
            text_property,
            metadata_property,
        })
    }

    /// Maps one record message into a lazy sequence of embedded record messages.
    ///
    /// Each segment is embedded only when the next output is requested, so a
    /// caller that writes as it iterates emits every record before the next
    /// embedding call. The sequence ends after the first error.
    pub fn map_record_message(
        &self,
        mut message: RecordMessage,
    ) -> Result<RecordSegments<'_, E>, MapperError> {
        let record = std::mem::take(&mut message.record);
        let records = self.split_record(record)?;
        Ok(RecordSegments {
            mapper: self,
            template: message,
            records,
            failed: false,
        })
    }

    fn embed_record(&self, record: &mut Map<String, Value>) -> Result<(), MapperError> {
        let text = record
            .get(&self.config.document_text_property)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let vector = self.embedder.embed(text)?;
        record.insert(
            EMBEDDINGS_PROPERTY.to_string(),
            Value::Array(vector.into_iter().map(Value::from).collect()),
        );
        Ok(())
    }
}

/// Records cut from one input record, one per segment.
#[derive(Debug)]
pub struct SplitRecords<'m> {
    base: Map<String, Value>,
    segments: Segments,
    text_property: &'m str,
    metadata_property: &'m str,
}

impl Iterator for SplitRecords<'_> {
    type Item = Map<String, Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.segments.next()?;
        let mut record = self.base.clone();
        record.insert(self.text_property.to_string(), Value::String(segment.text));
        record.insert(
            self.metadata_property.to_string(),
            Value::Object(segment.metadata),
        );
        record.insert(
            SEGMENT_NUMBER_PROPERTY.to_string(),
            Value::from(segment.index),
        );
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.segments.size_hint()
    }
}

/// Embedded record messages for one input record, produced one at a time.
pub struct RecordSegments<'m, E> {
    mapper: &'m GptEmbeddingMapper<E>,
    template: RecordMessage,
    records: SplitRecords<'m>,
    failed: bool,
}

impl<E: Embedder> Iterator for RecordSegments<'_, E> {
    type Item = Result<RecordMessage, MapperError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut record = self.records.next()?;
        if let Err(err) = self.mapper.embed_record(&mut record) {
            self.failed = true;
            return Some(Err(err));
        }
        Some(Ok(RecordMessage {
            record,
            ..self.template.clone()
        }))
    }
}
