//! Singer message types exchanged with the upstream tap and downstream target.

use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of the Singer protocol, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Stream shape declaration.
    Schema(SchemaMessage),
    /// One data record.
    Record(RecordMessage),
    /// Opaque bookmark state.
    State(StateMessage),
    /// Table version switch.
    ActivateVersion(ActivateVersionMessage),
    /// Pointer to externally stored records.
    Batch(BatchMessage),
}

impl Message {
    /// Parses one JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Writes the message as a single JSON line.
    pub fn write_line<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        serde_json::to_writer(&mut *writer, self)?;
        writer.write_all(b"\n")
    }
}

/// Declares the properties and keys of a stream's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMessage {
    /// Stream name.
    pub stream: String,
    /// JSON Schema for the stream's records.
    pub schema: Map<String, Value>,
    /// Properties that identify a record.
    #[serde(default)]
    pub key_properties: Vec<String>,
    /// Properties used for incremental bookmarks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark_properties: Option<Vec<String>>,
    /// Any other top-level fields, forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Carries one record of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    /// Stream name.
    pub stream: String,
    /// Record body.
    pub record: Map<String, Value>,
    /// Table version this record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// RFC 3339 extraction timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_extracted: Option<String>,
    /// Any other top-level fields, forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Bookmark state forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Opaque state payload.
    pub value: Value,
}

/// Signals that a new table version is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateVersionMessage {
    /// Stream name.
    pub stream: String,
    /// Activated version.
    pub version: u64,
}

/// References batch files produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMessage {
    /// Stream name.
    pub stream: String,
    /// Encoding, manifest and any other batch fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}
