//! Line-oriented driver that pulls Singer messages through the mapper.

use std::io::{BufRead, Write};

use tracing::{debug, info};

use crate::embedder::Embedder;
use crate::mapper::{GptEmbeddingMapper, MapperError};
use crate::messages::Message;

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Non-blank input lines parsed.
    pub messages_read: usize,
    /// Input record messages.
    pub records_read: usize,
    /// Output record messages.
    pub records_written: usize,
    /// Output schema messages.
    pub schemas_written: usize,
    /// Messages forwarded untouched.
    pub passed_through: usize,
}

/// Reads messages from `reader`, writing transformed messages to `writer`.
///
/// Every output line is flushed as soon as it is produced; output written
/// before an error stays written.
pub fn run_stream<R, W, E>(
    reader: R,
    writer: &mut W,
    mapper: &GptEmbeddingMapper<E>,
) -> Result<StreamStats, MapperError>
where
    R: BufRead,
    W: Write,
    E: Embedder,
{
    let mut stats = StreamStats::default();
    let result = process_lines(reader, writer, mapper, &mut stats);
    writer.flush()?;
    result?;

    info!(
        messages = stats.messages_read,
        records_in = stats.records_read,
        records_out = stats.records_written,
        schemas = stats.schemas_written,
        passed_through = stats.passed_through,
        "mapping complete"
    );
    Ok(stats)
}

fn process_lines<R, W, E>(
    reader: R,
    writer: &mut W,
    mapper: &GptEmbeddingMapper<E>,
    stats: &mut StreamStats,
) -> Result<(), MapperError>
where
    R: BufRead,
    W: Write,
    E: Embedder,
{
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let message = Message::from_line(&line).map_err(|err| MapperError::Protocol {
            line: line_no + 1,
            reason: err.to_string(),
        })?;
        stats.messages_read += 1;

        match message {
            Message::Schema(schema) => {
                debug!(stream = %schema.stream, "mapping schema");
                let mapped = mapper.map_schema_message(schema);
                emit(writer, &Message::Schema(mapped))?;
                stats.schemas_written += 1;
            }
            Message::Record(record) => {
                stats.records_read += 1;
                for output in mapper.map_record_message(record)? {
                    emit(writer, &Message::Record(output?))?;
                    stats.records_written += 1;
                }
            }
            other => {
                emit(writer, &other)?;
                stats.passed_through += 1;
            }
        }
    }
    Ok(())
}

fn emit<W: Write>(writer: &mut W, message: &Message) -> Result<(), MapperError> {
    message.write_line(writer)?;
    writer.flush()?;
    Ok(())
}
