//! Recursive character splitting of documents into overlapping segments.

use std::collections::VecDeque;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Metadata key added to each segment when `add_start_index` is enabled.
pub const START_INDEX_KEY: &str = "start_index";

/// Splitter tuning knobs, read from the `splitter_config` setting.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Maximum segment length in characters.
    pub chunk_size: usize,
    /// Characters of trailing context carried into the next segment.
    pub chunk_overlap: usize,
    /// Separators tried in order, from coarsest to finest.
    pub separators: Vec<String>,
    /// Attach each separator to the start of the piece that follows it.
    pub keep_separator: bool,
    /// Trim leading and trailing whitespace from every segment.
    pub strip_whitespace: bool,
    /// Record each segment's character offset in its metadata.
    pub add_start_index: bool,
    /// Options this splitter does not recognize.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: ["\n\n", "\n", " ", ""].map(String::from).to_vec(),
            keep_separator: true,
            strip_whitespace: true,
            add_start_index: false,
            extra: Map::new(),
        }
    }
}

impl SplitterConfig {
    /// Checks that the size settings describe a splitter that can make progress.
    pub fn check(&self) -> Result<(), SplitterError> {
        if self.chunk_size == 0 {
            return Err(SplitterError::ZeroChunkSize);
        }
        if self.chunk_overlap > self.chunk_size {
            return Err(SplitterError::OverlapTooLarge {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        if self.separators.is_empty() {
            return Err(SplitterError::NoSeparators);
        }
        Ok(())
    }

    /// Names of options present in the config that the splitter ignores.
    pub fn unrecognized_options(&self) -> impl Iterator<Item = &str> {
        self.extra.keys().map(String::as_str)
    }
}

/// Invalid splitter settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitterError {
    /// `chunk_size` was zero.
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    /// `chunk_overlap` exceeded `chunk_size`.
    #[error("chunk_overlap ({overlap}) is larger than chunk_size ({size})")]
    OverlapTooLarge {
        /// Configured overlap.
        overlap: usize,
        /// Configured chunk size.
        size: usize,
    },
    /// The separator list was empty.
    #[error("separators must contain at least one entry")]
    NoSeparators,
}

/// One contiguous, possibly overlapping, slice of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Zero-based position in the document's segment sequence.
    pub index: usize,
    /// Segment text.
    pub text: String,
    /// Document metadata, possibly augmented by the splitter.
    pub metadata: Map<String, Value>,
}

/// Splits text on a ranked list of separators, recursing into pieces that are
/// still too long, then merges the pieces back into overlapping windows.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    config: SplitterConfig,
}

impl RecursiveCharacterSplitter {
    /// Builds a splitter after checking its settings.
    pub fn new(config: SplitterConfig) -> Result<Self, SplitterError> {
        config.check()?;
        Ok(Self { config })
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Splits raw text into segment strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.config.separators)
    }

    /// Splits a document into a lazily consumed sequence of segments.
    pub fn split_document(&self, text: &str, metadata: Map<String, Value>) -> Segments {
        let chunks = self.split_text(text);
        let pieces = if self.config.add_start_index {
            locate_chunks(text, chunks, self.config.chunk_overlap)
        } else {
            chunks.into_iter().map(|chunk| (chunk, None)).collect()
        };
        Segments::new(pieces, metadata)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);
        let splits = split_on(text, separator, self.config.keep_separator);
        let merge_separator = if self.config.keep_separator {
            ""
        } else {
            separator
        };

        let mut chunks = Vec::new();
        let mut short: Vec<String> = Vec::new();
        for piece in splits {
            if char_len(&piece) < self.config.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short, merge_separator));
                short.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge(&short, merge_separator));
        }
        chunks
    }

    fn merge(&self, splits: &[String], separator: &str) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let separator_len = char_len(separator);

        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;
        for piece in splits {
            let len = char_len(piece);
            if total + len + joiner_len(&current, separator_len) > size {
                if total > size {
                    warn!(
                        segment_len = total,
                        chunk_size = size,
                        "created a segment longer than the configured chunk size"
                    );
                }
                if !current.is_empty() {
                    if let Some(doc) = self.join(&current, separator) {
                        docs.push(doc);
                    }
                    while total > overlap
                        || (total + len + joiner_len(&current, separator_len) > size && total > 0)
                    {
                        let dropped_joiner = if current.len() > 1 { separator_len } else { 0 };
                        let Some(first) = current.pop_front() else {
                            break;
                        };
                        total = total.saturating_sub(char_len(first) + dropped_joiner);
                    }
                }
            }
            current.push_back(piece);
            total += len + if current.len() > 1 { separator_len } else { 0 };
        }
        if let Some(doc) = self.join(&current, separator) {
            docs.push(doc);
        }
        docs
    }

    fn join(&self, pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
        let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
        let text = if self.config.strip_whitespace {
            joined.trim().to_string()
        } else {
            joined
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Chooses between splitting documents and passing them through whole.
#[derive(Debug, Clone)]
pub enum Chunker {
    /// Split with a recursive character splitter.
    Split(RecursiveCharacterSplitter),
    /// Emit every document as a single segment.
    Whole,
}

impl Chunker {
    /// Builds the chunker for the `split_documents` flag and splitter settings.
    pub fn new(split_documents: bool, config: &SplitterConfig) -> Result<Self, SplitterError> {
        if split_documents {
            Ok(Self::Split(RecursiveCharacterSplitter::new(config.clone())?))
        } else {
            Ok(Self::Whole)
        }
    }

    /// Produces the segments for one document.
    pub fn chunk(&self, text: &str, metadata: Map<String, Value>) -> Segments {
        match self {
            Self::Split(splitter) => splitter.split_document(text, metadata),
            Self::Whole if text.is_empty() => Segments::new(Vec::new(), metadata),
            Self::Whole => Segments::new(vec![(text.to_string(), None)], metadata),
        }
    }
}

/// Ordered, single-pass sequence of segments cut from one document.
#[derive(Debug)]
pub struct Segments {
    pieces: std::vec::IntoIter<(String, Option<i64>)>,
    metadata: Map<String, Value>,
    next_index: usize,
}

impl Segments {
    fn new(pieces: Vec<(String, Option<i64>)>, metadata: Map<String, Value>) -> Self {
        Self {
            pieces: pieces.into_iter(),
            metadata,
            next_index: 0,
        }
    }
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Self::Item> {
        let (text, start) = self.pieces.next()?;
        let mut metadata = self.metadata.clone();
        if let Some(start) = start {
            metadata.insert(START_INDEX_KEY.to_string(), Value::from(start));
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(Segment {
            index,
            text,
            metadata,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pieces.size_hint()
    }
}

impl ExactSizeIterator for Segments {}

fn pick_separator<'s>(text: &str, separators: &'s [String]) -> (&'s str, &'s [String]) {
    for (idx, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return ("", &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator, &separators[idx + 1..]);
        }
    }
    let last = separators.last().map(String::as_str).unwrap_or("");
    (last, &[])
}

fn split_on(text: &str, separator: &str, keep_separator: bool) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut pieces = Vec::new();
    if keep_separator {
        if let Some(first) = parts.next() {
            pieces.push(first.to_string());
        }
        pieces.extend(parts.map(|part| format!("{separator}{part}")));
    } else {
        pieces.extend(parts.map(str::to_string));
    }
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Pairs each chunk with its character offset in `text`, searching forward
/// from where the previous chunk's overlap could begin.
///
/// A chunk that cannot be found (e.g. after whitespace stripping changed it)
/// gets offset `-1`, and the next search restarts from that position.
fn locate_chunks(text: &str, chunks: Vec<String>, overlap: usize) -> Vec<(String, Option<i64>)> {
    let mut located = Vec::with_capacity(chunks.len());
    let mut index = 0i64;
    let mut previous_len = 0i64;
    for chunk in chunks {
        let offset = index + previous_len - overlap as i64;
        let from = usize::try_from(offset).unwrap_or(0);
        index = find_from(text, &chunk, from).map_or(-1, |start| start as i64);
        previous_len = char_len(&chunk) as i64;
        located.push((chunk, Some(index)));
    }
    located
}

fn find_from(haystack: &str, needle: &str, char_offset: usize) -> Option<usize> {
    let byte_start = haystack
        .char_indices()
        .nth(char_offset)
        .map(|(byte, _)| byte)
        .unwrap_or(haystack.len());
    let tail = &haystack[byte_start..];
    tail.find(needle)
        .map(|found| char_offset + tail[..found].chars().count())
}

fn joiner_len(current: &VecDeque<&str>, separator_len: usize) -> usize {
    if current.is_empty() {
        0
    } else {
        separator_len
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
