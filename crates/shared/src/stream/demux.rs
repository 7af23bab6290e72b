//! Client-side splitting of the chat response body.
//!
//! Every push re-splits the whole accumulated text, so the snapshot never
//! depends on where the transport happened to cut the bytes.

use super::{PROCESSING_MARKER, TOOL_MARKER_PREFIX};

const TOOL_ERROR_PREFIX: &str = "[Tool Error";
const STREAM_ERROR_PREFIX: &str = "[Stream Error";
const RESULT_SUFFIX: &str = " Result]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Processing,
    ToolResult,
    ToolError,
    StreamError,
}

/// Longer prefixes first so `[Tool Error` wins over `[Tool ` at the same offset.
const MARKERS: [(&str, SegmentKind); 4] = [
    (PROCESSING_MARKER, SegmentKind::Processing),
    (STREAM_ERROR_PREFIX, SegmentKind::StreamError),
    (TOOL_ERROR_PREFIX, SegmentKind::ToolError),
    (TOOL_MARKER_PREFIX, SegmentKind::ToolResult),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// The segment including its marker, trimmed.
    pub text: String,
}

impl Segment {
    /// Tool name from a `[Tool <name> Result]` marker.
    pub fn tool_name(&self) -> Option<&str> {
        if self.kind != SegmentKind::ToolResult {
            return None;
        }
        let rest = self.text.strip_prefix(TOOL_MARKER_PREFIX)?;
        let end = rest.find(RESULT_SUFFIX)?;
        Some(&rest[..end])
    }

    /// Text after the marker's `]: `.
    pub fn body(&self) -> &str {
        match self.text.find("]: ") {
            Some(index) => self.text[index + 3..].trim_start(),
            None => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxSnapshot {
    /// Text before the first marker, trimmed.
    pub display_text: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Default)]
pub struct StreamDemultiplexer {
    buffer: Vec<u8>,
    snapshot: DemuxSnapshot,
}

impl StreamDemultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the split of everything received so far.
    ///
    /// A trailing incomplete UTF-8 sequence and a trailing partial marker are
    /// held back until more bytes arrive. Invalid bytes decode as U+FFFD.
    pub fn push(&mut self, chunk: &[u8]) -> &DemuxSnapshot {
        self.buffer.extend_from_slice(chunk);
        let text = String::from_utf8_lossy(&self.buffer[..complete_utf8_len(&self.buffer)]);
        let visible = &text[..text.len() - partial_marker_len(&text)];
        self.snapshot = split(visible);
        &self.snapshot
    }

    /// Final split once the body has ended. Nothing is withheld.
    pub fn finish(&mut self) -> DemuxSnapshot {
        let text = String::from_utf8_lossy(&self.buffer);
        self.snapshot = split(&text);
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> &DemuxSnapshot {
        &self.snapshot
    }

    /// Everything received so far, decoded lossily.
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

pub fn split(text: &str) -> DemuxSnapshot {
    let mut starts = Vec::new();
    let mut cursor = 0;
    while let Some((offset, kind, marker_len)) = next_marker(&text[cursor..]) {
        let start = cursor + offset;
        starts.push((start, kind));
        cursor = start + marker_len;
    }

    let display_end = starts.first().map_or(text.len(), |(start, _)| *start);
    let segments = starts
        .iter()
        .enumerate()
        .map(|(index, (start, kind))| {
            let end = starts.get(index + 1).map_or(text.len(), |(next, _)| *next);
            Segment {
                kind: *kind,
                text: text[*start..end].trim().to_string(),
            }
        })
        .collect();

    DemuxSnapshot {
        display_text: text[..display_end].trim().to_string(),
        segments,
    }
}

fn next_marker(text: &str) -> Option<(usize, SegmentKind, usize)> {
    MARKERS
        .iter()
        .filter_map(|(marker, kind)| text.find(marker).map(|offset| (offset, *kind, marker.len())))
        .min_by_key(|(offset, _, _)| *offset)
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence. Invalid
/// bytes in the middle count as complete.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(err) => match err.error_len() {
                Some(invalid) => start += err.valid_up_to() + invalid,
                None => return start + err.valid_up_to(),
            },
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of a marker.
fn partial_marker_len(text: &str) -> usize {
    let Some(open) = text.rfind('[') else {
        return 0;
    };
    let tail = &text[open..];
    let is_partial = MARKERS
        .iter()
        .any(|(marker, _)| tail.len() < marker.len() && marker.starts_with(tail));
    if is_partial { tail.len() } else { 0 }
}
