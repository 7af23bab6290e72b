//! In-band framing for the chat response body.
//!
//! Generated text and tool results share one unframed text stream. Tool
//! results are introduced by literal markers, always preceded by a blank line:
//!
//! ```text
//! <generated text>
//!
//! [Processing tools...]
//!
//! [Tool getTotalInvoices Result]: <rendered result>
//!
//! [Tool Error]: <message>
//! ```
//!
//! The marker text is not escaped, so generated text that happens to contain
//! a marker is indistinguishable from a real frame.

pub mod demux;
pub mod mux;
pub mod render;

pub use demux::{DemuxSnapshot, Segment, SegmentKind, StreamDemultiplexer};
pub use mux::{MuxReport, NoopObserver, PhaseObserver, StreamMultiplexer};

pub const FRAME_SEPARATOR: &str = "\n\n";
pub const PROCESSING_MARKER: &str = "[Processing tools...]";
pub const TOOL_MARKER_PREFIX: &str = "[Tool ";
pub const TOOL_ERROR_MARKER: &str = "[Tool Error]: ";
pub const STREAM_ERROR_MARKER: &str = "[Stream Error]: ";

pub fn tool_result_marker(tool_name: &str) -> String {
    format!("{TOOL_MARKER_PREFIX}{tool_name} Result]: ")
}
