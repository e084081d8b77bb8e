//! Line-delimited reference dump reading.

mod reader;
mod record;

pub use reader::{DumpLine, DumpReader, StreamPosition};
pub use record::{DumpParseError, DumpRecord, KeyRef, RecordPayload, RecordType};
