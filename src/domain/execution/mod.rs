//! Runtime values and execution status types.

mod segment;
mod status;

pub use segment::{FileAttribute, FileSegment, FileTransferMethod, FileType, Segment, FILE_MODEL_IDENTITY};
pub use status::ExecutionStatus;
