//! Delta batch metadata.
//!
//! A delta batch is the output of one write id range: a directory (or one
//! directory per statement) of bucket files. The compact binary form of its
//! metadata travels with read splits and is persisted by the compactor next
//! to the directories it produces.

pub mod descriptor;
pub mod file_record;

pub use descriptor::DeltaBatchDescriptor;
pub use file_record::{DeltaFileRecord, FileId, SyntheticFileId};
