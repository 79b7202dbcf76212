// crates/recode-core/src/lib.rs

pub mod error;
pub mod format;
pub mod request;
pub mod sample;

pub use error::TranscodeError;
pub use format::MediaFormat;
pub use request::{TranscodingPriority, TranscodingRequest};
pub use sample::{BufferInfo, SampleFlags, SampleInfo};
