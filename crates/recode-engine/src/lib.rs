// crates/recode-engine/src/lib.rs

pub mod codec;
pub mod io;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod transcoder;
#[cfg(test)]
mod testutil; // shared fakes, test builds only

pub use pipeline::{PipelineHandle, VideoTrackPipeline};
pub use scheduler::{
    ClientCallback, SessionKey, SessionScheduler, SubmitterPolicy, TranscoderControl,
    OFFLINE_SUBMITTER,
};
pub use transcoder::{TranscodeWorker, TranscoderEvents};
pub use recode_core::{MediaFormat, TranscodeError, TranscodingRequest};
