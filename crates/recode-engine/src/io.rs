// crates/recode-engine/src/io.rs
//
// Reader and sink seams. The demuxer that produces compressed samples
// and the muxer that consumes encoded ones live outside this crate.

use std::path::Path;

use recode_core::{MediaFormat, SampleInfo, TranscodeError};

use crate::codec::MediaSample;

/// Produces compressed samples for one selected track.
pub trait SampleReader: Send {
    /// Container-level bitrate estimate for the track, when the source
    /// carries one.
    fn estimated_bitrate(&mut self, track: usize) -> Result<i32, TranscodeError>;

    /// Metadata for the next sample. `Ok(None)` means the track is
    /// exhausted; that is the normal termination signal, not an error.
    fn sample_info(&mut self, track: usize) -> Result<Option<SampleInfo>, TranscodeError>;

    /// Copy the current sample's payload into `dst`. `dst` is exactly
    /// the size announced by the preceding sample_info call.
    fn read_sample_data(&mut self, track: usize, dst: &mut [u8]) -> Result<(), TranscodeError>;
}

/// Consumes the pipeline's output in encoder order. The sink must drop
/// each sample exactly once when it is done with it; holding samples is
/// allowed and keeps the encoder alive.
pub trait SampleSink: Send + Sync {
    /// Called once, after the encoder's first format change, with the
    /// composite track format the muxer should be initialized with.
    fn on_format_available(&self, format: MediaFormat);

    fn on_sample(&self, sample: MediaSample);
}

/// Opens readers and sinks for the transcoder worker. Injected so the
/// engine can be driven entirely by fakes in tests.
pub trait MediaIoFactory: Send + Sync {
    fn open_reader(&self, source: &Path) -> Result<Box<dyn SampleReader>, TranscodeError>;
    fn open_sink(&self, dest: &Path) -> Result<Box<dyn SampleSink>, TranscodeError>;
}
