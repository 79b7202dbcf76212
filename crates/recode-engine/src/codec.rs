// crates/recode-engine/src/codec.rs
//
// The codec collaborator surface. The real hardware bindings live
// outside this crate; the pipeline drives them through VideoCodec and
// receives events through CodecEvents from whatever threads the
// implementation uses.
//
// Buffer ownership:
//   InputBuffer:   lent by take_input_buffer, returned by
//                   queue_input_buffer. Owning the value IS holding the
//                   buffer; there is no double-queue to guard against.
//   MediaSample:   wraps one output buffer. Dropping it releases the
//                   buffer back to its codec, exactly once.
//   CodecHolder:   shared owner of a codec. The pipeline holds one
//                   reference and every outstanding MediaSample holds
//                   another; the codec is stopped when the last drops.

use std::any::Any;
use std::sync::Arc;

use log::warn;
use recode_core::{BufferInfo, MediaFormat, SampleFlags, TranscodeError};

// ── Events ────────────────────────────────────────────────────────────────────

/// Async callback set a codec delivers from arbitrary threads. One
/// adapter is registered per codec; implementations must not run
/// pipeline logic inline, only hand the event off.
pub trait CodecEvents: Send + Sync {
    fn on_input_available(&self, index: usize);
    fn on_output_available(&self, index: usize, info: BufferInfo);
    fn on_format_changed(&self, format: MediaFormat);
    fn on_error(&self, error: TranscodeError);
}

// ── Buffers and surfaces ──────────────────────────────────────────────────────

/// A writable buffer lent out of a codec's input pool.
pub struct InputBuffer {
    pub data: Vec<u8>,
}

/// Opaque buffer-queue endpoint. A decoder renders into it, the linked
/// encoder consumes from it, no software copy in between. The engine
/// never looks inside; implementations downcast the handle.
#[derive(Clone)]
pub struct ProducerSurface {
    handle: Arc<dyn Any + Send + Sync>,
}

impl ProducerSurface {
    pub fn new(handle: impl Any + Send + Sync) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    pub fn handle(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.handle
    }
}

// ── The codec itself ──────────────────────────────────────────────────────────

/// One asynchronous video codec instance. Implementations are assumed
/// thread-safe: the run thread and the sample-release path may call in
/// concurrently.
pub trait VideoCodec: Send + Sync {
    fn configure(&self, format: &MediaFormat) -> Result<(), TranscodeError>;

    fn set_callback(&self, events: Arc<dyn CodecEvents>) -> Result<(), TranscodeError>;

    fn start(&self) -> Result<(), TranscodeError>;

    fn stop(&self) -> Result<(), TranscodeError>;

    /// Encoder only: open the producer surface that feeds this codec's
    /// input.
    fn create_input_surface(&self) -> Result<ProducerSurface, TranscodeError>;

    /// Decoder only: render output frames onto `surface` instead of
    /// returning them through client buffers.
    fn set_output_surface(&self, surface: &ProducerSurface) -> Result<(), TranscodeError>;

    /// Take ownership of the writable input buffer at `index`,
    /// previously announced by on_input_available.
    fn take_input_buffer(&self, index: usize) -> Result<InputBuffer, TranscodeError>;

    /// Return a lent input buffer with `size` valid bytes.
    fn queue_input_buffer(
        &self,
        index: usize,
        buffer: InputBuffer,
        size: usize,
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), TranscodeError>;

    /// Shared view of the payload of the output buffer at `index`.
    fn output_buffer(&self, index: usize) -> Result<Arc<[u8]>, TranscodeError>;

    /// Give the output buffer at `index` back. `render` pushes the
    /// frame across the output surface on the way out.
    fn release_output_buffer(&self, index: usize, render: bool) -> Result<(), TranscodeError>;

    /// Encoder only: flush after the input side reached end of stream.
    fn signal_end_of_input(&self) -> Result<(), TranscodeError>;

    fn output_format(&self) -> Result<MediaFormat, TranscodeError>;
}

pub trait CodecFactory: Send + Sync {
    fn create_decoder(&self, mime: &str) -> Result<Arc<dyn VideoCodec>, TranscodeError>;
    fn create_encoder(&self, mime: &str) -> Result<Arc<dyn VideoCodec>, TranscodeError>;
}

// ── Shared codec ownership ────────────────────────────────────────────────────

/// Keeps a codec alive past the pipeline's own lifetime. Output samples
/// handed to the sink hold a clone of the `Arc<CodecHolder>`, so their
/// release path stays valid; the codec is stopped when the last owner,
/// pipeline or sample, goes away.
pub struct CodecHolder {
    codec: Arc<dyn VideoCodec>,
}

impl CodecHolder {
    pub fn new(codec: Arc<dyn VideoCodec>) -> Arc<Self> {
        Arc::new(Self { codec })
    }

    pub fn codec(&self) -> &dyn VideoCodec {
        self.codec.as_ref()
    }
}

impl Drop for CodecHolder {
    fn drop(&mut self) {
        if let Err(e) = self.codec.stop() {
            warn!("[codec] stop on release failed: {e}");
        }
    }
}

// ── Output samples ────────────────────────────────────────────────────────────

/// One encoded sample on its way to the sink. Carries the payload view,
/// the buffer descriptor, and a shared reference to the codec that owns
/// the buffer. Dropping the sample releases the buffer.
pub struct MediaSample {
    holder: Arc<CodecHolder>,
    index: usize,
    info: BufferInfo,
    data: Arc<[u8]>,
}

impl MediaSample {
    pub(crate) fn new(
        holder: Arc<CodecHolder>,
        index: usize,
        info: BufferInfo,
        data: Arc<[u8]>,
    ) -> Self {
        Self {
            holder,
            index,
            info,
            data,
        }
    }

    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    /// The valid bytes of this sample: `info.offset` for `info.size`
    /// bytes out of the codec buffer, clamped to the buffer length.
    pub fn payload(&self) -> &[u8] {
        let start = self.info.offset.min(self.data.len());
        let end = (self.info.offset + self.info.size).min(self.data.len());
        &self.data[start..end]
    }
}

impl Drop for MediaSample {
    fn drop(&mut self) {
        if let Err(e) = self
            .holder
            .codec()
            .release_output_buffer(self.index, false)
        {
            warn!("[codec] output buffer {} release failed: {e}", self.index);
        }
    }
}
