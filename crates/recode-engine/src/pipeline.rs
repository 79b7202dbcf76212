// crates/recode-engine/src/pipeline.rs
//
// VideoTrackPipeline: transcode one video track end to end.
//
// Design:
//   • Two async codecs (decoder, encoder) joined by a producer surface.
//     The decoder renders frames onto the surface; the encoder consumes
//     them without a software copy.
//   • Codec callbacks arrive on arbitrary threads. Every callback is
//     reified into a boxed closure and pushed onto a serialized message
//     queue; run() pops and executes them on one thread. Callbacks
//     never touch pipeline state directly.
//   • Error events are pushed to the FRONT of the queue so they cut
//     ahead of buffered work and stop the pipeline promptly.
//   • The first recorded error wins. run() exits on stop request,
//     encoder end-of-stream, or a recorded error, then aborts the queue
//     and stops the decoder.
//
// Ownership:
//   The decoder is owned by the pipeline and dies with it. The encoder
//   sits behind an Arc<CodecHolder> shared with every MediaSample still
//   held by the sink; it is stopped when the last reference drops.

use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use recode_core::{format, BufferInfo, MediaFormat, SampleFlags, TranscodeError};

use crate::codec::{CodecEvents, CodecFactory, CodecHolder, MediaSample, VideoCodec};
use crate::io::{SampleReader, SampleSink};
use crate::queue::MessageQueue;

/// Bitrate used when the destination format has none and the reader
/// cannot estimate one.
const FALLBACK_BITRATE: i32 = 10_000_000;

/// Key-frame interval used when the destination format has none.
const DEFAULT_I_FRAME_INTERVAL: f32 = 1.0;

type Job = Box<dyn FnOnce(&mut PipelineInner) + Send>;

// ── Public surface ────────────────────────────────────────────────────────────

pub struct VideoTrackPipeline {
    queue: Arc<MessageQueue<Job>>,
    inner: PipelineInner,
}

impl std::fmt::Debug for VideoTrackPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoTrackPipeline").finish_non_exhaustive()
    }
}

/// Cheap cloneable handle for requesting a stop from any thread. Holds
/// the queue weakly: aborting an already-gone pipeline is a no-op.
#[derive(Clone)]
pub struct PipelineHandle {
    queue: Weak<MessageQueue<Job>>,
}

impl PipelineHandle {
    /// Request a stop. The stop closure jumps the queue, so the run
    /// loop exits at its next dequeue. Safe to call repeatedly.
    pub fn abort(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.push_front(Box::new(|p: &mut PipelineInner| {
                p.stop_requested = true;
            }));
        }
    }
}

impl VideoTrackPipeline {
    /// Build and configure the decode → surface → encode chain.
    ///
    /// Fails with InvalidArgument when either format lacks a MIME type,
    /// Unsupported when the factory has no codec for one, and
    /// propagates codec configuration failures.
    pub fn new(
        source_format: MediaFormat,
        dest_format: MediaFormat,
        track: usize,
        mut reader: Box<dyn SampleReader>,
        sink: Box<dyn SampleSink>,
        factory: &dyn CodecFactory,
    ) -> Result<Self, TranscodeError> {
        let src_mime = source_format
            .mime()
            .ok_or_else(|| TranscodeError::invalid("source format has no mime type"))?
            .to_string();
        let dst_mime = dest_format
            .mime()
            .ok_or_else(|| TranscodeError::invalid("destination format has no mime type"))?
            .to_string();

        // ── Destination defaults ──────────────────────────────────────────────
        let mut encoder_format = dest_format;

        if !encoder_format.contains(format::BITRATE) {
            let bitrate = match reader.estimated_bitrate(track) {
                Ok(b) if b > 0 => b,
                Ok(_) | Err(_) => {
                    debug!("[pipeline] no bitrate estimate, using {FALLBACK_BITRATE}");
                    FALLBACK_BITRATE
                }
            };
            encoder_format.set_i32(format::BITRATE, bitrate);
        }
        if !encoder_format.contains(format::I_FRAME_INTERVAL) {
            encoder_format.set_f32(format::I_FRAME_INTERVAL, DEFAULT_I_FRAME_INTERVAL);
        }
        // The encoder reads its input from the surface, and rotation is
        // container metadata: it rides on the published track format,
        // never through the encoder.
        encoder_format.set_i32(format::COLOR_FORMAT, format::COLOR_FORMAT_SURFACE);
        encoder_format.set_i32(format::ROTATION, 0);

        // ── Encoder, then its input surface ───────────────────────────────────
        let encoder = factory.create_encoder(&dst_mime)?;
        encoder.configure(&encoder_format)?;
        let surface = encoder.create_input_surface()?;

        // ── Decoder, rendering onto the encoder's surface ─────────────────────
        let mut decoder_format = source_format.clone();
        // Both codecs share the same throughput goals.
        decoder_format.copy_from(&encoder_format, format::OPERATING_RATE);
        decoder_format.copy_from(&encoder_format, format::PRIORITY);
        // Do not overwrite frames the encoder has not yet consumed.
        decoder_format.set_i32(format::ALLOW_FRAME_DROP, 0);

        let decoder = factory.create_decoder(&src_mime)?;
        decoder.configure(&decoder_format)?;
        decoder.set_output_surface(&surface)?;

        // ── Callback → queue indirection ──────────────────────────────────────
        let queue = Arc::new(MessageQueue::new());
        decoder.set_callback(Arc::new(CallbackAdapter {
            queue: Arc::downgrade(&queue),
            role: Role::Decoder,
        }))?;
        encoder.set_callback(Arc::new(CallbackAdapter {
            queue: Arc::downgrade(&queue),
            role: Role::Encoder,
        }))?;

        Ok(Self {
            queue,
            inner: PipelineInner {
                track,
                reader,
                sink,
                decoder,
                encoder: CodecHolder::new(encoder),
                source_format,
                actual_format: None,
                stop_requested: false,
                eos_from_source: false,
                eos_from_encoder: false,
                status: None,
            },
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            queue: Arc::downgrade(&self.queue),
        }
    }

    /// Run until the encoder reaches end of stream, an error is
    /// recorded, or a stop is requested. Blocking; meant for a
    /// dedicated thread.
    pub fn run(&mut self) -> Result<(), TranscodeError> {
        info!("[pipeline] track {}: starting", self.inner.track);

        // Queued rather than called inline so an abort that raced ahead
        // of us cancels the codec starts too.
        self.queue
            .push(Box::new(|p: &mut PipelineInner| p.start_decoder()));
        self.queue
            .push(Box::new(|p: &mut PipelineInner| p.start_encoder()));

        while !self.inner.finished() {
            let job = self.queue.pop();
            job(&mut self.inner);
        }

        // No callback enqueues anything past this point, and the run
        // loop is the only popper, so aborting here honors the queue's
        // no-abort-during-pop contract.
        self.queue.abort();
        if let Err(e) = self.inner.decoder.stop() {
            warn!("[pipeline] decoder stop failed: {e}");
        }

        match self.inner.status.take() {
            Some(err) => {
                error!("[pipeline] track {}: failed: {err}", self.inner.track);
                Err(err)
            }
            None if self.inner.stop_requested && !self.inner.eos_from_encoder => {
                info!("[pipeline] track {}: cancelled", self.inner.track);
                Err(TranscodeError::Cancelled)
            }
            None => {
                info!("[pipeline] track {}: finished", self.inner.track);
                Ok(())
            }
        }
    }
}

// ── Callback adapter ──────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Role {
    Decoder,
    Encoder,
}

/// Registered on both codecs. Each event becomes a closure on the
/// message queue; if the pipeline is already gone the weak upgrade
/// fails and the event is dropped.
struct CallbackAdapter {
    queue: Weak<MessageQueue<Job>>,
    role: Role,
}

impl CallbackAdapter {
    fn post(&self, job: Job) {
        if let Some(queue) = self.queue.upgrade() {
            queue.push(job);
        }
    }
}

impl CodecEvents for CallbackAdapter {
    fn on_input_available(&self, index: usize) {
        match self.role {
            Role::Decoder => {
                self.post(Box::new(move |p| p.decoder_input_available(index)));
            }
            // The encoder is fed by the surface; its input pool is not
            // client-facing in this configuration.
            Role::Encoder => {}
        }
    }

    fn on_output_available(&self, index: usize, info: BufferInfo) {
        match self.role {
            Role::Decoder => {
                self.post(Box::new(move |p| p.decoder_output_available(index, info)));
            }
            Role::Encoder => {
                self.post(Box::new(move |p| p.encoder_output_available(index, info)));
            }
        }
    }

    fn on_format_changed(&self, new_format: MediaFormat) {
        match self.role {
            // Decoder format changes only affect the surface path.
            Role::Decoder => {
                debug!("[pipeline] decoder format changed: {new_format}");
            }
            Role::Encoder => {
                self.post(Box::new(move |p| p.encoder_format_changed(new_format)));
            }
        }
    }

    fn on_error(&self, err: TranscodeError) {
        // Jump the queue: no more samples should be produced once a
        // codec has failed.
        if let Some(queue) = self.queue.upgrade() {
            queue.push_front(Box::new(move |p: &mut PipelineInner| p.record_error(err)));
        }
    }
}

// ── Serialized pipeline state ─────────────────────────────────────────────────

struct PipelineInner {
    track: usize,
    reader: Box<dyn SampleReader>,
    sink: Box<dyn SampleSink>,
    decoder: Arc<dyn VideoCodec>,
    encoder: Arc<CodecHolder>,
    source_format: MediaFormat,
    actual_format: Option<MediaFormat>,
    stop_requested: bool,
    eos_from_source: bool,
    eos_from_encoder: bool,
    status: Option<TranscodeError>,
}

impl PipelineInner {
    fn finished(&self) -> bool {
        self.stop_requested || self.eos_from_encoder || self.status.is_some()
    }

    /// First error wins; later ones only get logged.
    fn record_error(&mut self, err: TranscodeError) {
        if self.status.is_none() {
            self.status = Some(err);
        } else {
            debug!("[pipeline] suppressing follow-up error: {err}");
        }
    }

    fn start_decoder(&mut self) {
        if let Err(e) = self.decoder.start() {
            self.record_error(e);
        }
    }

    fn start_encoder(&mut self) {
        if let Err(e) = self.encoder.codec().start() {
            self.record_error(e);
        }
    }

    /// The decoder can accept another compressed sample.
    fn decoder_input_available(&mut self, index: usize) {
        if self.eos_from_source {
            return;
        }

        let info = match self.reader.sample_info(self.track) {
            Ok(info) => info,
            Err(e) => return self.record_error(e),
        };

        let Some(info) = info else {
            // Source exhausted: push an empty end-of-stream buffer
            // through so the decoder drains and flags its own EOS.
            self.eos_from_source = true;
            match self.decoder.take_input_buffer(index) {
                Ok(buffer) => {
                    if let Err(e) = self.decoder.queue_input_buffer(
                        index,
                        buffer,
                        0,
                        0,
                        SampleFlags::END_OF_STREAM,
                    ) {
                        self.record_error(e);
                    }
                }
                Err(e) => self.record_error(e),
            }
            return;
        };

        let mut buffer = match self.decoder.take_input_buffer(index) {
            Ok(b) => b,
            Err(e) => return self.record_error(e),
        };
        if buffer.data.len() < info.size {
            return self.record_error(TranscodeError::invalid(format!(
                "sample of {} bytes exceeds codec buffer of {}",
                info.size,
                buffer.data.len()
            )));
        }
        if let Err(e) = self
            .reader
            .read_sample_data(self.track, &mut buffer.data[..info.size])
        {
            return self.record_error(e);
        }
        if let Err(e) = self.decoder.queue_input_buffer(
            index,
            buffer,
            info.size,
            info.presentation_time_us,
            info.flags,
        ) {
            self.record_error(e);
        }
    }

    /// A decoded frame is ready: render it across the surface, or just
    /// drop the buffer when it carries no payload. EOS here means the
    /// decoder has drained; tell the encoder to flush.
    fn decoder_output_available(&mut self, index: usize, info: BufferInfo) {
        let render = info.size > 0;
        if let Err(e) = self.decoder.release_output_buffer(index, render) {
            return self.record_error(e);
        }
        if info.flags.is_end_of_stream() {
            if let Err(e) = self.encoder.codec().signal_end_of_input() {
                self.record_error(e);
            }
        }
    }

    /// An encoded sample is ready: wrap it with the encoder's holder so
    /// the release path outlives this pipeline, and hand it to the sink.
    fn encoder_output_available(&mut self, index: usize, info: BufferInfo) {
        let data = match self.encoder.codec().output_buffer(index) {
            Ok(d) => d,
            Err(e) => return self.record_error(e),
        };
        let sample = MediaSample::new(Arc::clone(&self.encoder), index, info, data);
        self.sink.on_sample(sample);
        if info.flags.is_end_of_stream() {
            self.eos_from_encoder = true;
        }
    }

    /// First format change wins: publish the encoder's format (it
    /// carries the CSD the muxer needs) overlaid with container-level
    /// geometry and timing from the source.
    fn encoder_format_changed(&mut self, encoder_format: MediaFormat) {
        if self.actual_format.is_some() {
            return;
        }
        let mut actual = encoder_format;
        overlay_positive_i32(&mut actual, &self.source_format, format::SAR_WIDTH);
        overlay_positive_i32(&mut actual, &self.source_format, format::SAR_HEIGHT);
        overlay_positive_i32(&mut actual, &self.source_format, format::DISPLAY_WIDTH);
        overlay_positive_i32(&mut actual, &self.source_format, format::DISPLAY_HEIGHT);
        if let Some(rotation) = self.source_format.get_i32(format::ROTATION) {
            if rotation != 0 {
                actual.set_i32(format::ROTATION, rotation);
            }
        }
        if let Some(duration) = self.source_format.get_i64(format::DURATION_US) {
            if duration > 0 {
                actual.set_i64(format::DURATION_US, duration);
            }
        }

        info!("[pipeline] track {}: output format {actual}", self.track);
        self.actual_format = Some(actual.clone());
        self.sink.on_format_available(actual);
    }
}

fn overlay_positive_i32(dst: &mut MediaFormat, src: &MediaFormat, key: &str) {
    if let Some(v) = src.get_i32(key) {
        if v > 0 {
            dst.set_i32(key, v);
        }
    }
}
