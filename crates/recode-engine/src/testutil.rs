// crates/recode-engine/src/testutil.rs
//
// Closed-loop fakes shared by the pipeline and transcoder tests. The
// fake codecs behave like the real async ones: start() announces the
// input pool, queued samples produce output events, rendered frames
// travel over the surface into the fake encoder, and the encoder
// answers with encoded outputs (plus a format announcement, twice, to
// exercise first-wins handling downstream).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use recode_core::{BufferInfo, MediaFormat, SampleFlags, SampleInfo, TranscodeError};

use crate::codec::{
    CodecEvents, CodecFactory, InputBuffer, MediaSample, ProducerSurface, VideoCodec,
};
use crate::io::{SampleReader, SampleSink};

// ── Reader ────────────────────────────────────────────────────────────────────

/// Serves a fixed number of samples then end of stream; `endless` never
/// runs out.
pub(crate) struct ScriptedReader {
    samples: Vec<SampleInfo>,
    next: usize,
    pub(crate) endless: bool,
    pub(crate) estimate: Result<i32, TranscodeError>,
    pub(crate) fail_read: bool,
}

impl ScriptedReader {
    pub(crate) fn of(count: usize) -> Box<Self> {
        let samples = (0..count)
            .map(|i| SampleInfo {
                size: 100 + i,
                presentation_time_us: i as i64 * 33_333,
                flags: SampleFlags::NONE,
            })
            .collect();
        Box::new(Self {
            samples,
            next: 0,
            endless: false,
            estimate: Ok(8_000_000),
            fail_read: false,
        })
    }
}

impl SampleReader for ScriptedReader {
    fn estimated_bitrate(&mut self, _track: usize) -> Result<i32, TranscodeError> {
        self.estimate.clone()
    }

    fn sample_info(&mut self, _track: usize) -> Result<Option<SampleInfo>, TranscodeError> {
        if self.endless {
            return Ok(Some(SampleInfo {
                size: 64,
                presentation_time_us: self.next as i64,
                flags: SampleFlags::NONE,
            }));
        }
        Ok(self.samples.get(self.next).copied())
    }

    fn read_sample_data(&mut self, _track: usize, dst: &mut [u8]) -> Result<(), TranscodeError> {
        if self.fail_read {
            return Err(TranscodeError::reader("read past mapped region"));
        }
        dst.fill(0xAB);
        self.next += 1;
        Ok(())
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct CollectingSinkState {
    pub(crate) formats: Vec<MediaFormat>,
    pub(crate) samples: Vec<MediaSample>,
}

#[derive(Clone, Default)]
pub(crate) struct CollectingSink {
    pub(crate) state: Arc<Mutex<CollectingSinkState>>,
}

impl SampleSink for CollectingSink {
    fn on_format_available(&self, format: MediaFormat) {
        self.state.lock().unwrap().formats.push(format);
    }

    fn on_sample(&self, sample: MediaSample) {
        self.state.lock().unwrap().samples.push(sample);
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// What a FakeEncoder hangs on the surface so the decoder can reach it.
struct SurfaceLink {
    encoder: Weak<FakeEncoder>,
}

#[derive(Default)]
pub(crate) struct FakeDecoder {
    state: Mutex<FakeDecoderState>,
    pub(crate) started: AtomicBool,
    pub(crate) stopped: AtomicBool,
}

#[derive(Default)]
struct FakeDecoderState {
    events: Option<Arc<dyn CodecEvents>>,
    configured: Option<MediaFormat>,
    surface: Option<ProducerSurface>,
    // pending output frames keyed by output index
    outputs: Vec<Option<BufferInfo>>,
    next_output: usize,
    buffer_capacity: usize,
}

impl FakeDecoder {
    pub(crate) fn with_capacity(capacity: usize) -> Arc<Self> {
        let d = Arc::new(Self::default());
        d.state.lock().unwrap().buffer_capacity = capacity;
        d
    }

    pub(crate) fn configured(&self) -> MediaFormat {
        self.state.lock().unwrap().configured.clone().unwrap()
    }

    fn events(&self) -> Arc<dyn CodecEvents> {
        self.state.lock().unwrap().events.clone().unwrap()
    }
}

impl VideoCodec for FakeDecoder {
    fn configure(&self, fmt: &MediaFormat) -> Result<(), TranscodeError> {
        self.state.lock().unwrap().configured = Some(fmt.clone());
        Ok(())
    }
    fn set_callback(&self, events: Arc<dyn CodecEvents>) -> Result<(), TranscodeError> {
        self.state.lock().unwrap().events = Some(events);
        Ok(())
    }
    fn start(&self) -> Result<(), TranscodeError> {
        self.started.store(true, Ordering::SeqCst);
        let events = self.events();
        events.on_input_available(0);
        events.on_input_available(1);
        Ok(())
    }
    fn stop(&self) -> Result<(), TranscodeError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn create_input_surface(&self) -> Result<ProducerSurface, TranscodeError> {
        Err(TranscodeError::codec("decoder has no input surface"))
    }
    fn set_output_surface(&self, surface: &ProducerSurface) -> Result<(), TranscodeError> {
        self.state.lock().unwrap().surface = Some(surface.clone());
        Ok(())
    }
    fn take_input_buffer(&self, _index: usize) -> Result<InputBuffer, TranscodeError> {
        let capacity = self.state.lock().unwrap().buffer_capacity;
        Ok(InputBuffer {
            data: vec![0; capacity],
        })
    }
    fn queue_input_buffer(
        &self,
        index: usize,
        _buffer: InputBuffer,
        size: usize,
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), TranscodeError> {
        let info = BufferInfo {
            offset: 0,
            size,
            presentation_time_us,
            flags,
        };
        let (events, out_index) = {
            let mut st = self.state.lock().unwrap();
            let out_index = st.next_output;
            st.next_output += 1;
            if st.outputs.len() <= out_index {
                st.outputs.resize(out_index + 1, None);
            }
            st.outputs[out_index] = Some(info);
            (st.events.clone().unwrap(), out_index)
        };
        // Recycle the input slot unless the stream just ended, then
        // announce the decoded frame.
        if !flags.is_end_of_stream() {
            events.on_input_available(index);
        }
        events.on_output_available(out_index, info);
        Ok(())
    }
    fn output_buffer(&self, _index: usize) -> Result<Arc<[u8]>, TranscodeError> {
        Err(TranscodeError::codec("decoder output is surface-only"))
    }
    fn release_output_buffer(&self, index: usize, render: bool) -> Result<(), TranscodeError> {
        let (info, surface) = {
            let mut st = self.state.lock().unwrap();
            let info = st.outputs.get_mut(index).and_then(Option::take);
            (info, st.surface.clone())
        };
        if render {
            if let (Some(info), Some(surface)) = (info, surface) {
                if let Some(link) = surface.handle().downcast_ref::<SurfaceLink>() {
                    if let Some(encoder) = link.encoder.upgrade() {
                        encoder.frame_rendered(info.presentation_time_us);
                    }
                }
            }
        }
        Ok(())
    }
    fn signal_end_of_input(&self) -> Result<(), TranscodeError> {
        Err(TranscodeError::codec("not an encoder"))
    }
    fn output_format(&self) -> Result<MediaFormat, TranscodeError> {
        Ok(MediaFormat::new())
    }
}

// ── Encoder ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeEncoder {
    state: Mutex<FakeEncoderState>,
    pub(crate) stopped: AtomicBool,
    /// When set, the first encoded output is followed by an error event
    /// instead of more samples.
    pub(crate) error_after_first: AtomicBool,
}

#[derive(Default)]
struct FakeEncoderState {
    events: Option<Arc<dyn CodecEvents>>,
    configured: Option<MediaFormat>,
    self_ref: Option<Weak<FakeEncoder>>,
    format_announced: bool,
    emitted: usize,
    last_pts: i64,
    released: Vec<usize>,
}

impl FakeEncoder {
    pub(crate) fn new() -> Arc<Self> {
        let e = Arc::new(Self::default());
        e.state.lock().unwrap().self_ref = Some(Arc::downgrade(&e));
        e
    }

    pub(crate) fn configured(&self) -> MediaFormat {
        self.state.lock().unwrap().configured.clone().unwrap()
    }

    /// (emitted, released) counters for leak checks.
    pub(crate) fn buffer_accounting(&self) -> (usize, Vec<usize>) {
        let st = self.state.lock().unwrap();
        (st.emitted, st.released.clone())
    }

    fn frame_rendered(&self, pts: i64) {
        let (events, index, announce, fail) = {
            let mut st = self.state.lock().unwrap();
            let announce = !st.format_announced;
            st.format_announced = true;
            let index = st.emitted;
            st.emitted += 1;
            st.last_pts = pts;
            (
                st.events.clone().unwrap(),
                index,
                announce,
                self.error_after_first.load(Ordering::SeqCst) && index == 0,
            )
        };
        if announce {
            let mut fmt = MediaFormat::with_mime("video/hevc");
            fmt.set_str("csd-0", "config");
            events.on_format_changed(fmt.clone());
            // Real codecs can re-announce; only the first may stick.
            fmt.set_str("csd-0", "changed");
            events.on_format_changed(fmt);
        }
        events.on_output_available(
            index,
            BufferInfo {
                offset: 0,
                size: 32,
                presentation_time_us: pts,
                flags: SampleFlags::NONE,
            },
        );
        if fail {
            events.on_error(TranscodeError::codec("encoder wedged"));
        }
    }
}

impl VideoCodec for FakeEncoder {
    fn configure(&self, fmt: &MediaFormat) -> Result<(), TranscodeError> {
        self.state.lock().unwrap().configured = Some(fmt.clone());
        Ok(())
    }
    fn set_callback(&self, events: Arc<dyn CodecEvents>) -> Result<(), TranscodeError> {
        self.state.lock().unwrap().events = Some(events);
        Ok(())
    }
    fn start(&self) -> Result<(), TranscodeError> {
        Ok(())
    }
    fn stop(&self) -> Result<(), TranscodeError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn create_input_surface(&self) -> Result<ProducerSurface, TranscodeError> {
        let weak = self.state.lock().unwrap().self_ref.clone().unwrap();
        Ok(ProducerSurface::new(SurfaceLink { encoder: weak }))
    }
    fn set_output_surface(&self, _surface: &ProducerSurface) -> Result<(), TranscodeError> {
        Err(TranscodeError::codec("not a decoder"))
    }
    fn take_input_buffer(&self, _index: usize) -> Result<InputBuffer, TranscodeError> {
        Err(TranscodeError::codec("encoder input is surface-only"))
    }
    fn queue_input_buffer(
        &self,
        _index: usize,
        _buffer: InputBuffer,
        _size: usize,
        _presentation_time_us: i64,
        _flags: SampleFlags,
    ) -> Result<(), TranscodeError> {
        Err(TranscodeError::codec("encoder input is surface-only"))
    }
    fn output_buffer(&self, _index: usize) -> Result<Arc<[u8]>, TranscodeError> {
        Ok(Arc::from(vec![0x42u8; 32].into_boxed_slice()))
    }
    fn release_output_buffer(&self, index: usize, _render: bool) -> Result<(), TranscodeError> {
        self.state.lock().unwrap().released.push(index);
        Ok(())
    }
    fn signal_end_of_input(&self) -> Result<(), TranscodeError> {
        let (events, index, pts) = {
            let mut st = self.state.lock().unwrap();
            let index = st.emitted;
            st.emitted += 1;
            (st.events.clone().unwrap(), index, st.last_pts)
        };
        events.on_output_available(
            index,
            BufferInfo {
                offset: 0,
                size: 0,
                presentation_time_us: pts,
                flags: SampleFlags::END_OF_STREAM,
            },
        );
        Ok(())
    }
    fn output_format(&self) -> Result<MediaFormat, TranscodeError> {
        Ok(MediaFormat::with_mime("video/hevc"))
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Creates a fresh fake pair per codec request (the transcoder builds a
/// new pipeline on every start and resume) and remembers each instance
/// so tests can poke at it.
pub(crate) struct FakeFactory {
    pub(crate) decoders: Mutex<Vec<Arc<FakeDecoder>>>,
    pub(crate) encoders: Mutex<Vec<Arc<FakeEncoder>>>,
    /// Input buffer size handed out by created decoders.
    pub(crate) decoder_capacity: AtomicUsize,
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self {
            decoders: Mutex::new(Vec::new()),
            encoders: Mutex::new(Vec::new()),
            decoder_capacity: AtomicUsize::new(4096),
        }
    }
}

impl FakeFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recently created decoder.
    pub(crate) fn decoder(&self) -> Arc<FakeDecoder> {
        self.decoders.lock().unwrap().last().unwrap().clone()
    }

    /// The most recently created encoder.
    pub(crate) fn encoder(&self) -> Arc<FakeEncoder> {
        self.encoders.lock().unwrap().last().unwrap().clone()
    }
}

impl CodecFactory for FakeFactory {
    fn create_decoder(&self, mime: &str) -> Result<Arc<dyn VideoCodec>, TranscodeError> {
        if !mime.starts_with("video/") {
            return Err(TranscodeError::Unsupported(mime.to_string()));
        }
        let d = FakeDecoder::with_capacity(self.decoder_capacity.load(Ordering::SeqCst));
        self.decoders.lock().unwrap().push(d.clone());
        Ok(d)
    }

    fn create_encoder(&self, mime: &str) -> Result<Arc<dyn VideoCodec>, TranscodeError> {
        if !mime.starts_with("video/") {
            return Err(TranscodeError::Unsupported(mime.to_string()));
        }
        let e = FakeEncoder::new();
        self.encoders.lock().unwrap().push(e.clone());
        Ok(e)
    }
}
