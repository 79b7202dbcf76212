// crates/recode-engine/src/transcoder.rs
//
// TranscodeWorker: the TranscoderControl implementation that actually
// drives pipelines. Owns a command-loop thread fed by a channel; each
// start spawns a pipeline run thread, pause/stop abort it. Commands
// are sent from under the scheduler lock, so the channel is unbounded:
// a send must never block there.
//
// Pause semantics: the pipeline is aborted and its completion event
// silenced, but the request is retained by the scheduler; resume builds
// a fresh pipeline from it. Stop aborts and forgets.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use recode_core::{format, MediaFormat, TranscodeError, TranscodingRequest};

use crate::codec::{CodecFactory, MediaSample};
use crate::io::{MediaIoFactory, SampleSink};
use crate::pipeline::{PipelineHandle, VideoTrackPipeline};
use crate::scheduler::{SessionKey, SessionScheduler, TranscoderControl};

/// Lifecycle events the worker reports back, normally to the scheduler.
pub trait TranscoderEvents: Send + Sync {
    fn on_started(&self, key: SessionKey);
    fn on_paused(&self, key: SessionKey);
    fn on_resumed(&self, key: SessionKey);
    fn on_finished(&self, key: SessionKey);
    fn on_failed(&self, key: SessionKey, error: TranscodeError);
    fn on_progress(&self, key: SessionKey, progress: u32);
}

impl TranscoderEvents for SessionScheduler {
    fn on_started(&self, key: SessionKey) {
        SessionScheduler::on_started(self, key);
    }
    fn on_paused(&self, key: SessionKey) {
        SessionScheduler::on_paused(self, key);
    }
    fn on_resumed(&self, key: SessionKey) {
        SessionScheduler::on_resumed(self, key);
    }
    fn on_finished(&self, key: SessionKey) {
        SessionScheduler::on_finished(self, key);
    }
    fn on_failed(&self, key: SessionKey, error: TranscodeError) {
        SessionScheduler::on_failed(self, key, error);
    }
    fn on_progress(&self, key: SessionKey, progress: u32) {
        SessionScheduler::on_progress(self, key, progress);
    }
}

type SharedEvents = Arc<Mutex<Option<Weak<dyn TranscoderEvents>>>>;

enum Command {
    Start {
        key: SessionKey,
        request: TranscodingRequest,
        resumed: bool,
    },
    Pause {
        key: SessionKey,
    },
    Stop {
        key: SessionKey,
    },
}

pub struct TranscodeWorker {
    tx: Sender<Command>,
    events: SharedEvents,
}

impl TranscodeWorker {
    pub fn new(codecs: Arc<dyn CodecFactory>, io: Arc<dyn MediaIoFactory>) -> Self {
        let (tx, rx) = unbounded();
        let events: SharedEvents = Arc::new(Mutex::new(None));
        let loop_events = Arc::clone(&events);
        thread::spawn(move || command_loop(rx, codecs, io, loop_events));
        Self { tx, events }
    }

    /// Wire up the event sink. Held weakly so the worker never keeps
    /// the scheduler alive; events after it is gone are dropped.
    pub fn connect(&self, events: Weak<dyn TranscoderEvents>) {
        *self.events.lock() = Some(events);
    }
}

impl TranscoderControl for TranscodeWorker {
    fn start(&self, key: SessionKey, request: &TranscodingRequest) {
        let _ = self.tx.send(Command::Start {
            key,
            request: request.clone(),
            resumed: false,
        });
    }

    fn pause(&self, key: SessionKey) {
        let _ = self.tx.send(Command::Pause { key });
    }

    fn resume(&self, key: SessionKey, request: &TranscodingRequest) {
        let _ = self.tx.send(Command::Start {
            key,
            request: request.clone(),
            resumed: true,
        });
    }

    fn stop(&self, key: SessionKey) {
        let _ = self.tx.send(Command::Stop { key });
    }
}

// ── Command loop ──────────────────────────────────────────────────────────────

struct ActiveRun {
    key: SessionKey,
    handle: PipelineHandle,
    /// Suppresses the run thread's completion event when the shutdown
    /// was worker-initiated (pause, stop, replacement).
    silenced: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

fn command_loop(
    rx: Receiver<Command>,
    codecs: Arc<dyn CodecFactory>,
    io: Arc<dyn MediaIoFactory>,
    events: SharedEvents,
) {
    let mut active: Option<ActiveRun> = None;

    for command in rx.iter() {
        match command {
            Command::Start { key, request, resumed } => {
                // The scheduler pauses or stops the previous session
                // before starting another; anything still here already
                // ran to completion.
                if let Some(stale) = active.take() {
                    shut_down(stale);
                }
                match spawn_pipeline(key, &request, resumed, &codecs, &io, &events) {
                    Ok(run) => active = Some(run),
                    Err(e) => {
                        warn!("[transcoder] {key}: start failed: {e}");
                        emit(&events, |ev| ev.on_failed(key, e));
                    }
                }
            }
            Command::Pause { key } => {
                if active.as_ref().map(|a| a.key) == Some(key) {
                    if let Some(run) = active.take() {
                        shut_down(run);
                    }
                    info!("[transcoder] {key}: paused");
                    emit(&events, |ev| ev.on_paused(key));
                } else {
                    debug!("[transcoder] {key}: pause for inactive session");
                }
            }
            Command::Stop { key } => {
                if active.as_ref().map(|a| a.key) == Some(key) {
                    if let Some(run) = active.take() {
                        shut_down(run);
                    }
                    info!("[transcoder] {key}: stopped");
                }
            }
        }
    }

    // Control handle dropped: tear down whatever is left.
    if let Some(run) = active.take() {
        shut_down(run);
    }
}

fn shut_down(run: ActiveRun) {
    run.silenced.store(true, Ordering::SeqCst);
    run.handle.abort();
    if run.join.join().is_err() {
        warn!("[transcoder] pipeline thread panicked");
    }
}

fn emit(events: &SharedEvents, f: impl FnOnce(&dyn TranscoderEvents)) {
    let sink = events.lock().as_ref().and_then(Weak::upgrade);
    if let Some(sink) = sink {
        f(sink.as_ref());
    }
}

fn spawn_pipeline(
    key: SessionKey,
    request: &TranscodingRequest,
    resumed: bool,
    codecs: &Arc<dyn CodecFactory>,
    io: &Arc<dyn MediaIoFactory>,
    events: &SharedEvents,
) -> Result<ActiveRun, TranscodeError> {
    let source_format = request
        .source_format
        .clone()
        .ok_or_else(|| TranscodeError::invalid("request carries no source format"))?;
    let dest_format = request
        .dest_format
        .clone()
        .ok_or_else(|| TranscodeError::invalid("request carries no destination format"))?;

    let reader = io.open_reader(&request.source_path)?;
    let sink = Box::new(ProgressSink {
        inner: io.open_sink(&request.dest_path)?,
        key,
        duration_us: source_format.get_i64(format::DURATION_US).unwrap_or(0),
        events: Arc::clone(events),
        last: AtomicU32::new(u32::MAX),
    });

    // The service transcodes the first (only) video track.
    let mut pipeline =
        VideoTrackPipeline::new(source_format, dest_format, 0, reader, sink, codecs.as_ref())?;
    let handle = pipeline.handle();
    let silenced = Arc::new(AtomicBool::new(false));

    // Announce before the run thread exists so started always precedes
    // the completion event, however fast the transcode is.
    if resumed {
        emit(events, |ev| ev.on_resumed(key));
    } else {
        emit(events, |ev| ev.on_started(key));
    }

    let thread_silenced = Arc::clone(&silenced);
    let thread_events = Arc::clone(events);
    let join = thread::spawn(move || {
        let result = pipeline.run();
        if thread_silenced.load(Ordering::SeqCst) {
            return;
        }
        match result {
            Ok(()) => emit(&thread_events, |ev| ev.on_finished(key)),
            Err(e) => emit(&thread_events, |ev| ev.on_failed(key, e)),
        }
    });

    info!("[transcoder] {key}: pipeline running");
    Ok(ActiveRun {
        key,
        handle,
        silenced,
        join,
    })
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Wraps the real sink and maps sample presentation time against the
/// source duration to a 0-100 percentage, reported only when the
/// integer value changes.
struct ProgressSink {
    inner: Box<dyn SampleSink>,
    key: SessionKey,
    duration_us: i64,
    events: SharedEvents,
    last: AtomicU32,
}

impl SampleSink for ProgressSink {
    fn on_format_available(&self, format: MediaFormat) {
        self.inner.on_format_available(format);
    }

    fn on_sample(&self, sample: MediaSample) {
        if self.duration_us > 0 {
            let pts = sample.info().presentation_time_us.max(0);
            let pct = (pts.saturating_mul(100) / self.duration_us).min(100) as u32;
            if self.last.swap(pct, Ordering::Relaxed) != pct {
                emit(&self.events, |ev| ev.on_progress(self.key, pct));
            }
        }
        self.inner.on_sample(sample);
    }
}
