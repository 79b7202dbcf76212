// crates/recode-engine/src/scheduler.rs
//
// SessionScheduler: shared registry of transcoding sessions, grouped by
// submitter and ordered by foreground priority. Exactly one session is
// transcoding at any instant; the scheduler decides which, preempts it
// when priorities shift, and pauses everything while the platform has
// the codec hardware pulled out from under us.
//
// Locking: one mutex around all state. Public entry points take it
// first and hold it across TranscoderControl calls and client
// notifications, so neither may call back into the scheduler
// synchronously.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use parking_lot::Mutex;
use recode_core::{TranscodeError, TranscodingRequest};

pub type ClientId = i32;
pub type SessionId = i32;
/// Platform identity owning a session (a per-app uid).
pub type SubmitterId = u32;

/// Sentinel submitter: the platform's "no submitter" identity. Holds
/// every session whose request priority is unspecified, and is pinned
/// at the back of the priority order.
pub const OFFLINE_SUBMITTER: SubmitterId = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub client: ClientId,
    pub session: SessionId,
}

impl SessionKey {
    pub fn new(client: ClientId, session: SessionId) -> Self {
        Self { client, session }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.client, self.session)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    NotStarted,
    Running,
    Paused,
}

// ── Collaborator seams ────────────────────────────────────────────────────────

/// Drives the single pipeline instance. Called under the scheduler
/// lock; implementations must be brief and must not re-enter.
pub trait TranscoderControl: Send + Sync {
    fn start(&self, key: SessionKey, request: &TranscodingRequest);
    fn pause(&self, key: SessionKey);
    fn resume(&self, key: SessionKey, request: &TranscodingRequest);
    fn stop(&self, key: SessionKey);
}

/// The platform's foreground-app observer.
pub trait SubmitterPolicy: Send + Sync {
    fn register_monitor(&self, submitter: SubmitterId);
    fn unregister_monitor(&self, submitter: SubmitterId);
    fn is_on_top(&self, submitter: SubmitterId) -> bool;
    fn top_set(&self) -> HashSet<SubmitterId>;
}

/// Per-client notification sink. Sessions hold it weakly; a client that
/// went away simply stops hearing about its sessions.
pub trait ClientCallback: Send + Sync {
    fn on_started(&self, session: SessionId);
    fn on_paused(&self, session: SessionId);
    fn on_resumed(&self, session: SessionId);
    fn on_finished(&self, session: SessionId);
    fn on_failed(&self, session: SessionId, error: TranscodeError);
    fn on_progress_update(&self, session: SessionId, progress: u32);
}

// ── State ─────────────────────────────────────────────────────────────────────

struct Session {
    /// The queue this session lives on. OFFLINE for unspecified-priority
    /// requests regardless of the submitting app.
    submitter: SubmitterId,
    state: SessionState,
    last_progress: u32,
    request: TranscodingRequest,
    callback: Weak<dyn ClientCallback>,
}

struct SchedulerState {
    sessions: HashMap<SessionKey, Session>,
    /// Per-submitter queues in submission order. Real submitters only
    /// have an entry while non-empty; OFFLINE always has one.
    queues: HashMap<SubmitterId, VecDeque<SessionKey>>,
    /// Front-to-back by descending foreground priority. OFFLINE is
    /// always the back element and never reordered.
    order: VecDeque<SubmitterId>,
    /// When set, equals the top session.
    current: Option<SessionKey>,
    /// Codec hardware is unavailable; keep state consistent but start
    /// and resume nothing.
    resource_lost: bool,
}

pub struct SessionScheduler {
    transcoder: Arc<dyn TranscoderControl>,
    policy: Arc<dyn SubmitterPolicy>,
    state: Mutex<SchedulerState>,
}

impl SessionScheduler {
    pub fn new(transcoder: Arc<dyn TranscoderControl>, policy: Arc<dyn SubmitterPolicy>) -> Self {
        let mut queues = HashMap::new();
        queues.insert(OFFLINE_SUBMITTER, VecDeque::new());
        let mut order = VecDeque::new();
        order.push_back(OFFLINE_SUBMITTER);
        Self {
            transcoder,
            policy,
            state: Mutex::new(SchedulerState {
                sessions: HashMap::new(),
                queues,
                order,
                current: None,
                resource_lost: false,
            }),
        }
    }

    // ── Client operations ─────────────────────────────────────────────────────

    /// Register a new session. Returns false when the key is taken.
    pub fn submit(
        &self,
        client: ClientId,
        session: SessionId,
        submitter: SubmitterId,
        request: TranscodingRequest,
        callback: Weak<dyn ClientCallback>,
    ) -> bool {
        let key = SessionKey::new(client, session);
        let mut st = self.state.lock();
        if st.sessions.contains_key(&key) {
            warn!("[scheduler] submit {key}: key already exists");
            return false;
        }

        // Unspecified-priority work is parked on the offline queue no
        // matter who submitted it.
        let submitter = if request.priority.is_realtime() {
            submitter
        } else {
            OFFLINE_SUBMITTER
        };

        if !st.queues.contains_key(&submitter) {
            st.queues.insert(submitter, VecDeque::new());
            self.policy.register_monitor(submitter);
            if self.policy.is_on_top(submitter) {
                st.order.push_front(submitter);
            } else {
                // Ahead of the pinned OFFLINE tail, behind everyone else.
                let at = st.order.len() - 1;
                st.order.insert(at, submitter);
            }
        } else if submitter != OFFLINE_SUBMITTER
            && st.order.front() != Some(&submitter)
            && self.policy.is_on_top(submitter)
        {
            move_to_front(&mut st.order, submitter);
        }

        if let Some(queue) = st.queues.get_mut(&submitter) {
            queue.push_back(key);
        }
        st.sessions.insert(
            key,
            Session {
                submitter,
                state: SessionState::NotStarted,
                last_progress: 0,
                request,
                callback,
            },
        );
        info!("[scheduler] submit {key} under submitter {submitter}");

        self.update_current_session(&mut st);
        true
    }

    /// Cancel one session, or all of a client's real-time sessions when
    /// `session` is negative. Returns false only for a missing single key.
    pub fn cancel(&self, client: ClientId, session: SessionId) -> bool {
        let mut st = self.state.lock();

        let keys: Vec<SessionKey> = if session < 0 {
            st.sessions
                .iter()
                .filter(|(k, s)| k.client == client && s.submitter != OFFLINE_SUBMITTER)
                .map(|(k, _)| *k)
                .collect()
        } else {
            let key = SessionKey::new(client, session);
            if !st.sessions.contains_key(&key) {
                debug!("[scheduler] cancel {key}: no such session");
                return false;
            }
            vec![key]
        };

        for key in keys {
            // Stop even a paused session so the pipeline releases the
            // state it retained for a resume.
            if let Some(s) = st.sessions.get(&key) {
                if s.state != SessionState::NotStarted {
                    self.transcoder.stop(key);
                }
            }
            info!("[scheduler] cancel {key}");
            self.remove_session(&mut st, key);
        }

        self.update_current_session(&mut st);
        true
    }

    /// Read-only copy of a session's request.
    pub fn request_for(&self, client: ClientId, session: SessionId) -> Option<TranscodingRequest> {
        let st = self.state.lock();
        st.sessions
            .get(&SessionKey::new(client, session))
            .map(|s| s.request.clone())
    }

    // ── Pipeline events ───────────────────────────────────────────────────────
    //
    // These may race ahead of our own bookkeeping; anything for an
    // unknown or never-started session is dropped silently.

    pub fn on_started(&self, key: SessionKey) {
        self.forward(key, |cb, session| cb.on_started(session));
    }

    /// Pipeline-initiated pause is observational only; the scheduler's
    /// own state is not touched.
    pub fn on_paused(&self, key: SessionKey) {
        self.forward(key, |cb, session| cb.on_paused(session));
    }

    pub fn on_resumed(&self, key: SessionKey) {
        self.forward(key, |cb, session| cb.on_resumed(session));
    }

    pub fn on_progress(&self, key: SessionKey, progress: u32) {
        let mut st = self.state.lock();
        if let Some(s) = st.sessions.get_mut(&key) {
            if s.state != SessionState::NotStarted {
                s.last_progress = progress;
                if let Some(cb) = s.callback.upgrade() {
                    cb.on_progress_update(key.session, progress);
                }
            }
        }
    }

    pub fn on_finished(&self, key: SessionKey) {
        let mut st = self.state.lock();
        let Some(s) = st.sessions.get(&key) else { return };
        if s.state == SessionState::NotStarted {
            return;
        }
        info!("[scheduler] {key} finished");
        if let Some(cb) = s.callback.upgrade() {
            cb.on_finished(key.session);
        }
        self.remove_session(&mut st, key);
        self.update_current_session(&mut st);
    }

    pub fn on_failed(&self, key: SessionKey, error: TranscodeError) {
        let mut st = self.state.lock();
        let Some(s) = st.sessions.get(&key) else { return };
        if s.state == SessionState::NotStarted {
            return;
        }
        warn!("[scheduler] {key} failed: {error}");
        if let Some(cb) = s.callback.upgrade() {
            cb.on_failed(key.session, error);
        }
        self.remove_session(&mut st, key);
        self.update_current_session(&mut st);
    }

    fn forward(&self, key: SessionKey, f: impl FnOnce(&dyn ClientCallback, SessionId)) {
        let st = self.state.lock();
        if let Some(s) = st.sessions.get(&key) {
            if s.state != SessionState::NotStarted {
                if let Some(cb) = s.callback.upgrade() {
                    f(cb.as_ref(), key.session);
                }
            }
        }
    }

    // ── Platform stimuli ──────────────────────────────────────────────────────

    pub fn on_top_submitters_changed(&self, top: &HashSet<SubmitterId>) {
        let mut st = self.state.lock();
        debug!("[scheduler] top submitters now {top:?}");
        promote_top_submitters(&mut st, top, true);
        self.update_current_session(&mut st);
    }

    /// The resource owner already paused the hardware; just follow.
    pub fn on_resource_lost(&self) {
        let mut st = self.state.lock();
        if st.resource_lost {
            return;
        }
        info!("[scheduler] codec resources lost");
        st.resource_lost = true;
        if let Some(key) = st.current {
            if let Some(s) = st.sessions.get_mut(&key) {
                if s.state == SessionState::Running {
                    s.state = SessionState::Paused;
                    if let Some(cb) = s.callback.upgrade() {
                        cb.on_paused(key.session);
                    }
                }
            }
        }
    }

    pub fn on_resource_available(&self) {
        let mut st = self.state.lock();
        if !st.resource_lost {
            return;
        }
        info!("[scheduler] codec resources available");
        st.resource_lost = false;
        self.update_current_session(&mut st);
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Make the top session the one executing. Pauses the outgoing
    /// session, starts or resumes the incoming one (unless resources
    /// are lost), and retargets `current` either way so a later
    /// resource-available knows whom to wake.
    fn update_current_session(&self, st: &mut SchedulerState) {
        let top = top_session(st);
        let top_running = top
            .and_then(|k| st.sessions.get(&k))
            .map_or(true, |s| s.state == SessionState::Running);
        if top == st.current && top_running {
            return;
        }
        debug!(
            "[scheduler] current {:?} -> top {:?}",
            st.current, top
        );

        if let Some(cur) = st.current {
            if let Some(s) = st.sessions.get_mut(&cur) {
                if s.state == SessionState::Running {
                    self.transcoder.pause(cur);
                    s.state = SessionState::Paused;
                }
            }
        }

        if !st.resource_lost {
            if let Some(key) = top {
                if let Some(s) = st.sessions.get_mut(&key) {
                    match s.state {
                        SessionState::NotStarted => {
                            self.transcoder.start(key, &s.request);
                            s.state = SessionState::Running;
                        }
                        SessionState::Paused => {
                            self.transcoder.resume(key, &s.request);
                            s.state = SessionState::Running;
                        }
                        SessionState::Running => {}
                    }
                }
            }
        }

        st.current = top;
    }

    fn remove_session(&self, st: &mut SchedulerState, key: SessionKey) {
        let Some(session) = st.sessions.remove(&key) else { return };
        let submitter = session.submitter;

        let emptied = match st.queues.get_mut(&submitter) {
            Some(queue) => {
                if let Some(pos) = queue.iter().position(|k| *k == key) {
                    queue.remove(pos);
                }
                queue.is_empty() && submitter != OFFLINE_SUBMITTER
            }
            None => false,
        };

        if emptied {
            st.queues.remove(&submitter);
            if let Some(pos) = st.order.iter().position(|s| *s == submitter) {
                st.order.remove(pos);
            }
            self.policy.unregister_monitor(submitter);
            // The front of the order may just have vanished; re-rank
            // the remaining submitters against the live top set. No
            // preserve-front here, the old front has no queue anymore.
            let top = self.policy.top_set();
            promote_top_submitters(st, &top, false);
        }

        if st.current == Some(key) {
            st.current = None;
        }
    }
}

/// First session of the first submitter, if any.
fn top_session(st: &SchedulerState) -> Option<SessionKey> {
    let submitter = st.order.front()?;
    st.queues.get(submitter).and_then(|q| q.front()).copied()
}

fn move_to_front(order: &mut VecDeque<SubmitterId>, submitter: SubmitterId) {
    if let Some(pos) = order.iter().position(|s| *s == submitter) {
        if pos != 0 {
            order.remove(pos);
            order.push_front(submitter);
        }
    }
}

/// Move every member of `top` that has a queue to the front of the
/// order. With `preserve_front`, a front submitter still in the set
/// stays at the very front so a widening top set does not preempt the
/// in-flight session.
fn promote_top_submitters(
    st: &mut SchedulerState,
    top: &HashSet<SubmitterId>,
    preserve_front: bool,
) {
    let kept = if preserve_front {
        st.order
            .front()
            .copied()
            .filter(|f| *f != OFFLINE_SUBMITTER && top.contains(f))
    } else {
        None
    };
    for &submitter in top {
        if submitter == OFFLINE_SUBMITTER || Some(submitter) == kept {
            continue;
        }
        if st.queues.contains_key(&submitter) {
            move_to_front(&mut st.order, submitter);
        }
    }
    if let Some(front) = kept {
        move_to_front(&mut st.order, front);
    }
}
