// crates/recode-core/src/request.rs
//
// TranscodingRequest: everything a client hands the service to describe
// one transcode job. Serializable so the RPC layer can carry it verbatim.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::format::MediaFormat;

/// Scheduling class of a request. Everything except `Unspecified` is a
/// real-time session and competes in the foreground priority order;
/// `Unspecified` sessions are parked on the offline queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscodingPriority {
    #[default]
    Unspecified,
    Background,
    Normal,
    High,
}

impl TranscodingPriority {
    pub fn is_realtime(self) -> bool {
        self != TranscodingPriority::Unspecified
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TranscodingRequest {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    /// Format of the source track, when the client already probed it.
    #[serde(default)]
    pub source_format: Option<MediaFormat>,
    /// Requested output format. Missing entries are defaulted by the
    /// pipeline at configure time.
    #[serde(default)]
    pub dest_format: Option<MediaFormat>,
    pub priority: TranscodingPriority,
    /// Identity of the requesting process, for permission checks in the
    /// RPC layer. Not interpreted by the engine.
    #[serde(default)]
    pub client_uid: u32,
    #[serde(default)]
    pub client_pid: i32,
}
