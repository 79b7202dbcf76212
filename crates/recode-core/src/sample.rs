// crates/recode-core/src/sample.rs
//
// Sample metadata crossing the reader → decoder → encoder → sink path.
// Plain data only; the buffer-carrying types live in recode-engine.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Buffer flags carried bit-compatible end to end through the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags(pub u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    /// Codec-specific data (CSD) rather than a media frame.
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(1 << 1);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(1 << 2);
    pub const PARTIAL_FRAME: SampleFlags = SampleFlags(1 << 3);

    pub fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | other.0)
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(SampleFlags::END_OF_STREAM)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(SampleFlags::CODEC_CONFIG)
    }
}

impl fmt::Display for SampleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

/// Metadata for the next compressed sample a reader will deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

/// Describes the payload of a codec output buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}
