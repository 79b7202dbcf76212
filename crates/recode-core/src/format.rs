// crates/recode-core/src/format.rs
//
// MediaFormat: string-keyed map of typed values describing a track.
// Mirrors the platform media-format vocabulary so entries survive the
// trip between client requests, codec configuration, and the muxer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Well-known keys ───────────────────────────────────────────────────────────

pub const MIME_TYPE: &str = "mime";
pub const WIDTH: &str = "width";
pub const HEIGHT: &str = "height";
pub const BITRATE: &str = "bitrate";
pub const FRAME_RATE: &str = "frame-rate";
/// Key-frame interval in seconds (float).
pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
pub const COLOR_FORMAT: &str = "color-format";
/// Rotation in degrees, clockwise. Container-level metadata.
pub const ROTATION: &str = "rotation-degrees";
/// Throughput target shared by both codecs. Clients write this key as
/// either a float or an int32; `get_f32` accepts both.
pub const OPERATING_RATE: &str = "operating-rate";
pub const PRIORITY: &str = "priority";
pub const SAR_WIDTH: &str = "sar-width";
pub const SAR_HEIGHT: &str = "sar-height";
pub const DISPLAY_WIDTH: &str = "display-width";
pub const DISPLAY_HEIGHT: &str = "display-height";
pub const DURATION_US: &str = "durationUs";
/// Tells the decoder it may not drop frames the downstream consumer has
/// not yet seen. 0 = dropping forbidden.
pub const ALLOW_FRAME_DROP: &str = "allow-frame-drop";

/// Sentinel for `COLOR_FORMAT`: the encoder reads its input from a
/// producer surface rather than from client-supplied buffers.
pub const COLOR_FORMAT_SURFACE: i32 = 0x7f00_0789;

// ── Values ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FormatValue {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Str(String),
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Int32(v) => write!(f, "{v}"),
            FormatValue::Int64(v) => write!(f, "{v}"),
            FormatValue::Float(v) => write!(f, "{v}"),
            FormatValue::Str(v)   => write!(f, "{v}"),
        }
    }
}

// ── MediaFormat ───────────────────────────────────────────────────────────────

/// A track description. BTreeMap so iteration (and serde output) is stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    entries: BTreeMap<String, FormatValue>,
}

impl MediaFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: a format carrying only a MIME type.
    pub fn with_mime(mime: &str) -> Self {
        let mut f = Self::new();
        f.set_str(MIME_TYPE, mime);
        f
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set_i32(&mut self, key: &str, value: i32) {
        self.entries.insert(key.to_string(), FormatValue::Int32(value));
    }

    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), FormatValue::Int64(value));
    }

    pub fn set_f32(&mut self, key: &str, value: f32) {
        self.entries.insert(key.to_string(), FormatValue::Float(value));
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), FormatValue::Str(value.to_string()));
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(FormatValue::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(FormatValue::Int64(v)) => Some(*v),
            Some(FormatValue::Int32(v)) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Float getter that also accepts an int32 entry. The operating-rate
    /// key in particular is written both ways by real clients.
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.entries.get(key) {
            Some(FormatValue::Float(v)) => Some(*v),
            Some(FormatValue::Int32(v)) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FormatValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn mime(&self) -> Option<&str> {
        self.get_str(MIME_TYPE)
    }

    /// Copy `key` from `other` into self, if `other` has it. Returns
    /// whether anything was copied.
    pub fn copy_from(&mut self, other: &MediaFormat, key: &str) -> bool {
        match other.entries.get(key) {
            Some(v) => {
                self.entries.insert(key.to_string(), v.clone());
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}
