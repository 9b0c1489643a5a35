//! Frame metadata record
//!
//! The broadcaster treats metadata as opaque and just stores it next to the
//! payload. The well-known keys are typed because the HTTP layer and the
//! feed read them; anything else is kept verbatim in `extra`.
//!
//! Parsing is lenient. Producers are free to put a string in `frame_id` or
//! write `640.0` for a width; a well-known key whose value does not fit its
//! type is left in `extra` untouched instead of failing the whole frame.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Metadata published alongside each frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameMetadata {
    /// Monotonically assigned by the capture stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<u64>,

    /// Capture time, seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_capture: Option<f64>,

    /// Time the processing stage finished, seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_processed: Option<f64>,

    /// Width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,

    /// Height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,

    /// Payload encoding, e.g. `jpeg`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Pixel mode, e.g. `BGR` or `L`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Processing stage applied, e.g. `grayscale`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<String>,

    /// Every other key, plus well-known keys whose value had the wrong type
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FrameMetadata {
    /// Parse a JSON header segment
    ///
    /// Fails only when the segment is not a JSON object. Older producers
    /// send the capture time as `ts`; it is moved into `ts_capture` when
    /// that key is absent.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let map: Map<String, Value> = serde_json::from_slice(bytes)?;
        Ok(Self::from_map(map))
    }

    /// Lift the well-known keys out of a JSON object
    pub fn from_map(mut extra: Map<String, Value>) -> Self {
        let frame_id = lift(&mut extra, "frame_id", as_whole_u64);
        let ts_capture = lift(&mut extra, "ts_capture", Value::as_f64)
            .or_else(|| lift(&mut extra, "ts", Value::as_f64));
        let ts_processed = lift(&mut extra, "ts_processed", Value::as_f64);
        let w = lift(&mut extra, "w", as_whole_u32);
        let h = lift(&mut extra, "h", as_whole_u32);
        let encoding = lift(&mut extra, "encoding", as_string);
        let mode = lift(&mut extra, "mode", as_string);
        let processed = lift(&mut extra, "processed", as_string);

        Self {
            frame_id,
            ts_capture,
            ts_processed,
            w,
            h,
            encoding,
            mode,
            processed,
            extra,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl<'de> Deserialize<'de> for FrameMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Self::from_map)
    }
}

/// Remove `key` from `map` if `convert` accepts its value
fn lift<T>(
    map: &mut Map<String, Value>,
    key: &str,
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let converted = convert(map.get(key)?)?;
    map.remove(key);
    Some(converted)
}

fn as_whole_u64(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        let f = value.as_f64()?;
        (f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
    })
}

fn as_whole_u32(value: &Value) -> Option<u32> {
    as_whole_u64(value).and_then(|n| u32::try_from(n).ok())
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}
