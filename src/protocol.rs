use crate::{
    error::{Result, TurtlUpError},
    types::{ImuFrame, ImuSample, NotificationMode},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

/// Prefix of every generated frame id
pub const FRAME_ID_PREFIX: &str = "imuData";

/// Text commands accepted by the write characteristic
///
/// Commands are opaque UTF-8 strings; the device does not acknowledge them
/// beyond the transport-level write response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the device to calibrate its own neutral position
    Calibrate,
    /// Select how the device alerts the wearer
    SetMode(NotificationMode),
    /// Short vibration cue
    Vibrate,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibrate => write!(f, "CALIBRATE"),
            Self::SetMode(mode) => write!(f, "MODE:{mode}"),
            Self::Vibrate => write!(f, "VIBRATE"),
        }
    }
}

impl Command {
    /// Serialize command to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

/// Generates capture-time ids that stay unique within one generator
///
/// Two frames arriving in the same millisecond get a sequence suffix.
#[derive(Debug, Default)]
pub struct FrameIdGenerator {
    last_millis: u128,
    sequence: u32,
}

impl FrameIdGenerator {
    /// Create a new generator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a frame captured at `captured_at`
    pub fn next_id(&mut self, captured_at: SystemTime) -> String {
        let millis = captured_at
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis())
            .max(self.last_millis);

        if millis == self.last_millis {
            self.sequence += 1;
        } else {
            self.last_millis = millis;
            self.sequence = 0;
        }

        if self.sequence == 0 {
            format!("{FRAME_ID_PREFIX}-{millis}")
        } else {
            format!("{FRAME_ID_PREFIX}-{millis}-{}", self.sequence)
        }
    }
}

/// Decode one notification payload into the samples it carries
///
/// The payload is UTF-8 JSON text, optionally padded with trailing NUL bytes,
/// shaped as `{"data": [{"ax":..,"ay":..,"az":..}, ...]}`.
///
/// # Errors
///
/// Returns [`TurtlUpError::Decode`] if the bytes are not UTF-8, not JSON, or
/// lack a well-typed `data` array of `{ax, ay, az}` objects.
pub fn decode_samples(data: &[u8]) -> Result<Vec<ImuSample>> {
    let text = std::str::from_utf8(data)
        .map_err(|e| TurtlUpError::Decode(format!("Payload is not UTF-8: {e}")))?;
    let text = text.trim_end_matches('\0');

    let payload: Value = serde_json::from_str(text)
        .map_err(|e| TurtlUpError::Decode(format!("Invalid payload {text:?}: {e}")))?;

    // Serde would also accept structs written as arrays; the device only sends objects.
    let data = payload
        .as_object()
        .and_then(|fields| fields.get("data"))
        .and_then(Value::as_array)
        .ok_or_else(|| TurtlUpError::Decode(format!("Payload {text:?} has no data array")))?;

    data.iter()
        .map(|sample| {
            if !sample.is_object() {
                return Err(TurtlUpError::Decode(format!("Sample {sample} is not an object")));
            }
            ImuSample::deserialize(sample)
                .map_err(|e| TurtlUpError::Decode(format!("Invalid sample {sample}: {e}")))
        })
        .collect()
}

/// Decode one notification payload into a timestamped frame
///
/// # Errors
///
/// Returns [`TurtlUpError::Decode`] under the same conditions as [`decode_samples`].
pub fn decode_frame(data: &[u8], ids: &mut FrameIdGenerator) -> Result<ImuFrame> {
    let samples = decode_samples(data)?;
    let captured_at = SystemTime::now();

    Ok(ImuFrame {
        id: ids.next_id(captured_at),
        captured_at,
        samples,
    })
}
