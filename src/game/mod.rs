//! Game simulation modules

pub mod physics;
pub mod room;
pub mod snapshot;

pub use room::{PlayerState, Room};

use serde_json::Value;
use uuid::Uuid;

/// Stable per-connection identifier
pub type ConnId = Uuid;

/// Short generated room identifier
pub type RoomId = String;

/// Upper bound for a client-supplied integration step, in seconds
pub const MAX_INPUT_DT: f64 = 0.2;

/// Validated movement command, queued on the player until the next tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputCommand {
    pub seq: i32,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    /// Client step in seconds, within `[0, MAX_INPUT_DT]`; 0 means "use the tick delta"
    pub dt: f64,
}

impl InputCommand {
    /// Coerce an arbitrary JSON payload into a command. Never fails.
    pub fn from_payload(data: &Value) -> Self {
        let field = |key: &str| data.get(key).unwrap_or(&Value::Null);

        let dt = to_number(field("dt"));
        Self {
            seq: to_int32(to_number(field("seq"))),
            up: truthy(field("up")),
            down: truthy(field("down")),
            left: truthy(field("left")),
            right: truthy(field("right")),
            dt: if dt.is_nan() {
                0.0
            } else {
                dt.clamp(0.0, MAX_INPUT_DT)
            },
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Truncate to a wrapping 32-bit integer; non-finite values become 0
fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}
