//! ==============================================================================
//! domain.rs - shared game vocabulary
//! ==============================================================================
//!
//! purpose:
//!     value types passed between the sensor loop, the agents, the hub session
//!     and the wire. nothing in here owns a lock or a task.
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// most recent tag reading of one node
///
/// `tag_id: None` means no tag is present on the reader.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReading {
    pub tag_id: Option<String>,
    /// unix timestamp (ms) when the reading was captured
    pub captured_at: Option<u64>,
}

impl TagReading {
    pub fn tag(id: impl Into<String>) -> Self {
        Self { tag_id: Some(id.into()), captured_at: None }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// classification of a sensed tag
///
/// "no reading / not evaluated" is `Option<Verdict>::None` and goes over the
/// wire as `null`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Wrong,
    Unknown,
}

impl Verdict {
    /// colour a node shows for its own verdict
    pub fn color(self) -> LightColor {
        match self {
            Verdict::Correct => LightColor::Green,
            Verdict::Wrong => LightColor::Red,
            Verdict::Unknown => LightColor::Cyan,
        }
    }
}

/// identifier of a participating node ("local" for the hub's own reader)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub const LOCAL: &'static str = "local";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn local() -> Self {
        Self(Self::LOCAL.to_string())
    }

    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// idle-animation slot: 0 for the hub, N for "satN"
    pub fn idle_slot(&self) -> u8 {
        if self.is_local() {
            return 0;
        }
        self.0
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .map(|d| d as u8)
            .unwrap_or(0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// normalized colour, every channel in [0, 1]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0.0, g: 0.0, b: 0.0 };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r: r.clamp(0.0, 1.0), g: g.clamp(0.0, 1.0), b: b.clamp(0.0, 1.0) }
    }

    pub fn scaled(self, level: f32) -> Self {
        Self::new(self.r * level, self.g * level, self.b * level)
    }

    pub fn is_off(&self) -> bool {
        self.r == 0.0 && self.g == 0.0 && self.b == 0.0
    }
}

/// colours that can be named in an rpc path (`/led/green`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightColor {
    Green,
    Red,
    Cyan,
    Blue,
    Off,
}

impl LightColor {
    pub fn rgb(self) -> Rgb {
        match self {
            LightColor::Green => Rgb::new(0.0, 1.0, 0.0),
            LightColor::Red => Rgb::new(1.0, 0.0, 0.0),
            LightColor::Cyan => Rgb::new(0.0, 1.0, 1.0),
            LightColor::Blue => Rgb::new(0.0, 0.0, 1.0),
            LightColor::Off => Rgb::OFF,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LightColor::Green => "green",
            LightColor::Red => "red",
            LightColor::Cyan => "cyan",
            LightColor::Blue => "blue",
            LightColor::Off => "off",
        }
    }
}

impl std::str::FromStr for LightColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "green" => Ok(LightColor::Green),
            "red" => Ok(LightColor::Red),
            "cyan" => Ok(LightColor::Cyan),
            "blue" => Ok(LightColor::Blue),
            "off" => Ok(LightColor::Off),
            other => Err(format!("unknown color: {}", other)),
        }
    }
}

/// shared reference instant (unix ms) for the idle animation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdleEpoch(pub u64);

/// satellite -> hub status report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub satellite_id: NodeId,
    pub tag_id: Option<String>,
    pub verdict: Option<Verdict>,
}

/// body of an idle-start request; the hub fills in "now" when absent
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleStartRequest {
    #[serde(default)]
    pub reference_timestamp: Option<IdleEpoch>,
}

/// uniform acknowledgement body
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
