use serde::{Deserialize, Serialize};

/// A camera stream as reported by `/api/streams` and `/api/streams/{id}`.
///
/// The list endpoint and the detail endpoint return overlapping field sets,
/// so every field defaults when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Stream {
    pub id: Option<i64>,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: String,
    pub priority: i32,
    pub enabled: bool,
    pub streaming_enabled: bool,
    pub record: bool,
    pub ptz_enabled: bool,
    pub is_deleted: bool,
    pub detection_based_recording: bool,
    pub detection_model: String,
    /// Percent, 0-100.
    pub detection_threshold: f32,
    pub detection_interval: u32,
    pub status: String,
}

impl Stream {
    /// Whether the backend runs a detector for this stream.
    #[must_use]
    pub fn detection_configured(&self) -> bool {
        self.detection_based_recording && !self.detection_model.trim().is_empty()
    }

    /// Whether the stream belongs in the live grid at all.
    #[must_use]
    pub fn is_live_viewable(&self) -> bool {
        !self.is_deleted && self.enabled && self.streaming_enabled
    }

    /// Identifier used for the detail endpoint. Falls back to the name.
    #[must_use]
    pub fn detail_key(&self) -> String {
        self.id.map_or_else(|| self.name.clone(), |id| id.to_string())
    }
}

/// One detected object, geometry normalised to the native frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectionResults {
    pub stream: String,
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PtzMove {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

impl PtzMove {
    /// Clamps each axis to the `[-1, 1]` velocity range the backend accepts.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            pan: self.pan.clamp(-1.0, 1.0),
            tilt: self.tilt.clamp(-1.0, 1.0),
            zoom: self.zoom.clamp(-1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PtzCapabilities {
    pub has_ptz: bool,
    pub has_pan_tilt: bool,
    pub has_zoom: bool,
    pub has_presets: bool,
    pub has_home: bool,
    pub max_presets: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PtzPreset {
    pub token: String,
    pub name: String,
}

/// The presets endpoint answers either with a bare array or a wrapped one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum PresetsResponse {
    Bare(Vec<PtzPreset>),
    Wrapped { presets: Vec<PtzPreset> },
}

impl PresetsResponse {
    pub(crate) fn into_presets(self) -> Vec<PtzPreset> {
        match self {
            Self::Bare(presets) | Self::Wrapped { presets } => presets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecordingFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<bool>,
}

impl RecordingFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_none()
            && self.end.is_none()
            && self.stream_name.is_none()
            && self.detection.is_none()
    }
}

/// Body of `POST /api/recordings/batch-delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BatchDeleteRequest {
    Ids { ids: Vec<i64> },
    Filter { filter: RecordingFilter },
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchDeleteAccepted {
    pub(crate) job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BatchDeleteProgress {
    pub current: u64,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub complete: bool,
    /// `pending`, `running`, `complete` or `error`.
    pub status: String,
    pub status_message: String,
    pub error_message: Option<String>,
}

impl BatchDeleteProgress {
    /// A job the backend abandoned, whatever its per-recording counters say.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.is_error() || self.failed > 0
    }
}
