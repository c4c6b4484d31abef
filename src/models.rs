use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw detection returned by the hosted model. `x`/`y` are the box centre.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Prediction {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    pub class: String,
    pub confidence: f64,
    /// Detector fields we don't interpret (`class_id`, `detection_id`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
impl Prediction {
    pub fn new(class: impl Into<String>, confidence: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            class: class.into(),
            confidence,
            extra: Map::new(),
        }
    }

    pub fn with_box(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    /// Token from a malformed label, kept verbatim.
    Unrecognized(String),
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
            Severity::Unrecognized(token) => token,
        }
    }
}

impl From<String> for Severity {
    fn from(token: String) -> Self {
        match token.as_str() {
            "LOW" => Severity::Low,
            "MEDIUM" => Severity::Medium,
            "HIGH" => Severity::High,
            "CRITICAL" => Severity::Critical,
            _ => Severity::Unrecognized(token),
        }
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Unrecognized(token) => token,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaintStatus {
    Intact,
    Broken,
    Unknown,
    Unrecognized(String),
}

impl PaintStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaintStatus::Intact => "INTACT",
            PaintStatus::Broken => "BROKEN",
            PaintStatus::Unknown => "UNKNOWN",
            PaintStatus::Unrecognized(token) => token,
        }
    }
}

impl From<String> for PaintStatus {
    fn from(token: String) -> Self {
        match token.as_str() {
            "INTACT" => PaintStatus::Intact,
            "BROKEN" => PaintStatus::Broken,
            "UNKNOWN" => PaintStatus::Unknown,
            _ => PaintStatus::Unrecognized(token),
        }
    }
}

impl From<PaintStatus> for String {
    fn from(status: PaintStatus) -> Self {
        match status {
            PaintStatus::Unrecognized(token) => token,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for PaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-meaningful interpretation of one [`Prediction`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DecodedDamage {
    pub part: String,
    pub defect_type: String,
    pub severity: Severity,
    pub paint_status: PaintStatus,
    pub repair_action: String,
    pub confidence: f64,
    pub raw_class: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum OverallSeverity {
    Severe,
    Moderate,
    Minor,
}

/// Upstream payload that carries a `predictions` array.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectionPayload {
    pub predictions: Vec<Prediction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response from the hosted detector. Anything that doesn't carry a usable
/// `predictions` array lands in `Unrecognized` and is passed through untouched.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum DetectorResponse {
    Detections(DetectionPayload),
    Unrecognized(Value),
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Data URL (`data:image/jpeg;base64,...`) or bare base64.
    pub image: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct AnalyzeQuery {
    #[serde(default)]
    pub annotate: bool,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub detection: DetectionPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_findings: Option<Vec<DecodedDamage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_severity: Option<OverallSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompressResponse {
    pub image: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
