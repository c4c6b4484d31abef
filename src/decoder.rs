use serde::Deserialize;

use crate::models::{DecodedDamage, PaintStatus, Prediction, Severity};

pub const MANUAL_REVIEW: &str = "MANUAL_REVIEW_REQUIRED";
pub const PDR: &str = "PDR (Paintless Dent Repair)";
pub const BODYWORK_AND_PAINT: &str = "Bodywork & Paint Required";
pub const REPLACE_COMPONENT: &str = "Replace Component";
pub const REFINISH: &str = "Refinish/Repair";
pub const INSPECT: &str = "INSPECT";

const DEFAULT_HIGH_VALUE_FLAGS: &[&str] = &[
    "IMPROPER_REPAIR",
    "MISSING_PART",
    "CORROSION",
    "PAINT_PEELING",
    "GLASS_SHATTER",
    "PUNCTURE",
    "BROKEN_LIGHT",
    "FLAT_TYRE",
    "FLOOD_RESIDUE",
];

// First match wins.
const FLAG_PART_KEYWORDS: &[(&[&str], &str)] = &[
    (&["GLASS", "SHATTER"], "GLASS PANEL"),
    (&["LIGHT"], "LIGHTING SYSTEM"),
    (&["TYRE", "TIRE"], "WHEEL ASSEMBLY"),
];

/// Business heuristics behind the decoder: which labels are automatically
/// critical and how confidence maps to severity for unstructured labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodePolicy {
    pub high_value_flags: Vec<String>,
    pub high_threshold: f64,
    pub mid_threshold: f64,
    /// Predictions below this confidence are left off the overlay. They are
    /// still decoded and returned.
    pub min_confidence: f64,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        Self {
            high_value_flags: DEFAULT_HIGH_VALUE_FLAGS
                .iter()
                .map(|flag| flag.to_string())
                .collect(),
            high_threshold: 0.8,
            mid_threshold: 0.5,
            min_confidence: 0.3,
        }
    }
}

impl DecodePolicy {
    pub fn is_high_value(&self, raw: &str) -> bool {
        self.high_value_flags
            .iter()
            .any(|flag| flag.eq_ignore_ascii_case(raw))
    }

    pub fn severity_for_confidence(&self, confidence: f64) -> Severity {
        if confidence > self.high_threshold {
            Severity::High
        } else if confidence > self.mid_threshold {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn drawable(&self, prediction: &Prediction) -> bool {
        prediction.confidence >= self.min_confidence
    }
}

/// Decodes a `COMPONENT_DEFECT_SEVERITY_PAINTSTATUS` label. Never fails:
/// anything unparseable degrades to a best-effort record.
pub fn decode_prediction(prediction: &Prediction, policy: &DecodePolicy) -> DecodedDamage {
    let raw = prediction.class.to_uppercase();

    if policy.is_high_value(&raw) {
        return DecodedDamage {
            part: flag_part(&raw).to_string(),
            defect_type: raw.replace('_', " "),
            severity: Severity::Critical,
            paint_status: PaintStatus::Unknown,
            repair_action: MANUAL_REVIEW.to_string(),
            confidence: prediction.confidence,
            raw_class: raw,
        };
    }

    let tokens: Vec<&str> = raw.split('_').collect();
    if tokens.len() < 4 {
        let label = raw.replace('_', " ");
        return DecodedDamage {
            part: label.clone(),
            defect_type: label,
            severity: policy.severity_for_confidence(prediction.confidence),
            paint_status: PaintStatus::Unknown,
            repair_action: INSPECT.to_string(),
            confidence: prediction.confidence,
            raw_class: raw,
        };
    }

    let n = tokens.len();
    let paint_status = PaintStatus::from(tokens[n - 1].to_string());
    let severity = Severity::from(tokens[n - 2].to_string());
    let defect_type = tokens[n - 3].to_string();
    let part = tokens[..n - 3].join(" ");
    let repair_action = repair_action(&defect_type, &severity, &paint_status).to_string();

    DecodedDamage {
        part,
        defect_type,
        severity,
        paint_status,
        repair_action,
        confidence: prediction.confidence,
        raw_class: raw,
    }
}

/// One finding per prediction, in input order.
pub fn decode_all(predictions: &[Prediction], policy: &DecodePolicy) -> Vec<DecodedDamage> {
    predictions
        .iter()
        .map(|p| decode_prediction(p, policy))
        .collect()
}

fn flag_part(raw: &str) -> &'static str {
    FLAG_PART_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| raw.contains(k)))
        .map(|(_, part)| *part)
        .unwrap_or("VEHICLE")
}

fn repair_action(defect_type: &str, severity: &Severity, paint: &PaintStatus) -> &'static str {
    if defect_type == "CRACK" || defect_type == "PUNCTURE" {
        return REPLACE_COMPONENT;
    }
    if *paint == PaintStatus::Intact && defect_type == "DENT" && *severity != Severity::High {
        PDR
    } else if *severity == Severity::High || *paint == PaintStatus::Broken {
        BODYWORK_AND_PAINT
    } else {
        REFINISH
    }
}
