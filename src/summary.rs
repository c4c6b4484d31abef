use crate::models::{DecodedDamage, OverallSeverity, Prediction, Severity};

pub const NO_DAMAGE: &str = "No visible damage detected. Vehicle appears to be in good condition.";

fn plural(count: usize) -> &'static str {
    if count > 1 {
        "s"
    } else {
        ""
    }
}

fn with_severity<'a>(damages: &'a [DecodedDamage], severity: &Severity) -> Vec<&'a DecodedDamage> {
    damages.iter().filter(|d| d.severity == *severity).collect()
}

/// Builds the narrative for a set of findings. Sentences appear in a fixed
/// critical → high → medium → low order regardless of input order.
pub fn generate_summary(damages: &[DecodedDamage]) -> String {
    if damages.is_empty() {
        return NO_DAMAGE.to_string();
    }

    let critical = with_severity(damages, &Severity::Critical);
    let severe = with_severity(damages, &Severity::High);
    let moderate = with_severity(damages, &Severity::Medium);
    let minor = with_severity(damages, &Severity::Low);

    let mut narrative = format!(
        "AI Inspection found {} issue{}. ",
        damages.len(),
        plural(damages.len())
    );

    if !critical.is_empty() {
        let flags: Vec<&str> = critical.iter().map(|d| d.defect_type.as_str()).collect();
        narrative.push_str(&format!(
            "⚠️ CRITICAL FLAGS: {} detected. Policy review required. ",
            flags.join(", ")
        ));
    }

    if !severe.is_empty() {
        let mut parts: Vec<&str> = Vec::new();
        for damage in &severe {
            if !parts.contains(&damage.part.as_str()) {
                parts.push(&damage.part);
            }
        }
        narrative.push_str(&format!(
            "Severe damage found on: {}. These components likely require replacement or major bodywork. ",
            parts.join(", ")
        ));
    }

    if !moderate.is_empty() {
        narrative.push_str(&format!(
            "Moderate damage detected on {} panel{} requiring refinishing. ",
            moderate.len(),
            plural(moderate.len())
        ));
    }

    if !minor.is_empty() {
        let pdr = minor
            .iter()
            .filter(|d| d.repair_action.contains("PDR"))
            .count();
        if pdr > 0 {
            narrative.push_str(&format!(
                "Minor dents found on {} panel{} are candidates for cost-saving PDR. ",
                pdr,
                plural(pdr)
            ));
        } else {
            narrative.push_str("Minor cosmetic imperfections noted. ");
        }
    }

    narrative
}

/// Headline severity for a result set. Raw predictions without decoded
/// findings still count as moderate.
pub fn overall_severity(damages: &[DecodedDamage], predictions: &[Prediction]) -> OverallSeverity {
    if damages
        .iter()
        .any(|d| matches!(d.severity, Severity::High | Severity::Critical))
    {
        OverallSeverity::Severe
    } else if damages.iter().any(|d| d.severity == Severity::Medium) {
        OverallSeverity::Moderate
    } else if damages.is_empty() && !predictions.is_empty() {
        OverallSeverity::Moderate
    } else {
        OverallSeverity::Minor
    }
}

pub fn average_confidence(predictions: &[Prediction]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64
}
