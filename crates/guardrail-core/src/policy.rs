//! Pass/fail policy: numeric per-severity thresholds evaluated against the
//! effective (unsuppressed) severity histogram of a scan report.

use crate::model::{ScanReport, Severity};
use serde::{Deserialize, Serialize};

/// A threshold high enough that the severity never blocks by default.
const NON_BLOCKING: usize = 9999;

fn default_critical() -> usize {
    1
}

fn default_non_blocking() -> usize {
    NON_BLOCKING
}

/// Per-severity failure thresholds: a run fails when the effective count
/// for a severity reaches its threshold. Thresholds are independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailOn {
    #[serde(default = "default_critical")]
    pub critical: usize,
    #[serde(default = "default_non_blocking")]
    pub high: usize,
    #[serde(default = "default_non_blocking")]
    pub medium: usize,
    #[serde(default = "default_non_blocking")]
    pub low: usize,
}

impl Default for FailOn {
    fn default() -> Self {
        FailOn {
            critical: default_critical(),
            high: NON_BLOCKING,
            medium: NON_BLOCKING,
            low: NON_BLOCKING,
        }
    }
}

impl FailOn {
    /// Severities that carry a threshold, in evaluation order.
    pub const CONFIGURED: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn threshold(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => NON_BLOCKING,
        }
    }
}

/// Policy configuration loaded from a YAML document (see
/// [`crate::config::load_policy`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub fail_on: FailOn,
    /// Glob patterns excluded from file discovery, consumed by detectors.
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

/// Evaluate a report against policy thresholds.
///
/// Uses the effective histogram only. Every violated threshold contributes
/// its own reason; with `strict_expiry`, expired suppressions add one more.
/// Pass means no reasons fired. Pure and idempotent.
pub fn evaluate_policy(
    report: &ScanReport,
    config: &PolicyConfig,
    strict_expiry: bool,
) -> (bool, Vec<String>) {
    let effective = report.effective_summary();
    let mut reasons = Vec::new();

    for severity in FailOn::CONFIGURED {
        let threshold = config.fail_on.threshold(severity);
        let actual = effective.get(severity);
        if actual >= threshold {
            reasons.push(format!(
                "{} findings: {} (threshold: {})",
                severity.as_str(),
                actual,
                threshold
            ));
        }
    }

    if strict_expiry && report.expired_suppressions_total > 0 {
        reasons.push(format!(
            "expired suppressions encountered: {} (strict expiry enabled)",
            report.expired_suppressions_total
        ));
    }

    (reasons.is_empty(), reasons)
}
