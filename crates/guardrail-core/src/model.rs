use crate::triage::TriageMeta;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Severity level for scan findings.
///
/// Unknown severity strings from external sources (reports, triage
/// responses) are rejected at the boundary and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn priority(&self) -> u8 {
        match self {
            Severity::Critical => 5,
            Severity::High => 4,
            Severity::Medium => 3,
            Severity::Low => 2,
            Severity::Info => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Parse a severity string, tolerating case and surrounding whitespace.
    /// Returns `None` for anything outside the five allowed values.
    pub fn parse(value: &str) -> Option<Severity> {
        match value.trim().to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

/// Suppression state of a finding after baseline reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionStatus {
    #[default]
    None,
    Active,
    Expired,
}

/// One detected issue instance.
///
/// Findings are value types: pipeline stages never mutate them in place but
/// produce updated copies via the `with_*` methods, so earlier stage outputs
/// stay inspectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub category: String,
    pub severity: Severity,
    pub file: String,
    pub line: Option<u32>,
    pub message: String,
    pub remediation: String,
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression_expires_at: Option<String>,
    #[serde(default)]
    pub suppression_status: SuppressionStatus,
}

impl Finding {
    /// Stable content-derived identity:
    /// `sha256(id | file | line-or-0 | normalized_evidence)`, hex-encoded.
    ///
    /// Survives superficial evidence reformatting (whitespace, case) but
    /// changes when the underlying match differs. Always recomputed during
    /// baseline reconciliation; never trusted from deserialized input.
    pub fn compute_fingerprint(&self) -> String {
        let raw = format!(
            "{}|{}|{}|{}",
            self.id,
            self.file,
            self.line.unwrap_or(0),
            normalize_evidence(&self.evidence)
        );
        let digest = Sha256::digest(raw.as_bytes());
        hex::encode(digest)
    }

    /// Copy with the fingerprint recorded and no suppression applied.
    pub fn with_fingerprint(&self, fingerprint: String) -> Finding {
        Finding {
            fingerprint: Some(fingerprint),
            suppressed: false,
            suppression_status: SuppressionStatus::None,
            ..self.clone()
        }
    }

    /// Copy with suppression state from a baseline match. An expired match
    /// records the reason and expiry for visibility but leaves the finding
    /// unsuppressed so it resurfaces in policy evaluation.
    pub fn with_suppression(
        &self,
        fingerprint: String,
        status: SuppressionStatus,
        reason: &str,
        expires_at: &str,
    ) -> Finding {
        Finding {
            fingerprint: Some(fingerprint),
            suppressed: status == SuppressionStatus::Active,
            suppression_reason: Some(reason.to_string()),
            suppression_expires_at: Some(expires_at.to_string()),
            suppression_status: status,
            ..self.clone()
        }
    }

    /// Copy with an accepted triage decision merged in.
    pub fn with_triage(
        &self,
        severity: Severity,
        message: String,
        remediation: String,
    ) -> Finding {
        Finding {
            severity,
            message,
            remediation,
            ..self.clone()
        }
    }
}

/// Collapse runs of whitespace, trim, and lowercase evidence text so the
/// fingerprint ignores formatting-only changes.
pub fn normalize_evidence(evidence: &str) -> String {
    evidence
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonical finding order: severity rank descending, then category, file,
/// line (absent = 0), and id ascending. Applied after every pipeline stage.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .priority()
            .cmp(&a.severity.priority())
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.unwrap_or(0).cmp(&b.line.unwrap_or(0)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Severity histogram over a set of findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub total: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
        self.total += 1;
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

/// Aggregate result of one scan run. Suppressed findings are retained in
/// the sequence; suppression is a status flag, not removal.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scanned_path: String,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai: Option<TriageMeta>,
    pub files_scanned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_in_diff_scope: Option<usize>,
    pub suppressed_total: usize,
    pub expired_suppressions_total: usize,
}

impl ScanReport {
    /// Raw severity histogram over all findings.
    pub fn summary(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for finding in &self.findings {
            counts.record(finding.severity);
        }
        counts
    }

    /// Effective histogram: suppressed findings excluded. This is the basis
    /// for policy evaluation.
    pub fn effective_summary(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for finding in self.findings.iter().filter(|f| !f.suppressed) {
            counts.record(finding.severity);
        }
        counts
    }
}
