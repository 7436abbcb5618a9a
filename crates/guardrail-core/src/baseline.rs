//! Suppression baseline: a persisted allow-list of accepted risks with
//! mandatory expiry, reconciled against findings on every run.

use crate::model::{Finding, SuppressionStatus};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// One baseline allow-list item. An entry must carry a fingerprint or a
/// file to be matchable; load-time validation rejects entries with neither.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuppressionEntry {
    pub id: String,
    pub reason: String,
    pub expires_at: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A loaded baseline document. Entry order is the document order; matching
/// is first-match-wins over that order, never scored.
#[derive(Debug, Clone, Serialize)]
pub struct Baseline {
    pub version: i64,
    pub suppressions: Vec<SuppressionEntry>,
}

/// Baseline document errors. These are configuration errors: fatal,
/// surfaced before any scan output is produced.
#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("baseline file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read baseline file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse baseline YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("baseline 'suppressions' must be a list")]
    SuppressionsNotAList,
    #[error("suppression #{index} must be an object")]
    EntryNotAnObject { index: usize },
    #[error("suppression #{index} missing required string field: {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("suppression #{index} has invalid expires_at '{value}' (expected YYYY-MM-DD)")]
    InvalidDate { index: usize, value: String },
    #[error("suppression #{index} has invalid line: {value}")]
    InvalidLine { index: usize, value: String },
    #[error("suppression #{index} must include fingerprint or file for matching")]
    Unmatchable { index: usize },
}

/// Load and validate a baseline document.
///
/// A nonexistent path is a distinct error from "no baseline configured";
/// the caller expresses the latter by passing `None` to [`apply_baseline`].
pub fn load_baseline(path: &Path) -> Result<Baseline, BaselineError> {
    if !path.exists() {
        return Err(BaselineError::NotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| BaselineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&text)?;

    let version = doc
        .get("version")
        .and_then(serde_yaml::Value::as_i64)
        .unwrap_or(1);

    let raw_entries = match doc.get("suppressions") {
        None | Some(serde_yaml::Value::Null) => Vec::new(),
        Some(serde_yaml::Value::Sequence(seq)) => seq.clone(),
        Some(_) => return Err(BaselineError::SuppressionsNotAList),
    };

    let mut suppressions = Vec::with_capacity(raw_entries.len());
    for (idx, raw) in raw_entries.iter().enumerate() {
        let index = idx + 1;
        let map = raw
            .as_mapping()
            .ok_or(BaselineError::EntryNotAnObject { index })?;

        let id = required_string(map, "id", index)?;
        let reason = required_string(map, "reason", index)?;
        let expires_raw = required_string(map, "expires_at", index)?;
        let expires_at = NaiveDate::parse_from_str(&expires_raw, "%Y-%m-%d").map_err(|_| {
            BaselineError::InvalidDate {
                index,
                value: expires_raw.clone(),
            }
        })?;

        let file = optional_string(map, "file");
        let fingerprint = optional_string(map, "fingerprint");
        if fingerprint.is_none() && file.is_none() {
            return Err(BaselineError::Unmatchable { index });
        }

        let line = match map.get("line") {
            None | Some(serde_yaml::Value::Null) => None,
            Some(value) => Some(value.as_u64().map(|l| l as u32).ok_or_else(|| {
                BaselineError::InvalidLine {
                    index,
                    value: format!("{value:?}"),
                }
            })?),
        };

        suppressions.push(SuppressionEntry {
            id,
            reason,
            expires_at,
            file,
            line,
            fingerprint,
            created_by: optional_string(map, "created_by"),
            created_at: optional_string(map, "created_at"),
        });
    }

    debug!(
        path = %path.display(),
        entries = suppressions.len(),
        "loaded baseline"
    );
    Ok(Baseline {
        version,
        suppressions,
    })
}

fn required_string(
    map: &serde_yaml::Mapping,
    field: &'static str,
    index: usize,
) -> Result<String, BaselineError> {
    match map.get(field).and_then(serde_yaml::Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(BaselineError::MissingField { index, field }),
    }
}

fn optional_string(map: &serde_yaml::Mapping, field: &str) -> Option<String> {
    match map.get(field) {
        None | Some(serde_yaml::Value::Null) => None,
        Some(serde_yaml::Value::String(s)) => Some(s.clone()),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        Some(other) => other.as_str().map(str::to_string),
    }
}

/// Find the suppression entry covering a finding, if any.
///
/// Two sequential scans in document order, first match wins:
/// 1. exact fingerprint equality (evidence-sensitive: a code change
///    silently stops the suppression from applying);
/// 2. structural fallback on id + optional file + optional line, with an
///    absent finding line treated as 0. An entry without file or line
///    constraints intentionally matches broadly on id alone.
pub fn match_suppression<'a>(
    finding: &Finding,
    fingerprint: &str,
    suppressions: &'a [SuppressionEntry],
) -> Option<&'a SuppressionEntry> {
    if let Some(entry) = suppressions
        .iter()
        .find(|s| s.fingerprint.as_deref() == Some(fingerprint))
    {
        return Some(entry);
    }

    suppressions.iter().find(|s| {
        s.id == finding.id
            && s.file.as_ref().is_none_or(|f| *f == finding.file)
            && s.line.is_none_or(|l| finding.line.unwrap_or(0) == l)
    })
}

/// Reconcile findings against a baseline.
///
/// Returns the updated findings plus (suppressed, expired) totals. Every
/// finding's fingerprint is recomputed here; a fingerprint carried in the
/// input is never trusted. Findings are never dropped: an expired match
/// resurfaces the finding so CI fails again.
pub fn apply_baseline(
    findings: Vec<Finding>,
    baseline: Option<&Baseline>,
    today: NaiveDate,
) -> (Vec<Finding>, usize, usize) {
    let Some(baseline) = baseline else {
        return (findings, 0, 0);
    };

    let mut suppressed_total = 0;
    let mut expired_total = 0;

    let updated = findings
        .iter()
        .map(|finding| {
            let fingerprint = finding.compute_fingerprint();
            let Some(entry) = match_suppression(finding, &fingerprint, &baseline.suppressions)
            else {
                return finding.with_fingerprint(fingerprint);
            };

            let expires_at = entry.expires_at.format("%Y-%m-%d").to_string();
            if entry.expires_at < today {
                expired_total += 1;
                finding.with_suppression(
                    fingerprint,
                    SuppressionStatus::Expired,
                    &entry.reason,
                    &expires_at,
                )
            } else {
                suppressed_total += 1;
                finding.with_suppression(
                    fingerprint,
                    SuppressionStatus::Active,
                    &entry.reason,
                    &expires_at,
                )
            }
        })
        .collect();

    (updated, suppressed_total, expired_total)
}

/// Far-future placeholder expiry used by generated scaffolds; a human is
/// expected to tighten it before committing.
const PLACEHOLDER_EXPIRY: &str = "2099-12-31";

/// Build a baseline scaffold from current findings: one entry per finding
/// with a fresh fingerprint, a placeholder reason requiring human edit, and
/// a clearly-placeholder expiry. This is a starting point, not an
/// auto-approval.
pub fn generate_baseline(findings: &[Finding], today: NaiveDate) -> Baseline {
    let created_at = today.format("%Y-%m-%d").to_string();
    let expires_at =
        NaiveDate::parse_from_str(PLACEHOLDER_EXPIRY, "%Y-%m-%d").unwrap_or(NaiveDate::MAX);

    let suppressions = findings
        .iter()
        .map(|f| SuppressionEntry {
            id: f.id.clone(),
            reason: "TODO: explain temporary suppression".to_string(),
            expires_at,
            file: Some(f.file.clone()),
            line: f.line,
            fingerprint: Some(f.compute_fingerprint()),
            created_by: Some("@owner".to_string()),
            created_at: Some(created_at.clone()),
        })
        .collect();

    Baseline {
        version: 1,
        suppressions,
    }
}

/// Serialize a generated baseline to YAML at `path`.
pub fn write_baseline(path: &Path, findings: &[Finding], today: NaiveDate) -> anyhow::Result<()> {
    let baseline = generate_baseline(findings, today);
    let yaml = serde_yaml::to_string(&baseline)?;
    std::fs::write(path, yaml)
        .map_err(|e| anyhow::anyhow!("failed to write baseline '{}': {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn sample_finding() -> Finding {
        Finding {
            id: "GR-SEC-003".to_string(),
            title: "Possible hardcoded secret".to_string(),
            category: "secrets".to_string(),
            severity: Severity::High,
            file: "src/config.py".to_string(),
            line: Some(42),
            message: "Potential secret material found in source text.".to_string(),
            remediation: "Move to secret manager".to_string(),
            evidence: "token = 'abcdabcdabcdabcd'".to_string(),
            fingerprint: None,
            suppressed: false,
            suppression_reason: None,
            suppression_expires_at: None,
            suppression_status: SuppressionStatus::None,
        }
    }

    fn write_yaml(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_baseline_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let fp = sample_finding().compute_fingerprint();
        let path = write_yaml(
            &tmp,
            ".guardrail-baseline.yml",
            &format!(
                "version: 1\n\
                 suppressions:\n\
                 \x20 - id: GR-SEC-003\n\
                 \x20   file: src/config.py\n\
                 \x20   line: 42\n\
                 \x20   fingerprint: {fp}\n\
                 \x20   reason: temporary exception\n\
                 \x20   expires_at: '2099-01-01'\n"
            ),
        );

        let baseline = load_baseline(&path).unwrap();
        assert_eq!(baseline.version, 1);
        assert_eq!(baseline.suppressions.len(), 1);
        assert_eq!(baseline.suppressions[0].line, Some(42));
    }

    #[test]
    fn test_load_baseline_missing_file_is_distinct_error() {
        let err = load_baseline(Path::new("/nonexistent/baseline.yml")).unwrap_err();
        assert!(matches!(err, BaselineError::NotFound(_)));
    }

    #[test]
    fn test_load_baseline_defaults_version() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_yaml(
            &tmp,
            "b.yml",
            "suppressions:\n\
             \x20 - id: GR-SEC-003\n\
             \x20   file: src/config.py\n\
             \x20   reason: accepted risk\n\
             \x20   expires_at: '2099-01-01'\n",
        );
        let baseline = load_baseline(&path).unwrap();
        assert_eq!(baseline.version, 1);
    }

    #[test]
    fn test_load_baseline_rejects_missing_reason() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_yaml(
            &tmp,
            "bad.yml",
            "version: 1\n\
             suppressions:\n\
             \x20 - id: GR-SEC-003\n\
             \x20   file: src/config.py\n\
             \x20   expires_at: '2099-01-01'\n",
        );
        let err = load_baseline(&path).unwrap_err();
        assert!(matches!(
            err,
            BaselineError::MissingField {
                index: 1,
                field: "reason"
            }
        ));
    }

    #[test]
    fn test_load_baseline_rejects_bad_date() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_yaml(
            &tmp,
            "bad.yml",
            "version: 1\n\
             suppressions:\n\
             \x20 - id: GR-SEC-003\n\
             \x20   file: src/config.py\n\
             \x20   reason: accepted risk\n\
             \x20   expires_at: 'next quarter'\n",
        );
        let err = load_baseline(&path).unwrap_err();
        assert!(matches!(err, BaselineError::InvalidDate { index: 1, .. }));
    }

    #[test]
    fn test_load_baseline_rejects_unmatchable_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_yaml(
            &tmp,
            "bad.yml",
            "version: 1\n\
             suppressions:\n\
             \x20 - id: GR-SEC-003\n\
             \x20   reason: accepted risk\n\
             \x20   expires_at: '2099-01-01'\n",
        );
        let err = load_baseline(&path).unwrap_err();
        assert!(matches!(err, BaselineError::Unmatchable { index: 1 }));
    }

    #[test]
    fn test_apply_baseline_none_is_passthrough() {
        let findings = vec![sample_finding()];
        let (out, suppressed, expired) =
            apply_baseline(findings.clone(), None, NaiveDate::from_ymd_opt(2026, 2, 17).unwrap());
        assert_eq!(out, findings);
        assert_eq!(suppressed, 0);
        assert_eq!(expired, 0);
    }

    #[test]
    fn test_apply_baseline_fingerprint_match_suppresses() {
        let finding = sample_finding();
        let baseline = Baseline {
            version: 1,
            suppressions: vec![SuppressionEntry {
                id: finding.id.clone(),
                reason: "accepted risk".to_string(),
                expires_at: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                file: None,
                line: None,
                fingerprint: Some(finding.compute_fingerprint()),
                created_by: None,
                created_at: None,
            }],
        };

        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        let (out, suppressed, expired) = apply_baseline(vec![finding], Some(&baseline), today);

        assert_eq!(suppressed, 1);
        assert_eq!(expired, 0);
        assert!(out[0].suppressed);
        assert_eq!(out[0].suppression_status, SuppressionStatus::Active);
        assert_eq!(out[0].suppression_reason.as_deref(), Some("accepted risk"));
    }

    #[test]
    fn test_apply_baseline_expired_match_resurfaces() {
        let finding = sample_finding();
        let baseline = Baseline {
            version: 1,
            suppressions: vec![SuppressionEntry {
                id: finding.id.clone(),
                reason: "accepted risk".to_string(),
                expires_at: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                file: Some(finding.file.clone()),
                line: Some(42),
                fingerprint: None,
                created_by: None,
                created_at: None,
            }],
        };

        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        let (out, suppressed, expired) = apply_baseline(vec![finding], Some(&baseline), today);

        assert_eq!(suppressed, 0);
        assert_eq!(expired, 1);
        assert!(!out[0].suppressed);
        assert_eq!(out[0].suppression_status, SuppressionStatus::Expired);
        assert_eq!(
            out[0].suppression_expires_at.as_deref(),
            Some("2020-01-01")
        );
    }

    #[test]
    fn test_apply_baseline_expiry_boundary_is_inclusive() {
        let finding = sample_finding();
        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        let baseline = Baseline {
            version: 1,
            suppressions: vec![SuppressionEntry {
                id: finding.id.clone(),
                reason: "expires today".to_string(),
                expires_at: today,
                file: Some(finding.file.clone()),
                line: None,
                fingerprint: None,
                created_by: None,
                created_at: None,
            }],
        };

        // expires_at == today is still active; only strictly-past dates expire.
        let (out, suppressed, expired) = apply_baseline(vec![finding], Some(&baseline), today);
        assert_eq!(suppressed, 1);
        assert_eq!(expired, 0);
        assert_eq!(out[0].suppression_status, SuppressionStatus::Active);
    }

    #[test]
    fn test_structural_match_without_line_suppresses_any_line() {
        let mut at_line_10 = sample_finding();
        at_line_10.line = Some(10);
        let mut no_line = sample_finding();
        no_line.line = None;

        let baseline = Baseline {
            version: 1,
            suppressions: vec![SuppressionEntry {
                id: "GR-SEC-003".to_string(),
                reason: "whole file accepted".to_string(),
                expires_at: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                file: Some("src/config.py".to_string()),
                line: None,
                fingerprint: None,
                created_by: None,
                created_at: None,
            }],
        };

        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        let (out, suppressed, _) =
            apply_baseline(vec![at_line_10, no_line], Some(&baseline), today);
        assert_eq!(suppressed, 2);
        assert!(out.iter().all(|f| f.suppressed));
    }

    #[test]
    fn test_structural_match_respects_line_constraint() {
        let mut wrong_line = sample_finding();
        wrong_line.line = Some(7);

        let baseline = Baseline {
            version: 1,
            suppressions: vec![SuppressionEntry {
                id: "GR-SEC-003".to_string(),
                reason: "line-scoped".to_string(),
                expires_at: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                file: Some("src/config.py".to_string()),
                line: Some(42),
                fingerprint: None,
                created_by: None,
                created_at: None,
            }],
        };

        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        let (out, suppressed, _) = apply_baseline(vec![wrong_line], Some(&baseline), today);
        assert_eq!(suppressed, 0);
        assert_eq!(out[0].suppression_status, SuppressionStatus::None);
        // Unmatched findings still get their fingerprint recorded.
        assert!(out[0].fingerprint.is_some());
    }

    #[test]
    fn test_fingerprint_pass_wins_over_structural_pass() {
        let finding = sample_finding();
        let baseline = Baseline {
            version: 1,
            suppressions: vec![
                SuppressionEntry {
                    id: "GR-SEC-003".to_string(),
                    reason: "structural first in document".to_string(),
                    expires_at: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                    file: Some("src/config.py".to_string()),
                    line: None,
                    fingerprint: None,
                    created_by: None,
                    created_at: None,
                },
                SuppressionEntry {
                    id: "GR-SEC-003".to_string(),
                    reason: "exact fingerprint later in document".to_string(),
                    expires_at: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                    file: None,
                    line: None,
                    fingerprint: Some(finding.compute_fingerprint()),
                    created_by: None,
                    created_at: None,
                },
            ],
        };

        let fp = finding.compute_fingerprint();
        let entry = match_suppression(&finding, &fp, &baseline.suppressions).unwrap();
        assert_eq!(entry.reason, "exact fingerprint later in document");
    }

    #[test]
    fn test_stale_input_fingerprint_is_recomputed() {
        let mut finding = sample_finding();
        // A forged fingerprint matching the baseline must not suppress.
        finding.fingerprint = Some("deadbeef".to_string());
        let baseline = Baseline {
            version: 1,
            suppressions: vec![SuppressionEntry {
                id: "OTHER-RULE".to_string(),
                reason: "unrelated".to_string(),
                expires_at: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                file: None,
                line: None,
                fingerprint: Some("deadbeef".to_string()),
                created_by: None,
                created_at: None,
            }],
        };

        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        let (out, suppressed, _) = apply_baseline(vec![finding.clone()], Some(&baseline), today);
        assert_eq!(suppressed, 0);
        assert_eq!(
            out[0].fingerprint.as_deref(),
            Some(finding.compute_fingerprint().as_str())
        );
    }

    #[test]
    fn test_generate_baseline_scaffold() {
        let finding = sample_finding();
        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        let baseline = generate_baseline(&[finding.clone()], today);

        assert_eq!(baseline.version, 1);
        assert_eq!(baseline.suppressions.len(), 1);
        let entry = &baseline.suppressions[0];
        assert_eq!(entry.fingerprint.as_deref(), Some(finding.compute_fingerprint().as_str()));
        assert!(entry.reason.starts_with("TODO"));
        assert_eq!(entry.expires_at, NaiveDate::from_ymd_opt(2099, 12, 31).unwrap());
    }

    #[test]
    fn test_write_baseline_round_trips_through_loader() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("generated.yml");
        let finding = sample_finding();
        let today = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();

        write_baseline(&path, &[finding.clone()], today).unwrap();
        let loaded = load_baseline(&path).unwrap();

        assert_eq!(loaded.suppressions.len(), 1);
        assert_eq!(
            loaded.suppressions[0].fingerprint.as_deref(),
            Some(finding.compute_fingerprint().as_str())
        );

        // The scaffold suppresses its own findings until the expiry passes.
        let (out, suppressed, _) = apply_baseline(vec![finding], Some(&loaded), today);
        assert_eq!(suppressed, 1);
        assert!(out[0].suppressed);
    }
}
