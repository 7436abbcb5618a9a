//! Report rendering: JSON, Markdown, and SARIF 2.1.0 views over a
//! read-only `ScanReport`.

use crate::model::{Finding, ScanReport, Severity, SuppressionStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::path::Path;

/// Build the JSON report document.
pub fn to_json(report: &ScanReport) -> serde_json::Value {
    json!({
        "generated_at": Utc::now().to_rfc3339(),
        "scanned_path": report.scanned_path,
        "summary": report.summary(),
        "effective_summary": report.effective_summary(),
        "suppressed_total": report.suppressed_total,
        "expired_suppressions_total": report.expired_suppressions_total,
        "files_scanned": report.files_scanned,
        "files_in_diff_scope": report.files_in_diff_scope,
        "ai": report.ai,
        "findings": report.findings,
    })
}

pub fn write_json_report(report: &ScanReport, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(&to_json(report))?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write JSON report '{}'", path.display()))
}

/// Render the Markdown report.
pub fn build_markdown_report(report: &ScanReport, passed: bool, reasons: &[String]) -> String {
    let s = report.summary();
    let e = report.effective_summary();
    let mut lines = vec![
        "# guardrail scan report".to_string(),
        String::new(),
        format!("- **Scanned Path:** `{}`", report.scanned_path),
        format!(
            "- **Policy Result:** {}",
            if passed { "PASS" } else { "FAIL" }
        ),
        format!("- **Total Findings:** {} ({} effective)", s.total, e.total),
        format!(
            "- **Critical/High/Medium/Low:** {}/{}/{}/{}",
            s.critical, s.high, s.medium, s.low
        ),
        format!(
            "- **Suppressed:** {} active, {} expired",
            report.suppressed_total, report.expired_suppressions_total
        ),
        String::new(),
    ];

    if !reasons.is_empty() {
        lines.push("## Policy failure reasons".to_string());
        lines.push(String::new());
        lines.extend(reasons.iter().map(|r| format!("- {r}")));
        lines.push(String::new());
    }

    lines.push("## Findings".to_string());
    lines.push(String::new());
    if report.findings.is_empty() {
        lines.push("No findings.".to_string());
    } else {
        for finding in &report.findings {
            lines.push(format!("### [{}] {}", finding.id, finding.title));
            lines.push(format!(
                "- Severity: **{}**",
                finding.severity.as_str().to_uppercase()
            ));
            lines.push(format!("- Category: `{}`", finding.category));
            let location = match finding.line {
                Some(line) => format!("`{}`:{line}", finding.file),
                None => format!("`{}`", finding.file),
            };
            lines.push(format!("- Location: {location}"));
            lines.push(format!("- Why it matters: {}", finding.message));
            lines.push(format!("- Remediation: {}", finding.remediation));
            lines.push(format!("- Evidence: `{}`", finding.evidence));
            match finding.suppression_status {
                SuppressionStatus::Active => lines.push(format!(
                    "- Suppressed until {} ({})",
                    finding.suppression_expires_at.as_deref().unwrap_or("?"),
                    finding.suppression_reason.as_deref().unwrap_or("no reason"),
                )),
                SuppressionStatus::Expired => lines.push(format!(
                    "- Suppression EXPIRED {} ({})",
                    finding.suppression_expires_at.as_deref().unwrap_or("?"),
                    finding.suppression_reason.as_deref().unwrap_or("no reason"),
                )),
                SuppressionStatus::None => {}
            }
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

pub fn write_markdown_report(
    report: &ScanReport,
    path: &Path,
    passed: bool,
    reasons: &[String],
) -> Result<()> {
    std::fs::write(path, build_markdown_report(report, passed, reasons))
        .with_context(|| format!("failed to write Markdown report '{}'", path.display()))
}

/// Generate a SARIF 2.1.0 document from a scan report. SARIF is consumed
/// by GitHub Code Scanning, VS Code, and other tools.
pub fn to_sarif(report: &ScanReport) -> serde_json::Value {
    let mut rules: Vec<serde_json::Value> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for finding in &report.findings {
        if seen.insert(finding.id.as_str()) {
            rules.push(sarif_rule(finding));
        }
    }

    let results: Vec<serde_json::Value> =
        report.findings.iter().map(sarif_result).collect();

    json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "guardrail",
                    "version": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                }
            },
            "results": results,
            "invocations": [{
                "executionSuccessful": true,
                "toolExecutionNotifications": [],
            }]
        }]
    })
}

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Info => "note",
    }
}

fn sarif_rule(finding: &Finding) -> serde_json::Value {
    json!({
        "id": finding.id,
        "name": finding.title,
        "shortDescription": {
            "text": finding.title,
        },
        "fullDescription": {
            "text": finding.message,
        },
        "defaultConfiguration": {
            "level": sarif_level(finding.severity),
        },
        "properties": {
            "category": finding.category,
        }
    })
}

fn sarif_result(finding: &Finding) -> serde_json::Value {
    json!({
        "ruleId": finding.id,
        "level": sarif_level(finding.severity),
        "message": {
            "text": format!("{}\n\nRemediation: {}", finding.message, finding.remediation),
        },
        "suppressions": if finding.suppressed {
            json!([{"kind": "external", "justification": finding.suppression_reason}])
        } else {
            json!([])
        },
        "locations": [{
            "physicalLocation": {
                "artifactLocation": {
                    "uri": finding.file,
                },
                "region": {
                    "startLine": finding.line.unwrap_or(1),
                }
            }
        }],
    })
}

pub fn write_sarif_report(report: &ScanReport, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(&to_sarif(report))?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write SARIF report '{}'", path.display()))
}
