//! Optional external triage: findings are sent to an OpenAI-compatible
//! chat completion endpoint for severity reassessment, and accepted
//! decisions are merged back. Every failure path fails open to the
//! unmodified findings plus metadata explaining why; a scan never
//! hard-fails because the advisory service misbehaves.

use crate::config::AiSettings;
use crate::model::{sort_findings, Finding, Severity};
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-line cap applied to context snippets and error descriptions.
const SNIPPET_CHAR_CAP: usize = 220;

/// Outcome of the triage stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageStatus {
    Ok,
    Disabled,
    Skipped,
    Fallback,
}

/// Metadata describing what the triage stage did (or why it did nothing).
/// Callers display this; they never treat it as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageMeta {
    pub status: TriageStatus,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decisions_applied: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_findings: Option<usize>,
}

impl TriageMeta {
    fn new(status: TriageStatus, mode: &str) -> TriageMeta {
        TriageMeta {
            status,
            mode: mode.to_string(),
            model: None,
            reason: None,
            error: None,
            decisions_applied: None,
            requested_findings: None,
        }
    }

    fn disabled(mode: &str) -> TriageMeta {
        TriageMeta::new(TriageStatus::Disabled, mode)
    }

    fn skipped(mode: &str) -> TriageMeta {
        TriageMeta {
            reason: Some("no_findings".to_string()),
            ..TriageMeta::new(TriageStatus::Skipped, mode)
        }
    }

    fn fallback(mode: &str, reason: &str) -> TriageMeta {
        TriageMeta {
            reason: Some(reason.to_string()),
            ..TriageMeta::new(TriageStatus::Fallback, mode)
        }
    }
}

/// Apply optional external triage to findings.
///
/// Never returns an error: disabled/unconfigured/unreachable service all
/// degrade to returning the input unchanged with explanatory metadata.
pub async fn apply_triage(
    root: &Path,
    findings: Vec<Finding>,
    settings: &AiSettings,
) -> (Vec<Finding>, TriageMeta) {
    if !settings.enabled {
        return (findings, TriageMeta::disabled(&settings.mode));
    }
    if findings.is_empty() {
        return (findings, TriageMeta::skipped(&settings.mode));
    }

    let (Some(base_url), Some(api_key), Some(model)) = (
        settings.base_url.as_deref(),
        settings.api_key.as_deref(),
        settings.model.as_deref(),
    ) else {
        debug!("triage enabled but connection settings incomplete");
        return (findings, TriageMeta::fallback(&settings.mode, "missing_config"));
    };

    match run_triage(root, &findings, base_url, api_key, model, settings).await {
        Ok(result) => result,
        Err(err) => {
            warn!(error = %err, "triage request failed; returning findings unmodified");
            let meta = TriageMeta {
                error: Some(truncate_chars(&format!("{err:#}"), SNIPPET_CHAR_CAP)),
                ..TriageMeta::fallback(&settings.mode, "request_failed")
            };
            (findings, meta)
        }
    }
}

async fn run_triage(
    root: &Path,
    findings: &[Finding],
    base_url: &str,
    api_key: &str,
    model: &str,
    settings: &AiSettings,
) -> anyhow::Result<(Vec<Finding>, TriageMeta)> {
    let payload = build_payload(root, findings, settings);
    let body = json!({
        "model": model,
        "messages": build_messages(root, &payload),
        "temperature": 0.1,
        "response_format": {"type": "json_object"},
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_seconds))
        .build()
        .context("failed to build HTTP client")?;

    let response = client
        .post(chat_url(base_url))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .context("triage request failed")?
        .error_for_status()
        .context("triage endpoint returned an error status")?;

    let data: serde_json::Value = response
        .json()
        .await
        .context("triage response body was not JSON")?;

    let content = data["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("");
    let parsed = extract_json(content);

    let Some(decisions) = parsed.get("decisions").and_then(|d| d.as_array()) else {
        warn!("triage response lacked a 'decisions' list; returning findings unmodified");
        return Ok((
            findings.to_vec(),
            TriageMeta::fallback(&settings.mode, "invalid_response_shape"),
        ));
    };

    let (merged, applied) = merge_decisions(findings, decisions);
    debug!(applied, requested = payload.len(), "triage decisions merged");

    let meta = TriageMeta {
        model: Some(model.to_string()),
        decisions_applied: Some(applied),
        requested_findings: Some(payload.len()),
        ..TriageMeta::new(TriageStatus::Ok, &settings.mode)
    };
    Ok((merged, meta))
}

/// Merge triage decisions into findings, keyed by (id, file, line).
///
/// A decision only applies when its key matches an existing finding. The
/// re-assessed severity is taken only when it normalizes to an allowed
/// value, remediation only when non-empty, and a rationale is appended to
/// the message so the original detector text survives as an audit trail.
fn merge_decisions(findings: &[Finding], decisions: &[serde_json::Value]) -> (Vec<Finding>, usize) {
    type Key = (String, String, Option<u32>);
    let key_of = |f: &Finding| -> Key { (f.id.clone(), f.file.clone(), f.line) };

    let indexed: HashMap<Key, &Finding> = findings.iter().map(|f| (key_of(f), f)).collect();
    let mut updated: HashMap<Key, Finding> = HashMap::new();
    let mut applied = 0;

    for item in decisions {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let key: Key = (
            obj.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            obj.get("file").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            obj.get("line").and_then(|v| v.as_u64()).map(|l| l as u32),
        );
        let Some(base) = indexed.get(&key) else {
            continue;
        };

        let severity = obj
            .get("severity")
            .and_then(|v| v.as_str())
            .and_then(Severity::parse)
            .unwrap_or(base.severity);
        let rationale = obj
            .get("rationale")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        let remediation = obj
            .get("remediation")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(&base.remediation);

        let message = if rationale.is_empty() {
            base.message.clone()
        } else {
            format!("{} AI triage: {}", base.message, rationale)
        };

        updated.insert(
            key,
            base.with_triage(severity, message, remediation.to_string()),
        );
        applied += 1;
    }

    let mut merged: Vec<Finding> = findings
        .iter()
        .map(|f| updated.remove(&key_of(f)).unwrap_or_else(|| f.clone()))
        .collect();
    sort_findings(&mut merged);
    (merged, applied)
}

/// Resolve the chat completions URL, tolerating base URLs given with or
/// without a trailing `/v1`.
fn chat_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn build_payload(root: &Path, findings: &[Finding], settings: &AiSettings) -> Vec<serde_json::Value> {
    findings
        .iter()
        .take(settings.max_findings)
        .map(|finding| {
            json!({
                "id": finding.id,
                "file": finding.file,
                "line": finding.line,
                "title": finding.title,
                "category": finding.category,
                "severity": finding.severity,
                "message": finding.message,
                "remediation": finding.remediation,
                "evidence": finding.evidence,
                "context": context_window(&root.join(&finding.file), finding.line, settings.context_lines),
            })
        })
        .collect()
}

fn build_messages(root: &Path, payload: &[serde_json::Value]) -> serde_json::Value {
    let system = "You are a senior application security triage assistant. \
                  Given findings from a repository scan, reassess severity and suggest concise remediation. \
                  Only return strict JSON with key 'decisions'.";
    let user = json!({
        "repo": root.display().to_string(),
        "rules": {
            "allowed_severity": ["critical", "high", "medium", "low", "info"],
            "output_shape": {
                "decisions": [{
                    "id": "string",
                    "file": "string",
                    "line": "number|null",
                    "severity": "critical|high|medium|low|info",
                    "rationale": "short string",
                    "remediation": "short string",
                }]
            }
        },
        "findings": payload,
    });

    json!([
        {"role": "system", "content": system},
        {"role": "user", "content": user.to_string()},
    ])
}

/// Best-effort context snippet around a finding's line: a bounded window of
/// numbered, length-capped lines. Missing or unreadable files yield an
/// empty string rather than an error.
fn context_window(path: &Path, line: Option<u32>, window: usize) -> String {
    let Some(line) = line else {
        return String::new();
    };
    let Ok(bytes) = std::fs::read(path) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();

    let start = (line as usize).saturating_sub(1).saturating_sub(window);
    let end = ((line as usize) + window).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(offset, text)| format!("{}: {}", start + offset + 1, truncate_chars(text, SNIPPET_CHAR_CAP)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Best-effort extraction of a single JSON object from free-form model
/// output. Three tiers: a fenced code block, then the first-to-last brace
/// span, then an empty object. Never errors.
pub(crate) fn extract_json(text: &str) -> serde_json::Value {
    let text = text.trim();
    if text.is_empty() {
        return json!({});
    }

    let candidate = extract_fenced_block(text).unwrap_or_else(|| text.to_string());
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate) {
        return value;
    }

    if let Some(span) = extract_brace_span(text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(span) {
            return value;
        }
    }

    json!({})
}

/// Tier 1: the body of a ```json fenced block, if one wraps an object.
fn extract_fenced_block(text: &str) -> Option<String> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok()?;
    fence
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Tier 2: the span from the first `{` to the last `}`.
fn extract_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}
