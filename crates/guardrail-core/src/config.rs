//! Process-boundary configuration: policy documents, triage connection
//! settings, and `.env` loading. Environment access happens here once;
//! core stages only ever see explicit values.

use crate::policy::PolicyConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_FINDINGS: usize = 20;
const DEFAULT_CONTEXT_LINES: usize = 2;

/// Connection settings for the external triage service, collected once
/// from the environment and threaded into the core as a plain value.
#[derive(Debug, Clone)]
pub struct AiSettings {
    /// Requested mode: `auto`, `on`, or `off`.
    pub mode: String,
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: u64,
    pub max_findings: usize,
    /// Lines of file context attached before/after each finding's line.
    pub context_lines: usize,
}

/// Load triage settings from the environment. `mode_override` (typically a
/// CLI flag) takes precedence over `GUARDRAIL_AI_MODE`; anything other than
/// `on`/`off` is treated as `auto`.
pub fn load_ai_settings(mode_override: Option<&str>) -> AiSettings {
    let explicit = |value: String| {
        let value = value.trim().to_lowercase();
        (value == "on" || value == "off").then_some(value)
    };
    let mode = mode_override
        .map(str::to_string)
        .and_then(explicit)
        .or_else(|| std::env::var("GUARDRAIL_AI_MODE").ok().and_then(explicit))
        .unwrap_or_else(|| "auto".to_string());

    let api_key = non_empty_env("OPENAI_API_KEY");
    let base_url = non_empty_env("OPENAI_BASE_URL")
        .or_else(|| api_key.is_some().then(|| DEFAULT_BASE_URL.to_string()));
    let model = non_empty_env("GUARDRAIL_AI_MODEL")
        .or_else(|| api_key.is_some().then(|| DEFAULT_MODEL.to_string()));

    AiSettings {
        enabled: mode != "off",
        mode,
        base_url,
        api_key,
        model,
        timeout_seconds: parsed_env("GUARDRAIL_AI_TIMEOUT_SECONDS", DEFAULT_TIMEOUT_SECONDS),
        max_findings: parsed_env("GUARDRAIL_AI_MAX_FINDINGS", DEFAULT_MAX_FINDINGS),
        context_lines: DEFAULT_CONTEXT_LINES,
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Load policy configuration. `None` yields the defaults (critical blocks
/// at 1, everything else effectively non-blocking); a configured path that
/// does not exist is a fatal configuration error.
pub fn load_policy(path: Option<&Path>) -> Result<PolicyConfig> {
    let Some(path) = path else {
        return Ok(PolicyConfig::default());
    };

    if !path.exists() {
        anyhow::bail!("Policy file not found: {}", path.display());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file '{}'", path.display()))?;
    let config: PolicyConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse policy file '{}'", path.display()))?;
    debug!(path = %path.display(), "loaded policy");
    Ok(config)
}

/// Best-effort `.env` loader: `KEY=VALUE` lines, `#` comments, optional
/// surrounding quotes. Already-set variables are never overridden. A
/// missing file is not an error.
pub fn load_env_file(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if key.is_empty() || std::env::var(key).is_ok() {
            continue;
        }
        std::env::set_var(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    #[test]
    fn test_load_policy_defaults_when_unconfigured() {
        let config = load_policy(None).unwrap();
        assert_eq!(config.fail_on.threshold(Severity::Critical), 1);
        assert_eq!(config.fail_on.threshold(Severity::High), 9999);
        assert!(config.exclude_paths.is_empty());
    }

    #[test]
    fn test_load_policy_missing_path_is_fatal() {
        let err = load_policy(Some(Path::new("/nonexistent/policy.yml"))).unwrap_err();
        assert!(err.to_string().contains("Policy file not found"));
    }

    #[test]
    fn test_load_policy_merges_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("policy.yml");
        std::fs::write(
            &path,
            "fail_on:\n  high: 1\nexclude_paths:\n  - 'vendor/**'\n",
        )
        .unwrap();

        let config = load_policy(Some(&path)).unwrap();
        assert_eq!(config.fail_on.threshold(Severity::High), 1);
        // Unspecified severities keep their defaults.
        assert_eq!(config.fail_on.threshold(Severity::Critical), 1);
        assert_eq!(config.fail_on.threshold(Severity::Medium), 9999);
        assert_eq!(config.exclude_paths, vec!["vendor/**".to_string()]);
    }

    #[test]
    fn test_load_env_file_does_not_override() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(
            &path,
            "# comment\nGUARDRAIL_TEST_ENV_A=from_file\nGUARDRAIL_TEST_ENV_B=\"quoted\"\n",
        )
        .unwrap();

        std::env::set_var("GUARDRAIL_TEST_ENV_A", "preexisting");
        load_env_file(&path);

        assert_eq!(std::env::var("GUARDRAIL_TEST_ENV_A").unwrap(), "preexisting");
        assert_eq!(std::env::var("GUARDRAIL_TEST_ENV_B").unwrap(), "quoted");
    }

    #[test]
    fn test_ai_settings_mode_off_disables() {
        let settings = load_ai_settings(Some("off"));
        assert!(!settings.enabled);
        assert_eq!(settings.mode, "off");

        let settings = load_ai_settings(Some("unrecognized"));
        assert_eq!(settings.mode, "auto");
        assert!(settings.enabled);
    }
}
