pub mod baseline;
pub mod config;
pub mod detectors;
pub mod git_scope;
pub mod model;
pub mod policy;
pub mod report;
pub mod triage;

pub use baseline::{
    apply_baseline, load_baseline, write_baseline, Baseline, BaselineError, SuppressionEntry,
};
pub use config::{load_ai_settings, load_env_file, load_policy, AiSettings};
pub use model::{
    sort_findings, Finding, ScanReport, Severity, SeverityCounts, SuppressionStatus,
};
pub use policy::{evaluate_policy, FailOn, PolicyConfig};
pub use triage::{apply_triage, TriageMeta, TriageStatus};
