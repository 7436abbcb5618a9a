mod display;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use guardrail_core::baseline::{apply_baseline, load_baseline, write_baseline, Baseline};
use guardrail_core::config::{load_ai_settings, load_env_file, load_policy};
use guardrail_core::detectors::{discover_files, run_all_detectors};
use guardrail_core::git_scope::changed_files;
use guardrail_core::model::ScanReport;
use guardrail_core::policy::evaluate_policy;
use guardrail_core::report::{write_json_report, write_markdown_report, write_sarif_report};
use guardrail_core::triage::apply_triage;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_BASELINE_FILE: &str = ".guardrail-baseline.yml";

#[derive(Parser)]
#[command(
    name = "guardrail",
    version,
    about = "guardrail — secure-by-design CI policy guardrail",
    long_about = "Scan a repository for secrets, insecure infrastructure declarations, and missing \
                  dependency lockfiles; reconcile findings against a suppression baseline; and fail \
                  the build when policy thresholds are hit."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a repository and evaluate findings against policy
    Scan {
        /// Path to repository/workspace to scan
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Policy YAML path
        #[arg(long)]
        policy: Option<PathBuf>,

        /// JSON report output path
        #[arg(long, default_value = "guardrail-report.json")]
        json_out: PathBuf,

        /// Markdown report output path
        #[arg(long, default_value = "guardrail-report.md")]
        md_out: PathBuf,

        /// Optional SARIF output path
        #[arg(long)]
        sarif_out: Option<PathBuf>,

        /// AI triage mode: auto|on|off
        #[arg(long, default_value = "auto")]
        ai_mode: String,

        /// Baseline YAML path for suppressions
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Write a baseline YAML scaffold from current findings
        #[arg(long)]
        write_baseline: bool,

        /// Fail the run if expired suppressions are encountered
        #[arg(long)]
        baseline_strict_expiry: bool,

        /// Scan only files changed since <diff-base>...HEAD
        #[arg(long)]
        diff_base: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GUARDRAIL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan {
            path,
            policy,
            json_out,
            md_out,
            sarif_out,
            ai_mode,
            baseline,
            write_baseline,
            baseline_strict_expiry,
            diff_base,
        } => {
            cmd_scan(ScanArgs {
                path,
                policy,
                json_out,
                md_out,
                sarif_out,
                ai_mode,
                baseline,
                write_baseline,
                baseline_strict_expiry,
                diff_base,
            })
            .await
        }
    }
}

struct ScanArgs {
    path: PathBuf,
    policy: Option<PathBuf>,
    json_out: PathBuf,
    md_out: PathBuf,
    sarif_out: Option<PathBuf>,
    ai_mode: String,
    baseline: Option<PathBuf>,
    write_baseline: bool,
    baseline_strict_expiry: bool,
    diff_base: Option<String>,
}

async fn cmd_scan(args: ScanArgs) -> ExitCode {
    let root = match args.path.canonicalize() {
        Ok(root) => root,
        Err(_) => {
            eprintln!("{}", format!("Path does not exist: {}", args.path.display()).red());
            return ExitCode::from(2);
        }
    };

    // Load .env from the current working directory first, then the scanned
    // root, so nested fixture paths still pick up credentials.
    if let Ok(cwd) = std::env::current_dir() {
        load_env_file(&cwd.join(".env"));
    }
    load_env_file(&root.join(".env"));

    let config = match load_policy(args.policy.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", format!("{err:#}").red());
            return ExitCode::from(2);
        }
    };

    let mut files_in_diff_scope = None;
    let include_files: Option<HashSet<String>> = match &args.diff_base {
        Some(diff_base) => match changed_files(&root, diff_base) {
            Ok(files) => {
                files_in_diff_scope = Some(files.len());
                Some(files)
            }
            Err(err) => {
                eprintln!("{}", err.to_string().red());
                return ExitCode::from(2);
            }
        },
        None => None,
    };

    let findings = run_all_detectors(&root, &config.exclude_paths, include_files.as_ref());

    let ai_settings = load_ai_settings(Some(&args.ai_mode));
    let (findings, ai_meta) = apply_triage(&root, findings, &ai_settings).await;

    let baseline_path = args
        .baseline
        .clone()
        .or_else(|| {
            let default = root.join(DEFAULT_BASELINE_FILE);
            default.exists().then_some(default)
        });

    let baseline_doc: Option<Baseline> = match &baseline_path {
        Some(path) => match load_baseline(path) {
            Ok(doc) => Some(doc),
            Err(err) => {
                eprintln!("{}", format!("Invalid baseline file: {err}").red());
                return ExitCode::from(2);
            }
        },
        None => None,
    };

    let today = Utc::now().date_naive();
    let (findings, suppressed_total, expired_total) =
        apply_baseline(findings, baseline_doc.as_ref(), today);

    let files_scanned =
        discover_files(&root, &config.exclude_paths, include_files.as_ref()).len();

    let report = ScanReport {
        scanned_path: root.display().to_string(),
        findings,
        ai: Some(ai_meta),
        files_scanned,
        files_in_diff_scope,
        suppressed_total,
        expired_suppressions_total: expired_total,
    };
    let (passed, reasons) = evaluate_policy(&report, &config, args.baseline_strict_expiry);

    if let Err(err) = write_json_report(&report, &args.json_out) {
        eprintln!("{}", format!("{err:#}").red());
        return ExitCode::from(2);
    }
    if let Err(err) = write_markdown_report(&report, &args.md_out, passed, &reasons) {
        eprintln!("{}", format!("{err:#}").red());
        return ExitCode::from(2);
    }
    if let Some(sarif_out) = &args.sarif_out {
        if let Err(err) = write_sarif_report(&report, sarif_out) {
            eprintln!("{}", format!("{err:#}").red());
            return ExitCode::from(2);
        }
    }

    if args.write_baseline {
        let out_path = baseline_path.unwrap_or_else(|| root.join(DEFAULT_BASELINE_FILE));
        if let Err(err) = write_baseline(&out_path, &report.findings, today) {
            eprintln!("{}", format!("{err:#}").red());
            return ExitCode::from(2);
        }
        println!("Wrote baseline: {}", out_path.display());
    }

    display::print_scan_summary(&report, &args.json_out, &args.md_out, args.sarif_out.as_deref());

    if !passed {
        println!("{}", "Policy check failed".red().bold());
        for reason in &reasons {
            println!("- {reason}");
        }
        return ExitCode::from(1);
    }

    println!("{}", "Policy check passed".green().bold());
    ExitCode::SUCCESS
}
