use colored::*;
use guardrail_core::model::ScanReport;
use std::path::Path;

/// Print the terminal summary for a completed scan.
pub fn print_scan_summary(
    report: &ScanReport,
    json_out: &Path,
    md_out: &Path,
    sarif_out: Option<&Path>,
) {
    let summary = report.summary();
    let effective = report.effective_summary();

    println!();
    println!(
        "{}",
        format!(
            " guardrail v{} — scanned {}",
            env!("CARGO_PKG_VERSION"),
            report.scanned_path
        )
        .bold()
    );
    println!();

    println!(" {}", "Findings".bold().underline());
    println!(
        " {} total: {} ({} effective after suppressions)",
        "|-".dimmed(),
        summary.total,
        effective.total
    );
    println!(
        " {} critical: {}  high: {}  medium: {}  low: {}",
        "|-".dimmed(),
        colorize_count(summary.critical, |s| s.red().bold()),
        colorize_count(summary.high, |s| s.yellow().bold()),
        summary.medium,
        summary.low
    );
    println!(
        " {} suppressed: {}  expired suppressions: {}",
        "|-".dimmed(),
        report.suppressed_total,
        report.expired_suppressions_total
    );
    println!(
        " {} files scanned: {}  in diff scope: {}",
        "|-".dimmed(),
        report.files_scanned,
        report
            .files_in_diff_scope
            .map(|n| n.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );

    if let Some(ai) = &report.ai {
        let status = serde_json::to_value(ai.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", ai.status));
        println!(
            " {} AI triage: {} (mode: {}, model: {})",
            "|-".dimmed(),
            status.cyan(),
            ai.mode,
            ai.model.as_deref().unwrap_or("n/a")
        );
    }

    println!();
    let mut outputs = vec![json_out.display().to_string(), md_out.display().to_string()];
    if let Some(sarif) = sarif_out {
        outputs.push(sarif.display().to_string());
    }
    println!(" Wrote: {}", outputs.join(", "));
    println!();
}

fn colorize_count(count: usize, paint: impl Fn(&str) -> ColoredString) -> String {
    if count > 0 {
        paint(&count.to_string()).to_string()
    } else {
        "0".to_string()
    }
}
