use neon_types::{CaseResult, CompareReport, Run, Suite};

/// Renders a padded text table with a header row.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.len()).collect();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if index < widths.len() {
                widths[index] = widths[index].max(cell.len());
            }
        }
    }
    let render_row = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(index, cell)| format!("{cell:<width$}", width = widths[index]))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let header_cells: Vec<String> = headers.iter().map(|header| header.to_string()).collect();
    let separator = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>()
        .join("  ");
    let mut lines = vec![render_row(&header_cells), separator];
    for row in rows {
        lines.push(render_row(row));
    }
    lines.join("\n")
}

/// Renders a GitHub-style markdown table.
pub fn render_markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut lines = Vec::new();
    lines.push(format!("| {} |", headers.join(" | ")));
    lines.push(format!(
        "|{}|",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join("|")
    ));
    for row in rows {
        lines.push(format!("| {} |", row.join(" | ")));
    }
    lines.join("\n")
}

pub fn suite_rows(suites: &[Suite]) -> Vec<Vec<String>> {
    suites
        .iter()
        .map(|suite| {
            vec![
                suite.name.clone(),
                suite.agent_id.clone(),
                if suite.config.parallel {
                    "parallel".to_string()
                } else {
                    "sequential".to_string()
                },
                suite.id.clone(),
            ]
        })
        .collect()
}

pub fn run_rows(runs: &[Run]) -> Vec<Vec<String>> {
    runs.iter()
        .map(|run| {
            let (passed, failed, errored) = run
                .summary
                .as_ref()
                .map(|summary| (summary.passed, summary.failed, summary.errored))
                .unwrap_or_default();
            vec![
                run.id.clone(),
                run.suite_name.clone().unwrap_or_else(|| "-".to_string()),
                run.status.as_str().to_string(),
                format!("{passed}/{failed}/{errored}"),
                run.agent_version.clone().unwrap_or_else(|| "-".to_string()),
                run.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect()
}

pub fn result_rows(results: &[CaseResult]) -> Vec<Vec<String>> {
    results
        .iter()
        .map(|result| {
            vec![
                result.case_name.clone(),
                result.status.as_str().to_string(),
                if result.passed { "pass" } else { "fail" }.to_string(),
                format!("{:.4}", result.avg_score()),
                format!("{}ms", result.execution_time_ms),
                result.error.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect()
}

pub fn delta_rows(deltas: &[neon_types::ScoreDelta]) -> Vec<Vec<String>> {
    deltas
        .iter()
        .map(|delta| {
            vec![
                delta.case_name.clone(),
                delta.scorer.clone(),
                format!("{:.4}", delta.baseline_score),
                format!("{:.4}", delta.candidate_score),
                format!("{:+.4}", delta.delta),
            ]
        })
        .collect()
}

/// One-paragraph comparison verdict shown above the delta tables.
pub fn compare_headline(report: &CompareReport) -> String {
    format!(
        "{}: {} regression(s), {} improvement(s), {} unchanged (threshold {}, overall delta {:+.4})",
        if report.passed { "PASS" } else { "FAIL" },
        report.regressions.len(),
        report.improvements.len(),
        report.unchanged,
        report.threshold,
        report.overall_delta,
    )
}
