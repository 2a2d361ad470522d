use clusterflow_cloud::{RunReport, TaskStatus};
use clusterflow_cloud_scaleway::TeardownReport;
use colored::{ColoredString, Colorize};

fn status_label(status: TaskStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        TaskStatus::Created => label.green(),
        TaskStatus::Updated => label.yellow(),
        TaskStatus::Unchanged => label.dimmed(),
        TaskStatus::Failed => label.red().bold(),
        TaskStatus::Skipped => label.magenta(),
    }
}

/// Per-task status table followed by the summary line.
pub fn print_report(report: &RunReport) {
    let width = report.tasks.iter().map(|t| t.task.len()).max().unwrap_or(0);

    println!();
    println!("{}", format!("{:<width$}  {:<10}  {}", "TASK", "STATUS", "ID").bold());
    for task in &report.tasks {
        let id = task.id.as_deref().unwrap_or("-");
        // Pad before colouring so escape codes do not skew the columns.
        let status = status_label(task.status);
        let padding = " ".repeat(10usize.saturating_sub(task.status.to_string().len()));
        println!("{:<width$}  {}{}  {}", task.task, status, padding, id);
        if let Some(message) = &task.message {
            println!("{:<width$}  {}", "", message.dimmed());
        }
    }

    println!();
    let summary = report.summary().to_string();
    if report.is_success() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }
}

pub fn print_teardown(report: &TeardownReport) {
    if report.is_empty() && report.already_deleted == 0 {
        println!("{}", "Nothing to delete".dimmed());
        return;
    }

    for deleted in &report.deleted {
        println!(
            "  {} {} {} ({})",
            "✓".green(),
            deleted.kind,
            deleted.name.as_deref().unwrap_or("-").cyan(),
            deleted.id
        );
    }
    println!();
    println!(
        "{}",
        format!(
            "{} deleted, {} already gone",
            report.deleted.len(),
            report.already_deleted
        )
        .green()
    );
}
