//! Terminal output — spinner and colored status lines.
//!
//! Uses `indicatif` for the progress spinner and `console` for styling.
//! [`JobProgress`] renders registry snapshots as they are polled.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::registry::{Job, JobStatus};

/// Visual progress indicator for one running job.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Start the spinner for a job.
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("QUEUED 0% — job {job_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Refresh the spinner from a polled snapshot.
    pub fn update(&self, job: &Job) {
        self.pb
            .set_message(format!("{} {}% — job {}", job.status, job.progress, job.id));
    }

    /// Stop the spinner and print the final outcome line.
    pub fn complete(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.status {
            JobStatus::Succeeded => {
                println!("  {} Strip generated", self.green.apply_to("✓"));
            }
            JobStatus::Failed => {
                let reason = job.error.as_deref().unwrap_or("unknown error");
                println!("  {} Job failed: {reason}", self.red.apply_to("✗"));
            }
            _ => {
                println!(
                    "  {} Job ended while still {}",
                    self.yellow.apply_to("?"),
                    job.status
                );
            }
        }
    }
}

/// Print the full job record as pretty JSON, styled by outcome.
pub fn print_record(job: &Job) {
    let style = match job.status {
        JobStatus::Succeeded => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        _ => Style::new().yellow(),
    };
    println!();
    println!("{}", style.apply_to("─── Job Record ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(job).unwrap_or_default()
    );
}
