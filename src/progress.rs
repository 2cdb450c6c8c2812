//! Progress bar fed by the engine's state transitions

use colored::Colorize;
use converge::{ProgressCallback, TaskOutcome, TaskState};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

/// Progress bar over the tasks of one run
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new(total: usize, label: &str, quiet: bool) -> Self {
        if quiet {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_prefix(label.to_string());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for RunProgress {
    fn on_transition(&self, task: &str, state: TaskState) {
        if state == TaskState::Running {
            self.bar.set_message(ui::truncate(task, 30));
        }
    }

    fn on_complete(&self, task: &str, outcome: &TaskOutcome) {
        self.bar.inc(1);
        let line = match outcome {
            TaskOutcome::Succeeded { change, warnings } if !warnings.is_empty() => {
                format!("  {} {} ({})", "⚠".yellow(), change, warnings.join("; "))
            }
            TaskOutcome::Succeeded { change, .. } if !change.is_no_change() => {
                format!("  {} {}", "✓".green(), change)
            }
            TaskOutcome::Failed { error } => format!("  {} {} ({})", "✗".red(), task, error),
            _ => return,
        };
        self.bar.println(line);
    }
}
