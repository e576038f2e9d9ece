//! Progress display for a pipeline run.

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wikicounts::pipeline::PipelineEvent;
use wikicounts::utils::format_count;

use super::icons;

/// One bar over the configured hours, fed by pipeline events.
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new(hours: u64) -> Self {
        let bar = ProgressBar::new(hours);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} hours")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }

    /// Consume events until the sender is dropped.
    pub fn spawn(self, mut rx: mpsc::Receiver<PipelineEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut staged_rows = 0u64;
            while let Some(event) = rx.recv().await {
                match event {
                    PipelineEvent::HourStarted { slot, .. } => {
                        self.bar.set_message(format!("{}", slot));
                    }
                    PipelineEvent::ChunkStaged { slot, rows, .. } => {
                        staged_rows += rows as u64;
                        self.bar
                            .set_message(format!("{} ({} rows staged)", slot, format_count(staged_rows)));
                    }
                    PipelineEvent::Loaded { .. } => {}
                    PipelineEvent::HourFinished { .. } => self.bar.inc(1),
                    PipelineEvent::HourSkipped { slot, error } => {
                        self.bar
                            .println(format!("{} Skipped {}: {}", icons::warn(), slot, error));
                        self.bar.inc(1);
                    }
                }
            }
            self.bar.finish_and_clear();
        })
    }
}
