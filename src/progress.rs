//! Progress bar for runs, fed by the engine's progress callbacks

use colored::Colorize;
use converge::{ProgressCallback, ResourceReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::ui;

pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Bar over `total` resources; hidden when `quiet`
    pub fn new(total: usize, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("=>-"));
        bar.set_style(style);
        if !quiet {
            bar.enable_steady_tick(Duration::from_millis(120));
        }
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for RunProgress {
    fn on_layer_start(&self, index: usize, total: usize, ids: &[String]) {
        self.bar
            .set_message(format!("layer {}/{total}: {}", index + 1, ids.join(", ")));
    }

    fn on_resource_start(&self, id: &str) {
        log::debug!("Started {id}");
    }

    fn on_resource_complete(&self, report: &ResourceReport) {
        self.bar.inc(1);
        self.bar.suspend(|| {
            let line = format!(
                "  {} {} {}",
                ui::action_icon(report.action),
                report.id,
                ui::status(report.status)
            );
            match &report.message {
                Some(message) if report.is_failed() => {
                    println!("{line} {}", message.dimmed());
                }
                _ => println!("{line}"),
            }
        });
    }

    fn on_layer_complete(&self, _index: usize) {}
}
