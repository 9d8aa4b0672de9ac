//! Progress bar utilities for replay runs
//!
//! Visual feedback while a session chews through a bar file, using the
//! indicatif crate.

use indicatif::{ProgressBar, ProgressStyle};

pub struct ReplayProgress {
    progress: ProgressBar,
}

impl ReplayProgress {
    pub fn new(symbol: &str, total_bars: usize) -> Self {
        let progress = ProgressBar::new(total_bars as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} bars ({eta})\n{msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        progress.set_message(format!("replaying {}", symbol));
        Self { progress }
    }

    pub fn set_position(&self, bars: u64) {
        self.progress.set_position(bars);
    }

    pub fn finish(&self, trades: u64, pnl: f64) {
        self.progress.finish_with_message(format!(
            "replay complete: {} round trips, {:.2} realized pnl",
            trades, pnl
        ));
    }
}
