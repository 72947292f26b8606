use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use stamscan_core::schedule::ScanProgress;

/// Terminal progress: a spinner while the bar is located, then a frame counter.
pub struct ScanBar {
    bar: ProgressBar,
    scanning: bool,
}

impl ScanBar {
    pub fn start() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_message("locating stamina bar");
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            scanning: false,
        }
    }

    pub fn update(&mut self, p: ScanProgress) {
        if !self.scanning {
            self.scanning = true;
            self.bar.disable_steady_tick();
            self.bar.set_length(p.total_frames as u64);
            self.bar.set_style(
                ProgressStyle::with_template(
                    "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} frames ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
        }
        self.bar.set_position(p.frames_done as u64);
        self.bar
            .set_message(format!("chunks {}/{}", p.chunks_done, p.chunks_total));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
