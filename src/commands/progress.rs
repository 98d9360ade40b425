//! Progress bars fed by the target's progress hook

use indicatif::{ProgressBar, ProgressStyle};
use rupdi_core::Progress;

/// Create a progress bar with a phase message
fn create_progress_bar_with_phase(total: u64, phase: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
            phase
        ))
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Progress reporter using indicatif progress bars, one bar per phase
#[derive(Default)]
pub struct IndicatifProgress {
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for IndicatifProgress {
    fn start(&mut self, phase: &str, total: usize) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish();
        }
        self.current_bar = Some(create_progress_bar_with_phase(total as u64, phase));
    }

    fn update(&mut self, done: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(done as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish();
        }
    }
}
