//! Progress bar bridging the executor's callbacks to indicatif.

use indicatif::{ProgressBar, ProgressStyle};
use provision::{OpKind, ProgressCallback, ResourceOutcome};

pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for BarProgress {
    fn on_op_start(&mut self, name: &str, kind: OpKind) {
        self.bar.set_message(format!("{kind} {name}"));
    }

    fn on_op_complete(&mut self, name: &str, outcome: &ResourceOutcome) {
        if let ResourceOutcome::Failed { reason } = outcome {
            self.bar.println(format!("✗ {name}: {reason}"));
        }
        self.bar.inc(1);
    }
}
