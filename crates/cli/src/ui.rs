use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub(crate) struct Ui {
    bar: ProgressBar,
}

impl Ui {
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stdout());
        let style = ProgressStyle::with_template(
            "{prefix} {bar:30.cyan/blue} {pos}/{len} {msg}\u{1b}[0K",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#--");
        bar.set_style(style);
        bar.set_prefix("idle");
        Self { bar }
    }

    pub(crate) fn println(&self, msg: &str) {
        self.bar.println(msg);
    }

    pub(crate) fn start_sweep(&self, sweep: u64, total: usize, concurrency: usize) {
        self.bar.set_prefix(format!("sweep {sweep}"));
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_message(format!("x{concurrency}"));
    }

    pub(crate) fn set_progress(&self, current: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
    }

    pub(crate) fn set_status(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    pub(crate) fn finish(&self) {
        self.bar.abandon();
    }
}
