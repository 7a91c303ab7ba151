//! Output formatting module

pub mod progress;
pub mod styles;

use console::Term;
use owo_colors::OwoColorize;
pub use styles::Styles;

use crate::summary::RunSummary;

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Check if progress indicators should be shown.
    #[must_use]
    pub fn show_progress(&self) -> bool {
        self.is_tty && !self.quiet
    }

    /// Render a run summary: one line per host plus a counter footer.
    pub fn render_summary(&self, summary: &RunSummary) {
        if self.quiet {
            return;
        }
        for (host, result) in &summary.results {
            let (mark, style) = if result.failed {
                ("failed", self.styles.error)
            } else if result.skipped {
                ("skipped", self.styles.skipped)
            } else if result.changed {
                ("changed", self.styles.changed)
            } else {
                ("ok", self.styles.success)
            };
            let detail = if result.msg.is_empty() {
                String::new()
            } else {
                format!("  {}", result.msg.style(self.styles.dim))
            };
            println!("{:<24} {}{}", host.style(self.styles.bold), mark.style(style), detail);
        }
        println!(
            "\n{} ok={} changed={} failed={} skipped={}  ({:.1}s)",
            "summary:".style(self.styles.header),
            summary.successful,
            summary.changed,
            summary.failed,
            summary.skipped,
            summary.duration.as_secs_f64(),
        );
    }
}
