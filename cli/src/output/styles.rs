//! Output styles using owo-colors stylesheet pattern

use owo_colors::Style;

/// Centralized stylesheet for CLI output colors.
#[derive(Default, Clone)]
pub struct Styles {
    /// Successful, unchanged hosts (green)
    pub success: Style,
    /// Changed hosts (yellow)
    pub changed: Style,
    /// Failed hosts and error messages (red)
    pub error: Style,
    /// Skipped hosts (cyan)
    pub skipped: Style,
    /// Dimmed/secondary text
    pub dim: Style,
    /// Bold text
    pub bold: Style,
    /// Headers/section titles
    pub header: Style,
}

impl Styles {
    /// Apply colors to the stylesheet.
    pub fn colorize(&mut self) {
        self.success = Style::new().green();
        self.changed = Style::new().yellow();
        self.error = Style::new().red();
        self.skipped = Style::new().cyan();
        self.dim = Style::new().dimmed();
        self.bold = Style::new().bold();
        self.header = Style::new().bold().cyan();
    }
}
