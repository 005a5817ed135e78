//! Palette and marks shared by `--help` rendering and command output.

use clap::builder::{
    Styles,
    styling::{AnsiColor, Style},
};
use colored::{Color, Colorize, control::ShouldColorize};
use once_cell::sync::Lazy;

/// One color, spelled for `colored` output and for clap help styles.
#[derive(Clone, Copy)]
pub struct Tone {
    pub text: Color,
    help: AnsiColor,
}

impl Tone {
    const fn new(text: Color, help: AnsiColor) -> Self {
        Self { text, help }
    }

    fn style(self) -> Style {
        Style::new().fg_color(Some(self.help.into()))
    }
}

pub struct Palette {
    pub title: Tone,
    pub heading: Tone,
    pub command: Tone,
    pub muted: Tone,
    pub key: Tone,
    pub saved: Tone,
    pub warning: Tone,
    pub rejected: Tone,
    pub note: Tone,
}

pub const PALETTE: Palette = Palette {
    title: Tone::new(Color::BrightBlue, AnsiColor::BrightBlue),
    heading: Tone::new(Color::Cyan, AnsiColor::Cyan),
    command: Tone::new(Color::Magenta, AnsiColor::Magenta),
    muted: Tone::new(Color::BrightBlack, AnsiColor::BrightBlack),
    key: Tone::new(Color::BrightCyan, AnsiColor::BrightCyan),
    saved: Tone::new(Color::Green, AnsiColor::Green),
    warning: Tone::new(Color::Yellow, AnsiColor::Yellow),
    rejected: Tone::new(Color::Red, AnsiColor::Red),
    note: Tone::new(Color::Blue, AnsiColor::Blue),
};

pub struct Marks {
    pub saved: &'static str,
    pub rejected: &'static str,
    pub warning: &'static str,
    pub note: &'static str,
    pub step: &'static str,
    pub bullet: &'static str,
    /// Marks an Aggregation reference in `schema references`.
    pub owned: &'static str,
}

pub const MARKS: Marks = Marks {
    saved: "✓",
    rejected: "✗",
    warning: "⚠",
    note: "ℹ",
    step: "→",
    bullet: "•",
    owned: "🔒",
};

/// Whether the terminal honours colors, after `NO_COLOR`/`CLICOLOR` overrides.
pub static USE_COLOR: Lazy<bool> = Lazy::new(|| ShouldColorize::from_env().should_colorize());

pub fn paint(text: &str, tone: Tone, bold: bool) -> String {
    match (*USE_COLOR, bold) {
        (false, _) => text.to_string(),
        (true, false) => text.color(tone.text).to_string(),
        (true, true) => text.color(tone.text).bold().to_string(),
    }
}

pub fn help_styles() -> Styles {
    Styles::styled()
        .usage(PALETTE.title.style().bold())
        .header(PALETTE.heading.style().bold())
        .literal(PALETTE.command.style())
        .placeholder(PALETTE.muted.style())
        .valid(PALETTE.saved.style())
        .invalid(PALETTE.warning.style())
        .error(PALETTE.rejected.style().bold())
}
