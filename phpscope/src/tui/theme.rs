//! TUI color theme
//!
//! HUD-inspired color scheme for the terminal interface

use ratatui::style::Color;

pub const HUD_GREEN: Color = Color::Rgb(0, 255, 0);
pub const CRITICAL_RED: Color = Color::Rgb(255, 0, 0);
pub const CAUTION_AMBER: Color = Color::Rgb(255, 191, 0);
pub const INFO_DIM: Color = Color::Rgb(0, 180, 0);
pub const BACKGROUND: Color = Color::Rgb(0, 20, 0);

/// Selection brackets around the highlighted row
pub const SEL_LEFT: &str = "<";
pub const SEL_RIGHT: &str = ">";

/// Color for a table's share of its total
/// - Above 40%: Critical (Red)
/// - Above 20%: Caution (Amber)
/// - Otherwise: Normal (Green)
#[must_use]
pub fn severity_color(percentage: f64) -> Color {
    if percentage > 40.0 {
        CRITICAL_RED
    } else if percentage > 20.0 {
        CAUTION_AMBER
    } else {
        HUD_GREEN
    }
}

/// Severity marker and color for a row's share of its table
#[must_use]
pub fn severity_marker(percentage: f64) -> (&'static str, Color) {
    if percentage > 40.0 {
        ("[X]", CRITICAL_RED)
    } else if percentage > 20.0 {
        ("[!]", CAUTION_AMBER)
    } else {
        ("[-]", HUD_GREEN)
    }
}

/// Horizontal gauge of `width` cells filled to `percentage`
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn gauge_bar(percentage: f64, width: usize) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("{}{}", "▓".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_bar_bounds() {
        assert_eq!(gauge_bar(0.0, 4), "░░░░");
        assert_eq!(gauge_bar(50.0, 4), "▓▓░░");
        assert_eq!(gauge_bar(250.0, 4), "▓▓▓▓");
    }
}
