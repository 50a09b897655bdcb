use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::theme::{gauge_bar, HUD_GREEN, INFO_DIM};
use crate::aggregation::{BucketCount, HistogramSnapshot};

/// Exponential histogram panel - one bar per occupied bucket
pub struct HistogramPanel<'a> {
    title: &'a str,
    unit: &'a str,
    hist: &'a HistogramSnapshot,
}

/// Compact bucket range label, e.g. `4K-8K`
fn range_label(bucket: &BucketCount) -> String {
    match bucket.upper {
        Some(upper) => format!("{}-{}", human(bucket.lower), human(upper)),
        None => format!("{}+", human(bucket.lower)),
    }
}

fn human(value: u64) -> String {
    match value {
        v if v >= 1 << 30 && v % (1 << 30) == 0 => format!("{}G", v >> 30),
        v if v >= 1 << 20 && v % (1 << 20) == 0 => format!("{}M", v >> 20),
        v if v >= 1 << 10 && v % (1 << 10) == 0 => format!("{}K", v >> 10),
        v => v.to_string(),
    }
}

impl<'a> HistogramPanel<'a> {
    #[must_use]
    pub fn new(title: &'a str, unit: &'a str, hist: &'a HistogramSnapshot) -> Self {
        Self { title, unit, hist }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn render(&self, f: &mut Frame, area: Rect) {
        let mean = if self.hist.count == 0 {
            0.0
        } else {
            self.hist.sum as f64 / self.hist.count as f64
        };

        let mut lines = vec![Line::from(vec![
            Span::styled("Samples ", Style::default().fg(INFO_DIM)),
            Span::styled(self.hist.count.to_string(), Style::default().fg(HUD_GREEN)),
            Span::raw("  "),
            Span::styled("Mean ", Style::default().fg(INFO_DIM)),
            Span::styled(format!("{mean:.1}{}", self.unit), Style::default().fg(HUD_GREEN)),
        ])];

        let occupied = self.hist.occupied_range();
        if occupied.is_empty() {
            lines.push(Line::from(Span::styled(" (no samples yet)", Style::default().fg(INFO_DIM))));
        } else {
            lines.push(Line::from(Span::styled(
                format!("{:>13} {:>9}", self.unit, "count"),
                Style::default().fg(INFO_DIM).add_modifier(Modifier::BOLD),
            )));
        }

        let bar_width = (area.width as usize).saturating_sub(28).clamp(4, 40);
        let peak = self.hist.peak().max(1) as f64;
        let rows = (area.height as usize).saturating_sub(4);
        // Keep the tail when the panel is too short
        let skip = occupied.len().saturating_sub(rows);
        for bucket in &occupied[skip..] {
            let pct = bucket.count as f64 / peak * 100.0;
            lines.push(Line::from(vec![
                Span::styled(format!("{:>13} ", range_label(bucket)), Style::default().fg(INFO_DIM)),
                Span::styled(format!("{:>9} ", bucket.count), Style::default().fg(HUD_GREEN)),
                Span::styled(gauge_bar(pct, bar_width), Style::default().fg(HUD_GREEN)),
            ]));
        }

        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(self.title)
                .border_style(Style::default().fg(HUD_GREEN)),
        );

        f.render_widget(paragraph, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_label_uses_binary_units() {
        let bucket = BucketCount { index: 13, lower: 4096, upper: Some(8192), count: 1 };
        assert_eq!(range_label(&bucket), "4K-8K");

        let overflow = BucketCount { index: 22, lower: 1 << 21, upper: None, count: 1 };
        assert_eq!(range_label(&overflow), "2M+");

        let small = BucketCount { index: 2, lower: 2, upper: Some(4), count: 1 };
        assert_eq!(range_label(&small), "2-4");
    }
}
