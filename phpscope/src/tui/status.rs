use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::theme::{gauge_bar, CAUTION_AMBER, HUD_GREEN, INFO_DIM};
use crate::aggregation::EngineSnapshot;

/// Master Status panel - engine counters at a glance
pub struct StatusPanel {
    has_warnings: bool,
    compiles: u64,
    thrown: u64,
    caught: u64,
    requests_completed: u64,
    requests_pending: u64,
    unmatched_ends: u64,
    evicted: u64,
    unroutable: u64,
    /// Share of request ends that found their start
    match_rate: Option<f64>,
}

impl StatusPanel {
    #[allow(clippy::cast_precision_loss)]
    pub fn new(snapshot: &EngineSnapshot) -> Self {
        let req = &snapshot.requests;
        let ends = req.resolved + req.unmatched_ends;
        let match_rate = (ends > 0).then(|| req.resolved as f64 / ends as f64 * 100.0);

        let has_warnings = match_rate.is_some_and(|rate| rate < 90.0)
            || snapshot.compiled_files_evicted > 0
            || snapshot.dispatch.unroutable > 0;

        Self {
            has_warnings,
            compiles: snapshot.total_compiles(),
            thrown: snapshot.total_thrown(),
            caught: snapshot.total_caught(),
            requests_completed: req.resolved,
            requests_pending: req.pending,
            unmatched_ends: req.unmatched_ends,
            evicted: snapshot.compiled_files_evicted,
            unroutable: snapshot.dispatch.unroutable,
            match_rate,
        }
    }

    pub fn render(&self, f: &mut Frame, area: Rect) {
        let (status_text, status_color) = if self.has_warnings {
            ("[!] CAUTION", CAUTION_AMBER)
        } else {
            ("[-] NOMINAL", HUD_GREEN)
        };

        let stat = |label: &'static str, value: u64| {
            Line::from(vec![
                Span::styled(label, Style::default().fg(INFO_DIM)),
                Span::styled(value.to_string(), Style::default().fg(HUD_GREEN)),
            ])
        };

        let mut lines = vec![
            Line::from(Span::styled(
                format!(" {status_text}"),
                Style::default().fg(status_color).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            stat(" Compiles  ", self.compiles),
            stat(" Thrown    ", self.thrown),
            stat(" Caught    ", self.caught),
            stat(" Requests  ", self.requests_completed),
            stat(" Pending   ", self.requests_pending),
            stat(" Unmatched ", self.unmatched_ends),
        ];

        if self.evicted > 0 {
            lines.push(Line::from(vec![
                Span::styled(" Evicted   ", Style::default().fg(INFO_DIM)),
                Span::styled(self.evicted.to_string(), Style::default().fg(CAUTION_AMBER)),
            ]));
        }
        if self.unroutable > 0 {
            lines.push(Line::from(vec![
                Span::styled(" Dropped   ", Style::default().fg(INFO_DIM)),
                Span::styled(self.unroutable.to_string(), Style::default().fg(CAUTION_AMBER)),
            ]));
        }

        if let Some(rate) = self.match_rate {
            let bar_color = if rate < 90.0 { CAUTION_AMBER } else { HUD_GREEN };
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(" Matched ends", Style::default().fg(INFO_DIM))));
            lines.push(Line::from(vec![
                Span::raw(" "),
                Span::styled(gauge_bar(rate, 10), Style::default().fg(bar_color)),
                Span::styled(format!(" {rate:.0}%"), Style::default().fg(bar_color)),
            ]));
        }

        let border_color = if self.has_warnings { CAUTION_AMBER } else { HUD_GREEN };
        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Status")
                .border_style(Style::default().fg(border_color)),
        );

        f.render_widget(paragraph, area);
    }
}
