//! Count table panel - keys ranked by occurrence count.
//!
//! Used for compiled-file directories and exception classes. Each row is
//! one line:
//!
//! ```text
//! <[marker] key               1234  42.3%>
//! ```
//!
//! The marker reflects the row's share of the table total: `[-]` green,
//! `[!]` amber, `[X]` red.

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{block::BorderType, Block, Borders, Paragraph},
    Frame,
};

use super::theme::{severity_marker, CAUTION_AMBER, HUD_GREEN, INFO_DIM, SEL_LEFT, SEL_RIGHT};
use crate::aggregation::CountEntry;

/// Truncate a string for display, adding "..." if too long
fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

/// Calculate scroll offset to keep selected item visible
fn visible_scroll_offset(selected: usize, current_offset: usize, visible_count: usize) -> usize {
    if selected >= current_offset + visible_count {
        selected.saturating_sub(visible_count - 1)
    } else {
        current_offset.min(selected)
    }
}

/// Rows that fit inside a bordered block
fn visible_item_count(area: Rect, total_items: usize) -> usize {
    let available_height = area.height.saturating_sub(2) as usize;
    available_height.max(1).min(total_items.max(1))
}

fn render_row(
    is_selected: bool,
    marker: &'static str,
    color: Color,
    key: &str,
    key_width: usize,
    count: u64,
    percentage: f64,
) -> Line<'static> {
    let (sel_l, sel_r) = if is_selected { (SEL_LEFT, SEL_RIGHT) } else { (" ", " ") };
    let base_style = Style::default().fg(color);
    let key_style = if is_selected {
        base_style.add_modifier(Modifier::BOLD | Modifier::REVERSED)
    } else {
        base_style
    };

    Line::from(vec![
        Span::styled(sel_l, Style::default().fg(CAUTION_AMBER)),
        Span::styled(marker, base_style),
        Span::raw(" "),
        Span::styled(format!("{key:<key_width$}"), key_style),
        Span::styled(format!(" {count:>9}"), Style::default().fg(INFO_DIM)),
        Span::styled(format!(" {percentage:>5.1}%"), base_style),
        Span::styled(sel_r, Style::default().fg(CAUTION_AMBER)),
    ])
}

/// Case-insensitive substring filter over keys
fn filter_by_key(entries: &[CountEntry], query: &str) -> Vec<CountEntry> {
    match query {
        "" => entries.to_vec(),
        q => {
            let query_lower = q.to_lowercase();
            entries.iter().filter(|e| e.key.to_lowercase().contains(&query_lower)).cloned().collect()
        }
    }
}

/// Scrollable table of [`CountEntry`] rows.
///
/// The parent replaces the rows on every snapshot with [`CountTable::update`];
/// the selection and filter survive the refresh.
pub struct CountTable {
    title: &'static str,
    scroll_offset: usize,
    pub selected_index: usize,
    /// Rows currently shown (filtered)
    pub entries: Vec<CountEntry>,
    all_entries: Vec<CountEntry>,
    filter: Option<String>,
    /// Sum over all rows, used for the share column
    total: u64,
}

impl CountTable {
    #[must_use]
    pub fn new(title: &'static str) -> Self {
        Self {
            title,
            scroll_offset: 0,
            selected_index: 0,
            entries: Vec::new(),
            all_entries: Vec::new(),
            filter: None,
            total: 0,
        }
    }

    /// Replace rows with fresh data, keeping selection and filter
    pub fn update(&mut self, entries: &[CountEntry]) {
        self.total = entries.iter().fold(0u64, |acc, e| acc.saturating_add(e.count));
        self.all_entries = entries.to_vec();
        self.entries = match &self.filter {
            Some(query) => filter_by_key(&self.all_entries, query),
            None => self.all_entries.clone(),
        };
        self.selected_index = self.selected_index.min(self.entries.len().saturating_sub(1));
    }

    pub fn scroll_up(&mut self) {
        self.selected_index = self.selected_index.saturating_sub(1);
        self.scroll_offset = self.scroll_offset.min(self.selected_index);
    }

    pub fn scroll_down(&mut self) {
        self.selected_index = (self.selected_index + 1).min(self.entries.len().saturating_sub(1));
    }

    #[must_use]
    pub fn get_selected(&self) -> Option<&CountEntry> {
        self.entries.get(self.selected_index)
    }

    pub fn apply_filter(&mut self, query: &str) {
        if query.is_empty() {
            self.clear_filter();
            return;
        }
        self.entries = filter_by_key(&self.all_entries, query);
        self.filter = Some(query.to_string());
        self.selected_index = 0;
        self.scroll_offset = 0;
    }

    pub fn clear_filter(&mut self) {
        self.entries = self.all_entries.clone();
        self.filter = None;
        self.selected_index = 0;
        self.scroll_offset = 0;
    }

    #[must_use]
    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    #[allow(clippy::cast_precision_loss)]
    fn share(&self, count: u64) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }

    pub fn render(&mut self, f: &mut Frame, area: Rect, focused: bool) {
        let key_width = (area.width as usize).saturating_sub(26).clamp(8, 80);
        let display_count = visible_item_count(area, self.entries.len());
        self.scroll_offset =
            visible_scroll_offset(self.selected_index, self.scroll_offset, display_count);

        let mut lines: Vec<Line<'static>> = Vec::with_capacity(display_count);
        if self.entries.is_empty() {
            lines.push(Line::from(Span::styled(" (no events yet)", Style::default().fg(INFO_DIM))));
        }
        for (display_idx, entry) in
            self.entries.iter().skip(self.scroll_offset).take(display_count).enumerate()
        {
            let is_selected = focused && self.scroll_offset + display_idx == self.selected_index;
            let percentage = self.share(entry.count);
            let (marker, color) = severity_marker(percentage);
            let key = truncate_for_display(&entry.key, key_width);
            lines.push(render_row(is_selected, marker, color, &key, key_width, entry.count, percentage));
        }

        let title = match &self.filter {
            Some(query) => format!(
                "[ {} /{query} {}/{} ]",
                self.title,
                self.entries.len(),
                self.all_entries.len()
            ),
            None => format!("[ {} {} ]", self.title, self.all_entries.len()),
        };
        let border_color = if focused { CAUTION_AMBER } else { HUD_GREEN };

        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Plain)
                .title(title)
                .border_style(Style::default().fg(border_color)),
        );
        f.render_widget(paragraph, area);
    }
}
