//! # Terminal User Interface (TUI)
//!
//! Live dashboard using `ratatui`. The probe loop publishes an
//! [`EngineSnapshot`] a few times per second over a bounded channel; the TUI
//! thread renders whatever snapshot is newest.
//!
//! ## View Modes
//!
//! - **Dashboard** - status, top compiled directories, exceptions, histograms
//! - **`DrillDown`** - frozen detail of the selected row
//! - **Search** - filter the focused table by key
//! - **Help** - keyboard shortcuts
//!
//! ## Sub-Modules
//!
//! - `counts` - scrollable count tables
//! - `histogram` - exp2 histogram bars
//! - `status` - engine counters
//! - `theme` - color scheme

// TUI rendering intentionally uses precision-losing casts and long functions for clarity
#![allow(clippy::cast_precision_loss, clippy::too_many_lines, clippy::needless_pass_by_value)]

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use std::io;
use std::time::{Duration, Instant};

pub mod counts; // Public for testing
mod histogram;
mod status;
mod theme;

use counts::CountTable;
use histogram::HistogramPanel;
use status::StatusPanel;
use theme::{severity_color, BACKGROUND, CAUTION_AMBER, CRITICAL_RED, HUD_GREEN, INFO_DIM};

use crate::aggregation::{CountEntry, EngineSnapshot};
use crate::domain::Pid;

// =============================================================================
// STYLE CONSTANTS
// =============================================================================

const STYLE_HEADING: Style = Style::new().fg(HUD_GREEN).add_modifier(Modifier::BOLD);
const STYLE_LABEL: Style = Style::new().fg(CAUTION_AMBER).add_modifier(Modifier::BOLD);
const STYLE_DIM: Style = Style::new().fg(INFO_DIM);
const STYLE_KEY: Style = Style::new().fg(CAUTION_AMBER);
const STYLE_TEXT: Style = Style::new().fg(ratatui::style::Color::White);

// =============================================================================
// VIEW MODES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum ViewMode {
    Dashboard,
    /// Detail of a single row (frozen snapshot)
    DrillDown,
    /// Text input for filtering the focused table
    Search,
    Help,
}

/// Which table receives navigation keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Files,
    Exceptions,
}

/// Which exception counter the exceptions table shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ExceptionView {
    #[default]
    Thrown,
    Caught,
}

/// Row captured when the drill-down opened
#[derive(Debug, Clone)]
struct FrozenRow {
    table: &'static str,
    entry: CountEntry,
    rank: usize,
    table_total: u64,
    distinct: usize,
}

// =============================================================================
// LIVE MODE (LiveApp)
// =============================================================================

struct LiveApp {
    snapshot: Option<EngineSnapshot>,
    files: CountTable,
    exceptions: CountTable,
    focus: Focus,
    exception_view: ExceptionView,

    view_mode: ViewMode,
    search_query: String,
    should_quit: bool,

    frozen_row: Option<FrozenRow>,
}

impl LiveApp {
    fn new() -> Self {
        Self {
            snapshot: None,
            files: CountTable::new("COMPILED DIRS"),
            exceptions: CountTable::new("THROWN"),
            focus: Focus::Files,
            exception_view: ExceptionView::default(),
            view_mode: ViewMode::Dashboard,
            search_query: String::new(),
            should_quit: false,
            frozen_row: None,
        }
    }

    fn focused_table(&mut self) -> &mut CountTable {
        match self.focus {
            Focus::Files => &mut self.files,
            Focus::Exceptions => &mut self.exceptions,
        }
    }

    fn exception_entries(&self) -> &[CountEntry] {
        match (&self.snapshot, self.exception_view) {
            (Some(s), ExceptionView::Thrown) => s.exceptions_thrown.as_slice(),
            (Some(s), ExceptionView::Caught) => s.exceptions_caught.as_slice(),
            (None, _) => &[],
        }
    }

    /// Swap in a new snapshot and refresh the tables
    fn apply_snapshot(&mut self, snapshot: EngineSnapshot) {
        self.files.update(&snapshot.compiled_files);
        self.snapshot = Some(snapshot);
        let entries = self.exception_entries().to_vec();
        self.exceptions.update(&entries);
    }

    fn toggle_exception_view(&mut self) {
        self.exception_view = match self.exception_view {
            ExceptionView::Thrown => ExceptionView::Caught,
            ExceptionView::Caught => ExceptionView::Thrown,
        };
        self.exceptions = CountTable::new(match self.exception_view {
            ExceptionView::Thrown => "THROWN",
            ExceptionView::Caught => "CAUGHT",
        });
        let entries = self.exception_entries().to_vec();
        self.exceptions.update(&entries);
    }

    fn freeze_selected(&self) -> Option<FrozenRow> {
        let (table, name) = match self.focus {
            Focus::Files => (&self.files, "Compiled directory"),
            Focus::Exceptions => (&self.exceptions, "Exception class"),
        };
        let entry = table.get_selected()?.clone();
        let all = match self.focus {
            Focus::Files => self.snapshot.as_ref().map_or(&[][..], |s| s.compiled_files.as_slice()),
            Focus::Exceptions => self.exception_entries(),
        };
        let rank = all.iter().position(|e| e.key == entry.key).map_or(0, |i| i + 1);
        let table_total = all.iter().fold(0u64, |acc, e| acc.saturating_add(e.count));
        Some(FrozenRow { table: name, entry, rank, table_total, distinct: all.len() })
    }

    fn handle_key(&mut self, key: KeyCode) {
        match self.view_mode {
            ViewMode::Dashboard => match key {
                KeyCode::Char('q' | 'Q') => self.should_quit = true,
                KeyCode::Up => self.focused_table().scroll_up(),
                KeyCode::Down => self.focused_table().scroll_down(),
                KeyCode::Tab => {
                    self.focus = match self.focus {
                        Focus::Files => Focus::Exceptions,
                        Focus::Exceptions => Focus::Files,
                    };
                }
                KeyCode::Char('t' | 'T') => self.toggle_exception_view(),
                KeyCode::Enter => {
                    self.frozen_row = self.freeze_selected();
                    if self.frozen_row.is_some() {
                        self.view_mode = ViewMode::DrillDown;
                    }
                }
                KeyCode::Char('/') => {
                    self.view_mode = ViewMode::Search;
                    self.search_query.clear();
                }
                KeyCode::Char('c' | 'C') => self.focused_table().clear_filter(),
                KeyCode::Char('?') => self.view_mode = ViewMode::Help,
                _ => {}
            },
            ViewMode::Search => match key {
                KeyCode::Esc => {
                    self.view_mode = ViewMode::Dashboard;
                    self.search_query.clear();
                }
                KeyCode::Enter => {
                    let query = std::mem::take(&mut self.search_query);
                    self.focused_table().apply_filter(&query);
                    self.view_mode = ViewMode::Dashboard;
                }
                KeyCode::Backspace => {
                    self.search_query.pop();
                }
                KeyCode::Char(c) => self.search_query.push(c),
                _ => {}
            },
            ViewMode::Help => self.view_mode = ViewMode::Dashboard,
            ViewMode::DrillDown => {
                if matches!(key, KeyCode::Esc | KeyCode::Char('q' | 'Q')) {
                    self.view_mode = ViewMode::Dashboard;
                    self.frozen_row = None;
                }
            }
        }
    }
}

// =============================================================================
// OVERLAY RENDERERS
// =============================================================================

fn render_help_overlay(f: &mut ratatui::Frame, area: Rect) {
    let popup_area = centered_popup(area, 80, 24);

    let help_text = vec![
        Line::from(""),
        Line::from(Span::styled("  What You're Looking At", STYLE_HEADING)),
        Line::from(Span::styled(
            "  phpscope counts events fired by PHP and libmemcached probes.",
            STYLE_DIM,
        )),
        Line::from(""),
        Line::from(Span::styled("  How to Read It", STYLE_HEADING)),
        Line::from(vec![
            Span::styled("  Compiled  ", STYLE_LABEL),
            Span::styled("Directories whose files PHP compiled. Busy ones miss OPcache.", STYLE_DIM),
        ]),
        Line::from(vec![
            Span::styled("  Thrown    ", STYLE_LABEL),
            Span::styled("Exception classes thrown (T toggles caught).", STYLE_DIM),
        ]),
        Line::from(vec![
            Span::styled("  Latency   ", STYLE_LABEL),
            Span::styled("Request start to end, per thread, in microseconds.", STYLE_DIM),
        ]),
        Line::from(vec![
            Span::styled("  Values    ", STYLE_LABEL),
            Span::styled("Sizes of values stored through memcached_set.", STYLE_DIM),
        ]),
        Line::from(""),
        Line::from(Span::styled("  No Events?", STYLE_HEADING)),
        Line::from(Span::styled(
            "  PHP only fires its probes when started with USE_ZEND_DTRACE=1",
            STYLE_DIM,
        )),
        Line::from(Span::styled("  or when phpscope was given --pid.", STYLE_DIM)),
        Line::from(""),
        Line::from(Span::styled("  Keys", STYLE_HEADING)),
        Line::from(vec![
            Span::styled("  ↑↓", STYLE_KEY),
            Span::styled(" Select   ", STYLE_TEXT),
            Span::styled("Tab", STYLE_KEY),
            Span::styled(" Focus   ", STYLE_TEXT),
            Span::styled("Enter", STYLE_KEY),
            Span::styled(" Inspect   ", STYLE_TEXT),
            Span::styled("/", STYLE_KEY),
            Span::styled(" Search   ", STYLE_TEXT),
            Span::styled("Q", STYLE_KEY),
            Span::styled(" Quit", STYLE_TEXT),
        ]),
        Line::from(""),
        Line::from(Span::styled("  Press any key to close", STYLE_DIM)),
    ];

    let help_widget = Paragraph::new(help_text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Help ")
            .style(Style::new().bg(ratatui::style::Color::Black).fg(HUD_GREEN)),
    );

    f.render_widget(ratatui::widgets::Clear, popup_area);
    f.render_widget(help_widget, popup_area);
}

/// Create a centered popup area with given width percentage and height in lines
fn centered_popup(area: Rect, width_percent: u16, height_lines: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Fill(1), Constraint::Length(height_lines), Constraint::Fill(1)])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn render_drilldown_overlay(f: &mut ratatui::Frame, area: Rect, row: &FrozenRow) {
    let popup_area = centered_popup(area, 70, 14);
    let separator = "─".repeat(popup_area.width.saturating_sub(4) as usize);

    let share = if row.table_total == 0 {
        0.0
    } else {
        row.entry.count as f64 / row.table_total as f64 * 100.0
    };

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(row.table.to_uppercase(), STYLE_HEADING)),
        Line::from(separator.as_str()),
        Line::from(""),
        Line::from(vec![
            Span::styled("Key: ", STYLE_LABEL),
            Span::styled(row.entry.key.clone(), Style::new().fg(HUD_GREEN)),
        ]),
        Line::from(vec![
            Span::styled("Count: ", STYLE_LABEL),
            Span::styled(row.entry.count.to_string(), Style::new().fg(HUD_GREEN)),
            Span::styled(format!(" of {}", row.table_total), STYLE_DIM),
        ]),
        Line::from(vec![
            Span::styled("Share: ", STYLE_LABEL),
            Span::styled(format!("{share:.1}%"), Style::new().fg(severity_color(share))),
        ]),
        Line::from(vec![
            Span::styled("Rank: ", STYLE_LABEL),
            Span::styled(format!("#{} of {}", row.rank, row.distinct), STYLE_DIM),
        ]),
        Line::from(""),
        Line::from(vec![Span::styled("ESC", STYLE_KEY), Span::styled(" to close", STYLE_DIM)]),
    ];

    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Detail ")
            .style(Style::new().bg(ratatui::style::Color::Black).fg(HUD_GREEN)),
    );

    f.render_widget(ratatui::widgets::Clear, popup_area);
    f.render_widget(widget, popup_area);
}

fn render_search_overlay(f: &mut ratatui::Frame, area: Rect, query: &str) {
    let popup_area = centered_popup(area, 60, 3);

    let search_widget = Paragraph::new(format!("Search: {query}_"))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Filter (Enter to apply, Esc to cancel)")
                .style(Style::default().bg(ratatui::style::Color::Black).fg(HUD_GREEN)),
        )
        .style(Style::default().fg(CAUTION_AMBER));

    f.render_widget(ratatui::widgets::Clear, popup_area);
    f.render_widget(search_widget, popup_area);
}

// =============================================================================
// LIVE MODE ENTRY POINT
// =============================================================================

/// Run the live dashboard until the user quits or the sender is dropped
///
/// # Errors
/// Returns an error if terminal setup or rendering fails
pub fn run_live(snapshot_rx: Receiver<EngineSnapshot>, pid: Option<Pid>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = LiveApp::new();
    let started = Instant::now();
    let mut last_update = Instant::now();
    const UPDATE_INTERVAL: Duration = Duration::from_millis(100);

    loop {
        // Keep only the newest snapshot
        loop {
            match snapshot_rx.try_recv() {
                Ok(snapshot) => app.apply_snapshot(snapshot),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    app.should_quit = true;
                    break;
                }
            }
        }

        if last_update.elapsed() >= UPDATE_INTERVAL {
            let snapshot = app.snapshot.clone().unwrap_or_else(empty_snapshot);
            let elapsed = started.elapsed().as_secs_f64();

            terminal.draw(|f| {
                f.render_widget(Block::default().style(Style::new().bg(BACKGROUND)), f.area());

                let outer_layout = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
                    .split(f.area());

                let pid_display = pid.map_or_else(|| "PID:all".to_string(), |p| p.to_string());
                let events = snapshot.dispatch.dispatched;
                let rate = if elapsed > 0.0 { events as f64 / elapsed } else { 0.0 };
                let header = Paragraph::new(vec![Line::from(vec![
                    Span::styled("PHPSCOPE", STYLE_HEADING),
                    Span::styled(" | ", STYLE_DIM),
                    Span::styled("[LIVE]", Style::new().fg(CRITICAL_RED).add_modifier(Modifier::BOLD)),
                    Span::styled(" | ", STYLE_DIM),
                    Span::styled(pid_display, Style::new().fg(HUD_GREEN)),
                    Span::styled(" | ", STYLE_DIM),
                    Span::styled(format!("{elapsed:.1}s"), Style::new().fg(HUD_GREEN)),
                    Span::styled(" | ", STYLE_DIM),
                    Span::styled(format!("{events} evts"), Style::new().fg(CAUTION_AMBER)),
                    Span::styled(format!(" ({rate:.0}/s)"), STYLE_DIM),
                ])])
                .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(CRITICAL_RED)));
                f.render_widget(header, outer_layout[0]);

                let rows = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                    .split(outer_layout[1]);
                let top_cols = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
                    .split(rows[0]);
                let bottom_cols = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([
                        Constraint::Percentage(40),
                        Constraint::Percentage(30),
                        Constraint::Percentage(30),
                    ])
                    .split(rows[1]);

                StatusPanel::new(&snapshot).render(f, top_cols[0]);
                app.files.render(f, top_cols[1], app.focus == Focus::Files);
                app.exceptions.render(f, bottom_cols[0], app.focus == Focus::Exceptions);
                HistogramPanel::new("Request latency", "us", &snapshot.request_latency_us)
                    .render(f, bottom_cols[1]);
                HistogramPanel::new("Value size", "B", &snapshot.value_sizes).render(f, bottom_cols[2]);

                match app.view_mode {
                    ViewMode::Search => render_search_overlay(f, f.area(), &app.search_query),
                    ViewMode::Help => render_help_overlay(f, f.area()),
                    ViewMode::DrillDown => {
                        if let Some(ref row) = app.frozen_row {
                            render_drilldown_overlay(f, f.area(), row);
                        }
                    }
                    ViewMode::Dashboard => {}
                }

                let mode_indicator = match app.view_mode {
                    ViewMode::Search => Span::styled("[Search]", Style::new().fg(CAUTION_AMBER)),
                    ViewMode::DrillDown => Span::styled("[Detail]", Style::new().fg(CAUTION_AMBER)),
                    _ if events > 0 => Span::styled("[Live]", Style::new().fg(CRITICAL_RED)),
                    _ => Span::styled("[Waiting]", STYLE_DIM),
                };

                let status_line = Line::from(vec![
                    Span::styled("Q", STYLE_KEY),
                    Span::styled(":Quit ", STYLE_DIM),
                    Span::styled("Tab", STYLE_KEY),
                    Span::styled(":Focus ", STYLE_DIM),
                    Span::styled("T", STYLE_KEY),
                    Span::styled(":Thrown/Caught ", STYLE_DIM),
                    Span::styled("Enter", STYLE_KEY),
                    Span::styled(":Detail ", STYLE_DIM),
                    Span::styled("/", STYLE_KEY),
                    Span::styled(":Search ", STYLE_DIM),
                    Span::styled("?", STYLE_KEY),
                    Span::styled(":Help ", STYLE_DIM),
                    mode_indicator,
                ]);

                let status = Paragraph::new(vec![status_line])
                    .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(HUD_GREEN)));
                f.render_widget(status, outer_layout[2]);
            })?;

            last_update = Instant::now();
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code);
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

/// Placeholder shown until the first snapshot arrives
fn empty_snapshot() -> EngineSnapshot {
    crate::aggregation::Dispatcher::new(
        std::sync::Arc::new(crate::aggregation::Aggregates::default()),
        crate::aggregation::KeyNormalizer::Directory,
    )
    .snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(thrown: &[(&str, u64)], caught: &[(&str, u64)]) -> EngineSnapshot {
        let mut snapshot = empty_snapshot();
        snapshot.exceptions_thrown = CountEntry::sorted(thrown.to_vec());
        snapshot.exceptions_caught = CountEntry::sorted(caught.to_vec());
        snapshot.compiled_files = CountEntry::sorted(vec![("/srv/app", 9), ("/srv/lib", 1)]);
        snapshot
    }

    #[test]
    fn test_toggle_exception_view_swaps_rows() {
        let mut app = LiveApp::new();
        app.apply_snapshot(snapshot_with(&[("PDOException", 3)], &[("LogicException", 1)]));
        assert_eq!(app.exceptions.entries[0].key, "PDOException");

        app.handle_key(KeyCode::Char('t'));
        assert_eq!(app.exception_view, ExceptionView::Caught);
        assert_eq!(app.exceptions.entries[0].key, "LogicException");
    }

    #[test]
    fn test_tab_moves_navigation_focus() {
        let mut app = LiveApp::new();
        app.apply_snapshot(snapshot_with(&[("A", 2), ("B", 1)], &[]));

        app.handle_key(KeyCode::Down);
        assert_eq!(app.files.selected_index, 1);
        assert_eq!(app.exceptions.selected_index, 0);

        app.handle_key(KeyCode::Tab);
        app.handle_key(KeyCode::Down);
        assert_eq!(app.exceptions.selected_index, 1);
    }

    #[test]
    fn test_drilldown_freezes_selected_row() {
        let mut app = LiveApp::new();
        app.apply_snapshot(snapshot_with(&[], &[]));
        app.handle_key(KeyCode::Enter);
        assert_eq!(app.view_mode, ViewMode::DrillDown);

        let row = app.frozen_row.clone().expect("row frozen");
        assert_eq!(row.entry.key, "/srv/app");
        assert_eq!(row.rank, 1);
        assert_eq!(row.table_total, 10);

        app.handle_key(KeyCode::Esc);
        assert_eq!(app.view_mode, ViewMode::Dashboard);
        assert!(app.frozen_row.is_none());
    }

    #[test]
    fn test_search_filters_focused_table() {
        let mut app = LiveApp::new();
        app.apply_snapshot(snapshot_with(&[], &[]));
        app.handle_key(KeyCode::Char('/'));
        for c in "lib".chars() {
            app.handle_key(KeyCode::Char(c));
        }
        app.handle_key(KeyCode::Enter);
        assert!(app.files.is_filtered());
        assert_eq!(app.files.entries.len(), 1);
    }
}
