use anyhow::{Context, Result};
use cavtc_daemon::{config::QueueConfig, Collection, Counts, Record, Store, Stored};
use chrono::{DateTime, Local};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode};
use humansize::{format_size, DECIMAL};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table, TableState, Tabs},
    Frame, Terminal,
};
use std::io::stdout;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use sysinfo::System;

/// Live view of a cavtc job store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Job store file (overrides the configuration)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Seconds between automatic refreshes
    #[arg(long, default_value_t = 2)]
    interval: u64,
}

struct App {
    store: Store,
    db_path: PathBuf,
    system: System,
    selected: Collection,
    rows: Vec<Stored<Record>>,
    counts: Counts,
    store_bytes: u64,
    last_refresh: DateTime<Local>,
    error: Option<String>,
    table_state: TableState,
    should_quit: bool,
}

impl App {
    fn new(store: Store, db_path: PathBuf) -> Self {
        Self {
            store,
            db_path,
            system: System::new(),
            selected: Collection::Queued,
            rows: Vec::new(),
            counts: Counts::default(),
            store_bytes: 0,
            last_refresh: Local::now(),
            error: None,
            table_state: TableState::default(),
            should_quit: false,
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.store_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        self.last_refresh = Local::now();

        // A busy store keeps the previous snapshot on screen
        let snapshot = self
            .store
            .counts()
            .and_then(|counts| self.store.list(self.selected).map(|rows| (counts, rows)));
        match snapshot {
            Ok((counts, rows)) => {
                self.counts = counts;
                self.rows = rows;
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    fn next_collection(&mut self) {
        self.selected = cycle(self.selected, 1);
        self.table_state = TableState::default();
        self.refresh();
    }

    fn previous_collection(&mut self) {
        self.selected = cycle(self.selected, Collection::ALL.len() - 1);
        self.table_state = TableState::default();
        self.refresh();
    }
}

fn cycle(current: Collection, step: usize) -> Collection {
    let all = Collection::ALL;
    let idx = all.iter().position(|c| *c == current).unwrap_or(0);
    all[(idx + step) % all.len()]
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = QueueConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    let store = Store::open(&cfg.db_path, cfg.busy_timeout())
        .with_context(|| format!("Failed to open job store: {}", cfg.db_path.display()))?;

    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(store, cfg.db_path.clone());
    let interval = Duration::from_secs(args.interval.max(1));
    let result = run(&mut terminal, &mut app, interval);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;

    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
    interval: Duration,
) -> Result<()> {
    app.refresh();
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                    KeyCode::Char('r') => app.refresh(),
                    KeyCode::Tab | KeyCode::Right => app.next_collection(),
                    KeyCode::BackTab | KeyCode::Left => app.previous_collection(),
                    KeyCode::Down | KeyCode::Char('j') => {
                        let next = app
                            .table_state
                            .selected()
                            .map_or(0, |i| (i + 1).min(app.rows.len().saturating_sub(1)));
                        app.table_state.select(Some(next));
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        let prev = app.table_state.selected().map_or(0, |i| i.saturating_sub(1));
                        app.table_state.select(Some(prev));
                    }
                    _ => {}
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }

        if last_tick.elapsed() >= interval {
            app.refresh();
            last_tick = Instant::now();
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let size = f.size();

    if size.height < 12 || size.width < 80 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 80x12.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // CPU / memory / store size
            Constraint::Length(3), // collection tabs
            Constraint::Min(3),    // rows
            Constraint::Length(3), // status
        ])
        .split(size);

    render_top_bar(f, app, chunks[0]);
    render_tabs(f, app, chunks[1]);
    render_table(f, app, chunks[2]);
    render_status_bar(f, app, chunks[3]);
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn render_top_bar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(area);

    let cpu_usage = clamp_percent(app.system.global_cpu_usage() as f64);
    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(cpu_usage as u16)
        .label(format!("{:.1}%", cpu_usage));
    f.render_widget(cpu_gauge, chunks[0]);

    let total_memory = app.system.total_memory();
    let memory_percent = if total_memory == 0 {
        0.0
    } else {
        clamp_percent(app.system.used_memory() as f64 / total_memory as f64 * 100.0)
    };
    let memory_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(memory_percent as u16)
        .label(format!("{:.1}%", memory_percent));
    f.render_widget(memory_gauge, chunks[1]);

    let store_info = Paragraph::new(format!(
        "{} ({})",
        format_size(app.store_bytes, DECIMAL),
        truncate_string(&app.db_path.display().to_string(), 30)
    ))
    .block(Block::default().borders(Borders::ALL).title("Store"));
    f.render_widget(store_info, chunks[2]);
}

fn render_tabs(f: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<String> = Collection::ALL
        .iter()
        .map(|c| format!("{} ({})", c, app.counts.get(*c)))
        .collect();
    let selected = Collection::ALL
        .iter()
        .position(|c| *c == app.selected)
        .unwrap_or(0);

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title("Collections"))
        .select(selected)
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, area);
}

/// Per-column display limits; paths and messages get the most room
fn column_limit(name: &str) -> usize {
    match name {
        "absolute_path" => 60,
        "failure_message" => 40,
        "working_dir" => 30,
        "worker_identity" => 20,
        _ => 25,
    }
}

fn render_table(f: &mut Frame, app: &mut App, area: Rect) {
    let columns = app.selected.columns();

    let header = Row::new(
        std::iter::once("id".to_string())
            .chain(columns.iter().map(|c| c.to_string()))
            .collect::<Vec<_>>(),
    )
    .style(Style::default().add_modifier(Modifier::BOLD))
    .height(1);

    let rows: Vec<Row> = app
        .rows
        .iter()
        .map(|row| {
            let cells = std::iter::once(row.id.to_string()).chain(
                row.record
                    .fields()
                    .into_iter()
                    .zip(columns.iter())
                    .map(|(value, name)| truncate_string(&value, column_limit(name))),
            );
            Row::new(cells.collect::<Vec<_>>()).height(1)
        })
        .collect();

    let widths: Vec<Constraint> = std::iter::once(Constraint::Length(6))
        .chain(columns.iter().map(|name| match *name {
            "absolute_path" | "failure_message" => Constraint::Min(20),
            _ => Constraint::Length(column_limit(name).min(25) as u16),
        }))
        .collect();

    let title = format!("{} ({} rows)", app.selected, app.rows.len());
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_spacing(1);

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let status_text = match &app.error {
        Some(e) => format!("Store error: {} | q=quit r=refresh", truncate_string(e, 60)),
        None => format!(
            "Total: {} | Refreshed {} | Tab=collection r=refresh q=quit",
            app.counts.total(),
            app.last_refresh.format("%H:%M:%S")
        ),
    };
    let style = if app.error.is_some() {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };

    let paragraph = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(style)
        .wrap(ratatui::widgets::Wrap { trim: true });
    f.render_widget(paragraph, area);
}

/// Shorten `s` to at most `max_len` characters, marking the cut with `...`
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let keep: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate_string("a.mkv", 10), "a.mkv");
        assert_eq!(truncate_string("/videos/long_name.mkv", 10), "/videos...");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_string("ビデオファイル.mkv", 6), "ビデオ...");
    }

    #[test]
    fn test_cycle_wraps() {
        assert_eq!(cycle(Collection::Queued, 1), Collection::Running);
        assert_eq!(cycle(Collection::Failed, 1), Collection::Queued);
        assert_eq!(cycle(Collection::Queued, Collection::ALL.len() - 1), Collection::Failed);
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(150.0), 100.0);
        assert_eq!(clamp_percent(-1.0), 0.0);
        assert_eq!(clamp_percent(42.5), 42.5);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_truncate_respects_limit(s in "\\PC{0,80}", max_len in 3usize..50) {
            let out = truncate_string(&s, max_len);
            prop_assert!(out.chars().count() <= max_len);
            if s.chars().count() <= max_len {
                prop_assert_eq!(out, s);
            } else {
                prop_assert!(out.ends_with("..."));
            }
        }
    }
}
