//! Live progress view for a verification run

use crate::proxy::{Anonymity, ProbeRecord, RunStats, VerifyEvent};
use crate::Result;
use anyhow::Context;
use crossterm::{
    cursor,
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Maximum number of verified proxies kept for display
const MAX_RECENT_PROXIES: usize = 100;

/// Raw mode and the alternate screen, undone on drop whatever the exit path
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let guard = TerminalGuard;
        execute!(io::stdout(), EnterAlternateScreen, EnableMouseCapture)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            io::stdout(),
            LeaveAlternateScreen,
            DisableMouseCapture,
            cursor::Show
        );
    }
}

/// Wait for a run shown behind the progress view.
///
/// The run is always awaited, so its results get written even when the view
/// failed. An error from the run takes precedence over one from the view.
pub async fn finish_behind_view<T>(task: JoinHandle<Result<T>>, view: Result<()>) -> Result<T> {
    let value = task.await??;
    view.context("progress view failed; results were still written")?;
    Ok(value)
}

/// Progress TUI state, fed by scheduler events
pub struct ProgressApp {
    rx: UnboundedReceiver<VerifyEvent>,
    total: usize,
    checked: usize,
    workers: usize,
    batch: usize,
    batches: usize,
    http: usize,
    https: usize,
    socks5: usize,
    transparent: usize,
    common: usize,
    high: usize,
    unknown: usize,
    /// Most recent verified proxies, oldest first
    recent: VecDeque<ProbeRecord>,
    list_state: ListState,
    status_message: String,
    is_complete: bool,
    should_quit: bool,
}

impl ProgressApp {
    pub fn new(rx: UnboundedReceiver<VerifyEvent>) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            rx,
            total: 0,
            checked: 0,
            workers: 0,
            batch: 0,
            batches: 0,
            http: 0,
            https: 0,
            socks5: 0,
            transparent: 0,
            common: 0,
            high: 0,
            unknown: 0,
            recent: VecDeque::new(),
            list_state,
            status_message: "Waiting for candidates... Press 'q' to close the view.".to_string(),
            is_complete: false,
            should_quit: false,
        }
    }

    /// Run the TUI until the user closes it
    pub async fn run(&mut self) -> Result<()> {
        let _guard = TerminalGuard::enter()?;
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend)?;

        self.run_app(&mut terminal).await
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                        if self.should_quit {
                            break;
                        }
                    }
                }
            }

            self.drain_events();
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    /// Apply every event currently queued
    fn drain_events(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.is_complete {
                        self.is_complete = true;
                        self.status_message = format!(
                            "Run ended. Checked: {} | Valid: {} | Press 'q' to quit",
                            self.checked,
                            self.recent_total()
                        );
                    }
                    break;
                }
            }
        }
    }

    fn apply(&mut self, event: VerifyEvent) {
        match event {
            VerifyEvent::Started {
                total,
                workers,
                batches,
            } => {
                self.total = total;
                self.workers = workers;
                self.batches = batches;
            }
            VerifyEvent::BatchStarted { index, batches, .. } => {
                self.batch = index + 1;
                self.batches = batches;
            }
            VerifyEvent::Checked { done, total } => {
                self.checked = done;
                self.total = total;
                self.status_message = format!(
                    "Verifying... {}% ({}/{}) | batch {}/{} | workers: {} | valid: {}",
                    percent(done, total),
                    done,
                    total,
                    self.batch,
                    self.batches,
                    self.workers,
                    self.recent_total()
                );
            }
            VerifyEvent::Verified(record) => {
                self.http += 1;
                if record.https {
                    self.https += 1;
                }
                if record.socks5 {
                    self.socks5 += 1;
                }
                match record.anonymity {
                    Anonymity::Transparent => self.transparent += 1,
                    Anonymity::Common => self.common += 1,
                    Anonymity::High => self.high += 1,
                    Anonymity::Unknown => self.unknown += 1,
                }
                self.recent.push_back(record);
                if self.recent.len() > MAX_RECENT_PROXIES {
                    self.recent.pop_front();
                }
            }
            VerifyEvent::Finished(stats) => self.finish(stats),
        }
    }

    fn finish(&mut self, stats: RunStats) {
        self.is_complete = true;
        self.checked = stats.total;
        self.total = stats.total;
        self.status_message = format!(
            "Complete! Tested: {} | Valid: {} ({:.1}%) | Press 'q' to quit",
            stats.total,
            stats.valid,
            stats.success_rate()
        );
    }

    /// Verified proxies seen so far, including those scrolled out of `recent`
    fn recent_total(&self) -> usize {
        self.http
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Down => {
                let i = match self.list_state.selected() {
                    Some(i) if i + 1 < self.recent.len() => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let i = match self.list_state.selected() {
                    Some(0) | None => self.recent.len().saturating_sub(1),
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Verified list and breakdown
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new("Proxy Harvester")
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let progress = percent(self.checked, self.total);
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(progress)
            .label(format!("{}/{} ({}%)", self.checked, self.total, progress));
        f.render_widget(gauge, chunks[1]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(chunks[2]);

        let items: Vec<ListItem> = self
            .recent
            .iter()
            .rev()
            .map(|record| {
                ListItem::new(format!(
                    "{:<22} {:<18} {}",
                    record.endpoint.to_string(),
                    record.protocols(),
                    record.anonymity
                ))
                .style(Style::default().fg(anonymity_color(record.anonymity)))
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Verified ({})", self.recent_total()))
                    .border_style(
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");
        f.render_stateful_widget(list, body[0], &mut self.list_state);

        let breakdown = vec![
            Line::from(format!("http:        {}", self.http)),
            Line::from(format!("https:       {}", self.https)),
            Line::from(format!("socks5:      {}", self.socks5)),
            Line::from(""),
            Line::from(format!("transparent: {}", self.transparent)),
            Line::from(format!("common:      {}", self.common)),
            Line::from(format!("high:        {}", self.high)),
            Line::from(format!("unknown:     {}", self.unknown)),
        ];
        let breakdown = Paragraph::new(breakdown)
            .block(Block::default().borders(Borders::ALL).title("Breakdown"));
        f.render_widget(breakdown, body[1]);

        let status = Paragraph::new(self.status_message.clone())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }
}

fn percent(done: usize, total: usize) -> u16 {
    if total == 0 {
        0
    } else {
        (done as f64 / total as f64 * 100.0).min(100.0) as u16
    }
}

fn anonymity_color(level: Anonymity) -> Color {
    match level {
        Anonymity::High => Color::Green,
        Anonymity::Common => Color::Yellow,
        Anonymity::Transparent => Color::Red,
        Anonymity::Unknown => Color::Gray,
    }
}
