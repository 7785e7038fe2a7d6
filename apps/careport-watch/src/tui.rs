use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::Result;
use careport_live::{PagerState, VisibilitySignal};
use crossterm::cursor::{Hide, Show};
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Row, Table, Wrap};
use ratatui::{Frame, Terminal};
use tokio::sync::mpsc;
use tokio::time;
use tracing::debug;

use crate::Watched;

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Raw mode, alternate screen and focus reporting for as long as it lives.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableFocusChange, Hide)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = execute!(
            self.terminal.backend_mut(),
            DisableFocusChange,
            LeaveAlternateScreen,
            Show
        );
        let _ = disable_raw_mode();
    }
}

pub async fn run(watched: &Watched, visibility: &VisibilitySignal, title: &str) -> Result<()> {
    let mut session = TerminalSession::enter()?;
    session.terminal.clear()?;
    attach(visibility);

    let (event_tx, mut event_rx) = mpsc::channel(100);
    let reader = tokio::spawn(async move {
        loop {
            while event::poll(Duration::from_millis(0)).unwrap_or(false) {
                if let Ok(evt) = event::read() {
                    if event_tx.send(evt).await.is_err() {
                        return;
                    }
                }
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    });

    let mut redraw = time::interval(REDRAW_INTERVAL);
    let result = loop {
        tokio::select! {
            Some(evt) = event_rx.recv() => {
                if handle_event(&evt, watched, visibility) == Flow::Quit {
                    break Ok(());
                }
            }
            _ = redraw.tick() => {}
        }
        if let Err(err) = session.terminal.draw(|frame| draw(frame, watched, title)) {
            break Err(err.into());
        }
    };
    reader.abort();
    result
}

/// Views start before the terminal is ours; mark them shown once it is.
/// Focus events take over from here.
fn attach(visibility: &VisibilitySignal) {
    debug!("terminal attached");
    visibility.ready();
}

fn handle_event(evt: &Event, watched: &Watched, visibility: &VisibilitySignal) -> Flow {
    match evt {
        Event::FocusGained => {
            visibility.observe(false);
        }
        Event::FocusLost => {
            visibility.observe(true);
        }
        Event::Key(key) if key.kind == KeyEventKind::Press => return handle_key(key, watched),
        _ => {}
    }
    Flow::Continue
}

fn handle_key(key: &KeyEvent, watched: &Watched) -> Flow {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Flow::Quit;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
        KeyCode::Char('r') => watched.refresh(),
        KeyCode::Char('s') => watched.stop(),
        KeyCode::Left => watched.step_page(-1),
        KeyCode::Right => watched.step_page(1),
        other => debug!(key = ?other, "unbound key"),
    }
    Flow::Continue
}

fn draw(frame: &mut Frame, watched: &Watched, title: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    match watched {
        Watched::Table {
            table,
            pager,
            handle,
        } => {
            let status = handle.status();
            frame.render_widget(
                status_line(title, status.in_flight, status.timer_armed, status.fetches, status.failures),
                chunks[0],
            );
            draw_table(frame, chunks[1], &table.lock());
            frame.render_widget(Paragraph::new(pager_line(&pager.lock())), chunks[2]);
        }
        Watched::Fragment {
            selector,
            fragment,
            handle,
        } => {
            let status = handle.status();
            frame.render_widget(
                status_line(title, status.in_flight, status.timer_armed, status.fetches, status.failures),
                chunks[0],
            );
            let text = fragment.lock().text();
            frame.render_widget(
                Paragraph::new(text)
                    .wrap(Wrap { trim: true })
                    .block(Block::bordered().title(selector.as_str())),
                chunks[1],
            );
            frame.render_widget(Paragraph::new(KEY_HINTS), chunks[2]);
        }
    }
}

fn draw_table(frame: &mut Frame, area: Rect, table: &careport_live::HtmlTable) {
    let block = Block::bordered();
    if table.headers().is_empty() {
        frame.render_widget(
            Paragraph::new("table contains no column keys").block(block),
            area,
        );
        return;
    }
    let header = Row::new(table.headers().iter().map(|h| h.label.clone()))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = table
        .body()
        .rows
        .iter()
        .map(|row| Row::new(row.cells.clone()).style(row_style(&row.class)));
    let widths = vec![Constraint::Fill(1); table.headers().len()];
    frame.render_widget(Table::new(rows, widths).header(header).block(block), area);
}

fn row_style(class: &str) -> Style {
    match class {
        "odd" => Style::default().bg(Color::Indexed(236)),
        _ => Style::default(),
    }
}

fn poll_state(in_flight: bool, timer_armed: bool) -> &'static str {
    match (in_flight, timer_armed) {
        (true, _) => "fetching",
        (false, true) => "waiting",
        (false, false) => "stopped",
    }
}

fn status_line(
    title: &str,
    in_flight: bool,
    timer_armed: bool,
    fetches: u64,
    failures: u64,
) -> Paragraph<'static> {
    let state = poll_state(in_flight, timer_armed);
    let state_style = match state {
        "stopped" => Style::default().fg(Color::Yellow),
        _ => Style::default().fg(Color::Green),
    };
    let mut spans = vec![
        Span::styled(title.to_string(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(state, state_style),
        Span::raw(format!("  fetches {fetches}")),
    ];
    if failures > 0 {
        spans.push(Span::styled(
            format!("  failures {failures}"),
            Style::default().fg(Color::Red),
        ));
    }
    Paragraph::new(Line::from(spans))
}

const KEY_HINTS: &str = "q quit  r refresh  s stop";

fn pager_line(pager: &PagerState) -> Line<'static> {
    let previous = if pager.previous_hidden { "  " } else { "< " };
    let next = if pager.next_hidden { "  " } else { " >" };
    Line::from(format!(
        "{previous}{}{next}    {KEY_HINTS}  \u{2190}/\u{2192} page",
        pager.label
    ))
}
