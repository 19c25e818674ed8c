use crate::{
    config::AppConfig,
    engine::{UpdateOutcome, Updater},
    net::ConnectivityMonitor,
    svc::SystemServices,
    title::TitleId,
};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use std::{io, time::Duration};

const LIST_WIDTH: u16 = 46;

#[derive(Clone)]
struct Theme {
    accent: Color,
    border: Color,
    text: Color,
    muted: Color,
    success: Color,
    error: Color,
}

impl Theme {
    fn new() -> Self {
        Self {
            accent: Color::Rgb(120, 190, 255),
            border: Color::Rgb(65, 75, 90),
            text: Color::Rgb(220, 230, 240),
            muted: Color::Rgb(135, 145, 155),
            success: Color::Rgb(120, 220, 140),
            error: Color::Rgb(235, 100, 95),
        }
    }

    fn block(&self, title: &'static str) -> Block<'static> {
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(self.border))
            .title(Span::styled(
                title,
                Style::default()
                    .fg(self.accent)
                    .add_modifier(Modifier::BOLD),
            ))
    }
}

struct UiState {
    cursor: usize,
    status: String,
    wipe_dialog: bool,
    should_quit: bool,
}

pub fn run<S: SystemServices>(
    updater: &mut Updater<S>,
    monitor: &ConnectivityMonitor,
    config: &AppConfig,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, updater, monitor, config);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_loop<S: SystemServices>(
    terminal: &mut Terminal<impl Backend>,
    updater: &mut Updater<S>,
    monitor: &ConnectivityMonitor,
    config: &AppConfig,
) -> Result<()> {
    let mut state = UiState {
        cursor: 0,
        status: String::new(),
        wipe_dialog: false,
        should_quit: false,
    };

    if let Err(err) = updater.refresh() {
        state.status = format!("Refresh failed: {err}");
    }

    loop {
        sync_cursor(updater, &mut state);
        terminal.draw(|frame| draw(frame, updater, monitor, &state))?;

        if state.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                handle_key(updater, monitor, config, &mut state, key);
            }
        }
    }

    Ok(())
}

fn sync_cursor<S: SystemServices>(updater: &mut Updater<S>, state: &mut UiState) {
    let ids: Vec<TitleId> = updater
        .candidate_rows()
        .iter()
        .map(|(id, _)| *id)
        .collect();
    if ids.is_empty() {
        state.cursor = 0;
        updater.select(None);
        return;
    }
    if state.cursor >= ids.len() {
        state.cursor = ids.len() - 1;
    }
    updater.select(Some(ids[state.cursor]));
}

fn handle_key<S: SystemServices>(
    updater: &mut Updater<S>,
    monitor: &ConnectivityMonitor,
    config: &AppConfig,
    state: &mut UiState,
    key: KeyEvent,
) {
    if state.wipe_dialog {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                state.wipe_dialog = false;
                run_wipe(updater, state);
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.wipe_dialog = false;
                state.status = "Wipe cancelled.".to_string();
            }
            _ => {}
        }
        return;
    }

    let online = monitor.online();
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => state.should_quit = true,
        KeyCode::Up | KeyCode::Char('k') => {
            state.cursor = state.cursor.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            state.cursor = state.cursor.saturating_add(1);
        }
        KeyCode::Char('r') | KeyCode::Char('R') => match updater.refresh() {
            Ok(()) => state.status = "Version list reloaded.".to_string(),
            Err(err) => state.status = format!("Refresh failed: {err}"),
        },
        KeyCode::Char('f') | KeyCode::Char('F') => {
            if !online {
                state.status = "Offline: cannot fetch the manifest.".to_string();
                return;
            }
            match updater.fetch_remote() {
                Ok(()) => state.status = "Manifest fetched from CDN.".to_string(),
                Err(err) => state.status = format!("Fetch failed: {err}"),
            }
        }
        KeyCode::Enter | KeyCode::Char('u') | KeyCode::Char('U') => {
            if !online {
                state.status = "Offline: updates are disabled.".to_string();
                return;
            }
            if let Some(id) = updater.selected() {
                state.status = outcome_message(updater.update_one(id));
            }
        }
        KeyCode::Char('a') | KeyCode::Char('A') => {
            if !online {
                state.status = "Offline: updates are disabled.".to_string();
                return;
            }
            updater.update_all();
            state.status = "Bulk update pass finished.".to_string();
        }
        KeyCode::Char('x') | KeyCode::Char('X') => {
            if let Some(id) = updater.selected() {
                match updater.clear_launch_requirement(id) {
                    Ok(()) => state.status = "Launch requirement cleared.".to_string(),
                    Err(err) => state.status = format!("Clear failed: {err}"),
                }
            }
        }
        KeyCode::Char('w') | KeyCode::Char('W') => {
            if config.confirm_wipe {
                state.wipe_dialog = true;
            } else {
                run_wipe(updater, state);
            }
        }
        _ => {}
    }
}

fn run_wipe<S: SystemServices>(updater: &mut Updater<S>, state: &mut UiState) {
    match updater.wipe() {
        Ok(()) => state.status = "Resident version list wiped.".to_string(),
        Err(err) => state.status = format!("Wipe failed: {err}"),
    }
}

fn outcome_message(outcome: UpdateOutcome) -> String {
    match outcome {
        UpdateOutcome::Applied => "Update applied.".to_string(),
        UpdateOutcome::AlreadyInFlight => "Update already in progress; retry later.".to_string(),
        UpdateOutcome::TimedOut => "Update still pending; check back later.".to_string(),
        UpdateOutcome::Failed(code) => format!("Update failed: 0x{code:X}."),
    }
}

fn draw<S: SystemServices>(
    frame: &mut Frame<'_>,
    updater: &Updater<S>,
    monitor: &ConnectivityMonitor,
    state: &UiState,
) {
    let theme = Theme::new();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(8),
            Constraint::Length(1),
        ])
        .split(frame.size());

    draw_header(frame, &theme, monitor, layout[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(LIST_WIDTH), Constraint::Min(20)])
        .split(layout[1]);

    draw_list(frame, updater, &theme, state, body[0]);
    draw_detail(frame, updater, &theme, body[1]);
    draw_log(frame, updater, &theme, layout[2]);

    let status = Paragraph::new(state.status.as_str()).style(Style::default().fg(theme.muted));
    frame.render_widget(status, layout[3]);

    if state.wipe_dialog {
        draw_wipe_dialog(frame, &theme);
    }
}

fn draw_header(frame: &mut Frame<'_>, theme: &Theme, monitor: &ConnectivityMonitor, area: Rect) {
    let (label, color) = if monitor.online() {
        ("online", theme.success)
    } else {
        ("offline", theme.error)
    };
    let line = Line::from(vec![
        Span::styled(
            "patchdeck",
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(label, Style::default().fg(color)),
        Span::raw("  "),
        Span::styled(
            "u update · a update all · r reload · f fetch · x clear floor · w wipe · q quit",
            Style::default().fg(theme.muted),
        ),
    ]);
    frame.render_widget(Paragraph::new(line).block(theme.block("")), area);
}

fn draw_list<S: SystemServices>(
    frame: &mut Frame<'_>,
    updater: &Updater<S>,
    theme: &Theme,
    state: &UiState,
    area: Rect,
) {
    let rows = updater.candidate_rows();
    let items: Vec<ListItem> = rows
        .iter()
        .map(|(_, candidate)| {
            let style = if candidate.needs_launch_bump {
                Style::default().fg(theme.error)
            } else {
                Style::default().fg(theme.text)
            };
            ListItem::new(Span::styled(candidate.name.clone(), style))
        })
        .collect();

    let mut list_state = ListState::default();
    if !rows.is_empty() {
        list_state.select(Some(state.cursor.min(rows.len() - 1)));
    }

    let list = List::new(items)
        .block(theme.block("Pending updates"))
        .highlight_style(
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("» ");
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn draw_detail<S: SystemServices>(
    frame: &mut Frame<'_>,
    updater: &Updater<S>,
    theme: &Theme,
    area: Rect,
) {
    let block = theme.block("Title");
    let Some(id) = updater.selected() else {
        let empty = Paragraph::new(Span::styled(
            "No title selected.",
            Style::default().fg(theme.muted),
        ))
        .block(block);
        frame.render_widget(empty, area);
        return;
    };

    let view = updater.title_view(id);
    let thumbnail = match &view.thumbnail {
        Some(bytes) => format!("{} bytes", bytes.len()),
        None => "none".to_string(),
    };
    let mut lines = vec![
        Line::from(Span::styled(
            view.name.clone(),
            Style::default()
                .fg(theme.text)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("id        {id}"),
            Style::default().fg(theme.muted),
        )),
        Line::from(format!("installed {}", view.installed_version)),
        Line::from(format!("available {}", view.available_version)),
        Line::from(format!("required  {}", view.required_version)),
        Line::from(Span::styled(
            format!("thumbnail {thumbnail}"),
            Style::default().fg(theme.muted),
        )),
    ];
    if view.required_version > view.installed_version {
        lines.push(Line::from(Span::styled(
            "OS launch floor exceeds the installed version.",
            Style::default().fg(theme.error),
        )));
    }

    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
}

fn draw_log<S: SystemServices>(
    frame: &mut Frame<'_>,
    updater: &Updater<S>,
    theme: &Theme,
    area: Rect,
) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = updater
        .log_lines()
        .iter()
        .rev()
        .take(visible)
        .rev()
        .map(|line| Line::from(Span::styled(line.clone(), Style::default().fg(theme.muted))))
        .collect();
    frame.render_widget(Paragraph::new(lines).block(theme.block("Log")), area);
}

fn draw_wipe_dialog(frame: &mut Frame<'_>, theme: &Theme) {
    let area = centered_rect(54, 6, frame.size());
    frame.render_widget(Clear, area);
    let body = Paragraph::new(vec![
        Line::from("Wipe the resident version list?"),
        Line::from(Span::styled(
            "Only background OS processes can rebuild it.",
            Style::default().fg(theme.error),
        )),
        Line::from(Span::styled(
            "y confirm · n cancel",
            Style::default().fg(theme.muted),
        )),
    ])
    .block(theme.block("Confirm wipe"))
    .wrap(Wrap { trim: true });
    frame.render_widget(body, area);
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect {
        x,
        y,
        width: width.min(area.width),
        height: height.min(area.height),
    }
}
