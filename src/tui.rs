use std::{
    io::{self, Stdout},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use crossterm::{
    event::{
        self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, info, warn};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};

use crate::{
    board::{Board, BoardRow, RowId},
    config::AppConfig,
    confirm::{ApprovedChange, Confirmation},
    model::{SnapshotSet, TorrentAction},
    poller::{CycleTicket, Poller, PollerState},
    reconcile::{Cell, GlobalSummary, Reconciler, RowAction},
    rpc::{RpcResult, XdClient},
};

type Backend = ratatui::backend::CrosstermBackend<Stdout>;

const TICK_RATE: Duration = Duration::from_millis(250);

pub fn run(config: AppConfig) -> Result<()> {
    let client =
        XdClient::connect(&config.rpc).context("failed to construct XD RPC client")?;
    let mut terminal = setup_terminal()?;
    let (event_tx, event_rx) = unbounded();
    let (rpc_tx, rpc_rx) = unbounded();

    let input_handle = spawn_input_thread(event_tx.clone());
    let worker_handle = spawn_rpc_worker(client, rpc_rx, event_tx.clone());

    let mut app = App::new(&config);
    app.set_status(StatusUpdate::info("Connecting to XD…"));
    app.poller.start(Instant::now());

    let loop_result = run_loop(&mut terminal, &mut app, event_rx, rpc_tx.clone());

    app.poller.cancel();
    drop(rpc_tx);
    drop(event_tx);

    restore_terminal(&mut terminal)?;
    input_handle.join().ok();
    worker_handle.join().ok();

    loop_result
}

fn run_loop(
    terminal: &mut Terminal<Backend>,
    app: &mut App,
    events: Receiver<AppEvent>,
    rpc_tx: Sender<RpcCommand>,
) -> Result<()> {
    terminal.draw(|f| app.render(f))?;
    loop {
        let now = Instant::now();
        if let Some(ticket) = app.poller.poll_due(now) {
            if rpc_tx.send(RpcCommand::Fetch(ticket)).is_err() {
                app.poller.finish(ticket, now);
                app.set_status(StatusUpdate::error("RPC worker not available"));
            }
        }
        let wait = app
            .poller
            .time_until_due(now)
            .map_or(TICK_RATE, |due| due.min(TICK_RATE));
        match events.recv_timeout(wait) {
            Ok(event) => {
                if app.process_event(event, &rpc_tx)? {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
        terminal.draw(|f| app.render(f))?;
        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn setup_terminal() -> Result<Terminal<Backend>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<Backend>) -> Result<()> {
    disable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, DisableBracketedPaste, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(tx: Sender<AppEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if tx.send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(AppEvent::Status(StatusUpdate::error(format!(
                        "Input error: {err}"
                    ))));
                }
            },
            Ok(false) | Err(_) => {
                if tx.send(AppEvent::Tick).is_err() {
                    break;
                }
            }
        }
    })
}

fn spawn_rpc_worker(
    client: XdClient,
    rx: Receiver<RpcCommand>,
    tx: Sender<AppEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(cmd) = rx.recv() {
            handle_command(&client, cmd, &tx);
        }
    })
}

fn handle_command(client: &XdClient, cmd: RpcCommand, tx: &Sender<AppEvent>) {
    match cmd {
        RpcCommand::Fetch(ticket) => {
            let result = client.fetch_all_torrents();
            let _ = tx.send(AppEvent::Fetched { ticket, result });
        }
        RpcCommand::Change(change) => {
            let result = client.change_torrent(&change.infohash, change.action);
            let _ = tx.send(AppEvent::Changed { change, result });
        }
        RpcCommand::Add(url) => {
            let result = client.add_torrent_by_url(&url);
            let _ = tx.send(AppEvent::Added(result));
        }
    }
}

enum AppEvent {
    Input(Event),
    Tick,
    Fetched {
        ticket: CycleTicket,
        result: RpcResult<SnapshotSet>,
    },
    Changed {
        change: ApprovedChange,
        result: RpcResult<()>,
    },
    Added(RpcResult<()>),
    Status(StatusUpdate),
}

enum RpcCommand {
    Fetch(CycleTicket),
    Change(ApprovedChange),
    Add(String),
}

#[derive(Clone)]
struct StatusUpdate {
    text: String,
    level: StatusLevel,
}

impl StatusUpdate {
    fn info(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Info,
        }
    }

    fn success(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Success,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Warning,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Error,
        }
    }
}

#[derive(Clone, Copy)]
enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone)]
struct StatusMessage {
    text: String,
    level: StatusLevel,
    expires_at: Option<Instant>,
}

impl StatusMessage {
    fn from_update(update: StatusUpdate) -> Self {
        let duration = match update.level {
            StatusLevel::Info => Duration::from_secs(4),
            StatusLevel::Success => Duration::from_secs(5),
            StatusLevel::Warning => Duration::from_secs(6),
            StatusLevel::Error => Duration::from_secs(8),
        };
        Self {
            text: update.text,
            level: update.level,
            expires_at: Some(Instant::now() + duration),
        }
    }
}

struct App {
    connection_label: String,
    board: Board,
    reconciler: Reconciler<RowId>,
    poller: Poller,
    confirmation: Confirmation,
    summary: Option<GlobalSummary>,
    list_state: ListState,
    selected_id: Option<RowId>,
    status: Option<StatusMessage>,
    toast: Option<StatusMessage>,
    mode: InputMode,
    should_quit: bool,
}

impl App {
    fn new(config: &AppConfig) -> Self {
        Self {
            connection_label: config.rpc.endpoint(),
            board: Board::default(),
            reconciler: Reconciler::new(),
            poller: Poller::new(config.poll_interval),
            confirmation: Confirmation::new(config.silent_remove, config.delete_files),
            summary: None,
            list_state: ListState::default(),
            selected_id: None,
            status: None,
            toast: None,
            mode: InputMode::Normal,
            should_quit: false,
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(5),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(frame.size());
        self.render_header(frame, chunks[0]);
        self.render_body(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);
        self.render_toast(frame);
        match &self.mode {
            InputMode::Prompt(prompt) => {
                let area = centered_rect(60, 30, frame.size());
                let block = Block::default()
                    .title(Span::raw(" Add torrent "))
                    .borders(Borders::ALL);
                let mut text = vec![
                    Line::from("Enter a magnet or torrent URL and press Enter (Esc to cancel)"),
                    Line::from(format!("> {}", prompt.buffer)),
                ];
                if prompt.submitting {
                    text.push(Line::from(Span::styled(
                        "Submitting…",
                        Style::default().fg(Color::Blue),
                    )));
                } else if let Some(error) = &prompt.error {
                    text.push(Line::from(Span::styled(
                        error.clone(),
                        Style::default().fg(Color::Red),
                    )));
                }
                let paragraph = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
                frame.render_widget(Clear, area);
                frame.render_widget(paragraph, area);
            }
            InputMode::Confirm => {
                if let Some(request) = self.confirmation.request() {
                    let area = centered_rect(50, 30, frame.size());
                    let block = Block::default().title(" Remove torrent ").borders(Borders::ALL);
                    let name = self
                        .board
                        .rows()
                        .iter()
                        .find(|row| row.infohash == request.infohash)
                        .map(|row| row.text(Cell::Name).to_string())
                        .unwrap_or_else(|| request.infohash.clone());
                    let text = vec![
                        Line::from(format!("Remove '{name}'?")),
                        Line::from(format!(
                            "[{}] delete downloaded files (f)",
                            checkbox(request.delete_files)
                        )),
                        Line::from(format!(
                            "[{}] don't ask again (s)",
                            checkbox(self.confirmation.silent_choice())
                        )),
                        Line::from(Span::styled(
                            "Press y to confirm, n or Esc to cancel",
                            Style::default().fg(Color::Yellow),
                        )),
                    ];
                    let paragraph = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
                    frame.render_widget(Clear, area);
                    frame.render_widget(paragraph, area);
                }
            }
            InputMode::Help => {
                let area = centered_rect(70, 70, frame.size());
                let block = Block::default().title("Key Bindings").borders(Borders::ALL);
                let paragraph = Paragraph::new(help_lines())
                    .block(block)
                    .wrap(Wrap { trim: false });
                frame.render_widget(Clear, area);
                frame.render_widget(paragraph, area);
            }
            InputMode::Normal => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let mut polling = match self.poller.state() {
            PollerState::Running => format!("every {:.1}s", self.poller.interval().as_secs_f64()),
            PollerState::Idle => "paused".to_string(),
        };
        if self.poller.is_in_flight() {
            polling.push_str(", refreshing…");
        }
        let mut lines = vec![Line::from(vec![
            Span::styled("XD", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::raw(&self.connection_label),
            Span::raw("  |  "),
            Span::raw(format!("polling {polling}")),
        ])];
        match &self.summary {
            Some(summary) => lines.push(Line::from(summary.to_string())),
            None => lines.push(Line::from("Waiting for first refresh…")),
        }
        lines.push(Line::from(format!(
            "Cycles {}  Skipped ticks {}",
            self.poller.completed(),
            self.poller.skipped()
        )));
        if let Some(status) = &self.status {
            lines.push(Line::from(Span::styled(
                status.text.clone(),
                status_style(status.level),
            )));
        }
        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::raw(" Daemon ")),
        );
        frame.render_widget(paragraph, area);
    }

    fn render_body(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(area);
        self.render_list(frame, chunks[0]);
        self.render_detail(frame, chunks[1]);
    }

    fn render_list(&mut self, frame: &mut Frame, area: Rect) {
        let mut items = self
            .board
            .rows()
            .iter()
            .map(|row| ListItem::new(Line::from(row_line(row))))
            .collect::<Vec<_>>();
        if items.is_empty() {
            items.push(ListItem::new(Line::from("No torrents")));
        }
        let title = format!(" Torrents ({}) ", self.reconciler.filter().label());
        let block = Block::default().borders(Borders::ALL).title(Span::raw(title));
        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_detail(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(Span::raw(" Details "));
        let Some(row) = self.current_row() else {
            let paragraph = Paragraph::new("No torrent selected")
                .block(block)
                .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
            return;
        };
        let lines = vec![
            Line::from(Span::styled(
                row.text(Cell::Name).to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(format!("Infohash: {}", row.infohash)),
            Line::from(format!("State: {}", row.text(Cell::State))),
            Line::from(format!(
                "Progress: {}  Pieces {}",
                row.text(Cell::Progress),
                row.text(Cell::Pieces)
            )),
            Line::from(format!("Size: {}", row.text(Cell::Size))),
            Line::from(format!(
                "Transfer: {}  {}",
                row.text(Cell::Rate),
                row.text(Cell::Ratio)
            )),
            Line::from(format!("Peers: {}", row.text(Cell::Peers))),
        ];
        let paragraph = Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let mode_label = match &self.mode {
            InputMode::Normal => "NORMAL",
            InputMode::Prompt(_) => "PROMPT",
            InputMode::Confirm => "CONFIRM",
            InputMode::Help => "HELP",
        };
        let remove_mode = if self.confirmation.silent() {
            "silent"
        } else {
            "confirm"
        };
        let summary = Line::from(format!(
            "Mode {mode_label} | Filter {} | Remove {remove_mode}",
            self.reconciler.filter().label()
        ));
        let sections = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(14)])
            .split(area);
        frame.render_widget(Paragraph::new(summary).wrap(Wrap { trim: true }), sections[0]);
        let help_label =
            Paragraph::new(Line::from(Span::raw("Help [?]"))).alignment(Alignment::Right);
        frame.render_widget(help_label, sections[1]);
    }

    fn render_toast(&self, frame: &mut Frame) {
        if !matches!(self.mode, InputMode::Normal) {
            return;
        }
        let Some(toast) = &self.toast else {
            return;
        };
        let frame_area = frame.size();
        if frame_area.width < 20 || frame_area.height < 5 {
            return;
        }
        let padding = 2;
        let width = frame_area.width.saturating_sub(padding * 2).clamp(20, 60);
        let height = 3;
        let x = frame_area
            .x
            .saturating_add(frame_area.width.saturating_sub(width + padding));
        let y = frame_area
            .y
            .saturating_add(frame_area.height.saturating_sub(height + padding));
        let area = Rect::new(x, y, width, height);
        let text = Line::from(Span::styled(toast.text.clone(), status_style(toast.level)));
        let paragraph = Paragraph::new(text).alignment(Alignment::Center).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::raw(" Notice ")),
        );
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }

    fn process_event(&mut self, event: AppEvent, rpc_tx: &Sender<RpcCommand>) -> Result<bool> {
        match event {
            AppEvent::Input(event) => return self.handle_input(event, rpc_tx),
            AppEvent::Tick => self.expire_status(),
            AppEvent::Fetched { ticket, result } => self.apply_fetch(ticket, result),
            AppEvent::Changed { change, result } => match result {
                Ok(()) => {
                    info!("{} {}", change.action.rpc_value(), change.infohash);
                    self.set_status(StatusUpdate::success(format!(
                        "{} {}",
                        change.action.past_tense(),
                        short_hash(&change.infohash)
                    )));
                }
                Err(err) => {
                    warn!("{} {} failed: {err}", change.action.rpc_value(), change.infohash);
                    self.set_status(StatusUpdate::error(format!(
                        "{} failed: {err}",
                        change.action.rpc_value()
                    )));
                }
            },
            AppEvent::Added(result) => self.finish_add(result),
            AppEvent::Status(update) => self.set_status(update),
        }
        Ok(false)
    }

    fn apply_fetch(&mut self, ticket: CycleTicket, result: RpcResult<SnapshotSet>) {
        let now = Instant::now();
        if !self.poller.finish(ticket, now) {
            debug!("discarding result of a cancelled refresh");
            return;
        }
        match result {
            Ok(set) => {
                let report = self.reconciler.reconcile(&mut self.board, &set, now);
                debug!(
                    "reconciled: {} created, {} updated ({} cells), {} removed, {} skipped",
                    report.created,
                    report.updated,
                    report.cell_updates,
                    report.removed,
                    report.skipped
                );
                if report.skipped > 0 {
                    self.set_status(StatusUpdate::warning(format!(
                        "{} torrent(s) reported malformed data",
                        report.skipped
                    )));
                }
                self.summary = Some(report.summary);
                self.sync_selection();
            }
            Err(err) => {
                warn!("refresh failed: {err}");
                self.set_status(StatusUpdate::error(format!("Refresh failed: {err}")));
            }
        }
    }

    fn finish_add(&mut self, result: RpcResult<()>) {
        match result {
            Ok(()) => {
                if matches!(self.mode, InputMode::Prompt(_)) {
                    self.mode = InputMode::Normal;
                }
                self.set_status(StatusUpdate::success("Torrent added"));
            }
            Err(err) => {
                let message = err.to_string();
                if let InputMode::Prompt(prompt) = &mut self.mode {
                    prompt.submitting = false;
                    prompt.error = Some(message.clone());
                }
                self.set_status(StatusUpdate::error(message));
            }
        }
    }

    fn handle_input(&mut self, event: Event, rpc_tx: &Sender<RpcCommand>) -> Result<bool> {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    self.should_quit = true;
                    return Ok(true);
                }
                match &mut self.mode {
                    InputMode::Normal => return self.handle_normal_key(key, rpc_tx),
                    InputMode::Prompt(prompt) => {
                        if prompt.submitting {
                            return Ok(false);
                        }
                        match key.code {
                            KeyCode::Enter => {
                                let value = prompt.buffer.trim().to_string();
                                if value.is_empty() {
                                    self.mode = InputMode::Normal;
                                } else {
                                    prompt.submitting = true;
                                    prompt.error = None;
                                    if rpc_tx.send(RpcCommand::Add(value)).is_err() {
                                        self.mode = InputMode::Normal;
                                        self.set_status(StatusUpdate::error(
                                            "Failed to queue torrent add",
                                        ));
                                    }
                                }
                            }
                            KeyCode::Esc => self.mode = InputMode::Normal,
                            KeyCode::Backspace => {
                                prompt.buffer.pop();
                            }
                            KeyCode::Char(c) => prompt.buffer.push(c),
                            _ => {}
                        }
                    }
                    InputMode::Confirm => match key.code {
                        KeyCode::Char('y') | KeyCode::Enter => {
                            self.mode = InputMode::Normal;
                            if let Some(change) = self.confirmation.confirm() {
                                self.send_change(change, rpc_tx);
                            }
                        }
                        KeyCode::Char('n') | KeyCode::Esc => {
                            self.mode = InputMode::Normal;
                            self.confirmation.cancel();
                            self.set_status(StatusUpdate::info("Removal cancelled"));
                        }
                        KeyCode::Char('f') => self.confirmation.toggle_delete_files(),
                        KeyCode::Char('s') => self.confirmation.toggle_silent_choice(),
                        _ => {}
                    },
                    InputMode::Help => {
                        if matches!(
                            key.code,
                            KeyCode::Char('?') | KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')
                        ) {
                            self.mode = InputMode::Normal;
                        }
                    }
                }
                Ok(false)
            }
            Event::Paste(data) => {
                match &mut self.mode {
                    InputMode::Prompt(prompt) => prompt.buffer.push_str(&data),
                    InputMode::Normal => {
                        let mut prompt = PromptState::default();
                        prompt.buffer.push_str(&data);
                        self.mode = InputMode::Prompt(prompt);
                    }
                    _ => {}
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent, rpc_tx: &Sender<RpcCommand>) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('g') | KeyCode::Home => self.select_index(0),
            KeyCode::Char('G') | KeyCode::End => {
                self.select_index(self.board.len().saturating_sub(1))
            }
            KeyCode::Char('s') | KeyCode::Char(' ') => self.click_selected(Cell::Toggle, rpc_tx),
            KeyCode::Char('d') | KeyCode::Delete => self.click_selected(Cell::Remove, rpc_tx),
            KeyCode::Char('a') => self.mode = InputMode::Prompt(PromptState::default()),
            KeyCode::Char('f') => {
                let filter = self.reconciler.filter().next();
                self.reconciler.set_filter(filter);
                self.poller.refresh_now(Instant::now());
                self.set_status(StatusUpdate::info(format!("Showing {}", filter.label())));
            }
            KeyCode::Char('r') => {
                if !self.poller.refresh_now(Instant::now()) {
                    self.set_status(StatusUpdate::warning("Refresh already in progress or paused"));
                }
            }
            KeyCode::Char('p') => match self.poller.state() {
                PollerState::Running => {
                    self.poller.stop();
                    self.set_status(StatusUpdate::info("Polling paused"));
                }
                PollerState::Idle => {
                    self.poller.start(Instant::now());
                    self.set_status(StatusUpdate::info("Polling resumed"));
                }
            },
            KeyCode::Char('?') => self.mode = InputMode::Help,
            _ => {}
        }
        Ok(false)
    }

    fn click_selected(&mut self, cell: Cell, rpc_tx: &Sender<RpcCommand>) {
        let Some(index) = self.list_state.selected() else {
            self.set_status(StatusUpdate::warning("No torrent selected"));
            return;
        };
        match self.board.click(index, cell) {
            Some(RowAction::Change { infohash, action }) => {
                self.send_change(ApprovedChange { infohash, action }, rpc_tx);
            }
            Some(RowAction::Remove { infohash }) => {
                match self.confirmation.request_remove(&infohash) {
                    Some(change) => self.send_change(change, rpc_tx),
                    None => self.mode = InputMode::Confirm,
                }
            }
            None => {}
        }
    }

    // Fire and forget; the outcome shows up on a later refresh.
    fn send_change(&mut self, change: ApprovedChange, rpc_tx: &Sender<RpcCommand>) {
        let verb = match change.action {
            TorrentAction::Start => "Starting",
            TorrentAction::Stop => "Stopping",
            TorrentAction::Remove => "Removing",
            TorrentAction::Delete => "Deleting",
        };
        self.set_status(StatusUpdate::info(format!(
            "{verb} {}…",
            short_hash(&change.infohash)
        )));
        if rpc_tx.send(RpcCommand::Change(change)).is_err() {
            self.set_status(StatusUpdate::error("Failed to queue torrent change"));
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.board.is_empty() {
            return;
        }
        let max_index = self.board.len() as isize - 1;
        let current = self.list_state.selected().unwrap_or(0) as isize;
        self.select_index((current + delta).clamp(0, max_index) as usize);
    }

    fn select_index(&mut self, index: usize) {
        if self.board.is_empty() {
            return;
        }
        let index = index.min(self.board.len() - 1);
        self.list_state.select(Some(index));
        self.selected_id = self.board.get(index).map(|row| row.id);
    }

    /// Keeps the cursor on the same torrent after rows come and go.
    fn sync_selection(&mut self) {
        if self.board.is_empty() {
            self.list_state.select(None);
            self.selected_id = None;
            return;
        }
        let index = self
            .selected_id
            .and_then(|id| self.board.position(id))
            .unwrap_or_else(|| self.list_state.selected().unwrap_or(0));
        self.select_index(index);
    }

    fn current_row(&self) -> Option<&BoardRow> {
        self.board.get(self.list_state.selected()?)
    }

    fn expire_status(&mut self) {
        let now = Instant::now();
        if self
            .status
            .as_ref()
            .and_then(|status| status.expires_at)
            .is_some_and(|expiry| now >= expiry)
        {
            self.status = None;
        }
        if self
            .toast
            .as_ref()
            .and_then(|toast| toast.expires_at)
            .is_some_and(|expiry| now >= expiry)
        {
            self.toast = None;
        }
    }

    fn set_status(&mut self, update: StatusUpdate) {
        let message = StatusMessage::from_update(update.clone());
        if matches!(update.level, StatusLevel::Warning | StatusLevel::Error) {
            self.toast = Some(message.clone());
        }
        self.status = Some(message);
    }
}

#[derive(Clone, Default)]
struct PromptState {
    buffer: String,
    submitting: bool,
    error: Option<String>,
}

enum InputMode {
    Normal,
    Prompt(PromptState),
    Confirm,
    Help,
}

fn row_line(row: &BoardRow) -> String {
    format!(
        "{:<2} {:<36.36}  {:<11}  {:>7}  {:<24}  {:<14}  {:>7}  {}",
        row.text(Cell::Toggle),
        row.text(Cell::Name),
        row.text(Cell::State),
        row.text(Cell::Progress),
        row.text(Cell::Rate),
        row.text(Cell::Ratio),
        row.text(Cell::Size),
        row.text(Cell::Peers)
    )
}

fn short_hash(infohash: &str) -> &str {
    infohash.get(..8).unwrap_or(infohash)
}

fn checkbox(checked: bool) -> char {
    if checked {
        'x'
    } else {
        ' '
    }
}

fn status_style(level: StatusLevel) -> Style {
    match level {
        StatusLevel::Info => Style::default().fg(Color::Blue),
        StatusLevel::Success => Style::default().fg(Color::Green),
        StatusLevel::Warning => Style::default().fg(Color::Yellow),
        StatusLevel::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1]);
    vertical[1]
}

fn help_lines() -> Vec<Line<'static>> {
    let heading = |text: &'static str| {
        Line::from(Span::styled(
            text,
            Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        ))
    };
    vec![
        heading("Navigation"),
        Line::from("  j / k: move selection"),
        Line::from("  g / G: jump to first / last"),
        Line::from(""),
        heading("Actions"),
        Line::from("  s or Space: start / stop selected torrent"),
        Line::from("  d: remove selected torrent"),
        Line::from("  a: add torrent by URL"),
        Line::from("  f: cycle filter (all, downloading, seeding)"),
        Line::from("  r: refresh now"),
        Line::from("  p: pause / resume polling"),
        Line::from("  ?: toggle this help"),
        Line::from("  q or Ctrl+c: quit"),
        Line::from(""),
        heading("Dialogs"),
        Line::from("  Add: Enter to submit, Esc to cancel"),
        Line::from("  Remove: y to accept, n/Esc to cancel, f delete files, s don't ask again"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_truncates_long_infohashes() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn row_line_includes_every_visible_cell() {
        use crate::reconcile::RenderTarget;

        let mut board = Board::default();
        let id = board.create_row("aa");
        board.set_text(&id, Cell::Name, "ubuntu.iso");
        board.set_text(&id, Cell::Progress, "30.00%");
        board.set_text(&id, Cell::Peers, "3 peers");
        let line = row_line(board.get(0).unwrap());
        assert!(line.contains("ubuntu.iso"));
        assert!(line.contains("30.00%"));
        assert!(line.ends_with("3 peers"));
    }
}
