//! Ticket dashboard - terminal UI for the ticket release simulation
//!
//! Configures, starts and stops the remote simulation and shows its live
//! state: system status, ticket availability and the system log.
//!
//! Module structure:
//! - `domain/` - Core types (Configuration, ControlState, TicketSnapshot)
//! - `io/` - External interfaces (REST API, event stream, STOMP, MQTT)
//! - `services/` - Dashboard logic (validator, control gate, reconcilers)
//! - `infra/` - Infrastructure (Config, logging, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ticket_dashboard::domain::{ConfigField, ControlState, RemoteStatus};
use ticket_dashboard::infra::logging::{init_tracing, LogSink};
use ticket_dashboard::infra::{Config, Metrics};
use ticket_dashboard::io::{
    transport_from_config, ConnectionState, EventStream, HttpTicketApi, StreamSettings, TicketApi,
};
use ticket_dashboard::services::{
    ControlGate, DashboardController, DashboardView, Notice, NoticeLevel, ViewSettings,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// How long the stream gets to close cleanly on exit
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Ticket dashboard - terminal UI for the ticket release simulation
#[derive(Parser, Debug)]
#[command(name = "ticket-dashboard", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

struct App {
    controller: Arc<DashboardController>,
    view: DashboardView,
    stream_state: watch::Receiver<ConnectionState>,
    notice_rx: mpsc::UnboundedReceiver<Notice>,
    notices: VecDeque<(Notice, Instant)>,
    max_notifications: usize,
}

impl App {
    fn drain_notices(&mut self) {
        while let Ok(notice) = self.notice_rx.try_recv() {
            self.notices.push_front((notice, Instant::now()));
            self.notices.truncate(self.max_notifications);
        }
    }

    /// Returns false when the UI should exit
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc => return false,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return false,
            KeyCode::Tab => self.controller.form().focus_next(),
            KeyCode::BackTab => self.controller.form().focus_prev(),
            KeyCode::Backspace => self.controller.form().backspace(),
            KeyCode::Char(c) => {
                // Rejected keystrokes show up as the form's inline error
                let _ = self.controller.form().input_char(c);
            }
            KeyCode::Enter => {
                if !self.controller.form().is_submitting() {
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        if let Err(e) = controller.submit().await {
                            debug!(error = %e, "submit_rejected");
                        }
                    });
                }
            }
            KeyCode::F(2) => {
                if self.controller.gate().lock().can_start() {
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        if let Err(e) = controller.start().await {
                            debug!(error = %e, "start_rejected");
                        }
                    });
                }
            }
            KeyCode::F(3) => {
                if self.controller.gate().lock().can_stop() {
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        if let Err(e) = controller.stop().await {
                            debug!(error = %e, "stop_rejected");
                        }
                    });
                }
            }
            _ => {}
        }
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref());

    // The UI owns the terminal, so logs go to a file
    init_tracing(LogSink::File(config.log_file()))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        config_file = %config.config_file(),
        base_url = %config.base_url(),
        transport = %config.transport().as_str(),
        stream_url = %config.stream_url(),
        poll_interval_ms = %config.status_poll_interval().as_millis(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let api: Arc<dyn TicketApi> =
        Arc::new(HttpTicketApi::from_config(&config).context("Failed to build HTTP client")?);
    let stream = EventStream::connect(
        transport_from_config(&config),
        StreamSettings::from_config(&config),
        metrics.clone(),
    );

    let gate = ControlGate::shared();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let controller = Arc::new(DashboardController::new(api.clone(), gate.clone(), notice_tx));
    let view = DashboardView::mount(
        api,
        gate,
        &stream,
        &ViewSettings::from_config(&config),
        metrics.clone(),
    );

    // Periodic metrics report (lock-free reads)
    let metrics_interval = config.metrics_interval_secs();
    let reporter = (metrics_interval > 0).then(|| {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics.report().log();
            }
        })
    });

    let mut app = App {
        controller,
        view,
        stream_state: stream.watch_state(),
        notice_rx,
        notices: VecDeque::new(),
        max_notifications: config.max_notifications().max(1),
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_ui(&mut terminal, &mut app, Duration::from_millis(config.tick_ms().max(10))).await;

    // Teardown: cancel polling, release subscriptions, close the transport
    app.view.teardown();
    if tokio::time::timeout(DISCONNECT_TIMEOUT, stream.disconnect()).await.is_err() {
        info!("stream_disconnect_timed_out");
    }
    if let Some(reporter) = reporter {
        reporter.abort();
    }
    metrics.report().log();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    info!("ticket-dashboard shutdown complete");
    result
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    tick_rate: Duration,
) -> anyhow::Result<()> {
    let mut last_tick = Instant::now();

    loop {
        app.drain_notices();
        terminal.draw(|f| draw_ui(f, app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !app.handle_key(key) {
                    return Ok(());
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
            // Let spawned actions make progress between frames
            tokio::task::yield_now().await;
        }
    }
}

fn draw_ui(f: &mut Frame, app: &App) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Body
        ])
        .split(f.area());

    draw_header(f, main_chunks[0], app);

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(main_chunks[1]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8), // Configuration form
            Constraint::Length(3), // Control panel
            Constraint::Length(3), // Availability
            Constraint::Min(0),    // Notifications
        ])
        .split(body_chunks[0]);

    draw_form_panel(f, left_chunks[0], app);
    draw_control_panel(f, left_chunks[1], app);
    draw_availability_panel(f, left_chunks[2], app);
    draw_notice_panel(f, left_chunks[3], app);
    draw_log_panel(f, body_chunks[1], app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let connection = *app.stream_state.borrow();
    let connection_color = match connection {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::Disconnected => Color::Red,
    };

    let (status, control) = {
        let gate = app.controller.gate().lock();
        (gate.last_observed(), gate.state())
    };
    let (status_text, status_color) = match status {
        Some(RemoteStatus::Running) => ("RUNNING", Color::Green),
        Some(RemoteStatus::Stopped) => ("STOPPED", Color::Red),
        None => ("UNKNOWN", Color::DarkGray),
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Ticket Dashboard ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| Stream: "),
        Span::styled(connection.as_str(), Style::default().fg(connection_color)),
        Span::raw(" | System: "),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw(" | Control: "),
        Span::styled(control.as_str(), Style::default().fg(Color::Yellow)),
        Span::raw(" | Esc to quit"),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn draw_form_panel(f: &mut Frame, area: Rect, app: &App) {
    let form = app.controller.form();
    let focus = form.focus();

    let mut lines: Vec<Line> = ConfigField::ALL
        .iter()
        .map(|&field| {
            let focused = field == focus;
            let marker = if focused { "> " } else { "  " };
            let cursor = if focused { "_" } else { "" };
            let label_style = if focused {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{}{:<30}", marker, field.label()), label_style),
                Span::raw(format!("{}{}", form.value(field), cursor)),
            ])
        })
        .collect();

    lines.push(Line::from(""));
    if form.is_submitting() {
        lines.push(Line::from(Span::styled("Saving configuration...", Style::default().fg(Color::Yellow))));
    } else if let Some(err) = form.error() {
        lines.push(Line::from(Span::styled(
            format!("{}: {}", err.field().label(), err),
            Style::default().fg(Color::Red),
        )));
    } else {
        lines.push(Line::from(Span::styled(
            "Tab next field | Enter save",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let panel = Paragraph::new(lines).block(
        Block::default()
            .title(" System Configuration ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );
    f.render_widget(panel, area);
}

fn draw_control_panel(f: &mut Frame, area: Rect, app: &App) {
    let (can_start, can_stop, in_flight) = {
        let gate = app.controller.gate().lock();
        (gate.can_start(), gate.can_stop(), gate.in_flight())
    };

    let button = |label: &'static str, enabled: bool, color: Color| {
        let style = if enabled {
            Style::default().fg(color).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Span::styled(label, style)
    };

    let mut spans = vec![
        button("[F2] Start", can_start, Color::Green),
        Span::raw("   "),
        button("[F3] Stop", can_stop, Color::Red),
    ];
    if let Some(action) = in_flight {
        spans.push(Span::styled(format!("   {}...", action), Style::default().fg(Color::Yellow)));
    }

    let panel = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .title(" Control Panel ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(panel, area);
}

fn draw_availability_panel(f: &mut Frame, area: Rect, app: &App) {
    let snapshot = app.view.availability().snapshot();
    let percent = snapshot.progress_percent().min(100);

    let gauge = Gauge::default()
        .block(Block::default().title(" Ticket Availability ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(percent as u16)
        .label(format!(
            "{}/{} ({}%)",
            snapshot.available_tickets, snapshot.total_tickets, percent
        ));
    f.render_widget(gauge, area);
}

fn draw_notice_panel(f: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .notices
        .iter()
        .map(|(notice, at)| {
            let (icon, color) = match notice.level {
                NoticeLevel::Success => ("✓", Color::Green),
                NoticeLevel::Failure => ("✗", Color::Red),
            };
            ListItem::new(Line::from(vec![
                Span::styled(icon, Style::default().fg(color)),
                Span::raw(format!(" {} ", notice.message)),
                Span::styled(format!("{}s", at.elapsed().as_secs()), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Notifications ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow)),
    );
    f.render_widget(list, area);
}

fn draw_log_panel(f: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let log = app.view.log().lock();

    let items: Vec<ListItem> =
        log.tail(visible).map(|entry| ListItem::new(entry.text.clone())).collect();
    let title = format!(" System Log ({}) ", log.len());
    drop(log);

    let list = List::new(items).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );
    f.render_widget(list, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> App {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let api: Arc<dyn TicketApi> =
            Arc::new(HttpTicketApi::new("http://127.0.0.1:9", Duration::from_millis(50)).unwrap());
        let controller = Arc::new(DashboardController::new(api, ControlGate::shared(), notice_tx));
        let (stream_tx, stream_state) = watch::channel(ConnectionState::Connecting);
        drop(stream_tx);
        let view_stream = EventStream::connect(
            Box::new(ticket_dashboard::io::MqttTransport::new("127.0.0.1", 9)),
            StreamSettings::default(),
            Arc::new(Metrics::new()),
        );
        let settings = ViewSettings {
            poll_interval: Duration::from_secs(3600),
            log_topic: "/topic/logs".to_string(),
            availability_topic: "/topic/ticketAvailability".to_string(),
            max_log_entries: None,
        };
        let view = DashboardView::mount(
            Arc::new(HttpTicketApi::new("http://127.0.0.1:9", Duration::from_millis(50)).unwrap()),
            ControlGate::shared(),
            &view_stream,
            &settings,
            Arc::new(Metrics::new()),
        );
        App {
            controller,
            view,
            stream_state,
            notice_rx,
            notices: VecDeque::new(),
            max_notifications: 2,
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[tokio::test]
    async fn test_typing_filters_digits() {
        let mut app = app();
        assert!(app.handle_key(key(KeyCode::Char('1'))));
        assert!(app.handle_key(key(KeyCode::Char('x'))));
        assert!(app.handle_key(key(KeyCode::Tab)));
        assert!(app.handle_key(key(KeyCode::Char('2'))));

        let form = app.controller.form();
        assert_eq!(form.value(ConfigField::TotalTickets), "1");
        assert_eq!(form.value(ConfigField::TicketReleaseRate), "2");
    }

    #[tokio::test]
    async fn test_quit_keys() {
        let mut app = app();
        assert!(!app.handle_key(key(KeyCode::Esc)));
        assert!(!app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
    }

    #[tokio::test]
    async fn test_notice_panel_is_bounded() {
        let mut app = app();
        let (tx, rx) = mpsc::unbounded_channel();
        app.notice_rx = rx;
        for i in 0..5 {
            tx.send(Notice::success(format!("notice {i}"))).unwrap();
        }
        app.drain_notices();
        assert_eq!(app.notices.len(), 2);
        assert_eq!(app.notices[0].0.message, "notice 4");
    }
}
