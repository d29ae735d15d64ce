use crate::daemon::StatusObserver;
use crate::models::{DaemonState, StatusSnapshot};
use crate::signal::Shutdown;
use crate::utils::format_millis;
use anyhow::Result;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

const KEY_POLL: Duration = Duration::from_millis(100);

/// Live status view for watch mode. Owns the terminal while it exists.
pub struct Dashboard {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    keys: Option<JoinHandle<()>>,
    closed: Shutdown,
}

impl Dashboard {
    pub fn enter(shutdown: Shutdown) -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        let closed = Shutdown::new();
        let keys = spawn_key_watcher(read_key, shutdown, closed.clone())?;
        Ok(Self {
            terminal,
            keys: Some(keys),
            closed,
        })
    }

    pub fn leave(mut self) -> Result<()> {
        self.closed.request();
        if let Some(keys) = self.keys.take() {
            if keys.join().is_err() {
                warn!("Key watcher panicked");
            }
        }
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl StatusObserver for Dashboard {
    fn on_status(&mut self, snapshot: &StatusSnapshot) -> Result<()> {
        self.terminal.draw(|f| draw(f, snapshot))?;
        Ok(())
    }
}

fn read_key(timeout: Duration) -> io::Result<Option<KeyEvent>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => Ok(Some(key)),
        _ => Ok(None),
    }
}

fn is_quit_key(key: &KeyEvent) -> bool {
    let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
    ctrl_c || matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
}

/// Raw mode delivers Ctrl-C as a key instead of SIGINT, so quitting keys are
/// read on their own thread. A replay in progress sees the request at its
/// next step.
fn spawn_key_watcher<F>(
    mut next_key: F,
    shutdown: Shutdown,
    closed: Shutdown,
) -> io::Result<JoinHandle<()>>
where
    F: FnMut(Duration) -> io::Result<Option<KeyEvent>> + Send + 'static,
{
    thread::Builder::new()
        .name("dashboard-keys".into())
        .spawn(move || {
            while !shutdown.is_requested() && !closed.is_requested() {
                match next_key(KEY_POLL) {
                    Ok(Some(key)) if is_quit_key(&key) => shutdown.request(),
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "Reading keys failed, stop with `idlewind stop`");
                        break;
                    }
                }
            }
        })
}

fn state_style(state: DaemonState) -> Style {
    let color = match state {
        DaemonState::Safe => Color::Green,
        DaemonState::Warning => Color::Red,
        DaemonState::Acting => Color::White,
        DaemonState::Terminating => Color::DarkGray,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

pub fn draw(frame: &mut Frame, snapshot: &StatusSnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(6), // Timers
            Constraint::Length(3), // Progress
            Constraint::Min(0),
            Constraint::Length(3), // Footer
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], snapshot);
    draw_timers(frame, chunks[1], snapshot);
    draw_progress(frame, chunks[2], snapshot);
    draw_footer(frame, chunks[4], snapshot);
}

fn draw_header(frame: &mut Frame, area: Rect, snapshot: &StatusSnapshot) {
    let header = Line::from(vec![
        Span::styled(
            " idlewind ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(snapshot.state.label(), state_style(snapshot.state)),
        Span::raw(" | "),
        Span::raw(Local::now().format("%H:%M:%S").to_string()),
    ]);
    let para = Paragraph::new(header).block(Block::default().borders(Borders::ALL));
    frame.render_widget(para, area);
}

fn draw_timers(frame: &mut Frame, area: Rect, snapshot: &StatusSnapshot) {
    let green = snapshot.until_warning_ms();
    let mut lines = vec![Line::from(vec![
        Span::raw("  Idle:   "),
        Span::styled(
            format_millis(snapshot.idle_ms),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ])];

    if green > 0 {
        lines.push(Line::from(vec![
            Span::styled("  Green:  ", Style::default().fg(Color::Green)),
            Span::raw(format!("{} left", format_millis(green))),
        ]));
        lines.push(Line::raw("  Red:    --"));
    } else {
        lines.push(Line::from(vec![
            Span::styled("  Green:  ", Style::default().fg(Color::Green)),
            Span::raw("0s"),
        ]));
        lines.push(Line::from(vec![
            Span::styled("  Red:    ", Style::default().fg(Color::Red)),
            Span::raw(format!(
                "{} until movement",
                format_millis(snapshot.until_action_ms())
            )),
        ]));
    }
    lines.push(Line::raw(format!("  Movements so far: {}", snapshot.actions)));

    let block = Block::default().title(" TIMERS ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_progress(frame: &mut Frame, area: Rect, snapshot: &StatusSnapshot) {
    let ratio = if snapshot.action_threshold_ms == 0 {
        0.0
    } else {
        (snapshot.idle_ms as f64 / snapshot.action_threshold_ms as f64).clamp(0.0, 1.0)
    };
    let gauge = Gauge::default()
        .block(Block::default().title(" NEXT MOVEMENT ").borders(Borders::ALL))
        .gauge_style(state_style(snapshot.state))
        .ratio(ratio)
        .label(format!(
            "{} / {}",
            format_millis(snapshot.idle_ms),
            format_millis(snapshot.action_threshold_ms)
        ));
    frame.render_widget(gauge, area);
}

fn draw_footer(frame: &mut Frame, area: Rect, snapshot: &StatusSnapshot) {
    let help = Paragraph::new(format!(
        "Mode: {} | Probe: {} | Press 'q' to quit",
        snapshot.mode, snapshot.backend
    ))
    .block(Block::default().borders(Borders::ALL))
    .alignment(Alignment::Center);
    frame.render_widget(help, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InjectError;
    use crate::executor::{Injector, PathExecutor};
    use crate::models::{ExecMode, MotionPath, MotionStep, ProbeBackend, WindParams};
    use chrono::Utc;
    use ratatui::backend::TestBackend;
    use std::collections::VecDeque;
    use std::time::Instant;

    fn snapshot(idle_ms: u64, state: DaemonState) -> StatusSnapshot {
        StatusSnapshot {
            state,
            idle_ms,
            warning_limit_ms: 30_000,
            action_threshold_ms: 90_000,
            mode: ExecMode::Smooth,
            backend: ProbeBackend::Local,
            actions: 4,
            pid: 1,
            updated_at: Utc::now(),
        }
    }

    fn rendered(snapshot: &StatusSnapshot) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        terminal.draw(|f| draw(f, snapshot)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect::<String>()
    }

    #[test]
    fn test_draw_safe() {
        let text = rendered(&snapshot(10_000, DaemonState::Safe));
        assert!(text.contains("SAFE"));
        assert!(text.contains("20s left"));
        assert!(text.contains("Mode: SMOOTH"));
    }

    #[test]
    fn test_draw_warning() {
        let text = rendered(&snapshot(60_000, DaemonState::Warning));
        assert!(text.contains("WARNING"));
        assert!(text.contains("30s until movement"));
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    /// Hands out `keys` one per poll, then reports nothing.
    fn scripted(
        keys: Vec<KeyEvent>,
    ) -> impl FnMut(Duration) -> io::Result<Option<KeyEvent>> + Send {
        let mut keys = VecDeque::from(keys);
        move |timeout| match keys.pop_front() {
            Some(key) => Ok(Some(key)),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit_key(&key(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit_key(&key(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit_key(&key(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit_key(&key(KeyCode::Char('x'), KeyModifiers::CONTROL)));
    }

    #[test]
    fn test_key_watcher_requests_shutdown() {
        let shutdown = Shutdown::new();
        let keys = scripted(vec![
            key(KeyCode::Char('x'), KeyModifiers::NONE),
            key(KeyCode::Char('c'), KeyModifiers::CONTROL),
        ]);

        let handle = spawn_key_watcher(keys, shutdown.clone(), Shutdown::new()).unwrap();
        handle.join().unwrap();

        assert!(shutdown.is_requested());
    }

    #[test]
    fn test_key_watcher_stops_when_closed() {
        let shutdown = Shutdown::new();
        let closed = Shutdown::new();
        let handle =
            spawn_key_watcher(scripted(Vec::new()), shutdown.clone(), closed.clone()).unwrap();

        closed.request();
        handle.join().unwrap();

        assert!(!shutdown.is_requested());
    }

    struct Discard;

    impl Injector for Discard {
        fn move_relative(&mut self, _dx: i32, _dy: i32) -> Result<(), InjectError> {
            Ok(())
        }
    }

    #[test]
    fn test_quit_key_cuts_running_replay_short() {
        let shutdown = Shutdown::new();
        let keys = |timeout: Duration| -> io::Result<Option<KeyEvent>> {
            thread::sleep(timeout);
            Ok(Some(key(KeyCode::Char('q'), KeyModifiers::NONE)))
        };
        // 1000 steps of 10ms would take ten seconds.
        let path = MotionPath {
            steps: vec![
                MotionStep {
                    dx: 1,
                    dy: 0,
                    delay_us: 10_000,
                };
                1000
            ],
            params: WindParams {
                speed: 30.0,
                gravity: 4.0,
                wind: 40.0,
                target_radius: 5.0,
                max_step: 3.0,
            },
            target: (1000.0, 0.0),
            arrived: true,
        };
        let mut executor = PathExecutor::new(Discard, ExecMode::Smooth, 0, shutdown.clone());
        let start = Instant::now();

        let handle = spawn_key_watcher(keys, shutdown.clone(), Shutdown::new()).unwrap();
        let report = executor.execute(&path);
        handle.join().unwrap();

        assert!(report.cancelled);
        assert!(report.dispatched < 1000);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
