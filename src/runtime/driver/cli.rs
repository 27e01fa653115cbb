use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use serde_json::json;
use thiserror::Error;

use crate::error::SchedulerError;
use crate::logging::{LogLevel, json_str};
use crate::runtime::{
    EventHub, FrameLoop, PeriodicPoller, RenderBackend, Scheduler, ShutdownHandle, ShutdownReport,
};
use crate::width::fit_to_width;

pub type DriverResult<T> = std::result::Result<T, CliDriverError>;

#[derive(Debug, Error)]
pub enum CliDriverError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("terminal error: {0}")]
    Terminal(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Text lines scripts publish for the terminal backend to draw, one per row.
/// Registered in the scheduler's shared state by [`CliDriver::new`].
#[derive(Debug, Default)]
pub struct StatusBoard {
    lines: Mutex<Vec<String>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_line(&self, row: usize, text: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() <= row {
            lines.resize(row + 1, String::new());
        }
        lines[row] = text.into();
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Draws the [`StatusBoard`] with ANSI cursor moves. A frame whose content
/// hashes the same as the last written one is not written again.
pub struct TerminalBackend<W> {
    writer: W,
    board: Arc<StatusBoard>,
    width: u16,
    follow_terminal: bool,
    frame: Vec<String>,
    last_hash: Option<blake3::Hash>,
    last_rows: usize,
    writes: usize,
}

impl<W> TerminalBackend<W>
where
    W: Write,
{
    pub fn new(writer: W, board: Arc<StatusBoard>, width: u16) -> Self {
        Self {
            writer,
            board,
            width,
            follow_terminal: false,
            frame: Vec::new(),
            last_hash: None,
            last_rows: 0,
            writes: 0,
        }
    }

    /// Re-read the terminal width at the start of every frame.
    pub fn follow_terminal(mut self) -> Self {
        self.follow_terminal = true;
        self
    }

    /// Number of frames actually written.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W> RenderBackend for TerminalBackend<W>
where
    W: Write,
{
    fn begin_frame(&mut self) -> crate::Result<bool> {
        if self.follow_terminal {
            let (width, _height) = terminal::size()?;
            self.width = width;
        }
        self.frame.clear();
        Ok(self.width > 0)
    }

    fn draw_ui(&mut self) -> crate::Result<()> {
        let width = usize::from(self.width);
        self.frame = self
            .board
            .lines()
            .iter()
            .map(|line| fit_to_width(line, width))
            .collect();
        Ok(())
    }

    fn present(&mut self) -> crate::Result<()> {
        let hash = blake3::hash(self.frame.join("\n").as_bytes());
        if self.last_hash == Some(hash) {
            return Ok(());
        }

        for (row, line) in self.frame.iter().enumerate() {
            write!(self.writer, "\x1b[{};1H{}", row + 1, line)?;
        }
        let blank = " ".repeat(usize::from(self.width));
        for row in self.frame.len()..self.last_rows {
            write!(self.writer, "\x1b[{};1H{}", row + 1, blank)?;
        }
        self.writer.flush()?;

        self.last_hash = Some(hash);
        self.last_rows = self.frame.len();
        self.writes += 1;
        Ok(())
    }
}

/// Event name for a key transition, e.g. `ctrl-a-down` or `shift-f5-up`.
/// Keys without a stable name yield `None`.
pub fn key_event_name(key: &KeyEvent) -> Option<String> {
    let mut shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let base = match key.code {
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char(ch) => {
            if ch.is_uppercase() {
                shift = true;
            }
            ch.to_lowercase().collect()
        }
        KeyCode::F(n) => format!("f{n}"),
        KeyCode::Enter => "enter".to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::BackTab => {
            shift = true;
            "tab".to_string()
        }
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Esc => "escape".to_string(),
        KeyCode::Left => "left".to_string(),
        KeyCode::Right => "right".to_string(),
        KeyCode::Up => "up".to_string(),
        KeyCode::Down => "down".to_string(),
        KeyCode::Home => "home".to_string(),
        KeyCode::End => "end".to_string(),
        KeyCode::PageUp => "pageup".to_string(),
        KeyCode::PageDown => "pagedown".to_string(),
        KeyCode::Insert => "insert".to_string(),
        KeyCode::Delete => "delete".to_string(),
        _ => return None,
    };
    let state = match key.kind {
        KeyEventKind::Release => "up",
        KeyEventKind::Press | KeyEventKind::Repeat => "down",
    };
    Some(format!(
        "{}{}{}{}-{}",
        if key.modifiers.contains(KeyModifiers::CONTROL) { "ctrl-" } else { "" },
        if key.modifiers.contains(KeyModifiers::ALT) { "alt-" } else { "" },
        if shift { "shift-" } else { "" },
        base,
        state,
    ))
}

fn is_exit_key(key: &KeyEvent) -> bool {
    key.kind != KeyEventKind::Release
        && (key.code == KeyCode::Esc
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)))
}

/// Turn one terminal event into scheduler input. Returns false once shutdown
/// has been requested.
fn forward_terminal_event(event: CrosstermEvent, hub: &EventHub, shutdown: &ShutdownHandle) -> bool {
    match event {
        CrosstermEvent::Key(key) if is_exit_key(&key) => {
            shutdown.request();
            return false;
        }
        CrosstermEvent::Key(key) => {
            if let Some(name) = key_event_name(&key) {
                let chars = match key.code {
                    KeyCode::Char(ch) => Some(ch.to_string()),
                    _ => None,
                };
                hub.queue_event(&name, Some(json!({ "chars": chars })));
            }
        }
        CrosstermEvent::Resize(width, height) => {
            hub.queue_event("resize", Some(json!({ "width": width, "height": height })));
        }
        CrosstermEvent::FocusGained => {
            hub.queue_event("focus-gained", None);
        }
        CrosstermEvent::FocusLost => {
            hub.queue_event("focus-lost", None);
        }
        _ => {}
    }
    true
}

/// Terminal host: raw mode plus alternate screen, an input pump thread feeding
/// key events into the queue, and a [`TerminalBackend`] over stdout.
/// `Esc` or `ctrl-c` requests shutdown.
pub struct CliDriver {
    frame_loop: FrameLoop<TerminalBackend<io::Stdout>>,
    board: Arc<StatusBoard>,
    input_interval: Duration,
}

impl CliDriver {
    pub fn new(scheduler: Scheduler) -> DriverResult<Self> {
        let board = scheduler
            .shared()
            .get_or_insert_with(StatusBoard::new)
            .map_err(|err| CliDriverError::Terminal(err.to_string()))?;
        let (width, _height) = terminal::size().unwrap_or((80, 24));
        let backend = TerminalBackend::new(io::stdout(), Arc::clone(&board), width).follow_terminal();
        Ok(Self {
            frame_loop: FrameLoop::new(scheduler, backend),
            board,
            input_interval: Duration::from_millis(10),
        })
    }

    pub fn board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    pub fn frame_loop_mut(&mut self) -> &mut FrameLoop<TerminalBackend<io::Stdout>> {
        &mut self.frame_loop
    }

    pub fn run(mut self) -> DriverResult<ShutdownReport> {
        let mut stdout = io::stdout();
        self.enter(&mut stdout)?;
        let result = self.run_inner();
        self.exit(&mut stdout);
        result
    }

    fn run_inner(&mut self) -> DriverResult<ShutdownReport> {
        let hub = self.frame_loop.scheduler().hub().clone();
        let shutdown = self.frame_loop.shutdown_handle();
        let mut pump = PeriodicPoller::spawn("input", self.input_interval, move || {
            loop {
                match event::poll(Duration::ZERO) {
                    Ok(true) => {}
                    Ok(false) => return true,
                    Err(err) => return input_failed(&hub, &shutdown, err),
                }
                match event::read() {
                    Ok(event) => {
                        if !forward_terminal_event(event, &hub, &shutdown) {
                            return false;
                        }
                    }
                    Err(err) => return input_failed(&hub, &shutdown, err),
                }
            }
        })?;

        let result = self.frame_loop.run();
        pump.stop();
        Ok(result?)
    }

    fn enter(&self, stdout: &mut impl Write) -> DriverResult<()> {
        terminal::enable_raw_mode().map_err(|err| CliDriverError::Terminal(err.to_string()))?;
        execute!(stdout, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        Ok(())
    }

    fn exit(&self, stdout: &mut impl Write) {
        execute!(stdout, Show, LeaveAlternateScreen).ok();
        terminal::disable_raw_mode().ok();
    }
}

fn input_failed(hub: &EventHub, shutdown: &ShutdownHandle, err: io::Error) -> bool {
    hub.log(
        LogLevel::Error,
        "overlay::frame",
        "input_failed",
        [json_str("error", err.to_string())],
    );
    shutdown.request();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn key_names_follow_modifier_order() {
        let ctrl_a = key(KeyCode::Char('a'), KeyModifiers::CONTROL, KeyEventKind::Press);
        assert_eq!(key_event_name(&ctrl_a).as_deref(), Some("ctrl-a-down"));

        let shift_f5_up = key(KeyCode::F(5), KeyModifiers::SHIFT, KeyEventKind::Release);
        assert_eq!(key_event_name(&shift_f5_up).as_deref(), Some("shift-f5-up"));

        let upper = key(
            KeyCode::Char('Q'),
            KeyModifiers::CONTROL | KeyModifiers::ALT,
            KeyEventKind::Press,
        );
        assert_eq!(key_event_name(&upper).as_deref(), Some("ctrl-alt-shift-q-down"));

        let caps = key(KeyCode::CapsLock, KeyModifiers::NONE, KeyEventKind::Press);
        assert_eq!(key_event_name(&caps), None);
    }

    #[test]
    fn terminal_events_become_queued_events() {
        let hub = EventHub::new(&SchedulerConfig::default());
        let shutdown = ShutdownHandle::new();

        let typed = key(KeyCode::Char('x'), KeyModifiers::NONE, KeyEventKind::Press);
        assert!(forward_terminal_event(CrosstermEvent::Key(typed), &hub, &shutdown));
        assert!(forward_terminal_event(CrosstermEvent::Resize(100, 30), &hub, &shutdown));

        let events = hub.drain_events();
        assert_eq!(events[0].name(), "x-down");
        assert_eq!(events[0].payload(), Some(&json!({"chars": "x"})));
        assert_eq!(events[1].payload(), Some(&json!({"width": 100, "height": 30})));

        let ctrl_c = key(KeyCode::Char('c'), KeyModifiers::CONTROL, KeyEventKind::Press);
        assert!(!forward_terminal_event(CrosstermEvent::Key(ctrl_c), &hub, &shutdown));
        assert!(shutdown.is_requested());
        assert!(hub.drain_events().is_empty());
    }

    #[test]
    fn unchanged_frames_are_not_rewritten() {
        let board = Arc::new(StatusBoard::new());
        let mut backend = TerminalBackend::new(Vec::new(), Arc::clone(&board), 6);
        board.set_line(0, "fps 60");
        board.set_line(1, "\x1b[32mready\x1b[0m");

        for _ in 0..3 {
            assert!(backend.begin_frame().unwrap());
            backend.draw_ui().unwrap();
            backend.present().unwrap();
        }
        assert_eq!(backend.writes(), 1);
        let written = String::from_utf8(backend.writer().clone()).unwrap();
        assert_eq!(written, "\x1b[1;1Hfps 60\x1b[2;1Hready ");

        board.set_line(0, "fps 59 and more");
        backend.begin_frame().unwrap();
        backend.draw_ui().unwrap();
        backend.present().unwrap();
        assert_eq!(backend.writes(), 2);
        assert!(String::from_utf8_lossy(backend.writer()).ends_with("\x1b[1;1Hfps 59\x1b[2;1Hready "));
    }
}
