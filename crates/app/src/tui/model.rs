use gitagrip_core::app::Coordinator;
use std::time::{Duration, Instant};

/// Second `g` must follow the first within this window to jump to the top
pub const GG_WINDOW: Duration = Duration::from_millis(500);

/// Rows taken by everything except the repository list: title, list
/// borders, prompt line and status line
pub const CHROME_HEIGHT: u16 = 5;

/// The TUI Model: the coordinator, which owns the view state, plus the few
/// things only the terminal side knows about
pub struct TuiModel {
    pub coordinator: Coordinator,

    /// Pending first `g` of a `gg` chord
    pub pending_g: Option<Instant>,

    /// Terminal size
    pub terminal_width: u16,
    pub terminal_height: u16,

    /// Generation of the rows last drawn
    drawn_generation: Option<u64>,
    dirty: bool,
}

impl TuiModel {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            pending_g: None,
            terminal_width: 0,
            terminal_height: 0,
            drawn_generation: None,
            dirty: true,
        }
    }

    /// Record a new terminal size and resize the list viewport to match
    pub fn resize(&mut self, width: u16, height: u16) {
        if (width, height) == (self.terminal_width, self.terminal_height) {
            return;
        }
        self.terminal_width = width;
        self.terminal_height = height;
        let rows = height.saturating_sub(CHROME_HEIGHT).max(1);
        self.coordinator.set_viewport_height(rows as usize);
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether something changed since the last frame
    pub fn needs_redraw(&self) -> bool {
        self.dirty || self.drawn_generation != Some(self.coordinator.generation())
    }

    pub fn mark_drawn(&mut self) {
        self.dirty = false;
        self.drawn_generation = Some(self.coordinator.generation());
    }

    pub fn should_quit(&self) -> bool {
        self.coordinator.should_quit()
    }

    /// Consume a `g` press, returning true when it completes `gg`
    pub fn take_gg(&mut self, now: Instant) -> bool {
        match self.pending_g.take() {
            Some(first) if now.saturating_duration_since(first) < GG_WINDOW => true,
            _ => {
                self.pending_g = Some(now);
                false
            }
        }
    }
}
