use super::model::TuiModel;
use crossterm::event::{KeyCode, KeyModifiers};
use gitagrip_core::app::{InputMode, Intent, Prompt, Row};
use std::time::Instant;

/// Overlay lines moved by PageUp/PageDown
const OVERLAY_PAGE: i32 = 10;

/// The Update function: turns key presses into coordinator intents
pub struct TuiUpdate;

impl TuiUpdate {
    /// Handle a key press. Returns true when the screen should be redrawn.
    pub fn handle_key(model: &mut TuiModel, key: KeyCode, modifiers: KeyModifiers, now: Instant) -> bool {
        let Some(intent) = Self::intent_for(model, key, modifiers, now) else {
            return false;
        };
        model.coordinator.handle(intent);
        model.mark_dirty();
        true
    }

    /// Handle terminal resize
    pub fn handle_resize(model: &mut TuiModel, width: u16, height: u16) {
        model.resize(width, height);
    }

    /// Map a key to an intent according to the current mode
    pub fn intent_for(model: &mut TuiModel, key: KeyCode, modifiers: KeyModifiers, now: Instant) -> Option<Intent> {
        if key == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
            return Some(Intent::Quit);
        }
        if key != KeyCode::Char('g') {
            model.pending_g = None;
        }

        let coordinator = &model.coordinator;
        match &coordinator.input().mode {
            InputMode::Normal => {}
            InputMode::DeleteConfirm { .. } => return Self::confirm_keys(key),
            InputMode::Sort { .. } => return Self::sort_keys(key),
            _ => return Self::text_keys(key),
        }

        if coordinator.overlay().is_some() {
            return Self::overlay_keys(key);
        }
        if coordinator.show_help() {
            // Any key closes help
            return Some(Intent::ToggleHelp);
        }
        Self::normal_keys(model, key, modifiers, now)
    }

    fn confirm_keys(key: KeyCode) -> Option<Intent> {
        match key {
            KeyCode::Char(c) => Some(Intent::InputChar(c)),
            KeyCode::Enter => Some(Intent::Confirm),
            KeyCode::Esc => Some(Intent::Cancel),
            _ => None,
        }
    }

    fn sort_keys(key: KeyCode) -> Option<Intent> {
        match key {
            KeyCode::Up | KeyCode::Char('k') => Some(Intent::MoveUp),
            KeyCode::Down | KeyCode::Char('j') => Some(Intent::MoveDown),
            KeyCode::Enter => Some(Intent::Confirm),
            KeyCode::Esc | KeyCode::Char('q') => Some(Intent::Cancel),
            _ => None,
        }
    }

    fn text_keys(key: KeyCode) -> Option<Intent> {
        match key {
            KeyCode::Char(c) => Some(Intent::InputChar(c)),
            KeyCode::Backspace => Some(Intent::Backspace),
            KeyCode::Enter => Some(Intent::Confirm),
            KeyCode::Esc => Some(Intent::Cancel),
            _ => None,
        }
    }

    fn overlay_keys(key: KeyCode) -> Option<Intent> {
        match key {
            KeyCode::Down | KeyCode::Char('j') => Some(Intent::ScrollOverlay(1)),
            KeyCode::Up | KeyCode::Char('k') => Some(Intent::ScrollOverlay(-1)),
            KeyCode::PageDown | KeyCode::Char(' ') => Some(Intent::ScrollOverlay(OVERLAY_PAGE)),
            KeyCode::PageUp => Some(Intent::ScrollOverlay(-OVERLAY_PAGE)),
            KeyCode::Home | KeyCode::Char('g') => Some(Intent::ScrollOverlay(i32::MIN)),
            KeyCode::Esc | KeyCode::Char('q') => Some(Intent::CloseOverlay),
            _ => None,
        }
    }

    fn normal_keys(model: &mut TuiModel, key: KeyCode, modifiers: KeyModifiers, now: Instant) -> Option<Intent> {
        let coordinator = &model.coordinator;
        let on_group = matches!(coordinator.current_row(), Some(Row::GroupHeader { .. }));
        let on_repo = coordinator.current_repo().is_some();
        let has_selection = !coordinator.selection().is_empty();
        let searching = coordinator.search_state().is_active();
        let shift = modifiers.contains(KeyModifiers::SHIFT);
        let ctrl = modifiers.contains(KeyModifiers::CONTROL);

        let intent = match key {
            KeyCode::Up if shift => Intent::MoveGroupUp,
            KeyCode::Down if shift => Intent::MoveGroupDown,
            KeyCode::Up | KeyCode::Char('k') => Intent::MoveUp,
            KeyCode::Down | KeyCode::Char('j') => Intent::MoveDown,
            KeyCode::Left | KeyCode::Char('h') => Intent::Collapse,
            KeyCode::Right | KeyCode::Char('l') => Intent::Expand,
            KeyCode::PageUp => Intent::PageUp,
            KeyCode::PageDown => Intent::PageDown,
            KeyCode::Home => Intent::Home,
            KeyCode::End | KeyCode::Char('G') => Intent::End,
            KeyCode::Char('g') => {
                if model.take_gg(now) {
                    Intent::Home
                } else {
                    return None;
                }
            }
            KeyCode::Enter => Intent::Confirm,
            KeyCode::Esc => Intent::Cancel,

            KeyCode::Char('r') if ctrl => Intent::Rescan,
            KeyCode::Char('f') if ctrl => Intent::Open(Prompt::Filter),
            KeyCode::Char('z') | KeyCode::Tab => Intent::ToggleGroup,
            KeyCode::Char('J') => Intent::MoveGroupDown,
            KeyCode::Char('K') => Intent::MoveGroupUp,
            KeyCode::Char(' ') => Intent::ToggleSelect,
            KeyCode::Char('a') | KeyCode::Char('A') => Intent::ToggleSelectAll,

            KeyCode::Char('r') | KeyCode::F(5) => Intent::Refresh,
            KeyCode::Char('f') if has_selection || on_repo || on_group => Intent::Fetch,
            KeyCode::Char('p') | KeyCode::Char('P') if has_selection || on_repo || on_group => Intent::Pull,
            KeyCode::Char('H') | KeyCode::Char('L') if on_repo => Intent::ShowLog,
            KeyCode::Char('D') if on_repo => Intent::ShowDiff,

            KeyCode::Char('N') if has_selection => Intent::Open(Prompt::NewGroup),
            KeyCode::Char('N') if searching => Intent::PrevMatch,
            KeyCode::Char('n') if searching => Intent::NextMatch,
            KeyCode::Char('m') if has_selection || on_repo => Intent::Open(Prompt::MoveToGroup),
            KeyCode::Char('x') if has_selection || on_repo => Intent::Hide,
            KeyCode::Char('d') if on_group => Intent::Open(Prompt::DeleteGroup),
            KeyCode::Char('R') if on_group => Intent::Open(Prompt::RenameGroup),

            KeyCode::Char('/') => Intent::Open(Prompt::Search),
            KeyCode::Char('F') => Intent::Open(Prompt::Filter),
            KeyCode::Char('s') => Intent::Open(Prompt::Sort),
            KeyCode::Char('i') | KeyCode::Char('I') => Intent::ToggleInfo,
            KeyCode::Char('?') => Intent::ToggleHelp,
            KeyCode::Char('q') => Intent::Quit,
            _ => return None,
        };
        Some(intent)
    }
}
