use super::queries::SortMode;

/// Interaction mode of the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Normal,
    NewGroup,
    MoveToGroup,
    DeleteConfirm { group: String },
    Search,
    Filter {
        /// Filter in effect when the mode was entered, restored on cancel
        previous: String,
    },
    Sort { index: usize, original: SortMode },
    RenameGroup { old: String },
}

impl InputMode {
    /// Whether typed characters go into the text buffer
    pub fn takes_text(&self) -> bool {
        matches!(
            self,
            InputMode::NewGroup
                | InputMode::MoveToGroup
                | InputMode::Search
                | InputMode::Filter { .. }
                | InputMode::RenameGroup { .. }
        )
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            InputMode::Normal => "",
            InputMode::NewGroup => "New group: ",
            InputMode::MoveToGroup => "Move to group: ",
            InputMode::DeleteConfirm { .. } => "Delete group? (y/n) ",
            InputMode::Search => "/",
            InputMode::Filter { .. } => "Filter: ",
            InputMode::Sort { .. } => "Sort: ",
            InputMode::RenameGroup { .. } => "Rename group: ",
        }
    }
}

/// Which prompt a user opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    NewGroup,
    MoveToGroup,
    DeleteGroup,
    Search,
    Filter,
    Sort,
    RenameGroup,
}

/// Mode plus the line being edited
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputState {
    pub mode: InputMode,
    pub buffer: String,
}

impl InputState {
    pub fn enter(&mut self, mode: InputMode, buffer: impl Into<String>) {
        self.mode = mode;
        self.buffer = buffer.into();
    }

    /// Return to normal mode, handing back the mode that was left and its text
    pub fn leave(&mut self) -> (InputMode, String) {
        let mode = std::mem::take(&mut self.mode);
        let buffer = std::mem::take(&mut self.buffer);
        (mode, buffer)
    }

    pub fn push(&mut self, c: char) -> bool {
        if self.mode.takes_text() && !c.is_control() {
            self.buffer.push(c);
            true
        } else {
            false
        }
    }

    pub fn backspace(&mut self) -> bool {
        self.mode.takes_text() && self.buffer.pop().is_some()
    }

    pub fn is_normal(&self) -> bool {
        self.mode == InputMode::Normal
    }
}
