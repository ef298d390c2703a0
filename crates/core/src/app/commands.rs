use super::input::Prompt;
use super::queries::SortMode;

/// User intents the presenter hands to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    // Navigation
    MoveUp,
    MoveDown,
    PageUp,
    PageDown,
    Home,
    End,
    /// Collapse the group under the cursor, or jump to its header
    Collapse,
    Expand,
    ToggleGroup,

    // Selection
    ToggleSelect,
    /// Select everything visible, or clear when all is already selected
    ToggleSelectAll,
    ClearSelection,

    // Git
    Refresh,
    Fetch,
    Pull,
    ShowLog,
    ShowDiff,
    /// Discard every known repository and scan the base directory again
    Rescan,

    // Grouping
    CreateGroup(String),
    MoveToGroup(String),
    DeleteGroup(String),
    RenameGroup { from: String, to: String },
    Hide,
    MoveGroupUp,
    MoveGroupDown,

    // Search, filter and sort
    Search(String),
    NextMatch,
    PrevMatch,
    SetFilter(String),
    SetSort(SortMode),

    // Prompts
    Open(Prompt),
    InputChar(char),
    Backspace,
    Confirm,
    Cancel,

    // Panels
    ToggleInfo,
    ToggleHelp,
    ScrollOverlay(i32),
    CloseOverlay,

    Quit,
}
