//! Event-driven coordinator owned by the UI loop.
//!
//! Bus events land in an inbox and are applied to the stores when the UI
//! thread calls [`Coordinator::pump`]. Invalidating events only arm a
//! trailing debounce; the ordered row list is rebuilt once the burst goes
//! quiet. User intents mutate the stores synchronously, so conflicts come
//! back to the caller, and then announce the change on the bus.

use super::commands::Intent;
use super::input::{InputMode, InputState, Prompt};
use super::queries::{derive_rows, Filter, Row, RowKey, RowSource, SortMode};
use super::search::Search;
use super::viewport::{self, Viewport, Window};
use crate::bus::{EventBus, Subscription};
use crate::domain::{is_hidden_group, CommandKind, Event, EventKind, Repository, HIDDEN_GROUP};
use crate::error::{CoreError, Result};
use crate::store::{GroupStore, RepoStore};
use crossbeam_channel::{unbounded, Receiver};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Quiet period before the row list is rebuilt
pub const RECOMPUTE_DEBOUNCE: Duration = Duration::from_millis(100);

/// How long a status line message stays up
pub const STATUS_TTL: Duration = Duration::from_secs(5);

const SUBSCRIBED: &[EventKind] = &[
    EventKind::ScanStarted,
    EventKind::RepoDiscovered,
    EventKind::ReposDiscoveredBatch,
    EventKind::ScanCompleted,
    EventKind::StatusUpdated,
    EventKind::FetchCompleted,
    EventKind::PullCompleted,
    EventKind::CommandExecuted,
    EventKind::LogLoaded,
    EventKind::DiffLoaded,
    EventKind::GroupAdded,
    EventKind::GroupRemoved,
    EventKind::GroupRenamed,
    EventKind::RepoMoved,
    EventKind::ConfigLoaded,
    EventKind::ConfigSaved,
    EventKind::Error,
];

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub base_dir: PathBuf,
    pub autosave_on_exit: bool,
    pub show_ahead_behind: bool,
}

impl CoordinatorOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            autosave_on_exit: true,
            show_ahead_behind: true,
        }
    }
}

/// Transient message shown at the bottom of the screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub is_error: bool,
    set_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Log,
    Diff,
}

/// Scrollable log or diff output for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub kind: OverlayKind,
    pub path: PathBuf,
    pub title: String,
    /// None while the command is still running
    pub text: Option<String>,
    pub scroll: usize,
}

#[derive(Debug, Default)]
struct Debounce {
    deadline: Option<Instant>,
}

impl Debounce {
    fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + RECOMPUTE_DEBOUNCE);
    }

    fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct Coordinator {
    bus: Arc<EventBus>,
    repos: Arc<RepoStore>,
    groups: Arc<GroupStore>,
    options: CoordinatorOptions,
    inbox: Receiver<Event>,
    subscription: Option<Subscription>,

    rows: Vec<Row>,
    generation: u64,
    cursor: usize,
    viewport: Viewport,
    selection: BTreeSet<PathBuf>,
    expanded: HashMap<String, bool>,
    sort: SortMode,
    filter_query: String,
    filter: Filter,
    search: Search,
    input: InputState,
    debounce: Debounce,

    status: Option<StatusLine>,
    scanning: bool,
    busy: HashMap<PathBuf, CommandKind>,
    overlay: Option<Overlay>,
    show_info: bool,
    show_help: bool,
    quit: bool,
}

impl Coordinator {
    /// Subscribe to the bus and build the initial rows from the stores
    pub fn new(
        bus: Arc<EventBus>,
        repos: Arc<RepoStore>,
        groups: Arc<GroupStore>,
        options: CoordinatorOptions,
    ) -> Self {
        let (tx, inbox) = unbounded();
        let subscription = bus.subscribe_many(SUBSCRIBED, move |event| {
            // Receiver gone means the coordinator is shutting down
            let _ = tx.send(event.clone());
        });

        let mut coordinator = Self {
            bus,
            repos,
            groups,
            options,
            inbox,
            subscription: Some(subscription),
            rows: Vec::new(),
            generation: 0,
            cursor: 0,
            viewport: Viewport::default(),
            selection: BTreeSet::new(),
            expanded: HashMap::new(),
            sort: SortMode::default(),
            filter_query: String::new(),
            filter: Filter::All,
            search: Search::default(),
            input: InputState::default(),
            debounce: Debounce::default(),
            status: None,
            scanning: false,
            busy: HashMap::new(),
            overlay: None,
            show_info: false,
            show_help: false,
            quit: false,
        };
        coordinator.recompute(None);
        coordinator
    }

    // ---- event side ------------------------------------------------------

    /// Drain the inbox and run due timers. Returns true when the view
    /// should be redrawn.
    pub fn pump(&mut self, now: Instant) -> bool {
        let mut redraw = false;
        while let Ok(event) = self.inbox.try_recv() {
            redraw |= self.handle_event(&event, now);
        }
        redraw | self.tick(now)
    }

    /// Rebuild the rows when the debounce expired and drop a stale status
    /// message
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut redraw = false;
        if self.debounce.fire(now) {
            self.recompute(None);
            redraw = true;
        }
        if let Some(status) = &self.status {
            if now.saturating_duration_since(status.set_at) >= STATUS_TTL {
                self.status = None;
                redraw = true;
            }
        }
        redraw
    }

    /// Apply one bus event to the stores and view state
    pub fn handle_event(&mut self, event: &Event, now: Instant) -> bool {
        match event {
            Event::RepoDiscovered { .. } | Event::ReposDiscoveredBatch { .. } => {
                if self.repos.apply(event) {
                    self.debounce.touch(now);
                }
                false
            }
            Event::ScanStarted { .. } => {
                self.scanning = true;
                self.set_status_at("Scanning for repositories...", false, now);
                true
            }
            Event::ScanCompleted { count } => {
                self.scanning = false;
                self.set_status_at(format!("Found {} repositories", count), false, now);
                self.debounce.touch(now);
                true
            }
            Event::StatusUpdated { path, .. } => {
                if self.busy.get(path) == Some(&CommandKind::Status) {
                    self.busy.remove(path);
                }
                if self.repos.apply(event) {
                    self.debounce.touch(now);
                }
                false
            }
            Event::CommandExecuted { .. } => {
                if self.repos.apply(event) {
                    self.debounce.touch(now);
                }
                false
            }
            Event::FetchCompleted { path, ok, err } | Event::PullCompleted { path, ok, err } => {
                let verb = match event.kind() {
                    EventKind::FetchCompleted => "Fetch",
                    _ => "Pull",
                };
                self.busy.remove(path);
                self.repos.apply(event);
                if !ok {
                    let name = self.repos.get(path).map(|r| r.display_name).unwrap_or_default();
                    self.set_status_at(format!("{} failed for {}: {}", verb, name, err), true, now);
                }
                self.debounce.touch(now);
                true
            }
            Event::LogLoaded { path, text } | Event::DiffLoaded { path, text } => {
                let kind = match event.kind() {
                    EventKind::LogLoaded => OverlayKind::Log,
                    _ => OverlayKind::Diff,
                };
                match &mut self.overlay {
                    Some(overlay) if overlay.kind == kind && &overlay.path == path => {
                        overlay.text = Some(text.clone());
                        true
                    }
                    _ => false,
                }
            }
            Event::GroupAdded { .. }
            | Event::GroupRemoved { .. }
            | Event::GroupRenamed { .. }
            | Event::RepoMoved { .. }
            | Event::ConfigLoaded { .. } => {
                if self.groups.apply(event) {
                    self.debounce.touch(now);
                }
                false
            }
            Event::ConfigSaved => {
                debug!("configuration saved");
                false
            }
            Event::Error { message, cause } => {
                match cause {
                    Some(cause) => warn!(%message, %cause, "error reported"),
                    None => warn!(%message, "error reported"),
                }
                self.set_status_at(message.clone(), true, now);
                true
            }
            _ => false,
        }
    }

    // ---- intent side -----------------------------------------------------

    /// Apply an intent, turning any conflict into an error status message
    pub fn handle(&mut self, intent: Intent) {
        if let Err(err) = self.apply(intent) {
            debug!(error = %err, "intent rejected");
            self.set_status(err.to_string(), true);
        }
    }

    /// Apply an intent. Grouping conflicts are returned without any state
    /// having changed.
    pub fn apply(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::MoveUp => self.step(false),
            Intent::MoveDown => self.step(true),
            Intent::PageUp => {
                let target = self.cursor.saturating_sub(self.viewport.page_size());
                self.focus(target);
            }
            Intent::PageDown => {
                let target = self.cursor + self.viewport.page_size();
                self.focus(target);
            }
            Intent::Home => self.focus(viewport::first_row(&self.rows)),
            Intent::End => self.focus(viewport::last_row(&self.rows)),
            Intent::Collapse => self.collapse(),
            Intent::Expand => {
                if let Some(Row::GroupHeader { name, expanded: false, .. }) = self.current_row() {
                    let name = name.clone();
                    self.expanded.insert(name, true);
                    self.recompute(None);
                }
            }
            Intent::ToggleGroup => self.toggle_group(),

            Intent::ToggleSelect => self.toggle_select(),
            Intent::ToggleSelectAll => {
                let visible: Vec<PathBuf> = self
                    .rows
                    .iter()
                    .filter_map(Row::repo)
                    .map(|r| r.path.clone())
                    .collect();
                if !visible.is_empty() && visible.iter().all(|p| self.selection.contains(p)) {
                    self.selection.clear();
                } else {
                    self.selection.extend(visible);
                }
            }
            Intent::ClearSelection => self.selection.clear(),

            Intent::Refresh => self.refresh(),
            Intent::Fetch => self.fetch_or_pull(CommandKind::Fetch),
            Intent::Pull => self.fetch_or_pull(CommandKind::Pull),
            Intent::ShowLog => self.open_overlay(OverlayKind::Log),
            Intent::ShowDiff => self.open_overlay(OverlayKind::Diff),
            Intent::Rescan => self.rescan(),

            Intent::CreateGroup(name) => self.create_group(&name)?,
            Intent::MoveToGroup(name) => self.move_to_group(&name)?,
            Intent::Hide => self.move_to_group(HIDDEN_GROUP)?,
            Intent::DeleteGroup(name) => self.delete_group(&name)?,
            Intent::RenameGroup { from, to } => self.rename_group(&from, &to)?,
            Intent::MoveGroupUp => self.move_group(true),
            Intent::MoveGroupDown => self.move_group(false),

            Intent::Search(query) => self.search(&query),
            Intent::NextMatch => {
                if let Some(row) = self.search.next() {
                    self.focus(row);
                }
            }
            Intent::PrevMatch => {
                if let Some(row) = self.search.prev() {
                    self.focus(row);
                }
            }
            Intent::SetFilter(query) => self.set_filter(&query),
            Intent::SetSort(mode) => {
                self.sort = mode;
                self.recompute(None);
            }

            Intent::Open(prompt) => self.open_prompt(prompt),
            Intent::InputChar(c) => return self.input_char(c),
            Intent::Backspace => {
                if self.input.backspace() {
                    self.live_update();
                }
            }
            Intent::Confirm => return self.confirm(),
            Intent::Cancel => self.cancel(),

            Intent::ToggleInfo => self.show_info = !self.show_info,
            Intent::ToggleHelp => self.show_help = !self.show_help,
            Intent::ScrollOverlay(delta) => {
                if let Some(overlay) = &mut self.overlay {
                    overlay.scroll = if delta < 0 {
                        overlay.scroll.saturating_sub(delta.unsigned_abs() as usize)
                    } else {
                        overlay.scroll.saturating_add(delta as usize)
                    };
                }
            }
            Intent::CloseOverlay => self.overlay = None,

            Intent::Quit => {
                if self.options.autosave_on_exit {
                    self.publish_config();
                }
                self.quit = true;
            }
        }
        Ok(())
    }

    fn step(&mut self, down: bool) {
        if let InputMode::Sort { index, original } = self.input.mode {
            let len = SortMode::ALL.len();
            let index = if down { (index + 1) % len } else { (index + len - 1) % len };
            self.input.mode = InputMode::Sort { index, original };
            self.sort = SortMode::at(index);
            self.recompute(None);
            return;
        }
        let target = if down {
            viewport::next_row(&self.rows, self.cursor)
        } else {
            viewport::prev_row(&self.rows, self.cursor)
        };
        self.focus(target);
    }

    fn collapse(&mut self) {
        match self.current_row() {
            Some(Row::GroupHeader { name, expanded: true, .. }) => {
                let name = name.clone();
                self.expanded.insert(name, false);
                self.recompute(None);
            }
            Some(Row::Repo(repo)) if !repo.group.is_empty() => {
                let name = repo.group.clone();
                self.expanded.insert(name.clone(), false);
                self.recompute(Some(RowKey::Group(name)));
            }
            _ => {}
        }
    }

    fn toggle_group(&mut self) {
        match self.current_row() {
            Some(Row::GroupHeader { name, expanded, .. }) => {
                let (name, expanded) = (name.clone(), *expanded);
                self.expanded.insert(name, !expanded);
                self.recompute(None);
            }
            Some(Row::Repo(repo)) if !repo.group.is_empty() => {
                let name = repo.group.clone();
                self.expanded.insert(name.clone(), false);
                self.recompute(Some(RowKey::Group(name)));
            }
            _ => {}
        }
    }

    fn toggle_select(&mut self) {
        match self.current_row() {
            Some(Row::Repo(repo)) => {
                let path = repo.path.clone();
                if !self.selection.remove(&path) {
                    self.selection.insert(path);
                }
            }
            Some(Row::GroupHeader { name, .. }) => {
                let members = self.group_members(&name.clone());
                if !members.is_empty() && members.iter().all(|p| self.selection.contains(p)) {
                    for path in &members {
                        self.selection.remove(path);
                    }
                } else {
                    self.selection.extend(members);
                }
            }
            _ => {}
        }
    }

    /// Members of a group that are known and pass the filter
    fn group_members(&self, name: &str) -> Vec<PathBuf> {
        let Some(group) = self.groups.get(name) else {
            return Vec::new();
        };
        group
            .repos
            .into_iter()
            .filter(|path| {
                self.repos
                    .get(path)
                    .is_some_and(|repo| self.filter.matches(&repo))
            })
            .collect()
    }

    /// Selected repositories, else the repository or group under the cursor
    fn targets(&self) -> Vec<PathBuf> {
        if !self.selection.is_empty() {
            return self.selection.iter().cloned().collect();
        }
        match self.current_row() {
            Some(Row::Repo(repo)) => vec![repo.path.clone()],
            Some(Row::GroupHeader { name, .. }) => self.group_members(name),
            _ => Vec::new(),
        }
    }

    /// Selected repositories, else the repository under the cursor
    fn repo_targets(&self) -> Vec<PathBuf> {
        if !self.selection.is_empty() {
            return self.selection.iter().cloned().collect();
        }
        self.current_repo().map(|r| vec![r.path.clone()]).unwrap_or_default()
    }

    fn refresh(&mut self) {
        let paths: Vec<PathBuf> = self.selection.iter().cloned().collect();
        let targets = if paths.is_empty() { self.repos.paths() } else { paths.clone() };
        for path in &targets {
            self.busy.insert(path.clone(), CommandKind::Status);
        }
        if paths.is_empty() {
            self.set_status("Refreshing all repositories", false);
        } else {
            self.set_status(format!("Refreshing {} repositories", paths.len()), false);
        }
        // An empty list asks for every known repository
        self.bus.publish(Event::StatusRefreshRequested { paths });
    }

    fn fetch_or_pull(&mut self, kind: CommandKind) {
        let paths = self.targets();
        if paths.is_empty() {
            self.set_status("No repository selected", false);
            return;
        }
        for path in &paths {
            self.busy.insert(path.clone(), kind);
        }
        let verb = match kind {
            CommandKind::Pull => "Pulling",
            _ => "Fetching",
        };
        self.set_status(format!("{} {} repositories", verb, paths.len()), false);
        info!(count = paths.len(), command = %kind, "git operation requested");
        let event = match kind {
            CommandKind::Pull => Event::PullRequested { paths },
            _ => Event::FetchRequested { paths },
        };
        self.bus.publish(event);
    }

    fn open_overlay(&mut self, kind: OverlayKind) {
        let Some(repo) = self.current_repo() else {
            return;
        };
        let path = repo.path.clone();
        let title = match kind {
            OverlayKind::Log => format!("Log: {}", repo.display_name),
            OverlayKind::Diff => format!("Diff: {}", repo.display_name),
        };
        self.overlay = Some(Overlay {
            kind,
            path: path.clone(),
            title,
            text: None,
            scroll: 0,
        });
        self.bus.publish(match kind {
            OverlayKind::Log => Event::LogRequested { path },
            OverlayKind::Diff => Event::DiffRequested { path },
        });
    }

    fn rescan(&mut self) {
        info!(base = %self.options.base_dir.display(), "rescan requested");
        self.repos.clear();
        self.selection.clear();
        self.busy.clear();
        self.recompute(None);
        self.bus.publish(Event::ScanRequested {
            paths: vec![self.options.base_dir.clone()],
        });
    }

    fn create_group(&mut self, name: &str) -> Result<()> {
        self.groups.add_group(name)?;
        let name = name.trim().to_string();
        self.bus.publish(Event::GroupAdded { name: name.clone() });

        let moved = self.move_paths(self.repo_targets_from_selection(), &name);
        self.expanded.insert(name.clone(), !is_hidden_group(&name));
        self.selection.clear();
        self.recompute(Some(RowKey::Group(name.clone())));
        self.publish_config();

        if moved == 0 {
            self.set_status(format!("Created group '{}'", name), false);
        } else {
            self.set_status(format!("Created group '{}' with {} repositories", name, moved), false);
        }
        Ok(())
    }

    fn repo_targets_from_selection(&self) -> Vec<PathBuf> {
        self.selection.iter().cloned().collect()
    }

    fn move_to_group(&mut self, name: &str) -> Result<()> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::InvalidGroupName { name });
        }
        let paths = self.repo_targets();
        if paths.is_empty() {
            self.set_status("No repository selected", false);
            return Ok(());
        }
        if !self.groups.contains(&name) {
            self.groups.add_group(&name)?;
            self.bus.publish(Event::GroupAdded { name: name.clone() });
        }

        let moved = self.move_paths(paths, &name);
        self.selection.clear();
        self.recompute(None);
        self.publish_config();

        if is_hidden_group(&name) {
            self.set_status(format!("Hid {} repositories", moved), false);
        } else {
            self.set_status(format!("Moved {} repositories to '{}'", moved, name), false);
        }
        Ok(())
    }

    fn move_paths(&mut self, paths: Vec<PathBuf>, to: &str) -> usize {
        let mut moved = 0;
        for path in paths {
            let from = self.groups.move_repo(&path, to);
            if from != to {
                moved += 1;
                self.bus.publish(Event::RepoMoved {
                    path,
                    from,
                    to: to.to_string(),
                });
            }
        }
        moved
    }

    fn delete_group(&mut self, name: &str) -> Result<()> {
        let removed = self.groups.remove_group(name)?;
        self.expanded.remove(name);
        self.bus.publish(Event::GroupRemoved {
            name: removed.name.clone(),
        });
        self.recompute(None);
        self.publish_config();
        self.set_status(format!("Deleted group '{}'", removed.name), false);
        Ok(())
    }

    fn rename_group(&mut self, from: &str, to: &str) -> Result<()> {
        self.groups.rename_group(from, to)?;
        let to = to.trim().to_string();
        if let Some(expanded) = self.expanded.remove(from) {
            self.expanded.insert(to.clone(), expanded);
        }
        self.bus.publish(Event::GroupRenamed {
            from: from.to_string(),
            to: to.clone(),
        });
        self.recompute(Some(RowKey::Group(to.clone())));
        self.publish_config();
        self.set_status(format!("Renamed group '{}' to '{}'", from, to), false);
        Ok(())
    }

    fn move_group(&mut self, up: bool) {
        let name = match self.current_row() {
            Some(Row::GroupHeader { name, .. }) => name.clone(),
            Some(Row::Repo(repo)) if !repo.group.is_empty() => repo.group.clone(),
            _ => return,
        };
        if self.groups.move_group(&name, up) {
            self.recompute(None);
            self.publish_config();
        }
    }

    fn search(&mut self, query: &str) {
        if query.trim().is_empty() {
            self.search.clear();
            return;
        }
        match self.search.start(query, &self.rows) {
            Some(row) => self.focus(row),
            None => self.set_status(format!("No matches for '{}'", query.trim()), false),
        }
    }

    fn set_filter(&mut self, query: &str) {
        self.filter_query = query.trim().to_string();
        self.filter = Filter::parse(&self.filter_query);
        self.recompute(None);
    }

    fn open_prompt(&mut self, prompt: Prompt) {
        match prompt {
            Prompt::NewGroup => self.input.enter(InputMode::NewGroup, ""),
            Prompt::MoveToGroup => {
                if self.repo_targets().is_empty() {
                    self.set_status("No repository selected", false);
                } else {
                    self.input.enter(InputMode::MoveToGroup, "");
                }
            }
            Prompt::DeleteGroup => match self.current_row() {
                Some(Row::GroupHeader { name, .. }) => {
                    let group = name.clone();
                    self.input.enter(InputMode::DeleteConfirm { group }, "");
                }
                _ => self.set_status("Move to a group header to delete it", false),
            },
            Prompt::Search => {
                let query = self.search.query().to_string();
                self.input.enter(InputMode::Search, query);
            }
            Prompt::Filter => {
                let previous = self.filter_query.clone();
                self.input.enter(InputMode::Filter { previous: previous.clone() }, previous);
            }
            Prompt::Sort => {
                let mode = InputMode::Sort {
                    index: self.sort.index(),
                    original: self.sort,
                };
                self.input.enter(mode, "");
            }
            Prompt::RenameGroup => match self.current_row() {
                Some(Row::GroupHeader { name, .. }) if !is_hidden_group(name) => {
                    let old = name.clone();
                    self.input.enter(InputMode::RenameGroup { old: old.clone() }, old);
                }
                _ => self.set_status("Move to a group header to rename it", false),
            },
        }
    }

    fn input_char(&mut self, c: char) -> Result<()> {
        if let InputMode::DeleteConfirm { .. } = self.input.mode {
            return match c {
                'y' | 'Y' => self.confirm(),
                _ => {
                    self.cancel();
                    Ok(())
                }
            };
        }
        if self.input.push(c) {
            self.live_update();
        }
        Ok(())
    }

    /// Search and filter follow the text as it is typed
    fn live_update(&mut self) {
        let buffer = self.input.buffer.clone();
        match self.input.mode {
            InputMode::Search => {
                if buffer.trim().is_empty() {
                    self.search.clear();
                } else if let Some(row) = self.search.start(&buffer, &self.rows) {
                    self.focus(row);
                }
            }
            InputMode::Filter { .. } => self.set_filter(&buffer),
            _ => {}
        }
    }

    fn confirm(&mut self) -> Result<()> {
        let (mode, buffer) = self.input.leave();
        let text = buffer.trim().to_string();
        match mode {
            InputMode::Normal => match self.current_row() {
                Some(Row::GroupHeader { .. }) => self.toggle_group(),
                Some(Row::Repo(_)) => self.show_info = !self.show_info,
                _ => {}
            },
            InputMode::NewGroup if !text.is_empty() => self.create_group(&text)?,
            InputMode::MoveToGroup if !text.is_empty() => self.move_to_group(&text)?,
            InputMode::DeleteConfirm { group } => self.delete_group(&group)?,
            InputMode::Search => self.search(&text),
            InputMode::Filter { .. } => self.set_filter(&text),
            InputMode::Sort { .. } => {
                self.set_status(format!("Sorted by {}", self.sort.label()), false);
            }
            InputMode::RenameGroup { old } if !text.is_empty() && text != old => {
                self.rename_group(&old, &text)?
            }
            _ => {}
        }
        Ok(())
    }

    fn cancel(&mut self) {
        let (mode, _) = self.input.leave();
        match mode {
            InputMode::Normal => {
                if self.overlay.is_some() {
                    self.overlay = None;
                } else if self.show_help || self.show_info {
                    self.show_help = false;
                    self.show_info = false;
                } else if !self.selection.is_empty() {
                    self.selection.clear();
                } else if self.search.is_active() {
                    self.search.clear();
                } else if self.filter.is_active() {
                    self.set_filter("");
                }
            }
            InputMode::Search => self.search.clear(),
            InputMode::Filter { previous } => self.set_filter(&previous),
            InputMode::Sort { original, .. } => {
                self.sort = original;
                self.recompute(None);
            }
            _ => {}
        }
    }

    // ---- shared helpers --------------------------------------------------

    fn publish_config(&self) {
        let (groups, group_order) = self.groups.to_config();
        self.bus.publish(Event::ConfigChanged { groups, group_order });
    }

    fn is_expanded(expanded: &HashMap<String, bool>, name: &str) -> bool {
        expanded.get(name).copied().unwrap_or(!is_hidden_group(name))
    }

    /// Rebuild the rows from the stores, keeping the cursor on `focus` or
    /// on the row it was on before
    fn recompute(&mut self, focus: Option<RowKey>) {
        self.debounce.deadline = None;
        let key = focus.or_else(|| self.current_row().and_then(Row::key));

        let repos: HashMap<PathBuf, Repository> = self
            .repos
            .get_all()
            .into_iter()
            .map(|repo| (repo.path.clone(), repo))
            .collect();
        let groups = self.groups.get_all();
        let expanded_state = &self.expanded;
        let expanded = |name: &str| Self::is_expanded(expanded_state, name);
        let rows = derive_rows(&RowSource {
            groups: &groups,
            repos: &repos,
            expanded: &expanded,
            sort: self.sort,
            filter: &self.filter,
        });

        self.selection.retain(|path| repos.contains_key(path));
        self.busy.retain(|path, _| repos.contains_key(path));
        self.rows = rows;

        let index = key
            .and_then(|key| self.rows.iter().position(|row| row.key().as_ref() == Some(&key)))
            .unwrap_or(self.cursor);
        self.cursor = viewport::settle(&self.rows, index);
        self.search.rebuild(&self.rows);
        self.viewport.ensure_visible(self.cursor, self.rows.len());
        self.generation += 1;
    }

    fn focus(&mut self, index: usize) {
        self.cursor = viewport::settle(&self.rows, index);
        self.viewport.ensure_visible(self.cursor, self.rows.len());
    }

    fn set_status(&mut self, text: impl Into<String>, is_error: bool) {
        self.set_status_at(text, is_error, Instant::now());
    }

    fn set_status_at(&mut self, text: impl Into<String>, is_error: bool, now: Instant) {
        self.status = Some(StatusLine {
            text: text.into(),
            is_error,
            set_at: now,
        });
    }

    // ---- view accessors --------------------------------------------------

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Incremented every time the row list is rebuilt
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_row(&self) -> Option<&Row> {
        self.rows.get(self.cursor)
    }

    pub fn current_repo(&self) -> Option<&Repository> {
        self.current_row().and_then(Row::repo)
    }

    pub fn set_viewport_height(&mut self, height: usize) {
        if self.viewport.height != height.max(1) {
            self.viewport.set_height(height);
            self.viewport.ensure_visible(self.cursor, self.rows.len());
        }
    }

    pub fn window(&self) -> Window {
        self.viewport.window(self.rows.len())
    }

    pub fn is_selected(&self, path: &Path) -> bool {
        self.selection.contains(path)
    }

    pub fn selection(&self) -> &BTreeSet<PathBuf> {
        &self.selection
    }

    pub fn busy(&self, path: &Path) -> Option<CommandKind> {
        self.busy.get(path).copied()
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    pub fn filter_query(&self) -> &str {
        &self.filter_query
    }

    pub fn search_state(&self) -> &Search {
        &self.search
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn show_info(&self) -> bool {
        self.show_info
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    pub fn repo_count(&self) -> usize {
        self.repos.len()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RepoStatus;
    use std::sync::Mutex;

    struct Harness {
        bus: Arc<EventBus>,
        repos: Arc<RepoStore>,
        groups: Arc<GroupStore>,
        seen: Arc<Mutex<Vec<Event>>>,
        _recorder: Subscription,
    }

    impl Harness {
        fn new() -> Self {
            let bus = Arc::new(EventBus::new());
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = seen.clone();
            let recorder = bus.subscribe_many(
                &[
                    EventKind::ScanRequested,
                    EventKind::StatusRefreshRequested,
                    EventKind::FetchRequested,
                    EventKind::GroupAdded,
                    EventKind::RepoMoved,
                    EventKind::ConfigChanged,
                ],
                move |event| sink.lock().unwrap().push(event.clone()),
            );
            Self {
                bus,
                repos: Arc::new(RepoStore::with_base_dir("/w")),
                groups: Arc::new(GroupStore::new()),
                seen,
                _recorder: recorder,
            }
        }

        fn coordinator(&self) -> Coordinator {
            Coordinator::new(
                self.bus.clone(),
                self.repos.clone(),
                self.groups.clone(),
                CoordinatorOptions::new("/w"),
            )
        }

        fn events(&self) -> Vec<Event> {
            assert!(self.bus.wait_idle(Duration::from_secs(2)));
            self.seen.lock().unwrap().clone()
        }
    }

    fn discovered(path: &str) -> Event {
        Event::RepoDiscovered {
            repo: Repository::new(path),
        }
    }

    fn status(branch: &str, dirty: bool) -> RepoStatus {
        RepoStatus {
            branch: branch.into(),
            is_dirty: dirty,
            ..RepoStatus::default()
        }
    }

    fn repo_names(c: &Coordinator) -> Vec<String> {
        c.rows().iter().filter_map(Row::repo).map(|r| r.name.clone()).collect()
    }

    fn select(c: &mut Coordinator, name: &str) {
        let index = c
            .rows()
            .iter()
            .position(|row| row.repo().is_some_and(|r| r.name == name))
            .unwrap();
        c.focus(index);
        c.apply(Intent::ToggleSelect).unwrap();
    }

    #[test]
    fn test_discovery_burst_recomputes_once() {
        let h = Harness::new();
        let mut c = h.coordinator();
        let start = Instant::now();
        let before = c.generation();

        for i in 0..1000u64 {
            let now = start + Duration::from_micros(i * 40);
            c.handle_event(&discovered(&format!("/w/repo{:04}", i)), now);
        }
        let burst_end = start + Duration::from_millis(40);

        assert!(!c.tick(burst_end + Duration::from_millis(50)));
        assert_eq!(c.generation(), before);

        assert!(c.tick(burst_end + Duration::from_millis(160)));
        assert!(!c.tick(burst_end + Duration::from_millis(200)));
        assert_eq!(c.generation(), before + 1);
        assert_eq!(c.rows().len(), 1000);
    }

    #[test]
    fn test_filter_by_status_and_text() {
        let h = Harness::new();
        let mut c = h.coordinator();
        let now = Instant::now();
        for name in ["R1", "R2", "R3"] {
            c.handle_event(&discovered(&format!("/w/{}", name)), now);
        }
        for (name, branch, dirty) in [("R1", "main", true), ("R2", "main", false), ("R3", "feature", false)] {
            c.handle_event(
                &Event::StatusUpdated {
                    path: PathBuf::from(format!("/w/{}", name)),
                    status: status(branch, dirty),
                },
                now,
            );
        }
        c.tick(now + RECOMPUTE_DEBOUNCE);

        c.apply(Intent::SetFilter("status:dirty".into())).unwrap();
        assert_eq!(repo_names(&c), vec!["R1"]);
        c.apply(Intent::SetFilter("main".into())).unwrap();
        assert_eq!(repo_names(&c), vec!["R1", "R2"]);
        c.apply(Intent::SetFilter(String::new())).unwrap();
        assert_eq!(repo_names(&c), vec!["R1", "R2", "R3"]);
    }

    #[test]
    fn test_create_group_moves_selection_and_announces() {
        let h = Harness::new();
        let mut c = h.coordinator();
        let now = Instant::now();
        for name in ["api", "web", "cli"] {
            c.handle_event(&discovered(&format!("/w/{}", name)), now);
        }
        c.tick(now + RECOMPUTE_DEBOUNCE);
        select(&mut c, "api");
        select(&mut c, "web");

        c.apply(Intent::CreateGroup("Backend".into())).unwrap();

        assert!(c.selection().is_empty());
        assert_eq!(
            c.rows().first(),
            Some(&Row::GroupHeader {
                name: "Backend".into(),
                repo_count: 2,
                expanded: true
            })
        );
        assert_eq!(c.current_row().and_then(Row::group_name), Some("Backend"));

        let events = h.events();
        let moved = events.iter().filter(|e| matches!(e, Event::RepoMoved { .. })).count();
        assert_eq!(moved, 2);
        assert!(events.iter().any(|e| matches!(e, Event::GroupAdded { name } if name == "Backend")));
        assert!(matches!(events.last(), Some(Event::ConfigChanged { .. })));
    }

    #[test]
    fn test_duplicate_group_is_rejected_without_change() {
        let h = Harness::new();
        h.groups.add_group("Backend").unwrap();
        let mut c = h.coordinator();
        let before = h.groups.to_config();

        let result = c.apply(Intent::CreateGroup("Backend".into()));

        assert!(matches!(result, Err(CoreError::DuplicateGroup { .. })));
        assert_eq!(h.groups.to_config(), before);

        c.handle(Intent::CreateGroup("Backend".into()));
        assert!(c.status().is_some_and(|s| s.is_error));
    }

    #[test]
    fn test_collapse_from_repo_jumps_to_header() {
        let h = Harness::new();
        h.repos.add(Repository::new("/w/api"));
        h.repos.add(Repository::new("/w/web"));
        h.groups.move_repo(Path::new("/w/api"), "Backend");
        h.groups.move_repo(Path::new("/w/web"), "Backend");
        let mut c = h.coordinator();

        c.apply(Intent::MoveDown).unwrap();
        c.apply(Intent::MoveDown).unwrap();
        assert_eq!(c.current_repo().map(|r| r.name.as_str()), Some("web"));

        c.apply(Intent::Collapse).unwrap();
        assert_eq!(c.cursor(), 0);
        assert_eq!(
            c.current_row(),
            Some(&Row::GroupHeader {
                name: "Backend".into(),
                repo_count: 2,
                expanded: false
            })
        );

        c.apply(Intent::Expand).unwrap();
        assert_eq!(repo_names(&c), vec!["api", "web"]);
    }

    #[test]
    fn test_hidden_group_starts_collapsed() {
        let h = Harness::new();
        h.repos.add(Repository::new("/w/old"));
        h.repos.add(Repository::new("/w/new"));
        let mut c = h.coordinator();
        select(&mut c, "old");

        c.apply(Intent::Hide).unwrap();

        assert_eq!(repo_names(&c), vec!["new"]);
        assert!(c.rows().iter().any(|row| row.group_name() == Some(HIDDEN_GROUP)));
    }

    #[test]
    fn test_sort_prompt_previews_and_cancel_restores() {
        let h = Harness::new();
        let mut c = h.coordinator();

        c.apply(Intent::Open(Prompt::Sort)).unwrap();
        c.apply(Intent::MoveDown).unwrap();
        assert_eq!(c.sort(), SortMode::Status);
        c.apply(Intent::MoveDown).unwrap();
        assert_eq!(c.sort(), SortMode::Branch);

        c.apply(Intent::Cancel).unwrap();
        assert_eq!(c.sort(), SortMode::Name);
        assert!(c.input().is_normal());

        c.apply(Intent::Open(Prompt::Sort)).unwrap();
        c.apply(Intent::MoveUp).unwrap();
        c.apply(Intent::Confirm).unwrap();
        assert_eq!(c.sort(), SortMode::Path);
    }

    #[test]
    fn test_status_message_expires() {
        let h = Harness::new();
        let mut c = h.coordinator();
        let now = Instant::now();
        c.handle_event(&Event::error("network down", None), now);
        assert_eq!(c.status().map(|s| s.text.as_str()), Some("network down"));

        assert!(!c.tick(now + Duration::from_secs(4)));
        assert!(c.tick(now + STATUS_TTL));
        assert!(c.status().is_none());
    }

    #[test]
    fn test_rescan_clears_store_and_requests_scan() {
        let h = Harness::new();
        h.repos.add(Repository::new("/w/api"));
        let mut c = h.coordinator();
        assert_eq!(c.rows().len(), 1);

        c.apply(Intent::Rescan).unwrap();

        assert!(c.rows().is_empty());
        assert!(h.repos.is_empty());
        assert!(h
            .events()
            .contains(&Event::ScanRequested { paths: vec![PathBuf::from("/w")] }));
    }

    #[test]
    fn test_selection_drops_vanished_repos() {
        let h = Harness::new();
        h.repos.add(Repository::new("/w/api"));
        h.repos.add(Repository::new("/w/web"));
        let mut c = h.coordinator();
        c.apply(Intent::ToggleSelectAll).unwrap();
        assert_eq!(c.selection().len(), 2);

        h.repos.remove(Path::new("/w/web"));
        let now = Instant::now();
        c.handle_event(&Event::ScanCompleted { count: 1 }, now);
        c.tick(now + RECOMPUTE_DEBOUNCE);

        assert_eq!(c.selection().len(), 1);
        assert!(c.is_selected(Path::new("/w/api")));
    }

    #[test]
    fn test_refresh_targets_selection_or_everything() {
        let h = Harness::new();
        h.repos.add(Repository::new("/w/api"));
        h.repos.add(Repository::new("/w/web"));
        let mut c = h.coordinator();

        c.apply(Intent::Refresh).unwrap();
        select(&mut c, "web");
        c.apply(Intent::Refresh).unwrap();
        c.apply(Intent::Fetch).unwrap();

        let requests: Vec<Event> = h
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::StatusRefreshRequested { .. } | Event::FetchRequested { .. }))
            .collect();
        assert_eq!(
            requests,
            vec![
                Event::StatusRefreshRequested { paths: vec![] },
                Event::StatusRefreshRequested {
                    paths: vec![PathBuf::from("/w/web")]
                },
                Event::FetchRequested {
                    paths: vec![PathBuf::from("/w/web")]
                },
            ]
        );
        assert_eq!(c.busy(Path::new("/w/web")), Some(CommandKind::Fetch));
    }

    #[test]
    fn test_search_prompt_moves_cursor_live() {
        let h = Harness::new();
        for name in ["alpha", "beta", "gamma"] {
            h.repos.add(Repository::new(format!("/w/{}", name)));
        }
        let mut c = h.coordinator();

        c.apply(Intent::Open(Prompt::Search)).unwrap();
        c.apply(Intent::InputChar('m')).unwrap();
        c.apply(Intent::InputChar('m')).unwrap();
        assert_eq!(c.current_repo().map(|r| r.name.as_str()), Some("gamma"));

        c.apply(Intent::Confirm).unwrap();
        assert_eq!(c.search_state().query(), "mm");

        c.apply(Intent::Search("a".into())).unwrap();
        assert_eq!(c.current_repo().map(|r| r.name.as_str()), Some("alpha"));
        c.apply(Intent::NextMatch).unwrap();
        assert_eq!(c.current_repo().map(|r| r.name.as_str()), Some("beta"));
        c.apply(Intent::PrevMatch).unwrap();
        c.apply(Intent::PrevMatch).unwrap();
        assert_eq!(c.current_repo().map(|r| r.name.as_str()), Some("gamma"));
    }

    #[test]
    fn test_delete_confirm_prompt() {
        let h = Harness::new();
        h.repos.add(Repository::new("/w/api"));
        h.groups.move_repo(Path::new("/w/api"), "Backend");
        let mut c = h.coordinator();

        c.apply(Intent::Open(Prompt::DeleteGroup)).unwrap();
        c.apply(Intent::InputChar('n')).unwrap();
        assert!(h.groups.contains("Backend"));

        c.apply(Intent::Open(Prompt::DeleteGroup)).unwrap();
        c.apply(Intent::InputChar('y')).unwrap();
        assert!(!h.groups.contains("Backend"));
        assert_eq!(repo_names(&c), vec!["api"]);
    }

    #[test]
    fn test_quit_saves_when_autosave_enabled() {
        let h = Harness::new();
        let mut c = h.coordinator();
        c.apply(Intent::Quit).unwrap();
        assert!(c.should_quit());
        assert!(h.events().iter().any(|e| matches!(e, Event::ConfigChanged { .. })));
    }
}
