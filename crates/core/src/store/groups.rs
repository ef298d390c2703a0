use crate::domain::{is_hidden_group, Event, Group, HIDDEN_GROUP};
use crate::error::{CoreError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Authoritative mapping of group name to [`Group`], plus the display order.
///
/// A repository belongs to at most one group; the reverse index is kept in
/// step with every mutation.
#[derive(Debug, Default)]
pub struct GroupStore {
    inner: Mutex<GroupState>,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct GroupState {
    groups: HashMap<String, Group>,
    repo_to_group: HashMap<PathBuf, String>,
    /// Display order, newest first unless loaded from a persisted order
    order: Vec<String>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GroupState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty group. Rejects empty and duplicate names.
    pub fn add_group(&self, name: &str) -> Result<()> {
        let name = validate_name(name)?;
        let mut state = self.lock();
        if state.groups.contains_key(name) {
            return Err(CoreError::DuplicateGroup {
                name: name.to_string(),
            });
        }
        state.insert_group(Group::new(name));
        Ok(())
    }

    /// Delete a group. Its repositories become ungrouped.
    pub fn remove_group(&self, name: &str) -> Result<Group> {
        let mut state = self.lock();
        state.remove_group(name).ok_or_else(|| CoreError::GroupNotFound {
            name: name.to_string(),
        })
    }

    /// Rename a group, keeping its members and its position in the order
    pub fn rename_group(&self, old: &str, new: &str) -> Result<()> {
        let new = validate_name(new)?;
        if is_hidden_group(old) || is_hidden_group(new) {
            return Err(CoreError::InvalidGroupName {
                name: new.to_string(),
            });
        }
        let mut state = self.lock();
        if state.groups.contains_key(new) {
            return Err(CoreError::DuplicateGroup {
                name: new.to_string(),
            });
        }
        let mut group = state.groups.remove(old).ok_or_else(|| CoreError::GroupNotFound {
            name: old.to_string(),
        })?;

        group.name = new.to_string();
        for repo in &group.repos {
            state.repo_to_group.insert(repo.clone(), new.to_string());
        }
        for entry in state.order.iter_mut().filter(|n| n.as_str() == old) {
            *entry = new.to_string();
        }
        state.groups.insert(new.to_string(), group);
        Ok(())
    }

    /// Move a repository into `to`, removing it from every other group first.
    /// The target group is created when missing; an empty `to` ungroups the
    /// repository. A source group left empty by the move is destroyed.
    /// Returns the previous group name (empty when it was ungrouped).
    pub fn move_repo(&self, path: &Path, to: &str) -> String {
        let mut state = self.lock();
        state.move_repo(path, to)
    }

    /// Group the repository belongs to, if any
    pub fn group_of(&self, path: &Path) -> Option<String> {
        self.lock().repo_to_group.get(path).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Group> {
        self.lock().groups.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().groups.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().groups.is_empty()
    }

    /// Group names in display order with the hidden group last
    pub fn ordered_names(&self) -> Vec<String> {
        self.lock().ordered_names()
    }

    /// Copies of every group in display order
    pub fn get_all(&self) -> Vec<Group> {
        let state = self.lock();
        state
            .ordered_names()
            .iter()
            .filter_map(|name| state.groups.get(name).cloned())
            .collect()
    }

    /// Swap a group with its neighbour in the display order. The hidden
    /// group never moves and nothing moves past it.
    pub fn move_group(&self, name: &str, up: bool) -> bool {
        if is_hidden_group(name) {
            return false;
        }
        let mut state = self.lock();
        let visible: Vec<String> = state
            .order
            .iter()
            .filter(|n| !is_hidden_group(n))
            .cloned()
            .collect();
        let Some(pos) = visible.iter().position(|n| n == name) else {
            return false;
        };
        let target = if up {
            match pos.checked_sub(1) {
                Some(t) => t,
                None => return false,
            }
        } else if pos + 1 < visible.len() {
            pos + 1
        } else {
            return false;
        };

        let mut reordered = visible;
        reordered.swap(pos, target);
        if state.groups.contains_key(HIDDEN_GROUP) {
            reordered.push(HIDDEN_GROUP.to_string());
        }
        state.order = reordered;
        true
    }

    /// Replace every group, e.g. with the contents of a config file.
    /// Names listed in `order` come first, the rest follow alphabetically.
    /// A repository listed in several groups stays in the first one.
    pub fn replace_all(&self, groups: BTreeMap<String, Group>, order: &[String]) {
        let mut fresh = GroupState::default();

        let mut names: Vec<String> = Vec::with_capacity(groups.len());
        let listed = order.iter().filter(|n| groups.contains_key(n.as_str()));
        for name in listed.chain(groups.keys()) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        for name in &names {
            let Some(group) = groups.get(name) else {
                continue;
            };
            if name.trim().is_empty() {
                continue;
            }
            let mut kept = Group::new(name.clone());
            for repo in &group.repos {
                if !fresh.repo_to_group.contains_key(repo) {
                    fresh.repo_to_group.insert(repo.clone(), name.clone());
                    kept.add_repo(repo.clone());
                }
            }
            fresh.groups.insert(name.clone(), kept);
            fresh.order.push(name.clone());
        }

        *self.lock() = fresh;
    }

    /// Snapshot in the shape persisted to the config file
    pub fn to_config(&self) -> (BTreeMap<String, Vec<PathBuf>>, Vec<String>) {
        let state = self.lock();
        let groups = state
            .groups
            .iter()
            .map(|(name, group)| (name.clone(), group.repos.clone()))
            .collect();
        (groups, state.ordered_names())
    }

    /// Apply a grouping or config event. Replays of changes already made are
    /// no-ops. Returns true when membership or order changed.
    pub fn apply(&self, event: &Event) -> bool {
        match event {
            Event::GroupAdded { name } => self.add_group(name).is_ok(),
            Event::GroupRemoved { name } => self.remove_group(name).is_ok(),
            Event::GroupRenamed { from, to } => self.rename_group(from, to).is_ok(),
            Event::RepoMoved { path, to, .. } => {
                let mut state = self.lock();
                let current = state.repo_to_group.get(path).cloned().unwrap_or_default();
                if &current == to {
                    return false;
                }
                state.move_repo(path, to);
                true
            }
            Event::ConfigLoaded { groups, .. } => {
                let order = self.ordered_names();
                let before = self.lock().clone();
                self.replace_all(groups.clone(), &order);
                *self.lock() != before
            }
            _ => false,
        }
    }
}

impl GroupState {
    fn insert_group(&mut self, group: Group) {
        // Newest groups are listed first
        self.order.retain(|n| n != &group.name);
        self.order.insert(0, group.name.clone());
        self.groups.insert(group.name.clone(), group);
    }

    fn remove_group(&mut self, name: &str) -> Option<Group> {
        let group = self.groups.remove(name)?;
        for repo in &group.repos {
            self.repo_to_group.remove(repo);
        }
        self.order.retain(|n| n != name);
        Some(group)
    }

    fn move_repo(&mut self, path: &Path, to: &str) -> String {
        let to = to.trim();
        let previous = self.repo_to_group.remove(path).unwrap_or_default();

        // Detach from every group, not only the indexed one
        let mut emptied = Vec::new();
        for group in self.groups.values_mut() {
            if group.name != to && group.remove_repo(path) && group.is_empty() {
                emptied.push(group.name.clone());
            }
        }
        for name in emptied {
            self.remove_group(&name);
        }

        if !to.is_empty() {
            if !self.groups.contains_key(to) {
                self.insert_group(Group::new(to));
            }
            if let Some(group) = self.groups.get_mut(to) {
                group.add_repo(path.to_path_buf());
            }
            self.repo_to_group.insert(path.to_path_buf(), to.to_string());
        }
        previous
    }

    fn ordered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .order
            .iter()
            .filter(|n| !is_hidden_group(n) && self.groups.contains_key(n.as_str()))
            .cloned()
            .collect();
        if self.groups.contains_key(HIDDEN_GROUP) {
            names.push(HIDDEN_GROUP.to_string());
        }
        names
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidGroupName {
            name: name.to_string(),
        });
    }
    Ok(trimmed)
}
