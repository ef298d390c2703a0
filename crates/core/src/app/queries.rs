//! Derivation of the ordered row list the view renders

use crate::domain::{is_hidden_group, Group, Repository};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

/// Repository ordering inside a group and among ungrouped repositories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortMode {
    #[default]
    Name,
    Status,
    Branch,
    Path,
}

impl SortMode {
    pub const ALL: [SortMode; 4] = [SortMode::Name, SortMode::Status, SortMode::Branch, SortMode::Path];

    pub fn label(&self) -> &'static str {
        match self {
            SortMode::Name => "Name",
            SortMode::Status => "Status",
            SortMode::Branch => "Branch",
            SortMode::Path => "Path",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SortMode::Name => "Sort by repository name",
            SortMode::Status => "Sort by status (error, dirty, ahead/behind, clean)",
            SortMode::Branch => "Sort by branch name (main/master first)",
            SortMode::Path => "Sort by repository path",
        }
    }

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|m| m == self).unwrap_or(0)
    }

    /// Mode at a cyclic index
    pub fn at(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }
}

/// Status sort bucket: error > dirty/untracked > ahead/behind > clean
pub fn status_priority(repo: &Repository) -> u8 {
    let status = &repo.status;
    if status.has_error() || repo.has_error {
        4
    } else if status.is_dirty || status.has_untracked {
        3
    } else if status.ahead_count > 0 || status.behind_count > 0 {
        2
    } else {
        1
    }
}

fn branch_rank(branch: &str) -> u8 {
    match branch {
        "main" | "master" => 0,
        _ => 1,
    }
}

/// Total order over repositories for a sort mode. Ties break on the
/// case-insensitive name, then on the path.
pub fn compare_repos(a: &Repository, b: &Repository, mode: SortMode) -> Ordering {
    let primary = match mode {
        SortMode::Name => Ordering::Equal,
        SortMode::Status => status_priority(b).cmp(&status_priority(a)),
        SortMode::Branch => branch_rank(&a.status.branch)
            .cmp(&branch_rank(&b.status.branch))
            .then_with(|| {
                a.status
                    .branch
                    .to_lowercase()
                    .cmp(&b.status.branch.to_lowercase())
            }),
        SortMode::Path => a.path.cmp(&b.path),
    };
    primary
        .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
        .then_with(|| a.path.cmp(&b.path))
}

pub fn sort_repos(repos: &mut [Repository], mode: SortMode) {
    repos.sort_by(|a, b| compare_repos(a, b, mode));
}

/// Predicate selected by a `status:<token>` filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Dirty,
    Clean,
    Untracked,
    Ahead,
    Behind,
    Diverged,
    Error,
}

impl StatusFilter {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "dirty" => Some(Self::Dirty),
            "clean" => Some(Self::Clean),
            "untracked" => Some(Self::Untracked),
            "ahead" => Some(Self::Ahead),
            "behind" => Some(Self::Behind),
            "diverged" => Some(Self::Diverged),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    fn matches(&self, repo: &Repository) -> bool {
        let s = &repo.status;
        match self {
            Self::Dirty => s.is_dirty,
            Self::Clean => s.is_clean(),
            Self::Untracked => s.has_untracked,
            Self::Ahead => s.ahead_count > 0,
            Self::Behind => s.behind_count > 0,
            Self::Diverged => s.is_diverged(),
            Self::Error => s.has_error() || repo.has_error,
        }
    }
}

/// Parsed filter query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    All,
    Status(StatusFilter),
    /// Lowercased substring matched against name, path and branch
    Text(String),
}

impl Filter {
    pub fn parse(query: &str) -> Self {
        let query = query.trim();
        if query.is_empty() {
            return Filter::All;
        }
        let lowered = query.to_lowercase();
        if let Some(token) = lowered.strip_prefix("status:") {
            if let Some(status) = StatusFilter::parse(token.trim()) {
                return Filter::Status(status);
            }
        }
        Filter::Text(lowered)
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Filter::All)
    }

    pub fn matches(&self, repo: &Repository) -> bool {
        match self {
            Filter::All => true,
            Filter::Status(status) => status.matches(repo),
            Filter::Text(needle) => repo_contains(repo, needle),
        }
    }
}

/// Case-insensitive substring match on name, path or branch.
/// `needle` must already be lowercase.
pub fn repo_contains(repo: &Repository, needle: &str) -> bool {
    repo.name.to_lowercase().contains(needle)
        || repo.display_name.to_lowercase().contains(needle)
        || repo.path.to_string_lossy().to_lowercase().contains(needle)
        || repo.status.branch.to_lowercase().contains(needle)
}

/// One line of the ordered list
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    GroupHeader {
        name: String,
        /// Members shown after filtering, counted even when collapsed
        repo_count: usize,
        expanded: bool,
    },
    Repo(Repository),
    Gap,
}

impl Row {
    pub fn key(&self) -> Option<RowKey> {
        match self {
            Row::GroupHeader { name, .. } => Some(RowKey::Group(name.clone())),
            Row::Repo(repo) => Some(RowKey::Repo(repo.path.clone())),
            Row::Gap => None,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, Row::Gap)
    }

    pub fn repo(&self) -> Option<&Repository> {
        match self {
            Row::Repo(repo) => Some(repo),
            _ => None,
        }
    }

    pub fn group_name(&self) -> Option<&str> {
        match self {
            Row::GroupHeader { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Stable identity of a row across recomputations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Group(String),
    Repo(PathBuf),
}

/// Inputs to [`derive_rows`]
pub struct RowSource<'a> {
    /// Groups in display order, hidden group last
    pub groups: &'a [Group],
    pub repos: &'a HashMap<PathBuf, Repository>,
    pub expanded: &'a dyn Fn(&str) -> bool,
    pub sort: SortMode,
    pub filter: &'a Filter,
}

/// Build the flat row list: each group as header, its repositories when
/// expanded, then a gap; ungrouped repositories last.
pub fn derive_rows(src: &RowSource<'_>) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut grouped: std::collections::HashSet<&PathBuf> = std::collections::HashSet::new();

    for (i, group) in src.groups.iter().enumerate() {
        let mut members: Vec<Repository> = group
            .repos
            .iter()
            .filter_map(|path| src.repos.get(path))
            .filter(|repo| src.filter.matches(repo))
            .map(|repo| {
                let mut repo = repo.clone();
                repo.group = group.name.clone();
                repo
            })
            .collect();
        grouped.extend(group.repos.iter());
        sort_repos(&mut members, src.sort);

        let expanded = (src.expanded)(&group.name);
        rows.push(Row::GroupHeader {
            name: group.name.clone(),
            repo_count: members.len(),
            expanded,
        });
        if expanded {
            rows.extend(members.into_iter().map(Row::Repo));
        }

        let is_last_group = i + 1 == src.groups.len();
        if !is_hidden_group(&group.name) || !is_last_group {
            rows.push(Row::Gap);
        }
    }

    let mut ungrouped: Vec<Repository> = src
        .repos
        .values()
        .filter(|repo| !grouped.contains(&repo.path))
        .filter(|repo| src.filter.matches(repo))
        .cloned()
        .collect();
    sort_repos(&mut ungrouped, src.sort);

    // Hidden group closes the list only when nothing follows it
    if let Some(Group { name, .. }) = src.groups.last() {
        if is_hidden_group(name) && !ungrouped.is_empty() {
            rows.push(Row::Gap);
        }
    }
    rows.extend(ungrouped.into_iter().map(Row::Repo));
    rows
}
