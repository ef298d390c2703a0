use super::queries::{Row, RowKey};

/// Incremental search over the visible rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Search {
    query: String,
    matches: Vec<usize>,
    current: usize,
    /// Identity of the rows the matches were taken from
    rows: Vec<Option<RowKey>>,
}

impl Search {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_active(&self) -> bool {
        !self.query.is_empty()
    }

    pub fn matches(&self) -> &[usize] {
        &self.matches
    }

    /// One-based position of the current match, for the status line
    pub fn position(&self) -> Option<(usize, usize)> {
        if self.matches.is_empty() {
            None
        } else {
            Some((self.current + 1, self.matches.len()))
        }
    }

    /// Start a new query. Returns the row of the first match.
    pub fn start(&mut self, query: &str, rows: &[Row]) -> Option<usize> {
        self.query = query.trim().to_string();
        self.matches = find_matches(&self.query, rows);
        self.rows = row_keys(rows);
        self.current = 0;
        self.matches.first().copied()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Recompute matches after a recomputation. The pointer resets when
    /// the row set or the match set differs; status-only updates keep it.
    pub fn rebuild(&mut self, rows: &[Row]) {
        if !self.is_active() {
            return;
        }
        let keys = row_keys(rows);
        let matches = find_matches(&self.query, rows);
        if keys != self.rows || matches != self.matches {
            self.rows = keys;
            self.matches = matches;
            self.current = 0;
        }
    }

    pub fn next(&mut self) -> Option<usize> {
        if self.matches.is_empty() {
            return None;
        }
        self.current = (self.current + 1) % self.matches.len();
        Some(self.matches[self.current])
    }

    pub fn prev(&mut self) -> Option<usize> {
        if self.matches.is_empty() {
            return None;
        }
        self.current = (self.current + self.matches.len() - 1) % self.matches.len();
        Some(self.matches[self.current])
    }

    pub fn is_match(&self, row: usize) -> bool {
        self.matches.binary_search(&row).is_ok()
    }
}

fn row_keys(rows: &[Row]) -> Vec<Option<RowKey>> {
    rows.iter().map(Row::key).collect()
}

fn find_matches(query: &str, rows: &[Row]) -> Vec<usize> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    rows.iter()
        .enumerate()
        .filter(|(_, row)| match row {
            Row::GroupHeader { name, .. } => name.to_lowercase().contains(&needle),
            Row::Repo(repo) => super::queries::repo_contains(repo, &needle),
            Row::Gap => false,
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Repository;

    fn rows() -> Vec<Row> {
        vec![
            Row::GroupHeader {
                name: "Backend".into(),
                repo_count: 2,
                expanded: true,
            },
            Row::Repo(Repository::new("/w/api")),
            Row::Repo(Repository::new("/w/worker")),
            Row::Gap,
            Row::Repo(Repository::new("/w/frontend")),
        ]
    }

    #[test]
    fn test_matches_group_and_repo_names_case_insensitively() {
        let mut search = Search::default();
        assert_eq!(search.start("END", &rows()), Some(0));
        assert_eq!(search.matches(), &[0, 4]);
    }

    #[test]
    fn test_next_and_prev_wrap() {
        let mut search = Search::default();
        search.start("end", &rows());
        assert_eq!(search.next(), Some(4));
        assert_eq!(search.next(), Some(0));
        assert_eq!(search.prev(), Some(4));
        assert_eq!(search.position(), Some((2, 2)));
    }

    #[test]
    fn test_rebuild_resets_pointer_only_on_change() {
        let mut search = Search::default();
        let mut rows = rows();
        search.start("end", &rows);
        search.next();

        search.rebuild(&rows);
        assert_eq!(search.position(), Some((2, 2)));

        rows.remove(3);
        search.rebuild(&rows);
        assert_eq!(search.matches(), &[0, 3]);
        assert_eq!(search.position(), Some((1, 2)));
    }

    #[test]
    fn test_rebuild_resets_pointer_when_rows_change_without_moving_matches() {
        let mut search = Search::default();
        let mut rows = rows();
        search.start("end", &rows);
        search.next();

        let mut updated = Repository::new("/w/api");
        updated.status.branch = "develop".into();
        rows[1] = Row::Repo(updated);
        search.rebuild(&rows);
        assert_eq!(search.position(), Some((2, 2)));

        rows[2] = Row::Repo(Repository::new("/w/queue"));
        search.rebuild(&rows);
        assert_eq!(search.matches(), &[0, 4]);
        assert_eq!(search.position(), Some((1, 2)));
    }

    #[test]
    fn test_no_matches() {
        let mut search = Search::default();
        assert_eq!(search.start("zzz", &rows()), None);
        assert_eq!(search.next(), None);
        assert!(search.is_active());
    }
}
