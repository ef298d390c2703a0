//! Parsers for the porcelain output of the git commands used by a status probe

use crate::error::{CoreError, Result};

/// Dirty and untracked flags derived from `git status --porcelain`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorktreeFlags {
    pub is_dirty: bool,
    pub has_untracked: bool,
}

/// Parse `git status --porcelain` (v1) output.
///
/// A line counts as dirty when either the index or the worktree column holds
/// something other than a space or `?`; untracked entries are marked with `?`.
pub fn parse_porcelain(output: &str) -> WorktreeFlags {
    let mut flags = WorktreeFlags::default();
    for line in output.lines() {
        let mut cols = line.chars();
        let (Some(x), Some(y)) = (cols.next(), cols.next()) else {
            continue;
        };
        if (x != ' ' && x != '?') || (y != ' ' && y != '?') {
            flags.is_dirty = true;
        }
        if x == '?' || y == '?' {
            flags.has_untracked = true;
        }
        if flags.is_dirty && flags.has_untracked {
            break;
        }
    }
    flags
}

/// Parse `git rev-list --left-right --count <upstream>...<branch>`.
///
/// The left count is the upstream-only commits (behind), the right count the
/// local-only commits (ahead). Returns `(ahead, behind)`.
pub fn parse_left_right(output: &str) -> Result<(u32, u32)> {
    let mut parts = output.split_whitespace();
    let (Some(left), Some(right), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(CoreError::Parse {
            what: "rev-list counts".to_string(),
            input: output.trim().to_string(),
        });
    };
    let parse = |s: &str| {
        s.parse::<u32>().map_err(|_| CoreError::Parse {
            what: "rev-list counts".to_string(),
            input: output.trim().to_string(),
        })
    };
    let behind = parse(left)?;
    let ahead = parse(right)?;
    Ok((ahead, behind))
}

/// Branch label for a detached HEAD
pub fn detached_branch(short_sha: Option<&str>) -> String {
    match short_sha.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sha) => format!("detached@{}", sha),
        None => "detached".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_porcelain_unstaged_modification_is_dirty() {
        let flags = parse_porcelain(" M src/lib.rs\n");
        assert!(flags.is_dirty);
        assert!(!flags.has_untracked);
    }

    #[test]
    fn test_porcelain_untracked_only() {
        let flags = parse_porcelain("?? notes.txt\n");
        assert!(!flags.is_dirty);
        assert!(flags.has_untracked);
    }

    #[test]
    fn test_porcelain_staged_and_untracked() {
        let flags = parse_porcelain("A  new.rs\n?? scratch\n");
        assert!(flags.is_dirty);
        assert!(flags.has_untracked);
    }

    #[test]
    fn test_porcelain_empty_is_clean() {
        assert_eq!(parse_porcelain(""), WorktreeFlags::default());
    }

    #[test]
    fn test_left_right_counts() -> Result<()> {
        assert_eq!(parse_left_right("2\t1\n")?, (1, 2));
        assert_eq!(parse_left_right("0\t0")?, (0, 0));
        Ok(())
    }

    #[test]
    fn test_left_right_rejects_garbage() {
        assert!(parse_left_right("fatal: bad revision").is_err());
        assert!(parse_left_right("3").is_err());
    }

    #[test]
    fn test_detached_branch_label() {
        assert_eq!(detached_branch(Some("abc1234\n")), "detached@abc1234");
        assert_eq!(detached_branch(None), "detached");
        assert_eq!(detached_branch(Some("")), "detached");
    }
}
