//! Line-level diff engine for history inspection.
//!
//! # Responsibility
//! - Compute a longest-common-subsequence line diff between two text
//!   snapshots.
//!
//! # Invariants
//! - Pure function of its inputs, no side effects.
//! - Identical inputs produce an empty diff; context lines are only emitted
//!   when at least one line changed.

use serde::{Deserialize, Serialize};

/// Classification of one diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffTag {
    /// Line present in both snapshots.
    Context,
    /// Line only present in the newer snapshot.
    Added,
    /// Line only present in the older snapshot.
    Removed,
}

/// One tagged line of diff output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub tag: DiffTag,
    pub text: String,
}

impl DiffLine {
    fn new(tag: DiffTag, text: &str) -> Self {
        Self {
            tag,
            text: text.to_string(),
        }
    }
}

/// Computes an LCS line diff from `old` to `new`.
///
/// Returns an empty vector when the two texts are identical.
pub fn compute_line_diff(old: &str, new: &str) -> Vec<DiffLine> {
    if old == new {
        return Vec::new();
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let rows = old_lines.len();
    let cols = new_lines.len();

    let mut table = vec![vec![0u32; cols + 1]; rows + 1];
    for i in 1..=rows {
        for j in 1..=cols {
            if old_lines[i - 1] == new_lines[j - 1] {
                table[i][j] = table[i - 1][j - 1] + 1;
            } else {
                table[i][j] = table[i - 1][j].max(table[i][j - 1]);
            }
        }
    }

    let mut lines = Vec::new();
    let mut i = rows;
    let mut j = cols;
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old_lines[i - 1] == new_lines[j - 1] {
            lines.push(DiffLine::new(DiffTag::Context, old_lines[i - 1]));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i][j - 1] >= table[i - 1][j]) {
            lines.push(DiffLine::new(DiffTag::Added, new_lines[j - 1]));
            j -= 1;
        } else {
            lines.push(DiffLine::new(DiffTag::Removed, old_lines[i - 1]));
            i -= 1;
        }
    }

    lines.reverse();
    lines
}

#[cfg(test)]
mod tests {
    use super::{compute_line_diff, DiffTag};

    #[test]
    fn identical_texts_produce_empty_diff() {
        assert!(compute_line_diff("a\nb\nc", "a\nb\nc").is_empty());
        assert!(compute_line_diff("", "").is_empty());
    }

    #[test]
    fn trailing_newline_only_still_counts_as_identical_lines() {
        // `lines()` normalizes the trailing newline away, but the texts
        // differ bytewise, so the diff is computed and comes out all-context.
        let diff = compute_line_diff("a\nb", "a\nb\n");
        assert!(diff.iter().all(|line| line.tag == DiffTag::Context));
    }

    #[test]
    fn added_line_is_tagged() {
        let diff = compute_line_diff("one", "one\ntwo");
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0].tag, DiffTag::Context);
        assert_eq!(diff[1].tag, DiffTag::Added);
        assert_eq!(diff[1].text, "two");
    }

    #[test]
    fn removed_line_is_tagged() {
        let diff = compute_line_diff("one\ntwo", "one");
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0].tag, DiffTag::Context);
        assert_eq!(diff[1].tag, DiffTag::Removed);
        assert_eq!(diff[1].text, "two");
    }

    #[test]
    fn changed_line_appears_as_remove_plus_add() {
        let diff = compute_line_diff("keep\nold line\nkeep2", "keep\nnew line\nkeep2");
        let tags: Vec<DiffTag> = diff.iter().map(|line| line.tag).collect();
        assert!(tags.contains(&DiffTag::Removed));
        assert!(tags.contains(&DiffTag::Added));
        assert_eq!(
            diff.iter().filter(|l| l.tag == DiffTag::Context).count(),
            2
        );
    }

    #[test]
    fn disjoint_texts_have_no_context() {
        let diff = compute_line_diff("a\nb", "c\nd");
        assert!(diff.iter().all(|line| line.tag != DiffTag::Context));
        assert_eq!(diff.len(), 4);
    }
}
