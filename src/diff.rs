//! Unified diff previews

use similar::TextDiff;

pub const CONTEXT_LINES: usize = 3;

/// Unified diff from `original` to `updated`, labelled with `path`.
///
/// Identical inputs produce an empty string.
pub fn unified_diff(path: &str, original: &str, updated: &str) -> String {
    if original == updated {
        return String::new();
    }
    TextDiff::from_lines(original, updated)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

/// Count of added and removed lines in a unified diff.
pub fn diff_stats(diff: &str) -> (usize, usize) {
    diff.lines()
        .filter(|line| !line.starts_with("+++") && !line.starts_with("---"))
        .fold((0, 0), |(added, removed), line| match line.chars().next() {
            Some('+') => (added + 1, removed),
            Some('-') => (added, removed + 1),
            _ => (added, removed),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_has_empty_diff() {
        assert_eq!(unified_diff("a.py", "x\n", "x\n"), "");
    }

    #[test]
    fn test_diff_shows_changed_line() {
        let diff = unified_diff("a.py", "a\nb\nc\n", "a\nB\nc\n");
        assert!(diff.starts_with("--- a/a.py\n+++ b/a.py\n"));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+B\n"));
        assert_eq!(diff_stats(&diff), (1, 1));
    }

    #[test]
    fn test_diff_for_new_file() {
        let diff = unified_diff("new.py", "", "one\ntwo\n");
        assert_eq!(diff_stats(&diff), (2, 0));
    }
}
