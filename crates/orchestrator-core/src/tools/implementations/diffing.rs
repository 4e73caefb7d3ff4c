//! Diff and context-snippet helpers shared by the mutating file tools.
//!
//! Grounded on krusty-core's `tools/implementations/multiedit.rs`
//! (`similar::TextDiff` unified-diff generation), extended with the
//! ±5-line / merge-within-10-line context snippet contract spec.md §4.1
//! requires of `multi_edit`.

use std::path::Path;

use similar::TextDiff;

pub fn unified_diff(old: &str, new: &str, path: &Path) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut body = String::new();
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        body.push_str(&format!("{}", hunk));
    }
    if body.is_empty() {
        return String::new();
    }
    format!("--- a/{0}\n+++ b/{0}\n{1}", path.display(), body)
}

/// A single line range (1-indexed, inclusive) touched by an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchedRange {
    pub start: usize,
    pub end: usize,
}

/// Merge ranges that are within `max_gap` lines of one another, expanding
/// each by `context` lines first. Input need not be sorted.
pub fn merge_ranges(mut ranges: Vec<TouchedRange>, context: usize, max_gap: usize, total_lines: usize) -> Vec<TouchedRange> {
    if ranges.is_empty() {
        return ranges;
    }
    ranges.sort_by_key(|r| r.start);

    let expanded: Vec<TouchedRange> = ranges
        .into_iter()
        .map(|r| TouchedRange {
            start: r.start.saturating_sub(context).max(1),
            end: (r.end + context).min(total_lines.max(1)),
        })
        .collect();

    let mut merged: Vec<TouchedRange> = Vec::new();
    for range in expanded {
        match merged.last_mut() {
            Some(last) if range.start <= last.end + max_gap + 1 => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Render the merged ranges as `path:start-end` headed snippets of `content`.
pub fn render_snippets(content: &str, ranges: &[TouchedRange], path: &Path) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = String::new();
    for range in ranges {
        let start = range.start.max(1);
        let end = range.end.min(lines.len());
        if start > end {
            continue;
        }
        out.push_str(&format!("--- {}:{}-{} ---\n", path.display(), start, end));
        for (offset, line) in lines[start - 1..end].iter().enumerate() {
            out.push_str(&format!("{:>6}\t{}\n", start + offset, line));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_ranges_joins_nearby_edits() {
        let ranges = vec![TouchedRange { start: 10, end: 10 }, TouchedRange { start: 20, end: 20 }];
        let merged = merge_ranges(ranges, 5, 10, 100);
        // expanded: [5,15] and [15,25] -> touching, merge into one
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 5);
        assert_eq!(merged[0].end, 25);
    }

    #[test]
    fn merge_ranges_keeps_far_edits_separate() {
        let ranges = vec![TouchedRange { start: 1, end: 1 }, TouchedRange { start: 50, end: 50 }];
        let merged = merge_ranges(ranges, 5, 10, 100);
        assert_eq!(merged.len(), 2);
    }
}
