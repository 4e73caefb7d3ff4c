//! Output truncation for tool results: dual-limit (lines + bytes),
//! head/tail/both modes.
//!
//! Grounded on krusty-core's `tools::truncation` (`truncate_head`/
//! `truncate_tail`), extended with `truncate_head_and_tail` for the shell
//! tool's contract (spec.md §4.1): keep both ends of the output rather
//! than only the beginning or only the end.

/// Result of a truncation operation.
pub struct TruncationResult {
    pub text: String,
    pub was_truncated: bool,
    pub lines_shown: usize,
    pub lines_total: usize,
    pub bytes_shown: usize,
    pub bytes_total: usize,
}

impl TruncationResult {
    pub fn notice(&self) -> Option<String> {
        if !self.was_truncated {
            return None;
        }
        Some(format!(
            "\n[Output truncated: showed {} of {} lines ({}/{} bytes)]",
            self.lines_shown, self.lines_total, self.bytes_shown, self.bytes_total,
        ))
    }
}

pub fn truncate_tail(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let bytes_total = text.len();
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && bytes_total <= max_bytes {
        return TruncationResult {
            text: text.to_string(),
            was_truncated: false,
            lines_shown: lines_total,
            lines_total,
            bytes_shown: bytes_total,
            bytes_total,
        };
    }

    let line_limited = if lines_total > max_lines {
        &lines[lines_total - max_lines..]
    } else {
        &lines[..]
    };

    let joined = line_limited.join("\n");
    let (final_text, lines_shown) = if joined.len() > max_bytes {
        let skip = joined.len() - max_bytes;
        let start = joined[skip..].find('\n').map(|pos| skip + pos + 1).unwrap_or(skip);
        let trimmed = &joined[start..];
        (trimmed.to_string(), trimmed.lines().count())
    } else {
        (joined, line_limited.len())
    };

    let bytes_shown = final_text.len();
    TruncationResult {
        text: final_text,
        was_truncated: true,
        lines_shown,
        lines_total,
        bytes_shown,
        bytes_total,
    }
}

pub fn truncate_head(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let bytes_total = text.len();
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && bytes_total <= max_bytes {
        return TruncationResult {
            text: text.to_string(),
            was_truncated: false,
            lines_shown: lines_total,
            lines_total,
            bytes_shown: bytes_total,
            bytes_total,
        };
    }

    let line_limited = if lines_total > max_lines {
        &lines[..max_lines]
    } else {
        &lines[..]
    };

    let joined = line_limited.join("\n");
    let (final_text, lines_shown) = if joined.len() > max_bytes {
        let cutoff = joined[..max_bytes].rfind('\n').unwrap_or(max_bytes);
        let trimmed = &joined[..cutoff];
        (trimmed.to_string(), trimmed.lines().count())
    } else {
        (joined, line_limited.len())
    };

    let bytes_shown = final_text.len();
    TruncationResult {
        text: final_text,
        was_truncated: true,
        lines_shown,
        lines_total,
        bytes_shown,
        bytes_total,
    }
}

/// Keep `max_lines`/`max_bytes` split between the head and the tail of
/// `text`, joined by an elision marker when truncated. Used by the shell
/// tool, where both the command's startup output and its final result
/// line are usually relevant.
pub fn truncate_head_and_tail(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let bytes_total = text.len();
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && bytes_total <= max_bytes {
        return TruncationResult {
            text: text.to_string(),
            was_truncated: false,
            lines_shown: lines_total,
            lines_total,
            bytes_shown: bytes_total,
            bytes_total,
        };
    }

    let half_lines = (max_lines / 2).max(1);
    let half_bytes = (max_bytes / 2).max(1);

    let head = truncate_head(text, half_lines, half_bytes);
    let tail = truncate_tail(text, max_lines - half_lines.min(lines_total.min(half_lines)), half_bytes);

    let combined = format!(
        "{}\n... [{} lines omitted] ...\n{}",
        head.text,
        lines_total.saturating_sub(head.lines_shown + tail.lines_shown),
        tail.text
    );

    TruncationResult {
        bytes_shown: combined.len(),
        lines_shown: head.lines_shown + tail.lines_shown,
        text: combined,
        was_truncated: true,
        lines_total,
        bytes_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limits() {
        let text = "line1\nline2\nline3";
        let result = truncate_tail(text, 100, 100_000);
        assert!(!result.was_truncated);
        assert_eq!(result.text, text);
    }

    #[test]
    fn tail_keeps_the_end() {
        let text = "1\n2\n3\n4\n5";
        let result = truncate_tail(text, 2, 100_000);
        assert!(result.was_truncated);
        assert_eq!(result.text, "4\n5");
    }

    #[test]
    fn head_keeps_the_start() {
        let text = "1\n2\n3\n4\n5";
        let result = truncate_head(text, 2, 100_000);
        assert!(result.was_truncated);
        assert_eq!(result.text, "1\n2");
    }

    #[test]
    fn head_and_tail_keeps_both_ends() {
        let lines: Vec<String> = (1..=100).map(|n| n.to_string()).collect();
        let text = lines.join("\n");
        let result = truncate_head_and_tail(&text, 10, 100_000);
        assert!(result.was_truncated);
        assert!(result.text.starts_with('1'));
        assert!(result.text.trim_end().ends_with("100"));
        assert!(result.text.contains("omitted"));
    }
}
