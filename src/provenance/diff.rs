//! Collapsed line diff
//!
//! Aligns the previous and current rendering line by line. Unchanged runs
//! of [`COLLAPSE_THRESHOLD`] lines or more are reduced to two lines of
//! context on each side of a marker; changed runs show the current lines.

use similar::{capture_diff_slices, Algorithm, DiffTag};

/// Unchanged runs at least this long are collapsed
pub const COLLAPSE_THRESHOLD: usize = 6;

/// Lines kept on each side of a collapsed run
const CONTEXT_LINES: usize = 2;

/// Marker line replacing `skipped` unchanged lines
pub fn collapse_marker(skipped: usize) -> String {
    format!("    ... [collapsed {} unchanged lines] ...", skipped)
}

/// Reduce one unchanged run, pushing the result onto `output`
pub fn collapse_block(block: &[&str], output: &mut Vec<String>) {
    if block.len() < COLLAPSE_THRESHOLD {
        output.extend(block.iter().map(|line| line.to_string()));
        return;
    }
    let skipped = block.len() - 2 * CONTEXT_LINES;
    output.extend(block[..CONTEXT_LINES].iter().map(|line| line.to_string()));
    output.push(collapse_marker(skipped));
    output.extend(block[block.len() - CONTEXT_LINES..].iter().map(|line| line.to_string()));
}

/// Diff `previous` against `current`; with no previous text, `current` is
/// returned unchanged
pub fn collapsed_diff(previous: Option<&str>, current: &str) -> String {
    let previous = match previous {
        Some(text) if !text.is_empty() => text,
        _ => return current.to_string(),
    };

    let old: Vec<&str> = previous.lines().collect();
    let new: Vec<&str> = current.lines().collect();
    let mut output = Vec::new();

    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (tag, _, range) = op.as_tag_tuple();
        let range = range.start.min(new.len())..range.end.min(new.len());
        let run = &new[range];
        match tag {
            DiffTag::Equal => collapse_block(run, &mut output),
            DiffTag::Insert | DiffTag::Replace | DiffTag::Delete => {
                output.extend(run.iter().map(|line| line.to_string()))
            }
        }
    }

    output.join("\n")
}
