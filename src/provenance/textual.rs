//! Textual strategy
//!
//! Works on the snapshot text without parsing it. The block around the
//! first line naming the target is bounded by indentation, `loc(...)`
//! annotations are cut out of the text and long hex constants are
//! shortened. Equality ignores whitespace entirely.
//!
//! Indentation is only a proxy for nesting, so blocks may be mis-bounded
//! when braces and indentation disagree.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::provenance::{Strategy, Target};
use crate::utils::Result;

/// Renderings longer than this are shortened when first reported
pub const HUGE_CREATION_CHARS: usize = 3000;

/// Characters kept on each side of a shortened creation
const HUGE_CREATION_KEEP: usize = 1000;

static DENSE_HEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(dense<"0x)([0-9a-fA-F]{16})([0-9a-fA-F]+)([0-9a-fA-F]{16})(">)"#)
        .unwrap_or_else(|e| panic!("BUG: invalid dense constant pattern: {}", e))
});

/// Line-oriented extraction; renderings compare with whitespace removed
#[derive(Debug, Clone, Copy, Default)]
pub struct TextualStrategy;

impl Strategy for TextualStrategy {
    fn name(&self) -> &'static str {
        "textual"
    }

    fn extract(&self, source: &str, target: &Target) -> Result<Option<String>> {
        Ok(extract_block(source, target)
            .map(|block| clean(&block))
            .filter(|cleaned| !cleaned.is_empty()))
    }

    fn same(&self, previous: &str, current: &str) -> bool {
        collapse_whitespace(previous) == collapse_whitespace(current)
    }

    fn display_created(&self, rendering: String) -> String {
        let chars = rendering.chars().count();
        if chars <= HUGE_CREATION_CHARS {
            return rendering;
        }
        let head: String = rendering.chars().take(HUGE_CREATION_KEEP).collect();
        let tail: String = rendering.chars().skip(chars - HUGE_CREATION_KEEP).collect();
        format!("{}\n... [Huge Creation Truncated] ...\n{}", head, tail)
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// The block of lines around the first line that names `target`
pub fn extract_block(source: &str, target: &Target) -> Option<String> {
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    let found = lines.iter().position(|line| target.matches(line))?;
    let found_indent = indent_of(lines[found]);

    // upward: take lines at the same or shallower indent, stop at the first shallower one
    let mut start = found;
    for cur in (0..=found).rev() {
        let trimmed = lines[cur].trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "}" && cur != found {
            break;
        }
        let indent = indent_of(lines[cur]);
        if indent <= found_indent && !trimmed.starts_with("//") {
            start = cur;
            if indent < found_indent {
                break;
            }
        }
    }

    // downward: stop where indentation returns to the start line's depth
    let start_indent = indent_of(lines[start]);
    let mut end = found;
    for (cur, line) in lines.iter().enumerate().skip(found + 1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let indent = indent_of(line);
        if indent <= start_indent {
            if trimmed.starts_with('}') {
                end = cur;
                break;
            }
            if indent == start_indent && !trimmed.starts_with("//") {
                end = cur - 1;
                break;
            }
        }
        end = cur;
    }

    Some(lines[start..=end].concat())
}

/// Shorten dense hex payloads, drop `loc(...)` annotations and trailing
/// whitespace
pub fn clean(text: &str) -> String {
    let truncated = DENSE_HEX.replace_all(text, "${1}${2}...[TRUNCATED]...${4}${5}");
    strip_locations(&truncated)
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove every ` loc(...)` (and a leading `loc(...)`), nested parentheses
/// included
pub fn strip_locations(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    if let Some(after) = rest.strip_prefix("loc(") {
        rest = skip_group(after);
    }
    while let Some(found) = rest.find(" loc(") {
        output.push_str(&rest[..found]);
        rest = skip_group(&rest[found + " loc(".len()..]);
    }
    output.push_str(rest);
    output
}

/// Text after the `)` closing an already opened group
fn skip_group(text: &str) -> &str {
    let mut depth = 1usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.bytes().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            b'"' => in_string = true,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return &text[i + 1..];
                }
            }
            _ => {}
        }
    }
    ""
}

/// `text` with every whitespace character removed
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect()
}
