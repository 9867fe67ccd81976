//! Provenance tracing across pass snapshots
//!
//! Follows one source location (`file:line`) through every IR dump of a
//! compilation and reports when the operation at that location was created,
//! modified or deleted. Only one rendering is carried from one snapshot to
//! the next, so files must be visited in pass order.

pub mod diff;
pub mod history;
pub mod structural;
pub mod textual;

use std::fs;
use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::provenance::diff::collapsed_diff;
use crate::provenance::history::{resolve_history_root, scan, SnapshotFile};
use crate::utils::Result;

pub use structural::StructuralStrategy;
pub use textual::TextualStrategy;

// ==================== Target ====================

/// Source location being traced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub filename: String,
    pub line: u32,
}

impl Target {
    pub fn new(filename: impl Into<String>, line: u32) -> Self {
        Self { filename: filename.into(), line }
    }

    /// `"file.mlir":12`, as it appears inside `loc(...)`
    pub fn marker(&self) -> String {
        format!("\"{}\":{}", self.filename, self.line)
    }

    /// `file.mlir:12`, as shown in reports
    pub fn query(&self) -> String {
        format!("{}:{}", self.filename, self.line)
    }

    /// Whether `text` contains the marker not followed by another digit,
    /// so line 2 does not match `"file.mlir":26`
    pub fn matches(&self, text: &str) -> bool {
        let marker = self.marker();
        text.match_indices(&marker).any(|(at, _)| {
            !text[at + marker.len()..].starts_with(|c: char| c.is_ascii_digit())
        })
    }
}

// ==================== Report ====================

/// Change classification of one snapshot transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Modified,
    Deleted,
    /// Never reported
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Snapshot file name
    pub pass: String,
    /// Directory the snapshot lives in
    pub context: String,
    pub action: Action,
    /// Full rendering when created, collapsed diff when modified, empty
    /// when deleted
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub query: String,
    pub total_events: usize,
    pub events: Vec<TimelineEvent>,
    /// Set when a deadline stopped the trace before the last snapshot
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

/// What `trace` returns: a timeline, or the reason there is none
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceReport {
    Timeline(Timeline),
    Error { error: String },
}

impl TraceReport {
    pub fn is_error(&self) -> bool {
        matches!(self, TraceReport::Error { .. })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ==================== Strategies ====================

/// How a snapshot is turned into a comparable rendering of the target
pub trait Strategy {
    fn name(&self) -> &'static str;

    /// Sanitized rendering of the target in `source`; `Ok(None)` when the
    /// snapshot does not contain it, `Err` when it cannot be processed
    fn extract(&self, source: &str, target: &Target) -> Result<Option<String>>;

    /// Whether two renderings count as the same
    fn same(&self, previous: &str, current: &str) -> bool;

    /// Text reported for a created event
    fn display_created(&self, rendering: String) -> String {
        rendering
    }
}

/// Selectable strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StrategyKind {
    /// Parse every snapshot; exact comparison
    #[default]
    Structural,
    /// Indentation heuristics on raw text; whitespace-insensitive comparison
    Textual,
}

// ==================== Tracer ====================

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceOptions {
    /// Stop and report what was found so far once this passes
    pub deadline: Option<Instant>,
}

/// Classify the transition from `previous` to `current`
pub fn classify<S: Strategy + ?Sized>(
    strategy: &S,
    previous: Option<&str>,
    current: Option<&str>,
) -> Option<Action> {
    match (previous, current) {
        (None, None) => None,
        (None, Some(_)) => Some(Action::Created),
        (Some(_), None) => Some(Action::Deleted),
        (Some(prev), Some(cur)) if strategy.same(prev, cur) => Some(Action::Unchanged),
        (Some(_), Some(_)) => Some(Action::Modified),
    }
}

pub struct Tracer<S: Strategy> {
    strategy: S,
    options: TraceOptions,
}

impl<S: Strategy> Tracer<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy, options: TraceOptions::default() }
    }

    pub fn with_options(mut self, options: TraceOptions) -> Self {
        self.options = options;
        self
    }

    /// Trace `target` through the pass history under `root`
    pub fn trace(&self, root: &Path, target: &Target) -> Result<Timeline> {
        let history = resolve_history_root(root)?;
        let files = scan(&history);
        Ok(self.trace_files(&files, target))
    }

    /// Trace `target` through `files`, which must already be in pass order
    pub fn trace_files(&self, files: &[SnapshotFile], target: &Target) -> Timeline {
        info!(
            "Tracing {} across {} passes ({} strategy)",
            target.query(),
            files.len(),
            self.strategy.name()
        );

        let mut events = Vec::new();
        let mut incomplete = false;
        let mut last: Option<String> = None;

        for file in files {
            if self.options.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!("Deadline reached before {}; reporting partial timeline", file.name);
                incomplete = true;
                break;
            }

            let Some(current) = self.process(file, target) else {
                continue;
            };

            match classify(&self.strategy, last.as_deref(), current.as_deref()) {
                None | Some(Action::Unchanged) => {}
                Some(action) => {
                    let code = match action {
                        Action::Created => {
                            self.strategy.display_created(current.clone().unwrap_or_default())
                        }
                        Action::Modified => {
                            collapsed_diff(last.as_deref(), current.as_deref().unwrap_or_default())
                        }
                        Action::Deleted | Action::Unchanged => String::new(),
                    };
                    debug!("{}: {:?}", file.name, action);
                    events.push(TimelineEvent {
                        pass: file.name.clone(),
                        context: file.context.clone(),
                        action,
                        code,
                    });
                }
            }

            // absent resets, present (changed or not) becomes the new baseline
            last = current;
        }

        Timeline { query: target.query(), total_events: events.len(), events, incomplete }
    }

    /// Rendering of the target in one snapshot; `None` when the file could
    /// not be used at all
    fn process(&self, file: &SnapshotFile, target: &Target) -> Option<Option<String>> {
        let source = match fs::read_to_string(&file.path) {
            Ok(source) => source,
            Err(err) => {
                debug!("Skipping {}: {}", file.path.display(), err);
                return None;
            }
        };
        if source.trim().is_empty() {
            debug!("Skipping {}: empty snapshot", file.path.display());
            return None;
        }
        match self.strategy.extract(&source, target) {
            Ok(rendering) => Some(rendering.filter(|text| !text.is_empty())),
            Err(err) => {
                match err.span() {
                    Some(span) => debug!(
                        "Skipping {} (line {}, bytes {}..{}): {}",
                        file.path.display(),
                        span.line,
                        span.start,
                        span.end,
                        err
                    ),
                    None => debug!("Skipping {}: {}", file.path.display(), err),
                }
                None
            }
        }
    }
}

/// Trace `filename:line` under `root` with the chosen strategy
pub fn trace(
    root: &Path,
    filename: &str,
    line: u32,
    kind: StrategyKind,
    options: TraceOptions,
) -> TraceReport {
    let target = Target::new(filename, line);
    let result = match kind {
        StrategyKind::Structural => {
            Tracer::new(StructuralStrategy).with_options(options).trace(root, &target)
        }
        StrategyKind::Textual => {
            Tracer::new(TextualStrategy).with_options(options).trace(root, &target)
        }
    };
    match result {
        Ok(timeline) => TraceReport::Timeline(timeline),
        Err(err) => TraceReport::Error { error: err.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::history::HISTORY_DIR_NAME;
    use indoc::formatdoc;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn snapshot(body: &str) -> String {
        formatdoc! {r#"
            module {{
              %0 = arith.constant 1 : i32 loc("input.mlir":3:5)
            {body}
            }} loc("input.mlir":1:1)
        "#, body = body}
    }

    fn history(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let history = dir.path().join(HISTORY_DIR_NAME);
        fs::create_dir_all(&history).unwrap();
        for (name, contents) in files {
            fs::write(history.join(name), contents).unwrap();
        }
        let root = dir.path().to_path_buf();
        (dir, root)
    }

    fn timeline(report: TraceReport) -> Timeline {
        match report {
            TraceReport::Timeline(timeline) => timeline,
            TraceReport::Error { error } => panic!("unexpected error report: {}", error),
        }
    }

    fn actions(timeline: &Timeline) -> Vec<(&str, Action)> {
        timeline.events.iter().map(|e| (e.pass.as_str(), e.action)).collect()
    }

    #[test]
    fn test_target_marker_needs_digit_boundary() {
        let target = Target::new("input.mlir", 2);
        assert_eq!(target.marker(), "\"input.mlir\":2");
        assert_eq!(target.query(), "input.mlir:2");
        assert!(target.matches("loc(\"input.mlir\":2:7)"));
        assert!(!target.matches("loc(\"input.mlir\":26:7)"));
        assert!(target.matches("loc(fused[\"input.mlir\":26:1, \"input.mlir\":2:9])"));
        assert!(!target.matches("loc(\"other_input.mlir\":2:7)"));
    }

    #[test]
    fn test_classify() {
        let s = StructuralStrategy;
        assert_eq!(classify(&s, None, None), None);
        assert_eq!(classify(&s, None, Some("x")), Some(Action::Created));
        assert_eq!(classify(&s, Some("x"), None), Some(Action::Deleted));
        assert_eq!(classify(&s, Some("x"), Some("x")), Some(Action::Unchanged));
        assert_eq!(classify(&s, Some("x"), Some("x ")), Some(Action::Modified));
        assert_eq!(classify(&TextualStrategy, Some("x"), Some("x ")), Some(Action::Unchanged));
    }

    #[test]
    fn test_created_then_modified() {
        let (_dir, root) = history(&[
            ("10_a.mlir", &snapshot("")),
            ("20_b.mlir", &snapshot("  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)")),
            ("30_c.mlir", &snapshot("  %1 = arith.addi %0, %0 : i32 loc(\"input.mlir\":7:10)")),
        ]);

        let report = trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default());
        let timeline = timeline(report);
        assert_eq!(timeline.query, "input.mlir:7");
        assert_eq!(timeline.total_events, 2);
        assert_eq!(
            actions(&timeline),
            vec![("20_b.mlir", Action::Created), ("30_c.mlir", Action::Modified)]
        );
        assert_eq!(timeline.events[0].code, "%1 = arith.muli %0, %0 : i32");
        assert_eq!(timeline.events[1].code, "%1 = arith.addi %0, %0 : i32");
        assert!(timeline.events.iter().all(|e| !e.code.contains("loc(")));
    }

    #[test]
    fn test_textual_strategy_same_contract() {
        let (_dir, root) = history(&[
            ("10_a.mlir", &snapshot("")),
            ("20_b.mlir", &snapshot("  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)")),
            ("25_b.mlir", &snapshot("  %1 =   arith.muli %0, %0 : i32 loc(\"input.mlir\":7:12)")),
            ("30_c.mlir", &snapshot("  %1 = arith.addi %0, %0 : i32 loc(\"input.mlir\":7:10)")),
        ]);

        let timeline = timeline(trace(&root, "input.mlir", 7, StrategyKind::Textual, TraceOptions::default()));
        assert_eq!(
            actions(&timeline),
            vec![("20_b.mlir", Action::Created), ("30_c.mlir", Action::Modified)]
        );
        assert!(timeline.events[1].code.contains("arith.addi"));
        assert!(!timeline.events[1].code.contains("loc("));
    }

    #[test]
    fn test_deleted_and_recreated() {
        let op = "  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)";
        let (_dir, root) = history(&[
            ("1_a.mlir", &snapshot(op)),
            ("2_b.mlir", &snapshot(op)),
            ("3_c.mlir", &snapshot("")),
            ("4_d.mlir", &snapshot("")),
            ("5_e.mlir", &snapshot(op)),
        ]);

        let timeline = timeline(trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default()));
        assert_eq!(
            actions(&timeline),
            vec![
                ("1_a.mlir", Action::Created),
                ("3_c.mlir", Action::Deleted),
                ("5_e.mlir", Action::Created),
            ]
        );
        assert_eq!(timeline.events[1].code, "");
    }

    #[test]
    fn test_bad_files_are_skipped() {
        let op = "  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)";
        let (_dir, root) = history(&[
            ("1_a.mlir", &snapshot(op)),
            ("2_b.mlir", "module {\n  %1 = arith.muli %0"),
            ("3_c.mlir", "   \n"),
            ("4_d.mlir", &snapshot(op)),
        ]);

        let timeline = timeline(trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default()));
        assert_eq!(actions(&timeline), vec![("1_a.mlir", Action::Created)]);
    }

    #[test]
    fn test_non_ascii_resource_text_is_traced() {
        let op = "  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)";
        let with_resources = format!(
            "{}{{-#\n  external_resources: {{ note: \"café\" }}\n#-}}\n",
            snapshot(op)
        );
        let (_dir, root) = history(&[
            ("1_a.mlir", &snapshot(op)),
            ("2_b.mlir", &with_resources),
            ("3_c.mlir", &snapshot("")),
        ]);

        let timeline = timeline(trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default()));
        assert_eq!(
            actions(&timeline),
            vec![("1_a.mlir", Action::Created), ("3_c.mlir", Action::Deleted)]
        );
    }

    #[test]
    fn test_dispatch_workgroups_snapshot_is_traced() {
        let dispatch = concat!(
            "  %1 = flow.dispatch.workgroups(%0) : (i32) -> i32 =\n",
            "      (%arg1: !flow.dispatch.tensor<readonly:i32>) {\n",
            "    flow.return\n",
            "  } loc(\"input.mlir\":7:10)",
        );
        let (_dir, root) = history(&[
            ("1_a.mlir", &snapshot("  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)")),
            ("2_b.mlir", &snapshot(dispatch)),
        ]);

        let timeline = timeline(trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default()));
        assert_eq!(
            actions(&timeline),
            vec![("1_a.mlir", Action::Created), ("2_b.mlir", Action::Modified)]
        );
        assert!(timeline.events[1].code.starts_with("%1 = flow.dispatch.workgroups(%0)"));
    }

    #[test]
    fn test_missing_root_reports_error() {
        let dir = TempDir::new().unwrap();
        let report = trace(&dir.path().join("missing"), "input.mlir", 7, StrategyKind::Structural, TraceOptions::default());
        assert!(report.is_error());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert!(json.get("error").is_some());
        assert!(json.get("events").is_none());
    }

    #[test]
    fn test_report_json_shape() {
        let (_dir, root) = history(&[(
            "1_a.mlir",
            &snapshot("  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)"),
        )]);
        let report = trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default());
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "query": "input.mlir:7",
                "total_events": 1,
                "events": [{
                    "pass": "1_a.mlir",
                    "context": HISTORY_DIR_NAME,
                    "action": "created",
                    "code": "%1 = arith.muli %0, %0 : i32",
                }],
            })
        );
    }

    #[test]
    fn test_repeated_traces_are_identical() {
        let (_dir, root) = history(&[
            ("9_x.mlir", &snapshot("  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)")),
            ("10_x.mlir", &snapshot("  %1 = arith.addi %0, %0 : i32 loc(\"input.mlir\":7:10)")),
            ("2_x.mlir", &snapshot("")),
        ]);
        let first = trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default());
        let second = trace(&root, "input.mlir", 7, StrategyKind::Structural, TraceOptions::default());
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        assert_eq!(
            actions(&timeline(first)),
            vec![("9_x.mlir", Action::Created), ("10_x.mlir", Action::Modified)]
        );
    }

    #[test]
    fn test_expired_deadline_marks_incomplete() {
        let (_dir, root) = history(&[(
            "1_a.mlir",
            &snapshot("  %1 = arith.muli %0, %0 : i32 loc(\"input.mlir\":7:10)"),
        )]);
        let options = TraceOptions { deadline: Some(Instant::now()) };
        let report = trace(&root, "input.mlir", 7, StrategyKind::Structural, options);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["incomplete"], serde_json::json!(true));
        assert_eq!(json["total_events"], serde_json::json!(0));
    }
}
