//! 一次同步运行的结果汇总

use crate::core::differ::{Action, ActionKind, ActionPlan};
use crate::core::entry::RelPath;
use crate::error::{ConflictError, ProviderError};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// 执行失败的动作
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub path: RelPath,
    pub kind: ActionKind,
    pub error: String,
}

/// 因超过大小上限而未传输的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Oversize {
    pub path: RelPath,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub dry_run: bool,
    /// 预演时为计划数，实际运行时为完成数
    pub counts: BTreeMap<ActionKind, usize>,
    pub failures: Vec<Failure>,
    pub conflicts: Vec<ConflictError>,
    pub oversize: Vec<Oversize>,
    pub bytes_transferred: u64,
    #[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub cancelled: bool,
    pub not_started: usize,
    /// 预演时为计划中的每个动作，实际运行时为已完成的动作
    pub rendered: Vec<String>,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

impl Report {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    /// 预演：渲染所有非 `Skip` 动作，不做任何修改
    pub fn from_plan(plan: &ActionPlan) -> Self {
        let mut report = Self::new(true);
        for action in plan.actions() {
            report.bump(action.kind);
            report.record_unexecutable(action);
        }
        report.rendered = plan.render_lines();
        report
    }

    fn bump(&mut self, kind: ActionKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// 记录不需要执行器执行的动作（跳过、超限、冲突）
    ///
    /// 返回 false 表示该动作需要执行。
    pub fn record_unexecutable(&mut self, action: &Action) -> bool {
        match action.kind {
            ActionKind::Skip => true,
            ActionKind::SkipOversize => {
                self.oversize.push(Oversize {
                    path: action.path.clone(),
                    size: action.source.as_ref().map_or(0, |e| e.size),
                });
                true
            }
            ActionKind::Conflict => {
                if let Some(conflict) = action.conflict() {
                    self.failures.push(Failure {
                        path: action.path.clone(),
                        kind: action.kind,
                        error: conflict.to_string(),
                    });
                    self.conflicts.push(conflict);
                }
                true
            }
            ActionKind::CreateDir | ActionKind::Upload | ActionKind::Download => false,
        }
    }

    /// 实际运行时记录跳过类动作（计入完成数）
    pub fn record_passive(&mut self, action: &Action) {
        self.bump(action.kind);
        self.record_unexecutable(action);
        if action.kind != ActionKind::Skip {
            self.rendered.extend(action.render());
        }
    }

    pub fn record_success(&mut self, action: &Action, bytes: u64) {
        self.bump(action.kind);
        self.bytes_transferred += bytes;
        self.rendered.extend(action.render());
    }

    pub fn record_failure(&mut self, action: &Action, error: &ProviderError) {
        self.failures.push(Failure {
            path: action.path.clone(),
            kind: action.kind,
            error: error.to_string(),
        });
    }

    pub fn mark_cancelled(&mut self, not_started: usize) {
        self.cancelled = true;
        self.not_started = not_started;
    }

    /// 所有动作成功且未被取消
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.dry_run { "Planned" } else { "Completed" };
        writeln!(
            f,
            "{}: {} uploaded, {} downloaded, {} directories created, {} skipped, {} oversize, {} conflicts",
            label,
            self.count(ActionKind::Upload),
            self.count(ActionKind::Download),
            self.count(ActionKind::CreateDir),
            self.count(ActionKind::Skip),
            self.count(ActionKind::SkipOversize),
            self.conflicts.len(),
        )?;
        if !self.dry_run {
            writeln!(
                f,
                "Transferred {} bytes in {:.2}s",
                self.bytes_transferred,
                self.elapsed.as_secs_f64()
            )?;
        }
        if self.cancelled {
            writeln!(f, "Cancelled: {} actions not started", self.not_started)?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures ({}):", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, "  {} {}: {}", failure.kind, failure.path, failure.error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entry::{Entry, EntryKind};
    use crate::error::ProviderErrorKind;
    use chrono::{DateTime, Utc};

    fn entry(path: &str, kind: EntryKind, size: u64) -> Entry {
        Entry {
            path: RelPath::parse(path),
            kind,
            size,
            modified: DateTime::<Utc>::from_timestamp(100, 0).unwrap(),
            checksum: None,
            id: String::new(),
        }
    }

    fn action(kind: ActionKind, path: &str, size: u64) -> Action {
        Action {
            kind,
            path: RelPath::parse(path),
            source: Some(entry(path, EntryKind::File, size)),
            dest: None,
        }
    }

    #[test]
    fn test_dry_run_report() {
        let conflict = Action {
            kind: ActionKind::Conflict,
            path: RelPath::parse("x"),
            source: Some(entry("x", EntryKind::File, 1)),
            dest: Some(entry("x", EntryKind::Directory, 0)),
        };
        let plan = ActionPlan::from(vec![
            action(ActionKind::Upload, "a.txt", 100),
            action(ActionKind::SkipOversize, "big.bin", 2000),
            action(ActionKind::Skip, "same.txt", 5),
            conflict,
        ]);

        let report = Report::from_plan(&plan);
        assert!(report.dry_run);
        assert_eq!(report.count(ActionKind::Upload), 1);
        assert_eq!(
            report.rendered,
            vec![
                "UPLOAD a.txt",
                "SKIP-OVERSIZE big.bin (2000 bytes)",
                "CONFLICT x (file vs directory)"
            ]
        );
        assert_eq!(report.oversize, vec![Oversize { path: RelPath::parse("big.bin"), size: 2000 }]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_live_counts_and_failures() {
        let mut report = Report::new(false);
        report.record_success(&action(ActionKind::Upload, "a.txt", 10), 10);
        report.record_failure(
            &action(ActionKind::Upload, "b.txt", 10),
            &ProviderError::new(ProviderErrorKind::PermissionDenied, "b.txt", "denied"),
        );

        assert_eq!(report.count(ActionKind::Upload), 1);
        assert_eq!(report.bytes_transferred, 10);
        assert_eq!(report.rendered, vec!["UPLOAD a.txt"]);
        assert!(!report.is_success());

        let summary = report.to_string();
        assert!(summary.contains("Completed: 1 uploaded"));
        assert!(summary.contains("UPLOAD b.txt: permission denied"));
    }

    #[test]
    fn test_cancelled_is_not_success() {
        let mut report = Report::new(false);
        assert!(report.is_success());
        report.mark_cancelled(3);
        assert!(!report.is_success());
        assert!(report.to_string().contains("3 actions not started"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut report = Report::new(false);
        report.record_success(&action(ActionKind::CreateDir, "docs", 0), 0);
        report.elapsed = Duration::from_millis(1500);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["dryRun"], false);
        assert_eq!(json["elapsedMs"], 1500);
        assert_eq!(json["bytesTransferred"], 0);
        assert_eq!(json["counts"]["create_dir"], 1);
    }
}
