//! 由两棵树生成有序的动作计划
//!
//! 两棵树都是按 `RelPath` 排序的 `BTreeMap`，归并遍历后得到的顺序保证
//! 目录的动作总在其子孙的动作之前，执行器依赖这一点。

use crate::config::SyncConfig;
use crate::core::comparator::{self, ComparePolicy};
use crate::core::entry::{Entry, RelPath, Tree};
use crate::error::ConflictError;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::time::Duration;

/// 同步动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateDir,
    Upload,
    Download,
    Conflict,
    SkipOversize,
    Skip,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::CreateDir,
        ActionKind::Upload,
        ActionKind::Download,
        ActionKind::Conflict,
        ActionKind::SkipOversize,
        ActionKind::Skip,
    ];

    pub fn is_transfer(self) -> bool {
        matches!(self, ActionKind::Upload | ActionKind::Download)
    }

    pub fn label(self) -> &'static str {
        match self {
            ActionKind::CreateDir => "CREATEDIR",
            ActionKind::Upload => "UPLOAD",
            ActionKind::Download => "DOWNLOAD",
            ActionKind::Conflict => "CONFLICT",
            ActionKind::SkipOversize => "SKIP-OVERSIZE",
            ActionKind::Skip => "SKIP",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 计划中的一个动作，`source`/`dest` 为 `None` 表示该侧不存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub kind: ActionKind,
    pub path: RelPath,
    pub source: Option<Entry>,
    pub dest: Option<Entry>,
}

impl Action {
    fn new(kind: ActionKind, path: RelPath, source: Option<&Entry>, dest: Option<&Entry>) -> Self {
        Self {
            kind,
            path,
            source: source.cloned(),
            dest: dest.cloned(),
        }
    }

    /// 需要传输的字节数
    pub fn transfer_size(&self) -> u64 {
        if self.kind.is_transfer() {
            self.source.as_ref().map_or(0, |e| e.size)
        } else {
            0
        }
    }

    /// 类型冲突的详情
    pub fn conflict(&self) -> Option<ConflictError> {
        match (self.kind, &self.source, &self.dest) {
            (ActionKind::Conflict, Some(src), Some(dst)) => Some(ConflictError {
                path: self.path.clone(),
                source_kind: src.kind,
                dest_kind: dst.kind,
            }),
            _ => None,
        }
    }

    /// 人类可读的一行描述，`Skip` 不输出
    pub fn render(&self) -> Option<String> {
        match self.kind {
            ActionKind::Skip => None,
            ActionKind::SkipOversize => Some(format!(
                "{} {} ({} bytes)",
                self.kind,
                self.path,
                self.source.as_ref().map_or(0, |e| e.size)
            )),
            ActionKind::Conflict => {
                let detail = match (&self.source, &self.dest) {
                    (Some(src), Some(dst)) => format!(" ({} vs {})", src.kind, dst.kind),
                    _ => String::new(),
                };
                Some(format!("{} {}{}", self.kind, self.path, detail))
            }
            _ => Some(format!("{} {}", self.kind, self.path)),
        }
    }
}

/// 计划统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create_dir_count: usize,
    pub transfer_count: usize,
    pub transfer_bytes: u64,
    pub conflict_count: usize,
    pub oversize_count: usize,
    pub skip_count: usize,
}

/// 有序动作计划，只属于本次运行
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionPlan {
    actions: Vec<Action>,
}

impl ActionPlan {
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 除 `Skip` 外没有任何动作
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| a.kind == ActionKind::Skip)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.kind {
                ActionKind::CreateDir => summary.create_dir_count += 1,
                ActionKind::Upload | ActionKind::Download => {
                    summary.transfer_count += 1;
                    summary.transfer_bytes += action.transfer_size();
                }
                ActionKind::Conflict => summary.conflict_count += 1,
                ActionKind::SkipOversize => summary.oversize_count += 1,
                ActionKind::Skip => summary.skip_count += 1,
            }
        }
        summary
    }

    pub fn render_lines(&self) -> Vec<String> {
        self.actions.iter().filter_map(Action::render).collect()
    }
}

impl From<Vec<Action>> for ActionPlan {
    fn from(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

/// 比较两棵树，生成动作计划（纯函数，不做 I/O）
pub fn diff(source: &Tree, dest: &Tree, config: &SyncConfig) -> ActionPlan {
    diff_with_resolution(source, dest, config, Duration::from_secs(1))
}

/// 同 [`diff`]，可指定修改时间比较的最小容差
pub fn diff_with_resolution(
    source: &Tree,
    dest: &Tree,
    config: &SyncConfig,
    min_resolution: Duration,
) -> ActionPlan {
    let policy = ComparePolicy::from_capabilities(
        config.checksum,
        source.capabilities(),
        dest.capabilities(),
        min_resolution,
    );
    // 方向只取决于参数顺序，这里只决定动作名称
    let transfer_kind = if source.capabilities().remote && !dest.capabilities().remote {
        ActionKind::Download
    } else {
        ActionKind::Upload
    };

    let mut actions = Vec::with_capacity(source.len().max(dest.len()));
    // 冲突路径的源侧子孙无法落地
    let mut blocked: Option<RelPath> = None;

    for (path, src, dst) in MergeJoin::new(source.iter(), dest.iter()) {
        if let Some(root) = &blocked {
            if root.is_ancestor_of(path) {
                tracing::debug!("冲突路径下的条目不处理: {}", path);
                actions.push(Action::new(ActionKind::Skip, path.clone(), src, dst));
                continue;
            }
            blocked = None;
        }

        let kind = match (src, dst) {
            (Some(s), Some(d)) if s.kind != d.kind => {
                tracing::warn!("类型冲突: {} ({} vs {})", path, s.kind, d.kind);
                blocked = Some(path.clone());
                ActionKind::Conflict
            }
            (Some(s), _) if s.is_file() && config.exceeds_max_size(s.size) => {
                tracing::debug!("跳过大文件: {} ({})", path, s.size);
                ActionKind::SkipOversize
            }
            (Some(s), Some(d)) => {
                if comparator::equal(s, d, &policy) {
                    ActionKind::Skip
                } else {
                    transfer_kind
                }
            }
            (Some(s), None) if s.is_dir() => {
                if config.recursive {
                    ActionKind::CreateDir
                } else {
                    // 非递归模式不同步目录内容，也不创建目录
                    ActionKind::Skip
                }
            }
            (Some(_), None) => transfer_kind,
            // 只在目标端存在：单向镜像从不删除
            (None, Some(_)) => ActionKind::Skip,
            (None, None) => continue,
        };

        actions.push(Action::new(kind, path.clone(), src, dst));
    }

    ActionPlan { actions }
}

/// 按路径顺序归并两个有序条目序列
struct MergeJoin<'a, S, D>
where
    S: Iterator<Item = &'a Entry>,
    D: Iterator<Item = &'a Entry>,
{
    source: Peekable<S>,
    dest: Peekable<D>,
}

impl<'a, S, D> MergeJoin<'a, S, D>
where
    S: Iterator<Item = &'a Entry>,
    D: Iterator<Item = &'a Entry>,
{
    fn new(source: S, dest: D) -> Self {
        Self {
            source: source.peekable(),
            dest: dest.peekable(),
        }
    }
}

impl<'a, S, D> Iterator for MergeJoin<'a, S, D>
where
    S: Iterator<Item = &'a Entry>,
    D: Iterator<Item = &'a Entry>,
{
    type Item = (&'a RelPath, Option<&'a Entry>, Option<&'a Entry>);

    fn next(&mut self) -> Option<Self::Item> {
        let order = match (self.source.peek(), self.dest.peek()) {
            (None, None) => return None,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(s), Some(d)) => s.path.cmp(&d.path),
        };

        match order {
            Ordering::Less => {
                let s = self.source.next()?;
                Some((&s.path, Some(s), None))
            }
            Ordering::Greater => {
                let d = self.dest.next()?;
                Some((&d.path, None, Some(d)))
            }
            Ordering::Equal => {
                let s = self.source.next()?;
                let d = self.dest.next();
                Some((&s.path, Some(s), d))
            }
        }
    }
}
