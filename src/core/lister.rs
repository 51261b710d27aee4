use crate::core::entry::{Entry, EntryKind, RelPath, Tree};
use crate::error::{ConfigError, ProviderError, ProviderErrorKind};
use crate::storage::{RawEntry, RawKind, Storage};
use regex::Regex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 根目录的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
    Directory,
    Missing,
    NotADirectory,
}

/// 排除规则：`*` 匹配单个路径段内的任意字符，`**` 可跨越路径段
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&glob_to_regex(p)).map_err(|_| ConfigError::BadPattern(p.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// 相对路径或文件名任一匹配即排除
    pub fn is_excluded(&self, path: &RelPath) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let full = path.as_storage_path();
        let name = path.name().unwrap_or_default();
        self.patterns
            .iter()
            .any(|re| re.is_match(&full) || re.is_match(name))
    }
}

/// 把 glob 模式转换为锚定的正则表达式
fn glob_to_regex(pattern: &str) -> String {
    let pattern = pattern.trim().trim_start_matches('/');
    // `dir/**` 同时排除目录本身
    let (body, subtree) = match pattern.strip_suffix("/**") {
        Some(prefix) => (prefix, true),
        None => (pattern, false),
    };

    let mut regex = String::from("^");
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` 可以匹配零个目录
                if chars.peek() == Some(&'/') {
                    chars.next();
                    regex.push_str("(.*/)?");
                } else {
                    regex.push_str(".*");
                }
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    if subtree {
        regex.push_str("(/.*)?");
    }
    regex.push('$');
    regex
}

/// 目录树列举器
pub struct TreeLister {
    max_concurrent: usize,
    excludes: ExcludeSet,
    cancel: CancellationToken,
}

impl TreeLister {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            excludes: ExcludeSet::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_excludes(mut self, excludes: ExcludeSet) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 检查存储根目录是否存在且是目录
    pub async fn probe_root(storage: &dyn Storage) -> Result<RootState, ProviderError> {
        Ok(match storage.stat("").await? {
            None => RootState::Missing,
            Some(raw) if raw.kind == RawKind::Directory => RootState::Directory,
            Some(_) => RootState::NotADirectory,
        })
    }

    /// 列举存储根目录，非递归时只列一层
    pub async fn list(
        &self,
        storage: Arc<dyn Storage>,
        recursive: bool,
    ) -> Result<Tree, ProviderError> {
        match Self::probe_root(storage.as_ref()).await? {
            RootState::Directory => self.walk(storage, recursive).await,
            RootState::Missing => Err(ProviderError::not_found(storage.name())),
            RootState::NotADirectory => Err(ProviderError::new(
                ProviderErrorKind::Other,
                storage.name(),
                "not a directory",
            )),
        }
    }

    /// 列举已确认是目录的根目录，不再检查根目录
    ///
    /// 同一深度的目录并发列举，并发数受信号量限制；每层开始前检查取消。
    pub async fn walk(
        &self,
        storage: Arc<dyn Storage>,
        recursive: bool,
    ) -> Result<Tree, ProviderError> {
        info!("开始列举: {} (recursive={})", storage.name(), recursive);

        let mut tree = Tree::new(storage.capabilities());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut level = vec![RelPath::root()];
        let mut depth = 0usize;

        while !level.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(ProviderError::cancelled(storage.name()));
            }
            debug!("列举第 {} 层: {} 个目录", depth, level.len());

            let mut handles = Vec::with_capacity(level.len());
            for dir in level.drain(..) {
                let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                    ProviderError::new(ProviderErrorKind::Other, dir.as_storage_path(), e.to_string())
                })?;
                let storage = storage.clone();

                handles.push(tokio::spawn(async move {
                    let result = storage.list(&dir.as_storage_path()).await;
                    drop(permit);
                    (dir, result)
                }));
            }

            let mut next = Vec::new();
            for handle in handles {
                let (dir, result) = handle.await.map_err(|e| {
                    ProviderError::new(ProviderErrorKind::Other, storage.name(), e.to_string())
                })?;
                let children = result.map_err(|e| e.at(&dir.as_storage_path()))?;

                for raw in children {
                    let path = dir.join(&raw.name);
                    if self.excludes.is_excluded(&path) {
                        debug!("排除: {}", path);
                        continue;
                    }
                    match raw.kind {
                        RawKind::Other => {
                            warn!("跳过非普通文件: {}", path);
                            tree.record_skipped(path);
                        }
                        RawKind::Directory => {
                            if recursive {
                                next.push(path.clone());
                            }
                            tree.insert(to_entry(path, EntryKind::Directory, raw));
                        }
                        RawKind::File => {
                            tree.insert(to_entry(path, EntryKind::File, raw));
                        }
                    }
                }
            }

            level = next;
            depth += 1;
        }

        info!(
            "列举完成: {} 个条目 ({} 个文件, {} 字节), 跳过 {} 个",
            tree.len(),
            tree.file_count(),
            tree.total_bytes(),
            tree.skipped().len()
        );
        Ok(tree)
    }

    /// 为两侧都存在且大小相同的文件获取校验和
    ///
    /// 大小不同的文件一定需要传输，无需计算校验和。获取失败时保留为空，比较时按不同处理。
    pub async fn fill_checksums(
        &self,
        source_tree: &mut Tree,
        dest_tree: &mut Tree,
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
    ) {
        let candidates: Vec<RelPath> = source_tree
            .iter()
            .filter(|s| s.is_file())
            .filter(|s| {
                dest_tree
                    .get(&s.path)
                    .is_some_and(|d| d.is_file() && d.size == s.size)
            })
            .map(|s| s.path.clone())
            .collect();

        if candidates.is_empty() {
            return;
        }
        info!("计算校验和: {} 对文件", candidates.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(candidates.len());
        for path in candidates {
            if self.cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let source = source.clone();
            let dest = dest.clone();

            handles.push(tokio::spawn(async move {
                let storage_path = path.as_storage_path();
                let (src_sum, dst_sum) =
                    tokio::join!(source.checksum(&storage_path), dest.checksum(&storage_path));
                drop(permit);
                (path, src_sum, dst_sum)
            }));
        }

        for handle in handles {
            let (path, src_sum, dst_sum) = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("校验和任务失败: {}", e);
                    continue;
                }
            };
            match (src_sum, dst_sum) {
                (Ok(src_sum), Ok(dst_sum)) => {
                    if let Some(entry) = source_tree.get_mut(&path) {
                        entry.checksum = Some(src_sum);
                    }
                    if let Some(entry) = dest_tree.get_mut(&path) {
                        entry.checksum = Some(dst_sum);
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!("获取校验和失败，按不同处理: {}: {}", path, e);
                }
            }
        }
    }
}

impl Default for TreeLister {
    fn default() -> Self {
        Self::new(8)
    }
}

fn to_entry(path: RelPath, kind: EntryKind, raw: RawEntry) -> Entry {
    Entry {
        path,
        kind,
        size: if kind == EntryKind::File { raw.size } else { 0 },
        modified: raw.modified,
        checksum: None,
        id: raw.id,
    }
}
