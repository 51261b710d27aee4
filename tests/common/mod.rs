//! 测试用的内存存储，可注入失败
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use gsync_lib::config::{Location, SyncConfig, TransferConfig};
use gsync_lib::error::{ProviderError, ProviderErrorKind};
use gsync_lib::storage::{join_path, ByteStream, Capabilities, RawEntry, RawKind, Storage};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: DateTime<Utc> },
    File { data: Bytes, modified: DateTime<Utc> },
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    /// 路径 -> 依次返回的错误
    failures: HashMap<String, VecDeque<ProviderErrorKind>>,
    attempts: HashMap<String, usize>,
    stat_calls: usize,
}

pub struct MemoryStorage {
    name: String,
    capabilities: Capabilities,
    write_delay: Duration,
    state: Mutex<State>,
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn key(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..i].to_string(),
        None => String::new(),
    }
}

impl MemoryStorage {
    /// 行为类似本地磁盘：保留修改时间
    pub fn local_like(name: &str) -> Self {
        Self::with_capabilities(
            name,
            Capabilities {
                remote: false,
                mtime_resolution: Duration::from_nanos(1),
                preserves_mtime: true,
            },
        )
    }

    /// 行为类似云盘：写入时间即修改时间
    pub fn drive_like(name: &str) -> Self {
        Self::with_capabilities(
            name,
            Capabilities {
                remote: true,
                mtime_resolution: Duration::from_millis(1),
                preserves_mtime: false,
            },
        )
    }

    fn with_capabilities(name: &str, capabilities: Capabilities) -> Self {
        let mut state = State::default();
        state
            .nodes
            .insert(String::new(), Node::Dir { modified: at(0) });
        Self {
            name: name.to_string(),
            capabilities,
            write_delay: Duration::ZERO,
            state: Mutex::new(state),
        }
    }

    /// 根目录不存在
    pub fn without_root(self) -> Self {
        self.state.lock().unwrap().nodes.clear();
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn add_dir(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(key(path), Node::Dir { modified: at(0) });
    }

    pub fn add_file(&self, path: &str, data: &[u8], modified: DateTime<Utc>) {
        self.state.lock().unwrap().nodes.insert(
            key(path),
            Node::File {
                data: Bytes::copy_from_slice(data),
                modified,
            },
        );
    }

    /// 对 `path` 的写入或建目录依次失败 `times` 次
    pub fn fail(&self, path: &str, kind: ProviderErrorKind, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(key(path))
            .or_default()
            .extend(std::iter::repeat(kind).take(times));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().unwrap().nodes.get(&key(path)) {
            Some(Node::File { data, .. }) => Some(data.to_vec()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.state.lock().unwrap().nodes.get(&key(path)),
            Some(Node::Dir { .. })
        )
    }

    pub fn attempts(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(&key(path))
            .copied()
            .unwrap_or(0)
    }

    pub fn stat_calls(&self) -> usize {
        self.state.lock().unwrap().stat_calls
    }

    /// 根目录以外的对象数
    pub fn object_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .nodes
            .keys()
            .filter(|k| !k.is_empty())
            .count()
    }

    /// 记录一次修改尝试，返回注入的错误
    fn attempt(&self, path: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(path.to_string()).or_insert(0) += 1;
        let injected = state.failures.get_mut(path).and_then(VecDeque::pop_front);
        match injected {
            Some(kind) => Err(ProviderError::new(kind, path, "injected failure")),
            None => Ok(()),
        }
    }

    fn require_dir(&self, path: &str) -> Result<(), ProviderError> {
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::Dir { .. }) => Ok(()),
            _ => Err(ProviderError::not_found(path)),
        }
    }

    fn raw_entry(path: &str, node: &Node) -> RawEntry {
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        match node {
            Node::Dir { modified } => RawEntry {
                name,
                kind: RawKind::Directory,
                size: 0,
                modified: *modified,
                id: path.to_string(),
            },
            Node::File { data, modified } => RawEntry {
                name,
                kind: RawKind::File,
                size: data.len() as u64,
                modified: *modified,
                id: path.to_string(),
            },
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn stat(&self, path: &str) -> Result<Option<RawEntry>, ProviderError> {
        let path = key(path);
        let mut state = self.state.lock().unwrap();
        state.stat_calls += 1;
        Ok(state.nodes.get(&path).map(|node| Self::raw_entry(&path, node)))
    }

    async fn list(&self, path: &str) -> Result<Vec<RawEntry>, ProviderError> {
        let path = key(path);
        self.require_dir(&path)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .filter(|(k, _)| !k.is_empty() && parent_of(k) == path)
            .map(|(k, node)| Self::raw_entry(k, node))
            .collect())
    }

    async fn read(&self, path: &str) -> Result<ByteStream, ProviderError> {
        let data = self.file(path).ok_or_else(|| ProviderError::not_found(path))?;
        // 分成小块，模拟流式读取
        let chunks: Vec<Result<Bytes, ProviderError>> = data
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn write(
        &self,
        parent: &str,
        name: &str,
        stream: ByteStream,
        modified: Option<DateTime<Utc>>,
    ) -> Result<String, ProviderError> {
        let path = join_path(parent, name);
        self.attempt(&path)?;
        self.require_dir(&key(parent))?;

        let chunks: Vec<Bytes> = stream.try_collect().await?;
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }

        let modified = match modified {
            Some(m) if self.capabilities.preserves_mtime => m,
            _ => Utc::now(),
        };
        self.state.lock().unwrap().nodes.insert(
            path.clone(),
            Node::File {
                data: Bytes::from(chunks.concat()),
                modified,
            },
        );
        Ok(path)
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<String, ProviderError> {
        let path = key(&join_path(parent, name));
        if path.is_empty() {
            self.state
                .lock()
                .unwrap()
                .nodes
                .entry(String::new())
                .or_insert(Node::Dir { modified: Utc::now() });
            return Ok(path);
        }
        self.attempt(&path)?;
        self.require_dir(&key(parent))?;
        self.state
            .lock()
            .unwrap()
            .nodes
            .entry(path.clone())
            .or_insert(Node::Dir { modified: Utc::now() });
        Ok(path)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 本地 -> 云盘方向的默认配置
pub fn upload_config(recursive: bool) -> SyncConfig {
    let mut config = SyncConfig::new(
        Location::Local("src".into()),
        Location::Remote("/backup".to_string()),
    );
    config.recursive = recursive;
    config
}

/// 重试延迟很短的传输配置
pub fn fast_transfer() -> TransferConfig {
    TransferConfig {
        retry_base_delay_ms: 1,
        ..TransferConfig::default()
    }
}
