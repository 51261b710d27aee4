mod drive_api;
pub mod gdrive;
pub mod local;

use crate::config::Location;
use crate::error::{ConfigError, ProviderError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use gdrive::{DriveCredentials, DriveStorage};
pub use local::LocalStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list, mkdir 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 流式读取的块大小
pub const READ_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// 文件内容字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// 存储层看到的对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    File,
    Directory,
    /// 符号链接、设备文件、云端快捷方式等，不参与同步
    Other,
}

/// 单层列举返回的条目
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub name: String,
    pub kind: RawKind,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub id: String,
}

/// 存储声明的能力，比较器据此选择比较方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// 云端存储，传输方向标记为 DOWNLOAD 的依据
    pub remote: bool,
    /// 修改时间精度
    pub mtime_resolution: Duration,
    /// 写入时能否保留调用方给出的修改时间
    pub preserves_mtime: bool,
}

/// 存储抽象接口，路径均相对于存储根目录，`/` 分隔，空串表示根目录
#[async_trait]
pub trait Storage: Send + Sync {
    /// 获取单个对象的元数据
    async fn stat(&self, path: &str) -> Result<Option<RawEntry>, ProviderError>;

    /// 列出目录的直接子项（一层）
    async fn list(&self, path: &str) -> Result<Vec<RawEntry>, ProviderError>;

    /// 以字节流读取文件
    async fn read(&self, path: &str) -> Result<ByteStream, ProviderError>;

    /// 在 `parent` 下创建或覆盖文件 `name`，返回对象标识
    async fn write(
        &self,
        parent: &str,
        name: &str,
        stream: ByteStream,
        modified: Option<DateTime<Utc>>,
    ) -> Result<String, ProviderError>;

    /// 在 `parent` 下创建目录 `name`（已存在时视为成功）
    async fn mkdir(&self, parent: &str, name: &str) -> Result<String, ProviderError>;

    /// 确保根目录存在
    async fn ensure_root(&self) -> Result<(), ProviderError> {
        self.mkdir("", "").await.map(|_| ())
    }

    /// 内容校验和，默认读取全部内容计算 BLAKE3
    async fn checksum(&self, path: &str) -> Result<String, ProviderError> {
        let mut stream = self.read(path).await?;
        let mut hasher = blake3::Hasher::new();
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn capabilities(&self) -> Capabilities;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 拼接父路径与名称
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// 根据位置创建存储实例
pub async fn create_storage(location: &Location) -> Result<Arc<dyn Storage>, ConfigError> {
    match location {
        Location::Local(path) => {
            tracing::info!("初始化本地存储: {}", path.display());
            Ok(Arc::new(LocalStorage::new(path)) as Arc<dyn Storage>)
        }
        Location::Remote(root) => {
            let credentials = DriveCredentials::from_env()?;
            tracing::info!("初始化云盘存储: root={}", root);
            let storage = DriveStorage::new(root, &credentials).map_err(|e| {
                ConfigError::RemoteSetup {
                    root: root.clone(),
                    message: e.to_string(),
                }
            })?;
            Ok(Arc::new(storage) as Arc<dyn Storage>)
        }
    }
}
