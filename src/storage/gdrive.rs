use super::drive_api::DriveApi;
use super::{
    join_path, ByteStream, Capabilities, RawEntry, RawKind, Storage, IO_TIMEOUT_SECS,
    OP_TIMEOUT_SECS, READ_CHUNK_SIZE,
};
use crate::error::{ConfigError, ProviderError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, EntryMode, Metadata, Operator};
use std::time::Duration;

/// 云盘凭据，只在存储层使用
#[derive(Clone)]
pub struct DriveCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl DriveCredentials {
    pub const CLIENT_ID_VAR: &'static str = "CLIENT_ID";
    pub const CLIENT_SECRET_VAR: &'static str = "CLIENT_SECRET";
    pub const REFRESH_TOKEN_VAR: &'static str = "REFRESH_TOKEN";

    /// 从环境变量读取三项凭据
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |var: &'static str| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(var))
        };

        Ok(Self {
            client_id: read(Self::CLIENT_ID_VAR)?,
            client_secret: read(Self::CLIENT_SECRET_VAR)?,
            refresh_token: read(Self::REFRESH_TOKEN_VAR)?,
        })
    }
}

impl std::fmt::Debug for DriveCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// 读写和建目录走 opendal，目录列举走 Drive v3 元数据接口
pub struct DriveStorage {
    operator: Operator,
    api: DriveApi,
    name: String,
}

impl DriveStorage {
    /// 访问令牌由 opendal 的 gdrive 服务用 refresh token 自动获取和刷新
    pub fn new(root: &str, credentials: &DriveCredentials) -> Result<Self, ProviderError> {
        use opendal::services::Gdrive;

        let root = if root.is_empty() { "/" } else { root };
        let builder = Gdrive::default()
            .root(root)
            .client_id(&credentials.client_id)
            .client_secret(&credentials.client_secret)
            .refresh_token(&credentials.refresh_token);

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let api = DriveApi::new(root, credentials)?;
        let name = format!("gd:{}", root);
        Ok(Self { operator, api, name })
    }

    fn raw_kind(meta: &Metadata) -> RawKind {
        match meta.mode() {
            EntryMode::DIR => RawKind::Directory,
            EntryMode::FILE => RawKind::File,
            EntryMode::Unknown => RawKind::Other,
        }
    }

    fn to_raw_entry(name: &str, path: &str, meta: &Metadata) -> RawEntry {
        let kind = Self::raw_kind(meta);
        RawEntry {
            name: name.trim_end_matches('/').to_string(),
            kind,
            size: if kind == RawKind::File { meta.content_length() } else { 0 },
            modified: meta
                .last_modified()
                .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH)),
            id: path.to_string(),
        }
    }

    fn dir_path(path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", path)
        }
    }
}

#[async_trait]
impl Storage for DriveStorage {
    async fn stat(&self, path: &str) -> Result<Option<RawEntry>, ProviderError> {
        let trimmed = path.trim_matches('/');
        let name = trimmed.rsplit('/').next().unwrap_or_default();

        // 目录必须以 / 结尾才能被识别，先按文件查，再按目录查
        if !trimmed.is_empty() {
            match self.operator.stat(trimmed).await {
                Ok(meta) => return Ok(Some(Self::to_raw_entry(name, trimmed, &meta))),
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => {}
                Err(e) => return Err(ProviderError::from(e).at(path)),
            }
        }

        let dir = Self::dir_path(trimmed);
        match self.operator.stat(&dir).await {
            Ok(meta) => Ok(Some(Self::to_raw_entry(name, &dir, &meta))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProviderError::from(e).at(path)),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<RawEntry>, ProviderError> {
        // opendal 的列举不带 mimeType，无法区分原生文档
        self.api.list(path).await
    }

    async fn read(&self, path: &str) -> Result<ByteStream, ProviderError> {
        let path = path.trim_matches('/').to_string();
        let total = self
            .operator
            .stat(&path)
            .await
            .map_err(|e| ProviderError::from(e).at(&path))?
            .content_length();
        let operator = self.operator.clone();

        // 按块做范围读取，避免整个文件驻留内存
        let stream = futures::stream::try_unfold(0u64, move |offset| {
            let operator = operator.clone();
            let path = path.clone();
            async move {
                if offset >= total {
                    return Ok::<_, ProviderError>(None);
                }
                let end = (offset + READ_CHUNK_SIZE).min(total);
                let buffer = operator
                    .read_with(&path)
                    .range(offset..end)
                    .await
                    .map_err(|e| ProviderError::from(e).at(&path))?;
                let chunk: Bytes = buffer.to_bytes();
                Ok(Some((chunk, end)))
            }
        });

        Ok(stream.boxed())
    }

    async fn write(
        &self,
        parent: &str,
        name: &str,
        stream: ByteStream,
        _modified: Option<DateTime<Utc>>,
    ) -> Result<String, ProviderError> {
        let path = join_path(parent, name);

        // 云盘单次上传在完成前不会产生可见对象，先收集全部内容
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        self.operator
            .write(&path, chunks)
            .await
            .map_err(|e| ProviderError::from(e).at(&path))?;

        Ok(path)
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<String, ProviderError> {
        let dir = Self::dir_path(&join_path(parent, name));
        self.operator
            .create_dir(&dir)
            .await
            .map_err(|e| ProviderError::from(e).at(&dir))?;
        Ok(dir)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            remote: true,
            mtime_resolution: Duration::from_millis(1),
            // 云盘记录上传时间，无法写入源文件的修改时间
            preserves_mtime: false,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_path() {
        assert_eq!(DriveStorage::dir_path(""), "/");
        assert_eq!(DriveStorage::dir_path("/"), "/");
        assert_eq!(DriveStorage::dir_path("docs"), "docs/");
        assert_eq!(DriveStorage::dir_path("/docs/sub/"), "docs/sub/");
    }

    #[test]
    fn test_stat_kind_follows_mode() {
        assert_eq!(DriveStorage::raw_kind(&Metadata::new(EntryMode::DIR)), RawKind::Directory);
        assert_eq!(DriveStorage::raw_kind(&Metadata::new(EntryMode::FILE)), RawKind::File);
        assert_eq!(DriveStorage::raw_kind(&Metadata::new(EntryMode::Unknown)), RawKind::Other);
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let credentials = DriveCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "token".to_string(),
        };
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("id"));
        assert!(!rendered.contains("secret\""));
        assert!(!rendered.contains("token\""));
    }
}
