use super::{ByteStream, Capabilities, RawEntry, RawKind, Storage};
use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use futures::{StreamExt, TryStreamExt};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    /// 不会创建根目录，根目录是否存在由列举阶段判断
    pub fn new(path: impl AsRef<Path>) -> Self {
        let base_path = path.as_ref().to_path_buf();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    fn raw_kind(metadata: &Metadata) -> RawKind {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            RawKind::Other
        } else if file_type.is_dir() {
            RawKind::Directory
        } else if file_type.is_file() {
            RawKind::File
        } else {
            RawKind::Other
        }
    }

    fn to_raw_entry(name: String, full_path: &Path, metadata: &Metadata) -> RawEntry {
        let kind = Self::raw_kind(metadata);
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

        RawEntry {
            name,
            kind,
            size: if kind == RawKind::File { metadata.len() } else { 0 },
            modified,
            id: full_path.to_string_lossy().into_owned(),
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn stat(&self, path: &str) -> Result<Option<RawEntry>, ProviderError> {
        let full_path = self.resolve_path(path);

        // 根目录可以是指向目录的链接，子项不跟随链接
        let metadata = if path.trim_matches('/').is_empty() {
            fs::metadata(&full_path).await
        } else {
            fs::symlink_metadata(&full_path).await
        };
        match metadata {
            Ok(metadata) => {
                let name = full_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(Some(Self::to_raw_entry(name, &full_path, &metadata)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProviderError::from_io(e, path)),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<RawEntry>, ProviderError> {
        let dir = self.resolve_path(path);
        let display_path = path.to_string();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for item in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .follow_root_links(true)
            {
                let item = item.map_err(|e| {
                    ProviderError::from_io(std::io::Error::from(e), &display_path)
                })?;
                let metadata = match item.metadata() {
                    Ok(m) => m,
                    // 列举过程中被删除
                    Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                        continue
                    }
                    Err(e) => {
                        return Err(ProviderError::from_io(std::io::Error::from(e), &display_path))
                    }
                };
                let name = item.file_name().to_string_lossy().into_owned();
                entries.push(Self::to_raw_entry(name, item.path(), &metadata));
            }
            Ok(entries)
        })
        .await
        .map_err(|e| ProviderError::new(crate::error::ProviderErrorKind::Other, path, e.to_string()))?
    }

    async fn read(&self, path: &str) -> Result<ByteStream, ProviderError> {
        let file = fs::File::open(self.resolve_path(path))
            .await
            .map_err(|e| ProviderError::from_io(e, path))?;
        let path = path.to_string();
        let stream = ReaderStream::with_capacity(file, READ_BUFFER_SIZE)
            .map_err(move |e| ProviderError::from_io(e, &path));
        Ok(stream.boxed())
    }

    async fn write(
        &self,
        parent: &str,
        name: &str,
        mut stream: ByteStream,
        modified: Option<DateTime<Utc>>,
    ) -> Result<String, ProviderError> {
        let dir = self.resolve_path(parent);
        let target = dir.join(name);
        let display_path = super::join_path(parent, name);

        // 先写临时文件，完成后原子重命名，中途失败或被取消时由 guard 清理
        // 临时文件名长度固定，不受目标文件名长度影响
        let temp_path = dir.join(format!(".gsync-{}.partial", uuid::Uuid::new_v4().simple()));
        let guard = scopeguard::guard(temp_path.clone(), |p| {
            let _ = std::fs::remove_file(p);
        });

        let io_err = |e: std::io::Error| ProviderError::from_io(e, &display_path);

        let mut file = fs::File::create(&temp_path).await.map_err(io_err)?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        if let Some(modified) = modified {
            let mtime = FileTime::from_system_time(modified.into());
            filetime::set_file_mtime(&temp_path, mtime).map_err(io_err)?;
        }

        fs::rename(&temp_path, &target).await.map_err(io_err)?;
        scopeguard::ScopeGuard::into_inner(guard);

        Ok(target.to_string_lossy().into_owned())
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<String, ProviderError> {
        let full_path = self.resolve_path(parent).join(name);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| ProviderError::from_io(e, &super::join_path(parent, name)))?;
        Ok(full_path.to_string_lossy().into_owned())
    }

    async fn checksum(&self, path: &str) -> Result<String, ProviderError> {
        let full_path = self.resolve_path(path);
        let display_path = path.to_string();

        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&full_path)
                .map_err(|e| ProviderError::from_io(e, &display_path))?;
            let mut hasher = blake3::Hasher::new();
            std::io::copy(&mut file, &mut hasher)
                .map_err(|e| ProviderError::from_io(e, &display_path))?;
            Ok(hasher.finalize().to_hex().to_string())
        })
        .await
        .map_err(|e| ProviderError::new(crate::error::ProviderErrorKind::Other, path, e.to_string()))?
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            remote: false,
            mtime_resolution: Duration::from_nanos(1),
            preserves_mtime: true,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
