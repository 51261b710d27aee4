//! 错误类型

use crate::core::entry::{EntryKind, RelPath};
use std::fmt;
use thiserror::Error;

/// 存储操作失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    NotFound,
    PermissionDenied,
    RateLimited,
    Transient,
    Quota,
    Other,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::NotFound => write!(f, "not found"),
            ProviderErrorKind::PermissionDenied => write!(f, "permission denied"),
            ProviderErrorKind::RateLimited => write!(f, "rate limited"),
            ProviderErrorKind::Transient => write!(f, "transient"),
            ProviderErrorKind::Quota => write!(f, "quota exceeded"),
            ProviderErrorKind::Other => write!(f, "error"),
        }
    }
}

/// 存储层错误
#[derive(Debug, Clone, Error)]
#[error("{kind}: {path}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub path: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, path, "no such file or directory")
    }

    pub fn cancelled(path: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, path, "operation cancelled")
    }

    /// 限流和临时错误可以重试，其余都是永久错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited | ProviderErrorKind::Transient
        )
    }

    /// 补充出错路径（底层错误不一定带路径）
    pub fn at(mut self, path: &str) -> Self {
        if self.path.is_empty() {
            self.path = path.to_string();
        }
        self
    }

    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match err.kind() {
            Io::NotFound => ProviderErrorKind::NotFound,
            Io::PermissionDenied => ProviderErrorKind::PermissionDenied,
            Io::TimedOut | Io::Interrupted | Io::WouldBlock | Io::ConnectionReset => {
                ProviderErrorKind::Transient
            }
            _ if is_disk_full(&err) => ProviderErrorKind::Quota,
            _ => ProviderErrorKind::Other,
        };
        Self::new(kind, path, err.to_string())
    }
}

#[cfg(unix)]
fn is_disk_full(err: &std::io::Error) -> bool {
    // ENOSPC
    err.raw_os_error() == Some(28)
}

#[cfg(not(unix))]
fn is_disk_full(_err: &std::io::Error) -> bool {
    false
}

impl From<opendal::Error> for ProviderError {
    fn from(err: opendal::Error) -> Self {
        let kind = match err.kind() {
            opendal::ErrorKind::NotFound => ProviderErrorKind::NotFound,
            opendal::ErrorKind::PermissionDenied => ProviderErrorKind::PermissionDenied,
            opendal::ErrorKind::RateLimited => ProviderErrorKind::RateLimited,
            _ if err.is_temporary() => ProviderErrorKind::Transient,
            _ if err.to_string().contains("storageQuotaExceeded") => ProviderErrorKind::Quota,
            _ => ProviderErrorKind::Other,
        };
        Self::new(kind, String::new(), err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ProviderErrorKind::Transient
        } else {
            ProviderErrorKind::Other
        };
        Self::new(kind, String::new(), err.to_string())
    }
}

/// 同一路径在两侧类型不一致（文件 vs 目录）
#[derive(Debug, Clone, Error, serde::Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{path}: {source_kind} in source vs {dest_kind} in destination")]
pub struct ConflictError {
    pub path: RelPath,
    pub source_kind: EntryKind,
    pub dest_kind: EntryKind,
}

/// 启动阶段的配置错误，出现即终止
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("empty location")]
    EmptyLocation,
    #[error("source directory does not exist: {0}")]
    MissingSource(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("malformed size '{0}'")]
    MalformedSize(String),
    #[error("environment variable {0} is not set")]
    MissingCredential(&'static str),
    #[error("invalid config file {path}: {message}")]
    ConfigFile { path: String, message: String },
    #[error("invalid exclude pattern '{0}'")]
    BadPattern(String),
    #[error("cannot open remote storage {root}: {message}")]
    RemoteSetup { root: String, message: String },
}

/// 同步运行中导致整体失败的错误
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::new(ProviderErrorKind::RateLimited, "a", "slow down").is_retryable());
        assert!(ProviderError::new(ProviderErrorKind::Transient, "a", "reset").is_retryable());
        assert!(!ProviderError::new(ProviderErrorKind::PermissionDenied, "a", "no").is_retryable());
        assert!(!ProviderError::new(ProviderErrorKind::Quota, "a", "full").is_retryable());
    }

    #[test]
    fn test_from_io_classifies() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ProviderError::from_io(err, "x").kind, ProviderErrorKind::NotFound);

        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(ProviderError::from_io(err, "x").is_retryable());
    }

    #[test]
    fn test_at_keeps_existing_path() {
        let err = ProviderError::not_found("a/b").at("c");
        assert_eq!(err.path, "a/b");
        let err = ProviderError::new(ProviderErrorKind::Other, "", "boom").at("c");
        assert_eq!(err.path, "c");
    }
}
