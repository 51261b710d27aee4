//! 运行配置
//!
//! `SyncConfig` 在启动时由命令行参数构造一次，之后只读；
//! `TransferConfig` 是可调参数，从配置目录下的 `config.json` 读取。

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 表示云盘根目录的路径前缀
pub const REMOTE_PREFIX: &str = "gd:";

/// 同步的一端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    /// 云盘内的路径，`/` 为根目录
    Remote(String),
}

impl Location {
    /// `gd:` 开头的是云盘路径，其余是本地路径
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::EmptyLocation);
        }

        match raw.strip_prefix(REMOTE_PREFIX) {
            Some(rest) => {
                let rest = rest.trim_matches('/');
                Ok(Location::Remote(format!("/{}", rest)))
            }
            None => Ok(Location::Local(PathBuf::from(raw))),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote(path) => write!(f, "{}{}", REMOTE_PREFIX, path),
        }
    }
}

/// 一次同步运行的参数
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: Location,
    pub destination: Location,
    pub recursive: bool,
    /// 用校验和代替大小+修改时间比较
    pub checksum: bool,
    pub dry_run: bool,
    /// 大于此字节数的文件不传输
    pub max_size: Option<u64>,
    /// 排除规则（glob patterns）
    pub exclude: Vec<String>,
}

impl SyncConfig {
    pub fn new(source: Location, destination: Location) -> Self {
        Self {
            source,
            destination,
            recursive: false,
            checksum: false,
            dry_run: false,
            max_size: None,
            exclude: Vec::new(),
        }
    }

    /// 文件大小是否超过上限（等于上限仍会传输）
    pub fn exceeds_max_size(&self, size: u64) -> bool {
        self.max_size.is_some_and(|max| size > max)
    }
}

/// 传输与列举的可调参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 最大并发传输数
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// 列举目录时的最大并发请求数
    #[serde(default = "default_max_concurrent_listings")]
    pub max_concurrent_listings: usize,
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 修改时间比较的最小容差（毫秒）
    #[serde(default = "default_min_time_resolution_ms")]
    pub min_time_resolution_ms: u64,
}

fn default_max_concurrent_transfers() -> usize {
    4
}

fn default_max_concurrent_listings() -> usize {
    8
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_min_time_resolution_ms() -> u64 {
    1000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent_transfers(),
            max_concurrent_listings: default_max_concurrent_listings(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            min_time_resolution_ms: default_min_time_resolution_ms(),
        }
    }
}

impl TransferConfig {
    /// 从配置文件加载，文件或 `transfer` 键不存在时使用默认值
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let Some(section) = read_section(config_dir, "transfer")? else {
            return Ok(Self::default());
        };

        let config: Self =
            serde_json::from_value(section).map_err(|e| ConfigError::ConfigFile {
                path: config_file(config_dir).display().to_string(),
                message: e.to_string(),
            })?;
        Ok(config.sanitized())
    }

    /// 并发数至少为 1
    fn sanitized(mut self) -> Self {
        self.max_concurrent_transfers = self.max_concurrent_transfers.max(1);
        self.max_concurrent_listings = self.max_concurrent_listings.max(1);
        self
    }

    pub fn min_time_resolution(&self) -> Duration {
        Duration::from_millis(self.min_time_resolution_ms)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        // 指数退避，上限 2^10 倍
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1 << attempt.min(10)))
    }
}

pub(crate) fn config_file(config_dir: &Path) -> PathBuf {
    config_dir.join("config.json")
}

/// 读取 `config.json` 中的某一节
pub(crate) fn read_section(
    config_dir: &Path,
    key: &str,
) -> Result<Option<serde_json::Value>, ConfigError> {
    let path = config_file(config_dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::ConfigFile {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        }
    };

    let mut root: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| ConfigError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(root.get_mut(key).map(serde_json::Value::take))
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("gsync"))
        .unwrap_or_else(|| PathBuf::from(".gsync"))
}

/// 解析大小参数：纯字节数，或带 K/M/G/T 后缀（1024 进制，可跟 B 或 iB）
pub fn parse_size(raw: &str) -> Result<u64, ConfigError> {
    let malformed = || ConfigError::MalformedSize(raw.to_string());

    let text = raw.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    if digits.is_empty() {
        return Err(malformed());
    }
    let value: u64 = digits.parse().map_err(|_| malformed())?;

    let suffix = suffix.trim().to_ascii_uppercase();
    let unit = suffix
        .strip_suffix("IB")
        .or_else(|| suffix.strip_suffix('B'))
        .unwrap_or(&suffix);

    let shift = match unit {
        "" => 0,
        "K" => 10,
        "M" => 20,
        "G" => 30,
        "T" => 40,
        _ => return Err(malformed()),
    };

    value.checked_mul(1u64 << shift).ok_or_else(malformed)
}
