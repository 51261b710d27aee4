//! 日志模块 - 控制台输出到 stderr，可选写入带大小限制的日志文件

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "gsync.log";

/// 这些依赖的日志最多输出 warn
const NOISY_TARGETS: [&str; 3] = ["opendal=warn", "hyper=warn", "reqwest=warn"];

/// 日志配置，对应 `config.json` 中的 `log` 节
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 是否同时写入配置目录下的日志文件
    #[serde(default)]
    pub file: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "warn".to_string()
}

fn default_max_size_mb() -> u32 {
    5
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            file: false,
            max_size_mb: default_max_size_mb(),
        }
    }
}

impl LogConfig {
    /// 从配置文件加载，文件缺失或内容无效时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        crate::config::read_section(config_dir, "log")
            .ok()
            .flatten()
            .and_then(|section| serde_json::from_value(section).ok())
            .unwrap_or_default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        }
    }
}

/// 命令行 `-v`/`-q` 对应的级别，未指定时返回 None
pub fn cli_level(verbose: u8, quiet: bool) -> Option<Level> {
    if quiet {
        return Some(Level::ERROR);
    }
    match verbose {
        0 => None,
        1 => Some(Level::INFO),
        2 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// 级别优先级：`RUST_LOG` > 命令行 > 配置文件
pub fn build_filter(config: &LogConfig, cli: Option<Level>) -> EnvFilter {
    let level = cli.unwrap_or_else(|| config.tracing_level());
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    for target in NOISY_TARGETS {
        if let Ok(directive) = target.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// 初始化全局日志，返回的 guard 必须持有到程序结束
pub fn init_logging(config_dir: &Path, cli: Option<Level>) -> Option<WorkerGuard> {
    let config = LogConfig::load(config_dir);

    if !config.enabled && cli.is_none() {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let file_writer = if config.file {
        match SizeLimitedFile::open(config_dir, config.max_size_mb) {
            Ok(writer) => Some(tracing_appender::non_blocking(writer)),
            Err(e) => {
                eprintln!("无法打开日志文件: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (file_layer, guard) = match file_writer {
        Some((writer, guard)) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(build_filter(&config, cli))
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

/// 超过大小上限时把当前文件轮转为 `.old` 的日志文件
pub struct SizeLimitedFile {
    path: PathBuf,
    max_size: u64,
    written: u64,
    writer: BufWriter<File>,
}

impl SizeLimitedFile {
    pub fn open(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(LOG_FILE_NAME);
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;

        let existing = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            Self::rotate(&path)?;
        }
        let written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            writer: Self::open_append(&path)?,
            path,
            max_size,
            written,
        })
    }

    fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn rotate(path: &Path) -> io::Result<()> {
        let backup = path.with_extension("log.old");
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        fs::rename(path, backup)
    }
}

impl Write for SizeLimitedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_size && self.written > 0 {
            self.writer.flush()?;
            Self::rotate(&self.path)?;
            self.writer = Self::open_append(&self.path)?;
            self.written = 0;
        }
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
