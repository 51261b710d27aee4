//! 命令行参数

use crate::config::{default_config_dir, parse_size, Location, SyncConfig, TransferConfig};
use crate::error::ConfigError;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// gsync - 本地目录与 Google Drive 之间的单向同步
#[derive(Debug, Parser)]
#[command(
    name = "gsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "One-way file synchronizer between local directories and Google Drive",
    long_about = "Mirrors SOURCEDIR into DESTINATIONDIR. Paths starting with gd: refer to the\n\
                  drive (gd:/photos, or gd: for the drive root). Files that exist only in the\n\
                  destination are never deleted.\n\n\
                  Drive credentials are read from CLIENT_ID, CLIENT_SECRET and REFRESH_TOKEN."
)]
pub struct Cli {
    /// Source directory
    #[arg(value_name = "SOURCEDIR")]
    pub source: String,

    /// Destination directory
    #[arg(value_name = "DESTINATIONDIR")]
    pub destination: String,

    /// Sync subdirectories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Compare file contents by checksum instead of size and modification time
    #[arg(short, long)]
    pub checksum: bool,

    /// Show what would be transferred without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip files larger than SIZE (bytes, or with K/M/G/T suffix)
    #[arg(long, value_name = "SIZE")]
    pub max_size: Option<String>,

    /// Exclude paths matching PATTERN (repeatable)
    #[arg(short, long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Number of concurrent transfers
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Cancel the run after SECS seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Configuration directory
    #[arg(long, value_name = "DIR", env = "GSYNC_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(default_config_dir)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// 构造本次运行的同步参数
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let mut config = SyncConfig::new(
            Location::parse(&self.source)?,
            Location::parse(&self.destination)?,
        );
        config.recursive = self.recursive;
        config.checksum = self.checksum;
        config.dry_run = self.dry_run;
        config.max_size = self.max_size.as_deref().map(parse_size).transpose()?;
        config.exclude = self.exclude.clone();
        Ok(config)
    }

    /// 读取配置文件中的传输参数，并应用命令行覆盖
    pub fn transfer_config(&self) -> Result<TransferConfig, ConfigError> {
        let mut transfer = TransferConfig::load(&self.config_dir())?;
        if let Some(jobs) = self.jobs {
            transfer.max_concurrent_transfers = jobs.max(1);
        }
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_full_command_line() {
        let cli = Cli::try_parse_from([
            "gsync",
            "-r",
            "--dry-run",
            "--max-size",
            "1K",
            "-e",
            "*.tmp",
            "-e",
            ".git/**",
            "-vv",
            "./docs",
            "gd:/backup/docs",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let config = cli.sync_config().unwrap();
        assert!(config.recursive);
        assert!(config.dry_run);
        assert!(!config.checksum);
        assert_eq!(config.max_size, Some(1024));
        assert_eq!(config.exclude, vec!["*.tmp", ".git/**"]);
        assert_eq!(config.source, Location::Local(PathBuf::from("./docs")));
        assert_eq!(config.destination, Location::Remote("/backup/docs".to_string()));
    }

    #[test]
    fn test_malformed_size_is_config_error() {
        let cli = Cli::try_parse_from(["gsync", "--max-size", "lots", "a", "b"]).unwrap();
        assert!(matches!(cli.sync_config(), Err(ConfigError::MalformedSize(_))));
    }

    #[test]
    fn test_jobs_overrides_transfer_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().to_string_lossy().into_owned();
        let cli =
            Cli::try_parse_from(["gsync", "-j", "16", "--config-dir", &dir, "a", "b"]).unwrap();

        let transfer = cli.transfer_config().unwrap();
        assert_eq!(transfer.max_concurrent_transfers, 16);
        assert_eq!(transfer.max_retries, 5);
    }

    #[test]
    fn test_missing_destination_argument() {
        assert!(Cli::try_parse_from(["gsync", "only-one"]).is_err());
    }
}
