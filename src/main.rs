use anyhow::{Context, Result};
use clap::Parser;
use gsync_lib::cli::Cli;
use gsync_lib::logging::{cli_level, init_logging};
use gsync_lib::{ConfigError, Report, SyncEngine, SyncError};
use std::process::ExitCode;
use tracing::{info, warn};

/// 配置错误的退出码
const EXIT_CONFIG: u8 = 2;
/// 有动作失败或运行被取消的退出码
const EXIT_FAILED: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.config_dir(), cli_level(cli.verbose, cli.quiet));

    match run(&cli).await {
        Ok(report) => {
            if let Err(e) = print_report(&report, cli.json) {
                eprintln!("gsync: {:#}", e);
                return ExitCode::from(EXIT_FAILED);
            }
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
        Err(e) => {
            eprintln!("gsync: {:#}", e);
            if is_config_error(&e) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
    }
}

async fn run(cli: &Cli) -> Result<Report> {
    let config = cli.sync_config().context("invalid arguments")?;
    let transfer = cli.transfer_config()?;
    info!("gsync v{} starting", env!("CARGO_PKG_VERSION"));

    let engine = SyncEngine::new(transfer);
    let cancel = engine.cancel_token();

    // Ctrl-C：不再启动新的传输，已开始的传输完成后退出
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，正在停止");
                cancel.cancel();
            }
        }
    });

    if let Some(timeout) = cli.timeout() {
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("运行超过 {}s，正在停止", timeout.as_secs());
            cancel.cancel();
        });
    }

    let report = engine
        .run(&config)
        .await
        .with_context(|| format!("sync {} -> {} failed", config.source, config.destination))?;
    Ok(report)
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for line in &report.rendered {
        println!("{}", line);
    }
    print!("{}", report);
    if report.dry_run {
        println!("Dry run only. Nothing changed.");
    }
    Ok(())
}

fn is_config_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ConfigError>().is_some()
        || matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Config(_)))
}
