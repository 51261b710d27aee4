use crate::config::{SyncConfig, TransferConfig};
use crate::core::differ::{diff_with_resolution, ActionPlan};
use crate::core::entry::Tree;
use crate::core::executor::Executor;
use crate::core::lister::{ExcludeSet, RootState, TreeLister};
use crate::core::report::Report;
use crate::error::{ConfigError, SyncError};
use crate::storage::{create_storage, Storage};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 列举与比较的结果
pub struct PreparedRun {
    pub plan: ActionPlan,
    pub source_tree: Tree,
    pub dest_tree: Tree,
    /// 目标根目录尚不存在
    pub dest_missing: bool,
}

/// 同步引擎：列举两侧、生成计划、执行
pub struct SyncEngine {
    transfer: TransferConfig,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(transfer: TransferConfig) -> Self {
        Self {
            transfer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 取消当前运行：不再启动新动作，已在进行的传输会完成
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 根据配置创建两侧存储并执行同步
    pub async fn run(&self, config: &SyncConfig) -> Result<Report, SyncError> {
        // 配置错误在任何列举之前暴露
        ExcludeSet::new(&config.exclude)?;
        let source = create_storage(&config.source).await?;
        let dest = create_storage(&config.destination).await?;
        self.run_with(config, source, dest).await
    }

    /// 使用给定的存储执行同步
    pub async fn run_with(
        &self,
        config: &SyncConfig,
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
    ) -> Result<Report, SyncError> {
        let start = Instant::now();

        let prepared = match self.prepare(config, source.clone(), dest.clone()).await {
            Ok(prepared) => prepared,
            Err(SyncError::Provider(e)) if self.cancel.is_cancelled() => {
                warn!("列举阶段被取消: {}", e);
                let mut report = Report::new(config.dry_run);
                report.mark_cancelled(0);
                report.elapsed = start.elapsed();
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        if prepared.dest_missing && !config.dry_run {
            info!("创建目标根目录: {}", dest.name());
            dest.ensure_root().await?;
        }

        let executor = Executor::new(self.transfer.clone()).with_cancel(self.cancel.clone());
        let mut report = executor
            .execute(&prepared.plan, source, dest, config)
            .await;
        report.elapsed = start.elapsed();
        Ok(report)
    }

    /// 校验根目录、列举两侧并生成动作计划，不做任何修改
    pub async fn prepare(
        &self,
        config: &SyncConfig,
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
    ) -> Result<PreparedRun, SyncError> {
        let excludes = ExcludeSet::new(&config.exclude)?;

        // 根目录只在这里检查一次，列举时不再重复
        match TreeLister::probe_root(source.as_ref()).await? {
            RootState::Directory => {}
            RootState::Missing => {
                return Err(ConfigError::MissingSource(config.source.to_string()).into())
            }
            RootState::NotADirectory => {
                return Err(ConfigError::NotADirectory(config.source.to_string()).into())
            }
        }
        let dest_missing = match TreeLister::probe_root(dest.as_ref()).await? {
            RootState::Directory => false,
            RootState::Missing => true,
            RootState::NotADirectory => {
                return Err(ConfigError::NotADirectory(config.destination.to_string()).into())
            }
        };

        info!(
            "同步: {} -> {} (recursive={}, checksum={}, dry_run={})",
            config.source, config.destination, config.recursive, config.checksum, config.dry_run
        );

        let lister = TreeLister::new(self.transfer.max_concurrent_listings)
            .with_excludes(excludes)
            .with_cancel(self.cancel.clone());

        let (mut source_tree, mut dest_tree) = if dest_missing {
            info!("目标根目录不存在，按空目录处理: {}", config.destination);
            let source_tree = lister.walk(source.clone(), config.recursive).await?;
            (source_tree, Tree::new(dest.capabilities()))
        } else {
            tokio::try_join!(
                lister.walk(source.clone(), config.recursive),
                lister.walk(dest.clone(), config.recursive),
            )?
        };

        if config.checksum {
            lister
                .fill_checksums(&mut source_tree, &mut dest_tree, source, dest)
                .await;
        }

        let plan = diff_with_resolution(
            &source_tree,
            &dest_tree,
            config,
            self.transfer.min_time_resolution(),
        );
        let summary = plan.summary();
        info!(
            "计划: {} 个目录待创建, {} 个文件待传输 ({} 字节), {} 个跳过, {} 个超限, {} 个冲突",
            summary.create_dir_count,
            summary.transfer_count,
            summary.transfer_bytes,
            summary.skip_count,
            summary.oversize_count,
            summary.conflict_count
        );

        Ok(PreparedRun {
            plan,
            source_tree,
            dest_tree,
            dest_missing,
        })
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}
