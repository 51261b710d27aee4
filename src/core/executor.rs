use crate::config::{SyncConfig, TransferConfig};
use crate::core::differ::{Action, ActionKind, ActionPlan};
use crate::core::entry::RelPath;
use crate::core::report::Report;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::storage::Storage;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 目录创建完成的通知，`true` 表示创建成功
type DirReady = Shared<BoxFuture<'static, bool>>;

/// 动作计划执行器
///
/// 动作按计划顺序获取并发许可后启动；每个动作先等待最近的 `CreateDir` 祖先完成。
/// 单个动作失败只记录在报告里，不影响其余动作。
pub struct Executor {
    config: TransferConfig,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn execute(
        &self,
        plan: &ActionPlan,
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
        config: &SyncConfig,
    ) -> Report {
        let start = Instant::now();

        if config.dry_run {
            info!("预演模式，不修改任何文件");
            let mut report = Report::from_plan(plan);
            report.elapsed = start.elapsed();
            return report;
        }

        let mut report = Report::new(false);
        let mut pending = Vec::new();
        for action in plan.actions() {
            if action.kind.is_transfer() || action.kind == ActionKind::CreateDir {
                pending.push(action);
            } else {
                report.record_passive(action);
            }
        }
        info!("开始执行: {} 个动作", pending.len());

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let mut dirs: HashMap<RelPath, DirReady> = HashMap::new();
        let mut handles: Vec<(&Action, JoinHandle<Result<u64, ProviderError>>)> =
            Vec::with_capacity(pending.len());

        for (index, &action) in pending.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let not_started = pending.len() - index;
                warn!("执行被取消，{} 个动作未启动", not_started);
                report.mark_cancelled(not_started);
                break;
            };

            let parent = action
                .path
                .ancestors()
                .find_map(|ancestor| dirs.get(&ancestor).cloned());

            let task = ActionTask {
                action: action.clone(),
                source: source.clone(),
                dest: dest.clone(),
                config: self.config.clone(),
                cancel: self.cancel.clone(),
            };

            let handle = if action.kind == ActionKind::CreateDir {
                let (tx, rx) = oneshot::channel::<bool>();
                let ready: DirReady = rx.map(|created| created.unwrap_or(false)).boxed().shared();
                dirs.insert(action.path.clone(), ready);

                tokio::spawn(async move {
                    let result = task.run(parent).await;
                    let _ = tx.send(result.is_ok());
                    drop(permit);
                    result
                })
            } else {
                tokio::spawn(async move {
                    let result = task.run(parent).await;
                    drop(permit);
                    result
                })
            };

            handles.push((action, handle));
        }

        // 汇总结果（唯一写入报告的地方）
        for (action, handle) in handles {
            match handle.await {
                Ok(Ok(bytes)) => report.record_success(action, bytes),
                Ok(Err(e)) => report.record_failure(action, &e),
                Err(e) => report.record_failure(
                    action,
                    &ProviderError::new(
                        ProviderErrorKind::Other,
                        action.path.as_storage_path(),
                        format!("task failed: {}", e),
                    ),
                ),
            }
        }

        report.elapsed = start.elapsed();
        info!(
            "执行完成: {} 字节, {} 个失败, 耗时 {:.2}s",
            report.bytes_transferred,
            report.failures.len(),
            report.elapsed.as_secs_f64()
        );
        report
    }
}

/// 在独立任务中执行的单个动作
struct ActionTask {
    action: Action,
    source: Arc<dyn Storage>,
    dest: Arc<dyn Storage>,
    config: TransferConfig,
    cancel: CancellationToken,
}

impl ActionTask {
    async fn run(self, parent: Option<DirReady>) -> Result<u64, ProviderError> {
        let path = self.action.path.as_storage_path();

        if let Some(parent) = parent {
            if !parent.await {
                error!("{} {} 失败: 父目录未创建", self.action.kind, self.action.path);
                return Err(ProviderError::new(
                    ProviderErrorKind::Other,
                    path,
                    "parent directory was not created",
                ));
            }
        }

        let result = self.run_with_retry().await;
        match &result {
            Ok(bytes) => info!("{} {} ({} 字节)", self.action.kind, self.action.path, bytes),
            Err(e) => error!("{} {} 失败: {}", self.action.kind, self.action.path, e),
        }
        result
    }

    /// 只重试限流和临时错误，指数退避，等待期间可被取消
    async fn run_with_retry(&self) -> Result<u64, ProviderError> {
        let mut attempt = 0u32;
        loop {
            match self.perform().await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay(attempt);
                    attempt += 1;
                    warn!(
                        "操作失败，{}ms 后重试 ({}/{}): {}",
                        delay.as_millis(),
                        attempt,
                        self.config.max_retries,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn perform(&self) -> Result<u64, ProviderError> {
        let path = &self.action.path;
        let parent = path.parent().unwrap_or_default().as_storage_path();
        let name = path.name().unwrap_or_default();

        match self.action.kind {
            ActionKind::CreateDir => {
                debug!("创建目录: {}", path);
                self.dest.mkdir(&parent, name).await?;
                Ok(0)
            }
            ActionKind::Upload | ActionKind::Download => {
                let modified = self.action.source.as_ref().map(|e| e.modified);
                debug!("复制: {} -> {}", self.source.name(), self.dest.name());

                let counter = Arc::new(AtomicU64::new(0));
                let counted = counter.clone();
                let stream = self
                    .source
                    .read(&path.as_storage_path())
                    .await?
                    .inspect_ok(move |chunk| {
                        counted.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    })
                    .boxed();

                self.dest.write(&parent, name, stream, modified).await?;
                Ok(counter.load(Ordering::Relaxed))
            }
            kind => Err(ProviderError::new(
                ProviderErrorKind::Other,
                path.as_storage_path(),
                format!("{} is not executable", kind),
            )),
        }
    }
}
