//! gsync - 本地目录与 Google Drive 之间的单向同步
//!
//! 流程：两侧各列举一棵树，比较后生成有序的动作计划，再由执行器并发执行。
//! 目标端独有的文件从不删除。

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::config::{Location, SyncConfig, TransferConfig};
pub use crate::core::{ActionKind, ActionPlan, Report, SyncEngine};
pub use crate::error::{ConfigError, ProviderError, ProviderErrorKind, SyncError};
pub use crate::storage::Storage;
