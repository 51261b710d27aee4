use crate::core::entry::Entry;
use crate::storage::Capabilities;
use chrono::TimeDelta;
use std::time::Duration;

/// 比较策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparePolicy {
    /// 大小相同且修改时间差小于容差
    SizeAndTime {
        /// 取两端时间精度中较粗者（且不小于配置的最小容差）
        tolerance: Duration,
        /// 目标端能否保留源文件的修改时间
        dest_preserves_mtime: bool,
    },
    /// 大小相同且校验和相同
    Checksum,
}

impl ComparePolicy {
    /// 根据两端声明的能力选择比较方式
    pub fn from_capabilities(
        use_checksum: bool,
        source: &Capabilities,
        dest: &Capabilities,
        min_resolution: Duration,
    ) -> Self {
        if use_checksum {
            return ComparePolicy::Checksum;
        }

        let tolerance = source
            .mtime_resolution
            .max(dest.mtime_resolution)
            .max(min_resolution);

        ComparePolicy::SizeAndTime {
            tolerance,
            dest_preserves_mtime: dest.preserves_mtime,
        }
    }
}

impl Default for ComparePolicy {
    fn default() -> Self {
        ComparePolicy::SizeAndTime {
            tolerance: Duration::from_secs(1),
            dest_preserves_mtime: true,
        }
    }
}

/// 判断同一相对路径上的两个条目是否相同
///
/// 只对两侧都存在的条目有意义；类型不同的条目永远不相等，由 differ 报告冲突。
pub fn equal(source: &Entry, dest: &Entry, policy: &ComparePolicy) -> bool {
    if source.kind != dest.kind {
        return false;
    }

    // 目录没有内容可比
    if source.is_dir() {
        return true;
    }

    // 大小不同，肯定不同
    if source.size != dest.size {
        tracing::debug!(
            "文件大小不同: {} (src={}, dst={})",
            source.path,
            source.size,
            dest.size
        );
        return false;
    }

    match policy {
        ComparePolicy::Checksum => match (&source.checksum, &dest.checksum) {
            (Some(src_sum), Some(dst_sum)) => src_sum == dst_sum,
            // 取不到校验和时按不同处理，宁可多传
            _ => false,
        },
        ComparePolicy::SizeAndTime {
            tolerance,
            dest_preserves_mtime,
        } => {
            let diff = source.modified.signed_duration_since(dest.modified);
            let tolerance = TimeDelta::from_std(*tolerance).unwrap_or(TimeDelta::MAX);

            if diff.abs() < tolerance {
                return true;
            }

            // 目标端无法保留修改时间时（如云盘记录上传时间），目标不旧于源即视为相同
            if !dest_preserves_mtime && diff < TimeDelta::zero() {
                return true;
            }

            tracing::debug!(
                "文件时间不同: {} (src_time={}, dst_time={}, diff={}ms)",
                source.path,
                source.modified,
                dest.modified,
                diff.num_milliseconds()
            );
            false
        }
    }
}
