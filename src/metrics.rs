//! 翻译指标收集模块
//!
//! 记录翻译次数、各阶段失败次数与耗时，并支持导出 Prometheus 文本格式

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline stages that can fail, in pipeline order
pub const STAGES: [&str; 6] = ["lex", "parse", "scope", "lower", "bind", "generate"];

/// 全局翻译指标
#[derive(Debug)]
pub struct Metrics {
    /// 翻译统计
    translation_stats: TranslationStats,
    /// 各阶段失败次数，与 `STAGES` 一一对应
    stage_failures: [AtomicU64; 6],
    /// 其他失败 (配置、IO)
    other_failures: AtomicU64,
    /// 启动时间
    start_time: Instant,
}

#[derive(Debug, Default)]
struct TranslationStats {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    /// 总耗时（微秒）
    total_duration_us: AtomicU64,
    /// 输出 SQL 总字节数
    output_bytes: AtomicU64,
}

/// 可导出的指标快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_translations: u64,
    pub success_translations: u64,
    pub failed_translations: u64,
    pub avg_duration_us: f64,
    pub output_bytes: u64,
    /// 阶段名 → 失败次数
    pub stage_failures: Vec<(String, u64)>,
    pub other_failures: u64,
    pub uptime_seconds: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            translation_stats: TranslationStats::default(),
            stage_failures: Default::default(),
            other_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// 记录翻译开始
    pub fn record_start(&self) -> TranslationTimer {
        self.translation_stats.total.fetch_add(1, Ordering::Relaxed);
        TranslationTimer::new()
    }

    /// 记录翻译成功，`output_len` 为生成的 SQL 长度
    pub fn record_success(&self, timer: TranslationTimer, output_len: usize) {
        self.translation_stats.success.fetch_add(1, Ordering::Relaxed);
        self.translation_stats
            .output_bytes
            .fetch_add(output_len as u64, Ordering::Relaxed);
        self.record_duration(timer.elapsed());
    }

    /// 记录翻译失败
    pub fn record_failure(&self, timer: TranslationTimer, stage: &str) {
        self.translation_stats.failed.fetch_add(1, Ordering::Relaxed);
        match STAGES.iter().position(|s| *s == stage) {
            Some(index) => {
                self.stage_failures[index].fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.other_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.record_duration(timer.elapsed());
    }

    fn record_duration(&self, duration: Duration) {
        self.translation_stats
            .total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.translation_stats.total.load(Ordering::Relaxed);
        let success = self.translation_stats.success.load(Ordering::Relaxed);
        let failed = self.translation_stats.failed.load(Ordering::Relaxed);
        let total_duration_us = self.translation_stats.total_duration_us.load(Ordering::Relaxed);
        let finished = success + failed;

        let avg_duration_us = if finished > 0 {
            (total_duration_us as f64) / (finished as f64)
        } else {
            0.0
        };

        let stage_failures = STAGES
            .iter()
            .zip(self.stage_failures.iter())
            .map(|(stage, count)| (stage.to_string(), count.load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            total_translations: total,
            success_translations: success,
            failed_translations: failed,
            avg_duration_us,
            output_bytes: self.translation_stats.output_bytes.load(Ordering::Relaxed),
            stage_failures,
            other_failures: self.other_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// 导出为 Prometheus 格式
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut content = String::new();

        content.push_str("# HELP aqlbridge_translations_total Total number of translations\n");
        content.push_str("# TYPE aqlbridge_translations_total counter\n");
        content.push_str(&format!(
            "aqlbridge_translations_total {}\n",
            snapshot.total_translations
        ));

        content.push_str("# HELP aqlbridge_translations_success_total Successful translations\n");
        content.push_str("# TYPE aqlbridge_translations_success_total counter\n");
        content.push_str(&format!(
            "aqlbridge_translations_success_total {}\n",
            snapshot.success_translations
        ));

        content.push_str(
            "# HELP aqlbridge_translation_failures_total Failed translations by stage\n",
        );
        content.push_str("# TYPE aqlbridge_translation_failures_total counter\n");
        for (stage, count) in &snapshot.stage_failures {
            content.push_str(&format!(
                "aqlbridge_translation_failures_total{{stage=\"{}\"}} {}\n",
                stage, count
            ));
        }
        content.push_str(&format!(
            "aqlbridge_translation_failures_total{{stage=\"other\"}} {}\n",
            snapshot.other_failures
        ));

        content.push_str(concat!(
            "# HELP aqlbridge_translation_duration_avg_us ",
            "Average translation time in microseconds\n"
        ));
        content.push_str("# TYPE aqlbridge_translation_duration_avg_us gauge\n");
        content.push_str(&format!(
            "aqlbridge_translation_duration_avg_us {:.2}\n",
            snapshot.avg_duration_us
        ));

        content.push_str("# HELP aqlbridge_output_bytes_total Bytes of SQL generated\n");
        content.push_str("# TYPE aqlbridge_output_bytes_total counter\n");
        content.push_str(&format!("aqlbridge_output_bytes_total {}\n", snapshot.output_bytes));

        content.push_str("# HELP aqlbridge_uptime_seconds Uptime in seconds\n");
        content.push_str("# TYPE aqlbridge_uptime_seconds counter\n");
        content.push_str(&format!("aqlbridge_uptime_seconds {}\n", snapshot.uptime_seconds));

        content
    }

    /// 重置所有指标
    pub fn reset(&self) {
        self.translation_stats.total.store(0, Ordering::Relaxed);
        self.translation_stats.success.store(0, Ordering::Relaxed);
        self.translation_stats.failed.store(0, Ordering::Relaxed);
        self.translation_stats.total_duration_us.store(0, Ordering::Relaxed);
        self.translation_stats.output_bytes.store(0, Ordering::Relaxed);
        for counter in &self.stage_failures {
            counter.store(0, Ordering::Relaxed);
        }
        self.other_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 翻译计时器
pub struct TranslationTimer {
    start: Instant,
}

impl TranslationTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// 全局指标实例
static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::new()));

/// 获取全局指标实例
pub fn global_metrics() -> Arc<Metrics> {
    METRICS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();

        let timer = metrics.record_start();
        metrics.record_success(timer, 42);
        let timer = metrics.record_start();
        metrics.record_failure(timer, "parse");
        let timer = metrics.record_start();
        metrics.record_failure(timer, "io");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_translations, 3);
        assert_eq!(snapshot.success_translations, 1);
        assert_eq!(snapshot.failed_translations, 2);
        assert_eq!(snapshot.output_bytes, 42);
        assert_eq!(snapshot.other_failures, 1);
        assert!(snapshot
            .stage_failures
            .contains(&("parse".to_string(), 1)));
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        let timer = metrics.record_start();
        metrics.record_failure(timer, "bind");

        let prom = metrics.to_prometheus();
        assert!(prom.contains("aqlbridge_translations_total 1"));
        assert!(prom.contains("aqlbridge_translation_failures_total{stage=\"bind\"} 1"));
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        let timer = metrics.record_start();
        metrics.record_failure(timer, "lex");
        metrics.reset();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_translations, 0);
        assert!(snapshot.stage_failures.iter().all(|(_, n)| *n == 0));
    }
}
