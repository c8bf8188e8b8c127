//! 統計情報管理モジュール
//!
//! キャプチャFPS、読み戻しレイテンシ、ドロップ数などの統計を収集・出力します。

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// 統計情報の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    /// 読み戻しレイテンシ（コピー発行→マップ完了）
    Readback,
    /// 配送キュー投入までの時間（マップ完了→submit）
    Delivery,
    /// エンドツーエンド（コピー発行→submit）
    EndToEnd,
}

/// パーセンタイル統計値
#[derive(Debug, Clone)]
pub struct PercentileStats {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub count: usize,
}

/// 統計情報コレクター
#[derive(Debug)]
pub struct StatsCollector {
    /// FPS計測用のフレームタイムスタンプ（最大1秒分保持）
    frame_times: VecDeque<Instant>,
    /// 各処理段階の所要時間（最大1000サンプル保持）
    durations: HashMap<StatKind, VecDeque<Duration>>,
    /// 発行済みコピー数
    issued: u64,
    /// 配送済みフレーム数
    delivered: u64,
    /// ドロップ数（タイムアウト・リング満杯・ターゲット変更）
    dropped: u64,
    /// 最後の統計出力時刻
    last_report: Instant,
    /// 統計出力間隔
    report_interval: Duration,
}

impl StatsCollector {
    /// FPS計算の時間範囲（1秒間のフレーム数を計測）
    const FPS_WINDOW_SECS: u64 = 1;
    /// 各StatKindで保持する最大サンプル数
    const MAX_SAMPLES: usize = 1000;
    /// デフォルトの統計出力間隔
    pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

    /// 新しいStatsCollectorを作成
    ///
    /// # Arguments
    /// * `report_interval` - 統計出力間隔（例: 10秒）
    pub fn new(report_interval: Duration) -> Self {
        Self {
            frame_times: VecDeque::new(),
            durations: HashMap::new(),
            issued: 0,
            delivered: 0,
            dropped: 0,
            last_report: Instant::now(),
            report_interval,
        }
    }

    /// コピー発行を記録（FPS計測用）
    pub fn record_issue(&mut self) {
        self.issued += 1;

        let now = Instant::now();
        self.frame_times.push_back(now);

        let window = Duration::from_secs(Self::FPS_WINDOW_SECS);
        while let Some(front) = self.frame_times.front() {
            if now.duration_since(*front) > window {
                self.frame_times.pop_front();
            } else {
                break;
            }
        }
    }

    /// 配送済みフレームを記録
    pub fn record_delivered(&mut self) {
        self.delivered += 1;
    }

    /// ドロップフレームを記録
    pub fn record_dropped(&mut self, count: u64) {
        self.dropped += count;
    }

    /// 処理段階の所要時間を記録
    pub fn record_duration(&mut self, kind: StatKind, duration: Duration) {
        let samples = self.durations.entry(kind).or_default();
        samples.push_back(duration);
        while samples.len() > Self::MAX_SAMPLES {
            samples.pop_front();
        }
    }

    /// 直近1秒のキャプチャFPSを取得
    pub fn current_fps(&self) -> usize {
        self.frame_times.len()
    }

    /// 発行済みコピー数を取得
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// 配送済みフレーム数を取得
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// ドロップ数を取得
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// パーセンタイル統計を計算
    ///
    /// # Returns
    /// サンプルが存在しない場合は None
    pub fn percentiles(&self, kind: StatKind) -> Option<PercentileStats> {
        let samples = self.durations.get(&kind)?;
        if samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort_unstable();

        let pick = |p: f64| {
            let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
            sorted[idx.min(sorted.len() - 1)]
        };

        Some(PercentileStats {
            p50: pick(0.50),
            p95: pick(0.95),
            p99: pick(0.99),
            count: sorted.len(),
        })
    }

    /// 統計出力のタイミングか判定
    pub fn should_report(&self) -> bool {
        self.last_report.elapsed() >= self.report_interval
    }

    /// 統計をログ出力してレポートタイマーをリセット
    pub fn report_and_reset(&mut self) {
        #[cfg(debug_assertions)]
        {
            tracing::info!(
                fps = self.current_fps(),
                issued = self.issued,
                delivered = self.delivered,
                dropped = self.dropped,
                "Capture statistics"
            );

            for kind in [StatKind::Readback, StatKind::Delivery, StatKind::EndToEnd] {
                if let Some(p) = self.percentiles(kind) {
                    tracing::info!(
                        ?kind,
                        p50_us = p.p50.as_micros() as u64,
                        p95_us = p.p95.as_micros() as u64,
                        p99_us = p.p99.as_micros() as u64,
                        samples = p.count,
                        "Latency percentiles"
                    );
                }
            }
        }

        self.last_report = Instant::now();
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REPORT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = StatsCollector::default();
        stats.record_issue();
        stats.record_issue();
        stats.record_delivered();
        stats.record_dropped(1);

        assert_eq!(stats.issued(), 2);
        assert_eq!(stats.delivered(), 1);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(stats.current_fps(), 2);
    }

    #[test]
    fn test_percentiles() {
        let mut stats = StatsCollector::default();
        for ms in 1..=100u64 {
            stats.record_duration(StatKind::Readback, Duration::from_millis(ms));
        }

        let p = stats.percentiles(StatKind::Readback).expect("samples exist");
        assert_eq!(p.count, 100);
        assert_eq!(p.p50, Duration::from_millis(50));
        assert_eq!(p.p95, Duration::from_millis(95));
        assert_eq!(p.p99, Duration::from_millis(99));
    }

    #[test]
    fn test_percentiles_empty() {
        let stats = StatsCollector::default();
        assert!(stats.percentiles(StatKind::EndToEnd).is_none());
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let mut stats = StatsCollector::default();
        for _ in 0..2000 {
            stats.record_duration(StatKind::Delivery, Duration::from_micros(10));
        }
        let p = stats.percentiles(StatKind::Delivery).expect("samples exist");
        assert_eq!(p.count, 1000);
    }

    #[test]
    fn test_should_report_interval() {
        let mut stats = StatsCollector::new(Duration::from_secs(3600));
        assert!(!stats.should_report());
        stats.report_and_reset();
        assert!(!stats.should_report());

        let stats = StatsCollector::new(Duration::ZERO);
        assert!(stats.should_report());
    }
}
