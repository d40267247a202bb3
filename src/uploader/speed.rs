//! 上传测速器
//!
//! 由进度通知驱动的节流测速：只有距离上次采样超过节流间隔时才计算并返回速度，
//! 间隔内的调用不产生输出也不改变状态。每个在途传输独占一个实例。

use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_SPEED_INTERVAL_MS: u64 = 500;

/// 节流测速器
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    /// 上次采样时的累计字节数
    last_loaded: u64,
    /// 上次采样时间
    last_sample: Instant,
    /// 节流间隔
    interval: Duration,
}

impl SpeedSampler {
    /// 以当前时间为起点创建测速器
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    /// 使用默认间隔（500ms）
    pub fn default_interval() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SPEED_INTERVAL_MS))
    }

    /// 以指定时间为起点创建测速器
    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            last_loaded: 0,
            last_sample: start,
            interval,
        }
    }

    /// 节流间隔
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 传入当前累计字节数，到达间隔时返回速度 (bytes/s)
    pub fn sample(&mut self, loaded: u64) -> Option<f64> {
        self.sample_at(loaded, Instant::now())
    }

    /// 同 [`sample`](Self::sample)，时间由调用方给出
    pub fn sample_at(&mut self, loaded: u64, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.interval {
            return None;
        }

        let elapsed_secs = elapsed.as_secs_f64();
        let speed = if elapsed_secs > 0.0 {
            loaded.saturating_sub(self.last_loaded) as f64 / elapsed_secs
        } else {
            0.0
        };

        self.last_loaded = loaded;
        self.last_sample = now;
        Some(speed)
    }
}

impl Default for SpeedSampler {
    fn default() -> Self {
        Self::default_interval()
    }
}
