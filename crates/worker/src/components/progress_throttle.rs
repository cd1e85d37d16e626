use std::time::Duration;

use tokio::time::Instant;

/// 进度写入节流
///
/// 引擎的进度上报可能非常频繁；只有当进度前进了至少 `min_delta`，
/// 或距上次写入已超过 `min_interval` 时才写入注册表。回退的进度一律丢弃。
#[derive(Debug)]
pub struct ProgressThrottle {
    min_delta: u8,
    min_interval: Duration,
    last: Option<(u8, Instant)>,
}

impl ProgressThrottle {
    pub fn new(min_delta: u8, min_interval: Duration) -> Self {
        Self {
            min_delta,
            min_interval,
            last: None,
        }
    }

    pub fn should_emit(&mut self, percent: u8) -> bool {
        let now = Instant::now();
        let emit = match self.last {
            None => true,
            Some((last_percent, _)) if percent < last_percent => false,
            Some((last_percent, last_at)) => {
                let delta = percent - last_percent;
                delta >= self.min_delta
                    || (percent == 100 && delta > 0)
                    || now.duration_since(last_at) >= self.min_interval
            }
        };
        if emit {
            self.last = Some((percent, now));
        }
        emit
    }
}
