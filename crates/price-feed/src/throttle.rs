//! Throttle advisor
//!
//! Keeps a short rolling history of cycle samples and host readings and turns
//! it into advice: whether to pause, and what polling interval to use.
//! The advice is optional; ignoring it never breaks the loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use sysinfo::System;

use arb_core::ThrottleConfig;

// Levels at which the assessment and interval advice react, below the
// throttle limits in `ThrottleConfig`.
const ELEVATED_ERROR_RATE: f64 = 0.1;
const ELEVATED_CPU_PCT: f64 = 80.0;
const ELEVATED_MEMORY_MB: f64 = 1_000.0;
const ELEVATED_PROCESSING_MS: f64 = 100.0;
const IDLE_CPU_PCT: f64 = 30.0;
const FAST_PROCESSING_MS: f64 = 20.0;

/// Scale an interval, rounded to the millisecond
fn scale(interval: Duration, factor: f64) -> Duration {
    Duration::from_millis((interval.as_millis() as f64 * factor).round() as u64)
}

/// Measurements of one polling cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSample {
    pub processing_time: Duration,
    pub fetch_attempts: u32,
    pub fetch_errors: u32,
    pub opportunities: u32,
}

/// Host resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceReading {
    pub cpu_pct: f64,
    pub memory_mb: f64,
}

/// Source of host resource readings
pub trait ResourceProbe: Send {
    fn read(&mut self) -> ResourceReading;
}

/// Reads CPU and memory usage through sysinfo
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn read(&mut self) -> ResourceReading {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        ResourceReading {
            cpu_pct: self.system.global_cpu_usage() as f64,
            memory_mb: self.system.used_memory() as f64 / (1024.0 * 1024.0),
        }
    }
}

/// Probe returning a fixed reading
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub ResourceReading);

impl ResourceProbe for FixedProbe {
    fn read(&mut self) -> ResourceReading {
        self.0
    }
}

/// Overall performance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Assessment {
    Initializing,
    Optimal,
    HighErrorRate,
    HighCpu,
    HighMemory,
    SlowProcessing,
}

/// Aggregated view over the rolling window
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_pct: f64,
    pub memory_mb: f64,
    pub avg_processing_ms: f64,
    pub error_rate: f64,
    pub opportunities: u64,
    pub samples: usize,
}

pub struct ThrottleAdvisor {
    config: ThrottleConfig,
    base_interval: Duration,
    history: VecDeque<CycleSample>,
    probe: Box<dyn ResourceProbe>,
    latest: Option<PerformanceSnapshot>,
    total_opportunities: u64,
}

impl ThrottleAdvisor {
    pub fn new(config: ThrottleConfig, base_interval: Duration) -> Self {
        Self::with_probe(config, base_interval, Box::new(SystemProbe::new()))
    }

    pub fn with_probe(
        config: ThrottleConfig,
        base_interval: Duration,
        probe: Box<dyn ResourceProbe>,
    ) -> Self {
        let history_len = config.history_len.max(1);
        Self {
            config,
            base_interval,
            history: VecDeque::with_capacity(history_len),
            probe,
            latest: None,
            total_opportunities: 0,
        }
    }

    fn history_len(&self) -> usize {
        self.config.history_len.max(1)
    }

    /// Add a cycle sample and refresh the snapshot
    pub fn record_cycle(&mut self, sample: CycleSample) {
        if self.history.len() == self.history_len() {
            self.history.pop_front();
        }
        self.total_opportunities += u64::from(sample.opportunities);
        self.history.push_back(sample);
        self.refresh();
    }

    /// Attribute opportunities to the most recent cycle
    pub fn record_opportunities(&mut self, count: u32) {
        self.total_opportunities += u64::from(count);
        if let Some(last) = self.history.back_mut() {
            last.opportunities += count;
        }
        if let Some(snapshot) = self.latest.as_mut() {
            snapshot.opportunities = self.total_opportunities;
        }
    }

    fn refresh(&mut self) {
        let reading = self.probe.read();
        let samples = self.history.len();

        let avg_processing_ms = if samples == 0 {
            0.0
        } else {
            self.history
                .iter()
                .map(|s| s.processing_time.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / samples as f64
        };

        let attempts: u32 = self.history.iter().map(|s| s.fetch_attempts).sum();
        let errors: u32 = self.history.iter().map(|s| s.fetch_errors).sum();
        let error_rate = if attempts == 0 {
            0.0
        } else {
            f64::from(errors) / f64::from(attempts)
        };

        self.latest = Some(PerformanceSnapshot {
            timestamp: Utc::now(),
            cpu_pct: reading.cpu_pct,
            memory_mb: reading.memory_mb,
            avg_processing_ms,
            error_rate,
            opportunities: self.total_opportunities,
            samples,
        });
    }

    pub fn snapshot(&self) -> Option<&PerformanceSnapshot> {
        self.latest.as_ref()
    }

    pub fn should_throttle(&self) -> bool {
        let Some(latest) = &self.latest else {
            return false;
        };

        latest.cpu_pct > self.config.cpu_high_pct
            || latest.memory_mb > self.config.memory_high_mb
            || latest.error_rate > self.config.error_rate_high
            || latest.avg_processing_ms > self.config.processing_high_ms
    }

    /// Polling interval suggested by recent load
    pub fn recommended_interval(&self) -> Duration {
        let base = self.base_interval;
        let Some(latest) = &self.latest else {
            return base;
        };

        if latest.cpu_pct > ELEVATED_CPU_PCT {
            scale(base, 1.5)
        } else if latest.avg_processing_ms > ELEVATED_PROCESSING_MS {
            scale(base, 1.2)
        } else if latest.cpu_pct < IDLE_CPU_PCT
            && latest.avg_processing_ms < FAST_PROCESSING_MS
            && latest.error_rate == 0.0
        {
            scale(base, 0.8).max(Duration::from_millis(self.config.min_interval_ms))
        } else {
            base
        }
    }

    pub fn assessment(&self) -> Assessment {
        let Some(latest) = &self.latest else {
            return Assessment::Initializing;
        };

        if latest.error_rate > ELEVATED_ERROR_RATE {
            Assessment::HighErrorRate
        } else if latest.cpu_pct > ELEVATED_CPU_PCT {
            Assessment::HighCpu
        } else if latest.memory_mb > ELEVATED_MEMORY_MB {
            Assessment::HighMemory
        } else if latest.avg_processing_ms > ELEVATED_PROCESSING_MS {
            Assessment::SlowProcessing
        } else {
            Assessment::Optimal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisor(cpu_pct: f64, memory_mb: f64) -> ThrottleAdvisor {
        ThrottleAdvisor::with_probe(
            ThrottleConfig::default(),
            Duration::from_secs(1),
            Box::new(FixedProbe(ResourceReading { cpu_pct, memory_mb })),
        )
    }

    fn sample(ms: u64, attempts: u32, errors: u32) -> CycleSample {
        CycleSample {
            processing_time: Duration::from_millis(ms),
            fetch_attempts: attempts,
            fetch_errors: errors,
            opportunities: 0,
        }
    }

    #[test]
    fn test_no_history_means_no_advice() {
        let advisor = advisor(99.0, 5_000.0);
        assert!(!advisor.should_throttle());
        assert_eq!(advisor.recommended_interval(), Duration::from_secs(1));
        assert_eq!(advisor.assessment(), Assessment::Initializing);
        assert!(advisor.snapshot().is_none());
    }

    #[test]
    fn test_throttle_on_high_cpu_or_memory() {
        let mut busy = advisor(95.0, 500.0);
        busy.record_cycle(sample(10, 2, 0));
        assert!(busy.should_throttle());
        assert_eq!(busy.assessment(), Assessment::HighCpu);
        assert_eq!(busy.recommended_interval(), Duration::from_millis(1500));

        let mut hungry = advisor(50.0, 2_500.0);
        hungry.record_cycle(sample(10, 2, 0));
        assert!(hungry.should_throttle());
        assert_eq!(hungry.assessment(), Assessment::HighMemory);
    }

    #[test]
    fn test_error_rate_over_window() {
        let mut advisor = advisor(50.0, 500.0);
        advisor.record_cycle(sample(10, 2, 1));
        advisor.record_cycle(sample(10, 2, 0));
        // 1 error in 4 attempts
        assert_eq!(advisor.snapshot().unwrap().error_rate, 0.25);
        assert!(advisor.should_throttle());
        assert_eq!(advisor.assessment(), Assessment::HighErrorRate);
    }

    #[test]
    fn test_slow_processing() {
        let mut advisor = advisor(50.0, 500.0);
        advisor.record_cycle(sample(150, 2, 0));
        assert!(!advisor.should_throttle());
        assert_eq!(advisor.assessment(), Assessment::SlowProcessing);
        assert_eq!(advisor.recommended_interval(), Duration::from_millis(1200));

        advisor.record_cycle(sample(350, 2, 0));
        assert!(advisor.should_throttle());
    }

    #[test]
    fn test_idle_host_speeds_up_with_floor() {
        let mut advisor = advisor(10.0, 100.0);
        advisor.record_cycle(sample(5, 2, 0));
        assert_eq!(advisor.assessment(), Assessment::Optimal);
        assert_eq!(advisor.recommended_interval(), Duration::from_millis(800));

        let mut fast = ThrottleAdvisor::with_probe(
            ThrottleConfig::default(),
            Duration::from_millis(100),
            Box::new(FixedProbe(ResourceReading { cpu_pct: 10.0, memory_mb: 100.0 })),
        );
        fast.record_cycle(sample(5, 2, 0));
        assert_eq!(fast.recommended_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut advisor = advisor(50.0, 500.0);
        advisor.record_cycle(sample(500, 1, 1));
        for _ in 0..10 {
            advisor.record_cycle(sample(10, 1, 0));
        }

        let snapshot = advisor.snapshot().unwrap();
        assert_eq!(snapshot.samples, 10);
        assert_eq!(snapshot.error_rate, 0.0);
        assert!(!advisor.should_throttle());
    }

    #[test]
    fn test_record_opportunities() {
        let mut advisor = advisor(50.0, 500.0);
        advisor.record_opportunities(3);
        advisor.record_cycle(sample(10, 1, 0));
        advisor.record_opportunities(2);
        assert_eq!(advisor.snapshot().unwrap().opportunities, 5);
    }
}
