use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionTiming {
    pub calls: u64,
    pub total: Duration,
}

impl SectionTiming {
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total.div_f64(self.calls as f64)
        }
    }
}

/// Simple scoped profiler recording cumulative time and call count per
/// section.
#[derive(Debug, Default)]
pub struct Profiler {
    pub timings: HashMap<&'static str, SectionTiming>,
}

impl Profiler {
    pub fn new() -> Self {
        Self { timings: HashMap::new() }
    }

    pub fn record(&mut self, name: &'static str, elapsed: Duration) {
        let timing = self.timings.entry(name).or_default();
        timing.calls += 1;
        timing.total += elapsed;
    }

    pub fn finish(&mut self, guard: &ProfilerGuard) {
        self.record(guard.name, guard.start.elapsed());
    }

    pub fn report_sorted(&self) -> Vec<(&'static str, SectionTiming)> {
        let mut v: Vec<_> = self.timings.iter().map(|(n, t)| (*n, *t)).collect();
        v.sort_by(|a, b| b.1.total.cmp(&a.1.total));
        v
    }

    pub fn clear(&mut self) {
        self.timings.clear();
    }

    pub fn log_and_clear(&mut self) {
        for (section, timing) in self.report_sorted() {
            info!(
                section,
                calls = timing.calls,
                total_ms = timing.total.as_secs_f64() * 1e3,
                mean_us = timing.mean().as_secs_f64() * 1e6,
                "profile"
            );
        }
        self.clear();
    }
}

pub struct ProfilerGuard {
    name: &'static str,
    start: Instant,
}

/// Start a profiling section. Returns a guard that will update the global
/// profiler when dropped.
pub fn start(name: &'static str) -> ProfilerGuard {
    ProfilerGuard { name, start: Instant::now() }
}

#[cfg(feature = "profiling")]
impl Drop for ProfilerGuard {
    fn drop(&mut self) {
        crate::PROFILER.lock().finish(self);
    }
}

/// Macro helper to profile a scope only when the `profiling` feature is enabled.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        #[cfg(feature = "profiling")]
        let _guard = $crate::profiler::start($name);
    };
}
