use web_time::{Duration, Instant};

/// Aggregated min/average/max triple published by monitors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonitorSample<D> {
    pub min: D,
    pub average: D,
    pub max: D,
}

/// Measures the duration of repeated operations and keeps a weighted moving
/// average next to the observed extremes.
pub struct Stopwatch {
    wma_factor: f64,
    started: Instant,
    average_us: Option<f64>,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl Stopwatch {
    /// `wma_factor` weighs history against the newest sample. 1.0 keeps only
    /// the last sample, values near 0.0 smooth aggressively.
    pub fn new(wma_factor: f64) -> Self {
        Stopwatch {
            wma_factor: wma_factor.clamp(0.01, 1.0),
            started: Instant::now(),
            average_us: None,
            min: None,
            max: None,
        }
    }

    #[inline]
    pub fn start(&mut self) {
        self.started = Instant::now();
    }

    pub fn stop(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        let sample = elapsed.as_secs_f64() * 1e6;

        self.min = Some(self.min.map_or(elapsed, |d| d.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |d| d.max(elapsed)));
        self.average_us = Some(match self.average_us {
            Some(avg) => avg + (sample - avg) * self.wma_factor,
            None => sample,
        });

        elapsed
    }

    pub fn sample(&self) -> Option<MonitorSample<Duration>> {
        Some(MonitorSample {
            min: self.min?,
            average: Duration::from_secs_f64(self.average_us? / 1e6),
            max: self.max?,
        })
    }

    /// Collapses the extremes back onto the running average so the next
    /// reporting window starts fresh.
    pub fn reset_window(&mut self) {
        let average = self.average_us.map(|us| Duration::from_secs_f64(us / 1e6));
        self.min = average;
        self.max = average;
    }
}

/// Counts events against wall time, yielding a rate per second.
pub struct RateCounter {
    last_update: Instant,
    count: usize,
    rate: Option<f32>,
}

impl RateCounter {
    pub fn new() -> Self {
        RateCounter {
            last_update: Instant::now(),
            count: 0,
            rate: None,
        }
    }

    #[inline]
    pub fn count(&mut self, n: usize) {
        self.count += n;
    }

    /// Folds the counted events into the rate and restarts the window.
    pub fn update(&mut self) {
        let elapsed = self.last_update.elapsed().as_secs_f32().max(f32::EPSILON);
        self.rate = Some(self.count as f32 / elapsed);
        self.count = 0;
        self.last_update = Instant::now();
    }

    pub fn rate(&self) -> Option<f32> {
        self.rate
    }

    pub fn elapsed(&self) -> Duration {
        self.last_update.elapsed()
    }
}

impl Default for RateCounter {
    fn default() -> Self {
        RateCounter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stopwatch_empty_has_no_sample() {
        let watch = Stopwatch::new(0.5);
        assert!(watch.sample().is_none());
    }

    #[test]
    fn stopwatch_tracks_extremes() {
        let mut watch = Stopwatch::new(1.0);

        watch.start();
        thread::sleep(Duration::from_millis(10));
        watch.stop();

        watch.start();
        thread::sleep(Duration::from_millis(30));
        watch.stop();

        let sample = watch.sample().unwrap();
        assert!(sample.min <= sample.max);
        assert!(sample.max.as_millis() >= 30);
        assert!(sample.min.as_millis() >= 10);
    }

    #[test]
    fn stopwatch_window_reset_keeps_average() {
        let mut watch = Stopwatch::new(0.5);
        watch.start();
        thread::sleep(Duration::from_millis(5));
        watch.stop();

        watch.reset_window();
        let sample = watch.sample().unwrap();
        assert_eq!(sample.min, sample.max);
    }

    #[test]
    fn rate_counter_measures_per_second() {
        let mut counter = RateCounter::new();
        counter.count(10);
        thread::sleep(Duration::from_millis(100));
        counter.update();

        let rate = counter.rate().unwrap();
        assert!(rate > 50.0 && rate < 150.0, "rate was {rate}");
    }
}
