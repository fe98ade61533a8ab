use crate::cmdbuffer::RenderStats;
use crossbeam_channel::Sender;
use dusk_util::profile::{MonitorSample, RateCounter, Stopwatch};
use web_time::Duration;

/// Periodic summary of render-thread activity, published to the application
/// over a channel and polled through the service.
#[derive(Debug, Clone)]
pub struct RenderMonitorEvent {
    /// Frames presented per second over the reporting window.
    pub fps: f32,
    /// Render time of one frame, aggregated over the window.
    pub frame_time: MonitorSample<Duration>,
    /// Draw calls issued during the window.
    pub draw_calls: usize,
    /// Approximate primitives drawn during the window.
    pub primitives: usize,
}

/// Render-thread side of the monitor. Counts per-frame statistics and
/// flushes an event once per reporting interval. Dropped receivers are
/// ignored; monitoring must never stall rendering.
pub(crate) struct RenderMonitor {
    sender: Sender<RenderMonitorEvent>,
    interval: Duration,
    frame_time: Stopwatch,
    fps: RateCounter,
    stats: RenderStats,
}

pub(crate) const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

impl RenderMonitor {
    pub fn new(sender: Sender<RenderMonitorEvent>, interval: Duration) -> Self {
        RenderMonitor {
            sender,
            interval,
            frame_time: Stopwatch::new(0.25),
            fps: RateCounter::new(),
            stats: RenderStats::default(),
        }
    }

    pub fn frame_start(&mut self) {
        self.frame_time.start();
    }

    pub fn frame_end(&mut self, stats: RenderStats) {
        self.frame_time.stop();
        self.fps.count(1);
        self.stats += stats;

        if self.fps.elapsed() >= self.interval {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.fps.update();

        let (Some(fps), Some(frame_time)) = (self.fps.rate(), self.frame_time.sample()) else {
            return;
        };

        let _ = self.sender.try_send(RenderMonitorEvent {
            fps,
            frame_time,
            draw_calls: self.stats.calls,
            primitives: self.stats.primitives,
        });

        self.stats = RenderStats::default();
        self.frame_time.reset_window();
    }
}
