use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;

use crate::error::{Result, SchedulerError};
use crate::logging::{LogLevel, json_kv};

use super::audit::{AuditEventBuilder, AuditStage};
use super::backend::RenderBackend;
use super::clock::{FrameClock, SystemClock};
use super::{DRAW_3D_EVENT, Scheduler, ShutdownReport, UPDATE_EVENT};

const TARGET: &str = "overlay::frame";

/// Overlay visibility, written by the focus poller and read once per iteration.
#[derive(Debug, Clone)]
pub struct VisibilitySignal {
    visible: Arc<AtomicBool>,
}

impl VisibilitySignal {
    pub fn new(visible: bool) -> Self {
        Self {
            visible: Arc::new(AtomicBool::new(visible)),
        }
    }

    /// Returns the previous value.
    pub fn set_visible(&self, visible: bool) -> bool {
        self.visible.swap(visible, Ordering::SeqCst)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Asks the frame loop to stop after the current iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub index: u64,
    pub visible: bool,
    /// Events and completions delivered during the iteration.
    pub delivered: usize,
    pub resume_passes: usize,
    pub pending_tasks: usize,
    pub presented: bool,
    pub slept: Duration,
}

/// Drives a [`Scheduler`] in lock-step with a [`RenderBackend`].
///
/// Visible iterations queue `update`, drain, resume within the frame budget,
/// then present and sleep out the rest of `frame_target`. The resume budget
/// ends at `frame_begin + frame_target - last_present_cost`. Hidden iterations
/// skip drawing entirely.
pub struct FrameLoop<B, C = SystemClock> {
    scheduler: Scheduler,
    backend: B,
    clock: C,
    visibility: VisibilitySignal,
    shutdown: ShutdownHandle,
    last_present_cost: Duration,
    frames: u64,
    start: Option<Duration>,
    last_metrics_emit: Option<Duration>,
    finished: Option<ShutdownReport>,
}

impl<B> FrameLoop<B, SystemClock>
where
    B: RenderBackend,
{
    pub fn new(scheduler: Scheduler, backend: B) -> Self {
        Self::with_clock(scheduler, backend, SystemClock::new())
    }
}

impl<B, C> FrameLoop<B, C>
where
    B: RenderBackend,
    C: FrameClock,
{
    /// The visibility signal and shutdown handle are also published in the
    /// scheduler's shared state so scripts can reach them.
    pub fn with_clock(scheduler: Scheduler, backend: B, clock: C) -> Self {
        let shared = scheduler.shared();
        let visibility = shared
            .get_or_insert_with(VisibilitySignal::default)
            .map(|signal| (*signal).clone())
            .unwrap_or_default();
        let shutdown = shared
            .get_or_insert_with(ShutdownHandle::new)
            .map(|handle| (*handle).clone())
            .unwrap_or_default();
        Self {
            scheduler,
            backend,
            clock,
            visibility,
            shutdown,
            last_present_cost: Duration::ZERO,
            frames: 0,
            start: None,
            last_metrics_emit: None,
            finished: None,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn visibility(&self) -> VisibilitySignal {
        self.visibility.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn last_present_cost(&self) -> Duration {
        self.last_present_cost
    }

    /// Deliver `startup`. Called implicitly by the first frame.
    pub fn startup(&mut self) {
        if self.scheduler.is_started() {
            return;
        }
        let now = self.clock.now();
        self.start = Some(now);
        self.last_metrics_emit = Some(now);
        self.scheduler.startup();
        self.log(
            LogLevel::Info,
            "frame_loop_started",
            [
                json_kv("frame_target_ms", duration_ms(self.scheduler.config().frame_target)),
                json_kv("visible", self.visibility.is_visible()),
            ],
        );
    }

    /// Run iterations until shutdown is requested, then shut the scheduler down.
    ///
    /// A backend error stops the loop; the scheduler is still shut down before
    /// the error is returned.
    pub fn run(&mut self) -> Result<ShutdownReport> {
        self.startup();
        while !self.shutdown.is_requested() {
            if let Err(err) = self.run_frame() {
                self.log(
                    LogLevel::Error,
                    "frame_failed",
                    [json_kv("error", err.to_string())],
                );
                self.finish();
                return Err(err);
            }
        }
        Ok(self.finish())
    }

    /// Run up to `count` iterations, stopping early if shutdown is requested.
    pub fn run_frames(&mut self, count: usize) -> Result<Vec<FrameReport>> {
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            if self.shutdown.is_requested() {
                break;
            }
            reports.push(self.run_frame()?);
        }
        Ok(reports)
    }

    pub fn run_frame(&mut self) -> Result<FrameReport> {
        if self.scheduler.is_shut_down() {
            return Err(SchedulerError::Config(
                "frame loop used after shutdown".to_string(),
            ));
        }
        self.startup();
        let begin = self.clock.now();
        self.frames += 1;

        let report = if self.visibility.is_visible() {
            self.visible_frame(begin)?
        } else {
            self.hidden_frame()
        };

        self.scheduler
            .hub()
            .record(|metrics| metrics.record_frame(report.visible));
        self.maybe_emit_metrics();
        Ok(report)
    }

    /// Shut the scheduler down. Later calls return the first report.
    pub fn finish(&mut self) -> ShutdownReport {
        if let Some(report) = self.finished {
            return report;
        }
        let report = self.scheduler.shutdown();
        let uptime = match self.start {
            Some(start) => self.clock.now().saturating_sub(start),
            None => Duration::ZERO,
        };
        self.log(
            LogLevel::Info,
            "frame_loop_stopped",
            [
                json_kv("frames", self.frames),
                json_kv("uptime_ms", duration_ms(uptime)),
            ],
        );
        self.finished = Some(report);
        report
    }

    fn visible_frame(&mut self, begin: Duration) -> Result<FrameReport> {
        let config = self.scheduler.config();
        let frame_target = config.frame_target;
        let max_passes = config.max_resume_passes;

        self.scheduler.hub().queue_lifecycle(UPDATE_EVENT);
        let drained = self.scheduler.drain_and_dispatch();

        let deadline = (begin + frame_target).saturating_sub(self.last_present_cost);
        let mut pending = self.scheduler.resume_all();
        let mut passes = 1;
        while pending
            && self.clock.now() < deadline
            && max_passes.is_none_or(|max| passes < max)
        {
            pending = self.scheduler.resume_all();
            passes += 1;
        }

        let present_begin = self.clock.now();
        let presented = self.present()?;
        let present_end = self.clock.now();
        self.last_present_cost = present_end.saturating_sub(present_begin);

        if presented {
            self.scheduler.hub().audit(
                AuditEventBuilder::new(AuditStage::FramePresented)
                    .detail("frame", json!(self.frames))
                    .detail("present_ms", json!(duration_ms(self.last_present_cost)))
                    .finish(),
            );
        }

        let elapsed = present_end.saturating_sub(begin);
        let slept = frame_target.saturating_sub(elapsed);
        if !slept.is_zero() {
            self.clock.sleep(slept);
        }

        Ok(FrameReport {
            index: self.frames,
            visible: true,
            delivered: drained.events + drained.completions,
            resume_passes: passes,
            pending_tasks: self.scheduler.pending_tasks(),
            presented,
            slept,
        })
    }

    fn present(&mut self) -> Result<bool> {
        if !self.backend.begin_frame()? {
            return Ok(false);
        }
        if self.backend.scene_active() {
            self.backend.begin_scene()?;
            self.scheduler.run_event(DRAW_3D_EVENT, None)?;
            self.backend.end_scene()?;
        }
        self.backend.draw_ui()?;
        self.backend.present()?;
        Ok(true)
    }

    fn hidden_frame(&mut self) -> FrameReport {
        let first = self.scheduler.drain_and_dispatch();
        self.scheduler.resume_all();
        self.scheduler.hub().queue_lifecycle(UPDATE_EVENT);
        let second = self.scheduler.drain_and_dispatch();

        let pending_tasks = self.scheduler.pending_tasks();
        let slept = if pending_tasks == 0 {
            let sleep = self.scheduler.config().hidden_sleep;
            self.clock.sleep(sleep);
            sleep
        } else {
            Duration::ZERO
        };

        FrameReport {
            index: self.frames,
            visible: false,
            delivered: first.events + first.completions + second.events + second.completions,
            resume_passes: 1,
            pending_tasks,
            presented: false,
            slept,
        }
    }

    fn maybe_emit_metrics(&mut self) {
        let config = self.scheduler.config();
        if config.metrics.is_none() || config.metrics_interval.is_zero() {
            return;
        }

        let now = self.clock.now();
        match self.last_metrics_emit {
            Some(last) if now.saturating_sub(last) < config.metrics_interval => return,
            _ => self.last_metrics_emit = Some(now),
        }

        let uptime = self.start.map(|start| now.saturating_sub(start)).unwrap_or_default();
        if let (Some(logger), Some(metrics)) = (config.logger.as_ref(), config.metrics.as_ref()) {
            if let Ok(guard) = metrics.lock() {
                let snapshot_event = guard.snapshot(uptime).to_log_event(&config.metrics_target);
                let _ = logger.log_event(snapshot_event);
            }
        }
    }

    fn log<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        self.scheduler.hub().log(level, TARGET, message, fields);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
