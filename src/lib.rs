//! Frame-synchronized script scheduler for overlay hosts.
//!
//! Scripts subscribe to named events. The host queues events from any
//! thread; once per frame the scheduler drains the queue, starts one task
//! per subscriber and resumes suspended tasks until the frame budget runs
//! out. Work finished on background threads comes back through the
//! [`CompletionBridge`] and resumes on the scheduler thread.

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod task;
pub mod width;

pub use bridge::CompletionBridge;
pub use config::{ConfigError, ConfigResult, OverlaySection, OverlaySettings, SchedulerConfig};
pub use error::{Result, SchedulerError, ScriptError};
pub use logging::{
    EventQueueSink, FanoutSink, FileSink, LogEvent, LogFields, LogLevel, LogSink, Logger,
    LoggingError, LoggingResult, MemorySink,
};
pub use metrics::{MetricSnapshot, SchedulerMetrics};
pub use queue::{DropReason, Enqueued, Event, EventQueue, Payload};
pub use registry::{EventHandler, HandlerRegistry, SubscriptionId, coroutine_handler, handler_fn};
pub use runtime::audit::{
    AuditEvent, AuditEventBuilder, AuditStage, NullAudit, RecordingAudit, SchedulerAudit,
};
pub use runtime::diagnostics::LifecycleLogger;
pub use runtime::driver::cli::{CliDriver, CliDriverError, DriverResult, StatusBoard, TerminalBackend};
pub use runtime::shared_state::{SharedState, SharedStateError};
pub use runtime::{
    DRAW_3D_EVENT, DrainReport, EventHub, FocusPoller, ForegroundProbe, FrameClock, FrameLoop,
    FrameReport, HeadlessBackend, ManualClock, RenderBackend, SHUTDOWN_EVENT, STARTUP_EVENT,
    Scheduler, ShutdownHandle, ShutdownReport, SystemClock, UPDATE_EVENT, VisibilitySignal,
};
pub use task::{
    BoxedCoroutine, Continuation, ContinuationId, Coroutine, ScriptContext, TaskHandle, TaskId,
    TaskOrigin, TaskResult, TaskState, TaskStep, from_fn, once, yield_times,
};
pub use width::{display_width, fit_to_width};
