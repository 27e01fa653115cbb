use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use overlay_scheduler::logging::{LogEvent, LogSink};
use overlay_scheduler::{
    FrameLoop, HeadlessBackend, LifecycleLogger, Logger, LoggingResult, ManualClock, Scheduler,
    SchedulerConfig, coroutine_handler, handler_fn, yield_times,
};
use serde_json::json;

#[derive(Clone, Default)]
struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _event: &LogEvent) -> LoggingResult<()> {
        Ok(())
    }
}

fn bench_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default().with_logger(Logger::new(NullSink));
    config.metrics_interval = Duration::from_millis(0);
    config.enable_metrics();
    config
}

/// 64 subscribers on one event, 100 events per drain.
fn dispatch_throughput(c: &mut Criterion) {
    c.bench_function("dispatch_fanout", |b| {
        b.iter(|| {
            let mut scheduler = Scheduler::new(bench_config());
            for _ in 0..64 {
                scheduler
                    .add_event_handler(
                        "tick",
                        handler_fn(|_cx, event| {
                            black_box(event.payload());
                            Ok(())
                        }),
                    )
                    .expect("subscribe");
            }
            for n in 0..100 {
                scheduler.queue_event("tick", Some(json!({ "n": n })));
            }
            black_box(scheduler.drain_and_dispatch());
        });
    });
}

/// Tasks that suspend a few times each, resumed until the pending set empties.
fn resume_throughput(c: &mut Criterion) {
    c.bench_function("resume_until_idle", |b| {
        b.iter(|| {
            let mut scheduler = Scheduler::new(bench_config());
            scheduler
                .add_event_handler("work", coroutine_handler(|_event| yield_times(8, |_cx| Ok(()))))
                .expect("subscribe");
            for _ in 0..256 {
                scheduler.queue_event("work", None);
            }
            scheduler.drain_and_dispatch();
            black_box(scheduler.run_until_idle());
        });
    });
}

/// Full visible frames against the headless backend with lifecycle logging on.
fn frame_loop_script(c: &mut Criterion) {
    c.bench_function("frame_loop_script", |b| {
        b.iter(|| {
            let config = bench_config();
            let scheduler = Scheduler::new(config);
            LifecycleLogger::new(Logger::new(NullSink))
                .log_updates(true)
                .attach(scheduler.hub())
                .expect("lifecycle logger");
            let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let seen = Arc::clone(&counter);
            scheduler
                .add_event_handler(
                    "update",
                    handler_fn(move |_cx, _event| {
                        seen.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        Ok(())
                    }),
                )
                .expect("subscribe");

            let mut frames =
                FrameLoop::with_clock(scheduler, HeadlessBackend::new(), ManualClock::new());
            frames.startup();
            frames.run_frames(black_box(60)).expect("frames");
            black_box(frames.finish());
            black_box(counter.load(std::sync::atomic::Ordering::Relaxed));
        });
    });
}

criterion_group!(benches, dispatch_throughput, resume_throughput, frame_loop_script);
criterion_main!(benches);
