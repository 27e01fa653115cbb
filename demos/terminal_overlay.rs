//! Terminal overlay demo: a frame counter, key echo and a background job.
//!
//! Run with `cargo run --example terminal_overlay`, press keys, `Esc` quits.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use overlay_scheduler::{
    CliDriver, FileSink, LifecycleLogger, Logger, Scheduler, SchedulerConfig, StatusBoard,
    handler_fn,
};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = Logger::new(FileSink::new("terminal_overlay.log", 1 << 20)?);
    let mut config = SchedulerConfig::default().with_logger(logger.clone());
    config.enable_metrics();

    let scheduler = Scheduler::new(config);
    let board = scheduler.shared().get_or_insert_with(StatusBoard::new)?;
    LifecycleLogger::new(logger).watch("job-done").attach(scheduler.hub())?;

    let frames = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&frames);
    let status = Arc::clone(&board);
    scheduler.add_event_handler(
        "update",
        handler_fn(move |_cx, _event| {
            let frame = counter.fetch_add(1, Ordering::Relaxed) + 1;
            status.set_line(0, format!("frame {frame}"));
            Ok(())
        }),
    )?;

    let status = Arc::clone(&board);
    scheduler.add_event_handler(
        "startup",
        handler_fn(move |cx, _event| {
            status.set_line(1, "job: running");
            cx.bridge()
                .spawn_job("job-done", || {
                    thread::sleep(Duration::from_millis(750));
                    Ok::<_, io::Error>(json!("ready"))
                })
                .map_err(|err| overlay_scheduler::ScriptError::raised(err.to_string()))?;
            Ok(())
        }),
    )?;

    let status = Arc::clone(&board);
    scheduler.add_event_handler(
        "job-done",
        handler_fn(move |_cx, event| {
            let outcome = event
                .payload()
                .and_then(|payload| payload.get("ok"))
                .and_then(|value| value.as_str())
                .unwrap_or("failed");
            status.set_line(1, format!("job: {outcome}"));
            Ok(())
        }),
    )?;

    for key in ["a", "b", "space", "enter"] {
        let status = Arc::clone(&board);
        scheduler.add_event_handler(
            &format!("{key}-down"),
            handler_fn(move |cx, _event| {
                status.set_line(2, format!("last key: {}", cx.event_name()));
                Ok(())
            }),
        )?;
    }

    let report = CliDriver::new(scheduler)?.run()?;
    println!(
        "stopped after {} frames, {} resume passes during shutdown",
        frames.load(Ordering::Relaxed),
        report.resume_passes
    );
    Ok(())
}
