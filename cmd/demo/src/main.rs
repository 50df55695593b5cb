//! uproar demo
//!
//! Spins up the scheduler, then runs a timer and a small file
//! write/read/stat sequence through a worker-owned ring.
//!
//! Run: ./target/release/uproar-demo [path]
//! With a path argument the file is read and statted instead of the
//! built-in temp-file round trip.

use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use uproar::fs::{file_mode, open_flags, stat_mask};
use uproar::offheap::OffHeapBuffer;
use uproar::scheduler::{SchedulerConfig, TaskScheduler};
use uproar::{Promise, Timeout};
use uproar_core::kprintln;

const WAIT: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    let scheduler = match TaskScheduler::new(SchedulerConfig {
        workers: 2,
        ..SchedulerConfig::default()
    }) {
        Ok(s) => s,
        Err(e) => {
            kprintln!("demo: cannot start scheduler: {}", e);
            return ExitCode::FAILURE;
        }
    };
    kprintln!("demo: scheduler up with {} workers", scheduler.workers());

    if let Err(e) = run(&scheduler) {
        kprintln!("demo: failed: {}", e);
        scheduler.join();
        return ExitCode::FAILURE;
    }

    scheduler.join();
    kprintln!("demo: done");
    ExitCode::SUCCESS
}

/// Run a closure on a worker and hand its promise back to this thread.
fn on_worker<T, F>(scheduler: &TaskScheduler, f: F) -> uproar::Result<Promise<T>>
where
    T: Send + 'static,
    F: FnOnce(&mut uproar::Proactor) -> Promise<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    scheduler.submit_once(move |proactor| {
        let _ = tx.send(f(proactor));
    })?;
    rx.recv().map_err(|_| uproar::UringError::SchedulerShutdown)
}

fn run(scheduler: &TaskScheduler) -> uproar::Result<()> {
    // A 50ms kernel timer.
    let elapsed = on_worker(scheduler, |p| p.delay(Timeout::from_millis(50)))?.wait(WAIT)?;
    kprintln!("demo: delay(50ms) resolved after {:?}", elapsed);

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            let path = std::env::temp_dir()
                .join(format!("uproar-demo-{}", std::process::id()))
                .to_string_lossy()
                .into_owned();
            let p = path.clone();
            let fd = on_worker(scheduler, move |proactor| {
                proactor.open(
                    &p,
                    open_flags::READ_WRITE | open_flags::CREATE | open_flags::TRUNCATE,
                    file_mode::OWNER_READ_WRITE,
                    None,
                )
            })?
            .wait(WAIT)?;
            on_worker(scheduler, move |proactor| {
                proactor.write(fd, OffHeapBuffer::from_bytes(b"hello, ring\n"), 0, None)
            })?
            .wait(WAIT)?;
            on_worker(scheduler, move |proactor| proactor.close_fd(fd, None))?.wait(WAIT)?;
            path
        }
    };

    let p = path.clone();
    let fd = on_worker(scheduler, move |proactor| {
        proactor.open(&p, open_flags::READ_ONLY, 0, None)
    })?
    .wait(WAIT)?;

    let stat = on_worker(scheduler, move |proactor| {
        proactor.stat_fd(fd, stat_mask::BASIC, None)
    })?
    .wait(WAIT)?;
    kprintln!(
        "demo: {} is {:?}, {} bytes, mode {:o}",
        path,
        stat.file_type(),
        stat.size,
        stat.permissions()
    );

    let buf = on_worker(scheduler, move |proactor| {
        proactor.read(fd, OffHeapBuffer::new(4096), 0, Some(Timeout::from_secs(5)))
    })?
    .wait(WAIT)?;
    kprintln!("demo: read {} bytes", buf.used());
    kprintln!("{}", String::from_utf8_lossy(buf.as_slice()));

    on_worker(scheduler, move |proactor| proactor.close_fd(fd, None))?.wait(WAIT)?;
    Ok(())
}
