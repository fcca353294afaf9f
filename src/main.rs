#![allow(
    clippy::too_many_arguments,
    clippy::upper_case_acronyms,
    clippy::uninlined_format_args
)]

mod fits;
mod guide;
mod io_utils;
mod log_utils;
mod options;
mod protocol;
mod shift;
mod store;
mod utils;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;

use crate::guide::{FrameSlot, GuideWorker};
use crate::io_utils::get_app_dir;
use crate::log_utils::{cleanup_old_logs, start_logger};
use crate::options::Options;
use crate::protocol::EventLoop;
use crate::shift::{ShiftAnalyserFactory, UnavailableShiftAnalyserFactory};
use crate::store::{FileLogSink, ReferenceStore};

fn panic_handler(
    panic_info:        &std::panic::PanicHookInfo,
    logs_dir:          &std::path::Path,
    def_panic_handler: &Box<dyn Fn(&std::panic::PanicHookInfo<'_>) + 'static + Sync + Send>,
) {
    let payload_str =
        if let Some(msg) = panic_info.payload().downcast_ref::<&'static str>() {
            Some(*msg)
        } else if let Some(msg) = panic_info.payload().downcast_ref::<String>() {
            Some(msg.as_str())
        } else {
            None
        };

    log::error!("PANIC OCCURRED");
    if let Some(payload) = &payload_str {
        log::error!("Panic payload: {}", payload);
        eprintln!("PANIC: {}", payload);
    }
    if let Some(loc) = panic_info.location() {
        log::error!("Panic location: {}", loc);
    }
    log::error!(
        "Panic stacktrace: {}",
        std::backtrace::Backtrace::force_capture().to_string()
    );
    log::error!("Logs at {}", logs_dir.to_str().unwrap_or_default());

    def_panic_handler(panic_info);
}

fn install_interrupt_handler(exit_flag: &Arc<AtomicBool>) {
    let exit_flag = Arc::clone(exit_flag);
    if let Err(err) = ctrlc::set_handler(move || {
        log::info!("interrupt received, requesting shutdown");
        exit_flag.store(true, Ordering::Relaxed);
    }) {
        log::warn!("failed to install interrupt handler: {err}");
    }
}

fn main() -> anyhow::Result<()> {
    let mut logs_dir = get_app_dir()?;
    logs_dir.push("logs");
    cleanup_old_logs(&logs_dir, 14 /* days */);
    start_logger(&logs_dir)?;
    log::set_max_level(log::LevelFilter::Info);

    std::panic::set_hook({
        let logs_dir = logs_dir.clone();
        let default_panic_handler = std::panic::take_hook();
        Box::new(move |panic_info| panic_handler(panic_info, &logs_dir, &default_panic_handler))
    });

    #[cfg(debug_assertions)]
    std::env::set_var("RUST_BACKTRACE", "1");

    log::info!(
        "{} {} ver. {} is started",
        env!("CARGO_PKG_NAME"),
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION")
    );

    log::info!("Loading options...");
    let options = Options::load()?;

    let exit_flag = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(&exit_flag);

    let reference_store = Arc::new(ReferenceStore::new());
    let log_sink = Arc::new(FileLogSink::new(options.bridge.data_root_container.join("guide_log.jsonl")));
    let shift_factory: Arc<dyn ShiftAnalyserFactory> = Arc::new(UnavailableShiftAnalyserFactory);

    let frame_slot = Arc::new(FrameSlot::new());
    let (result_tx, result_rx) = sync_channel(1);

    let worker = GuideWorker::new(
        Arc::clone(&reference_store),
        log_sink,
        Arc::clone(&shift_factory),
        options.fits.clone(),
        options.guiding.clone(),
        options.bridge.reference_dir.clone(),
    );

    log::info!("Starting guide worker thread");
    let worker_frame_slot = Arc::clone(&frame_slot);
    let worker_exit_flag = Arc::clone(&exit_flag);
    let worker_thread = std::thread::spawn(move || {
        worker.run(worker_frame_slot, result_tx, worker_exit_flag);
    });

    log::info!("Connecting to host at {}:{}", options.bridge.host_ip, options.bridge.host_port);
    let engine = EventLoop::connect(options, shift_factory, frame_slot, result_rx, Arc::clone(&exit_flag))?;

    let result = engine.run();

    exit_flag.store(true, Ordering::Relaxed);
    if worker_thread.join().is_err() {
        log::error!("guide worker thread panicked");
    }

    if let Err(err) = &result {
        log::error!("exiting with error: {err}");
    }

    result
}
