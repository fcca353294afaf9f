use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::SyncSender;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::fits::FitsHeader;
use crate::guide::direction::AxisCorrection;
use crate::guide::frame_slot::FrameSlot;
use crate::guide::pipeline::{process_correction, GuideState, PipelineInput};
use crate::options::fits::{Axis, FitsKeywordOptions};
use crate::options::guiding::GuidingOptions;
use crate::store::{CorrectionRecord, FlipStatusKey, GuideLogSink, LogEntry, ObservingKey, ReferenceStore, promote_reference};
use crate::shift::{AnalyserBuildParams, ShiftAnalyser, ShiftAnalyserFactory};
use crate::utils::sexagesimal::dec_string_to_degrees;

/// What the worker reports back to the event loop for one processed frame.
pub enum WorkerOutcome {
    /// No pulse-guide RPCs should be issued (oversize/outlier cull, or the
    /// frame that just promoted a new reference).
    Null,
    Correction { x: AxisCorrection, y: AxisCorrection },
    /// A per-frame failure (unreadable FITS header, missing keyword, no
    /// bound shift analyser, a failed shift measurement). Recoverable: the
    /// event loop emits `DonutsRecenterError` for this frame and returns to
    /// `Idle` to keep processing later frames.
    FrameError(String),
    /// Stabilisation was exhausted; the event loop must emit
    /// `DonutsRecenterError` and the process must terminate.
    StabilisationExhausted,
}

pub struct GuideWorker {
    reference_store: Arc<ReferenceStore>,
    log_sink: Arc<dyn GuideLogSink>,
    shift_factory: Arc<dyn ShiftAnalyserFactory>,
    fits_options: FitsKeywordOptions,
    guiding_options: GuidingOptions,
    reference_dir: PathBuf,

    last_key: Option<ObservingKey>,
    state: GuideState,
    analyser: Option<Box<dyn ShiftAnalyser>>,
    reference_path: Option<PathBuf>,
}

impl GuideWorker {
    pub fn new(
        reference_store: Arc<ReferenceStore>,
        log_sink: Arc<dyn GuideLogSink>,
        shift_factory: Arc<dyn ShiftAnalyserFactory>,
        fits_options: FitsKeywordOptions,
        guiding_options: GuidingOptions,
        reference_dir: PathBuf,
    ) -> Self {
        let state = GuideState::new(&guiding_options);
        Self {
            reference_store, log_sink, shift_factory, fits_options, guiding_options,
            reference_dir, last_key: None, state, analyser: None, reference_path: None,
        }
    }

    /// Runs on thread B until `exit_flag` is set. Never touches the socket.
    pub fn run(
        mut self,
        frame_slot: Arc<FrameSlot>,
        result_tx: SyncSender<WorkerOutcome>,
        exit_flag: Arc<AtomicBool>,
    ) {
        while let Some(request) = frame_slot.wait_and_take(&exit_flag) {
            let outcome = self.process_frame(&request.path, request.flip_state.into());
            if result_tx.send(outcome).is_err() {
                break;
            }
        }
    }

    fn process_frame(&mut self, path: &std::path::Path, flip_status: FlipStatusKey) -> WorkerOutcome {
        let header = match FitsHeader::read_from_path(path) {
            Ok(header) => header,
            Err(err) => return WorkerOutcome::FrameError(format!("failed to read FITS header of {path:?}: {err}")),
        };

        let key = match self.build_observing_key(&header, flip_status) {
            Ok(key) => key,
            Err(err) => return WorkerOutcome::FrameError(err.to_string()),
        };
        let declination_rad = match self.read_declination(&header) {
            Ok(rad) => rad,
            Err(err) => return WorkerOutcome::FrameError(err.to_string()),
        };

        let key_changed = self.last_key.as_ref() != Some(&key);
        if key_changed {
            match self.resolve_reference(&key, path) {
                Ok(ResolveOutcome::UsingExisting) => {}
                Ok(ResolveOutcome::JustPromoted) => {
                    self.last_key = Some(key);
                    self.log_no_op(path, "new reference promoted");
                    return WorkerOutcome::Null;
                }
                Err(err) => return WorkerOutcome::FrameError(err.to_string()),
            }
            self.last_key = Some(key);
        }

        let analyser = match &self.analyser {
            Some(analyser) => analyser,
            None => return WorkerOutcome::FrameError("no shift analyser bound to the current reference".to_string()),
        };

        let shift = match analyser.measure_shift(path) {
            Ok(shift) => shift,
            Err(err) => return WorkerOutcome::FrameError(format!("shift measurement failed: {err}")),
        };

        let xbin = header.get_i64(&self.fits_options.xbin_keyword).unwrap_or(1) as u32;
        let ybin = header.get_i64(&self.fits_options.ybin_keyword).unwrap_or(1) as u32;
        let flip_state: crate::options::guiding::FlipState = flip_status.into();
        let (directions, scales) = self.guiding_options.active_tables(flip_state);
        let ra_axis_is_x = matches!(self.fits_options.ra_axis, Axis::X);

        let input = PipelineInput {
            raw_dx: shift.dx,
            raw_dy: shift.dy,
            declination_rad,
            xbin,
            ybin,
            ra_axis_is_x,
            directions,
            scales,
            max_error_pixels: self.guiding_options.max_error_pixels,
            buffer_sigma: self.guiding_options.guide_buffer_sigma,
        };

        match process_correction(&mut self.state, input) {
            Ok(output) => {
                self.emit_log(path, output.record);
                if output.record.culled_oversize || output.record.culled_outlier {
                    WorkerOutcome::Null
                } else {
                    WorkerOutcome::Correction { x: output.x, y: output.y }
                }
            }
            Err(_exhausted) => WorkerOutcome::StabilisationExhausted,
        }
    }

    fn build_observing_key(&self, header: &FitsHeader, flip_status: FlipStatusKey) -> anyhow::Result<ObservingKey> {
        let field = header.get_str(&self.fits_options.field_keyword)
            .ok_or_else(|| anyhow::anyhow!("missing field keyword {}", self.fits_options.field_keyword))?;
        let filter = header.get_str(&self.fits_options.filter_keyword)
            .ok_or_else(|| anyhow::anyhow!("missing filter keyword {}", self.fits_options.filter_keyword))?;
        let xbin = header.get_i64(&self.fits_options.xbin_keyword).unwrap_or(1) as u32;
        let ybin = header.get_i64(&self.fits_options.ybin_keyword).unwrap_or(1) as u32;
        let xsize = header.get_i64(&self.fits_options.xsize_keyword)
            .ok_or_else(|| anyhow::anyhow!("missing xsize keyword {}", self.fits_options.xsize_keyword))? as u32;
        let ysize = header.get_i64(&self.fits_options.ysize_keyword)
            .ok_or_else(|| anyhow::anyhow!("missing ysize keyword {}", self.fits_options.ysize_keyword))? as u32;
        let xorigin = header.get_i64(&self.fits_options.xorigin_keyword).unwrap_or(0) as u32;
        let yorigin = header.get_i64(&self.fits_options.yorigin_keyword).unwrap_or(0) as u32;

        Ok(ObservingKey { field, filter, xbin, ybin, xsize, ysize, xorigin, yorigin, flip_status })
    }

    fn read_declination(&self, header: &FitsHeader) -> anyhow::Result<f64> {
        let dec_str = header.get_str(&self.fits_options.dec_keyword)
            .ok_or_else(|| anyhow::anyhow!("missing declination keyword {}", self.fits_options.dec_keyword))?;
        let degrees = dec_string_to_degrees(&dec_str)?;
        Ok(degrees.to_radians())
    }

    fn resolve_reference(&mut self, key: &ObservingKey, frame_path: &std::path::Path) -> anyhow::Result<ResolveOutcome> {
        self.state.reset_for_new_key(&self.guiding_options);

        let outcome = match self.reference_store.lookup(key) {
            Some(existing) => {
                self.reference_path = Some(existing);
                ResolveOutcome::UsingExisting
            }
            None => {
                let promoted = promote_reference(&self.reference_store, key.clone(), frame_path, &self.reference_dir)?;
                self.reference_path = Some(promoted);
                ResolveOutcome::JustPromoted
            }
        };

        let reference_path = self.reference_path.clone().unwrap();
        let params = AnalyserBuildParams {
            reference_path: reference_path.clone(),
            full_frame_mask_path: self.guiding_options.full_frame_boolean_mask_file.clone(),
            xbin: key.xbin, ybin: key.ybin,
            xorigin: key.xorigin, yorigin: key.yorigin,
            xsize: key.xsize, ysize: key.ysize,
            subtract_background: self.guiding_options.donuts_subtract_bkg,
        };
        self.analyser = Some(self.shift_factory.build(&params)?);

        Ok(outcome)
    }

    fn emit_log(&self, target_path: &std::path::Path, correction: CorrectionRecord) {
        let Some(reference_path) = self.reference_path.clone() else { return };
        self.log_sink.log(LogEntry {
            ref_path: reference_path,
            target_path: target_path.to_path_buf(),
            timestamp: now_unix_seconds(),
            correction,
        });
    }

    fn log_no_op(&self, target_path: &std::path::Path, _reason: &str) {
        let Some(reference_path) = self.reference_path.clone() else { return };
        self.log_sink.log(LogEntry {
            ref_path: reference_path,
            target_path: target_path.to_path_buf(),
            timestamp: now_unix_seconds(),
            correction: CorrectionRecord {
                stabilised: self.state.stabilised,
                raw_x: 0.0, raw_y: 0.0,
                pre_pid_x: 0.0, pre_pid_y: 0.0,
                post_pid_x: 0.0, post_pid_y: 0.0,
                final_x: 0.0, final_y: 0.0,
                buff_sigma_x: 0.0, buff_sigma_y: 0.0,
                culled_oversize: false, culled_outlier: false,
            },
        });
    }
}

enum ResolveOutcome {
    UsingExisting,
    JustPromoted,
}

fn now_unix_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
