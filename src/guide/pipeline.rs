use crate::guide::direction::{x_axis_correction, y_axis_correction, AxisCorrection};
use crate::guide::pid::Pid;
use crate::guide::ring_buffer::GuideRingBuffer;
use crate::options::guiding::{GuideDirectionTable, GuidingOptions, PixelsToTimeTable};
use crate::store::log_sink::CorrectionRecord;

/// Per-key guide state, owned exclusively by the guide worker thread: the
/// two PID controllers, the sigma-clipping ring buffer, and the
/// stabilisation state machine.
pub struct GuideState {
    pub pid_x: Pid,
    pub pid_y: Pid,
    pub ring_buffer: GuideRingBuffer,
    pub stabilised: bool,
    pub attempts_remaining: i32,
    configured_x: (f64, f64, f64, f64),
    configured_y: (f64, f64, f64, f64),
}

impl GuideState {
    pub fn new(options: &GuidingOptions) -> Self {
        let configured_x = (options.x_pid.kp, options.x_pid.ki, options.x_pid.kd, options.x_pid.setpoint);
        let configured_y = (options.y_pid.kp, options.y_pid.ki, options.y_pid.kd, options.y_pid.setpoint);
        Self {
            pid_x: Pid::new(configured_x.0, configured_x.1, configured_x.2, configured_x.3),
            pid_y: Pid::new(configured_y.0, configured_y.1, configured_y.2, configured_y.3),
            ring_buffer: GuideRingBuffer::new(options.guide_buffer_length),
            stabilised: false,
            attempts_remaining: options.n_images_to_stabilise,
            configured_x,
            configured_y,
        }
    }

    /// Called whenever the observing key changes (including a GEM flip):
    /// the previous reference's stabilisation history no longer applies.
    pub fn reset_for_new_key(&mut self, options: &GuidingOptions) {
        *self = Self::new(options);
    }

    /// Marks stabilisation achieved and restores the configured (not
    /// pure-proportional) gains, per step 3 of the correction pipeline.
    fn reset_to_configured_gains(&mut self) {
        self.pid_x.reset(self.configured_x.0, self.configured_x.1, self.configured_x.2, self.configured_x.3);
        self.pid_y.reset(self.configured_y.0, self.configured_y.1, self.configured_y.2, self.configured_y.3);
    }
}

/// Raised when the stabilisation attempt budget is exhausted. Fatal: the
/// caller must send `DonutsRecenterError` and terminate the process.
#[derive(Debug, thiserror::Error)]
#[error("failed to stabilise within the configured attempt budget")]
pub struct StabilisationExhausted;

pub struct PipelineInput<'a> {
    pub raw_dx: f64,
    pub raw_dy: f64,
    pub declination_rad: f64,
    pub xbin: u32,
    pub ybin: u32,
    pub ra_axis_is_x: bool,
    pub directions: &'a GuideDirectionTable,
    pub scales: &'a PixelsToTimeTable,
    pub max_error_pixels: f64,
    pub buffer_sigma: f64,
}

pub struct PipelineOutput {
    pub x: AxisCorrection,
    pub y: AxisCorrection,
    pub record: CorrectionRecord,
}

/// Implements the fixed-order correction algorithm: oversize gate,
/// stabilisation clamp, stabilisation state machine, ring-buffer outlier
/// rejection, PID update, output clamp, direction/duration derivation,
/// commit. Returns `Err` only on stabilisation exhaustion, which is fatal.
pub fn process_correction(state: &mut GuideState, input: PipelineInput) -> Result<PipelineOutput, StabilisationExhausted> {
    let PipelineInput {
        raw_dx, raw_dy, declination_rad, xbin, ybin, ra_axis_is_x,
        directions, scales, max_error_pixels, buffer_sigma,
    } = input;

    let oversize = raw_dx.abs() > max_error_pixels || raw_dy.abs() > max_error_pixels;

    // 1. Oversize gate.
    if oversize && state.stabilised {
        return Ok(null_correction(state, raw_dx, raw_dy, true, false, directions, scales, ra_axis_is_x, declination_rad, xbin, ybin));
    }

    // 2. Stabilisation clamp.
    let (mut pre_x, mut pre_y) = (raw_dx, raw_dy);
    if oversize && !state.stabilised {
        pre_x = pre_x.clamp(-max_error_pixels, max_error_pixels);
        pre_y = pre_y.clamp(-max_error_pixels, max_error_pixels);
    }

    // 3. Stabilisation state machine.
    if !state.stabilised {
        if pre_x.abs() < 2.0 && pre_y.abs() < 2.0 {
            state.stabilised = true;
            state.reset_to_configured_gains();
            state.ring_buffer.clear();
        } else if state.attempts_remaining >= 0 {
            state.pid_x.reset(1.0, 0.0, 0.0, 0.0);
            state.pid_y.reset(1.0, 0.0, 0.0, 0.0);
            state.attempts_remaining -= 1;
        } else {
            return Err(StabilisationExhausted);
        }
    }

    // 4. Ring-buffer outlier rejection.
    if state.ring_buffer.is_full() {
        let (sigma_x, sigma_y) = (state.ring_buffer.std_dev_x(), state.ring_buffer.std_dev_y());
        if pre_x.abs() > buffer_sigma * sigma_x || pre_y.abs() > buffer_sigma * sigma_y {
            state.ring_buffer.push(pre_x, pre_y);
            return Ok(null_correction(state, raw_dx, raw_dy, false, true, directions, scales, ra_axis_is_x, declination_rad, xbin, ybin));
        }
    }

    // 5. PID update (negated: corrections oppose the measured offset).
    let post_x = -state.pid_x.update(pre_x);
    let post_y = -state.pid_y.update(pre_y);

    // 6. Output clamp.
    let final_x = post_x.clamp(-max_error_pixels, max_error_pixels);
    let final_y = post_y.clamp(-max_error_pixels, max_error_pixels);

    // 7. Direction + duration derivation.
    let x = x_axis_correction(final_x, directions, scales, ra_axis_is_x, declination_rad, xbin);
    let y = y_axis_correction(final_y, directions, scales, !ra_axis_is_x, declination_rad, ybin);

    // 8. Commit.
    state.ring_buffer.push(pre_x, pre_y);
    let record = CorrectionRecord {
        stabilised: state.stabilised,
        raw_x: raw_dx, raw_y: raw_dy,
        pre_pid_x: pre_x, pre_pid_y: pre_y,
        post_pid_x: post_x, post_pid_y: post_y,
        final_x, final_y,
        buff_sigma_x: state.ring_buffer.std_dev_x(),
        buff_sigma_y: state.ring_buffer.std_dev_y(),
        culled_oversize: false,
        culled_outlier: false,
    };

    Ok(PipelineOutput { x, y, record })
}

#[allow(clippy::too_many_arguments)]
fn null_correction(
    state: &GuideState,
    raw_dx: f64,
    raw_dy: f64,
    culled_oversize: bool,
    culled_outlier: bool,
    directions: &GuideDirectionTable,
    scales: &PixelsToTimeTable,
    ra_axis_is_x: bool,
    declination_rad: f64,
    xbin: u32,
    ybin: u32,
) -> PipelineOutput {
    let x = x_axis_correction(0.0, directions, scales, ra_axis_is_x, declination_rad, xbin);
    let y = y_axis_correction(0.0, directions, scales, !ra_axis_is_x, declination_rad, ybin);
    let record = CorrectionRecord {
        stabilised: state.stabilised,
        raw_x: raw_dx, raw_y: raw_dy,
        pre_pid_x: raw_dx, pre_pid_y: raw_dy,
        post_pid_x: 0.0, post_pid_y: 0.0,
        final_x: 0.0, final_y: 0.0,
        buff_sigma_x: state.ring_buffer.std_dev_x(),
        buff_sigma_y: state.ring_buffer.std_dev_y(),
        culled_oversize,
        culled_outlier,
    };
    PipelineOutput { x, y, record }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::guiding::GuidingOptions;

    fn state() -> GuideState {
        GuideState::new(&GuidingOptions::default())
    }

    fn input(raw_dx: f64, raw_dy: f64, directions: &GuideDirectionTable, scales: &PixelsToTimeTable) -> PipelineInput<'_> {
        PipelineInput {
            raw_dx, raw_dy,
            declination_rad: 0.0,
            xbin: 1, ybin: 1,
            ra_axis_is_x: true,
            directions, scales,
            max_error_pixels: 20.0,
            buffer_sigma: 3.0,
        }
    }

    /// Scenario 2: a small first shift stabilises immediately and the PID,
    /// freshly reset to the configured (pure-proportional, Kp=1) gains,
    /// negates the offset exactly.
    #[test]
    fn small_first_shift_stabilises_and_negates_offset() {
        let mut state = state();
        let directions = GuideDirectionTable::default();
        let scales = PixelsToTimeTable::default();

        let output = process_correction(&mut state, input(1.2, -0.8, &directions, &scales)).unwrap();

        assert!(state.stabilised);
        assert!((output.record.post_pid_x - (-1.2)).abs() < 1e-9);
        assert!((output.record.post_pid_y - 0.8).abs() < 1e-9);
        assert!(!output.record.culled_oversize);
        assert!(!output.record.culled_outlier);
    }

    /// Scenario 3: once stabilised, an oversize shift is nulled and logged
    /// as culled_oversize, never clamped.
    #[test]
    fn oversize_after_stabilisation_is_nulled_not_clamped() {
        let mut state = state();
        state.stabilised = true;
        let directions = GuideDirectionTable::default();
        let scales = PixelsToTimeTable::default();

        let output = process_correction(&mut state, input(50.0, 1.0, &directions, &scales)).unwrap();

        assert!(output.record.culled_oversize);
        assert_eq!(output.x.duration_ms, 0);
        assert_eq!(output.y.duration_ms, 0);
    }

    /// Before stabilisation, an oversize shift is clamped rather than
    /// nulled, so the stabilisation state machine still sees it.
    #[test]
    fn oversize_before_stabilisation_is_clamped() {
        let mut state = state();
        let directions = GuideDirectionTable::default();
        let scales = PixelsToTimeTable::default();

        let output = process_correction(&mut state, input(50.0, 1.0, &directions, &scales)).unwrap();

        assert!(!output.record.culled_oversize);
        assert_eq!(output.record.pre_pid_x, 20.0);
    }

    /// Once the ring buffer is full, a sample outside K*sigma is nulled but
    /// still appended to the buffer so persistent drifts eventually pass.
    #[test]
    fn outlier_is_nulled_but_still_buffered() {
        let mut state = state();
        state.stabilised = true;
        for _ in 0..GuidingOptions::default().guide_buffer_length {
            state.ring_buffer.push(0.0, 0.0);
        }
        let directions = GuideDirectionTable::default();
        let scales = PixelsToTimeTable::default();

        assert!(state.ring_buffer.is_full());
        let output = process_correction(&mut state, input(15.0, 0.0, &directions, &scales)).unwrap();

        assert!(output.record.culled_outlier);
        assert!(state.ring_buffer.is_full());
    }

    /// Exhausting the stabilisation attempt budget without converging below
    /// the threshold is fatal.
    #[test]
    fn stabilisation_exhaustion_is_fatal() {
        let mut state = state();
        state.attempts_remaining = 0;
        let directions = GuideDirectionTable::default();
        let scales = PixelsToTimeTable::default();

        let first = process_correction(&mut state, input(10.0, 10.0, &directions, &scales));
        assert!(first.is_ok());
        assert_eq!(state.attempts_remaining, -1);

        let second = process_correction(&mut state, input(10.0, 10.0, &directions, &scales));
        assert!(second.is_err());
    }
}
