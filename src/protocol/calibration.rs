use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use crate::options::guiding::{FlipState, MountKind};
use crate::protocol::engine::EventLoop;
use crate::protocol::messages::{camera_shot, pulse_guide};
use crate::shift::AnalyserBuildParams;

/// The four raw pulse-guide direction codes exercised during calibration.
/// Which axis/sign each maps to is exactly what this routine discovers.
const DIRECTIONS: [u8; 4] = [0, 1, 2, 3];

/// One shift observation: which axis dominated and its signed magnitude.
#[derive(Debug, Clone, Copy)]
struct Observation {
    axis_label: &'static str,
    magnitude: f64,
}

fn classify(dx: f64, dy: f64) -> Observation {
    if dx.abs() > dy.abs() {
        let axis_label = if dx > 0.0 { "-x" } else { "+x" };
        Observation { axis_label, magnitude: dx.abs() }
    } else {
        let axis_label = if dy > 0.0 { "-y" } else { "+y" };
        Observation { axis_label, magnitude: dy.abs() }
    }
}

/// Runs the pulse-guide calibration routine (C9): a reference exposure,
/// then `n_iterations` passes over the four raw pulse-guide directions,
/// nudging the mount and re-measuring the shift each time. The outcome is a
/// human-readable report with paste-ready `pixels_to_time`/`guide_directions`
/// config lines, namespaced for the mount's current flip status.
pub fn run_calibration(engine: &mut EventLoop) -> anyhow::Result<()> {
    let calib = engine.options().calibration.clone();
    let bridge = engine.options().bridge.clone();

    let container_dir = bridge.calib_root_container.clone();
    std::fs::create_dir_all(&container_dir)?;
    clear_stale_frames(&container_dir);

    let timestamp = engine.timestamp();
    let report_path = container_dir.join(format!("donuts_calibration_{timestamp:.0}.txt"));

    let reference_container = calibration_frame_path(&container_dir, "reference");
    let reference_host = bridge.resolve_host_calib_path(
        reference_container.file_name().unwrap().to_str().unwrap(),
    );
    take_calibration_shot(engine, &calib, reference_host)?;

    let mut analyser = build_analyser(engine, &reference_container)?;

    let mut direction_store: HashMap<u8, Vec<&'static str>> = HashMap::new();
    let mut scale_store: HashMap<u8, Vec<f64>> = HashMap::new();

    for _ in 0..calib.n_iterations {
        for &direction in &DIRECTIONS {
            let uid = uuid::Uuid::new_v4().to_string();
            let id = engine.next_id();
            let request = pulse_guide(uid.clone(), id, direction, calib.step_size_ms);
            engine.two_way_rpc(uid, request)?;

            let frame_container = calibration_frame_path(&container_dir, &format!("dir{direction}_{id}"));
            let frame_host = bridge.resolve_host_calib_path(
                frame_container.file_name().unwrap().to_str().unwrap(),
            );
            take_calibration_shot(engine, &calib, frame_host)?;

            let shift = analyser.measure_shift(&frame_container)?;
            let observation = classify(shift.dx, shift.dy);
            direction_store.entry(direction).or_default().push(observation.axis_label);
            scale_store.entry(direction).or_default().push(observation.magnitude);

            analyser = build_analyser(engine, &frame_container)?;
        }
    }

    write_report(engine, &report_path, &calib, &direction_store, &scale_store)?;
    Ok(())
}

/// Removes `.fits` frames left over from a previous calibration run so stale
/// reference/direction shots can't leak into this one.
fn clear_stale_frames(container_dir: &std::path::Path) {
    let Ok(entries) = std::fs::read_dir(container_dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()).map(|ext| ext.eq_ignore_ascii_case("fits")) == Some(true) {
            if let Err(err) = std::fs::remove_file(&path) {
                log::warn!("failed to remove stale calibration frame {path:?}: {err}");
            }
        }
    }
}

fn calibration_frame_path(container_dir: &std::path::Path, label: &str) -> PathBuf {
    container_dir.join(format!("calib_{label}.fits"))
}

fn take_calibration_shot(
    engine: &mut EventLoop,
    calib: &crate::options::calibration::CalibrationOptions,
    host_path: String,
) -> anyhow::Result<()> {
    let uid = uuid::Uuid::new_v4().to_string();
    let id = engine.next_id();
    let request = camera_shot(
        uid.clone(),
        id,
        calib.exposure_time,
        calib.filter_index,
        calib.binning,
        true,
        host_path,
    );
    engine.two_way_rpc(uid, request)?;
    Ok(())
}

fn build_analyser(
    engine: &EventLoop,
    reference_container: &std::path::Path,
) -> anyhow::Result<Box<dyn crate::shift::ShiftAnalyser>> {
    let guiding = &engine.options().guiding;
    let params = AnalyserBuildParams {
        reference_path: reference_container.to_path_buf(),
        full_frame_mask_path: guiding.full_frame_boolean_mask_file.clone(),
        xbin: calib_binning(engine),
        ybin: calib_binning(engine),
        xorigin: 0,
        yorigin: 0,
        xsize: 0,
        ysize: 0,
        subtract_background: guiding.donuts_subtract_bkg,
    };
    engine.shift_factory().build(&params)
}

fn calib_binning(engine: &EventLoop) -> u32 {
    engine.options().calibration.binning
}

fn write_report(
    engine: &EventLoop,
    report_path: &std::path::Path,
    calib: &crate::options::calibration::CalibrationOptions,
    direction_store: &HashMap<u8, Vec<&'static str>>,
    scale_store: &HashMap<u8, Vec<f64>>,
) -> anyhow::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(report_path)?;

    let mut skip_config_lines = false;
    let mut first_direction: HashMap<u8, &'static str> = HashMap::new();
    for (&direction, labels) in direction_store {
        let consistent = labels.iter().all(|l| *l == labels[0]);
        if !consistent {
            skip_config_lines = true;
            writeln!(file, "ERROR: inconsistent calibrated direction for {direction}: {labels:?}")?;
        }
        first_direction.insert(direction, labels[0]);
        writeln!(file, "{direction} {labels:?}")?;
    }

    let mut ratios: HashMap<u8, f64> = HashMap::new();
    for (&direction, magnitudes) in scale_store {
        let mean = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;
        let ratio = (calib.step_size_ms as f64 / mean / calib.binning as f64 * 100.0).round() / 100.0;
        ratios.insert(direction, ratio);
        writeln!(file, "{direction}: {magnitudes:?}")?;
        writeln!(file, "{direction}: {ratio:.2} ms/pixel")?;
    }

    if skip_config_lines {
        writeln!(file, "\nPROBLEM WITH CALIBRATED DIRECTIONS, SKIPPED SUMMARY LINES")?;
        writeln!(file, "SEE REPORT ABOVE FOR CAUSE OF ISSUE")?;
        return Ok(());
    }

    let (pixels_to_time_name, guide_directions_name) = match (engine.options().guiding.mount_kind, engine.current_flip_state()) {
        (MountKind::Gem, FlipState::Before) => ("pixels_to_time_east", "guide_directions_east"),
        (MountKind::Gem, FlipState::After) => ("pixels_to_time_west", "guide_directions_west"),
        _ => ("pixels_to_time_fork", "guide_directions_fork"),
    };

    let mut pixels_to_time_line = format!("{pixels_to_time_name} = {{");
    let mut guide_directions_line = format!("{guide_directions_name} = {{");
    for (&direction, label) in &first_direction {
        pixels_to_time_line.push_str(&format!("\"{label}\" = {}, ", ratios[&direction]));
        guide_directions_line.push_str(&format!("\"{label}\" = {direction}, "));
    }
    pixels_to_time_line.truncate(pixels_to_time_line.len().saturating_sub(2));
    pixels_to_time_line.push('}');
    guide_directions_line.truncate(guide_directions_line.len().saturating_sub(2));
    guide_directions_line.push('}');

    writeln!(file, "\nCopy the lines below into the config file")?;
    writeln!(file, "Be sure to remove any conflicting calibration data")?;
    writeln!(file, "{pixels_to_time_line}")?;
    writeln!(file, "{guide_directions_line}")?;

    Ok(())
}
