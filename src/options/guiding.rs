use std::path::PathBuf;

use serde::{Serialize, Deserialize};

/// Pier-flip behaviour of the mount. A fork mount never flips and uses a
/// single pair of direction/scale tables; a GEM swaps tables across the
/// meridian.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    #[default]
    Fork,
    Gem,
}

/// Mount orientation, as reported by `RemoteMountStatusGetInfo` and mapped
/// from the raw `FlipStatus` integer. `Unknown` is the pre-first-poll state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FlipState {
    #[default]
    Unknown,
    Before,
    After,
    Fork,
    Error,
}

/// Per-axis, per-sign mount direction ids (0-3) as understood by
/// `RemotePulseGuide`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct GuideDirectionTable {
    pub plus_x:  u8,
    pub minus_x: u8,
    pub plus_y:  u8,
    pub minus_y: u8,
}

impl Default for GuideDirectionTable {
    fn default() -> Self {
        Self { plus_x: 0, minus_x: 1, plus_y: 2, minus_y: 3 }
    }
}

/// Per-axis, per-sign milliseconds-of-pulse needed to correct one pixel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PixelsToTimeTable {
    pub plus_x:  f64,
    pub minus_x: f64,
    pub plus_y:  f64,
    pub minus_y: f64,
}

impl Default for PixelsToTimeTable {
    fn default() -> Self {
        Self { plus_x: 1000.0, minus_x: 1000.0, plus_y: 1000.0, minus_y: 1000.0 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AxisPid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
}

impl Default for AxisPid {
    fn default() -> Self {
        Self { kp: 1.0, ki: 0.0, kd: 0.0, setpoint: 0.0 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GuidingOptions {
    pub mount_kind: MountKind,

    pub x_pid: AxisPid,
    pub y_pid: AxisPid,

    /// Length of the pre-PID shift ring buffer used for sigma-clipping.
    pub guide_buffer_length: usize,
    /// Outlier threshold, in multiples of the buffer's standard deviation.
    pub guide_buffer_sigma: f64,
    /// Shifts beyond this many pixels are rejected (clamped before
    /// stabilisation, nulled after).
    pub max_error_pixels: f64,
    /// Number of pure-proportional attempts allowed before stabilisation is
    /// declared a failure.
    pub n_images_to_stabilise: i32,

    /// Optional full-frame boolean mask excluding pixels from correlation.
    pub full_frame_boolean_mask_file: Option<PathBuf>,
    pub donuts_subtract_bkg: bool,

    pub guide_directions_fork: GuideDirectionTable,
    pub pixels_to_time_fork:  PixelsToTimeTable,

    pub guide_directions_east: GuideDirectionTable,
    pub pixels_to_time_east:  PixelsToTimeTable,
    pub guide_directions_west: GuideDirectionTable,
    pub pixels_to_time_west:  PixelsToTimeTable,
}

impl Default for GuidingOptions {
    fn default() -> Self {
        Self {
            mount_kind:              MountKind::Fork,
            x_pid:                   AxisPid::default(),
            y_pid:                   AxisPid::default(),
            guide_buffer_length:     10,
            guide_buffer_sigma:      3.0,
            max_error_pixels:        20.0,
            n_images_to_stabilise:   5,
            full_frame_boolean_mask_file: None,
            donuts_subtract_bkg:     true,
            guide_directions_fork:   GuideDirectionTable::default(),
            pixels_to_time_fork:     PixelsToTimeTable::default(),
            guide_directions_east:   GuideDirectionTable::default(),
            pixels_to_time_east:     PixelsToTimeTable::default(),
            guide_directions_west:   GuideDirectionTable::default(),
            pixels_to_time_west:     PixelsToTimeTable::default(),
        }
    }
}

impl GuidingOptions {
    pub fn check(&mut self) -> anyhow::Result<()> {
        if let Some(mask) = &self.full_frame_boolean_mask_file {
            if !mask.is_file() {
                anyhow::bail!("configured mask file {mask:?} does not exist");
            }
        }
        Ok(())
    }

    /// Select the direction/scale tables active for the given mount
    /// orientation. A fork mount always returns its single table pair; a GEM
    /// returns the east/west pair matching `flip`, falling back to the
    /// before/east pair while orientation is still unknown.
    pub fn active_tables(&self, flip: FlipState) -> (&GuideDirectionTable, &PixelsToTimeTable) {
        match (self.mount_kind, flip) {
            (MountKind::Fork, _) =>
                (&self.guide_directions_fork, &self.pixels_to_time_fork),
            (MountKind::Gem, FlipState::After) =>
                (&self.guide_directions_west, &self.pixels_to_time_west),
            (MountKind::Gem, _) =>
                (&self.guide_directions_east, &self.pixels_to_time_east),
        }
    }
}
