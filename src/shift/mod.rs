use std::path::{Path, PathBuf};

/// Sub-pixel offset of a target frame relative to a reference frame, in
/// pixels. Positive `dx`/`dy` mean the target has drifted in the positive
/// axis direction since the reference was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Shift {
    pub dx: f64,
    pub dy: f64,
}

/// The image-correlation collaborator. Building one is expected to be
/// comparatively expensive (it indexes the reference frame), so a new
/// analyser is built only when the observing key changes; `measure_shift`
/// itself is called once per subsequent frame against that same reference.
pub trait ShiftAnalyser: Send {
    fn measure_shift(&self, target: &Path) -> anyhow::Result<Shift>;
}

/// Parameters honoured when constructing an analyser: an optional
/// full-frame boolean mask (excluding pixels from correlation), binned and
/// sliced down to the currently active subframe.
#[derive(Debug, Clone)]
pub struct AnalyserBuildParams {
    pub reference_path: PathBuf,
    pub full_frame_mask_path: Option<PathBuf>,
    pub xbin: u32,
    pub ybin: u32,
    pub xorigin: u32,
    pub yorigin: u32,
    pub xsize: u32,
    pub ysize: u32,
    pub subtract_background: bool,
}

/// Builds a [`ShiftAnalyser`] bound to one reference frame. The concrete
/// correlation routine is an external collaborator; this crate only owns
/// the seam it plugs into.
pub trait ShiftAnalyserFactory: Send + Sync {
    fn build(&self, params: &AnalyserBuildParams) -> anyhow::Result<Box<dyn ShiftAnalyser>>;
}

/// A factory that refuses to build an analyser. Plugging in the real
/// image-correlation routine is outside this crate's scope; this stands in
/// until a concrete `ShiftAnalyserFactory` backed by that routine is wired
/// into the binary.
pub struct UnavailableShiftAnalyserFactory;

impl ShiftAnalyserFactory for UnavailableShiftAnalyserFactory {
    fn build(&self, _params: &AnalyserBuildParams) -> anyhow::Result<Box<dyn ShiftAnalyser>> {
        anyhow::bail!("no shift analyser implementation is wired into this build")
    }
}

#[cfg(test)]
pub mod test_double {
    use super::*;
    use std::sync::Mutex;

    /// Returns a scripted sequence of shifts, one per call, for use in
    /// pipeline and worker tests that don't exercise real image
    /// correlation.
    pub struct ScriptedAnalyser {
        shifts: Mutex<std::collections::VecDeque<Shift>>,
    }

    impl ScriptedAnalyser {
        pub fn new(shifts: Vec<Shift>) -> Self {
            Self { shifts: Mutex::new(shifts.into_iter().collect()) }
        }
    }

    impl ShiftAnalyser for ScriptedAnalyser {
        fn measure_shift(&self, _target: &Path) -> anyhow::Result<Shift> {
            self.shifts.lock().unwrap().pop_front()
                .ok_or_else(|| anyhow::anyhow!("scripted analyser ran out of shifts"))
        }
    }

    pub struct ScriptedFactory {
        pub shifts: Vec<Shift>,
    }

    impl ShiftAnalyserFactory for ScriptedFactory {
        fn build(&self, _params: &AnalyserBuildParams) -> anyhow::Result<Box<dyn ShiftAnalyser>> {
            Ok(Box::new(ScriptedAnalyser::new(self.shifts.clone())))
        }
    }
}
