use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CalibrationOptions {
    pub step_size_ms:  u32,
    pub n_iterations:  u32,
    pub exposure_time: f64,
    pub filter_index:  i32,
    pub binning:       u32,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            step_size_ms:  2000,
            n_iterations:  3,
            exposure_time: 5.0,
            filter_index:  0,
            binning:       1,
        }
    }
}
