pub mod bridge;
pub mod fits;
pub mod guiding;
pub mod calibration;

pub use bridge::*;
pub use fits::*;
pub use guiding::*;
pub use calibration::*;

use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Options {
    pub bridge:      BridgeOptions,
    pub fits:        FitsKeywordOptions,
    pub guiding:      GuidingOptions,
    pub calibration: CalibrationOptions,
}

impl Options {
    pub fn load() -> anyhow::Result<Self> {
        let mut result = Self::default();
        crate::io_utils::load_json_from_config_file(&mut result, "donuts_bridge")?;
        result.check()?;
        Ok(result)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        crate::io_utils::save_json_to_config(self, "donuts_bridge")
    }

    pub fn check(&mut self) -> anyhow::Result<()> {
        self.guiding.check()?;
        Ok(())
    }
}
