use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BridgeOptions {
    pub host_ip:          String,
    pub host_port:        u16,
    /// `Host` field stamped into every outbound event record.
    pub host_name:        String,
    pub image_extension:  String,

    /// Root of the image tree as the host (Windows) sees it, e.g. `H:\data`.
    pub data_root_host:      String,
    /// The same tree as mounted in this process's view, e.g. `/mnt/data`.
    pub data_root_container: std::path::PathBuf,

    /// Root of the calibration output tree, host view.
    pub calib_root_host:      String,
    /// Root of the calibration output tree, container view.
    pub calib_root_container: std::path::PathBuf,

    /// Where promoted reference frames are copied to.
    pub reference_dir: std::path::PathBuf,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            host_ip:              "127.0.0.1".to_string(),
            host_port:             5950,
            host_name:             "donuts-bridge".to_string(),
            image_extension:       ".fits".to_string(),
            data_root_host:        String::new(),
            data_root_container:   std::path::PathBuf::new(),
            calib_root_host:       String::new(),
            calib_root_container:  std::path::PathBuf::new(),
            reference_dir:         std::path::PathBuf::from("references"),
        }
    }
}

impl BridgeOptions {
    /// Rewrite a host-absolute (Windows) path onto this process's mounted
    /// view of the same share.
    pub fn resolve_container_path(&self, host_path: &str) -> anyhow::Result<std::path::PathBuf> {
        let relative = host_path
            .strip_prefix(&self.data_root_host)
            .ok_or_else(|| anyhow::anyhow!(
                "path {host_path:?} is not under configured data root {:?}", self.data_root_host
            ))?;
        let relative = relative.trim_start_matches(['\\', '/']).replace('\\', "/");
        Ok(self.data_root_container.join(relative))
    }

    pub fn resolve_host_calib_path(&self, container_relative: &str) -> String {
        format!("{}\\{}", self.calib_root_host.trim_end_matches('\\'), container_relative.replace('/', "\\"))
    }
}
