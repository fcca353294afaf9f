use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Serialize, Deserialize};

/// One row of the guide decision log, written for every frame whose
/// processing reached a decision, including culled ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub stabilised: bool,
    pub raw_x: f64,
    pub raw_y: f64,
    pub pre_pid_x: f64,
    pub pre_pid_y: f64,
    pub post_pid_x: f64,
    pub post_pid_y: f64,
    pub final_x: f64,
    pub final_y: f64,
    pub buff_sigma_x: f64,
    pub buff_sigma_y: f64,
    pub culled_oversize: bool,
    pub culled_outlier: bool,
}

/// A complete log row, with the two paths and timestamp the pipeline itself
/// does not know about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ref_path: PathBuf,
    pub target_path: PathBuf,
    pub timestamp: f64,
    #[serde(flatten)]
    pub correction: CorrectionRecord,
}

/// Append-only sink for correction decisions. `log` never blocks guiding:
/// a write failure is logged and swallowed.
pub trait GuideLogSink: Send + Sync {
    fn log(&self, entry: LogEntry);
}

/// Appends one JSON line per entry to a file. Stands in for the
/// MySQL-backed `autoguider_log` table; failures are reported via
/// `log::error!` rather than propagated, per the sink's non-blocking
/// contract.
pub struct FileLogSink {
    path: Mutex<PathBuf>,
}

impl FileLogSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Mutex::new(path) }
    }
}

impl GuideLogSink for FileLogSink {
    fn log(&self, entry: LogEntry) {
        let path = self.path.lock().unwrap();
        let result = (|| -> anyhow::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&*path)?;
            let line = serde_json::to_string(&entry)?;
            writeln!(file, "{line}")?;
            Ok(())
        })();
        if let Err(err) = result {
            log::error!("failed to append correction log entry: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_entry() {
        let dir = std::env::temp_dir().join(format!("donuts-bridge-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("guide.log");
        let _ = std::fs::remove_file(&path);

        let sink = FileLogSink::new(path.clone());
        let entry = LogEntry {
            ref_path: PathBuf::from("/ref.fits"),
            target_path: PathBuf::from("/target.fits"),
            timestamp: 1.0,
            correction: CorrectionRecord {
                stabilised: true,
                raw_x: 1.0, raw_y: 1.0,
                pre_pid_x: 1.0, pre_pid_y: 1.0,
                post_pid_x: -1.0, post_pid_y: -1.0,
                final_x: -1.0, final_y: -1.0,
                buff_sigma_x: 0.0, buff_sigma_y: 0.0,
                culled_oversize: false, culled_outlier: false,
            },
        };
        sink.log(entry);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
