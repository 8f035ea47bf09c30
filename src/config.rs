use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::analysis::calibration::{Calibration, DEFAULT_CELL_AREA_MM2, DEFAULT_CELL_SIZE_PX};
use crate::error::AppError;

const ENV_PREFIX: &str = "LEAF_AREA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Pending requests held in front of the engine, in-flight one included.
    pub max_queue_size: usize,
    /// Engine errors tolerated per request before it is failed.
    pub max_attempts: u32,
    pub calibration_cell_area_mm2: f64,
    pub calibration_cell_size_px: u32,
    /// Identical user notices raised inside this window are collapsed.
    pub notice_window_ms: u64,
    pub command_buffer_size: usize,
    pub event_buffer_size: usize,
    pub notice_buffer_size: usize,
    pub log_level: String,
    pub engine_command: String,
    pub engine_args: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_queue_size: 3,
            max_attempts: 5,
            calibration_cell_area_mm2: DEFAULT_CELL_AREA_MM2,
            calibration_cell_size_px: DEFAULT_CELL_SIZE_PX,
            notice_window_ms: 3_000,
            command_buffer_size: 32,
            event_buffer_size: 16,
            notice_buffer_size: 16,
            log_level: "info".to_string(),
            engine_command: "leaf-vision-engine".to_string(),
            engine_args: Vec::new(),
        }
    }
}

impl Configuration {
    /// Layers an optional config file and `LEAF_AREA_*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("engine_args"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn calibration(&self) -> Calibration {
        Calibration::new(
            self.calibration_cell_area_mm2,
            self.calibration_cell_size_px,
        )
    }

    pub fn notice_window(&self) -> Duration {
        Duration::from_millis(self.notice_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn defaults_match_engine_contract() {
        let configuration = Configuration::default();
        assert_eq!(configuration.max_queue_size, 3);
        assert_eq!(configuration.max_attempts, 5);
        assert_eq!(configuration.calibration().cell_size_px, 30);
        assert_eq!(configuration.calibration().cell_area_mm2, 25.0);
        assert_eq!(configuration.notice_window(), Duration::from_secs(3));
    }

    #[test]
    fn file_values_override_defaults() {
        let path = std::env::temp_dir().join(format!("leaf-area-{}.toml", Uuid::new_v4()));
        std::fs::write(
            &path,
            "max_attempts = 2\nengine_command = \"python3\"\nengine_args = [\"engine.py\"]\n",
        )
        .unwrap();

        let configuration = Configuration::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(configuration.max_attempts, 2);
        assert_eq!(configuration.engine_command, "python3");
        assert_eq!(configuration.engine_args, vec!["engine.py".to_string()]);
        assert_eq!(configuration.max_queue_size, 3);
    }
}
