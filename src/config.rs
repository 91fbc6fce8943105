use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::renderer::Batching;

pub const DEFAULT_DICT_DIR: &str = "./voicevox_core/open_jtalk_dic_utf_8-1.11";
pub const DEFAULT_SAMPLING_RATE: u32 = 24000;

/// Engine-wide defaults applied to freshly built audio queries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub open_jtalk_dict_dir: PathBuf,
    pub speaker_id: u32,
    pub output_sampling_rate: u32,
    pub pre_phoneme_length: f64,
    pub post_phoneme_length: f64,
    pub pause_length_scale: f64,
    /// Only used when the model does not dictate its own batching.
    pub batching: Batching,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            open_jtalk_dict_dir: PathBuf::from(DEFAULT_DICT_DIR),
            speaker_id: 2,
            output_sampling_rate: DEFAULT_SAMPLING_RATE,
            pre_phoneme_length: 0.1,
            post_phoneme_length: 0.1,
            pause_length_scale: 1.0,
            batching: Batching::PerUtterance,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }
}
