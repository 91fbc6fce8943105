pub mod assembler;
pub mod config;
mod engine;
pub mod error;
pub mod kana;
pub mod model;
pub mod mora_table;
pub mod phonemizer;
pub mod query_builder;
pub mod renderer;
pub mod transform;
pub mod types;
#[cfg(feature = "voicevox")]
pub mod voicevox;

pub mod deps {
    pub use serde_json;
    pub use serde;
}

pub use engine::*;

pub use config::EngineConfig;
pub use error::{
    ErrorDescription,
    GenericError,
    PipelineError,
    PipelineErrorDescription,
};
pub use kana::KanaPhonemizer;
pub use model::{AcousticModel, MoraTiming};
pub use phonemizer::{AccentPhraseInput, MoraInput, Phonemizer};
pub use renderer::Batching;
pub use transform::SynthesisOptions;
pub use types::{AccentPhrase, AudioQuery, IndexedSegment, Mora, RenderedSegment, Waveform};

pub struct TextSplitter {
    sentence_splitter: Vec<String>,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            sentence_splitter: vec!["。".to_string(), "？".to_string(), "！".to_string(), "!".to_string(), "?".to_string(), "\n".to_string()],
        }
    }
}

impl TextSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split at sentence punctuation. Question marks stay attached so each
    /// sentence keeps its interrogative intonation.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.sentence_splitter.iter().fold(vec![text.to_owned()], |acc, splitter| {
            acc.iter()
                .flat_map(|sentence| sentence.split_inclusive(splitter.as_str()))
                .map(|s| s.trim_end_matches(['。', '！', '!', '\n']).trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<String>>()
        })
    }
}
