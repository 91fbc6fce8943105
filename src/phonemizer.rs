use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One mora as produced by a phonemizer, before any timing exists.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MoraInput {
    pub text: String,
    pub consonant: Option<String>,
    pub vowel: String,
}

impl MoraInput {
    pub fn new(text: &str, consonant: Option<&str>, vowel: &str) -> Self {
        Self {
            text: text.to_string(),
            consonant: consonant.map(str::to_string),
            vowel: vowel.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccentPhraseInput {
    pub moras: Vec<MoraInput>,
    pub accent: usize,
    #[serde(default)]
    pub has_pause: bool,
}

/// Text front end turning raw text into accent phrases.
pub trait Phonemizer: Send + Sync {
    fn phonemize(&self, text: &str) -> Result<Vec<AccentPhraseInput>, PipelineError>;

    fn is_interrogative(&self, text: &str) -> bool {
        text.trim_end().ends_with(['?', '？'])
    }
}
