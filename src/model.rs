use crate::error::PipelineError;
use crate::renderer::Batching;
use crate::types::{AccentPhrase, RenderedSegment};

/// Predicted timing and pitch for one mora.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoraTiming {
    pub consonant_length: Option<f64>,
    pub vowel_length: f64,
    pub pitch: f64,
}

impl MoraTiming {
    pub(crate) fn validate(&self) -> Result<(), String> {
        let lengths = self.consonant_length.into_iter().chain(std::iter::once(self.vowel_length));
        for length in lengths {
            if !length.is_finite() || length < 0.0 {
                return Err(format!("invalid predicted length {}", length));
            }
        }
        if !self.pitch.is_finite() {
            return Err(format!("invalid predicted pitch {}", self.pitch));
        }
        Ok(())
    }
}

/// Acoustic model plus vocoder.
///
/// Shared read-only between concurrent requests, so every call takes `&self`.
pub trait AcousticModel: Send + Sync {
    /// Timing for every mora of `phrases`, pause moras included, in utterance order.
    fn predict_timing(&self, phrases: &[AccentPhrase]) -> Result<Vec<MoraTiming>, PipelineError>;

    /// Render already-edited phrases into raw samples.
    fn render(&self, phrases: &[AccentPhrase]) -> Result<RenderedSegment, PipelineError>;

    fn batching(&self) -> Batching {
        Batching::PerUtterance
    }

    /// Native output rate, also used for locally generated pause silence.
    fn sample_rate(&self) -> u32;
}
