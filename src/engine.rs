use std::sync::{Arc, OnceLock};

use crate::assembler;
use crate::config::EngineConfig;
use crate::error::{PipelineError, PipelineErrorDescription};
use crate::model::AcousticModel;
use crate::phonemizer::Phonemizer;
use crate::query_builder::{build_audio_query, fill_timing};
use crate::renderer::{self, partition, Batching};
use crate::transform::{self, SynthesisOptions};
use crate::types::{AudioQuery, Waveform};

static ENGINE: OnceLock<EngineHandle> = OnceLock::new();

/// Entry point for text → query → waveform requests.
///
/// Cheap to clone; every request works on its own query and buffers, so
/// clones can be used from any number of threads or tasks at once.
#[derive(Clone)]
pub struct EngineHandle {
    phonemizer: Arc<dyn Phonemizer>,
    model: Option<Arc<dyn AcousticModel>>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("model_loaded", &self.model.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl EngineHandle {
    /// The handle registered with [`initialize`].
    pub fn new() -> Result<EngineHandle, PipelineError> {
        ENGINE
            .get()
            .cloned()
            .ok_or(PipelineError::new(PipelineErrorDescription::NotInitialized))
    }

    pub fn with_parts(
        phonemizer: Arc<dyn Phonemizer>,
        model: Option<Arc<dyn AcousticModel>>,
        config: EngineConfig,
    ) -> EngineHandle {
        EngineHandle {
            phonemizer,
            model,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn model(&self) -> Result<&Arc<dyn AcousticModel>, PipelineError> {
        self.model.as_ref().ok_or(PipelineError::new(PipelineErrorDescription::NotInitialized))
    }

    fn batching(&self) -> Batching {
        self.model.as_ref().map_or(self.config.batching, |model| model.batching())
    }

    /// Build a query for `text`, with timing predicted when a model is loaded.
    pub fn audio_query_blocking(&self, text: &str) -> Result<AudioQuery, PipelineError> {
        let phrases = self.phonemizer.phonemize(text)?;
        let is_interrogative = self.phonemizer.is_interrogative(text);
        let query = build_audio_query(phrases, is_interrogative, &self.config)?;

        match &self.model {
            Some(model) => {
                let timings = model.predict_timing(&query.accent_phrases)?;
                fill_timing(&query, &timings)
            }
            None => {
                log::warn!("No acoustic model loaded; audio query keeps zero timing");
                Ok(query)
            }
        }
    }

    pub async fn audio_query(&self, text: String) -> Result<AudioQuery, PipelineError> {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.audio_query_blocking(&text))
            .await
            .map_err(|err| PipelineError::model(format!("audio query task failed: {}", err)))?
    }

    pub fn synthesize_blocking(&self, query: &AudioQuery, options: SynthesisOptions) -> Result<Waveform, PipelineError> {
        let model = self.model()?;
        let query = transform::apply(query, &options)?;
        let units = partition(&query, self.batching());
        log::debug!("Rendering {} units", units.len());
        let segments = renderer::render_blocking(model.as_ref(), &units)?;
        assembler::assemble(segments, &query)
    }

    /// Dropping the future cancels the request; nothing partial is returned.
    pub async fn synthesize(&self, query: AudioQuery, options: SynthesisOptions) -> Result<Waveform, PipelineError> {
        let model = self.model()?.clone();
        let query = transform::apply(&query, &options)?;
        let units = partition(&query, self.batching());
        log::debug!("Rendering {} units", units.len());
        let segments = renderer::render(model, units).await?;
        assembler::assemble(segments, &query)
    }

    pub fn tts_blocking(&self, text: &str, options: SynthesisOptions) -> Result<Waveform, PipelineError> {
        let query = self.audio_query_blocking(text)?;
        self.synthesize_blocking(&query, options)
    }

    pub async fn tts(&self, text: String, options: SynthesisOptions) -> Result<Waveform, PipelineError> {
        let query = self.audio_query(text).await?;
        self.synthesize(query, options).await
    }
}

/// Register the process-wide engine handle. Can only happen once.
pub fn initialize(
    phonemizer: Arc<dyn Phonemizer>,
    model: Option<Arc<dyn AcousticModel>>,
    config: EngineConfig,
) -> Result<(), PipelineError> {
    let handle = EngineHandle::with_parts(phonemizer, model, config);
    ENGINE
        .set(handle)
        .map_err(|_| PipelineError::new(PipelineErrorDescription::AlreadyInitialized))
}
