//! VOICEVOX core as phonemizer and acoustic model.

use std::ffi::CString;
use std::path::Path;

use parking_lot::Mutex;
use vvcore::{AccelerationMode, AudioQueryOptions, VoicevoxCore};

use crate::config::DEFAULT_SAMPLING_RATE;
use crate::error::PipelineError;
use crate::kana::create_kana;
use crate::model::{AcousticModel, MoraTiming};
use crate::phonemizer::{AccentPhraseInput, MoraInput, Phonemizer};
use crate::renderer::Batching;
use crate::types::{AccentPhrase, AudioQuery, RenderedSegment};

pub struct VoicevoxModel {
    core: Mutex<VoicevoxCore>,
    speaker_id: u32,
}

impl VoicevoxModel {
    pub fn load<P: AsRef<Path>>(open_jtalk_dict_dir: P, speaker_id: u32) -> Result<Self, PipelineError> {
        let dir = open_jtalk_dict_dir
            .as_ref()
            .to_str()
            .and_then(|dir| CString::new(dir).ok())
            .ok_or_else(|| PipelineError::model("Failed to convert path to CString"))?;
        let core = VoicevoxCore::new_from_options(AccelerationMode::Auto, 0, true, dir.as_c_str())
            .map_err(|e| PipelineError::model(VoicevoxCore::error_result_to_message(e)))?;
        log::info!("VOICEVOX core loaded (speaker {})", speaker_id);
        Ok(Self {
            core: Mutex::new(core),
            speaker_id,
        })
    }

    fn core_audio_query(&self, text: &str, kana: bool) -> Result<AudioQuery, String> {
        let core = self.core.lock();
        let json = core
            .audio_query(text, self.speaker_id, AudioQueryOptions { kana })
            .map_err(|e| VoicevoxCore::error_result_to_message(e).to_string())?;
        serde_json::from_str(json.as_str()).map_err(|e| format!("Failed to parse JSON: {}", e))
    }
}

impl Phonemizer for VoicevoxModel {
    fn phonemize(&self, text: &str) -> Result<Vec<AccentPhraseInput>, PipelineError> {
        let query = self.core_audio_query(text, false).map_err(PipelineError::phonemization)?;
        Ok(query
            .accent_phrases
            .into_iter()
            .map(|phrase| AccentPhraseInput {
                moras: phrase
                    .moras
                    .into_iter()
                    .map(|mora| MoraInput {
                        text: mora.text,
                        consonant: mora.consonant,
                        vowel: mora.vowel,
                    })
                    .collect(),
                accent: phrase.accent,
                has_pause: phrase.pause_mora.is_some(),
            })
            .collect())
    }
}

impl AcousticModel for VoicevoxModel {
    fn predict_timing(&self, phrases: &[AccentPhrase]) -> Result<Vec<MoraTiming>, PipelineError> {
        let kana = create_kana(phrases);
        let predicted = self.core_audio_query(&kana, true).map_err(PipelineError::model)?;
        Ok(predicted
            .moras()
            .map(|mora| MoraTiming {
                consonant_length: mora.consonant_length,
                vowel_length: mora.vowel_length,
                pitch: mora.pitch,
            })
            .collect())
    }

    fn render(&self, phrases: &[AccentPhrase]) -> Result<RenderedSegment, PipelineError> {
        // edits are already applied, so the core gets a neutral query
        let query = AudioQuery {
            accent_phrases: phrases.to_vec(),
            speed_scale: 1.0,
            pitch_scale: 0.0,
            intonation_scale: 1.0,
            volume_scale: 1.0,
            pre_phoneme_length: 0.0,
            post_phoneme_length: 0.0,
            pause_length: None,
            pause_length_scale: 1.0,
            output_sampling_rate: DEFAULT_SAMPLING_RATE,
            output_stereo: false,
            kana: None,
        };
        let json = serde_json::to_string(&query).map_err(|e| PipelineError::model(e.to_string()))?;
        log::debug!("Synthesizing with JSON: {}", json);

        let wav = {
            let core = self.core.lock();
            core.synthesis(&json, self.speaker_id, vvcore::SynthesisOptions { enable_interrogative_upspeak: false })
                .map_err(|e| PipelineError::model(VoicevoxCore::error_result_to_message(e)))?
                .as_slice()
                .to_owned()
        };
        RenderedSegment::from_wav_bytes(&wav).map_err(|e| PipelineError::model(format!("Failed to decode WAV: {}", e)))
    }

    fn batching(&self) -> Batching {
        Batching::PerUtterance
    }

    fn sample_rate(&self) -> u32 {
        DEFAULT_SAMPLING_RATE
    }
}
