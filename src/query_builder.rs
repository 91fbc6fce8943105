use crate::config::EngineConfig;
use crate::error::{PipelineError, PipelineErrorDescription};
use crate::kana::create_kana;
use crate::model::MoraTiming;
use crate::phonemizer::{AccentPhraseInput, MoraInput};
use crate::types::{AccentPhrase, AudioQuery, Mora};

fn build_mora(input: MoraInput, phrase_index: usize) -> Result<Mora, PipelineError> {
    if input.vowel.is_empty() {
        return Err(PipelineError::phonemization(format!(
            "mora {:?} in accent phrase {} has no vowel",
            input.text, phrase_index
        )));
    }
    if input.consonant.as_deref() == Some("") {
        return Err(PipelineError::phonemization(format!(
            "mora {:?} in accent phrase {} has an empty consonant",
            input.text, phrase_index
        )));
    }

    let consonant_length = input.consonant.as_ref().map(|_| 0.0);
    Ok(Mora {
        text: input.text,
        vowel: input.vowel,
        vowel_length: 0.0,
        pitch: 0.0,
        consonant: input.consonant,
        consonant_length,
    })
}

/// Turn phonemizer output into an editable query with zeroed timing and default scalars.
pub fn build_audio_query(
    phrases: Vec<AccentPhraseInput>,
    is_interrogative: bool,
    config: &EngineConfig,
) -> Result<AudioQuery, PipelineError> {
    if phrases.is_empty() {
        return Err(PipelineError::new(PipelineErrorDescription::EmptyInput));
    }

    let phrase_count = phrases.len();
    let mut accent_phrases = Vec::with_capacity(phrase_count);
    for (phrase_index, input) in phrases.into_iter().enumerate() {
        if input.moras.is_empty() {
            return Err(PipelineError::phonemization(format!("accent phrase {} has no moras", phrase_index)));
        }
        let mora_count = input.moras.len();
        if input.accent < 1 || input.accent > mora_count {
            return Err(PipelineError::new(PipelineErrorDescription::InvalidAccent {
                phrase_index,
                accent: input.accent,
                mora_count,
            }));
        }

        let moras = input
            .moras
            .into_iter()
            .map(|mora| build_mora(mora, phrase_index))
            .collect::<Result<Vec<_>, _>>()?;

        accent_phrases.push(AccentPhrase {
            moras,
            accent: input.accent,
            pause_mora: input.has_pause.then(Mora::pause),
            is_interrogative: is_interrogative && phrase_index + 1 == phrase_count,
        });
    }

    let kana = create_kana(&accent_phrases);
    log::debug!("Built audio query with {} accent phrases: {}", accent_phrases.len(), kana);

    Ok(AudioQuery {
        accent_phrases,
        speed_scale: 1.0,
        pitch_scale: 0.0,
        intonation_scale: 1.0,
        volume_scale: 1.0,
        pre_phoneme_length: config.pre_phoneme_length,
        post_phoneme_length: config.post_phoneme_length,
        pause_length: None,
        pause_length_scale: config.pause_length_scale,
        output_sampling_rate: config.output_sampling_rate,
        output_stereo: false,
        kana: Some(kana),
    })
}

/// Copy model-predicted lengths and pitches into a new query, in `AudioQuery::moras` order.
pub fn fill_timing(query: &AudioQuery, timings: &[MoraTiming]) -> Result<AudioQuery, PipelineError> {
    let expected = query.moras().count();
    if timings.len() != expected {
        return Err(PipelineError::model(format!(
            "predicted {} mora timings for {} moras",
            timings.len(),
            expected
        )));
    }

    let mut filled = query.clone();
    for (index, (mora, timing)) in filled.moras_mut().zip(timings).enumerate() {
        timing.validate().map_err(|msg| PipelineError::model(format!("mora {}: {}", index, msg)))?;
        mora.vowel_length = timing.vowel_length;
        mora.pitch = if mora.is_pause() { 0.0 } else { timing.pitch };
        mora.consonant_length = match mora.consonant {
            Some(_) => Some(timing.consonant_length.unwrap_or(0.0)),
            None => None,
        };
    }
    Ok(filled)
}
