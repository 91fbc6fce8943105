//! Scalar edits applied to a predicted audio query before rendering.

use crate::error::PipelineError;
use crate::mora_table::lookup_phonemes;
use crate::types::{AccentPhrase, AudioQuery, Mora};

const UPSPEAK_LENGTH: f64 = 0.15;
const UPSPEAK_PITCH_ADD: f64 = 0.3;
const UPSPEAK_PITCH_MAX: f64 = 6.5;
/// Lowest log-F0 a voiced mora keeps after intonation and pitch edits.
pub const MIN_VOICED_PITCH: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthesisOptions {
    /// Raise the end of interrogative phrases with an extra mora.
    pub enable_interrogative_upspeak: bool,
}

fn check(field: &str, value: f64, ok: bool) -> Result<(), PipelineError> {
    if value.is_finite() && ok {
        Ok(())
    } else {
        Err(PipelineError::invalid_parameter(field, value))
    }
}

/// Reject scalars and mora values the transform cannot work with.
pub fn validate(query: &AudioQuery) -> Result<(), PipelineError> {
    check("speed_scale", query.speed_scale, query.speed_scale > 0.0)?;
    check("pitch_scale", query.pitch_scale, true)?;
    check("intonation_scale", query.intonation_scale, query.intonation_scale >= 0.0)?;
    check("volume_scale", query.volume_scale, query.volume_scale >= 0.0)?;
    check("pre_phoneme_length", query.pre_phoneme_length, query.pre_phoneme_length >= 0.0)?;
    check("post_phoneme_length", query.post_phoneme_length, query.post_phoneme_length >= 0.0)?;
    check("pause_length_scale", query.pause_length_scale, query.pause_length_scale > 0.0)?;
    if let Some(pause_length) = query.pause_length {
        check("pause_length", pause_length, pause_length >= 0.0)?;
    }
    if query.output_sampling_rate == 0 {
        return Err(PipelineError::invalid_parameter("output_sampling_rate", 0.0));
    }

    for (index, mora) in query.moras().enumerate() {
        check(&format!("moras[{}].vowel_length", index), mora.vowel_length, mora.vowel_length >= 0.0)?;
        if let Some(length) = mora.consonant_length {
            check(&format!("moras[{}].consonant_length", index), length, length >= 0.0)?;
        }
        check(&format!("moras[{}].pitch", index), mora.pitch, true)?;
    }
    Ok(())
}

fn apply_interrogative_upspeak(accent_phrases: &mut [AccentPhrase]) {
    for phrase in accent_phrases.iter_mut().filter(|phrase| phrase.is_interrogative) {
        let last = match phrase.moras.last() {
            Some(last) if last.is_voiced() => last,
            _ => continue,
        };
        let vowel = last.vowel.clone();
        let text = lookup_phonemes(None, &vowel).unwrap_or(last.text.as_str()).to_string();
        let mora = Mora {
            text,
            vowel,
            vowel_length: UPSPEAK_LENGTH,
            pitch: (last.pitch + UPSPEAK_PITCH_ADD).min(UPSPEAK_PITCH_MAX),
            consonant: None,
            consonant_length: None,
        };
        phrase.moras.push(mora);
    }
}

fn apply_intonation_scale(query: &mut AudioQuery, voiced: &[bool]) {
    let pitches = query.moras().zip(voiced).filter(|(_, &v)| v).map(|(m, _)| m.pitch).collect::<Vec<_>>();
    if pitches.is_empty() {
        return;
    }
    let mean = pitches.iter().sum::<f64>() / pitches.len() as f64;
    let scale = query.intonation_scale;
    if scale == 1.0 {
        // keep pitches bit-exact
        return;
    }
    for (mora, _) in query.moras_mut().zip(voiced).filter(|(_, &v)| v) {
        mora.pitch = mean + (mora.pitch - mean) * scale;
    }
}

/// Shift voiced moras. A result below [`MIN_VOICED_PITCH`] is raised to it,
/// so a voiced mora never lands on the zero pitch that marks unvoiced ones.
fn apply_pitch_shift(query: &mut AudioQuery, voiced: &[bool]) {
    let shift = query.pitch_scale;
    if shift == 0.0 && query.intonation_scale == 1.0 {
        return;
    }
    let mut floored = 0;
    for (mora, _) in query.moras_mut().zip(voiced).filter(|(_, &v)| v) {
        mora.pitch += shift;
        if mora.pitch < MIN_VOICED_PITCH {
            mora.pitch = MIN_VOICED_PITCH;
            floored += 1;
        }
    }
    if floored > 0 {
        log::warn!("{} voiced moras dropped below pitch {} after editing; raised to it", floored, MIN_VOICED_PITCH);
    }
}

fn apply_pause_length(query: &mut AudioQuery) {
    if query.pause_length.is_some() && query.pause_length_scale != 1.0 {
        log::warn!(
            "Both pause_length and pause_length_scale ({}) are set; pause_length takes precedence",
            query.pause_length_scale
        );
    }
    let (pause_length, scale) = (query.pause_length, query.pause_length_scale);
    for mora in query.moras_mut().filter(|m| m.is_pause()) {
        mora.vowel_length = match pause_length {
            Some(length) => length,
            None => mora.vowel_length * scale,
        };
    }
}

fn apply_speed_scale(query: &mut AudioQuery) {
    let speed = query.speed_scale;
    for mora in query.moras_mut() {
        mora.vowel_length /= speed;
        if let Some(length) = mora.consonant_length.as_mut() {
            *length /= speed;
        }
    }
}

/// Apply the query's own scalar parameters to its moras.
///
/// Returns a new query; the scalar fields are carried over unchanged so the
/// assembler can still read volume, silence, rate and channel layout.
pub fn apply(query: &AudioQuery, options: &SynthesisOptions) -> Result<AudioQuery, PipelineError> {
    validate(query)?;

    let mut query = query.clone();
    if options.enable_interrogative_upspeak {
        apply_interrogative_upspeak(&mut query.accent_phrases);
    }
    let voiced = query.moras().map(|m| m.is_voiced()).collect::<Vec<_>>();
    // intonation must see the pitch before it is shifted
    apply_intonation_scale(&mut query, &voiced);
    apply_pitch_shift(&mut query, &voiced);
    apply_pause_length(&mut query);
    apply_speed_scale(&mut query);

    log::debug!(
        "Transformed query: speed={} pitch={} intonation={} spoken={:.3}s",
        query.speed_scale,
        query.pitch_scale,
        query.intonation_scale,
        query.phoneme_duration()
    );
    Ok(query)
}
