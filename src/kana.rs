//! AquesTalk-like kana notation.
//!
//! Accent phrases are separated by `/` (no pause) or `、` (pause). Inside a
//! phrase `'` follows the accented mora, `_` precedes a devoiced mora and a
//! trailing `？` marks the phrase as interrogative.
//!
//! ```text
//! コンニチワ'/キョ'ウワ、イ'イ_テンキデス？
//! ```

use crate::error::PipelineError;
use crate::mora_table::{lookup_text, MAX_MORA_CHARS};
use crate::phonemizer::{AccentPhraseInput, MoraInput, Phonemizer};
use crate::types::{AccentPhrase, Mora};

const ACCENT_SYMBOL: char = '\'';
const UNVOICE_SYMBOL: char = '_';
const NOPAUSE_DELIMITER: char = '/';
const PAUSE_DELIMITER: char = '、';
const INTERROGATION_MARK: char = '？';

const DEVOICEABLE_VOWELS: [&str; 5] = ["a", "i", "u", "e", "o"];

fn kana_error(msg: String) -> PipelineError {
    PipelineError::phonemization(msg)
}

fn parse_phrase(phrase: &[char], position: usize) -> Result<AccentPhrase, PipelineError> {
    let mut moras: Vec<Mora> = Vec::new();
    let mut accent = None;
    let mut index = 0;

    while index < phrase.len() {
        if phrase[index] == ACCENT_SYMBOL {
            if moras.is_empty() {
                return Err(kana_error(format!("accent cannot be set at the beginning of phrase {}", position)));
            }
            if accent.is_some() {
                return Err(kana_error(format!("accent is set twice in phrase {}", position)));
            }
            accent = Some(moras.len());
            index += 1;
            continue;
        }

        let unvoiced = phrase[index] == UNVOICE_SYMBOL;
        let start = if unvoiced { index + 1 } else { index };

        // longest table match first
        let matched = (1..=MAX_MORA_CHARS)
            .rev()
            .filter(|len| start + len <= phrase.len())
            .find_map(|len| {
                let text = phrase[start..start + len].iter().collect::<String>();
                lookup_text(&text).map(|phonemes| (text, len, phonemes))
            });

        let (text, len, (consonant, vowel)) = match matched {
            Some(matched) => matched,
            None => {
                let rest = phrase[index..].iter().collect::<String>();
                return Err(kana_error(format!("unknown text in phrase {}: {}", position, rest)));
            }
        };

        let vowel = if unvoiced {
            if !DEVOICEABLE_VOWELS.contains(&vowel) {
                return Err(kana_error(format!("mora {} cannot be devoiced in phrase {}", text, position)));
            }
            vowel.to_uppercase()
        } else {
            vowel.to_string()
        };

        moras.push(Mora {
            text,
            vowel,
            vowel_length: 0.0,
            pitch: 0.0,
            consonant: consonant.map(str::to_string),
            consonant_length: consonant.map(|_| 0.0),
        });
        index = start + len;
    }

    let accent = accent.ok_or_else(|| kana_error(format!("accent is missing in phrase {}", position)))?;

    Ok(AccentPhrase {
        moras,
        accent,
        pause_mora: None,
        is_interrogative: false,
    })
}

/// Parse kana notation into accent phrases with zeroed timing.
pub fn parse_kana(text: &str) -> Result<Vec<AccentPhrase>, PipelineError> {
    let chars = text.chars().collect::<Vec<_>>();
    if chars.is_empty() {
        return Err(kana_error("phrase 1 is empty".to_string()));
    }

    let mut phrases = Vec::new();
    let mut base = 0;
    for i in 0..=chars.len() {
        let delimiter = chars.get(i).copied();
        if !matches!(delimiter, None | Some(PAUSE_DELIMITER) | Some(NOPAUSE_DELIMITER)) {
            continue;
        }
        let position = phrases.len() + 1;
        let mut phrase = &chars[base..i];
        base = i + 1;
        if phrase.is_empty() {
            return Err(kana_error(format!("phrase {} is empty", position)));
        }

        let is_interrogative = phrase.contains(&INTERROGATION_MARK);
        if is_interrogative {
            if phrase[..phrase.len() - 1].contains(&INTERROGATION_MARK) {
                return Err(kana_error(format!("interrogation mark must be at the end of phrase {}", position)));
            }
            phrase = &phrase[..phrase.len() - 1];
        }

        let mut accent_phrase = parse_phrase(phrase, position)?;
        accent_phrase.is_interrogative = is_interrogative;
        if delimiter == Some(PAUSE_DELIMITER) {
            accent_phrase.pause_mora = Some(Mora::pause());
        }
        phrases.push(accent_phrase);
    }

    Ok(phrases)
}

/// Render accent phrases back into kana notation.
pub fn create_kana(accent_phrases: &[AccentPhrase]) -> String {
    let mut text = String::new();
    for (i, phrase) in accent_phrases.iter().enumerate() {
        for (j, mora) in phrase.moras.iter().enumerate() {
            if matches!(mora.vowel.as_str(), "A" | "I" | "U" | "E" | "O") {
                text.push(UNVOICE_SYMBOL);
            }
            text.push_str(&mora.text);
            if j + 1 == phrase.accent {
                text.push(ACCENT_SYMBOL);
            }
        }
        if phrase.is_interrogative {
            text.push(INTERROGATION_MARK);
        }
        if i + 1 < accent_phrases.len() {
            text.push(if phrase.pause_mora.is_some() { PAUSE_DELIMITER } else { NOPAUSE_DELIMITER });
        }
    }
    text
}

/// Phonemizer reading kana notation instead of plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct KanaPhonemizer;

impl Phonemizer for KanaPhonemizer {
    fn phonemize(&self, text: &str) -> Result<Vec<AccentPhraseInput>, PipelineError> {
        let phrases = parse_kana(text.trim())?;
        Ok(phrases
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

    fn is_interrogative(&self, text: &str) -> bool {
        text.trim_end().ends_with(INTERROGATION_MARK)
    }
}
