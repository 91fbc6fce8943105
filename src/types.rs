use std::io::Cursor;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Vowel phoneme used for pause moras.
pub const PAUSE_VOWEL: &str = "pau";

/// Pronunciation text of a pause mora.
pub const PAUSE_TEXT: &str = "、";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioQuery {
    pub accent_phrases: Vec<AccentPhrase>,
    #[serde(alias = "speedScale")]
    pub speed_scale: f64,
    #[serde(alias = "pitchScale")]
    pub pitch_scale: f64,
    #[serde(alias = "intonationScale")]
    pub intonation_scale: f64,
    #[serde(alias = "volumeScale")]
    pub volume_scale: f64,
    #[serde(alias = "prePhonemeLength")]
    pub pre_phoneme_length: f64,
    #[serde(alias = "postPhonemeLength")]
    pub post_phoneme_length: f64,
    #[serde(default, alias = "pauseLength")]
    pub pause_length: Option<f64>,
    #[serde(default = "default_pause_length_scale", alias = "pauseLengthScale")]
    pub pause_length_scale: f64,
    #[serde(alias = "outputSamplingRate")]
    pub output_sampling_rate: u32,
    #[serde(alias = "outputStereo")]
    pub output_stereo: bool,
    #[serde(default)]
    pub kana: Option<String>,
}

fn default_pause_length_scale() -> f64 {
    1.0
}

impl AudioQuery {
    /// All moras in utterance order, each phrase followed by its pause mora.
    pub fn moras(&self) -> impl Iterator<Item = &Mora> {
        self.accent_phrases.iter().flat_map(|phrase| phrase.moras.iter().chain(phrase.pause_mora.iter()))
    }

    pub fn moras_mut(&mut self) -> impl Iterator<Item = &mut Mora> {
        self.accent_phrases.iter_mut().flat_map(|phrase| phrase.moras.iter_mut().chain(phrase.pause_mora.iter_mut()))
    }

    /// Spoken length in seconds: every mora plus every pause, without the leading/trailing silence.
    pub fn phoneme_duration(&self) -> f64 {
        self.moras().map(Mora::duration).sum()
    }

    pub fn total_duration(&self) -> f64 {
        self.pre_phoneme_length + self.phoneme_duration() + self.post_phoneme_length
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccentPhrase {
    pub moras: Vec<Mora>,
    /// 1-based index of the accented mora.
    pub accent: usize,
    pub pause_mora: Option<Mora>,
    #[serde(default)]
    pub is_interrogative: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Mora {
    pub text: String,
    pub vowel: String,
    pub vowel_length: f64,
    pub pitch: f64,
    pub consonant: Option<String>,
    pub consonant_length: Option<f64>,
}

impl Mora {
    pub fn pause() -> Self {
        Self {
            text: PAUSE_TEXT.to_string(),
            vowel: PAUSE_VOWEL.to_string(),
            vowel_length: 0.0,
            pitch: 0.0,
            consonant: None,
            consonant_length: None,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.pitch != 0.0
    }

    pub fn is_pause(&self) -> bool {
        self.vowel == PAUSE_VOWEL
    }

    pub fn duration(&self) -> f64 {
        self.consonant_length.unwrap_or(0.0) + self.vowel_length
    }
}

/// Raw model output for one render unit, interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RenderedSegment {
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let len = (seconds * sample_rate as f64).round().max(0.0) as usize;
        Self {
            samples: vec![0.0; len],
            sample_rate,
            channels: 1,
        }
    }

    /// Decode a PCM or float WAV file, keeping its native rate and channel layout.
    pub fn from_wav_bytes(wav: &[u8]) -> Result<Self, hound::Error> {
        let reader = hound::WavReader::new(Cursor::new(wav))?;
        let spec = reader.spec();
        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            (hound::SampleFormat::Int, bits @ 8..=32) => {
                let scale = (1i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|s| s as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
            _ => return Err(hound::Error::Unsupported),
        };
        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// A rendered segment tagged with the position of its unit in the utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSegment {
    pub index: usize,
    pub segment: RenderedSegment,
}

/// Final synthesized audio, interleaved `f32` samples in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Waveform {
    pub const BITS_PER_SAMPLE: u16 = 16;

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: Self::BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        }
    }

    fn write_samples<W>(&self, writer: &mut hound::WavWriter<W>) -> Result<(), hound::Error>
    where
        W: std::io::Write + std::io::Seek,
    {
        for &sample in &self.samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)?;
        }
        Ok(())
    }

    /// Encode as a 16-bit PCM WAV file in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec())?;
            self.write_samples(&mut writer)?;
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
        self.write_samples(&mut writer)?;
        writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mora(text: &str, consonant: Option<&str>, vowel: &str, length: f64, pitch: f64) -> Mora {
        Mora {
            text: text.to_string(),
            vowel: vowel.to_string(),
            vowel_length: length,
            pitch,
            consonant: consonant.map(str::to_string),
            consonant_length: consonant.map(|_| 0.05),
        }
    }

    #[test]
    fn test_query_durations() {
        let mut pause = Mora::pause();
        pause.vowel_length = 0.3;
        let query = AudioQuery {
            accent_phrases: vec![AccentPhrase {
                moras: vec![mora("カ", Some("k"), "a", 0.1, 5.5), mora("ン", None, "N", 0.1, 5.4)],
                accent: 1,
                pause_mora: Some(pause),
                is_interrogative: false,
            }],
            speed_scale: 1.0,
            pitch_scale: 0.0,
            intonation_scale: 1.0,
            volume_scale: 1.0,
            pre_phoneme_length: 0.1,
            post_phoneme_length: 0.2,
            pause_length: None,
            pause_length_scale: 1.0,
            output_sampling_rate: 24000,
            output_stereo: false,
            kana: None,
        };
        assert_eq!(query.moras().count(), 3);
        assert!((query.phoneme_duration() - 0.55).abs() < 1e-9);
        assert!((query.total_duration() - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_query_accepts_engine_field_names() {
        let json = r#"{
            "accent_phrases": [],
            "speedScale": 1.2,
            "pitchScale": 0.0,
            "intonationScale": 1.0,
            "volumeScale": 1.0,
            "prePhonemeLength": 0.1,
            "postPhonemeLength": 0.1,
            "outputSamplingRate": 24000,
            "outputStereo": false,
            "kana": ""
        }"#;
        let query: AudioQuery = serde_json::from_str(json).unwrap();
        assert_eq!(query.speed_scale, 1.2);
        assert_eq!(query.pause_length, None);
        assert_eq!(query.pause_length_scale, 1.0);
    }

    #[test]
    fn test_wav_bytes_header() {
        let wave = Waveform {
            samples: vec![0.0, 0.5, -0.5, 1.5],
            sample_rate: 24000,
            channels: 2,
        };
        assert_eq!(wave.frames(), 2);
        let bytes = wave.to_wav_bytes().unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 24000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples = reader.into_samples::<i16>().map(|s| s.unwrap()).collect::<Vec<_>>();
        assert_eq!(samples, vec![0, 16384, -16384, i16::MAX]);
    }

    #[test]
    fn test_segment_from_wav_bytes() {
        let wave = Waveform {
            samples: vec![0.0, 0.5, -0.5],
            sample_rate: 24000,
            channels: 1,
        };
        let segment = RenderedSegment::from_wav_bytes(&wave.to_wav_bytes().unwrap()).unwrap();
        assert_eq!(segment.sample_rate, 24000);
        assert_eq!(segment.channels, 1);
        assert_eq!(segment.frames(), 3);
        assert!((segment.samples[1] - 0.5).abs() < 1e-4);
        assert!((segment.samples[2] + 0.5).abs() < 1e-4);
        assert!(RenderedSegment::from_wav_bytes(b"not a wav").is_err());
    }
}
