use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::PipelineError;
use crate::model::AcousticModel;
use crate::types::{AccentPhrase, AudioQuery, IndexedSegment, RenderedSegment};

/// How an utterance is split into model calls.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Batching {
    /// One call for the whole utterance, pauses rendered by the model.
    PerUtterance,
    /// One call per accent phrase, pauses inserted as local silence.
    PerAccentPhrase,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderUnit {
    Speech { index: usize, phrases: Vec<AccentPhrase> },
    Silence { index: usize, seconds: f64 },
}

impl RenderUnit {
    pub fn index(&self) -> usize {
        match self {
            Self::Speech { index, .. } | Self::Silence { index, .. } => *index,
        }
    }
}

pub fn partition(query: &AudioQuery, batching: Batching) -> Vec<RenderUnit> {
    match batching {
        Batching::PerUtterance => vec![RenderUnit::Speech {
            index: 0,
            phrases: query.accent_phrases.clone(),
        }],
        Batching::PerAccentPhrase => {
            let mut units = Vec::new();
            for phrase in &query.accent_phrases {
                let mut speech = phrase.clone();
                let pause = speech.pause_mora.take();
                units.push(RenderUnit::Speech {
                    index: units.len(),
                    phrases: vec![speech],
                });
                if let Some(pause) = pause.filter(|pause| pause.vowel_length > 0.0) {
                    units.push(RenderUnit::Silence {
                        index: units.len(),
                        seconds: pause.vowel_length,
                    });
                }
            }
            units
        }
    }
}

fn check_segment(segment: RenderedSegment) -> Result<RenderedSegment, PipelineError> {
    if segment.sample_rate == 0 {
        return Err(PipelineError::model("segment has a zero sample rate"));
    }
    if segment.channels == 0 {
        return Err(PipelineError::model("segment has no channels"));
    }
    Ok(segment)
}

fn render_unit(model: &dyn AcousticModel, unit: &RenderUnit) -> Result<IndexedSegment, PipelineError> {
    let index = unit.index();
    let segment = match unit {
        RenderUnit::Speech { phrases, .. } => {
            log::debug!("Rendering unit {} ({} accent phrases)", index, phrases.len());
            model.render(phrases).and_then(check_segment)
        }
        RenderUnit::Silence { seconds, .. } => Ok(RenderedSegment::silence(*seconds, model.sample_rate())),
    };
    segment
        .map(|segment| IndexedSegment { index, segment })
        .map_err(|err| PipelineError::synthesis(index, err))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Render one unit, turning a panicking model into a failure of that unit.
fn render_unit_caught(model: &dyn AcousticModel, unit: &RenderUnit) -> Result<IndexedSegment, (usize, PipelineError)> {
    let index = unit.index();
    match panic::catch_unwind(AssertUnwindSafe(|| render_unit(model, unit))) {
        Ok(result) => result.map_err(|err| (index, err)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("Model panicked while rendering unit {}: {}", index, message);
            Err((index, PipelineError::synthesis(index, PipelineError::model(format!("model panicked: {}", message)))))
        }
    }
}

/// Keep the error of the lowest failing unit so repeated runs report the same index.
fn first_failure(results: Vec<Result<IndexedSegment, (usize, PipelineError)>>) -> Result<Vec<IndexedSegment>, PipelineError> {
    let mut segments = Vec::with_capacity(results.len());
    let mut failure: Option<(usize, PipelineError)> = None;
    for result in results {
        match result {
            Ok(segment) => segments.push(segment),
            Err((index, err)) => {
                if failure.as_ref().map_or(true, |(first, _)| index < *first) {
                    failure = Some((index, err));
                }
            }
        }
    }
    match failure {
        Some((_, err)) => Err(err),
        None => Ok(segments),
    }
}

fn worker_count(units: usize) -> usize {
    let available = std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(4);
    available.min(units).max(1)
}

/// Render every unit on scoped threads, at most one per available core.
/// Segments come back grouped by worker, not in unit order.
pub fn render_blocking(model: &dyn AcousticModel, units: &[RenderUnit]) -> Result<Vec<IndexedSegment>, PipelineError> {
    let workers = worker_count(units.len());
    log::debug!("Rendering {} units on {} threads", units.len(), workers);

    let results = std::thread::scope(|scope| {
        let handles = (0..workers)
            .map(|worker| {
                scope.spawn(move || {
                    units
                        .iter()
                        .skip(worker)
                        .step_by(workers)
                        .map(|unit| render_unit_caught(model, unit))
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .enumerate()
            .flat_map(|(worker, handle)| match handle.join() {
                Ok(results) => results,
                // every unit is caught on its own, so this only covers the worker itself
                Err(_) => units
                    .iter()
                    .skip(worker)
                    .step_by(workers)
                    .map(|unit| {
                        let index = unit.index();
                        Err((index, PipelineError::synthesis(index, PipelineError::model("render thread panicked"))))
                    })
                    .collect(),
            })
            .collect::<Vec<_>>()
    });
    first_failure(results)
}

/// Render every unit on the blocking pool.
///
/// Dropping the returned future drops the set: units not yet started never run,
/// and the output of units already running is discarded unseen.
pub async fn render(model: Arc<dyn AcousticModel>, units: Vec<RenderUnit>) -> Result<Vec<IndexedSegment>, PipelineError> {
    let mut set = JoinSet::new();
    for unit in units {
        let model = model.clone();
        set.spawn_blocking(move || render_unit_caught(model.as_ref(), &unit));
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => {
                log::error!("Render task failed: {}", err);
                return Err(PipelineError::model(format!("render task failed: {}", err)));
            }
        }
    }
    first_failure(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineErrorDescription;
    use crate::model::MoraTiming;
    use crate::types::Mora;

    struct Counting {
        fail_on: Option<String>,
    }

    impl AcousticModel for Counting {
        fn predict_timing(&self, _phrases: &[AccentPhrase]) -> Result<Vec<MoraTiming>, PipelineError> {
            Ok(Vec::new())
        }

        fn render(&self, phrases: &[AccentPhrase]) -> Result<RenderedSegment, PipelineError> {
            if phrases.iter().flat_map(|p| &p.moras).any(|m| Some(&m.text) == self.fail_on.as_ref()) {
                return Err(PipelineError::model("boom"));
            }
            let moras = phrases.iter().map(|p| p.moras.len() + p.pause_mora.iter().count()).sum::<usize>();
            Ok(RenderedSegment { samples: vec![0.5; moras * 10], sample_rate: 1000, channels: 1 })
        }

        fn sample_rate(&self) -> u32 {
            1000
        }
    }

    fn phrase(text: &str, pause: Option<f64>) -> AccentPhrase {
        AccentPhrase {
            moras: vec![Mora { text: text.to_string(), vowel: "a".to_string(), vowel_length: 0.1, pitch: 5.0, consonant: None, consonant_length: None }],
            accent: 1,
            pause_mora: pause.map(|length| Mora { vowel_length: length, ..Mora::pause() }),
            is_interrogative: false,
        }
    }

    fn query(phrases: Vec<AccentPhrase>) -> AudioQuery {
        AudioQuery {
            accent_phrases: phrases,
            speed_scale: 1.0,
            pitch_scale: 0.0,
            intonation_scale: 1.0,
            volume_scale: 1.0,
            pre_phoneme_length: 0.0,
            post_phoneme_length: 0.0,
            pause_length: None,
            pause_length_scale: 1.0,
            output_sampling_rate: 1000,
            output_stereo: false,
            kana: None,
        }
    }

    #[test]
    fn test_partition_per_utterance() {
        let q = query(vec![phrase("ア", Some(0.2)), phrase("イ", None)]);
        let units = partition(&q, Batching::PerUtterance);
        assert_eq!(units.len(), 1);
        match &units[0] {
            RenderUnit::Speech { index, phrases } => {
                assert_eq!(*index, 0);
                assert!(phrases[0].pause_mora.is_some());
            }
            other => panic!("unexpected unit {:?}", other),
        }
    }

    #[test]
    fn test_partition_per_phrase_inserts_silence() {
        let q = query(vec![phrase("ア", Some(0.2)), phrase("イ", Some(0.0)), phrase("ウ", None)]);
        let units = partition(&q, Batching::PerAccentPhrase);
        assert_eq!(units.len(), 4);
        assert_eq!(units[1], RenderUnit::Silence { index: 1, seconds: 0.2 });
        match &units[2] {
            RenderUnit::Speech { index, phrases } => {
                assert_eq!(*index, 2);
                assert!(phrases[0].pause_mora.is_none());
            }
            other => panic!("unexpected unit {:?}", other),
        }
        assert_eq!(units.iter().map(RenderUnit::index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_render_blocking() {
        let model = Counting { fail_on: None };
        let q = query(vec![phrase("ア", Some(0.2)), phrase("イ", None)]);
        let units = partition(&q, Batching::PerAccentPhrase);
        let mut segments = render_blocking(&model, &units).unwrap();
        segments.sort_by_key(|s| s.index);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].segment.samples, vec![0.0; 200]);
        assert_eq!(segments[2].segment.samples.len(), 10);
    }

    #[test]
    fn test_render_failure_reports_lowest_unit() {
        let model = Counting { fail_on: Some("イ".to_string()) };
        let q = query(vec![phrase("ア", Some(0.2)), phrase("イ", None), phrase("イ", None)]);
        let units = partition(&q, Batching::PerAccentPhrase);
        let err = render_blocking(&model, &units).unwrap_err();
        match err.as_inner() {
            PipelineErrorDescription::Synthesis { unit_index, source } => {
                assert_eq!(*unit_index, 2);
                assert!(matches!(source.as_inner(), PipelineErrorDescription::Model(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_render_async_matches_blocking() {
        let model: Arc<dyn AcousticModel> = Arc::new(Counting { fail_on: None });
        let q = query(vec![phrase("ア", Some(0.2)), phrase("イ", None), phrase("ウ", Some(0.1))]);
        let units = partition(&q, Batching::PerAccentPhrase);
        let mut blocking = render_blocking(model.as_ref(), &units).unwrap();
        let mut parallel = render(model, units).await.unwrap();
        blocking.sort_by_key(|s| s.index);
        parallel.sort_by_key(|s| s.index);
        assert_eq!(blocking, parallel);
    }

    struct Panicking;

    impl AcousticModel for Panicking {
        fn predict_timing(&self, _phrases: &[AccentPhrase]) -> Result<Vec<MoraTiming>, PipelineError> {
            Ok(Vec::new())
        }

        fn render(&self, phrases: &[AccentPhrase]) -> Result<RenderedSegment, PipelineError> {
            if phrases.iter().flat_map(|p| &p.moras).any(|m| m.text == "イ") {
                panic!("vocoder crashed");
            }
            Ok(RenderedSegment { samples: vec![0.5; 10], sample_rate: 1000, channels: 1 })
        }

        fn sample_rate(&self) -> u32 {
            1000
        }
    }

    fn assert_unit_failure(err: &PipelineError, expected: usize) {
        match err.as_inner() {
            PipelineErrorDescription::Synthesis { unit_index, source } => {
                assert_eq!(*unit_index, expected);
                assert!(source.to_string().contains("vocoder crashed"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_model_names_the_unit() {
        let model: Arc<dyn AcousticModel> = Arc::new(Panicking);
        let q = query(vec![phrase("ア", Some(0.2)), phrase("イ", None), phrase("イ", None)]);
        let units = partition(&q, Batching::PerAccentPhrase);

        let err = render_blocking(model.as_ref(), &units).unwrap_err();
        assert_unit_failure(&err, 2);
        let err = render(model, units).await.unwrap_err();
        assert_unit_failure(&err, 2);
    }

    #[test]
    fn test_render_blocking_many_units() {
        let model = Counting { fail_on: None };
        let phrases = (0..200).map(|i| phrase("ア", if i % 2 == 0 { Some(0.01) } else { None })).collect();
        let units = partition(&query(phrases), Batching::PerAccentPhrase);
        assert_eq!(units.len(), 300);
        assert!(worker_count(units.len()) <= units.len());
        let mut segments = render_blocking(&model, &units).unwrap();
        segments.sort_by_key(|s| s.index);
        assert!(segments.iter().enumerate().all(|(i, s)| s.index == i));
        assert_eq!(worker_count(0), 1);
    }

    #[tokio::test]
    async fn test_render_async_failure() {
        let model: Arc<dyn AcousticModel> = Arc::new(Counting { fail_on: Some("ア".to_string()) });
        let q = query(vec![phrase("ア", None)]);
        let err = render(model, partition(&q, Batching::PerUtterance)).await.unwrap_err();
        assert_eq!(err.error_name(), "SynthesisError");
    }
}
