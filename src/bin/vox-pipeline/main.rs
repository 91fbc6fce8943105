#[cfg(feature = "playback")]
pub(crate) mod audio_output;

use vox_pipeline::{self as vox, AcousticModel, AudioQuery, EngineConfig, EngineHandle, KanaPhonemizer, Phonemizer, SynthesisOptions};

use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub(crate) const PKG_DESCRIPTION: &str = "Audio query editing and waveform assembly for VOICEVOX-style synthesis";

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum FrontEnd {
    /// AquesTalk-like kana notation
    Kana,
    /// VOICEVOX core text analysis
    Voicevox,
}

#[derive(Debug, Parser)]
#[command(about = PKG_DESCRIPTION, long_about = None, version)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Speaker ID
    #[arg(long, global = true)]
    speaker_id: Option<u32>,

    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Debug, Args)]
struct QueryParams {
    /// Speed scale
    #[arg(long)]
    speed_scale: Option<f64>,

    /// Pitch shift (log scale)
    #[arg(long, allow_hyphen_values = true)]
    pitch_scale: Option<f64>,

    /// Intonation scale
    #[arg(long)]
    intonation_scale: Option<f64>,

    /// Volume scale
    #[arg(long)]
    volume_scale: Option<f64>,

    /// Silence before speech, in seconds
    #[arg(long)]
    pre_phoneme_length: Option<f64>,

    /// Silence after speech, in seconds
    #[arg(long)]
    post_phoneme_length: Option<f64>,

    /// Fixed pause length, in seconds (wins over --pause-length-scale)
    #[arg(long)]
    pause_length: Option<f64>,

    /// Pause length scale
    #[arg(long)]
    pause_length_scale: Option<f64>,

    /// Output sampling rate
    #[arg(long)]
    output_sampling_rate: Option<u32>,

    /// Stereo output
    #[arg(long)]
    output_stereo: bool,

    /// Raise the end of questions
    #[arg(long)]
    upspeak: bool,
}

impl QueryParams {
    fn apply_to(&self, query: &mut AudioQuery) {
        if let Some(v) = self.speed_scale {
            query.speed_scale = v;
        }
        if let Some(v) = self.pitch_scale {
            query.pitch_scale = v;
        }
        if let Some(v) = self.intonation_scale {
            query.intonation_scale = v;
        }
        if let Some(v) = self.volume_scale {
            query.volume_scale = v;
        }
        if let Some(v) = self.pre_phoneme_length {
            query.pre_phoneme_length = v;
        }
        if let Some(v) = self.post_phoneme_length {
            query.post_phoneme_length = v;
        }
        if self.pause_length.is_some() {
            query.pause_length = self.pause_length;
        }
        if let Some(v) = self.pause_length_scale {
            query.pause_length_scale = v;
        }
        if let Some(v) = self.output_sampling_rate {
            query.output_sampling_rate = v;
        }
        if self.output_stereo {
            query.output_stereo = true;
        }
    }

    fn options(&self) -> SynthesisOptions {
        SynthesisOptions {
            enable_interrogative_upspeak: self.upspeak,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build an audio query from text on stdin and print it as JSON
    AudioQuery {
        /// Text front end
        #[arg(long, value_enum, default_value_t = FrontEnd::Kana)]
        front_end: FrontEnd,
    },

    /// Apply query parameters to an audio query (JSON on stdin) and print the result
    Transform {
        #[command(flatten)]
        params: QueryParams,
    },

    /// Synthesize an audio query (JSON on stdin) into WAV on stdout
    Synthesis {
        #[command(flatten)]
        params: QueryParams,
    },

    /// Synthesize text on stdin into WAV on stdout
    Tts {
        /// Text front end
        #[arg(long, value_enum, default_value_t = FrontEnd::Kana)]
        front_end: FrontEnd,

        #[command(flatten)]
        params: QueryParams,
    },

    /// Play synthesized text sentence by sentence
    #[cfg(feature = "playback")]
    Play {
        /// Text front end
        #[arg(long, value_enum, default_value_t = FrontEnd::Kana)]
        front_end: FrontEnd,

        #[command(flatten)]
        params: QueryParams,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(speaker_id) = args.speaker_id {
        config.speaker_id = speaker_id;
    }

    match args.subcommand {
        Command::AudioQuery { front_end } => {
            let handle = initialize(config, front_end, false)?;
            let query = handle.audio_query_blocking(&read_stdin()?)?;
            write_json(&query)?;
        },

        Command::Transform { params } => {
            let mut query: AudioQuery = serde_json::from_str(&read_stdin()?)?;
            params.apply_to(&mut query);
            let edited = vox::transform::apply(&query, &params.options())?;
            write_json(&edited)?;
        },

        Command::Synthesis { params } => {
            let handle = initialize(config, FrontEnd::Kana, true)?;
            let mut query: AudioQuery = serde_json::from_str(&read_stdin()?)?;
            params.apply_to(&mut query);
            let wave = handle.synthesize_blocking(&query, params.options())?;
            log::info!("Synthesized {:.2}s at {} Hz", wave.duration_secs(), wave.sample_rate);
            std::io::stdout().write_all(&wave.to_wav_bytes()?)?;
        },

        Command::Tts { front_end, params } => {
            let handle = initialize(config, front_end, true)?;
            let mut query = handle.audio_query_blocking(&read_stdin()?)?;
            params.apply_to(&mut query);
            let wave = handle.synthesize_blocking(&query, params.options())?;
            log::info!("Synthesized {:.2}s at {} Hz", wave.duration_secs(), wave.sample_rate);
            std::io::stdout().write_all(&wave.to_wav_bytes()?)?;
        },

        #[cfg(feature = "playback")]
        Command::Play { front_end, params } => {
            let handle = initialize(config, front_end, true)?;
            let audio = audio_output::AudioPlayer::new()?;
            let text_splitter = vox::TextSplitter::new();

            for sentence in text_splitter.split_text(&read_stdin()?) {
                let mut query = handle.audio_query_blocking(&sentence)?;
                params.apply_to(&mut query);
                // assemble straight at the device rate
                query.output_sampling_rate = audio.sample_rate();
                query.output_stereo = false;
                let wave = handle.synthesize_blocking(&query, params.options())?;

                log::info!("Requesting speech: {}", sentence);
                audio.play_waveform(&wave);
            }

            log::info!("Waiting for audio to finish...");
            audio.wait_blocking_until_empty();

            log::info!("Audio playback finished.");
            log::debug!("Processed blocks count: {}", audio.blocks_processed());
        },
    }

    Ok(())
}

fn read_stdin() -> anyhow::Result<String> {
    let mut text = String::new();
    let _ = std::io::stdin().read_to_string(&mut text)?;
    Ok(text)
}

fn write_json(query: &AudioQuery) -> anyhow::Result<()> {
    let mut json = serde_json::to_string_pretty(query)?;
    json.push('\n');
    std::io::stdout().write_all(json.as_bytes())?;
    Ok(())
}

type Loaded = (Option<Arc<dyn Phonemizer>>, Option<Arc<dyn AcousticModel>>);

#[cfg(feature = "voicevox")]
fn load_voicevox(config: &EngineConfig) -> anyhow::Result<Loaded> {
    log::info!("Initializing...");
    let model = Arc::new(vox::voicevox::VoicevoxModel::load(&config.open_jtalk_dict_dir, config.speaker_id)?);
    log::info!("Initialized.");
    let phonemizer: Arc<dyn Phonemizer> = model.clone();
    let model: Arc<dyn AcousticModel> = model;
    Ok((Some(phonemizer), Some(model)))
}

#[cfg(not(feature = "voicevox"))]
fn load_voicevox(_config: &EngineConfig) -> anyhow::Result<Loaded> {
    Ok((None, None))
}

fn initialize(config: EngineConfig, front_end: FrontEnd, require_model: bool) -> anyhow::Result<EngineHandle> {
    let (voicevox_phonemizer, model) = load_voicevox(&config)?;

    let phonemizer: Arc<dyn Phonemizer> = match front_end {
        FrontEnd::Kana => Arc::new(KanaPhonemizer),
        FrontEnd::Voicevox => voicevox_phonemizer
            .ok_or_else(|| anyhow::anyhow!("VOICEVOX front end needs a build with the `voicevox` feature"))?,
    };
    if require_model && model.is_none() {
        log::error!("No acoustic model available.");
        return Err(anyhow::anyhow!("Synthesis needs a build with the `voicevox` feature"));
    }

    vox::initialize(phonemizer, model, config)?;
    Ok(EngineHandle::new()?)
}
