use std::error::Error;
use std::fmt::{self, Display, Debug};

pub trait ErrorDescription {
    fn description(&self) -> impl Display;
    fn code(&self) -> Option<i32> {
        None
    }
    fn error_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl<T> ErrorDescription for T
where
    T: Display,
{
    fn description(&self) -> impl Display {
        self
    }
}

pub struct GenericError<T>(pub T) where T: ErrorDescription;

impl<T> GenericError<T>
where
    T: ErrorDescription,
{
    pub const fn new(err: T) -> Self {
        Self(err)
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    pub fn as_inner(&self) -> &T {
        &self.0
    }

    pub fn map<U, F>(self, f: F) -> GenericError<U>
    where
        U: ErrorDescription,
        F: FnOnce(T) -> U,
    {
        GenericError(f(self.0))
    }

    pub fn error_name(&self) -> &'static str {
        self.0.error_name()
    }

    pub fn code(&self) -> Option<i32> {
        self.0.code()
    }
}

impl<T> Debug for GenericError<T>
where
    T: ErrorDescription,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(code) = self.0.code() {
            write!(f, "GenericError({}): {} ({})", self.error_name(), self.0.description(), code)
        } else {
            write!(f, "GenericError({}): {}", self.error_name(), self.0.description())
        }
    }
}

impl<T> Display for GenericError<T>
where
    T: ErrorDescription,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.description())
    }
}

impl<T> Error for GenericError<T>
where
    T: ErrorDescription,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

impl<T> From<T> for GenericError<T>
where
    T: ErrorDescription,
{
    fn from(err: T) -> Self {
        Self::new(err)
    }
}

/// Everything that can abort a query or synthesis request.
///
/// Structural problems carry the offending index or field so the caller can
/// point at the exact spot in its input.
#[derive(Debug)]
#[non_exhaustive]
pub enum PipelineErrorDescription {
    EmptyInput,
    InvalidAccent {
        phrase_index: usize,
        accent: usize,
        mora_count: usize,
    },
    InvalidParameter {
        field: String,
        value: f64,
    },
    Phonemization(String),
    Model(String),
    Synthesis {
        unit_index: usize,
        source: Box<PipelineError>,
    },
    Assembly(String),
    AlreadyInitialized,
    NotInitialized,
}

impl ErrorDescription for PipelineErrorDescription {
    fn description(&self) -> impl Display {
        match self {
            Self::EmptyInput => "Phonemizer produced no accent phrases".to_string(),
            Self::InvalidAccent { phrase_index, accent, mora_count } => format!(
                "Accent {} is out of range for accent phrase {} with {} moras",
                accent, phrase_index, mora_count
            ),
            Self::InvalidParameter { field, value } => format!("Invalid value for {}: {}", field, value),
            Self::Phonemization(msg) => format!("Phonemization failed: {}", msg),
            Self::Model(msg) => format!("Acoustic model failed: {}", msg),
            Self::Synthesis { unit_index, source } => format!("Synthesis failed at unit {}: {}", unit_index, source),
            Self::Assembly(msg) => format!("Waveform assembly failed: {}", msg),
            Self::AlreadyInitialized => "Engine is already initialized".to_string(),
            Self::NotInitialized => "Engine is not initialized".to_string(),
        }
    }

    fn code(&self) -> Option<i32> {
        let code = match self {
            Self::EmptyInput => 1,
            Self::InvalidAccent { .. } => 2,
            Self::InvalidParameter { .. } => 3,
            Self::Phonemization(_) => 4,
            Self::Model(_) => 5,
            Self::Synthesis { .. } => 6,
            Self::Assembly(_) => 7,
            Self::AlreadyInitialized => 8,
            Self::NotInitialized => 9,
        };
        Some(code)
    }

    fn error_name(&self) -> &'static str {
        match self {
            Self::EmptyInput => "EmptyInputError",
            Self::InvalidAccent { .. } => "InvalidAccentError",
            Self::InvalidParameter { .. } => "InvalidParameterError",
            Self::Phonemization(_) => "PhonemizationError",
            Self::Model(_) => "ModelError",
            Self::Synthesis { .. } => "SynthesisError",
            Self::Assembly(_) => "AssemblyError",
            Self::AlreadyInitialized | Self::NotInitialized => "EngineError",
        }
    }

    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Synthesis { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type PipelineError = GenericError<PipelineErrorDescription>;

impl PipelineError {
    pub fn invalid_parameter(field: impl Into<String>, value: f64) -> Self {
        Self::new(PipelineErrorDescription::InvalidParameter { field: field.into(), value })
    }

    pub fn phonemization(msg: impl Into<String>) -> Self {
        Self::new(PipelineErrorDescription::Phonemization(msg.into()))
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::new(PipelineErrorDescription::Model(msg.into()))
    }

    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::new(PipelineErrorDescription::Assembly(msg.into()))
    }

    pub fn synthesis(unit_index: usize, source: PipelineError) -> Self {
        Self::new(PipelineErrorDescription::Synthesis { unit_index, source: Box::new(source) })
    }
}
