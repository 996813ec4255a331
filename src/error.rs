use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("attribute '{attribute}': probabilities sum to {actual}, expected {expected}")]
    ProbabilitySum {
        attribute: String,
        expected: f64,
        actual: f64,
    },

    #[error("attribute '{attribute}': value {value:?} has negative probability {probability}")]
    NegativeProbability {
        attribute: String,
        value: Option<String>,
        probability: f64,
    },

    #[error("attribute '{0}' has no values to draw from")]
    EmptyValues(String),

    #[error("attribute '{0}' is declared more than once")]
    DuplicateAttribute(String),

    #[error("discriminator range is empty: min {min} > max {max}")]
    InvalidDiscriminatorRange { min: i64, max: i64 },

    #[error("unknown attribute '{name}' referenced by {context}")]
    UnknownAttribute { name: String, context: String },

    #[error("flow export needs at least 2 axes, got {got}")]
    TooFewAxes { got: usize },

    #[error("axis '{0}' appears more than once")]
    DuplicateAxis(String),

    #[error("flow table contains the group {0} more than once")]
    DuplicateGroup(String),

    #[error("label separator must not be empty")]
    EmptySeparator,

    #[error("XML parse error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow2::error::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
