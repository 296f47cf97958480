/// Core error type for querygauge
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database handle is nil")]
    NilDatabase,

    #[error("Metric already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Could not register {family} collectors: {source}")]
    Registration {
        family: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl Error {
    /// Wrap an error with the name of the collector family that failed
    pub fn registration(family: &'static str, source: Error) -> Self {
        Error::Registration {
            family,
            source: Box::new(source),
        }
    }

    /// Prefix the error message with context, keeping the variant
    pub fn context(self, msg: &str) -> Self {
        match self {
            Error::Config(e) => Error::Config(format!("{}: {}", msg, e)),
            Error::Database(e) => Error::Database(format!("{}: {}", msg, e)),
            Error::Connection(e) => Error::Connection(format!("{}: {}", msg, e)),
            Error::Metrics(e) => Error::Metrics(format!("{}: {}", msg, e)),
            Error::Registration { family, source } => Error::Registration {
                family,
                source: Box::new(source.context(msg)),
            },
            other => other,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
