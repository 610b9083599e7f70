use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A settings file could not be read or parsed.
    #[error("Invalid settings file {path}: {message}")]
    Settings { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
