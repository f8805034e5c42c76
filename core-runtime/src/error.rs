use bridge_traits::BridgeError;
use thiserror::Error;

/// Failures while configuring the runtime
#[derive(Error, Debug)]
pub enum Error {
    /// A setting is missing or out of range
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Neither the configuration nor a secure store can supply a credential
    #[error("No source for credential '{key}': {hint}")]
    CredentialUnavailable { key: String, hint: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, Error>;
