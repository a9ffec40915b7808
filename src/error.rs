use crate::store::StoreError;
use crate::vendor_consent::CodecError;
use thiserror::Error;

/// The error type surfaced to the host application.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConsentLibError {
    #[error("invalid configuration: {0}")]
    BuildConfiguration(String),
    #[error("no internet connection")]
    NoInternetConnection,
    #[error("a timeout has occurred when loading the message")]
    Timeout,
    #[error("api exception: {message}")]
    Api { message: String },
    #[error("unable to decode consent string")]
    Codec(#[from] CodecError),
    #[error("could not find consent string in the consent store")]
    MissingConsentString,
    #[error("consent store failure")]
    Store(#[from] StoreError),
    #[error("session has been destroyed")]
    SessionDestroyed,
}

impl ConsentLibError {
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ConsentLibError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() {
            ConsentLibError::NoInternetConnection
        } else if error.is_timeout() {
            ConsentLibError::Timeout
        } else {
            ConsentLibError::api(error.to_string())
        }
    }
}
