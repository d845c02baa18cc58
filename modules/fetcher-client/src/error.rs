use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetcherError>;

#[derive(Error, Debug)]
pub enum FetcherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch service error ({status}): {message}")]
    Api { status: u16, message: String },
}
