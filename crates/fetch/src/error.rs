use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("upstream error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The fetch worker is gone; no further requests can be served.
    #[error("fetch queue closed")]
    QueueClosed,
}
