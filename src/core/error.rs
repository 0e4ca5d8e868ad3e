use thiserror::Error;

/// Failures reported by the card driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Connect error: {0}")]
    Connect(#[source] pcsc::Error),

    #[error("Disconnect error: {0}")]
    Disconnect(#[source] pcsc::Error),

    #[error("Transmit error: {0}")]
    Transmit(#[source] pcsc::Error),

    #[error("Transmit error: response too short ({0} bytes, need at least 2)")]
    ShortResponse(usize),

    #[error("No card connection open on reader '{0}'")]
    NotConnected(String),

    #[error("Invalid reader name: '{0}'")]
    InvalidReaderName(String),

    #[error("Reader monitor error: {0}")]
    Monitor(#[source] pcsc::Error),
}

/// Failures reported by the URL opener
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to open the browser: {0}")]
    Launch(#[from] std::io::Error),
}
