//! Error types for the feedback engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture/playback context errors, classified for status reporting
#[derive(Error, Debug)]
pub enum AudioError {
    /// User refused microphone access or no capture device exists.
    /// Terminal for the current start attempt; never retried automatically.
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    /// The host has no usable audio backend. Terminal.
    #[error("Audio is not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// The context auto-suspended (OS audio policy, backgrounding).
    /// Recoverable via the bounded-retry resume protocol.
    #[error("Audio context suspended")]
    Suspended,

    /// Resume retries exhausted; a user gesture is required to continue.
    #[error("Audio resume requires a user gesture")]
    NeedsUserGesture,

    /// Failed to open a stream on the selected device
    #[error("Failed to open stream: {0}")]
    StreamError(String),

    /// Unsupported sample format reported by the device
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Disconnect/close failed during teardown. Logged and swallowed;
    /// teardown always proceeds to completion.
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Signal-chain construction errors
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid stage parameter: {0}")]
    InvalidParameter(String),

    #[error("Chain is not built")]
    NotBuilt,
}

/// Capture-device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The selected device disappeared. Triggers fallback to the default
    /// device plus re-enumeration, not a hard failure.
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
