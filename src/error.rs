//! Error types and handling for Monet

/// Result type alias for Monet operations
pub type Result<T> = std::result::Result<T, MonetError>;

/// Error types for the Monet channel core
#[derive(Debug, thiserror::Error)]
pub enum MonetError {
    /// I/O related errors (shared memory objects, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A mapped region did not carry the channel magic (mid-initialization
    /// or corrupted)
    #[error("Channel region not initialized: {name}")]
    Unmapped { name: String },

    /// Channel version is not compatible with this build
    #[error("Channel version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    /// Backing memory could not be allocated, even via the fallback path
    #[error("Out of memory: {message}")]
    OutOfMemory { message: String },

    /// The buffer pool returned fewer slots than requested
    #[error("Buffer pool exhausted: requested {requested}, got {allocated}")]
    PoolExhausted { requested: u32, allocated: u32 },

    /// A ring rejected an enqueue
    #[error("Ring full: {ring}")]
    RingFull { ring: String },

    /// Insufficient space for a payload operation
    #[error("Insufficient space: requested {requested}, available {available}")]
    InsufficientSpace { requested: usize, available: usize },

    /// A buffer header or message chain failed a consistency check
    #[error("Corrupted channel state: {message}")]
    Corrupted { message: String },

    /// Channel already exists in the manager or as a shared memory object
    #[error("Channel already exists: {name}")]
    ChannelExists { name: String },

    /// Channel not found in the manager
    #[error("Channel not found: {name}")]
    ChannelNotFound { name: String },

    /// The manager is at its channel capacity
    #[error("Too many channels: {current} of {max}")]
    TooManyChannels { current: usize, max: usize },

    /// Platform-specific errors (syscall failures)
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl MonetError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an unmapped-region error
    pub fn unmapped(name: impl Into<String>) -> Self {
        Self::Unmapped { name: name.into() }
    }

    /// Create a version mismatch error
    pub fn version_mismatch(expected: u32, actual: u32) -> Self {
        Self::VersionMismatch { expected, actual }
    }

    /// Create an out-of-memory error
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted(requested: u32, allocated: u32) -> Self {
        Self::PoolExhausted {
            requested,
            allocated,
        }
    }

    /// Create a ring full error
    pub fn ring_full(ring: impl Into<String>) -> Self {
        Self::RingFull { ring: ring.into() }
    }

    /// Create an insufficient space error
    pub fn insufficient_space(requested: usize, available: usize) -> Self {
        Self::InsufficientSpace {
            requested,
            available,
        }
    }

    /// Create a corruption error
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Create a channel exists error
    pub fn channel_exists(name: impl Into<String>) -> Self {
        Self::ChannelExists { name: name.into() }
    }

    /// Create a channel not found error
    pub fn channel_not_found(name: impl Into<String>) -> Self {
        Self::ChannelNotFound { name: name.into() }
    }

    /// Create a too-many-channels error
    pub fn too_many_channels(current: usize, max: usize) -> Self {
        Self::TooManyChannels { current, max }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for MonetError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<nix::Error> for MonetError {
    fn from(err: nix::Error) -> Self {
        Self::platform(format!("Syscall failed: {}", err))
    }
}
