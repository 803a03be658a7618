#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    UnexpectedEof,
    InvalidValue(&'static str),
    LengthOverflow,
    /// Message exceeds the maximum allowed size.
    TooLarge {
        /// Actual size of the message in bytes.
        actual: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "unexpected end of input"),
            WireError::InvalidValue(what) => write!(f, "invalid value: {}", what),
            WireError::LengthOverflow => write!(f, "length prefix overflows"),
            WireError::TooLarge { actual, max } => {
                write!(f, "message too large: {} bytes (max {})", actual, max)
            }
        }
    }
}

impl std::error::Error for WireError {}
