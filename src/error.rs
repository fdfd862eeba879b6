//! Error types for the stitching pipeline.
//!
//! Every stage returns [`StitchResult`]; the pipeline driver converts a
//! terminal error into a single `Error` status event before cleanup. The
//! five variants mirror the failure classes a run can hit: bad input
//! tiles, bad configuration, no usable pairwise matches, an implausible
//! canvas geometry, and plain I/O failures.

use std::{error::Error as StdError, fmt, io};

/// Failure classes of the stitching engine.
#[derive(Debug)]
pub enum StitchError {
    /// Missing tiles, unparsable filenames, or an unreadable base tile.
    Input(String),
    /// A configuration option is out of range or inconsistent.
    Config { option: String, reason: String },
    /// No pairwise match survived thresholding, or a required
    /// directional partition is empty.
    NoMatch(String),
    /// Canvas size is non-positive or beyond the sanity multiplier.
    Geometry(String),
    /// Temp file creation, tile reads, or final PNG write failed.
    Io { context: String, source: io::Error },
}

impl StitchError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn config(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            option: option.into(),
            reason: reason.into(),
        }
    }

    pub fn no_match(message: impl Into<String>) -> Self {
        Self::NoMatch(message.into())
    }

    pub fn geometry(message: impl Into<String>) -> Self {
        Self::Geometry(message.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short machine-readable kind, used as the prefix of `Error` status
    /// events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Config { .. } => "config",
            Self::NoMatch(_) => "no-match",
            Self::Geometry(_) => "geometry",
            Self::Io { .. } => "io",
        }
    }
}

impl fmt::Display for StitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StitchError::Input(message) => write!(f, "input error: {}", message),
            StitchError::Config { option, reason } => {
                write!(f, "configuration error in '{}': {}", option, reason)
            }
            StitchError::NoMatch(message) => write!(f, "no match: {}", message),
            StitchError::Geometry(message) => write!(f, "geometry error: {}", message),
            StitchError::Io { context, source } => {
                write!(f, "i/o error during {}: {}", context, source)
            }
        }
    }
}

impl StdError for StitchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StitchError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for StitchError {
    fn from(source: io::Error) -> Self {
        Self::io("i/o", source)
    }
}

impl From<image::ImageError> for StitchError {
    fn from(source: image::ImageError) -> Self {
        Self::Input(source.to_string())
    }
}

/// Result type alias used throughout the engine.
pub type StitchResult<T> = Result<T, StitchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StitchError::config("overlap_h_pct", "must be between 1 and 100");
        assert_eq!(
            err.to_string(),
            "configuration error in 'overlap_h_pct': must be between 1 and 100"
        );
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_io_error_source() {
        let err = StitchError::io("canvas backing file", io::Error::other("disk full"));
        assert!(err.source().is_some());
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_image_error_converts_to_input() {
        let decode_err = image::load_from_memory(b"not an image").unwrap_err();
        let err = StitchError::from(decode_err);
        assert_eq!(err.kind(), "input");
    }
}
