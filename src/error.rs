use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Faults a layer can report. Format rejection during detection is not an
/// error; the pipeline driver consumes it before it gets here.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{0}: {1}")]
    Corrupt(&'static str, String),

    #[error("{component}: CRC mismatch (stored {stored:#06x}, computed {computed:#06x})")]
    Checksum {
        component: &'static str,
        stored: u16,
        computed: u16,
    },

    #[error("{0}: unexpected end of input")]
    Truncated(&'static str),

    #[error("{component}: unsupported compression method {method}")]
    Unsupported { component: &'static str, method: u8 },

    #[error("{0}")]
    Usage(&'static str),

    #[error("layer is in a failed state")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(component: &'static str, cause: impl Into<String>) -> Self {
        Error::Corrupt(component, cause.into())
    }

    /// Unwraps a crate error that crossed an `io::Read` adapter boundary.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        if err.get_ref().map_or(false, |e| e.is::<Error>()) {
            *err.into_inner().unwrap().downcast::<Error>().unwrap()
        } else {
            Error::Io(err)
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
