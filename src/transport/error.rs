//! Transport-level errors, kept separate from [`crate::error::TtcomError`]
//! because they can occur mid-read, where the caller needs to decide
//! whether a partial line is still worth salvaging.

#[derive(Debug)]
pub enum TransportReadError {
    Io(std::io::Error),
    LineTooLong {
        preview: String,
    },
    IllegalControlChar {
        ch: char,
        preview: String,
    },
}

impl From<std::io::Error> for TransportReadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl std::fmt::Display for TransportReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::LineTooLong { preview } => write!(f, "line too long: {preview:?}..."),
            Self::IllegalControlChar { ch, preview } => {
                write!(f, "illegal control character {ch:?} in: {preview:?}...")
            }
        }
    }
}

impl std::error::Error for TransportReadError {}
