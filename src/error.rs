use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::cli::CliError;
use crate::target::TargetError;

/// Unified error type for entry-table emission, metadata extraction, and containerization.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Cli(CliError),
    Target(TargetError),
    /// The input is not a well-formed object: header, section table, or note stream.
    MalformedObject {
        message: String,
        backtrace: Option<Backtrace>,
    },
    /// A verified AMDGPU metadata document has no usable `amdhsa.kernels` array.
    MissingKernelsArray,
    /// Object writing or container assembly failed.
    Codegen {
        message: String,
        backtrace: Option<Backtrace>,
    },
}

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Construct a malformed-object error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedObject {
            message: message.into(),
            backtrace: capture_backtrace(),
        }
    }

    /// Construct a code generation error.
    pub fn codegen(message: impl Into<String>) -> Self {
        Self::Codegen {
            message: message.into(),
            backtrace: capture_backtrace(),
        }
    }

    /// Return the captured backtrace, if any.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Error::MalformedObject { backtrace, .. } | Error::Codegen { backtrace, .. } => {
                backtrace.as_ref()
            }
            _ => None,
        }
    }
}

fn capture_backtrace() -> Option<Backtrace> {
    if cfg!(debug_assertions) {
        Some(Backtrace::force_capture())
    } else {
        None
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Cli(err) => write!(f, "{err}"),
            Error::Target(err) => write!(f, "target error: {err}"),
            Error::MalformedObject { message, .. } => write!(f, "malformed object: {message}"),
            Error::MissingKernelsArray => {
                f.write_str("malformed AMDGPU metadata: could not find amdhsa.kernels key")
            }
            Error::Codegen { message, .. } => write!(f, "codegen error: {message}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Cli(err) => Some(err),
            Error::Target(err) => Some(err),
            Error::MalformedObject { .. } | Error::MissingKernelsArray | Error::Codegen { .. } => {
                None
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<CliError> for Error {
    fn from(error: CliError) -> Self {
        Error::Cli(error)
    }
}

impl From<TargetError> for Error {
    fn from(error: TargetError) -> Self {
        Error::Target(error)
    }
}
