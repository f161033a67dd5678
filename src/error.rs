//!
//! # Stack-Check Result and Error Types
//!

/// # [StackError] Result Type
pub type StackResult<T> = Result<T, StackError>;

///
/// # Stack-Check Error Enumeration
///
#[derive(Debug)]
pub enum StackError {
    /// Invalid job configuration
    Config(String),
    /// Netlist interpretation error, fatal for the run
    Netlist {
        message: String,
        stack: Vec<ErrorContext>,
    },
    /// Error extracting terminals from decoded layout data
    Extract {
        message: String,
        stack: Vec<ErrorContext>,
    },
    /// Boxed External Errors
    Boxed(Box<dyn std::error::Error + Send + Sync>),
    /// Uncategorized Error, with String Message
    Str(String),
}
impl StackError {
    /// Create a [StackError::Str] from anything String-convertible
    pub fn msg(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }
    /// Create an error-variant [Result] of our [StackError::Str] variant from anything String-convertible
    pub fn fail<T>(s: impl Into<String>) -> Result<T, Self> {
        Err(Self::msg(s))
    }
}
impl std::fmt::Display for StackError {
    /// Display a [StackError]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StackError::Config(message) => {
                write!(f, "Config Error: \n - {}", message)
            }
            StackError::Netlist { message, stack } => {
                write!(f, "Netlist Error: \n - {} \n - {:?}", message, stack)
            }
            StackError::Extract { message, stack } => {
                write!(f, "Extraction Error: \n - {} \n - {:?}", message, stack)
            }
            StackError::Boxed(err) => err.fmt(f),
            StackError::Str(err) => err.fmt(f),
        }
    }
}
impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Boxed(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<String> for StackError {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
impl From<&str> for StackError {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}
impl From<gds21::GdsError> for StackError {
    fn from(e: gds21::GdsError) -> Self {
        // `gds21` 3.0.0-pre.2's `GdsError` wraps a non-`Send`/`Sync`
        // `Box<dyn Error>`, so it cannot be boxed into the `Send + Sync`
        // `Boxed` variant. Preserve its message via `Display`.
        Self::Str(e.to_string())
    }
}
impl From<std::io::Error> for StackError {
    fn from(e: std::io::Error) -> Self {
        Self::Boxed(Box::new(e))
    }
}
impl From<std::num::TryFromIntError> for StackError {
    fn from(e: std::num::TryFromIntError) -> Self {
        Self::Boxed(Box::new(e))
    }
}
impl From<crate::ser::Error> for StackError {
    fn from(e: crate::ser::Error) -> Self {
        Self::Boxed(Box::new(e))
    }
}

/// Enumerated processing contexts
/// Generally used for error reporting
#[derive(Debug, Clone)]
pub enum ErrorContext {
    Job(String),
    Chip(String),
    Netlist(String),
    Library(String),
    Struct(String),
    Instance(String),
    Array(String),
    Units,
    Geometry,
}

/// Helper trait for re-use among our many tree-walkers.
/// Each implementer will generally have some internal state to report upon failure,
/// which it can inject in the implementation-required `err` method.
/// The `fail` method, provided by default, simply returns the `err` value.
pub trait HasErrors {
    /// Create and return a [StackError]
    fn err(&self, msg: impl Into<String>) -> StackError;
    /// Return failure
    fn fail<T>(&self, msg: impl Into<String>) -> StackResult<T> {
        Err(self.err(msg))
    }
}
