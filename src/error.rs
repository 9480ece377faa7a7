use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading data or fitting a model.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    Shape(ndarray::ShapeError),

    /// The input does not satisfy a precondition of the operation.
    InvalidInput { context: String },

    /// A supervised model was fitted without target labels.
    MissingLabels,

    /// `predict` was called before a successful `fit`.
    NotFitted,

    /// A Hessian was requested from a loss built without Hessian computation.
    HessianNotConfigured,

    /// The objective produced a non-finite value.
    Numerical { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Csv(e) => write!(f, "CSV error: {}", e),
            Self::Json(e) => write!(f, "JSON error: {}", e),
            Self::Shape(e) => write!(f, "shape error: {}", e),
            Self::InvalidInput { context } => write!(f, "invalid input: {}", context),
            Self::MissingLabels => write!(f, "labels are required to fit this model"),
            Self::NotFitted => write!(f, "model has not been fitted"),
            Self::HessianNotConfigured => {
                write!(f, "Hessian requested but the loss does not compute it")
            }
            Self::Numerical { message } => write!(f, "numerical error: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Csv(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e)
    }
}
