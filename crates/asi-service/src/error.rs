use asi_resilience::BreakerError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	Validation { message: String },
	#[error("Company not found: {identifier}")]
	CompanyNotFound { identifier: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Optimistic lock conflict: {message}")]
	OptimisticLock { message: String },
	#[error("Repository error: {message}")]
	Repository { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Circuit breaker open for {dependency}.")]
	CircuitOpen { dependency: &'static str },
	#[error("I/O error: {message}")]
	Io { message: String },
}
impl From<asi_storage::Error> for Error {
	fn from(err: asi_storage::Error) -> Self {
		match err {
			asi_storage::Error::Sqlx(inner) => Self::Repository { message: inner.to_string() },
			asi_storage::Error::InvalidArgument(message) => Self::Validation { message },
			asi_storage::Error::NotFound(message) => Self::NotFound { message },
			asi_storage::Error::Conflict(message) => Self::Conflict { message },
			asi_storage::Error::OptimisticLock(message) => Self::OptimisticLock { message },
		}
	}
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Repository { message: err.to_string() }
	}
}
impl From<asi_providers::Error> for Error {
	fn from(err: asi_providers::Error) -> Self {
		match err {
			asi_providers::Error::Validation { message } => Self::Validation { message },
			other => Self::Provider { message: other.to_string() },
		}
	}
}
impl Error {
	/// Collapse a breaker outcome into the service error space, tagging the
	/// open-circuit case with the dependency name.
	pub fn from_breaker(err: BreakerError<Error>, dependency: &'static str) -> Self {
		match err {
			BreakerError::Open => Self::CircuitOpen { dependency },
			BreakerError::Inner(inner) => inner,
		}
	}
}
