pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error("Invalid request: {message}")]
	Validation { message: String },
	#[error("Invalid response: {message}")]
	InvalidResponse { message: String },
}
impl Error {
	/// Transport failures and 5xx responses are worth retrying; 4xx and
	/// malformed payloads are not.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Http(err) => match err.status() {
				Some(status) => status.is_server_error(),
				None => err.is_timeout() || err.is_connect() || err.is_request(),
			},
			Self::Validation { .. } | Self::InvalidResponse { .. } => false,
		}
	}
}
