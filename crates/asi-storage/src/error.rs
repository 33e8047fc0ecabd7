#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Optimistic lock conflict: {0}")]
	OptimisticLock(String),
}
impl Error {
	/// SQLSTATE 23505, a unique-constraint race on insert.
	pub fn is_unique_violation(err: &sqlx::Error) -> bool {
		matches!(
			err,
			sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505")
		)
	}
}
