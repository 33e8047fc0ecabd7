use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
	/// Normal operation, calls pass through.
	Closed,
	/// Too many consecutive failures, calls are rejected immediately.
	Open,
	/// Cool-down elapsed, a single probe is allowed through.
	HalfOpen,
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
	#[error("Circuit breaker is open.")]
	Open,
	#[error(transparent)]
	Inner(E),
}

#[derive(Debug)]
struct Inner {
	state: CircuitState,
	failure_count: u32,
	last_failure_at: Option<Instant>,
}

/// Per-dependency circuit breaker shared across requests. State transitions
/// are protected by an async mutex; the guarded operation itself runs
/// outside the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
	failure_threshold: u32,
	recovery_timeout: Duration,
	inner: Mutex<Inner>,
}
impl CircuitBreaker {
	pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
		Self {
			failure_threshold,
			recovery_timeout,
			inner: Mutex::new(Inner {
				state: CircuitState::Closed,
				failure_count: 0,
				last_failure_at: None,
			}),
		}
	}

	pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		{
			let mut inner = self.inner.lock().await;

			if inner.state == CircuitState::Open {
				let cooled_down = inner
					.last_failure_at
					.map(|at| at.elapsed() >= self.recovery_timeout)
					.unwrap_or(false);

				if cooled_down {
					inner.state = CircuitState::HalfOpen;
				} else {
					return Err(BreakerError::Open);
				}
			}
		}

		match op().await {
			Ok(value) => {
				self.on_success().await;

				Ok(value)
			},
			Err(err) => {
				self.on_failure().await;

				Err(BreakerError::Inner(err))
			},
		}
	}

	pub async fn state(&self) -> CircuitState {
		self.inner.lock().await.state
	}

	pub async fn reset(&self) {
		let mut inner = self.inner.lock().await;

		inner.state = CircuitState::Closed;
		inner.failure_count = 0;
		inner.last_failure_at = None;
	}

	async fn on_success(&self) {
		let mut inner = self.inner.lock().await;

		inner.failure_count = 0;

		if inner.state == CircuitState::HalfOpen {
			inner.state = CircuitState::Closed;
		}
	}

	async fn on_failure(&self) {
		let mut inner = self.inner.lock().await;

		inner.failure_count += 1;
		inner.last_failure_at = Some(Instant::now());

		if inner.failure_count >= self.failure_threshold {
			inner.state = CircuitState::Open;
		}
	}
}
