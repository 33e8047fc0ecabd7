use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::sleep;

/// Bounded exponential backoff with jitter. Belongs at adapter boundaries;
/// business code never loops on its own.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}
impl RetryPolicy {
	pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
		Self { max_attempts, base_delay, max_delay: Duration::from_secs(30) }
	}

	fn delay_for_attempt(&self, attempt: u32, jitter: &mut XorShift64) -> Duration {
		let exp = attempt.saturating_sub(1).min(6);
		let base = self.base_delay.saturating_mul(1 << exp).min(self.max_delay);
		let jitter_ms = (base.as_millis() as u64 / 2).max(1);
		let extra = jitter.next_u64() % jitter_ms;

		base + Duration::from_millis(extra)
	}
}

/// Run `op` until it succeeds, the error is not retryable, or the attempt
/// budget is exhausted. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(policy: RetryPolicy, is_retryable: P, mut op: F) -> Result<T, E>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<T, E>>,
	P: Fn(&E) -> bool,
{
	let mut jitter = XorShift64::from_clock();
	let attempts = policy.max_attempts.max(1);

	for attempt in 1..=attempts {
		match op(attempt).await {
			Ok(value) => return Ok(value),
			Err(err) => {
				if attempt == attempts || !is_retryable(&err) {
					return Err(err);
				}

				sleep(policy.delay_for_attempt(attempt, &mut jitter)).await;
			},
		}
	}

	unreachable!("retry loop returns on the final attempt")
}

struct XorShift64 {
	state: u64,
}
impl XorShift64 {
	fn new(seed: u64) -> Self {
		let state = if seed == 0 { 0x4D59_5DF4_D0F3_3173 } else { seed };

		Self { state }
	}

	fn from_clock() -> Self {
		let nanos = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|elapsed| elapsed.subsec_nanos() as u64 ^ elapsed.as_secs())
			.unwrap_or(0);

		Self::new(nanos)
	}

	fn next_u64(&mut self) -> u64 {
		let mut x = self.state;
		x ^= x << 13;
		x ^= x >> 7;
		x ^= x << 17;
		self.state = x;

		x
	}
}
