use std::sync::Arc;

use asi_service::InsightService;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<InsightService>,
}
impl AppState {
	pub fn new(service: InsightService) -> Self {
		Self { service: Arc::new(service) }
	}
}
