use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::{error::AppError, state::AppState};

/// Business counters exposed on `/metrics`. Each router instance owns its own registry.
pub struct Metrics {
    registry: Registry,
    pub holds_acquired: IntCounter,
    pub hold_conflicts: IntCounter,
    pub holds_confirmed: IntCounter,
    pub groups_locked: IntCounter,
    pub members_cancelled: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("caravan".to_string()), None)?;

        let holds_acquired = IntCounter::new("holds_acquired_total", "Holds granted or extended")?;
        let hold_conflicts = IntCounter::new(
            "hold_conflicts_total",
            "Acquire requests rejected because a unit was taken",
        )?;
        let holds_confirmed = IntCounter::new("holds_confirmed_total", "Holds converted to bookings")?;
        let groups_locked = IntCounter::new("groups_locked_total", "Pool groups handed to booking")?;
        let members_cancelled = IntCounter::new(
            "members_cancelled_total",
            "Pool members cancelled by an enforced payment deadline",
        )?;

        registry.register(Box::new(holds_acquired.clone()))?;
        registry.register(Box::new(hold_conflicts.clone()))?;
        registry.register(Box::new(holds_confirmed.clone()))?;
        registry.register(Box::new(groups_locked.clone()))?;
        registry.register(Box::new(members_cancelled.clone()))?;

        Ok(Self {
            registry,
            holds_acquired,
            hold_conflicts,
            holds_confirmed,
            groups_locked,
            members_cancelled,
        })
    }

    pub fn render(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::Internal(format!("metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| AppError::Internal(e.to_string()))
    }
}

/// GET /metrics
pub async fn export(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
