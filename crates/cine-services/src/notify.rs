//! Notification dispatch
//!
//! `TracingNotifier` writes booking events to the structured log, where the
//! delivery pipeline (email, push) picks them up.

use async_trait::async_trait;
use cine_core::{models::BookingEvent, traits::NotificationDispatcher, AppResult};
use tracing::info;

/// Emits each event as a structured log record
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn dispatch(&self, event: &BookingEvent) -> AppResult<()> {
        let payload = serde_json::to_string(event)?;
        info!(
            target: "cine::notifications",
            booking_id = %event.booking_id(),
            payload = %payload,
            "Booking notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_dispatch_never_fails_for_valid_event() {
        let notifier = TracingNotifier::new();
        let event = BookingEvent::Expired {
            booking_id: Uuid::new_v4(),
            customer_id: 9,
        };
        assert!(notifier.dispatch(&event).await.is_ok());
    }
}
