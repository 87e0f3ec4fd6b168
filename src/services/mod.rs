//! Application services. Each operation runs in one database transaction
//! and publishes the events its aggregates raised once that transaction has
//! committed.

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod orders;
pub mod reports;
pub mod wallet;

use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};

use crate::domain::events::DomainEvent;
use crate::domain::policy::StorePolicy;

/// Publishes domain events to NATS when a client is configured.
#[derive(Clone, Default)]
pub struct EventBus {
    nats: Option<async_nats::Client>,
}

impl EventBus {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub async fn publish(&self, events: Vec<DomainEvent>) {
        let Some(client) = &self.nats else { return };
        for event in events {
            let subject = event.subject();
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => {
                    error!(%subject, error = %e, "failed to encode event");
                    continue;
                }
            };
            match client.publish(subject.clone(), payload.into()).await {
                Ok(()) => debug!(%subject, "event published"),
                Err(e) => error!(%subject, error = %e, "failed to publish event"),
            }
        }
    }
}

/// Store operations, split by concern across the submodules.
#[derive(Clone)]
pub struct Store {
    db: PgPool,
    events: EventBus,
    policy: Arc<StorePolicy>,
}

impl Store {
    pub fn new(db: PgPool, events: EventBus, policy: StorePolicy) -> Self {
        Self { db, events, policy: Arc::new(policy) }
    }

    pub fn policy(&self) -> &StorePolicy { &self.policy }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub admin_token: Arc<str>,
}
