//! Health-fact publication bus (§2, §4.3.3, §4.3.5).

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Severity of a published health fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Everything is fine.
    Ok,
    /// Degraded but not yet actionable.
    Warning,
    /// Actionable failure.
    Error,
}

/// A single named health fact published against a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthFact {
    /// The service this fact is published against (coordinator service or a node-agent
    /// service name).
    pub service: String,
    /// Idempotency key for this fact within `service`.
    pub property: String,
    /// Human-readable description.
    pub description: String,
    /// Severity.
    pub state: HealthState,
    /// How long the fact remains valid before it's considered expired.
    pub ttl: Duration,
    /// When the fact was published.
    pub published_at: SystemTime,
}

impl HealthFact {
    /// Whether this fact has outlived its TTL as of `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now.duration_since(self.published_at).unwrap_or_default() > self.ttl
    }
}

/// The platform's health-fact publication bus.
#[async_trait]
pub trait HealthBus: Send + Sync {
    /// Whether `service` currently exists in the platform's service registry. Publishing
    /// against a service that doesn't exist fails permanently (§4.3.3), so callers must
    /// check this first.
    async fn service_exists(&self, service: &str) -> Result<bool>;

    /// Publish (or replace, by `property`) a health fact.
    async fn publish(&self, fact: HealthFact) -> Result<()>;

    /// List all non-expired facts currently published against `service`.
    async fn list(&self, service: &str) -> Result<Vec<HealthFact>>;

    /// Remove a fact, e.g. because the node it described no longer exists.
    async fn expire(&self, service: &str, property: &str) -> Result<()>;
}

/// In-memory reference implementation of [`HealthBus`].
#[derive(Debug, Default)]
pub struct InMemoryHealthBus {
    /// Services known to exist (simulates the platform's service registry).
    known_services: DashMap<String, ()>,
    /// `service -> property -> fact`.
    facts: DashMap<String, DashMap<String, HealthFact>>,
}

impl InMemoryHealthBus {
    /// Construct an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a service as existing, so publishes against it succeed.
    pub fn register_service(&self, service: impl Into<String>) {
        self.known_services.insert(service.into(), ());
    }
}

#[async_trait]
impl HealthBus for InMemoryHealthBus {
    async fn service_exists(&self, service: &str) -> Result<bool> {
        Ok(self.known_services.contains_key(service))
    }

    async fn publish(&self, fact: HealthFact) -> Result<()> {
        if !self.known_services.contains_key(&fact.service) {
            return Err(crate::error::CoordError::ServiceNotFound(fact.service));
        }
        self.facts
            .entry(fact.service.clone())
            .or_default()
            .insert(fact.property.clone(), fact);
        Ok(())
    }

    async fn list(&self, service: &str) -> Result<Vec<HealthFact>> {
        Ok(self
            .facts
            .get(service)
            .map(|m| m.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default())
    }

    async fn expire(&self, service: &str, property: &str) -> Result<()> {
        if let Some(m) = self.facts.get(service) {
            m.remove(property);
        }
        Ok(())
    }
}
