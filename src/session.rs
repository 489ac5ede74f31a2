//! Per-session engine registry.
//!
//! One `CartEngine` per shopper session, owned by this registry and injected
//! into handlers; never a module-level singleton. The registry is bounded:
//! entries idle past the TTL are pruned on access, and the least recently
//! used entry is evicted once capacity is reached. Evicted engines finish
//! any in-flight operation (handlers hold an `Arc`) and their carts remain
//! in Postgres, so eviction only costs a reload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::{broadcast, Mutex};

use crate::config::CartConfig;
use crate::engine::CartEngine;
use crate::gateway::postgres::PgPricingGateway;
use crate::gateway::NoPromo;
use crate::storage::postgres::PgCartStore;

pub type ServerEngine = CartEngine<PgCartStore, PgPricingGateway, NoPromo>;

struct SessionEntry {
    engine: Arc<ServerEngine>,
    last_seen: Instant,
}

pub struct SessionRegistry {
    pool: PgPool,
    nats: Option<async_nats::Client>,
    config: CartConfig,
    capacity: usize,
    idle_ttl: Duration,
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(
        pool: PgPool,
        nats: Option<async_nats::Client>,
        config: CartConfig,
        capacity: usize,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            pool,
            nats,
            config,
            capacity: capacity.max(1),
            idle_ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the engine for a session, loading it from storage on first
    /// access.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<ServerEngine> {
        let mut sessions = self.inner.lock().await;
        sessions.retain(|_, entry| entry.last_seen.elapsed() < self.idle_ttl);

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_seen = Instant::now();
            return Arc::clone(&entry.engine);
        }

        if sessions.len() >= self.capacity {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone())
            {
                tracing::debug!(session_id = %oldest, "evicting least recently used cart session");
                sessions.remove(&oldest);
            }
        }

        let store = PgCartStore::new(self.pool.clone(), session_id);
        let pricing = PgPricingGateway::new(self.pool.clone());
        let engine = Arc::new(CartEngine::load(store, pricing, self.config.clone()).await);
        if let Some(nats) = &self.nats {
            spawn_nats_bridge(nats.clone(), session_id.to_string(), &engine);
        }
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                engine: Arc::clone(&engine),
                last_seen: Instant::now(),
            },
        );
        engine
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Forwards every cart snapshot to `cart.updated.<session>`. The task ends
/// when the engine (and with it the broadcast sender) is dropped.
fn spawn_nats_bridge(nats: async_nats::Client, session_id: String, engine: &ServerEngine) {
    let mut rx = engine.subscribe();
    tokio::spawn(async move {
        let subject = format!("cart.updated.{session_id}");
        loop {
            match rx.recv().await {
                Ok(cart) => {
                    let payload = match serde_json::to_vec(&cart) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode cart event");
                            continue;
                        }
                    };
                    if let Err(e) = nats.publish(subject.clone(), payload.into()).await {
                        tracing::warn!(error = %e, %subject, "failed to publish cart event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%subject, skipped, "cart event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
