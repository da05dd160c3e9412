//! # Broadcaster
//!
//! Fans one record out to every registered peer.
//!
//! ## One Broadcast Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. snapshot()          copy the registry; the live table may change   │
//! │                         freely while the pass runs                      │
//! │                                                                         │
//! │  2. write to all        ┌──────┐ ┌──────┐ ┌──────┐ ┌──────┐             │
//! │     concurrently        │ P1 ✓ │ │ P2 ✗ │ │ P3 ✓ │ │ P4 ✗ │             │
//! │                         └──────┘ └──────┘ └──────┘ └──────┘             │
//! │                                                                         │
//! │  3. evict failures      remove_if_current(P2), remove_if_current(P4)   │
//! │     AFTER the pass      report "disconnected" for each                  │
//! │                                                                         │
//! │  Result: delivered = 2, failed = 2. No retries, ever.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A peer that misses a price update catches up at its next admission,
//! whose confirmation embeds the current prices.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::protocol::Record;
use crate::registry::Registry;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Callback invoked once per evicted peer, after the pass.
pub type EvictionHook<Id> = Arc<dyn Fn(&Id) + Send + Sync>;

/// Snapshot-then-evict fan-out over a [`Registry`].
pub struct Broadcaster<Id> {
    registry: Arc<Registry<Id>>,
    on_evict: Option<EvictionHook<Id>>,
}

impl<Id> Broadcaster<Id>
where
    Id: Eq + Hash + Clone + Display + Send + Sync,
{
    pub fn new(registry: Arc<Registry<Id>>) -> Self {
        Broadcaster {
            registry,
            on_evict: None,
        }
    }

    /// Sets the callback run for every peer evicted by a failed write.
    pub fn with_eviction_hook(mut self, hook: EvictionHook<Id>) -> Self {
        self.on_evict = Some(hook);
        self
    }

    /// Writes `record` to every peer in a snapshot of the registry.
    pub async fn broadcast(&self, record: &Record) -> BroadcastReport {
        let targets = self.registry.snapshot().await;
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let results = join_all(targets.iter().map(|conn| async move {
            let result = conn.send(record).await;
            (conn, result)
        }))
        .await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (conn, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(id = %conn.id, %e, "Broadcast write failed");
                    report.failed += 1;
                    failed.push((conn.id.clone(), conn.conn_id));
                }
            }
        }

        for (id, conn_id) in failed {
            if let Some(evicted) = self.registry.remove_if_current(&id, conn_id).await {
                evicted.close();
                if let Some(hook) = &self.on_evict {
                    hook(&id);
                }
            }
        }

        info!(
            msg_type = %record.type_name(),
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast pass complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuelnet_core::{PriceSet, PumpId};
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_empty_registry() {
        let broadcaster = Broadcaster::<PumpId>::new(Arc::new(Registry::new()));
        let report = broadcaster
            .broadcast(&Record::price_update(PriceSet::standard()))
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_partial_failure_evicts_after_pass() {
        let registry = Arc::new(Registry::new());
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let broadcaster = Broadcaster::new(registry.clone())
            .with_eviction_hook(Arc::new(move |id: &PumpId| sink.lock().unwrap().push(*id)));

        // Pumps 1..=3 keep their read side; pumps 4 and 5 have gone away.
        let mut readers = Vec::new();
        for n in 1..=5u32 {
            let (client, server) = duplex(4096);
            registry
                .register(PumpId::new(n), None, server)
                .await;
            if n <= 3 {
                readers.push(client);
            } else {
                drop(client);
            }
        }

        let update = Record::price_update(PriceSet::from_pairs([("grade93", 1300)]));
        let report = broadcaster.broadcast(&update).await;

        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(registry.len().await, 3);
        for n in 1..=3 {
            assert!(registry.contains(&PumpId::new(n)).await);
        }

        let mut evicted = evicted.lock().unwrap().clone();
        evicted.sort();
        assert_eq!(evicted, vec![PumpId::new(4), PumpId::new(5)]);

        for reader in readers {
            let mut lines = BufReader::new(reader).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(Record::from_line(&line).unwrap(), update);
        }
    }
}
