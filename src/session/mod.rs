//! C6 aggregate root. `Server` replaces the teacher's module-level
//! globals (§9 "global singletons -> explicit context": the source's
//! `gameStateManager`/`enhancedMatchmaking`/queue maps become fields of
//! one struct threaded explicitly into every connection handler).

pub mod connection;
pub mod protocol;
pub mod table;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, TABLES_PER_STAKE};
use crate::error::SessionError;
use crate::ledger::Ledger;
use crate::matchmaker::{self, MatchmakerTarget, TablePool};
use crate::queue::{Priority, QueueManager};
use crate::store::{InMemoryStore, Store};

use table::Table;

/// Explicit context passed into every connection handler instead of
/// reaching for module-level statics.
pub struct Server {
    pub tables: DashMap<String, Arc<Table>>,
    pub queue: QueueManager,
    pub ledger: Ledger,
    pub store: Arc<dyn Store>,
    pub config: Config,
}

impl Server {
    /// Boots the preset table pool: two tables per stake level on the
    /// configured ladder (§3 "Table", §6 "tables" collection).
    pub fn new(config: Config) -> Arc<Self> {
        let store = InMemoryStore::new();
        let ledger = Ledger::new();
        let tables = DashMap::new();

        for &stake in &config.stake_ladder {
            for n in 0..TABLES_PER_STAKE {
                let table_id = format!("preset-{stake}-{n}");
                let table = Table::new(table_id.clone(), stake, ledger.clone(), store.clone());
                tables.insert(table_id, table);
            }
        }
        info!(tables = tables.len(), "preset table pool ready");

        Arc::new(Self {
            tables,
            queue: QueueManager::new(),
            ledger,
            store,
            config,
        })
    }

    pub fn table(&self, table_id: &str) -> Option<Arc<Table>> {
        self.tables.get(table_id).map(|t| t.clone())
    }

    pub async fn join_queue(&self, stake: u64, username: &str) -> Result<(), SessionError> {
        self.queue
            .enqueue(stake, username, Priority::Normal)
            .map_err(SessionError::from)?;
        matchmaker::run_tick(&self.queue, self, &[stake]).await;
        Ok(())
    }

    pub fn leave_queue(&self, stake: u64, username: &str) -> Result<(), SessionError> {
        self.queue.remove(stake, username).map_err(SessionError::from)
    }

    /// Background loop driving the matchmaker on a timer (§4.5: "runs
    /// periodically (10s) and on enqueue/dequeue/disconnect").
    pub async fn run_matchmaker_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.matchmaker_interval);
        loop {
            ticker.tick().await;
            matchmaker::run_tick(&self.queue, self.as_ref(), &self.config.stake_ladder).await;
        }
    }

    /// Background loop purging queue entries older than 10 minutes
    /// (§4.4 "Expiry").
    pub async fn run_queue_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        loop {
            ticker.tick().await;
            self.queue.sweep_expired();
        }
    }
}

impl TablePool for Server {
    fn tables_for_stake(&self, stake: u64) -> Vec<Arc<dyn MatchmakerTarget>> {
        self.tables
            .iter()
            .filter(|entry| entry.value().stake() == stake)
            .map(|entry| entry.value().clone() as Arc<dyn MatchmakerTarget>)
            .collect()
    }

    fn create_overflow_table(&self, stake: u64) -> Arc<dyn MatchmakerTarget> {
        let table_id = format!("overflow-{stake}-{}", Uuid::new_v4());
        let table = Table::new(table_id.clone(), stake, self.ledger.clone(), self.store.clone());
        self.tables.insert(table_id, table.clone());
        table
    }
}
