//! Table initialization
//!
//! Centralizes the startup wiring shared by the binaries and the integration
//! tests: storage backend selection, recovery of unfinished rounds and the
//! background settlement worker.

use crate::{
    config::{CasinoConfig, StorageBackend},
    errors::CasinoResult,
    notify::SettlementNotifier,
    scheduler::{CloseRequest, RoundScheduler},
    storage::{KvBackend, MemoryBackend, OptimizedStorage},
    store::CasinoStore,
    table::{CasinoTable, SettleOutcome},
};
use chrono::Utc;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// Keeps the settlement worker alive; shut it down explicitly on exit
pub struct CasinoHandle {
    table: Arc<CasinoTable>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl CasinoHandle {
    /// Stop accepting timer events and wait for the worker to finish its current round
    pub async fn shutdown(self) {
        self.table.scheduler().shutdown();
        let _ = self.shutdown.send(true);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Settlement worker panicked");
        }
        tracing::info!("Casino table stopped");
    }
}

pub struct CasinoFactory;

impl CasinoFactory {
    /// Build a table from configuration, recover unfinished rounds and start the worker
    pub async fn create_table(
        config: CasinoConfig,
        notifier: Arc<dyn SettlementNotifier>,
    ) -> CasinoResult<(Arc<CasinoTable>, CasinoHandle)> {
        config.validate()?;
        let backend = Self::create_backend(&config)?;
        Self::create_table_with_backend(config, backend, notifier).await
    }

    /// Same as [`Self::create_table`] over an already opened backend
    pub async fn create_table_with_backend(
        config: CasinoConfig,
        backend: Arc<dyn KvBackend>,
        notifier: Arc<dyn SettlementNotifier>,
    ) -> CasinoResult<(Arc<CasinoTable>, CasinoHandle)> {
        let (scheduler, requests) = RoundScheduler::new();
        let table = Arc::new(CasinoTable::new(CasinoStore::new(backend), &config, scheduler)?);

        let summary = table.recover(Utc::now()).await?;
        for report in &summary.settled {
            notifier.deliver(report).await;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_settlement_worker(
            Arc::clone(&table),
            requests,
            notifier,
            shutdown_rx,
        ));

        tracing::info!(
            backend = ?config.storage.backend,
            round_delay_secs = config.table.round_delay_secs,
            "Casino table started"
        );

        let handle = CasinoHandle {
            table: Arc::clone(&table),
            shutdown,
            worker,
        };
        Ok((table, handle))
    }

    fn create_backend(config: &CasinoConfig) -> CasinoResult<Arc<dyn KvBackend>> {
        match config.storage.backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage: state is lost on exit");
                Ok(Arc::new(MemoryBackend::new()))
            }
            StorageBackend::RocksDb => {
                if config.storage.clear_on_start {
                    tracing::warn!(path = %config.storage.data_directory, "Testing mode: clearing database");
                } else {
                    tracing::info!(path = %config.storage.data_directory, "Preserving existing table data");
                }
                Ok(Arc::new(OptimizedStorage::new_with_config(&config.storage)?))
            }
        }
    }
}

/// Settle rounds as their close timers fire, until shutdown
async fn run_settlement_worker(
    table: Arc<CasinoTable>,
    mut requests: mpsc::UnboundedReceiver<CloseRequest>,
    notifier: Arc<dyn SettlementNotifier>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(CloseRequest { chat, round }) = request else {
                    break;
                };
                match table.request_settlement(chat, round).await {
                    Ok(SettleOutcome::Settled(report)) => notifier.deliver(&report).await,
                    Ok(SettleOutcome::Skipped { .. }) => {}
                    // Already logged by the table; the round stays OPEN for a manual retry
                    Err(e) => tracing::warn!(chat = %chat, round = %round, error = %e, "Timer settlement failed"),
                }
            }

            _ = shutdown.changed() => {
                break;
            }
        }
    }
    tracing::debug!("Settlement worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::games::types::{AccountId, ChatId, RoundStatus, Side};
    use crate::notify::ChannelNotifier;

    #[tokio::test(start_paused = true)]
    async fn test_worker_settles_on_timer() {
        let config = ConfigBuilder::from_config(CasinoConfig::testing())
            .round_delay_secs(30)
            .build()
            .unwrap();
        let (notifier, mut reports) = ChannelNotifier::new();
        let (table, handle) = CasinoFactory::create_table(config, Arc::new(notifier)).await.unwrap();

        let chat = ChatId(42);
        let round = table.open_round(chat).await.unwrap();
        table.place_bet(chat, AccountId(1), Side::Tie, 100).await.unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.round, round.id);
        assert_eq!(report.lines.len(), 1);
        assert_eq!(table.current_round(chat).unwrap().unwrap().status, RoundStatus::Closed);
        assert_eq!(table.metrics().rounds_settled, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_settlement_preempts_timer() {
        let (notifier, mut reports) = ChannelNotifier::new();
        let (table, handle) = CasinoFactory::create_table(CasinoConfig::testing(), Arc::new(notifier))
            .await
            .unwrap();

        let chat = ChatId(7);
        let round = table.open_round(chat).await.unwrap();
        let outcome = table.request_settlement(chat, round.id).await.unwrap();
        assert!(outcome.report().is_some());

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert!(reports.try_recv().is_err());
        assert_eq!(table.metrics().rounds_settled, 1);

        handle.shutdown().await;
    }
}
