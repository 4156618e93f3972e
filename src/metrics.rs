//! Table activity counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct TableMetrics {
    start_time: Instant,
    rounds_opened: AtomicU64,
    rounds_settled: AtomicU64,
    rounds_cancelled: AtomicU64,
    bets_placed: AtomicU64,
    bets_rejected: AtomicU64,
    settlements_skipped: AtomicU64,
    settlement_failures: AtomicU64,
    points_wagered: AtomicU64,
    points_paid: AtomicU64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rounds_opened: u64,
    pub rounds_settled: u64,
    pub rounds_cancelled: u64,
    pub bets_placed: u64,
    pub bets_rejected: u64,
    pub settlements_skipped: u64,
    pub settlement_failures: u64,
    pub points_wagered: u64,
    pub points_paid: u64,
    pub uptime_secs: u64,
}

impl Default for TableMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TableMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds_opened: AtomicU64::new(0),
            rounds_settled: AtomicU64::new(0),
            rounds_cancelled: AtomicU64::new(0),
            bets_placed: AtomicU64::new(0),
            bets_rejected: AtomicU64::new(0),
            settlements_skipped: AtomicU64::new(0),
            settlement_failures: AtomicU64::new(0),
            points_wagered: AtomicU64::new(0),
            points_paid: AtomicU64::new(0),
        }
    }

    pub fn record_round_opened(&self) {
        self.rounds_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round_settled(&self, total_bet: u64, total_payout: u64) {
        self.rounds_settled.fetch_add(1, Ordering::Relaxed);
        self.points_wagered.fetch_add(total_bet, Ordering::Relaxed);
        self.points_paid.fetch_add(total_payout, Ordering::Relaxed);
    }

    pub fn record_round_cancelled(&self) {
        self.rounds_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bet_placed(&self) {
        self.bets_placed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bet_rejected(&self) {
        self.bets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settlement_skipped(&self) {
        self.settlements_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settlement_failure(&self) {
        self.settlement_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds_opened: self.rounds_opened.load(Ordering::Relaxed),
            rounds_settled: self.rounds_settled.load(Ordering::Relaxed),
            rounds_cancelled: self.rounds_cancelled.load(Ordering::Relaxed),
            bets_placed: self.bets_placed.load(Ordering::Relaxed),
            bets_rejected: self.bets_rejected.load(Ordering::Relaxed),
            settlements_skipped: self.settlements_skipped.load(Ordering::Relaxed),
            settlement_failures: self.settlement_failures.load(Ordering::Relaxed),
            points_wagered: self.points_wagered.load(Ordering::Relaxed),
            points_paid: self.points_paid.load(Ordering::Relaxed),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = TableMetrics::new();
        metrics.record_round_opened();
        metrics.record_bet_placed();
        metrics.record_bet_placed();
        metrics.record_bet_rejected();
        metrics.record_round_settled(3_000, 2_000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rounds_opened, 1);
        assert_eq!(snapshot.bets_placed, 2);
        assert_eq!(snapshot.bets_rejected, 1);
        assert_eq!(snapshot.rounds_settled, 1);
        assert_eq!(snapshot.points_wagered, 3_000);
        assert_eq!(snapshot.points_paid, 2_000);
        assert_eq!(snapshot.settlement_failures, 0);
    }
}
