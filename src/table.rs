//! Round manager
//!
//! `CasinoTable` owns the per-chat round lifecycle: opening rounds, taking
//! bets, settling through the shoe and the settlement reducer, and the
//! read-side queries used by the presentation layer. Every mutation of a chat
//! runs under that chat's async mutex, so a chat never sees two interleaved
//! writers. Chats are independent of each other.

use crate::{
    config::CasinoConfig,
    errors::{CasinoResult, ValidationError},
    games::{
        baccarat::resolve,
        road::BigRoad,
        settlement::{settle_bets, PayoutTable, SettlementReport},
        shoe::{ShoeDealer, ShoeRules, Shuffler},
        types::{Account, AccountId, Bet, ChatId, HouseLedger, RoadEntry, Round, RoundId, RoundStatus, Side},
    },
    metrics::{MetricsSnapshot, TableMetrics},
    scheduler::RoundScheduler,
    storage::StoreBatch,
    store::CasinoStore,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Confirmation of an accepted bet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetReceipt {
    pub bet: Bet,
    /// The bet this one replaced, already refunded
    pub replaced: Option<Bet>,
    pub balance_after: u64,
}

/// Result of a settlement request
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Settled(SettlementReport),
    /// The round was not OPEN; nothing changed
    Skipped { status: Option<RoundStatus> },
}

impl SettleOutcome {
    pub fn report(&self) -> Option<&SettlementReport> {
        match self {
            SettleOutcome::Settled(report) => Some(report),
            SettleOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledRound {
    pub round: RoundId,
    pub refunded_bets: usize,
    pub refunded_points: u64,
}

/// What startup recovery did with each unfinished round
#[derive(Debug, Default)]
pub struct RecoverySummary {
    /// Rounds still inside their betting window, timers re-armed
    pub rearmed: Vec<(ChatId, RoundId)>,
    /// CLOSING rounds reverted to OPEN
    pub rolled_back: Vec<(ChatId, RoundId)>,
    /// Rounds past their deadline, settled during recovery
    pub settled: Vec<SettlementReport>,
    /// Overdue rounds whose settlement failed; left OPEN
    pub failed: Vec<(ChatId, RoundId)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStats {
    pub account: Account,
    /// total_won - total_bet
    pub net: i64,
    pub roi_percent: f64,
}

impl AccountStats {
    fn from_account(account: Account) -> Self {
        let net = account.total_won as i64 - account.total_bet as i64;
        let roi_percent = if account.total_bet == 0 {
            0.0
        } else {
            net as f64 / account.total_bet as f64 * 100.0
        };
        Self {
            account,
            net,
            roi_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HouseStats {
    pub chat: ChatId,
    pub ledger: HouseLedger,
    pub player_wins: u32,
    pub banker_wins: u32,
    pub ties: u32,
    pub accounts: usize,
}

#[derive(Clone, Copy)]
enum Stake {
    Exact(i64),
    AllIn,
}

/// Per-chat baccarat tables sharing one store
pub struct CasinoTable {
    store: CasinoStore,
    config: CasinoConfig,
    payouts: PayoutTable,
    shoe_rules: ShoeRules,
    shuffler: Shuffler,
    scheduler: RoundScheduler,
    chat_locks: DashMap<ChatId, Arc<Mutex<()>>>,
    metrics: TableMetrics,
}

impl CasinoTable {
    pub fn new(store: CasinoStore, config: &CasinoConfig, scheduler: RoundScheduler) -> CasinoResult<Self> {
        config.validate()?;

        Ok(Self {
            store,
            payouts: PayoutTable::from(&config.payouts),
            shoe_rules: ShoeRules {
                deck_count: config.table.deck_count,
                reserve: config.table.reshuffle_reserve,
            },
            shuffler: Shuffler::new(config.table.shuffle_seed),
            config: config.clone(),
            scheduler,
            chat_locks: DashMap::new(),
            metrics: TableMetrics::new(),
        })
    }

    pub fn store(&self) -> &CasinoStore {
        &self.store
    }

    pub fn config(&self) -> &CasinoConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &RoundScheduler {
        &self.scheduler
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn lock_chat(&self, chat: ChatId) -> OwnedMutexGuard<()> {
        let lock = self
            .chat_locks
            .entry(chat)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn load_or_new_account(&self, chat: ChatId, id: AccountId) -> CasinoResult<Account> {
        Ok(self
            .store
            .load_account(chat, id)?
            .unwrap_or_else(|| Account::new(chat, id, "", self.config.table.starting_points)))
    }

    /// Create the account on first interaction and keep its username current
    pub async fn ensure_account(&self, chat: ChatId, id: AccountId, username: &str) -> CasinoResult<Account> {
        let _guard = self.lock_chat(chat).await;

        let (mut account, dirty) = match self.store.load_account(chat, id)? {
            Some(account) => (account, false),
            None => {
                tracing::info!(chat = %chat, account = %id, "Creating account");
                (Account::new(chat, id, "", self.config.table.starting_points), true)
            }
        };

        let renamed = !username.is_empty() && account.username != username;
        if renamed {
            account.username = username.to_string();
        }

        if dirty || renamed {
            let mut batch = StoreBatch::new();
            self.store.stage_account(&mut batch, &account)?;
            self.store.commit(batch)?;
        }
        Ok(account)
    }

    // Round lifecycle

    /// Open the next round, or return the round that is already open
    pub async fn open_round(&self, chat: ChatId) -> CasinoResult<Round> {
        let _guard = self.lock_chat(chat).await;

        let id = match self.store.load_round(chat)? {
            Some(round) if round.status == RoundStatus::Open => {
                tracing::debug!(chat = %chat, round = %round.id, "Round already open");
                return Ok(round);
            }
            Some(round) if round.status == RoundStatus::Closing => {
                return Err(ValidationError::SettlementInProgress { chat, round: round.id }.into());
            }
            Some(round) => round.id.next(),
            None => RoundId(1),
        };

        let opened_at = Utc::now();
        let round = Round {
            chat,
            id,
            status: RoundStatus::Open,
            opened_at,
            closes_at: opened_at + chrono::Duration::seconds(self.config.table.round_delay_secs as i64),
        };
        self.store.save_round(&round)?;
        self.scheduler.arm(chat, id, self.config.round_delay());
        self.metrics.record_round_opened();

        tracing::info!(chat = %chat, round = %id, closes_at = %round.closes_at, "Round opened");
        Ok(round)
    }

    /// Bet on the chat's open round
    pub async fn place_bet(&self, chat: ChatId, account: AccountId, choice: Side, amount: i64) -> CasinoResult<BetReceipt> {
        let _guard = self.lock_chat(chat).await;
        let result = self.current_open_round(chat).and_then(|round| {
            self.stake_locked(chat, round.id, account, choice, Stake::Exact(amount))
        });
        self.observe_bet(chat, account, &result);
        result
    }

    /// Bet on a specific round, rejecting the bet unless that round is OPEN
    pub async fn place_bet_in_round(
        &self,
        chat: ChatId,
        round: RoundId,
        account: AccountId,
        choice: Side,
        amount: i64,
    ) -> CasinoResult<BetReceipt> {
        let _guard = self.lock_chat(chat).await;
        let result = self.stake_locked(chat, round, account, choice, Stake::Exact(amount));
        self.observe_bet(chat, account, &result);
        result
    }

    /// Stake the whole balance, including any stake refunded from a prior bet
    pub async fn all_in(&self, chat: ChatId, account: AccountId, choice: Side) -> CasinoResult<BetReceipt> {
        let _guard = self.lock_chat(chat).await;
        let result = self
            .current_open_round(chat)
            .and_then(|round| self.stake_locked(chat, round.id, account, choice, Stake::AllIn));
        self.observe_bet(chat, account, &result);
        result
    }

    fn observe_bet(&self, chat: ChatId, account: AccountId, result: &CasinoResult<BetReceipt>) {
        match result {
            Ok(_) => self.metrics.record_bet_placed(),
            Err(e) if e.is_validation() => {
                self.metrics.record_bet_rejected();
                tracing::debug!(chat = %chat, account = %account, error = %e, "Bet rejected");
            }
            Err(e) => tracing::error!(chat = %chat, account = %account, error = %e, "Bet failed"),
        }
    }

    fn current_open_round(&self, chat: ChatId) -> CasinoResult<Round> {
        match self.store.load_round(chat)? {
            Some(round) if round.is_open() => Ok(round),
            _ => Err(ValidationError::NoOpenRound(chat).into()),
        }
    }

    fn require_open(&self, chat: ChatId, round: RoundId) -> CasinoResult<()> {
        match self.store.load_round(chat)? {
            Some(latest) if latest.id == round => {
                if latest.is_open() {
                    Ok(())
                } else {
                    Err(ValidationError::RoundNotOpen { chat, round, status: latest.status }.into())
                }
            }
            Some(latest) if latest.id > round => Err(ValidationError::RoundNotOpen {
                chat,
                round,
                status: RoundStatus::Closed,
            }
            .into()),
            _ => Err(ValidationError::UnknownRound { chat, round }.into()),
        }
    }

    /// Refund-then-debit upsert of the account's bet. Caller holds the chat lock.
    fn stake_locked(
        &self,
        chat: ChatId,
        round: RoundId,
        account_id: AccountId,
        choice: Side,
        stake: Stake,
    ) -> CasinoResult<BetReceipt> {
        if let Stake::Exact(amount) = stake {
            if amount <= 0 {
                return Err(ValidationError::NonPositiveAmount(amount).into());
            }
        }
        self.require_open(chat, round)?;

        let mut account = self.load_or_new_account(chat, account_id)?;
        let prior = self.store.load_bet(chat, round, account_id)?;
        let refund = prior.as_ref().map_or(0, |bet| bet.amount);

        // An exact stake is checked against the balance as submitted; only
        // all-in folds the refunded prior stake into the amount.
        let amount = match stake {
            Stake::Exact(amount) => {
                let amount = amount as u64;
                if amount > account.points {
                    return Err(ValidationError::InsufficientBalance {
                        requested: amount,
                        available: account.points,
                    }
                    .into());
                }
                amount
            }
            Stake::AllIn => match account.points + refund {
                0 => return Err(ValidationError::EmptyBalance(account_id).into()),
                total => total,
            },
        };

        account.credit(refund);
        account.debit(amount)?;

        let bet = Bet {
            round,
            account: account_id,
            choice,
            amount,
            placed_at: Utc::now(),
        };

        let mut batch = StoreBatch::new();
        self.store.stage_account(&mut batch, &account)?;
        self.store.stage_bet(&mut batch, chat, &bet)?;
        self.store.commit(batch)?;

        tracing::debug!(
            chat = %chat,
            round = %round,
            account = %account_id,
            choice = %choice,
            amount,
            replaced = refund,
            "Bet accepted"
        );

        Ok(BetReceipt {
            bet,
            replaced: prior,
            balance_after: account.points,
        })
    }

    /// Settle `round` if it is still OPEN; anything else is a no-op
    pub async fn request_settlement(&self, chat: ChatId, round_id: RoundId) -> CasinoResult<SettleOutcome> {
        let _guard = self.lock_chat(chat).await;

        let round = match self.store.load_round(chat)? {
            Some(round) if round.id == round_id && round.is_open() => round,
            latest => {
                let status = match latest {
                    Some(round) if round.id == round_id => Some(round.status),
                    Some(round) if round.id > round_id => Some(RoundStatus::Closed),
                    _ => None,
                };
                self.metrics.record_settlement_skipped();
                tracing::debug!(chat = %chat, round = %round_id, status = ?status, "Settlement skipped");
                return Ok(SettleOutcome::Skipped { status });
            }
        };

        self.scheduler.cancel(chat, round_id);

        let closing = Round {
            status: RoundStatus::Closing,
            ..round.clone()
        };
        if let Err(e) = self.store.save_round(&closing) {
            self.metrics.record_settlement_failure();
            tracing::error!(chat = %chat, round = %round_id, error = %e, "Failed to mark round CLOSING");
            return Err(e);
        }

        match self.settle_closing(&closing) {
            Ok(report) => {
                self.metrics.record_round_settled(report.total_bet, report.total_payout);
                tracing::info!(
                    chat = %chat,
                    round = %round_id,
                    result = %report.result(),
                    bets = report.lines.len(),
                    house_delta = report.house_delta,
                    "Round closed"
                );
                Ok(SettleOutcome::Settled(report))
            }
            Err(e) => {
                self.metrics.record_settlement_failure();
                tracing::error!(chat = %chat, round = %round_id, error = %e, "Settlement failed, reopening round");
                if let Err(rollback) = self.store.save_round(&round) {
                    tracing::error!(chat = %chat, round = %round_id, error = %rollback, "Failed to reopen round");
                }
                Err(e)
            }
        }
    }

    /// Deal the coup and commit every effect of the round in one batch
    fn settle_closing(&self, round: &Round) -> CasinoResult<SettlementReport> {
        let chat = round.chat;

        let mut dealer = ShoeDealer::new(&self.store, &self.shuffler, self.shoe_rules, chat);
        let outcome = resolve(&mut dealer)?;

        let bets = self.store.load_bets(chat, round.id)?;
        let mut accounts = HashMap::with_capacity(bets.len());
        for bet in &bets {
            if let Some(account) = self.store.load_account(chat, bet.account)? {
                accounts.insert(bet.account, account);
            }
        }

        let tally = settle_bets(outcome.result, &bets, &mut accounts, &self.payouts)?;
        let ledger = tally.apply_to(&self.store.load_ledger(chat)?);

        let mut batch = StoreBatch::new();
        for account in accounts.values() {
            self.store.stage_account(&mut batch, account)?;
        }
        for bet in &bets {
            self.store.stage_bet_removal(&mut batch, chat, bet);
        }
        self.store.stage_ledger(&mut batch, chat, &ledger)?;
        self.store.stage_road_entry(
            &mut batch,
            chat,
            &RoadEntry {
                round: round.id,
                result: outcome.result,
            },
        )?;
        self.store.stage_round(
            &mut batch,
            &Round {
                status: RoundStatus::Closed,
                ..round.clone()
            },
        )?;
        self.store.commit(batch)?;

        Ok(SettlementReport {
            report_id: Uuid::new_v4(),
            chat,
            round: round.id,
            outcome,
            total_bet: tally.total_bet,
            total_payout: tally.total_payout,
            house_delta: tally.house_delta(),
            lines: tally.lines,
            ledger,
            settled_at: Utc::now(),
        })
    }

    /// Stop the open round without dealing: refund every stake and close it.
    /// The ledger and outcome history are left untouched.
    pub async fn cancel_round(&self, chat: ChatId) -> CasinoResult<Option<CancelledRound>> {
        let _guard = self.lock_chat(chat).await;

        let round = match self.store.load_round(chat)? {
            Some(round) if round.is_open() => round,
            _ => return Ok(None),
        };

        let bets = self.store.load_bets(chat, round.id)?;
        let mut accounts: HashMap<AccountId, Account> = HashMap::with_capacity(bets.len());
        let mut batch = StoreBatch::new();
        let mut refunded_points = 0;

        for bet in &bets {
            let account = match accounts.entry(bet.account) {
                std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(self.load_or_new_account(chat, bet.account)?)
                }
            };
            account.credit(bet.amount);
            refunded_points += bet.amount;
            self.store.stage_bet_removal(&mut batch, chat, bet);
        }
        for account in accounts.values() {
            self.store.stage_account(&mut batch, account)?;
        }
        self.store.stage_round(
            &mut batch,
            &Round {
                status: RoundStatus::Closed,
                ..round.clone()
            },
        )?;
        self.store.commit(batch)?;

        self.scheduler.cancel(chat, round.id);
        self.metrics.record_round_cancelled();
        tracing::info!(chat = %chat, round = %round.id, bets = bets.len(), refunded_points, "Round cancelled");

        Ok(Some(CancelledRound {
            round: round.id,
            refunded_bets: bets.len(),
            refunded_points,
        }))
    }

    /// Restore timers after a restart.
    ///
    /// CLOSING rounds are reverted to OPEN (their settlement batch never
    /// committed). OPEN rounds inside their window get a timer for the
    /// remaining time; overdue ones are settled before this returns.
    pub async fn recover(&self, now: DateTime<Utc>) -> CasinoResult<RecoverySummary> {
        let mut summary = RecoverySummary::default();
        let mut overdue = Vec::new();

        for round in self.store.load_all_rounds()? {
            let key = (round.chat, round.id);
            let round = match round.status {
                RoundStatus::Closed => continue,
                RoundStatus::Closing => {
                    let _guard = self.lock_chat(round.chat).await;
                    let reopened = Round {
                        status: RoundStatus::Open,
                        ..round
                    };
                    self.store.save_round(&reopened)?;
                    tracing::warn!(chat = %reopened.chat, round = %reopened.id, "Reverted interrupted settlement");
                    summary.rolled_back.push(key);
                    reopened
                }
                RoundStatus::Open => round,
            };

            if round.is_overdue(now) {
                overdue.push(key);
            } else {
                let remaining = (round.closes_at - now).to_std().unwrap_or(Duration::ZERO);
                self.scheduler.arm(round.chat, round.id, remaining);
                summary.rearmed.push(key);
            }
        }

        for (chat, round) in overdue {
            match self.request_settlement(chat, round).await {
                Ok(SettleOutcome::Settled(report)) => summary.settled.push(report),
                Ok(SettleOutcome::Skipped { .. }) => {}
                Err(e) => {
                    tracing::error!(chat = %chat, round = %round, error = %e, "Overdue round could not be settled");
                    summary.failed.push((chat, round));
                }
            }
        }

        tracing::info!(
            rearmed = summary.rearmed.len(),
            rolled_back = summary.rolled_back.len(),
            settled = summary.settled.len(),
            failed = summary.failed.len(),
            "Recovery complete"
        );
        Ok(summary)
    }

    // Read side

    pub fn account(&self, chat: ChatId, id: AccountId) -> CasinoResult<Option<Account>> {
        self.store.load_account(chat, id)
    }

    pub fn account_stats(&self, chat: ChatId, id: AccountId) -> CasinoResult<Option<AccountStats>> {
        Ok(self.store.load_account(chat, id)?.map(AccountStats::from_account))
    }

    /// Top `limit` accounts by balance, ties broken by best streak
    pub fn leaderboard(&self, chat: ChatId, limit: usize) -> CasinoResult<Vec<Account>> {
        let mut accounts = self.store.load_accounts(chat)?;
        accounts.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then(b.max_streak.cmp(&a.max_streak))
                .then(a.id.cmp(&b.id))
        });
        accounts.truncate(limit);
        Ok(accounts)
    }

    pub fn house_stats(&self, chat: ChatId) -> CasinoResult<HouseStats> {
        let road = self.big_road(chat)?;
        Ok(HouseStats {
            chat,
            ledger: self.store.load_ledger(chat)?,
            player_wins: road.player_wins,
            banker_wins: road.banker_wins,
            ties: road.ties,
            accounts: self.store.load_accounts(chat)?.len(),
        })
    }

    pub fn outcome_history(&self, chat: ChatId) -> CasinoResult<Vec<RoadEntry>> {
        self.store.load_road(chat)
    }

    pub fn big_road(&self, chat: ChatId) -> CasinoResult<BigRoad> {
        Ok(BigRoad::from_history(&self.store.load_road(chat)?))
    }

    /// Latest round of the chat, whatever its status
    pub fn current_round(&self, chat: ChatId) -> CasinoResult<Option<Round>> {
        self.store.load_round(chat)
    }

    /// Bets standing on the chat's open round
    pub fn open_bets(&self, chat: ChatId) -> CasinoResult<Vec<Bet>> {
        match self.store.load_round(chat)? {
            Some(round) if round.is_open() => self.store.load_bets(chat, round.id),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::errors::{CasinoError, StorageError};
    use crate::games::cards::{Card, Rank, Suit};
    use crate::games::settlement::BetOutcome;
    use crate::games::shoe::Shoe;
    use crate::storage::{KvBackend, MemoryBackend, WriteOp};
    use std::sync::atomic::{AtomicBool, Ordering};
    use Rank::*;

    const CHAT: ChatId = ChatId(-1001);
    const ALICE: AccountId = AccountId(1);
    const BOB: AccountId = AccountId(2);

    fn config() -> CasinoConfig {
        ConfigBuilder::from_config(CasinoConfig::testing())
            .round_delay_secs(60)
            .build()
            .unwrap()
    }

    fn table_on(backend: Arc<dyn KvBackend>) -> CasinoTable {
        let (scheduler, _rx) = RoundScheduler::new();
        CasinoTable::new(CasinoStore::new(backend), &config(), scheduler).unwrap()
    }

    fn table() -> CasinoTable {
        table_on(Arc::new(MemoryBackend::new()))
    }

    /// Put `ranks` on top of the chat's shoe, padded so no reshuffle happens
    fn stack_shoe(table: &CasinoTable, chat: ChatId, ranks: &[Rank]) {
        let mut cards: Vec<Card> = ranks.iter().map(|&r| Card::new(r, Suit::Spades)).collect();
        cards.extend(std::iter::repeat(Card::new(King, Suit::Clubs)).take(12));
        table.store().save_shoe(chat, &Shoe::from_cards(cards)).unwrap();
    }

    // Player 9 vs banker 5, both naturals checked
    const PLAYER_NATURAL: [Rank; 4] = [Four, Five, Two, Three];
    const BANKER_NATURAL: [Rank; 4] = [Two, Three, Four, Five];
    const NATURAL_TIE: [Rank; 4] = [Four, Five, Nine, King];

    async fn settle(table: &CasinoTable, round: RoundId) -> SettlementReport {
        match table.request_settlement(CHAT, round).await.unwrap() {
            SettleOutcome::Settled(report) => report,
            other => panic!("expected settlement, got {:?}", other),
        }
    }

    fn balance(table: &CasinoTable, account: AccountId) -> u64 {
        table.account(CHAT, account).unwrap().unwrap().points
    }

    #[tokio::test]
    async fn test_player_win_scenario() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        assert_eq!(round.id, RoundId(1));
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();
        assert_eq!(balance(&table, ALICE), 199_000);

        stack_shoe(&table, CHAT, &PLAYER_NATURAL);
        let report = settle(&table, round.id).await;

        assert_eq!(report.result(), Side::Player);
        assert!(report.outcome.natural);
        assert_eq!(balance(&table, ALICE), 201_000);
        assert_eq!(table.current_round(CHAT).unwrap().unwrap().status, RoundStatus::Closed);
        assert!(table.store().load_bets(CHAT, round.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_banker_win_scenario() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Banker, 1_000).await.unwrap();

        stack_shoe(&table, CHAT, &BANKER_NATURAL);
        let report = settle(&table, round.id).await;

        assert_eq!(report.result(), Side::Banker);
        assert_eq!(balance(&table, ALICE), 200_950);
    }

    #[tokio::test]
    async fn test_tie_scenarios() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();
        table.place_bet(CHAT, BOB, Side::Tie, 1_000).await.unwrap();

        stack_shoe(&table, CHAT, &NATURAL_TIE);
        let report = settle(&table, round.id).await;

        assert_eq!(report.result(), Side::Tie);
        assert_eq!(balance(&table, ALICE), 200_000);
        assert_eq!(balance(&table, BOB), 207_000);
        assert_eq!(report.line_for(ALICE).unwrap().outcome, BetOutcome::Push);
        // 2000 staked, 1000 refunded + 8000 paid
        assert_eq!(report.house_delta, -7_000);
        assert_eq!(table.house_stats(CHAT).unwrap().ledger.profit, -7_000);
    }

    #[tokio::test]
    async fn test_ledger_delta_scenario() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();
        table.place_bet(CHAT, BOB, Side::Banker, 3_000).await.unwrap();

        stack_shoe(&table, CHAT, &PLAYER_NATURAL);
        let report = settle(&table, round.id).await;

        assert_eq!(report.house_delta, 2_000);
        assert_eq!(report.ledger, HouseLedger { profit: 2_000, rounds: 1 });
        assert_eq!(balance(&table, ALICE), 201_000);
        assert_eq!(balance(&table, BOB), 197_000);

        let history = table.outcome_history(CHAT).unwrap();
        assert_eq!(history, vec![RoadEntry { round: RoundId(1), result: Side::Player }]);
    }

    #[tokio::test]
    async fn test_rebet_replaces_prior_bet() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 500).await.unwrap();
        let receipt = table.place_bet(CHAT, ALICE, Side::Banker, 800).await.unwrap();

        assert_eq!(receipt.replaced.map(|b| b.amount), Some(500));
        assert_eq!(receipt.balance_after, 199_200);

        let bets = table.store().load_bets(CHAT, round.id).unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].choice, Side::Banker);
        assert_eq!(bets[0].amount, 800);
    }

    #[tokio::test]
    async fn test_rebet_is_limited_to_current_balance() {
        let table = table();
        table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 150_000).await.unwrap();

        let err = table.place_bet(CHAT, ALICE, Side::Banker, 200_000).await.unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::InsufficientBalance {
                requested: 200_000,
                available: 50_000
            })
        );
        assert_eq!(balance(&table, ALICE), 50_000);
        let bets = table.open_bets(CHAT).unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!((bets[0].choice, bets[0].amount), (Side::Player, 150_000));

        let receipt = table.place_bet(CHAT, ALICE, Side::Banker, 50_000).await.unwrap();
        assert_eq!(receipt.balance_after, 150_000);
    }


    #[tokio::test]
    async fn test_invalid_bets_leave_state_untouched() {
        let table = table();

        let err = table.place_bet(CHAT, ALICE, Side::Player, 100).await.unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::NoOpenRound(CHAT)));

        let round = table.open_round(CHAT).await.unwrap();
        for amount in [0, -50] {
            let err = table.place_bet(CHAT, ALICE, Side::Player, amount).await.unwrap_err();
            assert_eq!(err.as_validation(), Some(&ValidationError::NonPositiveAmount(amount)));
        }
        let err = table.place_bet(CHAT, ALICE, Side::Tie, 200_001).await.unwrap_err();
        assert!(err.is_validation());

        let err = table
            .place_bet_in_round(CHAT, RoundId(7), ALICE, Side::Tie, 10)
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::UnknownRound { chat: CHAT, round: RoundId(7) })
        );

        assert!(table.store().load_bets(CHAT, round.id).unwrap().is_empty());
        assert!(table.account(CHAT, ALICE).unwrap().is_none());
        assert_eq!(table.metrics().bets_rejected, 5);
    }

    #[tokio::test]
    async fn test_bets_rejected_after_close() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        stack_shoe(&table, CHAT, &PLAYER_NATURAL);
        settle(&table, round.id).await;

        let err = table
            .place_bet_in_round(CHAT, round.id, ALICE, Side::Player, 10)
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::RoundNotOpen {
                chat: CHAT,
                round: round.id,
                status: RoundStatus::Closed
            })
        );
    }

    #[tokio::test]
    async fn test_open_round_is_idempotent_and_numbers_increase() {
        let table = table();
        let first = table.open_round(CHAT).await.unwrap();
        let again = table.open_round(CHAT).await.unwrap();
        assert_eq!(first, again);
        assert!(table.scheduler().is_armed(CHAT, first.id));

        stack_shoe(&table, CHAT, &PLAYER_NATURAL);
        settle(&table, first.id).await;
        assert!(!table.scheduler().is_armed(CHAT, first.id));

        let second = table.open_round(CHAT).await.unwrap();
        assert_eq!(second.id, RoundId(2));

        let other_chat = table.open_round(ChatId(5)).await.unwrap();
        assert_eq!(other_chat.id, RoundId(1));
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();
        stack_shoe(&table, CHAT, &PLAYER_NATURAL);
        settle(&table, round.id).await;

        let shoe_before = table.store().load_shoe(CHAT).unwrap();
        let again = table.request_settlement(CHAT, round.id).await.unwrap();
        assert!(matches!(again, SettleOutcome::Skipped { status: Some(RoundStatus::Closed) }));

        assert_eq!(balance(&table, ALICE), 201_000);
        assert_eq!(table.store().load_shoe(CHAT).unwrap(), shoe_before);
        assert_eq!(table.house_stats(CHAT).unwrap().ledger.rounds, 1);
        assert_eq!(table.outcome_history(CHAT).unwrap().len(), 1);

        let unknown = table.request_settlement(ChatId(77), RoundId(1)).await.unwrap();
        assert!(matches!(unknown, SettleOutcome::Skipped { status: None }));
    }

    #[tokio::test]
    async fn test_all_in_stakes_whole_balance() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();

        let receipt = table.all_in(CHAT, ALICE, Side::Banker).await.unwrap();
        assert_eq!(receipt.bet.amount, 200_000);
        assert_eq!(receipt.balance_after, 0);

        stack_shoe(&table, CHAT, &PLAYER_NATURAL);
        settle(&table, round.id).await;
        assert_eq!(balance(&table, ALICE), 0);

        table.open_round(CHAT).await.unwrap();
        let err = table.all_in(CHAT, ALICE, Side::Tie).await.unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::EmptyBalance(ALICE)));
    }

    #[tokio::test]
    async fn test_cancel_round_refunds_without_touching_ledger() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();
        table.place_bet(CHAT, BOB, Side::Tie, 2_500).await.unwrap();

        let cancelled = table.cancel_round(CHAT).await.unwrap().unwrap();
        assert_eq!(
            cancelled,
            CancelledRound {
                round: round.id,
                refunded_bets: 2,
                refunded_points: 3_500
            }
        );
        assert_eq!(balance(&table, ALICE), 200_000);
        assert_eq!(balance(&table, BOB), 200_000);
        assert_eq!(table.house_stats(CHAT).unwrap().ledger, HouseLedger::default());
        assert!(table.outcome_history(CHAT).unwrap().is_empty());
        assert!(!table.scheduler().is_armed(CHAT, round.id));

        assert!(table.cancel_round(CHAT).await.unwrap().is_none());
        assert_eq!(table.open_round(CHAT).await.unwrap().id, RoundId(2));
    }

    #[tokio::test]
    async fn test_streak_bonus_across_rounds() {
        let table = table();
        for (i, expected) in [(1u64, 202_000u64), (2, 204_040)] {
            let round = table.open_round(CHAT).await.unwrap();
            assert_eq!(round.id, RoundId(i));
            table.place_bet(CHAT, ALICE, Side::Player, 2_000).await.unwrap();
            stack_shoe(&table, CHAT, &PLAYER_NATURAL);
            settle(&table, round.id).await;
            assert_eq!(balance(&table, ALICE), expected);
        }

        let stats = table.account_stats(CHAT, ALICE).unwrap().unwrap();
        assert_eq!(stats.account.win_streak, 2);
        assert_eq!(stats.account.max_streak, 2);
        // 4000 + 4040 won on 4000 staked
        assert_eq!(stats.net, 4_040);
        assert!((stats.roi_percent - 101.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_rebets_keep_one_stake() {
        let table = Arc::new(table());
        table.open_round(CHAT).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                table.place_bet(CHAT, ALICE, Side::Banker, 30_000).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(balance(&table, ALICE), 170_000);
        assert_eq!(table.open_bets(CHAT).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leaderboard_orders_by_balance_then_streak() {
        let table = table();
        let round = table.open_round(CHAT).await.unwrap();
        table.ensure_account(CHAT, AccountId(3), "carol").await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();
        table.place_bet(CHAT, BOB, Side::Banker, 1_000).await.unwrap();
        stack_shoe(&table, CHAT, &PLAYER_NATURAL);
        settle(&table, round.id).await;

        let top: Vec<AccountId> = table.leaderboard(CHAT, 10).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(top, vec![ALICE, AccountId(3), BOB]);
        assert_eq!(table.leaderboard(CHAT, 1).unwrap().len(), 1);

        let stats = table.house_stats(CHAT).unwrap();
        assert_eq!(stats.player_wins, 1);
        assert_eq!(stats.accounts, 3);
    }

    #[tokio::test]
    async fn test_ensure_account_updates_username() {
        let table = table();
        let account = table.ensure_account(CHAT, ALICE, "").await.unwrap();
        assert_eq!(account.points, 200_000);
        assert_eq!(account.display_name(), "1");

        let renamed = table.ensure_account(CHAT, ALICE, "alice").await.unwrap();
        assert_eq!(renamed.username, "alice");
        assert_eq!(table.account(CHAT, ALICE).unwrap().unwrap().username, "alice");
    }

    /// Rejects any batch touching the house ledger while `fail` is set
    struct FailingSettlementBackend {
        inner: MemoryBackend,
        fail: AtomicBool,
    }

    impl KvBackend for FailingSettlementBackend {
        fn get(&self, key: &[u8]) -> CasinoResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn scan_prefix(&self, prefix: &[u8]) -> CasinoResult<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan_prefix(prefix)
        }

        fn write(&self, batch: StoreBatch) -> CasinoResult<()> {
            let touches_ledger = batch.ops().iter().any(|op| match op {
                WriteOp::Put(key, _) | WriteOp::Delete(key) => key.starts_with(b"house:"),
            });
            if touches_ledger && self.fail.load(Ordering::SeqCst) {
                return Err(CasinoError::Storage(StorageError::WriteFailed("disk full".to_string())));
            }
            self.inner.write(batch)
        }
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_round_open() {
        let backend = Arc::new(FailingSettlementBackend {
            inner: MemoryBackend::new(),
            fail: AtomicBool::new(true),
        });
        let table = table_on(backend.clone());
        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();
        stack_shoe(&table, CHAT, &PLAYER_NATURAL);

        assert!(table.request_settlement(CHAT, round.id).await.is_err());
        assert_eq!(table.current_round(CHAT).unwrap().unwrap().status, RoundStatus::Open);
        assert_eq!(balance(&table, ALICE), 199_000);
        assert_eq!(table.open_bets(CHAT).unwrap().len(), 1);
        assert!(table.outcome_history(CHAT).unwrap().is_empty());
        assert_eq!(table.house_stats(CHAT).unwrap().ledger, HouseLedger::default());
        assert_eq!(table.metrics().settlement_failures, 1);

        backend.fail.store(false, Ordering::SeqCst);
        let report = settle(&table, round.id).await;
        assert_eq!(report.lines.len(), 1);
        assert_eq!(table.current_round(CHAT).unwrap().unwrap().status, RoundStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_settlement() {
        let (scheduler, mut requests) = RoundScheduler::new();
        let table = CasinoTable::new(
            CasinoStore::new(Arc::new(MemoryBackend::new())),
            &config(),
            scheduler,
        )
        .unwrap();

        let round = table.open_round(CHAT).await.unwrap();
        table.place_bet(CHAT, ALICE, Side::Banker, 1_000).await.unwrap();
        stack_shoe(&table, CHAT, &BANKER_NATURAL);

        let start = tokio::time::Instant::now();
        let request = requests.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!((request.chat, request.round), (CHAT, round.id));

        let outcome = table.request_settlement(request.chat, request.round).await.unwrap();
        assert!(outcome.report().is_some());
        assert_eq!(balance(&table, ALICE), 200_950);
    }

    #[tokio::test]
    async fn test_recovery_settles_overdue_and_reverts_closing() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let before = table_on(Arc::clone(&backend));
        let round = before.open_round(CHAT).await.unwrap();
        before.place_bet(CHAT, ALICE, Side::Player, 1_000).await.unwrap();

        // Crash in the middle of settling CHAT's round
        before
            .store()
            .save_round(&Round {
                status: RoundStatus::Closing,
                ..round.clone()
            })
            .unwrap();
        drop(before);

        let after = table_on(backend);
        stack_shoe(&after, CHAT, &PLAYER_NATURAL);
        let now = round.closes_at + chrono::Duration::seconds(1);
        let summary = after.recover(now).await.unwrap();

        assert_eq!(summary.rolled_back, vec![(CHAT, round.id)]);
        assert_eq!(summary.settled.len(), 1);
        assert_eq!(balance(&after, ALICE), 201_000);
        assert!(summary.failed.is_empty());
        assert!(summary.rearmed.is_empty());
        assert_eq!(after.current_round(CHAT).unwrap().unwrap().status, RoundStatus::Closed);
    }

    #[tokio::test]
    async fn test_recovery_rearms_rounds_in_window() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let before = table_on(Arc::clone(&backend));
        let round = before.open_round(CHAT).await.unwrap();
        drop(before);

        let after = table_on(backend);
        let summary = after.recover(round.opened_at).await.unwrap();
        assert_eq!(summary.rearmed, vec![(CHAT, round.id)]);
        assert!(summary.settled.is_empty());
        assert!(after.scheduler().is_armed(CHAT, round.id));
        assert_eq!(after.current_round(CHAT).unwrap().unwrap().status, RoundStatus::Open);
    }
}
