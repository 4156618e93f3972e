//! Settlement reducer
//!
//! Turns a round result plus its bets into per-account credits, streak
//! updates and round totals. Pure: the caller stages the mutated accounts
//! and the returned tally into a single atomic batch.

use crate::config::{PayoutConfig, StreakBonusConfig, BPS_SCALE};
use crate::errors::{CasinoError, CasinoResult, StorageError};
use crate::games::baccarat::BaccaratOutcome;
use crate::games::types::{Account, AccountId, Bet, ChatId, HouseLedger, RoundId, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Multiplier applied to a pushed stake
pub const PUSH_BPS: u64 = BPS_SCALE;

/// Payout multipliers in basis points, stake included
#[derive(Debug, Clone)]
pub struct PayoutTable {
    pub player_bps: u64,
    pub banker_bps: u64,
    pub tie_bps: u64,
    pub streak: StreakBonusConfig,
}

impl Default for PayoutTable {
    fn default() -> Self {
        Self::from(&PayoutConfig::default())
    }
}

impl From<&PayoutConfig> for PayoutTable {
    fn from(config: &PayoutConfig) -> Self {
        Self {
            player_bps: config.player_bps,
            banker_bps: config.banker_bps,
            tie_bps: config.tie_bps,
            streak: config.streak_bonus.clone(),
        }
    }
}

impl PayoutTable {
    pub fn base_bps(&self, side: Side) -> u64 {
        match side {
            Side::Player => self.player_bps,
            Side::Banker => self.banker_bps,
            Side::Tie => self.tie_bps,
        }
    }

    /// Additive bonus for a PLAYER/BANKER win that brings the streak to `streak`
    pub fn streak_bonus_bps(&self, streak: u32) -> u64 {
        let bonus = &self.streak;
        if !bonus.enabled || streak < bonus.start {
            return 0;
        }
        let steps = u64::from(streak - bonus.start + 1);
        (steps * bonus.step_bps).min(bonus.max_bps)
    }
}

/// floor(amount x multiplier), exact in integer arithmetic
pub fn apply_multiplier(amount: u64, bps: u64) -> u64 {
    (u128::from(amount) * u128::from(bps) / u128::from(BPS_SCALE)) as u64
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BetOutcome {
    Win,
    /// Stake returned on a tie
    Push,
    Loss,
}

/// One bettor's line in the settlement report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutLine {
    pub account: AccountId,
    pub display_name: String,
    pub choice: Side,
    pub stake: u64,
    /// Amount credited back to the balance, stake included
    pub payout: u64,
    pub multiplier_bps: u64,
    pub outcome: BetOutcome,
    pub win_streak: u32,
    pub balance_after: u64,
}

impl PayoutLine {
    pub fn net(&self) -> i64 {
        self.payout as i64 - self.stake as i64
    }
}

/// Figures shared by the per-bet lines and the ledger update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementTally {
    pub lines: Vec<PayoutLine>,
    pub total_bet: u64,
    pub total_payout: u64,
}

impl SettlementTally {
    /// House gain for the round: stakes minus every credit, refunds included
    pub fn house_delta(&self) -> i64 {
        self.total_bet as i64 - self.total_payout as i64
    }

    pub fn apply_to(&self, ledger: &HouseLedger) -> HouseLedger {
        HouseLedger {
            profit: ledger.profit + self.house_delta(),
            rounds: ledger.rounds + 1,
        }
    }
}

/// Settle every bet of a round against `result`, mutating the bettors' accounts
pub fn settle_bets(
    result: Side,
    bets: &[Bet],
    accounts: &mut HashMap<AccountId, Account>,
    table: &PayoutTable,
) -> CasinoResult<SettlementTally> {
    let mut tally = SettlementTally::default();

    for bet in bets {
        let account = accounts.get_mut(&bet.account).ok_or_else(|| {
            CasinoError::Storage(StorageError::CorruptedData(format!(
                "Bet in round {} references missing account {}",
                bet.round, bet.account
            )))
        })?;

        let (outcome, multiplier_bps, streak) = match (result, bet.choice) {
            (Side::Tie, Side::Tie) => (BetOutcome::Win, table.tie_bps, account.win_streak + 1),
            (Side::Tie, _) => (BetOutcome::Push, PUSH_BPS, 0),
            (result, choice) if result == choice => {
                let streak = account.win_streak + 1;
                let bps = table.base_bps(choice) + table.streak_bonus_bps(streak);
                (BetOutcome::Win, bps, streak)
            }
            _ => (BetOutcome::Loss, 0, 0),
        };

        let payout = apply_multiplier(bet.amount, multiplier_bps);

        account.credit(payout);
        account.win_streak = streak;
        account.max_streak = account.max_streak.max(streak);
        account.total_bet += bet.amount;
        account.total_won += payout;

        tally.total_bet += bet.amount;
        tally.total_payout += payout;
        tally.lines.push(PayoutLine {
            account: bet.account,
            display_name: account.display_name(),
            choice: bet.choice,
            stake: bet.amount,
            payout,
            multiplier_bps,
            outcome,
            win_streak: streak,
            balance_after: account.points,
        });
    }

    Ok(tally)
}

/// Everything the presentation layer needs to announce a settled round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    pub report_id: Uuid,
    pub chat: ChatId,
    pub round: RoundId,
    pub outcome: BaccaratOutcome,
    pub lines: Vec<PayoutLine>,
    pub total_bet: u64,
    pub total_payout: u64,
    pub house_delta: i64,
    pub ledger: HouseLedger,
    pub settled_at: DateTime<Utc>,
}

impl SettlementReport {
    pub fn result(&self) -> Side {
        self.outcome.result
    }

    pub fn line_for(&self, account: AccountId) -> Option<&PayoutLine> {
        self.lines.iter().find(|l| l.account == account)
    }
}
