use crate::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chat (table) identifier as assigned by the messaging transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Bettor identifier as assigned by the messaging transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AccountId(pub i64);

/// Per-chat round number, starting at 1
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn next(self) -> Self {
        RoundId(self.0 + 1)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A baccarat side: used both as a bet choice and as a round result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Player,
    Banker,
    Tie,
}

impl Side {
    /// Single-letter tag used by the scoreboard
    pub fn short(&self) -> char {
        match self {
            Side::Player => 'P',
            Side::Banker => 'B',
            Side::Tie => 'T',
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Player => write!(f, "PLAYER"),
            Side::Banker => write!(f, "BANKER"),
            Side::Tie => write!(f, "TIE"),
        }
    }
}

impl FromStr for Side {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" | "PLAYER" => Ok(Side::Player),
            "B" | "BANKER" => Ok(Side::Banker),
            "T" | "TIE" => Ok(Side::Tie),
            _ => Err(ValidationError::InvalidChoice(s.to_string())),
        }
    }
}

/// Bettor state within one chat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub chat: ChatId,
    pub id: AccountId,
    #[serde(default)]
    pub username: String,
    pub points: u64,
    pub win_streak: u32,
    pub max_streak: u32,
    pub total_bet: u64,
    pub total_won: u64,
}

impl Account {
    pub fn new(chat: ChatId, id: AccountId, username: impl Into<String>, starting_points: u64) -> Self {
        Self {
            chat,
            id,
            username: username.into(),
            points: starting_points,
            win_streak: 0,
            max_streak: 0,
            total_bet: 0,
            total_won: 0,
        }
    }

    /// Conditional decrement: only succeeds when the balance covers `amount`
    pub fn debit(&mut self, amount: u64) -> Result<(), ValidationError> {
        if amount > self.points {
            return Err(ValidationError::InsufficientBalance {
                requested: amount,
                available: self.points,
            });
        }
        self.points -= amount;
        Ok(())
    }

    pub fn credit(&mut self, amount: u64) {
        self.points += amount;
    }

    /// Display name, falling back to the numeric id
    pub fn display_name(&self) -> String {
        if self.username.is_empty() {
            self.id.to_string()
        } else {
            self.username.clone()
        }
    }
}

/// Round lifecycle: OPEN -> CLOSING -> CLOSED, each transition exactly once
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoundStatus {
    Open,
    Closing,
    Closed,
}

/// A single betting window in a chat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Round {
    pub chat: ChatId,
    pub id: RoundId,
    pub status: RoundStatus,
    pub opened_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

impl Round {
    pub fn is_open(&self) -> bool {
        self.status == RoundStatus::Open
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now >= self.closes_at
    }
}

/// The active wager of one account in one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bet {
    pub round: RoundId,
    pub account: AccountId,
    pub choice: Side,
    pub amount: u64,
    pub placed_at: DateTime<Utc>,
}

/// Per-chat house accumulator
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HouseLedger {
    /// Cumulative stakes minus cumulative credits
    pub profit: i64,
    pub rounds: u64,
}

/// One row of the append-only outcome history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoadEntry {
    pub round: RoundId,
    pub result: Side,
}
