//! Typed casino records on top of a [`KvBackend`].
//!
//! Logical layout, one prefix per record kind:
//! - `account:{chat}:{account}` – JSON [`Account`]
//! - `shoe:{chat}`              – bincode [`Shoe`]
//! - `round:{chat}`             – JSON [`Round`] (latest round of the chat)
//! - `bet:{chat}:{round}:{account}` – JSON [`Bet`]
//! - `house:{chat}`             – JSON [`HouseLedger`]
//! - `road:{chat}:{round}`      – JSON [`RoadEntry`], append-only
//!
//! Round numbers are zero-padded so prefix scans return them in order.

use crate::{
    errors::{CasinoError, CasinoResult, StorageError},
    games::{
        shoe::Shoe,
        types::{Account, AccountId, Bet, ChatId, HouseLedger, RoadEntry, Round, RoundId},
    },
    storage::{KvBackend, StoreBatch},
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

const ACCOUNT_PREFIX: &str = "account:";
const SHOE_PREFIX: &str = "shoe:";
const ROUND_PREFIX: &str = "round:";
const BET_PREFIX: &str = "bet:";
const HOUSE_PREFIX: &str = "house:";
const ROAD_PREFIX: &str = "road:";

fn account_key(chat: ChatId, account: AccountId) -> Vec<u8> {
    format!("{}{}:{}", ACCOUNT_PREFIX, chat.0, account.0).into_bytes()
}

fn shoe_key(chat: ChatId) -> Vec<u8> {
    format!("{}{}", SHOE_PREFIX, chat.0).into_bytes()
}

fn round_key(chat: ChatId) -> Vec<u8> {
    format!("{}{}", ROUND_PREFIX, chat.0).into_bytes()
}

fn bet_prefix(chat: ChatId, round: RoundId) -> Vec<u8> {
    format!("{}{}:{:020}:", BET_PREFIX, chat.0, round.0).into_bytes()
}

fn bet_key(chat: ChatId, round: RoundId, account: AccountId) -> Vec<u8> {
    let mut key = bet_prefix(chat, round);
    key.extend_from_slice(account.0.to_string().as_bytes());
    key
}

fn house_key(chat: ChatId) -> Vec<u8> {
    format!("{}{}", HOUSE_PREFIX, chat.0).into_bytes()
}

fn road_prefix(chat: ChatId) -> Vec<u8> {
    format!("{}{}:", ROAD_PREFIX, chat.0).into_bytes()
}

fn road_key(chat: ChatId, round: RoundId) -> Vec<u8> {
    let mut key = road_prefix(chat);
    key.extend_from_slice(format!("{:020}", round.0).as_bytes());
    key
}

fn encode<T: Serialize>(what: &str, value: &T) -> CasinoResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        CasinoError::Storage(StorageError::WriteFailed(format!(
            "Failed to encode {}: {}",
            what, e
        )))
    })
}

fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> CasinoResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        CasinoError::Storage(StorageError::CorruptedData(format!(
            "Failed to decode {}: {}",
            what, e
        )))
    })
}

/// Typed access to every persisted table record
#[derive(Clone)]
pub struct CasinoStore {
    backend: Arc<dyn KvBackend>,
}

impl CasinoStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Apply a batch of staged writes atomically
    pub fn commit(&self, batch: StoreBatch) -> CasinoResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.backend.write(batch)
    }

    fn load<T: DeserializeOwned>(&self, what: &str, key: &[u8]) -> CasinoResult<Option<T>> {
        match self.backend.get(key)? {
            Some(bytes) => decode(what, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn load_all<T: DeserializeOwned>(&self, what: &str, prefix: &[u8]) -> CasinoResult<Vec<T>> {
        self.backend
            .scan_prefix(prefix)?
            .iter()
            .map(|(_, bytes)| decode(what, bytes))
            .collect()
    }

    // Accounts

    pub fn load_account(&self, chat: ChatId, account: AccountId) -> CasinoResult<Option<Account>> {
        self.load("account", &account_key(chat, account))
    }

    pub fn load_accounts(&self, chat: ChatId) -> CasinoResult<Vec<Account>> {
        let prefix = format!("{}{}:", ACCOUNT_PREFIX, chat.0).into_bytes();
        self.load_all("account", &prefix)
    }

    pub fn stage_account(&self, batch: &mut StoreBatch, account: &Account) -> CasinoResult<()> {
        batch.put(account_key(account.chat, account.id), encode("account", account)?);
        Ok(())
    }

    // Shoe

    pub fn load_shoe(&self, chat: ChatId) -> CasinoResult<Option<Shoe>> {
        match self.backend.get(&shoe_key(chat))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist the shoe immediately; draws are not part of the settlement batch
    pub fn save_shoe(&self, chat: ChatId, shoe: &Shoe) -> CasinoResult<()> {
        let bytes = bincode::serialize(shoe).map_err(|e| {
            CasinoError::Storage(StorageError::WriteFailed(format!(
                "Failed to encode shoe for chat {}: {}",
                chat, e
            )))
        })?;
        let mut batch = StoreBatch::new();
        batch.put(shoe_key(chat), bytes);
        self.backend.write(batch)
    }

    // Rounds

    pub fn load_round(&self, chat: ChatId) -> CasinoResult<Option<Round>> {
        self.load("round", &round_key(chat))
    }

    /// Latest round of every chat, used for startup recovery
    pub fn load_all_rounds(&self) -> CasinoResult<Vec<Round>> {
        self.load_all("round", ROUND_PREFIX.as_bytes())
    }

    pub fn stage_round(&self, batch: &mut StoreBatch, round: &Round) -> CasinoResult<()> {
        batch.put(round_key(round.chat), encode("round", round)?);
        Ok(())
    }

    pub fn save_round(&self, round: &Round) -> CasinoResult<()> {
        let mut batch = StoreBatch::new();
        self.stage_round(&mut batch, round)?;
        self.backend.write(batch)
    }

    // Bets

    pub fn load_bet(&self, chat: ChatId, round: RoundId, account: AccountId) -> CasinoResult<Option<Bet>> {
        self.load("bet", &bet_key(chat, round, account))
    }

    pub fn load_bets(&self, chat: ChatId, round: RoundId) -> CasinoResult<Vec<Bet>> {
        self.load_all("bet", &bet_prefix(chat, round))
    }

    pub fn stage_bet(&self, batch: &mut StoreBatch, chat: ChatId, bet: &Bet) -> CasinoResult<()> {
        batch.put(bet_key(chat, bet.round, bet.account), encode("bet", bet)?);
        Ok(())
    }

    pub fn stage_bet_removal(&self, batch: &mut StoreBatch, chat: ChatId, bet: &Bet) {
        batch.delete(bet_key(chat, bet.round, bet.account));
    }

    // House ledger and outcome history

    pub fn load_ledger(&self, chat: ChatId) -> CasinoResult<HouseLedger> {
        Ok(self.load("house ledger", &house_key(chat))?.unwrap_or_default())
    }

    pub fn stage_ledger(&self, batch: &mut StoreBatch, chat: ChatId, ledger: &HouseLedger) -> CasinoResult<()> {
        batch.put(house_key(chat), encode("house ledger", ledger)?);
        Ok(())
    }

    pub fn load_road(&self, chat: ChatId) -> CasinoResult<Vec<RoadEntry>> {
        self.load_all("road entry", &road_prefix(chat))
    }

    pub fn stage_road_entry(&self, batch: &mut StoreBatch, chat: ChatId, entry: &RoadEntry) -> CasinoResult<()> {
        batch.put(road_key(chat, entry.round), encode("road entry", entry)?);
        Ok(())
    }
}
