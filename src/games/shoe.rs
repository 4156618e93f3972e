//! Multi-deck shoe with cursor-based dealing and automatic reshuffle
//!
//! A chat's shoe is created on its first draw and persisted after every
//! draw. When fewer than `reserve` cards remain the whole shoe is replaced by
//! a freshly shuffled one, so from the caller's point of view it never runs out.

use crate::{
    errors::{CasinoError, CasinoResult, StorageError},
    games::cards::{standard_deck, Card},
    games::types::ChatId,
    store::CasinoStore,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Anything the resolver can pull cards from
pub trait CardSource {
    fn draw(&mut self) -> CasinoResult<Card>;
}

/// Shoe composition and reshuffle policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShoeRules {
    pub deck_count: usize,
    pub reserve: usize,
}

impl Default for ShoeRules {
    fn default() -> Self {
        Self {
            deck_count: 8,
            reserve: 6,
        }
    }
}

/// Ordered cards plus the position of the next card to deal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shoe {
    pub cards: Vec<Card>,
    pub cursor: usize,
    /// Incremented on every reshuffle
    #[serde(default)]
    pub generation: u64,
}

impl Shoe {
    /// Wrap an already ordered card sequence
    pub fn from_cards(cards: Vec<Card>) -> Self {
        Self {
            cards,
            cursor: 0,
            generation: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.cards.len().saturating_sub(self.cursor)
    }

    pub fn needs_reshuffle(&self, reserve: usize) -> bool {
        self.remaining() < reserve
    }

    /// Deal the card under the cursor; `None` only when the shoe is exhausted
    pub fn deal(&mut self) -> Option<Card> {
        let card = self.cards.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(card)
    }
}

/// Source of shuffled shoes, optionally seeded for reproducible tables
pub struct Shuffler {
    rng: Mutex<StdRng>,
}

impl Shuffler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// `deck_count` standard decks combined and shuffled uniformly
    pub fn fresh_shoe(&self, deck_count: usize, generation: u64) -> CasinoResult<Shoe> {
        let mut cards: Vec<Card> = (0..deck_count).flat_map(|_| standard_deck()).collect();
        let mut rng = self.rng.lock().map_err(|_| {
            CasinoError::Storage(StorageError::LockPoisoned("shuffler".to_string()))
        })?;
        cards.shuffle(&mut *rng);
        Ok(Shoe {
            cards,
            cursor: 0,
            generation,
        })
    }
}

/// Draws from a chat's persisted shoe, saving the shoe after every card
pub struct ShoeDealer<'a> {
    store: &'a CasinoStore,
    shuffler: &'a Shuffler,
    rules: ShoeRules,
    chat: ChatId,
}

impl<'a> ShoeDealer<'a> {
    pub fn new(store: &'a CasinoStore, shuffler: &'a Shuffler, rules: ShoeRules, chat: ChatId) -> Self {
        Self {
            store,
            shuffler,
            rules,
            chat,
        }
    }
}

impl CardSource for ShoeDealer<'_> {
    fn draw(&mut self) -> CasinoResult<Card> {
        let mut shoe = match self.store.load_shoe(self.chat)? {
            Some(shoe) => shoe,
            None => {
                tracing::info!(chat = %self.chat, decks = self.rules.deck_count, "Creating new shoe");
                self.shuffler.fresh_shoe(self.rules.deck_count, 0)?
            }
        };

        if shoe.needs_reshuffle(self.rules.reserve) {
            tracing::info!(
                chat = %self.chat,
                remaining = shoe.remaining(),
                generation = shoe.generation + 1,
                "Reshuffling shoe"
            );
            shoe = self
                .shuffler
                .fresh_shoe(self.rules.deck_count, shoe.generation + 1)?;
        }

        let card = shoe.deal().ok_or_else(|| {
            CasinoError::Storage(StorageError::CorruptedData(format!(
                "Shoe for chat {} exhausted after reshuffle check",
                self.chat
            )))
        })?;

        self.store.save_shoe(self.chat, &shoe)?;
        tracing::debug!(chat = %self.chat, card = %card, cursor = shoe.cursor, "Card drawn");
        Ok(card)
    }
}
