//! Punto banco tableau: deals both hands and decides the round.
//!
//! Deal order is player, player, banker, banker. A natural (8 or 9 on either
//! two-card hand) ends the coup. Otherwise the player draws on 0-5, and the
//! banker's decision depends on the player's third card as below.

use crate::errors::CasinoResult;
use crate::games::cards::Card;
use crate::games::shoe::CardSource;
use crate::games::types::Side;
use serde::{Deserialize, Serialize};

/// Completed coup, ready for settlement and display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaccaratOutcome {
    pub player_cards: Vec<Card>,
    pub banker_cards: Vec<Card>,
    pub player_total: u8,
    pub banker_total: u8,
    pub result: Side,
    pub natural: bool,
}

/// Hand total modulo 10
pub fn hand_total(cards: &[Card]) -> u8 {
    cards.iter().map(|c| c.value()).sum::<u8>() % 10
}

pub fn is_natural(total: u8) -> bool {
    total >= 8
}

/// Player rule, applied only when neither side has a natural
pub fn player_draws(player_total: u8) -> bool {
    player_total <= 5
}

/// Banker rule; `player_third` is the value of the player's third card, if any
pub fn banker_draws(banker_total: u8, player_third: Option<u8>) -> bool {
    match player_third {
        None => banker_total <= 5,
        Some(v) => match banker_total {
            0..=2 => true,
            3 => v != 8,
            4 => (2..=7).contains(&v),
            5 => (4..=7).contains(&v),
            6 => (6..=7).contains(&v),
            _ => false,
        },
    }
}

fn compare(player_total: u8, banker_total: u8) -> Side {
    use std::cmp::Ordering;
    match player_total.cmp(&banker_total) {
        Ordering::Greater => Side::Player,
        Ordering::Less => Side::Banker,
        Ordering::Equal => Side::Tie,
    }
}

/// Play one coup from `source`
pub fn resolve<S: CardSource + ?Sized>(source: &mut S) -> CasinoResult<BaccaratOutcome> {
    let mut player_cards = vec![source.draw()?, source.draw()?];
    let mut banker_cards = vec![source.draw()?, source.draw()?];

    let mut player_total = hand_total(&player_cards);
    let mut banker_total = hand_total(&banker_cards);

    if is_natural(player_total) || is_natural(banker_total) {
        return Ok(BaccaratOutcome {
            result: compare(player_total, banker_total),
            player_cards,
            banker_cards,
            player_total,
            banker_total,
            natural: true,
        });
    }

    let mut player_third = None;
    if player_draws(player_total) {
        let card = source.draw()?;
        player_third = Some(card.value());
        player_cards.push(card);
        player_total = hand_total(&player_cards);
    }

    if banker_draws(banker_total, player_third) {
        banker_cards.push(source.draw()?);
        banker_total = hand_total(&banker_cards);
    }

    Ok(BaccaratOutcome {
        result: compare(player_total, banker_total),
        player_cards,
        banker_cards,
        player_total,
        banker_total,
        natural: false,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::{CasinoError, StorageError};
    use crate::games::cards::{Rank, Suit};
    use std::collections::VecDeque;

    /// Deals a fixed sequence of cards, in order
    pub(crate) struct StackedCards {
        cards: VecDeque<Card>,
        pub drawn: usize,
    }

    impl StackedCards {
        pub(crate) fn new(ranks: &[Rank]) -> Self {
            Self {
                cards: ranks.iter().map(|&r| Card::new(r, Suit::Hearts)).collect(),
                drawn: 0,
            }
        }
    }

    impl CardSource for StackedCards {
        fn draw(&mut self) -> CasinoResult<Card> {
            self.drawn += 1;
            self.cards.pop_front().ok_or_else(|| {
                CasinoError::Storage(StorageError::ReadFailed("stack exhausted".to_string()))
            })
        }
    }

    use Rank::*;

    #[test]
    fn test_hand_total_wraps_modulo_ten() {
        let cards: Vec<Card> = [Nine, Eight, King]
            .iter()
            .map(|&r| Card::new(r, Suit::Clubs))
            .collect();
        assert_eq!(hand_total(&cards), 7);
    }

    #[test]
    fn test_natural_stops_drawing() {
        // Player 9, banker 5: nobody draws
        let mut stack = StackedCards::new(&[Four, Five, Two, Three, Ace, Ace]);
        let outcome = resolve(&mut stack).unwrap();
        assert_eq!(stack.drawn, 4);
        assert!(outcome.natural);
        assert_eq!(outcome.player_total, 9);
        assert_eq!(outcome.result, Side::Player);

        // Banker natural 8 against player 0
        let mut stack = StackedCards::new(&[King, Queen, Five, Three, Ace, Ace]);
        let outcome = resolve(&mut stack).unwrap();
        assert_eq!(stack.drawn, 4);
        assert_eq!(outcome.result, Side::Banker);
    }

    #[test]
    fn test_every_natural_deals_exactly_four_cards() {
        for a in Rank::ALL {
            for b in Rank::ALL {
                let total = (a.value() + b.value()) % 10;
                if !is_natural(total) {
                    continue;
                }
                // Natural on the player side, then on the banker side
                let mut stack = StackedCards::new(&[a, b, Ten, Ace, Two, Two]);
                resolve(&mut stack).unwrap();
                assert_eq!(stack.drawn, 4);

                let mut stack = StackedCards::new(&[Ten, Ace, a, b, Two, Two]);
                resolve(&mut stack).unwrap();
                assert_eq!(stack.drawn, 4);
            }
        }
    }

    #[test]
    fn test_player_stands_banker_draws_on_five() {
        // Player 6 stands, banker 5 draws a 3 -> 8
        let mut stack = StackedCards::new(&[Three, Three, Two, Three, Three]);
        let outcome = resolve(&mut stack).unwrap();
        assert_eq!(outcome.player_cards.len(), 2);
        assert_eq!(outcome.banker_cards.len(), 3);
        assert_eq!(outcome.banker_total, 8);
        assert_eq!(outcome.result, Side::Banker);
    }

    #[test]
    fn test_banker_three_stands_on_player_eight() {
        // Player 0 draws an 8, banker 3 stands
        let mut stack = StackedCards::new(&[Ten, King, Ace, Two, Eight, Nine]);
        let outcome = resolve(&mut stack).unwrap();
        assert_eq!(stack.drawn, 5);
        assert_eq!(outcome.player_total, 8);
        assert_eq!(outcome.banker_total, 3);
        assert_eq!(outcome.result, Side::Player);
    }

    #[test]
    fn test_tie() {
        let mut stack = StackedCards::new(&[Three, Four, Two, Five]);
        let outcome = resolve(&mut stack).unwrap();
        assert_eq!(outcome.result, Side::Tie);
        assert_eq!(outcome.player_total, 7);
        assert_eq!(outcome.banker_total, 7);
    }

    /// Reference tableau, written out as the printed table
    fn tableau(banker_total: u8, player_third: Option<u8>) -> bool {
        const DRAW_ON: [&[u8]; 7] = [
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            &[0, 1, 2, 3, 4, 5, 6, 7, 9],
            &[2, 3, 4, 5, 6, 7],
            &[4, 5, 6, 7],
            &[6, 7],
        ];
        match player_third {
            None => banker_total <= 5,
            Some(v) => DRAW_ON
                .get(banker_total as usize)
                .map_or(false, |row| row.contains(&v)),
        }
    }

    #[test]
    fn test_banker_rule_exhaustive() {
        for banker_total in 0..=7u8 {
            assert_eq!(banker_draws(banker_total, None), tableau(banker_total, None));
            for v in 0..=9u8 {
                assert_eq!(
                    banker_draws(banker_total, Some(v)),
                    tableau(banker_total, Some(v)),
                    "banker {} vs player third {}",
                    banker_total,
                    v
                );
            }
        }
    }

    #[test]
    fn test_resolve_agrees_with_banker_rule() {
        // Drive the full resolver through every banker total and third card
        let banker_hands: [(Rank, Rank); 8] = [
            (Ten, King),
            (Ace, Ten),
            (Two, Ten),
            (Three, Ten),
            (Four, Ten),
            (Five, Ten),
            (Six, Ten),
            (Seven, Ten),
        ];
        let thirds = [Ten, Ace, Two, Three, Four, Five, Six, Seven, Eight, Nine];
        for (banker_total, &(b1, b2)) in banker_hands.iter().enumerate() {
            for &third in &thirds {
                // Player 0 always draws
                let mut stack = StackedCards::new(&[Ten, Queen, b1, b2, third, Two]);
                let outcome = resolve(&mut stack).unwrap();
                let expected = tableau(banker_total as u8, Some(third.value()));
                assert_eq!(outcome.banker_cards.len() == 3, expected);
            }
            // Player 6 stands
            let mut stack = StackedCards::new(&[Six, Ten, b1, b2, Two]);
            let outcome = resolve(&mut stack).unwrap();
            assert_eq!(outcome.banker_cards.len() == 3, banker_total <= 5);
        }
    }
}
