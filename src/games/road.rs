//! Big Road scoreboard layout.
//!
//! Consecutive PLAYER or BANKER results stack down one column; a change of
//! side starts a new column. Ties do not open cells, they are counted on the
//! cell they follow.

use crate::games::types::{RoadEntry, Side};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoadCell {
    pub side: Side,
    /// Ties recorded after this result
    pub ties: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BigRoad {
    pub columns: Vec<Vec<RoadCell>>,
    /// Ties before the first PLAYER/BANKER result
    pub leading_ties: u32,
    pub player_wins: u32,
    pub banker_wins: u32,
    pub ties: u32,
}

impl BigRoad {
    pub fn from_history(history: &[RoadEntry]) -> Self {
        let mut road = BigRoad::default();

        for entry in history {
            match entry.result {
                Side::Tie => {
                    road.ties += 1;
                    match road.columns.last_mut().and_then(|c| c.last_mut()) {
                        Some(cell) => cell.ties += 1,
                        None => road.leading_ties += 1,
                    }
                }
                side => {
                    if side == Side::Player {
                        road.player_wins += 1;
                    } else {
                        road.banker_wins += 1;
                    }
                    let cell = RoadCell { side, ties: 0 };
                    match road.columns.last_mut() {
                        Some(column) if column[0].side == side => column.push(cell),
                        _ => road.columns.push(vec![cell]),
                    }
                }
            }
        }

        road
    }

    /// Length of the streak currently being drawn
    pub fn current_streak(&self) -> Option<(Side, usize)> {
        self.columns.last().map(|c| (c[0].side, c.len()))
    }

    /// Plain-text grid, one line per row, `rows` rows tall
    pub fn render(&self, rows: usize) -> String {
        let mut lines = Vec::with_capacity(rows);
        for row in 0..rows {
            let line: String = self
                .columns
                .iter()
                .map(|column| match column.get(row) {
                    Some(cell) if cell.ties > 0 => cell.side.short().to_ascii_lowercase(),
                    Some(cell) => cell.side.short(),
                    None => '.',
                })
                .collect();
            lines.push(line);
        }
        lines.join("\n")
    }
}
