//! Delivery of settlement reports to the presentation layer

use crate::config::BPS_SCALE;
use crate::games::cards::format_hand;
use crate::games::settlement::{BetOutcome, SettlementReport};
use async_trait::async_trait;
use std::fmt::Write as _;
use tokio::sync::mpsc;

/// Receives every report produced by timer-driven settlement
#[async_trait]
pub trait SettlementNotifier: Send + Sync {
    async fn deliver(&self, report: &SettlementReport);
}

/// Logs a one-line summary per report
pub struct TracingNotifier;

#[async_trait]
impl SettlementNotifier for TracingNotifier {
    async fn deliver(&self, report: &SettlementReport) {
        tracing::info!(
            chat = %report.chat,
            round = %report.round,
            result = %report.result(),
            bets = report.lines.len(),
            total_bet = report.total_bet,
            total_payout = report.total_payout,
            house_delta = report.house_delta,
            "Round settled"
        );
    }
}

/// Forwards reports into a channel, for adapters that render them elsewhere
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<SettlementReport>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SettlementReport>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl SettlementNotifier for ChannelNotifier {
    async fn deliver(&self, report: &SettlementReport) {
        if self.sender.send(report.clone()).is_err() {
            tracing::warn!(chat = %report.chat, round = %report.round, "Report receiver dropped");
        }
    }
}

fn format_multiplier(bps: u64) -> String {
    format!("{}.{:02}x", bps / BPS_SCALE, (bps % BPS_SCALE) / 100)
}

/// Plain-text rendering of a report, as posted back to the chat
pub fn render_report(report: &SettlementReport) -> String {
    let outcome = &report.outcome;
    let mut out = String::new();

    let _ = writeln!(out, "Round {} result: {}", report.round, report.result());
    let _ = writeln!(
        out,
        "Player [{}] = {}",
        format_hand(&outcome.player_cards),
        outcome.player_total
    );
    let _ = writeln!(
        out,
        "Banker [{}] = {}{}",
        format_hand(&outcome.banker_cards),
        outcome.banker_total,
        if outcome.natural { " (natural)" } else { "" }
    );

    if report.lines.is_empty() {
        let _ = writeln!(out, "No bets this round.");
    }
    for line in &report.lines {
        let verdict = match line.outcome {
            BetOutcome::Win => format!(
                "won {} ({}, net {:+})",
                line.payout,
                format_multiplier(line.multiplier_bps),
                line.net()
            ),
            BetOutcome::Push => format!("refunded {}", line.payout),
            BetOutcome::Loss => format!("lost {}", line.stake),
        };
        let _ = write!(
            out,
            "{} {} {}: {} -> balance {}",
            line.display_name, line.choice, line.stake, verdict, line.balance_after
        );
        if line.win_streak >= 2 {
            let _ = write!(out, " (streak {})", line.win_streak);
        }
        out.push('\n');
    }

    let _ = write!(
        out,
        "Total bet {} / paid {} / house {:+} (cumulative {:+} over {} rounds)",
        report.total_bet,
        report.total_payout,
        report.house_delta,
        report.ledger.profit,
        report.ledger.rounds
    );
    out
}
