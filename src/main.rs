//! Baccarat Table console
//!
//! Line-oriented stand-in for the chat dispatcher: every command acts on the
//! current chat, and settlement reports are printed as timers fire.

use baccarat_table::{
    config::{CasinoConfig, ConfigBuilder, ConfigLoader},
    errors::CasinoResult,
    factory::CasinoFactory,
    games::{AccountId, ChatId, Side},
    notify::{render_report, ChannelNotifier},
    table::{CasinoTable, SettleOutcome},
};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Preset {
    Production,
    Testing,
}

#[derive(Parser, Debug)]
#[command(name = "baccarat-table")]
#[command(about = "Chat baccarat table console", long_about = None)]
struct Args {
    /// TOML configuration file; CASINO_* environment variables override it
    #[arg(long)]
    config: Option<String>,

    /// Start from a preset instead of a configuration file
    #[arg(long, value_enum, conflicts_with = "config")]
    preset: Option<Preset>,

    /// Database directory (overrides configuration)
    #[arg(long)]
    db_path: Option<String>,

    /// Seconds between opening a round and settling it
    #[arg(long)]
    round_delay: Option<u64>,

    /// Chat the console starts in
    #[arg(long, default_value = "1")]
    chat: i64,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    write_config: Option<String>,
}

const HELP: &str = "\
commands:
  open                          open a round (or show the open one)
  bet <account> <p|b|t> <amt>   place or replace a bet
  allin <account> <p|b|t>       stake the whole balance
  settle                        settle the open round now
  cancel                        cancel the open round and refund stakes
  name <account> <username>     set a display name
  balance <account>             account statistics
  bets                          bets on the open round
  rank                          top 10 by balance
  house                         house ledger
  road                          big road scoreboard
  metrics                       table counters
  chat <id>                     switch chat
  quit";

fn load_config(args: &Args) -> CasinoResult<CasinoConfig> {
    let base = match (args.preset, &args.config) {
        (Some(Preset::Production), _) => CasinoConfig::production(),
        (Some(Preset::Testing), _) => CasinoConfig::testing(),
        (None, Some(path)) => ConfigLoader::new().with_path(path).load()?,
        (None, None) => ConfigLoader::new().load()?,
    };

    let mut builder = ConfigBuilder::from_config(base.clone());
    if let Some(path) = &args.db_path {
        let mut storage = base.storage.clone();
        storage.data_directory = path.clone();
        builder = builder.storage(storage);
    }
    if let Some(secs) = args.round_delay {
        builder = builder.round_delay_secs(secs);
    }
    builder.build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.monitoring.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &args.write_config {
        ConfigLoader::new().save(&config, path)?;
        println!("Configuration written to {}", path);
        return Ok(());
    }

    let (notifier, mut reports) = ChannelNotifier::new();
    let (table, handle) = CasinoFactory::create_table(config, Arc::new(notifier)).await?;

    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            println!("\n{}\n", render_report(&report));
        }
    });

    println!("Baccarat table ready in chat {}. Type 'help' for commands.", args.chat);

    let mut chat = ChatId(args.chat);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["quit"] | ["exit"] => break,
            ["help"] => println!("{}", HELP),
            ["chat", id] => match id.parse() {
                Ok(id) => {
                    chat = ChatId(id);
                    println!("Switched to chat {}", chat);
                }
                Err(_) => println!("Invalid chat id: {}", id),
            },
            _ => {
                if let Err(e) = dispatch(&table, chat, &words).await {
                    println!("{}", e);
                }
            }
        }
    }

    if table.config().monitoring.enable_metrics {
        let snapshot = table.metrics();
        tracing::info!(
            rounds_settled = snapshot.rounds_settled,
            bets_placed = snapshot.bets_placed,
            settlement_failures = snapshot.settlement_failures,
            uptime_secs = snapshot.uptime_secs,
            "Session summary"
        );
    }

    handle.shutdown().await;
    Ok(())
}

fn parse_account(raw: &str) -> Result<AccountId, String> {
    raw.parse()
        .map(AccountId)
        .map_err(|_| format!("Invalid account id: {}", raw))
}

async fn dispatch(table: &CasinoTable, chat: ChatId, words: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    match words {
        ["open"] => {
            let round = table.open_round(chat).await?;
            println!(
                "Round {} open, closes at {}",
                round.id,
                round.closes_at.format("%H:%M:%S")
            );
        }
        ["bet", account, choice, amount] => {
            let account = parse_account(account)?;
            let choice: Side = choice.parse()?;
            let amount: i64 = amount
                .parse()
                .map_err(|_| format!("Invalid amount: {}", amount))?;
            table.ensure_account(chat, account, "").await?;
            let receipt = table.place_bet(chat, account, choice, amount).await?;
            match receipt.replaced {
                Some(prior) => println!(
                    "Bet changed: {} {} -> {} {} (balance {})",
                    prior.choice, prior.amount, receipt.bet.choice, receipt.bet.amount, receipt.balance_after
                ),
                None => println!(
                    "Bet placed: {} {} (balance {})",
                    receipt.bet.choice, receipt.bet.amount, receipt.balance_after
                ),
            }
        }
        ["allin", account, choice] => {
            let account = parse_account(account)?;
            let choice: Side = choice.parse()?;
            table.ensure_account(chat, account, "").await?;
            let receipt = table.all_in(chat, account, choice).await?;
            println!("ALL IN: {} {}", receipt.bet.choice, receipt.bet.amount);
        }
        ["settle"] => match table.current_round(chat)? {
            Some(round) => match table.request_settlement(chat, round.id).await? {
                SettleOutcome::Settled(report) => println!("{}", render_report(&report)),
                SettleOutcome::Skipped { status } => {
                    println!("Round {} is not open ({:?})", round.id, status)
                }
            },
            None => println!("No round has been opened in chat {}", chat),
        },
        ["cancel"] => match table.cancel_round(chat).await? {
            Some(cancelled) => println!(
                "Round {} cancelled, {} bets refunded ({} points)",
                cancelled.round, cancelled.refunded_bets, cancelled.refunded_points
            ),
            None => println!("No open round"),
        },
        ["name", account, username] => {
            let account = table.ensure_account(chat, parse_account(account)?, username).await?;
            println!("Account {} is now {}", account.id, account.display_name());
        }
        ["balance", account] => match table.account_stats(chat, parse_account(account)?)? {
            Some(stats) => {
                let a = &stats.account;
                println!(
                    "{}: {} points, streak {} (best {}), bet {}, won {}, ROI {:.2}%",
                    a.display_name(),
                    a.points,
                    a.win_streak,
                    a.max_streak,
                    a.total_bet,
                    a.total_won,
                    stats.roi_percent
                );
            }
            None => println!("No such account"),
        },
        ["bets"] => {
            let bets = table.open_bets(chat)?;
            if bets.is_empty() {
                println!("No bets");
            }
            for bet in bets {
                println!("{} {} {}", bet.account, bet.choice, bet.amount);
            }
        }
        ["rank"] => {
            for (i, account) in table.leaderboard(chat, 10)?.iter().enumerate() {
                println!(
                    "{}. {} - {} (best streak {})",
                    i + 1,
                    account.display_name(),
                    account.points,
                    account.max_streak
                );
            }
        }
        ["house"] => {
            let stats = table.house_stats(chat)?;
            println!(
                "House profit {} over {} rounds (P {} / B {} / T {}), {} accounts",
                stats.ledger.profit,
                stats.ledger.rounds,
                stats.player_wins,
                stats.banker_wins,
                stats.ties,
                stats.accounts
            );
        }
        ["road"] => {
            let road = table.big_road(chat)?;
            println!("{}", road.render(6));
            if let Some((side, len)) = road.current_streak() {
                println!("Current streak: {} x{}", side, len);
            }
        }
        ["metrics"] => println!("{}", serde_json::to_string_pretty(&table.metrics())?),
        _ => println!("Unknown command, type 'help'"),
    }
    Ok(())
}
