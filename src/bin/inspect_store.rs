//! Persisted table inspection binary

use baccarat_table::{
    config::StorageConfig,
    games::{BigRoad, ChatId},
    storage::OptimizedStorage,
    store::CasinoStore,
};
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "inspect-store")]
#[command(about = "Dump the persisted state of baccarat tables", long_about = None)]
struct Args {
    /// Database directory
    #[arg(long, default_value = "./DB/casino_data")]
    db_path: String,

    /// Only show this chat
    #[arg(long)]
    chat: Option<i64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let storage_config = StorageConfig {
        data_directory: args.db_path.clone(),
        clear_on_start: false,
        ..Default::default()
    };
    let store = CasinoStore::new(Arc::new(OptimizedStorage::new_with_config(&storage_config)?));
    println!("Opened {}", args.db_path);

    let chats: Vec<ChatId> = match args.chat {
        Some(chat) => vec![ChatId(chat)],
        None => store.load_all_rounds()?.into_iter().map(|round| round.chat).collect(),
    };

    if chats.is_empty() {
        println!("No tables found");
    }

    for chat in chats {
        println!("\n=== chat {} ===", chat);

        match store.load_round(chat)? {
            Some(round) => {
                println!(
                    "round {} {:?} (opened {}, closes {})",
                    round.id, round.status, round.opened_at, round.closes_at
                );
                for bet in store.load_bets(chat, round.id)? {
                    println!("  bet {} {} {}", bet.account, bet.choice, bet.amount);
                }
            }
            None => println!("no rounds"),
        }

        if let Some(shoe) = store.load_shoe(chat)? {
            println!(
                "shoe: {} of {} cards left, generation {}",
                shoe.remaining(),
                shoe.cards.len(),
                shoe.generation
            );
        }

        let ledger = store.load_ledger(chat)?;
        println!("house: profit {} over {} rounds", ledger.profit, ledger.rounds);

        let accounts = store.load_accounts(chat)?;
        println!("accounts: {}", accounts.len());
        for account in &accounts {
            println!(
                "  {} {} points, streak {}/{}, bet {}, won {}",
                account.display_name(),
                account.points,
                account.win_streak,
                account.max_streak,
                account.total_bet,
                account.total_won
            );
        }

        let road = BigRoad::from_history(&store.load_road(chat)?);
        println!(
            "road: P {} / B {} / T {}\n{}",
            road.player_wins,
            road.banker_wins,
            road.ties,
            road.render(6)
        );
    }

    Ok(())
}
