pub mod types;
pub mod cards;
pub mod shoe;
pub mod baccarat;
pub mod settlement;
pub mod road;

pub use types::*;
pub use baccarat::{resolve, BaccaratOutcome};
pub use road::BigRoad;
pub use settlement::{PayoutTable, SettlementReport};
pub use shoe::{CardSource, Shoe, ShoeDealer, ShoeRules, Shuffler};
