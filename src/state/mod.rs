pub mod chain_store;
pub mod history;

pub use chain_store::{ApplyOutcome, ChainStatus, ChainStore};
pub use history::HistoryWindow;
