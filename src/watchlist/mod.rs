pub mod storage;
pub mod store;

pub use storage::JsonFileStorage;
pub use store::WatchlistStore;
