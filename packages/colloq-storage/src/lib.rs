pub mod chunks;
pub mod db;
pub mod memory;
pub mod models;
pub mod schema;
pub mod store;
pub mod turns;

mod error;

pub use error::Error;
pub use store::{BoxFuture, IndexStore, MemoryStore, TurnStore};

pub type Result<T, E = Error> = std::result::Result<T, E>;
