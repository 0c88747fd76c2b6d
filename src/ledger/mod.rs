pub mod amount;
pub mod memory;
pub mod models;
pub mod provider;

pub use memory::MemoryDataProvider;
pub use provider::{DataProvider, PgDataProvider};
