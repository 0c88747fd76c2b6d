pub mod calculator;
pub mod conditions;
pub mod engine;
pub mod events;

pub use engine::{EngineConfig, ResolutionEngine};
