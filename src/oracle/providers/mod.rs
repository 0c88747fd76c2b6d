pub mod aggregator;
pub mod api;
pub mod attestation;

pub use aggregator::AggregatorOracle;
pub use api::ApiOracle;
pub use attestation::AttestationOracle;
