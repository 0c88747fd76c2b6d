pub mod providers;
pub mod router;
pub mod traits;
pub mod value;
pub mod webhook;

pub use router::OracleRouter;
pub use traits::{OracleProvider, VerificationResult};
pub use value::OracleData;
