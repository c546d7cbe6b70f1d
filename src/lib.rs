pub mod config;
pub mod error;
pub mod generators;
pub mod labels;
pub mod markers;
pub mod ownership;
pub mod secrets;
pub mod signing_key;
pub mod store;

pub use error::{ProvisionError, ProvisionResult};
