pub mod error;
pub mod provider;
pub mod sync;
pub mod types;
