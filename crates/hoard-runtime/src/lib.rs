//! hoard-runtime: TypeScript provider adapters
//!
//! This crate runs provider adapters with Bun, Deno, or Node.js and exposes
//! them to the archive core as [`hoard_core::provider::Provider`]s.

pub mod provider;
pub mod runner;
pub mod wire;

pub use provider::AdapterProvider;
pub use provider::AdapterProviderFactory;
pub use runner::AdapterFailure;
pub use runner::AdapterInfo;
pub use runner::AdapterRequest;
pub use runner::AdapterRunner;
pub use runner::Runtime;
