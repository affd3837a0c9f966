//! # Vigil Consul
//!
//! [`Registry`](vigil_core::Registry) implementation over the Consul HTTP
//! API: sessions (`/v1/session/*`), the key/value store with
//! acquire/release (`/v1/kv/*`) and blocking health queries
//! (`/v1/health/state/any`).
//!
//! ## Example
//!
//! ```rust,no_run
//! use vigil_consul::{ConsulConfig, ConsulRegistry};
//!
//! # tokio_test::block_on(async {
//! let registry = ConsulRegistry::connect(ConsulConfig::from_env()?).await?;
//! println!("consul leader is {}", registry.leader().await?);
//! # Ok::<(), vigil_core::VigilError>(())
//! # });
//! ```

pub mod client;
pub mod config;
mod payload;

pub use client::ConsulRegistry;
pub use config::ConsulConfig;
