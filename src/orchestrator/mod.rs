//! Orchestrator module - fan-out/fan-in of per-slide workers
//!
//! [`DeckOrchestrator::run`] builds the generation context once, spawns one
//! worker per plan item and merges their progress events into a single
//! [`DeckRun`] stream that ends with `end-of-run`.
//!
//! # Example
//!
//! ```rust,ignore
//! use flyerdeck::prelude::*;
//! use futures::StreamExt;
//!
//! let orchestrator = DeckOrchestrator::from_config(&DeckConfig::from_env()?, tools)?;
//! let mut run = orchestrator.run(input);
//! while let Some(event) = run.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

pub mod deck;
mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use deck::{DeckOrchestrator, DeckOrchestratorBuilder, DeckRun};
