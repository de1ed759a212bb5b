//! Courier - streaming download gateway
//!
//! Relays objects out of a blob store to HTTP clients without buffering
//! them:
//!
//! - **Single downloads**: `/api/download` resolves an identifier through
//!   the metadata store and streams the object with exact length framing.
//! - **Team downloads**: `/api/downloadTeam` streams straight from an object
//!   URL, skipping the metadata store.
//! - **Bundles**: `/api/download-multiple` writes a ZIP on the fly, one
//!   entry per resolvable identifier, tolerating members that fail.

pub mod archive;
pub mod config;
pub mod db;
pub mod logging;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod storage;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{CourierError, Result};
