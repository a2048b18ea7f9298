//! # lockbox-server
//!
//! Store and authentication gateway for Lockbox.
//!
//! The server keeps users, items and release keys for an end-to-end
//! encrypted sharing application. It only ever sees ciphertext and
//! argon2id verifiers of the clients' auth keys.
//!
//! ## Architecture
//!
//! ```text
//! Client ──┐   length-prefixed frames   ┌── Client
//!          │   (MessagePack envelopes)  │
//!      ┌───┴────────────────────────────┴───┐
//!      │  Listener ─► Session (per conn)    │
//!      │               │                    │
//!      │               ▼                    │
//!      │        worker pool ─► handlers     │
//!      │               │                    │
//!      │  ┌────────────▼────────────────┐   │
//!      │  │ SQLite (users/items/keys)   │   │
//!      │  └─────────────────────────────┘   │
//!      └────────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Each connection sends one request at a time and receives exactly one
//! response for it. See [`lockbox_types::Request`] for the request kinds.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod limits;
pub mod listener;
pub mod server;
pub mod session;
pub mod storage;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use listener::Listener;
pub use server::Gateway;
pub use storage::{RecordStorage, SqliteStorage};
