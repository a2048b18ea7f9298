//! # lockbox-client
//!
//! Client library for the Lockbox storage gateway.
//!
//! The server only ever sees ciphertext; producing it is up to the
//! application. This crate speaks the wire protocol: one typed method per
//! request kind, each sending one request and awaiting its response.
//!
//! ## Example
//!
//! ```ignore
//! use lockbox_client::Client;
//! use lockbox_types::Key;
//!
//! let client = Client::connect("127.0.0.1:2048").await?;
//! client.signup("alice@example.com", Key::from(42u64)).await?;
//! let account = client.fetch().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;

pub use client::{Client, ClientError};
