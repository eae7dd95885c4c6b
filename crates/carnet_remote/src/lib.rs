//! # Carnet Remote
//!
//! Remote API client for the Carnet sync engine.
//!
//! This crate provides:
//! - A transport trait over the remote entity API, plus a scripted mock
//! - Status classification into the sync error taxonomy
//! - Normalization of heterogeneous response shapes into one canonical
//!   ack/page contract
//! - A connectivity probe gating all reconciler network activity
//!
//! The client is stateless: cursors, queues, and entity state live in
//! `carnet_store`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod normalize;
mod transport;

pub use client::RemoteClient;
pub use error::{RemoteError, RemoteResult};
pub use normalize::{AckStatus, ChangePage, RemoteAck};
pub use transport::{MockTransport, RawResponse, RemoteCall, RemoteTransport};
