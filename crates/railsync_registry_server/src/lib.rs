//! # Railsync Registry Server
//!
//! In-memory reference implementation of the external rail registry.
//!
//! This crate provides:
//! - Route number, location track, point and asset endpoints
//! - Redraw requests
//! - Bulk transfer jobs with forced start and state polling
//! - Request recording and fault injection for tests
//!
//! # Architecture
//!
//! The server answers [`HttpRequest`](railsync_protocol::HttpRequest) values
//! in-process through [`LoopbackServer`](railsync_protocol::LoopbackServer),
//! so the engine can be driven end to end without sockets. Requests are
//! recorded before anything else happens, then checked against the online
//! flag and the fault rules, and only then routed to the store.
//!
//! Reads answer addresses in the split `{"km", "m"}` form unless
//! [`ServerConfig::with_split_addresses`] turns it off.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod faults;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use faults::{Fault, FaultInjector, FaultRule};
pub use handler::{split_addresses, RequestHandler, Route};
pub use server::{RecordedRequest, RegistryServer};
pub use store::{BulkTransferJob, RedrawKind, RegistryStore};
