//! # Railsync Testkit
//!
//! Test utilities for railsync.
//!
//! This crate provides:
//! - Layout fixtures and a publication builder
//! - In-memory change and split sources
//! - A geocoder over straight alignments
//! - Property-based test generators using proptest
//! - [`SyncHarness`], a sync service wired to an in-process registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use railsync_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_a_track_number() {
//!     let harness = SyncHarness::new();
//!     harness.geocoder.add_reference_line(1, 0, 2);
//!     harness.changes.publish(
//!         PublicationBuilder::new(1)
//!             .track_number(track_number_change(track_number(1, "001"), &[0]))
//!             .build(),
//!     );
//!     let outcome = harness.service().trigger_push(LayoutBranch::Main, false).unwrap();
//!     // ... inspect harness.server
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod geocoder;
pub mod harness;
pub mod logging;
pub mod sources;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::geocoder::*;
    pub use crate::harness::*;
    pub use crate::logging::*;
    pub use crate::sources::*;
    pub use railsync_engine::{LayoutBranch, RegistrySyncService};
}

pub use fixtures::*;
pub use generators::*;
pub use geocoder::*;
pub use harness::*;
pub use logging::*;
pub use sources::*;
