//! # AmpliSync Testkit
//!
//! Test utilities for AmpliSync.
//!
//! This crate provides:
//! - [`TestStore`], a temporary SQLite database with a change-tracked
//!   `Widgets` table and its capture triggers
//! - Pull batch builders and DEFLATE/zlib body encoders
//! - Snapshot archive builders for bootstrap tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use amplisync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_widgets_store(|store| {
//!         store.insert_local("a");
//!         assert_eq!(store.count("Widgets"), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batches;
pub mod fixtures;
pub mod generators;
pub mod snapshot;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::batches::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::snapshot::*;
}

pub use batches::*;
pub use fixtures::*;
pub use generators::*;
pub use snapshot::*;
