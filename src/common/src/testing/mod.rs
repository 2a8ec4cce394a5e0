//! Test utilities for the toolbox crates.
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_workers(4)
//!     .with_export_limits(1024, 2)
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
