//! FPL Common Library
//!
//! Ambient pieces shared by the FPL connector workspace members.
//!
//! - **Logging**: one place that wires `tracing-subscriber` for every binary
//! - **Errors**: the error type returned by the shared helpers
//!
//! # Example
//!
//! ```no_run
//! use fpl_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> fpl_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("connector started");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
