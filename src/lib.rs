//! An unofficial Rust client library for the services provided by Mixpanel.
//!
//! # Overview
//!
//! The library talks to two Mixpanel APIs:
//!
//! - [`Client`] wraps the ingestion API: it tracks events (single or
//!   batched), updates user profiles through the engage endpoint, deletes
//!   profiles, and builds tracking-pixel/redirect URLs. Calls are
//!   authenticated with the project token, which is embedded into the
//!   submitted data.
//! - [`ExportClient`] wraps the export API and authenticates with the
//!   project's API secret. Its main operation, [`ExportClient::list_profiles`],
//!   pages through all profiles matching a [`ProfileQuery`] and returns them
//!   as one `Vec<Profile>`.
//!
//! Both clients are fully synchronous: every call blocks until the server
//! responds or the underlying HTTP client times out. There are no retries;
//! each failure is returned to the caller as an [`Error`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. A failure during a
//! paginated export aborts the whole call; partially fetched pages are never
//! returned.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate for
//! logging messages under the `mixpanel` target. Consider integrating a
//! `log`-compatible logger implementation for better visibility into client
//! operations.
//!
//! # Examples
//!
//! Runnable programs exercising the export workflow can be found in the
//! `demos/` directory of the repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod error;
mod export;
mod properties;
mod query;

pub use client::{BatchEvent, Client, Operation};
pub use error::{Error, Result};
pub use export::{ExportClient, Profile};
pub use properties::Properties;
pub use query::ProfileQuery;
