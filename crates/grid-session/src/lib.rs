// SPDX-License-Identifier: MIT

//! The Session abstraction (spec §4.7): a persistent directory plus a
//! bound Store, indexing the top-level Tasks that belong to it.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod error;
pub mod session;
pub mod store_url;

pub use error::SessionError;
pub use session::Session;
pub use store_url::StoreUrl;
