// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Concrete [`grid_core::Backend`] implementations.

pub mod local;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use local::LocalBackend;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{Call, FakeBackend};
