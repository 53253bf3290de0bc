// SPDX-License-Identifier: MIT

//! grid-engine: the cooperative scheduler driving Task state machines
//! forward (spec §4.4, §4.5). [`Core`] performs one-shot Backend
//! operations on a single Task; [`Engine`] wraps a `Core` with a
//! `TaskGraph`, a `Store`, and a sweep loop (`progress`) that advances
//! every currently-active Task by at most one state-changing action per
//! call, honoring the concurrency caps in [`EngineConfig`].

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod core;
pub mod engine;
pub mod error;

pub use core::Core;
pub use engine::{exit_code_for, Engine, EngineConfig};
pub use error::{CoreError, EngineError};
