// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The Scheduler/Broker (spec §4.3): matches an Application's resource
//! request against a set of advertised [`grid_core::BackendInfo`]
//! snapshots, returning the full ranked list of backend names a Core
//! should try, in order.

use grid_core::{Application, BackendInfo};
use std::cmp::Ordering;

/// One candidate in the ranked result, carrying enough of the snapshot
/// for the Core to log why a backend was (or wasn't) chosen.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub free_slots: u32,
    pub own_user_queued: u32,
}

/// Filter `backends` against `app`'s resource request (spec §4.3 rules
/// 1-6), then rank the survivors (free slots desc, own-user queue len
/// asc, name asc).
pub fn select_backends(app: &Application, backends: &[BackendInfo]) -> Vec<Candidate> {
    let mut survivors: Vec<&BackendInfo> =
        backends.iter().filter(|b| passes_filters(app, b)).collect();

    survivors.sort_by(|a, b| rank(a, b));

    survivors
        .into_iter()
        .map(|b| Candidate {
            name: b.name.clone(),
            free_slots: b.free_slots,
            own_user_queued: b.own_user_queued,
        })
        .collect()
}

fn passes_filters(app: &Application, backend: &BackendInfo) -> bool {
    if !backend.updated {
        tracing::warn!(backend = %backend.name, "skipping backend with stale capability snapshot");
        return false;
    }
    if !backend.has_capacity() {
        return false;
    }
    if !app.tags.is_subset(&backend.tags) {
        return false;
    }
    let r = &app.resources;
    if r.requested_cores > backend.max_cores_per_job {
        return false;
    }
    if let (Some(requested), Some(per_core)) = (r.requested_memory, backend.max_memory_per_core) {
        let allowance = per_core.bytes().saturating_mul(r.requested_cores as u64);
        if requested.bytes() > allowance {
            return false;
        }
    }
    if let (Some(requested), Some(max)) = (r.requested_walltime, backend.max_walltime) {
        if requested > max {
            return false;
        }
    }
    if let Some(arch) = r.requested_architecture {
        if arch != backend.architecture {
            return false;
        }
    }
    true
}

fn rank(a: &BackendInfo, b: &BackendInfo) -> Ordering {
    b.free_slots
        .cmp(&a.free_slots)
        .then_with(|| a.own_user_queued.cmp(&b.own_user_queued))
        .then_with(|| a.name.cmp(&b.name))
}
