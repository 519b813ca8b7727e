//! CPU affinity for publisher threads.
//!
//! Publisher workers can be pinned to dedicated cores so Redis I/O does not
//! compete with the broker callback thread for the same core.

use tracing::{info, warn};

/// Bind the current thread to the specified CPU core.
///
/// Returns `true` if the binding succeeded, `false` if the core ID is invalid
/// or the OS rejected the request.
pub fn bind_to_core(core_id: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    let Some(core) = core_ids.get(core_id) else {
        warn!("CPU core {core_id} not available (system has {} cores)", core_ids.len());
        return false;
    };
    let ok = core_affinity::set_for_current(*core);
    if ok {
        info!("bound thread to CPU core {core_id}");
    } else {
        warn!("failed to bind thread to CPU core {core_id}");
    }
    ok
}

/// Bind the current thread to `core_id` if one is configured and
/// non-negative.
pub fn maybe_bind(core_id: Option<i32>) {
    if let Some(id) = core_id
        && id >= 0
    {
        bind_to_core(id as usize);
    }
}
