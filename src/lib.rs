pub mod cache;
pub mod check;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod nodes;
pub mod order;
pub mod pool;
pub mod poll;
pub mod resource;

pub use cli::{Cli, Executor, Oc};
pub use error::{Error, Result};
pub use poll::{assert_wait_poll_no_err, poll, ErrorPolicy, PollSpec};
pub use resource::{Patch, Resource, ResourceList, ResourceRef};

use tracing::{debug, info};

/// Whether an idempotent operation had to change anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Effect {
    None,
    Changed,
}

impl Effect {
    pub fn changed(&self) -> bool {
        self == &Effect::Changed
    }
}

/// Delete `resource`, treating an already missing object as success.
pub async fn ensure_deleted<E: Executor>(resource: &Resource<E>) -> Result<Effect> {
    match resource.delete().await {
        Ok(()) => Ok(Effect::Changed),
        Err(err) if err.is_not_found() => {
            debug!("{} already gone.", resource.reference());
            Ok(Effect::None)
        }
        Err(err) => Err(err),
    }
}

/// Set `pointer` (e.g. `/spec/paused`) of `resource` to `desired` with a
/// merge patch, unless it already has that value.
pub async fn set_field<E: Executor>(
    resource: &Resource<E>,
    pointer: &str,
    desired: serde_json::Value,
) -> Result<Effect> {
    let current = resource.json().await?;

    if current.pointer(pointer) == Some(&desired) {
        debug!("{pointer} of {} already {desired}", resource.reference());
        return Ok(Effect::None);
    }

    info!("updating {pointer} of {} to {desired}", resource.reference());

    let segments: Vec<&str> = pointer.split('/').skip(1).collect();
    let patch = segments
        .into_iter()
        .rev()
        .fold(desired, |value, key| {
            let key = key.replace("~1", "/").replace("~0", "~");
            serde_json::json!({ key: value })
        });

    resource.patch(&Patch::Merge(patch)).await?;
    Ok(Effect::Changed)
}
