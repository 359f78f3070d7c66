pub mod collections;
pub mod duplicates;
pub mod import;
pub mod labels;
pub mod status;
pub mod users;

use anyhow::{bail, Result};
use imagebank_core::permissions::{Action, Authorizer, Resource};
use imagebank_core::ImageBank;
use uuid::Uuid;

/// Refuse to continue unless `principal` may perform `action` on `resource`.
pub(crate) fn authorize(
    bank: &ImageBank,
    principal: Uuid,
    resource: Resource,
    action: Action,
) -> Result<()> {
    if !bank.check(principal, resource, action)? {
        bail!("permission denied: {action:?} on {resource:?}");
    }
    Ok(())
}

pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// First block of a UUID, enough to tell rows apart in a table.
pub(crate) fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
