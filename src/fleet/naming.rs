//! Fleet membership and the naming scheme used when a fleet grows.

use crate::provider::CloudBox;

/// Boxes whose label starts with `name`, in directory order.
pub fn fleet_members(name: &str, boxes: &[CloudBox]) -> Vec<CloudBox> {
    boxes
        .iter()
        .filter(|b| b.label.starts_with(name))
        .cloned()
        .collect()
}

/// Names for `count` new members of `fleet_name`.
///
/// Numbering continues after the current member count, so repeated growth
/// never reuses a suffix unless members were deleted out of order. Gaps
/// left by deletions are not reclaimed.
pub fn compute_new_names(fleet_name: &str, count: usize, existing: &[CloudBox]) -> Vec<String> {
    let start = existing.len() + 1;
    (start..start + count)
        .map(|n| format!("{fleet_name}-{n}"))
        .collect()
}
