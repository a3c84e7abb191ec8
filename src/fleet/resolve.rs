//! Name resolution: one box by exact label, otherwise a fleet by prefix.

use crate::provider::CloudBox;

use super::naming::fleet_members;

/// What a target name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A box whose label equals the name exactly.
    Single(CloudBox),
    /// Every box whose label starts with the name. May be empty.
    Group(Vec<CloudBox>),
}

impl Target {
    pub fn len(&self) -> usize {
        match self {
            Target::Single(_) => 1,
            Target::Group(boxes) => boxes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_boxes(self) -> Vec<CloudBox> {
        match self {
            Target::Single(b) => vec![b],
            Target::Group(boxes) => boxes,
        }
    }
}

/// Exact label match wins; otherwise the name is treated as a fleet prefix.
///
/// Deletion and dispatch both go through here so they always agree on
/// what a name means.
pub fn resolve(name: &str, boxes: &[CloudBox]) -> Target {
    if let Some(exact) = boxes.iter().find(|b| b.label == name) {
        return Target::Single(exact.clone());
    }
    Target::Group(fleet_members(name, boxes))
}
