use std::collections::BTreeMap;

use crate::models::{Interaction, ItemId, OwnedItem, VIRTUAL_USER_ID};

/// Merges two users' libraries into one synthetic usage profile.
///
/// - owned by both: mean of the two usages
/// - owned by one: that usage halved
/// - owned by neither: absent
///
/// Entries come out in item-id order under [`VIRTUAL_USER_ID`].
pub fn synthesize(first: &[OwnedItem], second: &[OwnedItem]) -> Vec<Interaction> {
    let first = library(first);
    let second = library(second);

    let mut merged: BTreeMap<&ItemId, f64> = BTreeMap::new();
    for (item_id, usage) in &first {
        let value = match second.get(item_id) {
            Some(other) => (usage + other) / 2.0,
            None => usage / 2.0,
        };
        merged.insert(item_id, value);
    }
    for (item_id, usage) in &second {
        merged.entry(item_id).or_insert(usage / 2.0);
    }

    merged
        .into_iter()
        .map(|(item_id, usage)| Interaction::new(VIRTUAL_USER_ID, item_id.clone(), usage))
        .collect()
}

/// Collapses repeated entries for one item by summing their usage
fn library(items: &[OwnedItem]) -> BTreeMap<ItemId, f64> {
    let mut library = BTreeMap::new();
    for (item_id, usage) in items {
        *library.entry(item_id.clone()).or_insert(0.0) += usage.max(0.0);
    }
    library
}
