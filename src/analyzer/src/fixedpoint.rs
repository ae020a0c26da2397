//! Shared fixed-point driver over a call-graph-shaped dependency relation.
//!
//! Both "does this function ever return" (spec §4.5/§4.6) and
//! `stack_grow_cumulative` (spec §4.7) are properties of a function defined
//! in terms of the same property on its callees. Both are solved the same
//! way: repeatedly resolve whatever can be resolved from what's already
//! known, stop when a pass makes no progress, and report whatever is left
//! as a call-graph cycle.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::Address;

/// Resolves `items` in dependency order. `deps` names the addresses a key
/// must already have a value for before `resolve` can be called on it;
/// dependencies outside `items` are treated as already satisfied (they
/// belong to a different part of the pipeline, e.g. a missing-callee
/// error reported elsewhere). Returns the resolved map and the keys left
/// over when no further progress was possible (a cycle).
pub fn resolve_by_dependency_order<T, R>(
    items: &BTreeMap<Address, T>,
    deps: impl Fn(&Address, &T) -> BTreeSet<Address>,
    mut resolve: impl FnMut(&Address, &T, &BTreeMap<Address, R>) -> R,
) -> (BTreeMap<Address, R>, Vec<Address>) {
    let mut resolved: BTreeMap<Address, R> = BTreeMap::new();
    let mut pending: BTreeSet<Address> = items.keys().copied().collect();

    loop {
        let mut progressed = false;
        let mut next_pending = BTreeSet::new();

        for address in &pending {
            let item = &items[address];
            let dependencies = deps(address, item);
            let ready = dependencies.iter().all(|dep| resolved.contains_key(dep) || !items.contains_key(dep));
            if ready {
                let value = resolve(address, item, &resolved);
                resolved.insert(*address, value);
                progressed = true;
            } else {
                next_pending.insert(*address);
            }
        }

        pending = next_pending;
        if !progressed || pending.is_empty() {
            break;
        }
    }

    (resolved, pending.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_in_dependency_order() {
        // c depends on nothing, b depends on c, a depends on b.
        let mut items = BTreeMap::new();
        items.insert(0xa, vec![0xb]);
        items.insert(0xb, vec![0xc]);
        items.insert(0xc, Vec::<Address>::new());

        let (resolved, cycle) = resolve_by_dependency_order(
            &items,
            |_addr, deps| deps.iter().copied().collect(),
            |_addr, deps, resolved| 1 + deps.iter().map(|d| resolved[d]).sum::<u32>(),
        );

        assert!(cycle.is_empty());
        assert_eq!(resolved[&0xc], 1);
        assert_eq!(resolved[&0xb], 2);
        assert_eq!(resolved[&0xa], 3);
    }

    #[test]
    fn mutual_recursion_is_left_unresolved() {
        let mut items = BTreeMap::new();
        items.insert(0xa, vec![0xb]);
        items.insert(0xb, vec![0xa]);

        let (resolved, cycle) =
            resolve_by_dependency_order(&items, |_addr, deps| deps.iter().copied().collect(), |_addr, _deps, _resolved| 0u32);

        assert!(resolved.is_empty());
        assert_eq!(cycle.len(), 2);
    }
}
