//! Fractional index validation, ordering and repair
//!
//! The element array is the cached order; fractional indices are what
//! replicas agree on. These functions keep the two in sync:
//!
//! - [`validate_fractional_indices`] reports the first broken pair
//! - [`order_by_fractional_index`] rebuilds the array order from the keys
//! - [`restore_fractional_indices`] rewrites the fewest keys needed to make
//!   the keys follow the array order
//! - [`update_fractional_indices`] rewrites only the keys of moved elements

use std::collections::HashSet;
use std::ops::Range;

use tessera_core::{
    generate_n_keys_between, Element, ElementId, ElementUpdate, InvalidFractionalIndexError,
    OrderKey, OrderKeyError,
};
use tracing::{debug, error, trace};

/// Ensure every element has a key and keys strictly increase.
///
/// Scans the whole sequence once; the error describes the first violation and
/// counts all of them.
pub fn validate_fractional_indices<P>(
    elements: &[Element<P>],
) -> Result<(), InvalidFractionalIndexError> {
    let mut first: Option<usize> = None;
    let mut violations = 0;

    for (position, element) in elements.iter().enumerate() {
        let predecessor = position
            .checked_sub(1)
            .and_then(|p| elements[p].index());
        let valid = match (predecessor, element.index()) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(prev), Some(current)) => prev < current,
        };

        if !valid {
            violations += 1;
            first.get_or_insert(position);
        }
    }

    match first {
        None => Ok(()),
        Some(position) => Err(InvalidFractionalIndexError {
            position,
            predecessor: position
                .checked_sub(1)
                .map(|p| elements[p].key_context()),
            element: elements[position].key_context(),
            violations,
        }),
    }
}

/// Check if keys are present and strictly increasing
pub fn has_valid_fractional_indices<P>(elements: &[Element<P>]) -> bool {
    are_keys_ordered(elements.iter().map(Element::index))
}

/// Reorder elements by their fractional indices.
///
/// Ties on equal keys are broken by id, so the result does not depend on
/// the input order. Elements without a key have no position of their own:
/// they travel with the closest keyed element before them, and unkeyed
/// elements at the very start stay first.
pub fn order_by_fractional_index<P>(elements: Vec<Element<P>>) -> Vec<Element<P>> {
    let len = elements.len();
    let mut groups: Vec<Vec<Element<P>>> = Vec::new();

    for element in elements {
        match groups.last_mut() {
            Some(group) if element.index().is_none() => group.push(element),
            _ => groups.push(vec![element]),
        }
    }

    // Only the first group can start with an unkeyed element; `None` sorts
    // before any key, so it stays in front.
    groups.sort_by(|a, b| {
        let (a, b) = (&a[0], &b[0]);
        a.index().cmp(&b.index()).then_with(|| a.id().cmp(b.id()))
    });

    let mut ordered = Vec::with_capacity(len);
    for group in groups {
        ordered.extend(group);
    }
    ordered
}

/// Rewrite the fewest keys needed to make indices follow the array order.
///
/// The longest strictly increasing run of existing keys is kept (the earliest
/// one when several are equally long); every other element gets a fresh key
/// between its kept neighbours. Order and length never change. Rewrites go
/// through [`Element::update`], so rewritten elements get a new version.
///
/// Returns the number of rewritten keys.
pub fn restore_fractional_indices<P>(elements: &mut [Element<P>]) -> usize {
    let rewrites = match plan_run_keys(elements, 0..elements.len(), None, None) {
        Ok(rewrites) => rewrites,
        Err(err) => {
            error!(error = %err, "Failed to regenerate fractional indices, rekeying all");
            return rekey_all(elements);
        }
    };

    let count = rewrites.len();
    apply_keys(elements, rewrites);

    if count > 0 {
        debug!(
            restored = count,
            total = elements.len(),
            "Restored fractional indices"
        );
    }
    count
}

/// Rewrite keys of moved elements so they follow the array order.
///
/// `changed` names the elements that were moved. Each contiguous run of them
/// is repaired between its unchanged neighbours, keeping the keys that
/// already fit there, so calling this twice is a no-op. When the neighbours
/// are not ordered themselves, or the result would still be invalid, falls
/// back to [`restore_fractional_indices`].
///
/// Returns the number of rewritten keys.
pub fn update_fractional_indices<P>(
    elements: &mut [Element<P>],
    changed: &HashSet<ElementId>,
) -> usize {
    let rewrites = match plan_moved_keys(elements, changed) {
        Some(rewrites) => rewrites,
        None => {
            trace!("Moved elements cannot be rekeyed in place, restoring all indices");
            return restore_fractional_indices(elements);
        }
    };

    let mut candidates: Vec<Option<&OrderKey>> = elements.iter().map(Element::index).collect();
    for (position, key) in &rewrites {
        candidates[*position] = Some(key);
    }
    if !are_keys_ordered(candidates.into_iter()) {
        trace!("Rekeyed moved elements are still unordered, restoring all indices");
        return restore_fractional_indices(elements);
    }

    let count = rewrites.len();
    apply_keys(elements, rewrites);
    count
}

/// Plan new keys for runs of moved elements.
///
/// `None` means the runs cannot be rekeyed between their neighbours.
fn plan_moved_keys<P>(
    elements: &[Element<P>],
    changed: &HashSet<ElementId>,
) -> Option<Vec<(usize, OrderKey)>> {
    let mut rewrites = Vec::new();
    let mut position = 0;

    while position < elements.len() {
        if !changed.contains(elements[position].id()) {
            position += 1;
            continue;
        }

        let start = position;
        while position < elements.len() && changed.contains(elements[position].id()) {
            position += 1;
        }

        let lower = match start.checked_sub(1) {
            Some(p) => Some(elements[p].index()?),
            None => None,
        };
        let upper = match elements.get(position) {
            Some(element) => Some(element.index()?),
            None => None,
        };
        if let (Some(lower), Some(upper)) = (lower, upper) {
            if lower >= upper {
                return None;
            }
        }

        rewrites.extend(plan_run_keys(elements, start..position, lower, upper).ok()?);
    }

    Some(rewrites)
}

/// Plan keys for one run so that it fits strictly between `lower` and `upper`.
///
/// Keys that already fit and form the earliest longest increasing
/// subsequence are kept; everything between them is regenerated.
fn plan_run_keys<P>(
    elements: &[Element<P>],
    run: Range<usize>,
    lower: Option<&OrderKey>,
    upper: Option<&OrderKey>,
) -> Result<Vec<(usize, OrderKey)>, OrderKeyError> {
    let fits = |key: &OrderKey| {
        lower.map_or(true, |lower| lower < key) && upper.map_or(true, |upper| key < upper)
    };
    let keys: Vec<Option<&OrderKey>> = elements[run.clone()]
        .iter()
        .map(|element| element.index().filter(|key| fits(*key)))
        .collect();
    let kept = longest_increasing_keys(&keys);

    let mut rewrites = Vec::new();
    let mut start = 0;
    let bounds = kept.iter().map(Some).chain(std::iter::once(None));

    for bound in bounds {
        let end = bound.copied().unwrap_or(keys.len());
        if end > start {
            let gap_lower = match start.checked_sub(1) {
                Some(p) => keys[p],
                None => lower,
            };
            let gap_upper = match bound {
                Some(&p) => keys[p],
                None => upper,
            };
            let generated = generate_n_keys_between(gap_lower, gap_upper, end - start)?;
            rewrites.extend((run.start + start..run.start + end).zip(generated));
        }
        start = end + 1;
    }

    Ok(rewrites)
}

/// Positions of the earliest longest strictly increasing subsequence of keys.
///
/// Walks right to left recording, for every present key, the length of the
/// longest increasing subsequence starting there, then picks greedily from
/// the left.
fn longest_increasing_keys(keys: &[Option<&OrderKey>]) -> Vec<usize> {
    let mut lengths = vec![0usize; keys.len()];
    // heads[k]: greatest first key of an increasing subsequence of length k + 1
    let mut heads: Vec<&OrderKey> = Vec::new();

    for (position, key) in keys.iter().enumerate().rev() {
        let Some(key) = *key else {
            continue;
        };
        let slot = heads.partition_point(|head| *head > key);
        if slot == heads.len() {
            heads.push(key);
        } else {
            heads[slot] = key;
        }
        lengths[position] = slot + 1;
    }

    let mut kept = Vec::with_capacity(heads.len());
    let mut needed = heads.len();
    let mut previous: Option<&OrderKey> = None;

    for (position, key) in keys.iter().enumerate() {
        if needed == 0 {
            break;
        }
        let Some(key) = *key else {
            continue;
        };
        if lengths[position] == needed && previous.map_or(true, |prev| prev < key) {
            kept.push(position);
            previous = Some(key);
            needed -= 1;
        }
    }

    kept
}

fn apply_keys<P>(elements: &mut [Element<P>], rewrites: Vec<(usize, OrderKey)>) {
    for (position, key) in rewrites {
        elements[position].update(ElementUpdate::new().index(key));
    }
}

/// Rekey every element from scratch with keys that cannot fail to generate
fn rekey_all<P>(elements: &mut [Element<P>]) -> usize {
    let mut previous: Option<OrderKey> = None;
    for element in elements.iter_mut() {
        let key = OrderKey::after(previous.as_ref());
        element.update(ElementUpdate::new().index(key.clone()));
        previous = Some(key);
    }
    elements.len()
}

fn are_keys_ordered<'a>(keys: impl Iterator<Item = Option<&'a OrderKey>>) -> bool {
    let mut previous: Option<&OrderKey> = None;
    for key in keys {
        let Some(key) = key else {
            return false;
        };
        if previous.is_some_and(|prev| prev >= key) {
            return false;
        }
        previous = Some(key);
    }
    true
}
