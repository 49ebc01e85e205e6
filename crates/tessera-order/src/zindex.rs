//! Z-order moves
//!
//! Moves operate on the array order and then resync the fractional indices
//! of the selected elements only. Unselected elements never get a new key.
//! Each function returns `true` if the array order changed; a move without
//! effect (e.g. sending back an element that is already at the bottom) leaves
//! keys and versions untouched.

use std::collections::HashSet;
use std::ops::Range;

use tessera_core::{Element, ElementId};
use tracing::trace;

use crate::update_fractional_indices;

/// Move each contiguous run of selected elements one step down.
///
/// A step skips over deleted elements: the run lands right below the nearest
/// live, unselected element underneath it.
pub fn move_one_left<P>(elements: &mut [Element<P>], selected: &HashSet<ElementId>) -> bool {
    let mut moved = false;

    for run in selected_runs(elements, selected) {
        let target = (0..run.start)
            .rev()
            .find(|&position| is_step_target(&elements[position], selected));

        if let Some(target) = target {
            elements[target..run.end].rotate_right(run.len());
            moved = true;
        }
    }

    finish_move(elements, selected, moved, "left")
}

/// Move each contiguous run of selected elements one step up
pub fn move_one_right<P>(elements: &mut [Element<P>], selected: &HashSet<ElementId>) -> bool {
    let mut moved = false;

    for run in selected_runs(elements, selected).into_iter().rev() {
        let target = (run.end..elements.len())
            .find(|&position| is_step_target(&elements[position], selected));

        if let Some(target) = target {
            elements[run.start..=target].rotate_left(run.len());
            moved = true;
        }
    }

    finish_move(elements, selected, moved, "right")
}

/// Send selected elements to the back, keeping their relative order
pub fn move_all_left<P>(elements: &mut [Element<P>], selected: &HashSet<ElementId>) -> bool {
    let count = count_selected(elements, selected);
    let moved = !elements[..count]
        .iter()
        .all(|element| selected.contains(element.id()));

    if moved {
        stable_partition(elements, |element| selected.contains(element.id()));
    }

    finish_move(elements, selected, moved, "back")
}

/// Bring selected elements to the front, keeping their relative order
pub fn move_all_right<P>(elements: &mut [Element<P>], selected: &HashSet<ElementId>) -> bool {
    let count = count_selected(elements, selected);
    let moved = !elements[elements.len() - count..]
        .iter()
        .all(|element| selected.contains(element.id()));

    if moved {
        stable_partition(elements, |element| !selected.contains(element.id()));
    }

    finish_move(elements, selected, moved, "front")
}

fn finish_move<P>(
    elements: &mut [Element<P>],
    selected: &HashSet<ElementId>,
    moved: bool,
    direction: &str,
) -> bool {
    if moved {
        let rekeyed = update_fractional_indices(elements, selected);
        trace!(direction, rekeyed, "Moved selected elements");
    }
    moved
}

fn is_step_target<P>(element: &Element<P>, selected: &HashSet<ElementId>) -> bool {
    !element.is_deleted() && !selected.contains(element.id())
}

fn count_selected<P>(elements: &[Element<P>], selected: &HashSet<ElementId>) -> usize {
    elements
        .iter()
        .filter(|element| selected.contains(element.id()))
        .count()
}

/// Contiguous position ranges of selected elements, in array order
fn selected_runs<P>(elements: &[Element<P>], selected: &HashSet<ElementId>) -> Vec<Range<usize>> {
    let mut runs: Vec<Range<usize>> = Vec::new();

    for (position, element) in elements.iter().enumerate() {
        if !selected.contains(element.id()) {
            continue;
        }
        match runs.last_mut() {
            Some(run) if run.end == position => run.end += 1,
            _ => runs.push(position..position + 1),
        }
    }

    runs
}

/// Move elements matching `front` before the others, preserving order on
/// both sides.
fn stable_partition<P>(elements: &mut [Element<P>], front: impl Fn(&Element<P>) -> bool) {
    // Stable sort on a boolean key is a stable partition
    elements.sort_by_key(|element| !front(element));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_fractional_indices;
    use tessera_core::{OrderKey, INITIAL_VERSION};

    /// Build a keyed sequence; ids prefixed with `~` are deleted
    fn scene(ids: &[&str]) -> Vec<Element<()>> {
        let mut previous: Option<OrderKey> = None;
        ids.iter()
            .map(|raw| {
                let key = OrderKey::after(previous.as_ref());
                previous = Some(key.clone());
                let (id, deleted) = match raw.strip_prefix('~') {
                    Some(id) => (id, true),
                    None => (*raw, false),
                };
                Element::from_parts(id, INITIAL_VERSION, 0, Some(key), deleted, ())
            })
            .collect()
    }

    fn selection(ids: &[&str]) -> HashSet<ElementId> {
        ids.iter().map(|id| ElementId::new(*id)).collect()
    }

    fn ids(elements: &[Element<()>]) -> Vec<&str> {
        elements.iter().map(|e| e.id().as_str()).collect()
    }

    /// Only selected elements may get new keys
    fn assert_rekeyed_selection(before: &[Element<()>], after: &[Element<()>], selected: &[&str]) {
        assert!(validate_fractional_indices(after).is_ok());
        for element in after {
            let old = before.iter().find(|e| e.id() == element.id()).unwrap();
            if !selected.contains(&element.id().as_str()) {
                assert_eq!(old.index(), element.index());
                assert_eq!(old.version(), element.version());
            }
        }
    }

    #[test]
    fn test_move_one_left() {
        let before = scene(&["A", "B", "C", "D"]);
        let mut after = before.clone();

        assert!(move_one_left(&mut after, &selection(&["C", "D"])));
        assert_eq!(ids(&after), ["A", "C", "D", "B"]);
        assert_rekeyed_selection(&before, &after, &["C", "D"]);
    }

    #[test]
    fn test_move_one_left_skips_deleted() {
        let before = scene(&["A", "~B", "~C", "D"]);
        let mut after = before.clone();

        assert!(move_one_left(&mut after, &selection(&["D"])));
        assert_eq!(ids(&after), ["D", "A", "B", "C"]);
        assert_rekeyed_selection(&before, &after, &["D"]);
    }

    #[test]
    fn test_move_one_left_separate_runs() {
        let before = scene(&["A", "B", "C", "D", "E"]);
        let mut after = before.clone();

        assert!(move_one_left(&mut after, &selection(&["B", "D"])));
        assert_eq!(ids(&after), ["B", "A", "D", "C", "E"]);
        assert_rekeyed_selection(&before, &after, &["B", "D"]);
    }

    #[test]
    fn test_move_one_right() {
        let before = scene(&["A", "B", "C", "~D", "E"]);
        let mut after = before.clone();

        assert!(move_one_right(&mut after, &selection(&["A", "C"])));
        assert_eq!(ids(&after), ["B", "A", "D", "E", "C"]);
        assert_rekeyed_selection(&before, &after, &["A", "C"]);
    }

    #[test]
    fn test_selection_order_is_preserved() {
        // No live unselected element between the two runs
        let before = scene(&["A", "~B", "C"]);
        let mut after = before.clone();

        assert!(!move_one_left(&mut after, &selection(&["A", "C"])));
        assert_eq!(after, before);
    }

    #[test]
    fn test_move_all() {
        let before = scene(&["A", "B", "C", "D"]);

        let mut back = before.clone();
        assert!(move_all_left(&mut back, &selection(&["D", "B"])));
        assert_eq!(ids(&back), ["B", "D", "A", "C"]);
        assert_rekeyed_selection(&before, &back, &["B", "D"]);

        let mut front = before.clone();
        assert!(move_all_right(&mut front, &selection(&["A", "C"])));
        assert_eq!(ids(&front), ["B", "D", "A", "C"]);
        assert_rekeyed_selection(&before, &front, &["A", "C"]);
    }

    #[test]
    fn test_boundary_moves_are_noops() {
        let before = scene(&["A", "B", "C"]);

        let mut sequence = before.clone();
        assert!(!move_one_left(&mut sequence, &selection(&["A"])));
        assert!(!move_all_left(&mut sequence, &selection(&["A"])));
        assert!(!move_one_right(&mut sequence, &selection(&["C"])));
        assert!(!move_all_right(&mut sequence, &selection(&["B", "C"])));
        assert!(!move_one_left(&mut sequence, &selection(&[])));
        assert!(!move_all_right(&mut sequence, &selection(&["X"])));

        assert_eq!(sequence, before);
    }
}
