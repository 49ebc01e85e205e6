//! Invertible deltas
//!
//! A delta records, for every touched property, the value it had before
//! (`deleted`) and the value it has after (`inserted`). Inverting a delta
//! swaps both sides, which is what undo and redo are built on.
//!
//! Element deltas are bucketed by what they do to visibility: `added`
//! brings an element back from deletion, `removed` soft-deletes it, and
//! `updated` covers everything else.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tessera_core::{
    random_nonce, Element, ElementId, ElementUpdate, ElementsMap, OrderKey, INITIAL_VERSION,
};
use tessera_order::{order_by_fractional_index, update_fractional_indices};
use tracing::{trace, warn};

/// Before and after values of one change
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta<T> {
    pub deleted: T,
    pub inserted: T,
}

impl<T> Delta<T> {
    pub fn new(deleted: T, inserted: T) -> Self {
        Delta { deleted, inserted }
    }
}

impl<T: Clone> Delta<T> {
    /// Swap both sides
    pub fn inverse(&self) -> Self {
        Delta {
            deleted: self.inserted.clone(),
            inserted: self.deleted.clone(),
        }
    }
}

/// Subset of element properties captured by a delta.
///
/// `None` means the property is not part of the delta. The index is doubly
/// optional because "no key" is itself a value an element can have.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementPartial<P> {
    pub version: Option<u32>,
    pub version_nonce: Option<u32>,
    pub is_deleted: Option<bool>,
    pub index: Option<Option<OrderKey>>,
    pub payload: Option<P>,
}

impl<P> Default for ElementPartial<P> {
    fn default() -> Self {
        ElementPartial {
            version: None,
            version_nonce: None,
            is_deleted: None,
            index: None,
            payload: None,
        }
    }
}

impl<P: Clone + PartialEq> ElementPartial<P> {
    /// Every property of `element`
    pub fn from_element(element: &Element<P>) -> Self {
        ElementPartial {
            version: Some(element.version()),
            version_nonce: Some(element.version_nonce()),
            is_deleted: Some(element.is_deleted()),
            index: Some(element.index().cloned()),
            payload: Some(element.payload().clone()),
        }
    }

    /// Stand-in for the side of an element that did not exist
    pub fn tombstone(version: u32) -> Self {
        ElementPartial {
            version: Some(version),
            version_nonce: Some(random_nonce()),
            is_deleted: Some(true),
            ..Default::default()
        }
    }

    /// Properties that differ between two versions of the same element
    pub fn diff(prev: &Element<P>, next: &Element<P>) -> Delta<Self> {
        let mut deleted = ElementPartial::default();
        let mut inserted = ElementPartial::default();

        if prev.version() != next.version() {
            deleted.version = Some(prev.version());
            inserted.version = Some(next.version());
        }
        if prev.version_nonce() != next.version_nonce() {
            deleted.version_nonce = Some(prev.version_nonce());
            inserted.version_nonce = Some(next.version_nonce());
        }
        if prev.is_deleted() != next.is_deleted() {
            deleted.is_deleted = Some(prev.is_deleted());
            inserted.is_deleted = Some(next.is_deleted());
        }
        if prev.index() != next.index() {
            deleted.index = Some(prev.index().cloned());
            inserted.index = Some(next.index().cloned());
        }
        if prev.payload() != next.payload() {
            deleted.payload = Some(prev.payload().clone());
            inserted.payload = Some(next.payload().clone());
        }

        Delta::new(deleted, inserted)
    }

    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.version_nonce.is_none()
            && self.is_deleted.is_none()
            && self.index.is_none()
            && self.payload.is_none()
    }

    /// Same set of properties, with values taken from `element`
    pub fn refresh(&self, element: &Element<P>) -> Self {
        ElementPartial {
            version: self.version.map(|_| element.version()),
            version_nonce: self.version_nonce.map(|_| element.version_nonce()),
            is_deleted: self.is_deleted.map(|_| element.is_deleted()),
            index: self.index.as_ref().map(|_| element.index().cloned()),
            payload: self.payload.as_ref().map(|_| element.payload().clone()),
        }
    }

    /// Whether a property present on both sides has different values
    pub fn is_inner_different(&self, other: &Self) -> bool {
        fn differs<T: PartialEq>(left: &Option<T>, right: &Option<T>) -> bool {
            matches!((left, right), (Some(left), Some(right)) if left != right)
        }

        differs(&self.version, &other.version)
            || differs(&self.version_nonce, &other.version_nonce)
            || differs(&self.is_deleted, &other.is_deleted)
            || differs(&self.index, &other.index)
            || differs(&self.payload, &other.payload)
    }

    /// Apply onto `element` as a fresh local mutation.
    ///
    /// Version and nonce are never restored: the result always gets a new
    /// version, so replayed history wins over what replicas already saw.
    pub fn apply(&self, element: &Element<P>) -> Element<P> {
        element.mutate(ElementUpdate {
            index: self.index.clone(),
            is_deleted: self.is_deleted,
            payload: self.payload.clone(),
        })
    }

    /// Whether applying onto `element` changes what a user sees.
    ///
    /// The index is left out: reordering is detected separately.
    fn is_visible_on(&self, element: &Element<P>) -> bool {
        match (element.is_deleted(), self.is_deleted) {
            (true, Some(false)) => true,
            (true, _) => false,
            (false, Some(true)) => true,
            (false, _) => self
                .payload
                .as_ref()
                .is_some_and(|payload| payload != element.payload()),
        }
    }

    /// Whether every property present already has its value on `element`
    fn matches(&self, element: &Element<P>) -> bool {
        self.is_deleted.map_or(true, |deleted| deleted == element.is_deleted())
            && self
                .index
                .as_ref()
                .map_or(true, |index| index.as_ref() == element.index())
            && self
                .payload
                .as_ref()
                .map_or(true, |payload| payload == element.payload())
    }

    /// Build the element from scratch, when neither the scene nor the
    /// snapshot knows it. Requires a captured payload.
    fn to_element(&self, id: &ElementId) -> Option<Element<P>> {
        let payload = self.payload.clone()?;
        Some(Element::from_parts(
            id.clone(),
            self.version.unwrap_or(INITIAL_VERSION),
            self.version_nonce.unwrap_or_else(random_nonce),
            self.index.clone().flatten(),
            self.is_deleted.unwrap_or(false),
            payload,
        ))
    }
}

/// Changes to a set of elements, keyed by element id
#[derive(Clone, Debug, PartialEq)]
pub struct ElementsDelta<P> {
    pub added: BTreeMap<ElementId, Delta<ElementPartial<P>>>,
    pub removed: BTreeMap<ElementId, Delta<ElementPartial<P>>>,
    pub updated: BTreeMap<ElementId, Delta<ElementPartial<P>>>,
}

impl<P> Default for ElementsDelta<P> {
    fn default() -> Self {
        ElementsDelta {
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
            updated: BTreeMap::new(),
        }
    }
}

impl<P: Clone + PartialEq> ElementsDelta<P> {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from unclassified entries, putting each in the right bucket
    pub fn from_entries(
        entries: impl IntoIterator<Item = (ElementId, Delta<ElementPartial<P>>)>,
    ) -> Self {
        let mut delta = Self::empty();
        for (id, entry) in entries {
            delta.insert(id, entry);
        }
        delta
    }

    /// Difference between two element maps.
    ///
    /// Elements missing from `next` count as removed; elements missing from
    /// `prev` count as added. Elements with an unchanged nonce are skipped.
    pub fn calculate(prev: &ElementsMap<P>, next: &ElementsMap<P>) -> Self {
        let mut delta = Self::empty();

        for (id, prev_element) in prev {
            if next.contains_key(id) {
                continue;
            }
            let entry = Delta::new(
                ElementPartial::from_element(prev_element),
                ElementPartial::tombstone(prev_element.version().wrapping_add(1)),
            );
            if prev_element.is_deleted() {
                delta.updated.insert(id.clone(), entry);
            } else {
                delta.removed.insert(id.clone(), entry);
            }
        }

        for (id, next_element) in next {
            let Some(prev_element) = prev.get(id) else {
                let entry = Delta::new(
                    ElementPartial::tombstone(next_element.version().saturating_sub(1)),
                    ElementPartial::from_element(next_element),
                );
                if next_element.is_deleted() {
                    delta.updated.insert(id.clone(), entry);
                } else {
                    delta.added.insert(id.clone(), entry);
                }
                continue;
            };

            if prev_element.version_nonce() == next_element.version_nonce() {
                continue;
            }

            let entry = ElementPartial::diff(prev_element, next_element);
            match (prev_element.is_deleted(), next_element.is_deleted()) {
                (true, false) => delta.added.insert(id.clone(), entry),
                (false, true) => delta.removed.insert(id.clone(), entry),
                _ => delta.updated.insert(id.clone(), entry),
            };
        }

        delta
    }

    /// Swap sides of every entry; additions become removals and vice versa
    pub fn inverse(&self) -> Self {
        let invert = |entries: &BTreeMap<ElementId, Delta<ElementPartial<P>>>| {
            entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.inverse()))
                .collect()
        };

        ElementsDelta {
            added: invert(&self.removed),
            removed: invert(&self.added),
            updated: invert(&self.updated),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Number of entries across all buckets
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.updated.len()
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.added.contains_key(id) || self.removed.contains_key(id) || self.updated.contains_key(id)
    }

    /// Rebase onto what was actually realized.
    ///
    /// The `deleted` side of each entry is refreshed from `prev_elements`
    /// and the `inserted` side from `next_elements`. Entries whose sides end
    /// up equal are dropped, and the rest are bucketed again.
    pub fn apply_latest_changes(
        &self,
        prev_elements: &ElementsMap<P>,
        next_elements: &ElementsMap<P>,
    ) -> Self {
        let entries = self.entries().filter_map(|(id, entry)| {
            let deleted = match prev_elements.get(id) {
                Some(element) => entry.deleted.refresh(element),
                None => entry.deleted.clone(),
            };
            let inserted = match next_elements.get(id) {
                Some(element) => entry.inserted.refresh(element),
                None => entry.inserted.clone(),
            };

            if deleted.is_inner_different(&inserted) {
                Some((id.clone(), Delta::new(deleted, inserted)))
            } else {
                trace!(%id, "Dropping delta entry without remaining difference");
                None
            }
        });

        Self::from_entries(entries.collect::<Vec<_>>())
    }

    /// Apply the `inserted` side of every entry onto `elements`.
    ///
    /// Elements missing from `elements` are taken from `snapshot`, and built
    /// from the entry itself as a last resort; bringing one back is visible
    /// only if it ends up not deleted. Touched elements get a new version,
    /// except where the entry already matches. If any entry moved an index,
    /// the result is reordered by index and the moved elements rekeyed.
    ///
    /// Returns the new elements and whether the change is visible.
    pub fn apply_to(
        &self,
        elements: &ElementsMap<P>,
        snapshot: &ElementsMap<P>,
    ) -> (ElementsMap<P>, bool) {
        let mut next = elements.clone();
        let mut changed: HashSet<ElementId> = HashSet::new();
        let mut visible = false;
        let mut reordered = false;

        for (id, entry) in self.entries() {
            let (element, restored) = match elements.get(id) {
                Some(element) => (element.clone(), false),
                None => match snapshot
                    .get(id)
                    .cloned()
                    .or_else(|| entry.inserted.to_element(id))
                {
                    Some(element) => (element, true),
                    None => {
                        warn!(%id, "Skipping delta entry for unknown element");
                        continue;
                    }
                },
            };

            let applied = if entry.inserted.matches(&element) {
                trace!(%id, "Delta entry already realized");
                element
            } else {
                if !restored {
                    visible |= entry.inserted.is_visible_on(&element);
                }
                changed.insert(id.clone());
                entry.inserted.apply(&element)
            };

            if restored {
                // Brought back into the scene, possibly at the wrong position
                visible |= !applied.is_deleted();
                changed.insert(id.clone());
                reordered = true;
            }
            if entry.inserted.index.is_some() && entry.deleted.index != entry.inserted.index {
                reordered = true;
            }

            next.insert(id.clone(), applied);
        }

        if reordered && reorder(&mut next, &changed) {
            visible = true;
        }

        (next, visible)
    }

    fn entries(&self) -> impl Iterator<Item = (&ElementId, &Delta<ElementPartial<P>>)> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.updated.iter())
    }

    fn insert(&mut self, id: ElementId, entry: Delta<ElementPartial<P>>) {
        let was_deleted = entry.deleted.is_deleted == Some(true);
        let is_deleted = entry.inserted.is_deleted == Some(true);

        let bucket = match (was_deleted, is_deleted) {
            (true, false) => &mut self.added,
            (false, true) => &mut self.removed,
            _ => &mut self.updated,
        };
        bucket.insert(id, entry);
    }
}

/// Order `elements` by index and rekey the changed ones that moved.
/// Returns whether any changed element that is not deleted moved.
fn reorder<P: Clone>(elements: &mut ElementsMap<P>, changed: &HashSet<ElementId>) -> bool {
    let unordered: Vec<ElementId> = elements.keys().cloned().collect();
    let mut ordered = order_by_fractional_index(elements.values().cloned().collect());

    let moved: HashSet<ElementId> = unordered
        .iter()
        .zip(&ordered)
        .filter(|(before, after)| *before != after.id() && changed.contains(*before))
        .map(|(before, _)| before.clone())
        .collect();

    update_fractional_indices(&mut ordered, &moved);
    *elements = ordered
        .into_iter()
        .map(|element| (element.id().clone(), element))
        .collect();

    moved
        .iter()
        .any(|id| elements.get(id).is_some_and(|element| !element.is_deleted()))
}

/// The part of the application state tracked by history
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppState {
    pub name: Option<String>,
    pub view_background_color: String,
    pub selected_element_ids: BTreeSet<ElementId>,
    pub cropping_element_id: Option<ElementId>,
}

impl Default for AppState {
    fn default() -> Self {
        AppState {
            name: None,
            view_background_color: "#ffffff".to_string(),
            selected_element_ids: BTreeSet::new(),
            cropping_element_id: None,
        }
    }
}

/// Subset of [`AppState`] properties
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppStatePartial {
    pub name: Option<Option<String>>,
    pub view_background_color: Option<String>,
    pub selected_element_ids: Option<BTreeSet<ElementId>>,
    pub cropping_element_id: Option<Option<ElementId>>,
}

impl AppStatePartial {
    /// Values of `next` for every property that differs from `prev`
    pub fn changed(prev: &AppState, next: &AppState) -> Self {
        AppStatePartial {
            name: (prev.name != next.name).then(|| next.name.clone()),
            view_background_color: (prev.view_background_color != next.view_background_color)
                .then(|| next.view_background_color.clone()),
            selected_element_ids: (prev.selected_element_ids != next.selected_element_ids)
                .then(|| next.selected_element_ids.clone()),
            cropping_element_id: (prev.cropping_element_id != next.cropping_element_id)
                .then(|| next.cropping_element_id.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.view_background_color.is_none()
            && self.selected_element_ids.is_none()
            && self.cropping_element_id.is_none()
    }
}

/// Changes to the tracked application state.
///
/// Selection is stored as a diff: `deleted` holds deselected ids and
/// `inserted` holds newly selected ones, so applying it merges with the
/// current selection instead of overwriting it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppStateDelta {
    pub delta: Delta<AppStatePartial>,
}

impl AppStateDelta {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn calculate(prev: &AppState, next: &AppState) -> Self {
        let mut deleted = AppStatePartial::default();
        let mut inserted = AppStatePartial::default();

        if prev.name != next.name {
            deleted.name = Some(prev.name.clone());
            inserted.name = Some(next.name.clone());
        }
        if prev.view_background_color != next.view_background_color {
            deleted.view_background_color = Some(prev.view_background_color.clone());
            inserted.view_background_color = Some(next.view_background_color.clone());
        }
        if prev.selected_element_ids != next.selected_element_ids {
            deleted.selected_element_ids = Some(
                prev.selected_element_ids
                    .difference(&next.selected_element_ids)
                    .cloned()
                    .collect(),
            );
            inserted.selected_element_ids = Some(
                next.selected_element_ids
                    .difference(&prev.selected_element_ids)
                    .cloned()
                    .collect(),
            );
        }
        if prev.cropping_element_id != next.cropping_element_id {
            deleted.cropping_element_id = Some(prev.cropping_element_id.clone());
            inserted.cropping_element_id = Some(next.cropping_element_id.clone());
        }

        AppStateDelta {
            delta: Delta::new(deleted, inserted),
        }
    }

    pub fn inverse(&self) -> Self {
        AppStateDelta {
            delta: self.delta.inverse(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delta.deleted.is_empty() && self.delta.inserted.is_empty()
    }

    /// Apply onto `app_state`.
    ///
    /// References to elements that are missing or deleted in `elements` are
    /// filtered out and do not count as visible.
    pub fn apply_to<P>(&self, app_state: &AppState, elements: &ElementsMap<P>) -> (AppState, bool) {
        let Delta { deleted, inserted } = &self.delta;
        let mut next = app_state.clone();

        if let Some(name) = &inserted.name {
            next.name = name.clone();
        }
        if let Some(color) = &inserted.view_background_color {
            next.view_background_color = color.clone();
        }
        if let Some(cropping) = &inserted.cropping_element_id {
            next.cropping_element_id = cropping.clone();
        }
        if let Some(selected) = &inserted.selected_element_ids {
            next.selected_element_ids.extend(selected.iter().cloned());
        }
        if let Some(deselected) = &deleted.selected_element_ids {
            next.selected_element_ids
                .retain(|id| !deselected.contains(id));
        }

        let visible = filter_invisible_changes(app_state, &mut next, elements);
        (next, visible)
    }
}

fn filter_invisible_changes<P>(
    prev: &AppState,
    next: &mut AppState,
    elements: &ElementsMap<P>,
) -> bool {
    let is_live = |id: &ElementId| elements.get(id).is_some_and(|element| !element.is_deleted());

    let mut visible =
        prev.name != next.name || prev.view_background_color != next.view_background_color;

    if prev.selected_element_ids != next.selected_element_ids {
        if next.selected_element_ids.is_empty() {
            visible = true;
        } else {
            next.selected_element_ids.retain(|id| is_live(id));
            if !next.selected_element_ids.is_empty() {
                visible = true;
            }
        }
    }

    if prev.cropping_element_id != next.cropping_element_id {
        match &next.cropping_element_id {
            None => visible = true,
            Some(id) if is_live(id) => visible = true,
            Some(_) => next.cropping_element_id = None,
        }
    }

    visible
}
