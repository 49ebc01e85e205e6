//! Snapshot store
//!
//! The store keeps the last captured snapshot of elements and app state and
//! turns every commit into an increment. Whether a commit is recorded into
//! history depends on the scheduled [`CaptureUpdateAction`].
//!
//! Actions come in two flavours:
//! - macro actions, scheduled by the host for the next commit; at most one
//!   runs per commit, picked by precedence
//! - micro actions, queued with their own snapshot and optional delta; all of
//!   them run, in order, before the macro action

use tessera_core::{Element, ElementId, ElementsMap};
use tracing::{debug, trace};

use crate::{AppState, AppStateDelta, AppStatePartial, ElementsDelta};

/// How a commit is treated by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureUpdateAction {
    /// Record into history and update the snapshot
    Immediately,
    /// Update the snapshot without recording (e.g. remote updates)
    Never,
    /// Neither record nor update the snapshot yet
    Eventually,
}

impl CaptureUpdateAction {
    fn precedence(self) -> u8 {
        match self {
            CaptureUpdateAction::Immediately => 2,
            CaptureUpdateAction::Never => 1,
            CaptureUpdateAction::Eventually => 0,
        }
    }
}

/// What changed between two snapshots
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub did_elements_change: bool,
    pub did_app_state_change: bool,
}

/// Immutable pairing of elements and app state.
///
/// Elements are never removed from a snapshot; elements that disappear from
/// the scene are kept as deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot<P> {
    elements: ElementsMap<P>,
    app_state: AppState,
    metadata: SnapshotMetadata,
}

impl<P: Clone + PartialEq> StoreSnapshot<P> {
    pub fn empty() -> Self {
        StoreSnapshot {
            elements: ElementsMap::new(),
            app_state: AppState::default(),
            metadata: SnapshotMetadata::default(),
        }
    }

    pub fn new(elements: ElementsMap<P>, app_state: AppState) -> Self {
        StoreSnapshot {
            elements,
            app_state,
            metadata: SnapshotMetadata::default(),
        }
    }

    pub fn elements(&self) -> &ElementsMap<P> {
        &self.elements
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    pub fn get(&self, id: &ElementId) -> Option<&Element<P>> {
        self.elements.get(id)
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Snapshot updated with the given state, or `None` if nothing changed.
    ///
    /// An element counts as changed when it is new or carries a higher
    /// version. Elements missing from `elements` are marked deleted.
    pub fn maybe_clone(
        &self,
        elements: Option<&ElementsMap<P>>,
        app_state: Option<&AppState>,
    ) -> Option<Self> {
        let changed = elements
            .map(|elements| self.detect_changed_elements(elements))
            .unwrap_or_default();
        let next_app_state = app_state.filter(|app_state| **app_state != self.app_state);

        if changed.is_empty() && next_app_state.is_none() {
            return None;
        }

        let mut next = StoreSnapshot {
            elements: self.elements.clone(),
            app_state: next_app_state.cloned().unwrap_or_else(|| self.app_state.clone()),
            metadata: SnapshotMetadata {
                did_elements_change: !changed.is_empty(),
                did_app_state_change: next_app_state.is_some(),
            },
        };
        for element in changed {
            next.elements.insert(element.id().clone(), element);
        }

        Some(next)
    }

    /// Elements whose version differs from the one in `prev`
    pub fn changed_elements(&self, prev: &StoreSnapshot<P>) -> ElementsMap<P> {
        self.elements
            .iter()
            .filter(|(id, element)| {
                prev.elements.get(*id).map_or(true, |old| {
                    old.version() != element.version()
                        || old.version_nonce() != element.version_nonce()
                })
            })
            .map(|(id, element)| (id.clone(), element.clone()))
            .collect()
    }

    fn detect_changed_elements(&self, elements: &ElementsMap<P>) -> Vec<Element<P>> {
        let mut changed = Vec::new();

        for (id, prev) in &self.elements {
            if !elements.contains_key(id) && !prev.is_deleted() {
                let mut deleted = prev.clone();
                deleted.delete();
                changed.push(deleted);
            }
        }

        for (id, next) in elements {
            let is_newer = self
                .elements
                .get(id)
                .map_or(true, |prev| prev.version() < next.version());
            if is_newer {
                changed.push(next.clone());
            }
        }

        changed
    }
}

/// Changed elements and app state properties of one commit
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange<P> {
    pub elements: ElementsMap<P>,
    pub app_state: AppStatePartial,
}

impl<P: Clone + PartialEq> StoreChange<P> {
    pub fn create(prev: &StoreSnapshot<P>, next: &StoreSnapshot<P>) -> Self {
        StoreChange {
            elements: next.changed_elements(prev),
            app_state: AppStatePartial::changed(&prev.app_state, &next.app_state),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.app_state.is_empty()
    }
}

/// Where a delta comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOrigin {
    /// Captured from a user change
    Capture,
    /// Replayed by undo or redo
    History,
}

/// Identifier of a delta, kept across rebases
pub type DeltaId = u64;

/// Elements and app state delta between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct StoreDelta<P> {
    pub id: DeltaId,
    pub elements: ElementsDelta<P>,
    pub app_state: AppStateDelta,
    pub origin: DeltaOrigin,
}

impl<P: Clone + PartialEq> StoreDelta<P> {
    pub fn new(elements: ElementsDelta<P>, app_state: AppStateDelta, origin: DeltaOrigin) -> Self {
        StoreDelta {
            id: rand::random(),
            elements,
            app_state,
            origin,
        }
    }

    pub fn empty() -> Self {
        Self::new(ElementsDelta::empty(), AppStateDelta::empty(), DeltaOrigin::Capture)
    }

    pub fn calculate(prev: &StoreSnapshot<P>, next: &StoreSnapshot<P>) -> Self {
        let elements = if next.metadata.did_elements_change {
            ElementsDelta::calculate(&prev.elements, &next.elements)
        } else {
            ElementsDelta::empty()
        };
        let app_state = if next.metadata.did_app_state_change {
            AppStateDelta::calculate(&prev.app_state, &next.app_state)
        } else {
            AppStateDelta::empty()
        };

        Self::new(elements, app_state, DeltaOrigin::Capture)
    }

    /// Inverse delta, under a new id
    pub fn inverse(&self) -> Self {
        Self::new(self.elements.inverse(), self.app_state.inverse(), self.origin)
    }

    /// Rebase the elements part onto what was realized, keeping the id
    pub fn apply_latest_changes(
        &self,
        prev_elements: &ElementsMap<P>,
        next_elements: &ElementsMap<P>,
    ) -> Self {
        StoreDelta {
            id: self.id,
            elements: self
                .elements
                .apply_latest_changes(prev_elements, next_elements),
            app_state: self.app_state.clone(),
            origin: self.origin,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.app_state.is_empty()
    }

    /// Apply onto live state, with `snapshot` as fallback for elements the
    /// live set no longer has. Returns whether either part is visible.
    pub fn apply_to(
        &self,
        elements: &ElementsMap<P>,
        app_state: &AppState,
        snapshot: &StoreSnapshot<P>,
    ) -> (ElementsMap<P>, AppState, bool) {
        let (next_elements, elements_visible) = self.elements.apply_to(elements, &snapshot.elements);
        let (next_app_state, app_state_visible) = self.app_state.apply_to(app_state, &next_elements);

        (
            next_elements,
            next_app_state,
            elements_visible || app_state_visible,
        )
    }
}

/// Output of a commit
#[derive(Debug, Clone, PartialEq)]
pub enum StoreIncrement<P> {
    /// Recorded into history
    Durable {
        change: StoreChange<P>,
        delta: StoreDelta<P>,
    },
    /// Observed, not recorded
    Ephemeral { change: StoreChange<P> },
}

impl<P> StoreIncrement<P> {
    pub fn change(&self) -> &StoreChange<P> {
        match self {
            StoreIncrement::Durable { change, .. } | StoreIncrement::Ephemeral { change } => change,
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, StoreIncrement::Durable { .. })
    }
}

struct MicroAction<P> {
    action: CaptureUpdateAction,
    snapshot: StoreSnapshot<P>,
    delta: Option<StoreDelta<P>>,
}

type IncrementListener<P> = Box<dyn FnMut(&StoreIncrement<P>)>;

/// Snapshot store
pub struct Store<P> {
    snapshot: StoreSnapshot<P>,
    macro_actions: Vec<CaptureUpdateAction>,
    micro_actions: Vec<MicroAction<P>>,
    listeners: Vec<IncrementListener<P>>,
}

impl<P: Clone + PartialEq> Default for Store<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + PartialEq> Store<P> {
    pub fn new() -> Self {
        Store {
            snapshot: StoreSnapshot::empty(),
            macro_actions: Vec::new(),
            micro_actions: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Last captured snapshot
    pub fn snapshot(&self) -> &StoreSnapshot<P> {
        &self.snapshot
    }

    /// Register a listener for every emitted increment
    pub fn subscribe(&mut self, listener: impl FnMut(&StoreIncrement<P>) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Schedule a macro action for the next commit
    pub fn schedule_action(&mut self, action: CaptureUpdateAction) {
        self.macro_actions.push(action);
    }

    /// Record the next commit into history
    pub fn schedule_capture(&mut self) {
        self.schedule_action(CaptureUpdateAction::Immediately);
    }

    /// Queue an action with a snapshot taken now.
    ///
    /// A given `delta` is emitted as is instead of being recalculated. Does
    /// nothing when the state matches the current snapshot.
    pub fn schedule_micro_action(
        &mut self,
        action: CaptureUpdateAction,
        elements: Option<&ElementsMap<P>>,
        app_state: Option<&AppState>,
        delta: Option<StoreDelta<P>>,
    ) {
        match self.snapshot.maybe_clone(elements, app_state) {
            Some(snapshot) => self.micro_actions.push(MicroAction {
                action,
                snapshot,
                delta,
            }),
            None => trace!(?action, "Skipping micro action without changes"),
        }
    }

    /// Run queued micro actions, then the scheduled macro action.
    ///
    /// Without a scheduled macro action the commit is `Eventually`.
    pub fn commit(
        &mut self,
        elements: Option<&ElementsMap<P>>,
        app_state: Option<&AppState>,
    ) -> Vec<StoreIncrement<P>> {
        let mut increments = Vec::new();

        for micro in std::mem::take(&mut self.micro_actions) {
            increments.extend(self.execute_action(micro.action, micro.snapshot, micro.delta));
        }

        let action = self.take_macro_action();
        if let Some(snapshot) = self.snapshot.maybe_clone(elements, app_state) {
            increments.extend(self.execute_action(action, snapshot, None));
        }

        increments
    }

    /// Reset the snapshot and drop scheduled actions
    pub fn clear(&mut self) {
        self.snapshot = StoreSnapshot::empty();
        self.macro_actions.clear();
        self.micro_actions.clear();
    }

    fn take_macro_action(&mut self) -> CaptureUpdateAction {
        self.macro_actions
            .drain(..)
            .max_by_key(|action| action.precedence())
            .unwrap_or(CaptureUpdateAction::Eventually)
    }

    fn execute_action(
        &mut self,
        action: CaptureUpdateAction,
        snapshot: StoreSnapshot<P>,
        delta: Option<StoreDelta<P>>,
    ) -> Option<StoreIncrement<P>> {
        let change = StoreChange::create(&self.snapshot, &snapshot);

        let increment = match action {
            CaptureUpdateAction::Immediately => {
                let delta = delta.unwrap_or_else(|| StoreDelta::calculate(&self.snapshot, &snapshot));
                (!delta.is_empty()).then_some(StoreIncrement::Durable { change, delta })
            }
            CaptureUpdateAction::Never | CaptureUpdateAction::Eventually => {
                Some(StoreIncrement::Ephemeral { change })
            }
        };

        if action != CaptureUpdateAction::Eventually {
            self.snapshot = snapshot;
        }

        if let Some(increment) = &increment {
            debug!(
                ?action,
                durable = increment.is_durable(),
                elements = increment.change().elements.len(),
                "Store increment"
            );
            for listener in &mut self.listeners {
                listener(increment);
            }
        }

        increment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tessera_core::{to_elements_map, ElementUpdate, OrderKey};

    fn element(id: &str, version: u32, payload: u32) -> Element<u32> {
        let key = OrderKey::parse("a0").unwrap();
        Element::from_parts(id, version, version, Some(key), false, payload)
    }

    #[test]
    fn test_maybe_clone_detects_newer_versions() {
        let snapshot = StoreSnapshot::new(
            to_elements_map(&[element("A", 2, 1)]),
            AppState::default(),
        );

        let same = to_elements_map(&[element("A", 2, 1)]);
        assert!(snapshot.maybe_clone(Some(&same), None).is_none());

        // Older versions are not taken
        let older = to_elements_map(&[element("A", 1, 0)]);
        assert!(snapshot.maybe_clone(Some(&older), None).is_none());

        let newer = to_elements_map(&[element("A", 3, 5)]);
        let next = snapshot.maybe_clone(Some(&newer), None).unwrap();
        assert_eq!(*next.get(&ElementId::new("A")).unwrap().payload(), 5);
        assert!(next.metadata().did_elements_change);
        assert!(!next.metadata().did_app_state_change);
    }

    #[test]
    fn test_maybe_clone_keeps_missing_as_deleted() {
        let snapshot = StoreSnapshot::new(
            to_elements_map(&[element("A", 1, 1), element("B", 1, 1)]),
            AppState::default(),
        );

        let next = snapshot
            .maybe_clone(Some(&to_elements_map(&[element("A", 1, 1)])), None)
            .unwrap();

        let b = next.get(&ElementId::new("B")).unwrap();
        assert!(b.is_deleted());
        assert_eq!(b.version(), 2);
        assert_eq!(next.elements().len(), 2);
    }

    #[test]
    fn test_maybe_clone_app_state() {
        let snapshot = StoreSnapshot::<u32>::empty();
        let app_state = AppState {
            name: Some("drawing".to_string()),
            ..Default::default()
        };

        assert!(snapshot.maybe_clone(None, Some(&AppState::default())).is_none());
        let next = snapshot.maybe_clone(None, Some(&app_state)).unwrap();
        assert!(next.metadata().did_app_state_change);
        assert_eq!(next.app_state(), &app_state);
    }

    #[test]
    fn test_commit_immediately_emits_durable() {
        let mut store = Store::new();
        let elements = to_elements_map(&[element("A", 1, 1)]);

        store.schedule_capture();
        let increments = store.commit(Some(&elements), None);

        assert_eq!(increments.len(), 1);
        match &increments[0] {
            StoreIncrement::Durable { delta, change } => {
                assert_eq!(delta.elements.added.len(), 1);
                assert_eq!(delta.origin, DeltaOrigin::Capture);
                assert_eq!(change.elements.len(), 1);
            }
            other => panic!("expected durable increment, got {:?}", other),
        }
        assert_eq!(store.snapshot().elements(), &elements);
    }

    #[test]
    fn test_commit_never_updates_snapshot_without_recording() {
        let mut store = Store::new();
        let elements = to_elements_map(&[element("A", 1, 1)]);

        store.schedule_action(CaptureUpdateAction::Never);
        let increments = store.commit(Some(&elements), None);

        assert_eq!(increments.len(), 1);
        assert!(!increments[0].is_durable());
        assert_eq!(store.snapshot().elements(), &elements);
    }

    #[test]
    fn test_commit_eventually_keeps_snapshot() {
        let mut store = Store::new();
        let elements = to_elements_map(&[element("A", 1, 1)]);

        let increments = store.commit(Some(&elements), None);

        assert_eq!(increments.len(), 1);
        assert!(!increments[0].is_durable());
        assert!(store.snapshot().is_empty());

        // Captured later as one durable increment
        store.schedule_capture();
        let increments = store.commit(Some(&elements), None);
        assert!(increments[0].is_durable());
    }

    #[test]
    fn test_macro_action_precedence() {
        let mut store = Store::new();
        let elements = to_elements_map(&[element("A", 1, 1)]);

        store.schedule_action(CaptureUpdateAction::Eventually);
        store.schedule_action(CaptureUpdateAction::Immediately);
        store.schedule_action(CaptureUpdateAction::Never);
        let increments = store.commit(Some(&elements), None);
        assert!(increments[0].is_durable());

        // Scheduled actions are consumed by the commit
        let mut changed = elements.clone();
        changed
            .values_mut()
            .for_each(|element| element.update(ElementUpdate::new().payload(2)));
        let increments = store.commit(Some(&changed), None);
        assert!(!increments[0].is_durable());
    }

    #[test]
    fn test_unchanged_commit_emits_nothing() {
        let mut store = Store::new();
        let elements = to_elements_map(&[element("A", 1, 1)]);
        store.schedule_capture();
        store.commit(Some(&elements), None);

        store.schedule_capture();
        assert!(store.commit(Some(&elements), None).is_empty());
    }

    #[test]
    fn test_micro_actions_run_first_with_given_delta() {
        let mut store = Store::new();
        let elements = to_elements_map(&[element("A", 1, 1)]);
        let delta = StoreDelta::new(
            ElementsDelta::calculate(&ElementsMap::new(), &elements),
            AppStateDelta::empty(),
            DeltaOrigin::History,
        );
        let id = delta.id;

        store.schedule_micro_action(
            CaptureUpdateAction::Immediately,
            Some(&elements),
            None,
            Some(delta),
        );
        let increments = store.commit(Some(&elements), None);

        // The macro commit finds nothing new after the micro action
        assert_eq!(increments.len(), 1);
        match &increments[0] {
            StoreIncrement::Durable { delta, .. } => {
                assert_eq!(delta.id, id);
                assert_eq!(delta.origin, DeltaOrigin::History);
            }
            other => panic!("expected durable increment, got {:?}", other),
        }
    }

    #[test]
    fn test_listeners_and_clear() {
        let mut store = Store::new();
        let seen = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&seen);
        store.subscribe(move |_| *counter.borrow_mut() += 1);

        store.schedule_capture();
        store.commit(Some(&to_elements_map(&[element("A", 1, 1)])), None);
        assert_eq!(*seen.borrow(), 1);

        store.schedule_capture();
        store.clear();
        assert!(store.snapshot().is_empty());
        assert!(store.commit(None, None).is_empty());
    }

    #[test]
    fn test_delta_inverse_gets_new_id() {
        let prev = StoreSnapshot::<u32>::empty();
        let next = prev
            .maybe_clone(Some(&to_elements_map(&[element("A", 1, 1)])), None)
            .unwrap();
        let delta = StoreDelta::calculate(&prev, &next);
        let inverse = delta.inverse();

        assert_ne!(delta.id, inverse.id);
        assert_eq!(inverse.elements.removed.len(), 1);
        assert!(AppStateDelta::calculate(prev.app_state(), next.app_state()).is_empty());
    }
}
