//! Undo/redo history
//!
//! Two stacks of inverse deltas. Undo pops from the undo stack, applies the
//! entry to the live state and pushes the inverse of what was actually
//! realized onto the redo stack; redo does the mirror image.
//!
//! An entry whose application changes nothing visible (e.g. it only touches
//! elements a remote replica has since deleted) is folded: the next entry is
//! applied right away, so one undo always has an observable effect when the
//! stack allows it.

use tessera_core::ElementsMap;
use tracing::{debug, trace};

use crate::{
    AppState, AppStateDelta, CaptureUpdateAction, DeltaOrigin, ElementsDelta, Store, StoreDelta,
    StoreIncrement, StoreSnapshot,
};

/// History configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum number of undo entries; the oldest is evicted beyond it
    pub max_depth: Option<usize>,
}

impl HistoryConfig {
    pub fn bounded(max_depth: usize) -> Self {
        HistoryConfig {
            max_depth: Some(max_depth),
        }
    }
}

/// Emitted once per record, undo or redo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryChangedEvent {
    pub is_undo_stack_empty: bool,
    pub is_redo_stack_empty: bool,
}

/// A history entry.
///
/// Applying never restores versions: every touched element gets a fresh
/// version, so the replay propagates to other replicas like any local edit.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryDelta<P> {
    delta: StoreDelta<P>,
}

impl<P: Clone + PartialEq> HistoryDelta<P> {
    pub fn from_store_delta(delta: &StoreDelta<P>) -> Self {
        HistoryDelta {
            delta: StoreDelta {
                origin: DeltaOrigin::History,
                ..delta.clone()
            },
        }
    }

    pub fn elements(&self) -> &ElementsDelta<P> {
        &self.delta.elements
    }

    pub fn app_state(&self) -> &AppStateDelta {
        &self.delta.app_state
    }

    pub fn inverse(&self) -> Self {
        HistoryDelta {
            delta: self.delta.inverse(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    pub fn apply_to(
        &self,
        elements: &ElementsMap<P>,
        app_state: &AppState,
        snapshot: &StoreSnapshot<P>,
    ) -> (ElementsMap<P>, AppState, bool) {
        self.delta.apply_to(elements, app_state, snapshot)
    }

    pub fn apply_latest_changes(
        &self,
        prev_elements: &ElementsMap<P>,
        next_elements: &ElementsMap<P>,
    ) -> Self {
        HistoryDelta {
            delta: self.delta.apply_latest_changes(prev_elements, next_elements),
        }
    }

    /// The entry as a store delta, tagged as a history replay
    pub fn to_store_delta(&self) -> StoreDelta<P> {
        self.delta.clone()
    }
}

type HistoryListener = Box<dyn FnMut(&HistoryChangedEvent)>;

/// Undo and redo stacks
pub struct History<P> {
    config: HistoryConfig,
    undo_stack: Vec<HistoryDelta<P>>,
    redo_stack: Vec<HistoryDelta<P>>,
    listeners: Vec<HistoryListener>,
}

impl<P: Clone + PartialEq> Default for History<P> {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl<P: Clone + PartialEq> History<P> {
    pub fn new(config: HistoryConfig) -> Self {
        History {
            config,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn is_undo_stack_empty(&self) -> bool {
        self.undo_stack.is_empty()
    }

    pub fn is_redo_stack_empty(&self) -> bool {
        self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&HistoryChangedEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Record a captured delta.
    ///
    /// Empty deltas and history replays are ignored. The redo stack is
    /// cleared only when elements changed; app state changes alone keep it.
    pub fn record(&mut self, delta: &StoreDelta<P>) {
        if delta.is_empty() || delta.origin == DeltaOrigin::History {
            return;
        }

        let entry = HistoryDelta::from_store_delta(delta).inverse();
        let clears_redo = !entry.elements().is_empty();

        self.push_undo(entry);
        if clears_redo {
            self.redo_stack.clear();
        }

        self.notify();
    }

    /// Record a durable increment; ephemeral ones are ignored
    pub fn record_increment(&mut self, increment: &StoreIncrement<P>) {
        if let StoreIncrement::Durable { delta, .. } = increment {
            self.record(delta);
        }
    }

    /// Undo onto the given state.
    ///
    /// Returns the new state, or `None` when there is nothing to undo. The
    /// realized change is scheduled on `store` as a micro action; the caller
    /// commits it along with the returned state.
    pub fn undo(
        &mut self,
        store: &mut Store<P>,
        elements: &ElementsMap<P>,
        app_state: &AppState,
    ) -> Option<(ElementsMap<P>, AppState)> {
        let result = Self::perform(
            &mut self.undo_stack,
            &mut self.redo_stack,
            None,
            store,
            elements,
            app_state,
        );
        self.notify();
        result
    }

    /// Redo onto the given state; see [`History::undo`]
    pub fn redo(
        &mut self,
        store: &mut Store<P>,
        elements: &ElementsMap<P>,
        app_state: &AppState,
    ) -> Option<(ElementsMap<P>, AppState)> {
        let max_depth = self.config.max_depth;
        let result = Self::perform(
            &mut self.redo_stack,
            &mut self.undo_stack,
            max_depth,
            store,
            elements,
            app_state,
        );
        self.notify();
        result
    }

    /// Empty both stacks without notifying
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn perform(
        from: &mut Vec<HistoryDelta<P>>,
        to: &mut Vec<HistoryDelta<P>>,
        max_depth: Option<usize>,
        store: &mut Store<P>,
        elements: &ElementsMap<P>,
        app_state: &AppState,
    ) -> Option<(ElementsMap<P>, AppState)> {
        let mut entry = from.pop()?;
        let mut next_elements = elements.clone();
        let mut next_app_state = app_state.clone();
        let mut prev_snapshot = store.snapshot().clone();
        let mut folded = 0usize;

        loop {
            let (applied_elements, applied_app_state, visible) =
                entry.apply_to(&next_elements, &next_app_state, &prev_snapshot);
            next_elements = applied_elements;
            next_app_state = applied_app_state;

            let next_snapshot = prev_snapshot
                .maybe_clone(Some(&next_elements), Some(&next_app_state))
                .unwrap_or_else(|| prev_snapshot.clone());

            let rebased =
                entry.apply_latest_changes(prev_snapshot.elements(), next_snapshot.elements());
            if !rebased.is_empty() {
                store.schedule_micro_action(
                    CaptureUpdateAction::Immediately,
                    Some(&next_elements),
                    Some(&next_app_state),
                    Some(rebased.to_store_delta()),
                );
                entry = rebased;
            }

            to.push(entry.inverse());
            evict_oldest(to, max_depth);
            prev_snapshot = next_snapshot;

            if visible {
                break;
            }

            match from.pop() {
                Some(next_entry) => {
                    folded += 1;
                    trace!(folded, "Folding history entry without visible change");
                    entry = next_entry;
                }
                None => break,
            }
        }

        if folded > 0 {
            debug!(folded, "Skipped history entries without visible change");
        }

        Some((next_elements, next_app_state))
    }

    fn push_undo(&mut self, entry: HistoryDelta<P>) {
        self.undo_stack.push(entry);
        evict_oldest(&mut self.undo_stack, self.config.max_depth);
    }

    fn notify(&mut self) {
        let event = HistoryChangedEvent {
            is_undo_stack_empty: self.undo_stack.is_empty(),
            is_redo_stack_empty: self.redo_stack.is_empty(),
        };
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}

fn evict_oldest<T>(stack: &mut Vec<T>, max_depth: Option<usize>) {
    if let Some(max_depth) = max_depth {
        if stack.len() > max_depth {
            let evicted = stack.len() - max_depth;
            stack.drain(..evicted);
            trace!(evicted, "Evicted oldest history entries");
        }
    }
}
