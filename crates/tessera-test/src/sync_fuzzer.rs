//! Sync Fuzzer - Multi-replica convergence testing
//!
//! Replicas share a scene and mutate it concurrently: creating, editing,
//! deleting and restacking elements, and undoing or redoing their own
//! changes. Changed elements are broadcast and reconciled on arrival, with
//! optional out-of-order delivery and in-progress gestures.
//!
//! Tests:
//! - Ordering invariant after every reconciliation
//! - Unique ids after every reconciliation
//! - Versions never go backwards
//! - Convergence after anti-entropy rounds

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tessera_core::{
    random_nonce, to_elements_map, EditingState, Element, ElementId, ElementUpdate, OrderKey,
    INITIAL_VERSION,
};
use tessera_history::{AppState, CaptureUpdateAction, History, HistoryConfig, Store, StoreIncrement};
use tessera_order::{
    has_valid_fractional_indices, move_all_left, move_all_right, move_one_left, move_one_right,
};
use tessera_reconcile::Reconciler;

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of replicas
    pub replica_count: usize,
    /// Elements in the shared initial scene
    pub initial_elements: usize,
    /// Number of local operations to generate
    pub operation_count: usize,
    /// Probability of a delete (0.0 - 1.0)
    pub delete_prob: f64,
    /// Probability of a z-order move
    pub move_prob: f64,
    /// Probability of an undo or redo
    pub undo_prob: f64,
    /// Probability of out-of-order delivery
    pub reorder_prob: f64,
    /// Probability that a replica is dragging an element when a batch arrives
    pub gesture_prob: f64,
    /// Maximum anti-entropy rounds before declaring divergence
    pub max_sync_rounds: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            replica_count: 3,
            initial_elements: 10,
            operation_count: 500,
            delete_prob: 0.1,
            move_prob: 0.2,
            undo_prob: 0.15,
            reorder_prob: 0.2,
            gesture_prob: 0.05,
            max_sync_rounds: 8,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            replica_count: 2,
            initial_elements: 5,
            operation_count: 100,
            delete_prob: 0.1,
            move_prob: 0.2,
            undo_prob: 0.1,
            reorder_prob: 0.1,
            gesture_prob: 0.0,
            max_sync_rounds: 8,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            replica_count: 6,
            initial_elements: 50,
            operation_count: 5000,
            delete_prob: 0.15,
            move_prob: 0.3,
            undo_prob: 0.2,
            reorder_prob: 0.4,
            gesture_prob: 0.1,
            max_sync_rounds: 12,
            seed: 42,
        }
    }
}

/// Changed elements broadcast by one replica
#[derive(Clone, Debug)]
pub struct FuzzMessage {
    pub source: usize,
    pub elements: Vec<Element<u64>>,
}

/// A replica: scene plus the store and history a host keeps next to it
pub struct FuzzReplica {
    pub replica_id: usize,
    pub elements: Vec<Element<u64>>,
    pub editing: EditingState,
    store: Store<u64>,
    history: History<u64>,
    app_state: AppState,
    created: u64,
    pub operations: u64,
}

impl FuzzReplica {
    pub fn new(replica_id: usize, elements: Vec<Element<u64>>) -> Self {
        let mut replica = FuzzReplica {
            replica_id,
            elements,
            editing: EditingState::new(),
            store: Store::new(),
            history: History::new(HistoryConfig::bounded(100)),
            app_state: AppState::default(),
            created: 0,
            operations: 0,
        };
        replica.commit(CaptureUpdateAction::Never);
        replica
    }

    pub fn history(&self) -> &History<u64> {
        &self.history
    }

    /// Commit the scene to the store; returns the changed elements
    fn commit(&mut self, action: CaptureUpdateAction) -> Vec<Element<u64>> {
        self.store.schedule_action(action);
        let map = to_elements_map(&self.elements);

        let mut changed: BTreeMap<ElementId, Element<u64>> = BTreeMap::new();
        for increment in self.store.commit(Some(&map), Some(&self.app_state)) {
            self.history.record_increment(&increment);
            if let StoreIncrement::Durable { change, .. } = &increment {
                for (id, element) in &change.elements {
                    changed.insert(id.clone(), element.clone());
                }
            }
        }

        changed.into_values().collect()
    }

    fn create(&mut self, payload: u64) {
        self.created += 1;
        let key = OrderKey::after(self.elements.last().and_then(|e| e.index()));
        let id = format!("r{}-e{}", self.replica_id, self.created);
        self.elements.push(Element::from_parts(
            id,
            INITIAL_VERSION,
            random_nonce(),
            Some(key),
            false,
            payload,
        ));
    }

    fn update(&mut self, position: usize, update: ElementUpdate<u64>) {
        if let Some(element) = self.elements.get_mut(position) {
            element.update(update);
        }
    }

    fn replay(&mut self, undo: bool) -> bool {
        let map = to_elements_map(&self.elements);
        let result = if undo {
            self.history.undo(&mut self.store, &map, &self.app_state)
        } else {
            self.history.redo(&mut self.store, &map, &self.app_state)
        };

        match result {
            Some((elements, app_state)) => {
                self.elements = elements.into_values().collect();
                self.app_state = app_state;
                true
            }
            None => false,
        }
    }

    fn live_positions(&self) -> Vec<usize> {
        (0..self.elements.len())
            .filter(|&position| !self.elements[position].is_deleted())
            .collect()
    }
}

/// Sync fuzzer
pub struct SyncFuzzer {
    config: FuzzerConfig,
    replicas: Vec<FuzzReplica>,
    pending: Vec<FuzzMessage>,
    reconciler: Reconciler,
    rng: StdRng,
    result: FuzzResult,
}

impl SyncFuzzer {
    /// Create a new fuzzer with a shared initial scene
    pub fn new(config: FuzzerConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut previous: Option<OrderKey> = None;
        let scene: Vec<Element<u64>> = (0..config.initial_elements)
            .map(|i| {
                let key = OrderKey::after(previous.as_ref());
                previous = Some(key.clone());
                let nonce = rng.gen_range(0..1u32 << 31);
                let payload = rng.gen();
                Element::from_parts(format!("init-{}", i), INITIAL_VERSION, nonce, Some(key), false, payload)
            })
            .collect();

        let replicas = (0..config.replica_count)
            .map(|replica_id| FuzzReplica::new(replica_id, scene.clone()))
            .collect();

        SyncFuzzer {
            config,
            replicas,
            pending: Vec::new(),
            reconciler: Reconciler::default(),
            rng,
            result: FuzzResult::new(),
        }
    }

    pub fn replicas(&self) -> &[FuzzReplica] {
        &self.replicas
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        if self.replicas.is_empty() {
            return self.result.clone();
        }

        for _ in 0..self.config.operation_count {
            let source = self.rng.gen_range(0..self.replicas.len());
            self.apply_operation(source);

            if !self.pending.is_empty() {
                let next = if self.rng.gen::<f64>() < self.config.reorder_prob {
                    self.rng.gen_range(0..self.pending.len())
                } else {
                    0
                };
                let message = self.pending.remove(next);
                self.deliver(message);
            }
        }

        // Drain remaining messages in order
        for message in std::mem::take(&mut self.pending) {
            self.deliver(message);
        }

        for replica in &mut self.replicas {
            replica.editing = EditingState::new();
        }
        self.result.convergence = self.anti_entropy();

        self.result.clone()
    }

    /// Apply one random local operation and queue its broadcast
    fn apply_operation(&mut self, source: usize) {
        let roll = self.rng.gen::<f64>();
        let undo_prob = self.config.undo_prob;
        let move_prob = undo_prob + self.config.move_prob;
        let delete_prob = move_prob + self.config.delete_prob;

        let replica = &mut self.replicas[source];
        replica.editing = EditingState::new();
        let live = replica.live_positions();

        if roll < undo_prob {
            let undo = self.rng.gen_bool(0.5);
            if replica.replay(undo) {
                self.result.replays += 1;
            }
        } else if roll < move_prob && !live.is_empty() {
            let count = self.rng.gen_range(1..=live.len().min(3));
            let selected: HashSet<ElementId> = live
                .choose_multiple(&mut self.rng, count)
                .map(|&position| replica.elements[position].id().clone())
                .collect();
            match self.rng.gen_range(0..4) {
                0 => move_one_left(&mut replica.elements, &selected),
                1 => move_one_right(&mut replica.elements, &selected),
                2 => move_all_left(&mut replica.elements, &selected),
                _ => move_all_right(&mut replica.elements, &selected),
            };
        } else if roll < delete_prob && !live.is_empty() {
            let position = live[self.rng.gen_range(0..live.len())];
            replica.update(position, ElementUpdate::new().deleted(true));
        } else if live.is_empty() || self.rng.gen_bool(0.3) {
            let payload = self.rng.gen();
            replica.create(payload);
        } else {
            let position = live[self.rng.gen_range(0..live.len())];
            let payload = self.rng.gen();
            replica.update(position, ElementUpdate::new().payload(payload));
        }

        replica.operations += 1;
        self.result.operations_applied += 1;

        let changed = replica.commit(CaptureUpdateAction::Immediately);
        if !changed.is_empty() {
            self.pending.push(FuzzMessage {
                source,
                elements: changed,
            });
        }

        if self.rng.gen::<f64>() < self.config.gesture_prob {
            let replica = &mut self.replicas[source];
            if let Some(element) = replica.elements.choose(&mut self.rng) {
                replica.editing = EditingState::new().with_dragging([element.id().clone()]);
            }
        }
    }

    /// Reconcile a message into every other replica
    fn deliver(&mut self, message: FuzzMessage) {
        let mut received = false;
        for replica in &mut self.replicas {
            if replica.replica_id == message.source {
                continue;
            }
            received = true;
            let before = replica.elements.clone();
            let reconciliation =
                self.reconciler
                    .reconcile(&before, &message.elements, &replica.editing);

            self.result.check(&before, &reconciliation.elements);
            self.result.repaired_keys += reconciliation.stats.repaired_keys;

            replica.elements = reconciliation.elements;
            replica.commit(CaptureUpdateAction::Never);
        }
        if received {
            self.result.messages_delivered += 1;
        }
    }

    /// Exchange full scenes until replicas agree
    fn anti_entropy(&mut self) -> ConvergenceResult {
        for round in 0..self.config.max_sync_rounds {
            if let ConvergenceResult::Converged = self.check_convergence() {
                self.result.sync_rounds = round;
                return ConvergenceResult::Converged;
            }

            let scenes: Vec<Vec<Element<u64>>> =
                self.replicas.iter().map(|r| r.elements.clone()).collect();

            for replica in &mut self.replicas {
                for (source, scene) in scenes.iter().enumerate() {
                    if source == replica.replica_id {
                        continue;
                    }
                    let before = replica.elements.clone();
                    let reconciliation =
                        self.reconciler
                            .reconcile(&before, scene, &replica.editing);
                    self.result.check(&before, &reconciliation.elements);
                    self.result.repaired_keys += reconciliation.stats.repaired_keys;
                    replica.elements = reconciliation.elements;
                }
                replica.commit(CaptureUpdateAction::Never);
            }
        }

        self.result.sync_rounds = self.config.max_sync_rounds;
        self.check_convergence()
    }

    /// Check if all replicas hold identical scenes
    fn check_convergence(&self) -> ConvergenceResult {
        let Some(reference) = self.replicas.first() else {
            return ConvergenceResult::Converged;
        };

        let divergent: Vec<usize> = self.replicas[1..]
            .iter()
            .filter(|replica| replica.elements != reference.elements)
            .map(|replica| replica.replica_id)
            .collect();

        if divergent.is_empty() {
            ConvergenceResult::Converged
        } else {
            ConvergenceResult::Diverged(divergent)
        }
    }
}

/// Convergence check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    Converged,
    /// Replicas whose scene differs from the first one
    Diverged(Vec<usize>),
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Fuzzing result
#[derive(Debug, Clone)]
pub struct FuzzResult {
    pub convergence: ConvergenceResult,
    pub ordering_violations: u32,
    pub duplicate_violations: u32,
    pub version_regressions: u32,
    pub operations_applied: u64,
    pub replays: u64,
    pub messages_delivered: u64,
    pub repaired_keys: usize,
    pub sync_rounds: usize,
}

impl FuzzResult {
    pub fn new() -> Self {
        FuzzResult {
            convergence: ConvergenceResult::Converged,
            ordering_violations: 0,
            duplicate_violations: 0,
            version_regressions: 0,
            operations_applied: 0,
            replays: 0,
            messages_delivered: 0,
            repaired_keys: 0,
            sync_rounds: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.convergence.is_converged()
            && self.ordering_violations == 0
            && self.duplicate_violations == 0
            && self.version_regressions == 0
    }

    fn check(&mut self, before: &[Element<u64>], after: &[Element<u64>]) {
        if !properties::is_ordered(after) {
            self.ordering_violations += 1;
        }
        if !properties::has_unique_ids(after) {
            self.duplicate_violations += 1;
        }
        if !properties::versions_monotonic(before, after) {
            self.version_regressions += 1;
        }
    }
}

impl Default for FuzzResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Property-based test helpers
pub mod properties {
    use super::*;
    use tessera_reconcile::reconcile_elements;

    /// Property: fractional indices are present and strictly increasing
    pub fn is_ordered<P>(elements: &[Element<P>]) -> bool {
        has_valid_fractional_indices(elements)
    }

    /// Property: no id appears twice
    pub fn has_unique_ids<P>(elements: &[Element<P>]) -> bool {
        let mut seen = HashSet::with_capacity(elements.len());
        elements.iter().all(|element| seen.insert(element.id()))
    }

    /// Property: no element lost or went back in version
    pub fn versions_monotonic<P>(before: &[Element<P>], after: &[Element<P>]) -> bool {
        let after: HashMap<&ElementId, u32> = after
            .iter()
            .map(|element| (element.id(), element.version()))
            .collect();

        before.iter().all(|element| {
            after
                .get(element.id())
                .is_some_and(|&version| version >= element.version())
        })
    }

    fn ids<P>(elements: &[Element<P>]) -> Vec<&ElementId> {
        elements.iter().map(Element::id).collect()
    }

    /// Property: merging in either direction yields the same ids in the same order
    pub fn reconcile_commutative<P: Clone>(local: &[Element<P>], remote: &[Element<P>]) -> bool {
        let editing = EditingState::new();
        let forward = reconcile_elements(local, remote, &editing);
        let backward = reconcile_elements(remote, local, &editing);
        ids(&forward) == ids(&backward)
    }

    /// Property: merging the remote batch again changes nothing
    pub fn reconcile_idempotent<P: Clone>(local: &[Element<P>], remote: &[Element<P>]) -> bool {
        let editing = EditingState::new();
        let once = reconcile_elements(local, remote, &editing);
        let twice = reconcile_elements(&once, remote, &editing);
        ids(&once) == ids(&twice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(id: &str, version: u32, nonce: u32, key: &str) -> Element<u64> {
        Element::from_parts(id, version, nonce, Some(OrderKey::parse(key).unwrap()), false, 0)
    }

    #[test]
    fn test_fuzzer_light() {
        let mut fuzzer = SyncFuzzer::new(FuzzerConfig::light());
        let result = fuzzer.run();

        println!("Light fuzz result: {:?}", result);
        assert!(result.is_valid());
        assert_eq!(result.operations_applied, 100);
        assert!(result.messages_delivered > 0);
        assert!(fuzzer
            .replicas()
            .iter()
            .all(|replica| replica.history().undo_len() <= 100));
    }

    #[test]
    fn test_fuzzer_default() {
        let mut fuzzer = SyncFuzzer::new(FuzzerConfig::default());
        let result = fuzzer.run();

        println!("Default fuzz result: {:?}", result);
        assert!(result.is_valid());
    }

    #[test]
    fn test_fuzzer_seeds() {
        for seed in 0..8 {
            let config = FuzzerConfig {
                seed,
                ..FuzzerConfig::light()
            };
            let result = SyncFuzzer::new(config).run();
            assert!(result.is_valid(), "seed {}: {:?}", seed, result);
        }
    }

    #[test]
    fn test_single_replica_converges_trivially() {
        let config = FuzzerConfig {
            replica_count: 1,
            ..FuzzerConfig::light()
        };
        let mut fuzzer = SyncFuzzer::new(config);
        let result = fuzzer.run();

        assert!(result.convergence.is_converged());
        assert_eq!(result.messages_delivered, 0);
        assert!(properties::has_unique_ids(&fuzzer.replicas()[0].elements));
    }

    #[test]
    fn test_concurrent_creates_are_repaired() {
        // Both replicas append after the same last key
        let local = vec![keyed("A", 1, 1, "a0"), keyed("B", 1, 1, "a1")];
        let remote = vec![keyed("A", 1, 1, "a0"), keyed("C", 1, 1, "a1")];

        assert!(properties::reconcile_commutative(&local, &remote));
        assert!(properties::reconcile_idempotent(&local, &remote));

        let merged = tessera_reconcile::reconcile_elements(&local, &remote, &EditingState::new());
        assert!(properties::is_ordered(&merged));
        assert!(properties::has_unique_ids(&merged));
        assert!(properties::versions_monotonic(&local, &merged));
    }

    #[test]
    fn test_version_regression_is_detected() {
        let before = vec![keyed("A", 3, 1, "a0")];
        let regressed = vec![keyed("A", 2, 1, "a0")];
        let lost: Vec<Element<u64>> = Vec::new();

        assert!(!properties::versions_monotonic(&before, &regressed));
        assert!(!properties::versions_monotonic(&before, &lost));
        assert!(!properties::has_unique_ids(&[
            keyed("A", 1, 1, "a0"),
            keyed("A", 1, 1, "a1")
        ]));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        const IDS: usize = 6;
        const VERSIONS: usize = 3;

        /// Two scenes drawn from one pool: each `(id, version)` has a single
        /// nonce, key and deletion flag, whichever side holds it
        fn arb_scenes() -> impl Strategy<Value = (Vec<Element<u64>>, Vec<Element<u64>>)> {
            let key = prop::option::of(prop::sample::select(vec!["Zz", "a0", "a1", "a1V", "a2", "b10"]));
            let pool = prop::collection::vec((any::<u32>(), key, any::<bool>()), IDS * VERSIONS);
            let picks = || prop::collection::vec((0..IDS, 0..VERSIONS), 0..8);

            (pool, picks(), picks()).prop_map(|(pool, local, remote)| {
                let build = |picks: Vec<(usize, usize)>| {
                    let mut seen = HashSet::new();
                    picks
                        .into_iter()
                        .filter(|(id, _)| seen.insert(*id))
                        .map(|(id, version)| {
                            let (nonce, key, deleted) = pool[id * VERSIONS + version];
                            let key = key.map(|key| OrderKey::parse(key).unwrap());
                            Element::from_parts(format!("{}", id), version as u32 + 1, nonce, key, deleted, 0)
                        })
                        .collect::<Vec<_>>()
                };
                (build(local), build(remote))
            })
        }

        proptest! {
            #[test]
            fn prop_reconcile_properties((local, remote) in arb_scenes()) {
                let merged = tessera_reconcile::reconcile_elements(&local, &remote, &EditingState::new());

                prop_assert!(properties::is_ordered(&merged));
                prop_assert!(properties::has_unique_ids(&merged));
                prop_assert!(properties::versions_monotonic(&local, &merged));
                prop_assert!(properties::reconcile_commutative(&local, &remote));
                prop_assert!(properties::reconcile_idempotent(&local, &remote));
            }

            #[test]
            fn prop_fuzzer_converges(seed in any::<u64>()) {
                let config = FuzzerConfig {
                    seed,
                    operation_count: 40,
                    ..FuzzerConfig::light()
                };
                let result = SyncFuzzer::new(config).run();
                prop_assert!(result.is_valid(), "{:?}", result);
            }
        }
    }
}
