//! Element reconciliation
//!
//! Merges a local sequence with a remote batch. Per element, the higher
//! version wins; on equal versions the lower nonce is kept locally. Elements
//! under an in-progress local gesture are never overwritten. The merged
//! sequence is then ordered by fractional index and its keys repaired, so
//! both replicas end up with the same order.
//!
//! Elements without a key are placed after the closest keyed element that
//! precedes them in their input sequence. Both inputs are consulted, so
//! the placement does not depend on which side is local.

use std::collections::{HashMap, HashSet};

use tessera_core::{EditingState, Element, ElementId, OrderKey};
use tessera_order::restore_fractional_indices;
use tracing::{debug, warn};

/// Reconciler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Log local and remote context when the merged order needed repair
    pub report_invalid_indices: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            report_invalid_indices: false,
        }
    }
}

impl ReconcileConfig {
    /// Report every repair of the merged order
    pub fn verbose() -> Self {
        ReconcileConfig {
            report_invalid_indices: true,
        }
    }
}

/// Counters for one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Remote elements shadowed by a local one
    pub kept_local: usize,
    /// Remote elements that replaced or added to local state
    pub taken_remote: usize,
    /// Local elements the remote batch did not mention
    pub local_only: usize,
    /// Fractional indices rewritten after merging
    pub repaired_keys: usize,
}

/// Result of a reconciliation
#[derive(Debug, Clone)]
pub struct Reconciliation<P> {
    /// Merged, ordered sequence with valid fractional indices
    pub elements: Vec<Element<P>>,
    pub stats: ReconcileStats,
}

/// Reconciliation engine
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Reconciler { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Merge `remote` into `local`
    pub fn reconcile<P: Clone>(
        &self,
        local: &[Element<P>],
        remote: &[Element<P>],
        editing: &EditingState,
    ) -> Reconciliation<P> {
        let (merged, mut stats) = merge(local, remote, editing);

        let mut elements = order_merged(merged, local, remote);
        stats.repaired_keys = restore_fractional_indices(&mut elements);

        if stats.repaired_keys > 0 && self.config.report_invalid_indices {
            warn!(
                repaired = stats.repaired_keys,
                local = %describe(local),
                remote = %describe(remote),
                "Reconciled elements needed fractional index repair"
            );
        }

        debug!(
            kept_local = stats.kept_local,
            taken_remote = stats.taken_remote,
            local_only = stats.local_only,
            repaired = stats.repaired_keys,
            "Reconciled elements"
        );

        Reconciliation { elements, stats }
    }
}

/// Merge `remote` into `local` with the default configuration.
///
/// Deterministic and total: the same inputs always give the same output.
/// Swapping `local` and `remote` yields the same ids in the same order as
/// long as both sides agree on what each `(id, version)` is, i.e. equal
/// versions carry equal nonces and content. Two different elements under
/// one version and nonce are taken from whichever side is remote.
pub fn reconcile_elements<P: Clone>(
    local: &[Element<P>],
    remote: &[Element<P>],
    editing: &EditingState,
) -> Vec<Element<P>> {
    Reconciler::default()
        .reconcile(local, remote, editing)
        .elements
}

/// Check if the local copy should shadow the remote one
pub fn should_keep_local<P>(
    local: &Element<P>,
    remote: &Element<P>,
    editing: &EditingState,
) -> bool {
    editing.is_editing(local.id())
        || local.version() > remote.version()
        || (local.version() == remote.version()
            && local.version_nonce() < remote.version_nonce())
}

fn merge<P: Clone>(
    local: &[Element<P>],
    remote: &[Element<P>],
    editing: &EditingState,
) -> (Vec<Element<P>>, ReconcileStats) {
    let local_by_id: HashMap<&ElementId, &Element<P>> =
        local.iter().map(|element| (element.id(), element)).collect();

    let mut stats = ReconcileStats::default();
    let mut placed: HashSet<&ElementId> = HashSet::with_capacity(local.len() + remote.len());
    let mut merged = Vec::with_capacity(local.len() + remote.len());

    for remote_element in remote {
        if !placed.insert(remote_element.id()) {
            continue;
        }

        match local_by_id.get(remote_element.id()) {
            Some(&local_element) if should_keep_local(local_element, remote_element, editing) => {
                merged.push(local_element.clone());
                stats.kept_local += 1;
            }
            _ => {
                merged.push(remote_element.clone());
                stats.taken_remote += 1;
            }
        }
    }

    for local_element in local {
        if placed.insert(local_element.id()) {
            merged.push(local_element.clone());
            stats.local_only += 1;
        }
    }

    (merged, stats)
}

/// Position of an unkeyed element: the key of the closest keyed element
/// before it and the distance from that element
type Anchor<'a> = (Option<&'a OrderKey>, usize);

/// Anchors of the unkeyed elements of both inputs. An element unkeyed on
/// both sides takes the later of its two anchors.
fn unkeyed_anchors<'a, P>(sides: [&'a [Element<P>]; 2]) -> HashMap<&'a ElementId, Anchor<'a>> {
    let mut anchors: HashMap<&ElementId, Anchor> = HashMap::new();

    for side in sides {
        let mut anchor: Anchor = (None, 0);
        for element in side {
            match element.index() {
                Some(key) => anchor = (Some(key), 0),
                None => {
                    anchor.1 += 1;
                    let slot = anchors.entry(element.id()).or_insert(anchor);
                    *slot = (*slot).max(anchor);
                }
            }
        }
    }

    anchors
}

/// Order merged elements by key, ties broken by id. Keyed elements sort
/// before the unkeyed elements anchored on them.
fn order_merged<P>(
    mut merged: Vec<Element<P>>,
    local: &[Element<P>],
    remote: &[Element<P>],
) -> Vec<Element<P>> {
    let anchors = unkeyed_anchors([local, remote]);

    merged.sort_by(|a, b| {
        position(a, &anchors)
            .cmp(&position(b, &anchors))
            .then_with(|| a.id().cmp(b.id()))
    });
    merged
}

fn position<'a, P>(
    element: &'a Element<P>,
    anchors: &'a HashMap<&'a ElementId, Anchor<'a>>,
) -> Anchor<'a> {
    match element.index() {
        Some(key) => (Some(key), 0),
        None => anchors
            .get(element.id())
            .copied()
            .unwrap_or((None, usize::MAX)),
    }
}

fn describe<P>(elements: &[Element<P>]) -> String {
    elements
        .iter()
        .map(|element| element.key_context().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
