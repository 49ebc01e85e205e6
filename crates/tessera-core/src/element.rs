//! Versioned elements
//!
//! An element is the unit of ordering and reconciliation. The core only
//! cares about identity, versioning, order and soft deletion; everything
//! drawing-specific lives in the opaque payload `P`.
//!
//! Fields are private: the only way to change an element is through
//! [`Element::update`] or [`Element::mutate`], which always bump the version
//! and re-randomize the nonce.

use indexmap::IndexMap;
use rand::Rng;

use crate::{ElementId, KeyContext, OrderKey};

/// Version assigned to freshly created elements
pub const INITIAL_VERSION: u32 = 1;

/// Elements keyed by id, preserving array (stacking) order
pub type ElementsMap<P> = IndexMap<ElementId, Element<P>>;

/// A versioned, ordered, soft-deletable element
#[derive(Clone, Debug, PartialEq)]
pub struct Element<P> {
    id: ElementId,
    version: u32,
    version_nonce: u32,
    index: Option<OrderKey>,
    is_deleted: bool,
    payload: P,
}

/// A set of changes applied through [`Element::update`]
#[derive(Clone, Debug, PartialEq)]
pub struct ElementUpdate<P> {
    pub index: Option<Option<OrderKey>>,
    pub is_deleted: Option<bool>,
    pub payload: Option<P>,
}

impl<P> Default for ElementUpdate<P> {
    fn default() -> Self {
        ElementUpdate {
            index: None,
            is_deleted: None,
            payload: None,
        }
    }
}

impl<P> ElementUpdate<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, index: OrderKey) -> Self {
        self.index = Some(Some(index));
        self
    }

    pub fn clear_index(mut self) -> Self {
        self.index = Some(None);
        self
    }

    pub fn deleted(mut self, is_deleted: bool) -> Self {
        self.is_deleted = Some(is_deleted);
        self
    }

    pub fn payload(mut self, payload: P) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_none() && self.is_deleted.is_none() && self.payload.is_none()
    }
}

impl<P> Element<P> {
    /// Create a new, not yet ordered element
    pub fn new(id: impl Into<ElementId>, payload: P) -> Self {
        Element {
            id: id.into(),
            version: INITIAL_VERSION,
            version_nonce: random_nonce(),
            index: None,
            is_deleted: false,
            payload,
        }
    }

    /// Rebuild an element verbatim, e.g. one received from a remote replica.
    ///
    /// No version bookkeeping happens here: the values are taken as authored.
    pub fn from_parts(
        id: impl Into<ElementId>,
        version: u32,
        version_nonce: u32,
        index: Option<OrderKey>,
        is_deleted: bool,
        payload: P,
    ) -> Self {
        Element {
            id: id.into(),
            version,
            version_nonce,
            index,
            is_deleted,
            payload,
        }
    }

    #[inline]
    pub fn id(&self) -> &ElementId {
        &self.id
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn version_nonce(&self) -> u32 {
        self.version_nonce
    }

    #[inline]
    pub fn index(&self) -> Option<&OrderKey> {
        self.index.as_ref()
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    #[inline]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Apply an update in place, bumping version and nonce.
    ///
    /// The bump happens even for an empty update: callers use it to force a
    /// new version (e.g. when replaying history).
    pub fn update(&mut self, update: ElementUpdate<P>) {
        if let Some(index) = update.index {
            self.index = index;
        }
        if let Some(is_deleted) = update.is_deleted {
            self.is_deleted = is_deleted;
        }
        if let Some(payload) = update.payload {
            self.payload = payload;
        }
        self.bump_version();
    }

    /// Soft-delete the element
    pub fn delete(&mut self) {
        self.update(ElementUpdate::new().deleted(true));
    }

    /// Context used when reporting ordering violations
    pub fn key_context(&self) -> KeyContext {
        KeyContext {
            id: self.id.clone(),
            index: self.index.clone(),
            version: self.version,
            is_deleted: self.is_deleted,
        }
    }

    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.version_nonce = random_nonce();
    }
}

impl<P: Clone> Element<P> {
    /// Produce a new element with the update applied, leaving `self` intact
    pub fn mutate(&self, update: ElementUpdate<P>) -> Self {
        let mut next = self.clone();
        next.update(update);
        next
    }
}

/// Collect a sequence into an order-preserving map
pub fn to_elements_map<P: Clone>(elements: &[Element<P>]) -> ElementsMap<P> {
    elements
        .iter()
        .map(|element| (element.id().clone(), element.clone()))
        .collect()
}

/// Random nonce in `0..2^31`
pub fn random_nonce() -> u32 {
    rand::thread_rng().gen_range(0..(1u32 << 31))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_element() {
        let element = Element::new("A", ());

        assert_eq!(element.id().as_str(), "A");
        assert_eq!(element.version(), INITIAL_VERSION);
        assert!(element.index().is_none());
        assert!(!element.is_deleted());
    }

    #[test]
    fn test_update_bumps_version() {
        let mut element = Element::from_parts("A", 3, 7, None, false, 1u32);

        element.update(ElementUpdate::new().payload(2));
        assert_eq!(element.version(), 4);
        assert_eq!(*element.payload(), 2);

        element.delete();
        assert_eq!(element.version(), 5);
        assert!(element.is_deleted());
    }

    #[test]
    fn test_empty_update_still_bumps() {
        let mut element = Element::from_parts("A", 1, 7, None, false, ());
        element.update(ElementUpdate::new());
        assert_eq!(element.version(), 2);
    }

    #[test]
    fn test_mutate_leaves_original() {
        let key = OrderKey::parse("a0").unwrap();
        let element = Element::from_parts("A", 1, 1, None, false, "x");
        let moved = element.mutate(ElementUpdate::new().index(key.clone()));

        assert!(element.index().is_none());
        assert_eq!(moved.index(), Some(&key));
        assert_eq!(moved.version(), 2);
    }

    #[test]
    fn test_to_elements_map_keeps_order() {
        let elements = vec![
            Element::new("C", ()),
            Element::new("A", ()),
            Element::new("B", ()),
        ];
        let map = to_elements_map(&elements);
        let ids: Vec<&str> = map.keys().map(ElementId::as_str).collect();
        assert_eq!(ids, ["C", "A", "B"]);
    }
}
