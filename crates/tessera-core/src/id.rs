//! Identity types for Tessera
//!
//! Element ids are assigned once at creation by the editing layer and are
//! never reused, even after the element is soft-deleted.

use std::borrow::Borrow;
use std::fmt;

/// Element identity - globally unique across all replicas
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ElementId(String);

impl ElementId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        ElementId(id.into())
    }

    /// Generate a random id (21 chars from the url-safe alphabet)
    pub fn random() -> Self {
        use rand::Rng;

        const ALPHABET: &[u8] =
            b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";
        let mut rng = rand::thread_rng();
        let id = (0..21)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect();
        ElementId(id)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ElementId {
    fn from(id: &str) -> Self {
        ElementId::new(id)
    }
}

impl From<String> for ElementId {
    fn from(id: String) -> Self {
        ElementId(id)
    }
}

impl Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
