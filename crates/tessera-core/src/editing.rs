//! Local editing state
//!
//! Interactive gestures (typing, resizing, creating, dragging) are not
//! cancelled when remote data arrives. Instead the reconciler consults this
//! state and never overwrites an element that is under the user's pointer.

use std::collections::BTreeSet;

use crate::ElementId;

/// Elements targeted by in-progress local interactive operations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditingState {
    /// Text element currently being edited
    pub editing_text: Option<ElementId>,
    /// Element currently being resized
    pub resizing: Option<ElementId>,
    /// Element currently being created
    pub new_element: Option<ElementId>,
    /// Elements currently being dragged
    pub dragging: BTreeSet<ElementId>,
}

impl EditingState {
    pub fn new() -> Self {
        EditingState::default()
    }

    pub fn with_editing_text(mut self, id: impl Into<ElementId>) -> Self {
        self.editing_text = Some(id.into());
        self
    }

    pub fn with_resizing(mut self, id: impl Into<ElementId>) -> Self {
        self.resizing = Some(id.into());
        self
    }

    pub fn with_new_element(mut self, id: impl Into<ElementId>) -> Self {
        self.new_element = Some(id.into());
        self
    }

    pub fn with_dragging<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ElementId>,
    {
        self.dragging.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Check if an element is the target of an in-progress gesture
    pub fn is_editing(&self, id: &ElementId) -> bool {
        self.editing_text.as_ref() == Some(id)
            || self.resizing.as_ref() == Some(id)
            || self.new_element.as_ref() == Some(id)
            || self.dragging.contains(id)
    }

    /// Check if no gesture is in progress
    pub fn is_idle(&self) -> bool {
        self.editing_text.is_none()
            && self.resizing.is_none()
            && self.new_element.is_none()
            && self.dragging.is_empty()
    }
}
