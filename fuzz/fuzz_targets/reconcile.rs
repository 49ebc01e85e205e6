#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use tessera_core::{EditingState, Element, OrderKey};
use tessera_order::has_valid_fractional_indices;
use tessera_reconcile::reconcile_elements;

#[derive(Arbitrary, Debug)]
struct FuzzElement {
    id: u8,
    version: u32,
    version_nonce: u32,
    index: Option<String>,
    is_deleted: bool,
}

impl FuzzElement {
    fn build(&self) -> Element<()> {
        let index = self.index.as_deref().and_then(|raw| OrderKey::parse(raw).ok());
        Element::from_parts(
            self.id.to_string(),
            self.version,
            self.version_nonce,
            index,
            self.is_deleted,
            (),
        )
    }
}

fuzz_target!(|input: (Vec<FuzzElement>, Vec<FuzzElement>, Option<u8>)| {
    let (local, remote, editing) = input;
    let local: Vec<Element<()>> = local.iter().map(FuzzElement::build).collect();
    let remote: Vec<Element<()>> = remote.iter().map(FuzzElement::build).collect();
    let editing = match editing {
        Some(id) => EditingState::new().with_editing_text(id.to_string()),
        None => EditingState::new(),
    };

    let merged = reconcile_elements(&local, &remote, &editing);
    assert!(has_valid_fractional_indices(&merged));
});
