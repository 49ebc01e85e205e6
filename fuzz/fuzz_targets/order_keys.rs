#![no_main]

use libfuzzer_sys::fuzz_target;

use tessera_core::{generate_key_between, generate_n_keys_between, OrderKey};

fuzz_target!(|input: (&str, &str, u8)| {
    let (lower, upper, count) = input;
    let lower = OrderKey::parse(lower).ok();
    let upper = OrderKey::parse(upper).ok();

    if let Ok(key) = generate_key_between(lower.as_ref(), upper.as_ref()) {
        assert!(lower.as_ref().map_or(true, |lower| *lower < key));
        assert!(upper.as_ref().map_or(true, |upper| key < *upper));
        assert_eq!(OrderKey::parse(key.as_str()).ok(), Some(key));
    }

    if let Ok(keys) = generate_n_keys_between(lower.as_ref(), upper.as_ref(), count as usize) {
        assert_eq!(keys.len(), count as usize);
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }
});
