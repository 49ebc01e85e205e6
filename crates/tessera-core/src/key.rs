//! Fractional order keys
//!
//! An order key is a string in a dense, lexicographically ordered key space.
//! A new key can always be generated strictly between any two existing keys,
//! so inserting or moving an element never renumbers unrelated elements.
//!
//! # Key layout
//!
//! ```text
//!   a 3 V
//!   | | '-- fractional part (base-62, never ends with '0')
//!   '-'---- integer part: head letter + digits
//! ```
//!
//! The head letter encodes the length of the integer part: `a`..`z` stand
//! for 2..27 characters (positive integers), `A`..`Z` for 27..2 characters
//! (negative integers). Digits are base-62 (`0-9A-Za-z`), which sort the same
//! way as their ASCII bytes, so keys compare as plain strings.

use std::fmt;
use std::str::FromStr;

use crate::{MalformedKey, OrderKeyError};

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = DIGITS.len();
const ZERO: u8 = b'0';
const MAX_DIGIT: u8 = b'z';

/// Smallest integer ("A" followed by 26 zeros), reserved so that there is
/// always room below every valid key.
const SMALLEST_INTEGER_LEN: usize = 27;

/// A validated fractional order key
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey(String);

impl OrderKey {
    /// Parse and validate a raw key
    pub fn parse(raw: &str) -> Result<Self, OrderKeyError> {
        validate(raw.as_bytes())
            .map(|_| OrderKey(raw.to_owned()))
            .map_err(|reason| OrderKeyError::Malformed {
                key: raw.to_owned(),
                reason,
            })
    }

    /// The first key of an empty key space
    pub fn first() -> Self {
        OrderKey("a0".to_owned())
    }

    /// A key strictly greater than `lower` (or the first key).
    ///
    /// Unlike [`generate_key_between`], this can never fail.
    pub fn after(lower: Option<&OrderKey>) -> Self {
        match lower {
            None => OrderKey::first(),
            Some(lower) => {
                let (integer, fraction) = lower.split();
                match increment_integer(integer) {
                    Some(next) => OrderKey::from_bytes(next),
                    None => {
                        let mut key = integer.to_vec();
                        key.extend(midpoint(fraction, None));
                        OrderKey::from_bytes(key)
                    }
                }
            }
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the integer part, as encoded by the head letter
    pub fn integer_len(&self) -> usize {
        // Validated on construction
        integer_len(self.0.as_bytes()[0]).unwrap_or(2)
    }

    fn split(&self) -> (&[u8], &[u8]) {
        self.0.as_bytes().split_at(self.integer_len())
    }

    fn from_bytes(bytes: Vec<u8>) -> Self {
        debug_assert!(validate(&bytes).is_ok(), "generated an invalid key");
        OrderKey(bytes.into_iter().map(char::from).collect())
    }
}

impl FromStr for OrderKey {
    type Err = OrderKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderKey::parse(s)
    }
}

impl AsRef<str> for OrderKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a key strictly between `lower` and `upper`.
///
/// Either bound may be absent, meaning the start or the end of the key space.
pub fn generate_key_between(
    lower: Option<&OrderKey>,
    upper: Option<&OrderKey>,
) -> Result<OrderKey, OrderKeyError> {
    match (lower, upper) {
        (None, None) => Ok(OrderKey::first()),
        (Some(_), None) => Ok(OrderKey::after(lower)),
        (None, Some(upper)) => {
            let (integer, fraction) = upper.split();

            if is_smallest_integer(integer) {
                let mut key = integer.to_vec();
                key.extend(midpoint(b"", Some(fraction)));
                return Ok(OrderKey::from_bytes(key));
            }

            if !fraction.is_empty() {
                return Ok(OrderKey::from_bytes(integer.to_vec()));
            }

            let mut key = decrement_integer(integer).ok_or(OrderKeyError::Exhausted)?;
            if is_smallest_integer(&key) {
                key.extend(midpoint(b"", None));
            }
            Ok(OrderKey::from_bytes(key))
        }
        (Some(lower), Some(upper)) => {
            if lower >= upper {
                return Err(OrderKeyError::Unordered {
                    lower: lower.clone(),
                    upper: upper.clone(),
                });
            }

            let (lower_int, lower_frac) = lower.split();
            let (upper_int, upper_frac) = upper.split();

            if lower_int == upper_int {
                let mut key = lower_int.to_vec();
                key.extend(midpoint(lower_frac, Some(upper_frac)));
                return Ok(OrderKey::from_bytes(key));
            }

            let next = increment_integer(lower_int).ok_or(OrderKeyError::Exhausted)?;
            if next.as_slice() < upper.0.as_bytes() {
                return Ok(OrderKey::from_bytes(next));
            }

            let mut key = lower_int.to_vec();
            key.extend(midpoint(lower_frac, None));
            Ok(OrderKey::from_bytes(key))
        }
    }
}

/// Generate `n` ordered keys strictly between `lower` and `upper`.
///
/// Bounded ranges are split recursively around a midpoint so that the keys
/// stay short; open ranges are walked one key at a time.
pub fn generate_n_keys_between(
    lower: Option<&OrderKey>,
    upper: Option<&OrderKey>,
    n: usize,
) -> Result<Vec<OrderKey>, OrderKeyError> {
    match n {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![generate_key_between(lower, upper)?]),
        _ => {}
    }

    match (lower, upper) {
        (_, None) => {
            let mut keys = Vec::with_capacity(n);
            let mut current = generate_key_between(lower, None)?;
            for _ in 1..n {
                let next = generate_key_between(Some(&current), None)?;
                keys.push(std::mem::replace(&mut current, next));
            }
            keys.push(current);
            Ok(keys)
        }
        (None, Some(_)) => {
            let mut keys = Vec::with_capacity(n);
            let mut current = generate_key_between(None, upper)?;
            for _ in 1..n {
                let next = generate_key_between(None, Some(&current))?;
                keys.push(std::mem::replace(&mut current, next));
            }
            keys.push(current);
            keys.reverse();
            Ok(keys)
        }
        (Some(_), Some(_)) => {
            let mid = n / 2;
            let middle = generate_key_between(lower, upper)?;

            let mut keys = generate_n_keys_between(lower, Some(&middle), mid)?;
            let upper_half = generate_n_keys_between(Some(&middle), upper, n - mid - 1)?;
            keys.push(middle);
            keys.extend(upper_half);
            Ok(keys)
        }
    }
}

fn validate(key: &[u8]) -> Result<(), MalformedKey> {
    let head = *key.first().ok_or(MalformedKey::Empty)?;
    let len = integer_len(head).ok_or(MalformedKey::InvalidHead)?;

    if key.len() < len {
        return Err(MalformedKey::IntegerTooShort);
    }
    if key[1..].iter().any(|&c| digit_value(c).is_none()) {
        return Err(MalformedKey::InvalidDigit);
    }
    if is_smallest_integer(key) {
        return Err(MalformedKey::SmallestInteger);
    }
    if key.len() > len && key.last() == Some(&ZERO) {
        return Err(MalformedKey::TrailingZero);
    }

    Ok(())
}

fn integer_len(head: u8) -> Option<usize> {
    match head {
        b'a'..=b'z' => Some((head - b'a') as usize + 2),
        b'A'..=b'Z' => Some((b'Z' - head) as usize + 2),
        _ => None,
    }
}

fn is_smallest_integer(key: &[u8]) -> bool {
    key.len() == SMALLEST_INTEGER_LEN && key[0] == b'A' && key[1..].iter().all(|&c| c == ZERO)
}

#[inline]
fn digit_value(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'A'..=b'Z' => Some((c - b'A') as usize + 10),
        b'a'..=b'z' => Some((c - b'a') as usize + 36),
        _ => None,
    }
}

#[inline]
fn digit(c: u8) -> usize {
    digit_value(c).unwrap_or(0)
}

/// Midpoint between two fractional parts, `upper` absent meaning "1".
///
/// Neither input may end with a zero digit and `lower < upper` must hold.
fn midpoint(lower: &[u8], upper: Option<&[u8]>) -> Vec<u8> {
    if let Some(upper) = upper {
        // Strip the common prefix, padding lower with zeros
        let mut n = 0;
        while n < upper.len() && lower.get(n).copied().unwrap_or(ZERO) == upper[n] {
            n += 1;
        }
        if n > 0 {
            let mut key = upper[..n].to_vec();
            key.extend(midpoint(lower.get(n..).unwrap_or(&[]), Some(&upper[n..])));
            return key;
        }
    }

    let digit_lower = lower.first().map_or(0, |&c| digit(c));
    let digit_upper = upper.map_or(BASE, |u| u.first().map_or(BASE, |&c| digit(c)));

    if digit_upper - digit_lower > 1 {
        // Rounds half up
        let mid = (digit_lower + digit_upper + 1) / 2;
        return vec![DIGITS[mid]];
    }

    match upper {
        Some(upper) if upper.len() > 1 => upper[..1].to_vec(),
        _ => {
            let mut key = vec![DIGITS[digit_lower]];
            key.extend(midpoint(lower.get(1..).unwrap_or(&[]), None));
            key
        }
    }
}

fn increment_integer(integer: &[u8]) -> Option<Vec<u8>> {
    let head = integer[0];
    let mut digits = integer[1..].to_vec();

    let mut carry = true;
    for d in digits.iter_mut().rev() {
        let next = digit(*d) + 1;
        if next == BASE {
            *d = ZERO;
        } else {
            *d = DIGITS[next];
            carry = false;
            break;
        }
    }

    if !carry {
        let mut key = vec![head];
        key.extend(digits);
        return Some(key);
    }

    match head {
        b'Z' => Some(vec![b'a', ZERO]),
        b'z' => None,
        _ => {
            let next_head = head + 1;
            if next_head > b'a' {
                digits.push(ZERO);
            } else {
                digits.pop();
            }
            let mut key = vec![next_head];
            key.extend(digits);
            Some(key)
        }
    }
}

fn decrement_integer(integer: &[u8]) -> Option<Vec<u8>> {
    let head = integer[0];
    let mut digits = integer[1..].to_vec();

    let mut borrow = true;
    for d in digits.iter_mut().rev() {
        let value = digit(*d);
        if value == 0 {
            *d = MAX_DIGIT;
        } else {
            *d = DIGITS[value - 1];
            borrow = false;
            break;
        }
    }

    if !borrow {
        let mut key = vec![head];
        key.extend(digits);
        return Some(key);
    }

    match head {
        b'a' => Some(vec![b'Z', MAX_DIGIT]),
        b'A' => None,
        _ => {
            let next_head = head - 1;
            if next_head < b'Z' {
                digits.push(MAX_DIGIT);
            } else {
                digits.pop();
            }
            let mut key = vec![next_head];
            key.extend(digits);
            Some(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> OrderKey {
        OrderKey::parse(raw).unwrap()
    }

    fn between(lower: Option<&str>, upper: Option<&str>) -> String {
        let lower = lower.map(key);
        let upper = upper.map(key);
        generate_key_between(lower.as_ref(), upper.as_ref())
            .unwrap()
            .as_str()
            .to_owned()
    }

    #[test]
    fn test_generate_key_between() {
        assert_eq!(between(None, None), "a0");
        assert_eq!(between(None, Some("a0")), "Zz");
        assert_eq!(between(Some("a0"), None), "a1");
        assert_eq!(between(Some("a0"), Some("a1")), "a0V");
        assert_eq!(between(Some("a1"), Some("a2")), "a1V");
        assert_eq!(between(Some("a0V"), Some("a1")), "a0l");
        assert_eq!(between(Some("Zz"), Some("a0")), "ZzV");
        assert_eq!(between(Some("Zz"), Some("a1")), "a0");
        assert_eq!(between(None, Some("Y00")), "Xzzz");
        assert_eq!(between(Some("bzz"), None), "c000");
        assert_eq!(between(Some("a0"), Some("a0V")), "a0G");
        assert_eq!(between(Some("a0"), Some("a0G")), "a08");
        assert_eq!(between(Some("b125"), Some("b129")), "b127");
        assert_eq!(between(Some("a0"), Some("a1V")), "a1");
        assert_eq!(between(Some("Zz"), Some("a01")), "a0");
        assert_eq!(between(None, Some("a0V")), "a0");
        assert_eq!(between(None, Some("b999")), "b99");

        let largest = format!("z{}", "z".repeat(26));
        assert_eq!(between(Some(&largest), None), format!("{}V", largest));

        let above_smallest = format!("A{}1", "0".repeat(25));
        assert_eq!(between(None, Some(&above_smallest)), format!("A{}V", "0".repeat(26)));
    }

    #[test]
    fn test_generate_key_between_rejects_unordered() {
        let a = key("a1");
        let b = key("a0");

        assert!(matches!(
            generate_key_between(Some(&a), Some(&b)),
            Err(OrderKeyError::Unordered { .. })
        ));
        assert!(generate_key_between(Some(&a), Some(&a)).is_err());
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        let reason = |raw: &str| match OrderKey::parse(raw) {
            Err(OrderKeyError::Malformed { reason, .. }) => reason,
            other => panic!("expected malformed key, got {:?}", other),
        };

        assert_eq!(reason(""), MalformedKey::Empty);
        assert_eq!(reason("0a"), MalformedKey::InvalidHead);
        assert_eq!(reason("b1"), MalformedKey::IntegerTooShort);
        assert_eq!(reason("a0-"), MalformedKey::InvalidDigit);
        assert_eq!(reason("a10"), MalformedKey::TrailingZero);
        assert_eq!(reason("A00000000000000000000000000"), MalformedKey::SmallestInteger);

        assert!(OrderKey::parse("a0").is_ok());
        assert!(OrderKey::parse("b00").is_ok());
        assert!(OrderKey::parse("Zz").is_ok());
    }

    #[test]
    fn test_generate_n_keys_between() {
        let keys = generate_n_keys_between(None, None, 5).unwrap();
        let raw: Vec<&str> = keys.iter().map(OrderKey::as_str).collect();
        assert_eq!(raw, ["a0", "a1", "a2", "a3", "a4"]);

        let upper = key("a0");
        let keys = generate_n_keys_between(None, Some(&upper), 3).unwrap();
        let raw: Vec<&str> = keys.iter().map(OrderKey::as_str).collect();
        assert_eq!(raw, ["Zx", "Zy", "Zz"]);

        let lower = key("a0");
        let upper = key("a1");
        let keys = generate_n_keys_between(Some(&lower), Some(&upper), 10).unwrap();
        assert_eq!(keys.len(), 10);
        assert!(keys.first().unwrap() > &lower);
        assert!(keys.last().unwrap() < &upper);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_repeated_subdivision_never_exhausts() {
        let lower = key("a0");
        let mut upper = key("a1");

        for _ in 0..500 {
            let next = generate_key_between(Some(&lower), Some(&upper)).unwrap();
            assert!(lower < next && next < upper);
            upper = next;
        }
    }

    #[test]
    fn test_after_crosses_integer_boundaries() {
        let mut current = OrderKey::after(None);
        for _ in 0..200 {
            let next = OrderKey::after(Some(&current));
            assert!(next > current);
            current = next;
        }
        assert_eq!(current.integer_len(), 3);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_key() -> impl Strategy<Value = OrderKey> {
            proptest::collection::vec(any::<bool>(), 0..24).prop_map(|steps| {
                // Random walk through the key space from the first key
                let mut lower: Option<OrderKey> = None;
                let mut upper: Option<OrderKey> = None;
                let mut current = OrderKey::first();
                for go_up in steps {
                    if go_up {
                        lower = Some(current.clone());
                    } else {
                        upper = Some(current.clone());
                    }
                    current = generate_key_between(lower.as_ref(), upper.as_ref()).unwrap();
                }
                current
            })
        }

        proptest! {
            #[test]
            fn prop_key_between_is_strictly_between(a in arb_key(), b in arb_key()) {
                prop_assume!(a != b);
                let (lower, upper) = if a < b { (a, b) } else { (b, a) };

                let mid = generate_key_between(Some(&lower), Some(&upper)).unwrap();
                prop_assert!(lower < mid);
                prop_assert!(mid < upper);
                prop_assert!(OrderKey::parse(mid.as_str()).is_ok());
            }

            #[test]
            fn prop_open_bounds(a in arb_key()) {
                let before = generate_key_between(None, Some(&a)).unwrap();
                let after = generate_key_between(Some(&a), None).unwrap();
                prop_assert!(before < a);
                prop_assert!(a < after);
            }
        }
    }
}
