//! Property-based tests for tagflasher-core using proptest
//!
//! These tests verify invariants that should hold for all valid inputs.

use std::collections::HashSet;

use proptest::prelude::*;
use tagflasher_core::keys::{derive, hashed_advertisement_key, KeySchedule, Keyfile, Seed, KEY_LEN};
use tagflasher_core::patch::{locate_placeholder, patch, SEED_MARKER};

// ============================================
// Key schedule
// ============================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn derive_is_deterministic(seed in any::<[u8; 32]>(), counter in any::<u32>()) {
        let first = derive(&seed, counter);
        let second = derive(&seed, counter);
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "derive disagreed with itself"),
        }
    }

    #[test]
    fn public_keys_are_distinct(seed in any::<[u8; 32]>()) {
        let schedule = KeySchedule::new(Seed::new(seed), 900);
        let entries = schedule.entries(0, 100).unwrap();
        let unique: HashSet<[u8; KEY_LEN]> = entries.iter().map(|e| e.public_x).collect();
        prop_assert_eq!(unique.len(), 100);
    }

    #[test]
    fn entries_hash_their_public_key(seed in any::<[u8; 32]>(), start in 0u32..10_000) {
        let schedule = KeySchedule::new(Seed::new(seed), 900);
        for entry in schedule.entries(start, 3).unwrap() {
            prop_assert_eq!(entry.hashed_adv_key, hashed_advertisement_key(&entry.public_x));
        }
    }
}

// ============================================
// Patching
// ============================================

proptest! {
    #[test]
    fn marker_found_at_injected_offset(
        prefix in prop::collection::vec(0u8..0x40, 0..512),
        suffix in prop::collection::vec(any::<u8>(), 0..64),
        secret in any::<[u8; 32]>(),
    ) {
        let mut image = prefix.clone();
        image.extend_from_slice(SEED_MARKER);
        image.extend_from_slice(&suffix);

        let offset = locate_placeholder(&image, SEED_MARKER).unwrap();
        prop_assert_eq!(offset, prefix.len());

        patch(&mut image, offset, &secret).unwrap();
        prop_assert_eq!(&image[offset..offset + 32], &secret[..]);
        prop_assert_eq!(image.len(), prefix.len() + 32 + suffix.len());
    }

    #[test]
    fn keyfile_bytes_parse_back(keys in prop::collection::vec(any::<[u8; KEY_LEN]>(), 0..20)) {
        let keyfile = Keyfile::new(keys.clone()).unwrap();
        let bytes = keyfile.to_bytes();
        prop_assert_eq!(bytes[0] as usize, keys.len());
        let parsed = Keyfile::parse(&bytes).unwrap();
        prop_assert_eq!(parsed.public_keys(), keys.as_slice());
    }
}
