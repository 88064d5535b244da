//! Versioned key helpers.
//!
//! A full key is the caller's user key followed by a fixed-width version
//! suffix. The suffix stores `u64::MAX - version` big-endian, so that at
//! equal user keys the *newest* version sorts first. All ordering in the
//! level and iterator code goes through [`compare_keys`].

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder};

/// Width of the version suffix in bytes.
pub const VERSION_SIZE: usize = 8;

/// Appends the version suffix to a user key, producing a full key.
pub fn key_with_version(user_key: &[u8], version: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + VERSION_SIZE);
    out.extend_from_slice(user_key);
    let mut suffix = [0u8; VERSION_SIZE];
    BigEndian::write_u64(&mut suffix, u64::MAX - version);
    out.extend_from_slice(&suffix);
    out
}

/// Strips the version suffix, returning the user key.
pub fn parse_user_key(key: &[u8]) -> &[u8] {
    debug_assert!(key.len() >= VERSION_SIZE, "key too short for a version suffix");
    &key[..key.len() - VERSION_SIZE]
}

/// Extracts the version embedded in a full key. Keys without a suffix
/// yield version 0.
pub fn parse_version(key: &[u8]) -> u64 {
    if key.len() < VERSION_SIZE {
        return 0;
    }
    u64::MAX - BigEndian::read_u64(&key[key.len() - VERSION_SIZE..])
}

/// Compares two full keys: user key ascending, then version descending.
///
/// The version suffix is compared as raw bytes; because it stores the
/// inverted version, byte order gives newest-first at equal user keys.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    debug_assert!(a.len() >= VERSION_SIZE && b.len() >= VERSION_SIZE);
    let (a_user, a_suffix) = a.split_at(a.len() - VERSION_SIZE);
    let (b_user, b_suffix) = b.split_at(b.len() - VERSION_SIZE);
    a_user.cmp(b_user).then_with(|| a_suffix.cmp(b_suffix))
}

/// Returns true if both full keys share the same user key, ignoring the
/// version suffix.
pub fn same_user_key(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    parse_user_key(a) == parse_user_key(b)
}

/// Hash of a user key, as fed to table bloom filters.
pub fn hash(user_key: &[u8]) -> u32 {
    farmhash::fingerprint32(user_key)
}
