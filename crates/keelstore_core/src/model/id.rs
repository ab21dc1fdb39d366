//! Time-ordered object identifiers.
//!
//! Layout, most significant bits first:
//!
//! | bits | content                          |
//! |------|----------------------------------|
//! | 48   | Unix epoch milliseconds          |
//! | 4    | version tag `0111`               |
//! | 12   | random                           |
//! | 2    | variant tag `10`                 |
//! | 62   | random                           |
//!
//! Numeric order of two ids follows creation order whenever their
//! milliseconds differ. The 74 random bits come from the OS CSPRNG.

use crate::clock::system_now_ms;
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

/// Stable identifier of every persistence-capable object.
///
/// The nil UUID means "not assigned yet".
pub type ObjectId = Uuid;

const TIMESTAMP_MASK: u128 = (1 << 48) - 1;
const VERSION_TAG: u128 = 0x7;
const VARIANT_TAG: u128 = 0b10;
const RAND_A_MASK: u128 = (1 << 12) - 1;
const RAND_B_MASK: u128 = (1 << 62) - 1;

/// Generates a new identifier stamped with the current wall-clock time.
pub fn generate() -> ObjectId {
    let millis = u64::try_from(system_now_ms()).unwrap_or(0);
    generate_at(millis)
}

/// Generates a new identifier stamped with `millis`.
///
/// Only the low 48 bits of `millis` are kept.
pub fn generate_at(millis: u64) -> ObjectId {
    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random[6..]);
    compose(millis, u128::from_be_bytes(random))
}

/// Returns the millisecond timestamp embedded in `id`.
pub fn embedded_millis(id: &ObjectId) -> u64 {
    (id.as_u128() >> 80) as u64
}

fn compose(millis: u64, random: u128) -> ObjectId {
    let rand_a = (random >> 62) & RAND_A_MASK;
    let rand_b = random & RAND_B_MASK;
    let value = ((u128::from(millis) & TIMESTAMP_MASK) << 80)
        | (VERSION_TAG << 76)
        | (rand_a << 64)
        | (VARIANT_TAG << 62)
        | rand_b;
    Uuid::from_u128(value)
}
