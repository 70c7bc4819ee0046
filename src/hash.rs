//! Canonical `HandState` hashing for desync detection (§3 `stateHash`,
//! §8 "state -> hash -> state" law).

use sha2::{Digest, Sha256};

use crate::rules::HandState;

/// Hex-encoded SHA-256 over a deterministic `bincode` encoding of the
/// state. `HandState`'s field order is fixed by its struct definition,
/// so `bincode` already gives us a canonical byte representation;
/// equal states hash equal, and in practice unequal states hash unequal.
pub fn state_hash(state: &HandState) -> String {
    let bytes = bincode::serialize(state).expect("HandState is always serializable");
    let digest = Sha256::digest(&bytes);
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::deal;

    #[test]
    fn equal_states_hash_equal() {
        let a = deal(3, 10, [5u8; 32]);
        let b = deal(3, 10, [5u8; 32]);
        assert_eq!(state_hash(&a), state_hash(&b));
    }

    #[test]
    fn unequal_states_hash_unequal() {
        let a = deal(3, 10, [5u8; 32]);
        let b = deal(3, 10, [6u8; 32]);
        assert_ne!(state_hash(&a), state_hash(&b));
    }
}
