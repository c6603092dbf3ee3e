//! The two-sided hash chain ("wind" construction).
//!
//! A [`ChainCompressor`] is a keyed one-step compression function
//! `H(section, state) -> state'`. [`wind`] repeatedly applies it, driven by
//! the bit pattern of a target timestamp, to derive the chain state at any
//! position reachable from a root. The chain is generic over the
//! compressor so a deployment can swap BLAKE3 for another PRF without
//! touching callers (see design note in §9).

/// Topmost section index the wind function iterates. `target` is 64 bits
/// wide, so bit 64 is always clear and the final iteration is a no-op; it
/// is kept so implementations match the reference test vectors exactly.
pub const TOP_SECTION: u8 = 64;

pub trait ChainCompressor {
    /// One compression step: `H(section, state) -> state'`.
    fn compress(state: u128, section: u8) -> u128;
}

/// BLAKE3-keyed compression: `state' = BLAKE3_keyed(key = section, msg = state)[..16]`.
///
/// The section byte is the only domain separator between bit positions, so
/// each 32-byte BLAKE3 key is the single `section` byte left-padded with
/// zeros to the keyed-hash key size.
pub struct Blake3Compressor;

impl ChainCompressor for Blake3Compressor {
    fn compress(state: u128, section: u8) -> u128 {
        let mut key = [0u8; 32];
        key[0] = section;

        let digest = blake3::keyed_hash(&key, &state.to_be_bytes());
        let bytes = digest.as_bytes();

        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes[..16]);
        u128::from_be_bytes(out)
    }
}

/// Apply the chain from `root` to the position named by `target`.
///
/// `wind(root, 0) == root`. For `a | b == t` with `b`'s lowest set bit
/// strictly above `a`'s highest set bit, `wind(wind(root, a), b) == wind(root, t)`
/// — this identity is what lets the planner (§4.3) and the decoder's chain
/// extension (§4.8) resume from a cached intermediate instead of the root.
pub fn wind<C: ChainCompressor>(root: u128, target: u64) -> u128 {
    let mut state = root;
    for section in (0..=TOP_SECTION).rev() {
        if section < 64 && (target >> section) & 1 == 1 {
            state = C::compress(state, section);
        }
    }
    state
}

/// Extend a cached state at `from` forward to `to` using only the sections
/// where `to` sets a bit `from` doesn't, i.e. `to > from` and no bit below
/// `from`'s highest set bit changes. Callers (the planner's invariant,
/// §4.3) are responsible for picking an anchor for which that holds.
pub fn extend<C: ChainCompressor>(state_at_from: u128, from: u64, to: u64) -> u128 {
    let mut state = state_at_from;
    for section in (0..64).rev() {
        let bit = 1u64 << section;
        if to & bit != 0 && from & bit == 0 {
            state = C::compress(state, section);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wind_zero_is_identity() {
        assert_eq!(wind::<Blake3Compressor>(0, 0), 0);
        assert_eq!(wind::<Blake3Compressor>(0x1234_5678, 0), 0x1234_5678);
    }

    #[test]
    fn wind_is_deterministic() {
        let a = wind::<Blake3Compressor>(7, 12345);
        let b = wind::<Blake3Compressor>(7, 12345);
        assert_eq!(a, b);
    }

    #[test]
    fn wind_differs_by_section() {
        let a = wind::<Blake3Compressor>(7, 1);
        let b = wind::<Blake3Compressor>(7, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn chain_identity_holds_for_disjoint_high_low_split() {
        // a covers the low 8 bits, b sets only a bit above that — the
        // "complete a, then extend b" identity from §4.2.
        let root = 0xdead_beef_cafe_babeu128;
        let a: u64 = 0b1111_1111; // highest set bit = 7
        let b: u64 = 1 << 10; // lowest set bit = 10, strictly above 7
        let combined = a | b;

        let via_split = extend::<Blake3Compressor>(wind::<Blake3Compressor>(root, a), a, combined);
        let direct = wind::<Blake3Compressor>(root, combined);

        assert_eq!(via_split, direct);
    }
}
