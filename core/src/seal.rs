//! Deterministic key expansion (C8) and the AES-OFB sealing built on it.
//!
//! The expander is **not** a cryptographic PRNG — it exists purely so the
//! issuer and a decoder can independently arrive at the same 32-byte
//! sealing key from `(SystemSecret, decoder_id, channel)` without a round
//! trip. Compatibility with the original tooling requires bit-exact
//! reproduction of CPython's `random.Random(seed).randbytes(32)`, which is
//! an MT19937 stream seeded via `init_by_array` from the seed integer's
//! little-endian 32-bit words. Isolated behind [`DeterministicSeedExpander`]
//! per §9 so a future deployment can swap in a real KDF without
//! touching call sites.

use aes::Aes128;
use cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use rand_core::RngCore;
use rand_mt::Mt19937GenRand32;

/// A 32-byte key expanded from a 128-bit seed: the AES-128 key (`k0`) and
/// IV (`k1`) used to seal intermediates for one `(decoder, channel)` pair.
#[derive(Clone, Copy)]
pub struct SealingKey(pub [u8; 32]);

impl SealingKey {
    pub fn aes_key(&self) -> [u8; 16] {
        self.0[..16].try_into().unwrap()
    }

    pub fn iv(&self) -> [u8; 16] {
        self.0[16..].try_into().unwrap()
    }
}

pub trait DeterministicSeedExpander {
    /// Expand a 128-bit seed into 32 bytes of deterministic keystream.
    fn expand(seed: u128) -> [u8; 32];
}

/// CPython `random.Random(seed).randbytes(32)`-compatible expander.
///
/// CPython seeds MT19937 via `init_by_array` with the seed integer split
/// into little-endian 32-bit words (lowest word first), then
/// `randbytes(32)` is eight `genrand_uint32()` draws concatenated as
/// 4-byte little-endian words (CPython's `getrandbits` places the first
/// draw in the least-significant word, and `to_bytes(..., 'little')`
/// preserves that order byte-for-byte).
pub struct Mt19937Expander;

impl DeterministicSeedExpander for Mt19937Expander {
    fn expand(seed: u128) -> [u8; 32] {
        let key = seed_to_key_array(seed);
        let mut rng = Mt19937GenRand32::new_with_key(key);

        let mut out = [0u8; 32];
        for chunk in out.chunks_exact_mut(4) {
            chunk.copy_from_slice(&rng.next_u32().to_le_bytes());
        }
        out
    }
}

/// Split a nonnegative integer into little-endian 32-bit words, dropping
/// trailing zero words except when the value is zero itself (matches
/// CPython's `random.seed(int)` key derivation).
fn seed_to_key_array(seed: u128) -> alloc::vec::Vec<u32> {
    let mut words = alloc::vec::Vec::new();
    let mut remaining = seed;
    while remaining != 0 {
        words.push((remaining & 0xFFFF_FFFF) as u32);
        remaining >>= 32;
    }
    if words.is_empty() {
        words.push(0);
    }
    words
}

pub fn sealing_key<E: DeterministicSeedExpander>(seed: u128) -> SealingKey {
    SealingKey(E::expand(seed))
}

/// Seal one 16-byte intermediate state.
///
/// Matches the source's behavior exactly (flagged in §9 as a design
/// weakness preserved for bit-exact compatibility): a **fresh** AES-OFB
/// cipher is constructed from the same key/IV for every intermediate, so
/// two intermediates sealed under the same key reuse the same 16-byte
/// keystream prefix. The scheme relies on the unsealed intermediates
/// themselves being unpredictable without the chain root.
pub fn seal(key: &SealingKey, plaintext: [u8; 16]) -> [u8; 16] {
    let mut buf = plaintext;
    let aes_key = key.aes_key();
    let iv = key.iv();
    let mut cipher = Ofb::<Aes128>::new((&aes_key).into(), (&iv).into());
    cipher.apply_keystream(&mut buf);
    buf
}

/// Inverse of [`seal`] — OFB is self-inverse.
pub fn unseal(key: &SealingKey, ciphertext: [u8; 16]) -> [u8; 16] {
    seal(key, ciphertext)
}
