//! Frame encoder (C6) and frame decoder (C7): per-timestamp key derivation,
//! frame masking via a 512-bit guard, and Ed25519ph signing/verification.

use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha512};

use crate::chain::{extend, wind, ChainCompressor};
use crate::error::{Error, Result};
use crate::planner::{select_anchor, Intermediate};

/// Frames are fixed at 64 bytes, interpreted as a big-endian integer (the
/// source does this directly; implementations must match it bit-for-bit).
pub const FRAME_SIZE: usize = 64;

/// Wire size of an encoded frame packet (§4.7 step 5 / §6).
pub const ENCODED_FRAME_BYTES: usize = 4 + 8 + 64 + 64;

/// `END_OF_TIME = 2^64 - 1`.
pub const END_OF_TIME: u64 = u64::MAX;

/// The 512-bit frame-mask constant `M` (§6), big-endian.
pub const MASK_M: [u8; 64] = [
    0x5C, 0xF4, 0x81, 0xFF, 0xE6, 0xF1, 0x1B, 0x40, 0x8D, 0x66, 0xFF, 0xF2, 0x3E, 0x5A, 0xB8, 0x27,
    0xB3, 0x3D, 0xE5, 0x2A, 0x2B, 0x3C, 0xEC, 0xB4, 0x11, 0x51, 0x00, 0x13, 0x28, 0xED, 0x09, 0x1F,
    0xBE, 0x60, 0x0B, 0x23, 0xF2, 0x1F, 0xBF, 0x32, 0x7B, 0xB0, 0x13, 0xA8, 0x26, 0x75, 0x90, 0x80,
    0x55, 0x48, 0x37, 0x7B, 0xAF, 0xDE, 0xBB, 0x6C, 0x46, 0x7A, 0xF9, 0x5F, 0x56, 0xAF, 0x3A, 0xE7,
];

/// An encoded frame packet as it travels on the wire: `u32_le(channel) ||
/// u64_le(timestamp) || signature[64] || ciphertext[64]`.
pub struct EncodedFrame {
    pub channel: u32,
    pub timestamp: u64,
    pub signature: [u8; 64],
    pub ciphertext: [u8; 64],
}

impl EncodedFrame {
    pub fn to_bytes(&self) -> [u8; ENCODED_FRAME_BYTES] {
        let mut out = [0u8; ENCODED_FRAME_BYTES];
        out[0..4].copy_from_slice(&self.channel.to_le_bytes());
        out[4..12].copy_from_slice(&self.timestamp.to_le_bytes());
        out[12..76].copy_from_slice(&self.signature);
        out[76..140].copy_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<EncodedFrame> {
        if bytes.len() != ENCODED_FRAME_BYTES {
            return Err(Error::MalformedSubscription("wrong frame packet size"));
        }
        Ok(EncodedFrame {
            channel: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            timestamp: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            signature: bytes[12..76].try_into().unwrap(),
            ciphertext: bytes[76..140].try_into().unwrap(),
        })
    }
}

/// Schoolbook multiply of a 128-bit value by the 512-bit mask, keeping the
/// low 512 bits (§9: "implement as schoolbook multiplication... no
/// modular reduction by a prime is needed").
fn guard_bytes(masked_state: u128) -> [u8; 64] {
    // Limbs are little-endian (limb 0 = least significant 64 bits).
    let small = [masked_state as u64, (masked_state >> 64) as u64];

    let mut big = [0u64; 8];
    for (i, chunk) in MASK_M.chunks_exact(8).rev().enumerate() {
        big[i] = u64::from_be_bytes(chunk.try_into().unwrap());
    }

    let mut product = [0u64; 8];
    for (i, &a) in small.iter().enumerate() {
        if i >= product.len() {
            break;
        }
        let mut carry: u128 = 0;
        for (j, &b) in big.iter().enumerate() {
            let k = i + j;
            if k >= product.len() {
                break;
            }
            let sum = product[k] as u128 + (a as u128) * (b as u128) + carry;
            product[k] = sum as u64;
            carry = sum >> 64;
        }
        let k = i + big.len();
        if k < product.len() {
            product[k] = (product[k] as u128 + carry) as u64;
        }
    }

    let mut out = [0u8; 64];
    for (i, limb) in product.iter().enumerate() {
        out[64 - (i + 1) * 8..64 - i * 8].copy_from_slice(&limb.to_be_bytes());
    }
    out
}

fn compute_guard(forward: u128, backward: u128) -> [u8; 64] {
    guard_bytes(forward ^ backward)
}

/// Derive the forward/backward chain states at `timestamp` for `channel`,
/// from the channel's two roots. Shared by the encoder and, conceptually,
/// by the decoder's direct (non-cached) path.
pub fn derive_guard_from_roots<C: ChainCompressor>(
    forward_root: u128,
    backward_root: u128,
    timestamp: u64,
) -> [u8; 64] {
    let forward = wind::<C>(forward_root, timestamp);
    let backward = wind::<C>(backward_root, END_OF_TIME - timestamp);
    compute_guard(forward, backward)
}

/// Encode one frame. `frame` must be exactly [`FRAME_SIZE`] bytes, padded
/// by the caller (the source interprets it as a big-endian integer
/// directly; there is no implicit padding here to stay bit-exact).
pub fn encode_frame<C: ChainCompressor>(
    signing_key: &SigningKey,
    forward_root: u128,
    backward_root: u128,
    channel: u32,
    frame: &[u8; FRAME_SIZE],
    timestamp: u64,
) -> EncodedFrame {
    let guard = derive_guard_from_roots::<C>(forward_root, backward_root, timestamp);

    let mut ciphertext = [0u8; 64];
    for i in 0..64 {
        ciphertext[i] = guard[i] ^ frame[i];
    }

    let mut prehash = Sha512::new();
    prehash.update(frame);
    let signature = signing_key
        .sign_prehashed(prehash, Some(&channel.to_be_bytes()))
        .expect("context is well under the 255-byte ed25519ph limit");

    EncodedFrame {
        channel,
        timestamp,
        signature: signature.to_bytes(),
        ciphertext,
    }
}

/// A small window-local cache an encoder may keep to amortize repeated
/// calls in the same 20-bit timestamp window (§4.7 "Caching"). Purely a
/// local optimization; never observable in the wire output.
pub struct EncoderCache {
    channel: Option<u32>,
    windowed_timestamp: Option<u64>,
    cached_forward: u128,
    cached_backward: u128,
}

/// Bits of the timestamp the encoder caches across calls (the high 44
/// bits); the low 20 bits vary per frame within a cached window.
const CACHE_MASK: u64 = 0xFFFF_FFFF_FFF0_0000;

impl EncoderCache {
    pub fn new() -> Self {
        EncoderCache { channel: None, windowed_timestamp: None, cached_forward: 0, cached_backward: 0 }
    }

    pub fn encode<C: ChainCompressor>(
        &mut self,
        signing_key: &SigningKey,
        forward_root: u128,
        backward_root: u128,
        channel: u32,
        frame: &[u8; FRAME_SIZE],
        timestamp: u64,
    ) -> EncodedFrame {
        let windowed = timestamp & CACHE_MASK;

        if self.channel != Some(channel) || self.windowed_timestamp != Some(windowed) {
            self.channel = Some(channel);
            self.windowed_timestamp = Some(windowed);
            self.cached_forward = wind::<C>(forward_root, windowed);
            self.cached_backward = wind::<C>(backward_root, (END_OF_TIME - windowed) & CACHE_MASK);
        }

        let extra = timestamp & !CACHE_MASK;
        let forward = extend::<C>(self.cached_forward, windowed, windowed | extra);
        let backward_base = (END_OF_TIME - windowed) & CACHE_MASK;
        let backward_target = END_OF_TIME - timestamp;
        let backward = extend::<C>(self.cached_backward, backward_base, backward_base | (backward_target & !CACHE_MASK));

        let guard = compute_guard(forward, backward);
        let mut ciphertext = [0u8; 64];
        for i in 0..64 {
            ciphertext[i] = guard[i] ^ frame[i];
        }

        let mut prehash = Sha512::new();
        prehash.update(frame);
        let signature = signing_key
            .sign_prehashed(prehash, Some(&channel.to_be_bytes()))
            .expect("context is well under the 255-byte ed25519ph limit");

        EncodedFrame { channel, timestamp, signature: signature.to_bytes(), ciphertext }
    }
}

impl Default for EncoderCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconstruct the forward/backward chain state at `target` given a set of
/// intermediates for that direction, using the planner's anchor-selection
/// invariant (§4.8 step 5).
pub fn reconstruct_state<C: ChainCompressor>(intermediates: &[Intermediate], target: u64) -> Option<u128> {
    let anchor = select_anchor(intermediates, target)?;
    Some(extend::<C>(anchor.state, anchor.position, target))
}

/// Decode a frame given its parsed packet, the subscription's reconstructed
/// forward/backward intermediates, and the Ed25519 verifying key.
///
/// Implements §4.8 steps 5-8. Per §7's policy, every rejection here just
/// returns `None`/`Err` with no side effects — callers must not advance
/// `last_decoded` except on `Ok`.
#[allow(clippy::too_many_arguments)]
pub fn decode_frame<C: ChainCompressor>(
    packet: &EncodedFrame,
    sub_start: u64,
    sub_end: u64,
    last_decoded: Option<u64>,
    forward_intermediates: &[Intermediate],
    backward_intermediates: &[Intermediate],
    verifying_key: &VerifyingKey,
) -> Result<[u8; FRAME_SIZE]> {
    if packet.timestamp < sub_start || packet.timestamp > sub_end {
        return Err(Error::OutOfWindow);
    }

    if let Some(last) = last_decoded {
        if packet.timestamp <= last {
            return Err(Error::MonotonicityViolation);
        }
    }

    let forward = reconstruct_state::<C>(forward_intermediates, packet.timestamp)
        .ok_or(Error::MalformedSubscription("no forward anchor covers this timestamp"))?;
    let backward_target = END_OF_TIME - packet.timestamp;
    let backward = reconstruct_state::<C>(backward_intermediates, backward_target)
        .ok_or(Error::MalformedSubscription("no backward anchor covers this timestamp"))?;

    let guard = compute_guard(forward, backward);
    let mut frame = [0u8; FRAME_SIZE];
    for i in 0..64 {
        frame[i] = guard[i] ^ packet.ciphertext[i];
    }

    let signature = Signature::from_bytes(&packet.signature);
    let mut prehash = Sha512::new();
    prehash.update(frame);
    verifying_key
        .verify_prehashed(prehash, Some(&packet.channel.to_be_bytes()), &signature)
        .map_err(|_| Error::SignatureInvalid)?;

    Ok(frame)
}
