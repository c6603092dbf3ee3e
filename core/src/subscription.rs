//! Subscription codec (C4): pack/unpack the fixed-layout 3328-byte blob a
//! decoder consumes to reconstruct chain states in `[start, end]` without
//! knowing either root.
//!
//! This is a pinned, byte-for-byte wire format (see §4.4), so unlike
//! the rest of this crate's internal records it is packed and parsed by
//! hand rather than through `bincode`/`serde` derive machinery — there is
//! no serialization format whose default derive output happens to produce
//! these exact offsets.

use crate::error::{Error, Result};
use crate::planner::{Intermediate, MAX_ANCHORS};
use crate::seal::{seal, unseal, SealingKey};

const POSITIONS_BYTES: usize = MAX_ANCHORS * 8; // 512
const CIPHERTEXTS_BYTES: usize = MAX_ANCHORS * 16; // 1024

const OFF_CHANNEL: usize = 0;
const OFF_START: usize = 4;
const OFF_END: usize = 12;
const OFF_FN: usize = 20;
const OFF_BN: usize = 21;
const OFF_FWD_POS: usize = 22;
const OFF_BWD_POS: usize = OFF_FWD_POS + POSITIONS_BYTES; // 534
const OFF_PADDING: usize = OFF_BWD_POS + POSITIONS_BYTES; // 1046
const OFF_FWD_CIPHER: usize = 1280;
const OFF_BWD_CIPHER: usize = OFF_FWD_CIPHER + CIPHERTEXTS_BYTES; // 2304

/// Total size of a packed subscription blob.
pub const SUBSCRIPTION_BYTES: usize = 3328;

const PADDING_BYTES: usize = OFF_FWD_CIPHER - OFF_PADDING; // 234

/// A subscription for one `(decoder, channel)` pair over `[start, end]`,
/// already sealed for shipment.
pub struct Subscription {
    pub channel: u32,
    pub start: u64,
    pub end: u64,
    pub forward: alloc::vec::Vec<(u64, [u8; 16])>,
    pub backward: alloc::vec::Vec<(u64, [u8; 16])>,
}

impl Subscription {
    /// Plan and seal a subscription covering `[start, end]` on `channel`,
    /// from the channel's forward/backward roots, under `key` (derived
    /// from `(SystemSecret, decoder_id, channel)` per §4.4).
    pub fn build<C: crate::chain::ChainCompressor>(
        channel: u32,
        start: u64,
        end: u64,
        forward_root: u128,
        backward_root: u128,
        key: &SealingKey,
    ) -> Result<Subscription> {
        if start > end {
            return Err(Error::InvalidWindow { lo: start, hi: end });
        }

        let end_of_time = u64::MAX;
        let forward = crate::planner::plan_anchors::<C>(forward_root, start, end)?;
        let backward =
            crate::planner::plan_anchors::<C>(backward_root, end_of_time - end, end_of_time - start)?;

        let seal_all = |anchors: alloc::vec::Vec<Intermediate>| -> alloc::vec::Vec<(u64, [u8; 16])> {
            anchors
                .into_iter()
                .map(|a| (a.position, seal(key, a.state.to_be_bytes())))
                .collect()
        };

        Ok(Subscription {
            channel,
            start,
            end,
            forward: seal_all(forward),
            backward: seal_all(backward),
        })
    }

    pub fn encode(&self) -> Result<[u8; SUBSCRIPTION_BYTES]> {
        if self.forward.len() > MAX_ANCHORS || self.backward.len() > MAX_ANCHORS {
            return Err(Error::MalformedSubscription("too many anchors"));
        }

        let mut buf = [0u8; SUBSCRIPTION_BYTES];

        buf[OFF_CHANNEL..OFF_CHANNEL + 4].copy_from_slice(&self.channel.to_be_bytes());
        buf[OFF_START..OFF_START + 8].copy_from_slice(&self.start.to_be_bytes());
        buf[OFF_END..OFF_END + 8].copy_from_slice(&self.end.to_be_bytes());
        buf[OFF_FN] = self.forward.len() as u8;
        buf[OFF_BN] = self.backward.len() as u8;

        write_positions(&mut buf[OFF_FWD_POS..OFF_FWD_POS + POSITIONS_BYTES], &self.forward);
        write_positions(&mut buf[OFF_BWD_POS..OFF_BWD_POS + POSITIONS_BYTES], &self.backward);
        write_ciphertexts(&mut buf[OFF_FWD_CIPHER..OFF_FWD_CIPHER + CIPHERTEXTS_BYTES], &self.forward);
        write_ciphertexts(&mut buf[OFF_BWD_CIPHER..OFF_BWD_CIPHER + CIPHERTEXTS_BYTES], &self.backward);

        // padding region and unused slots are already zero from `[0u8; _]`.
        let _ = PADDING_BYTES;

        Ok(buf)
    }

    /// Decode a blob for `expected_channel`, unsealing every slot under
    /// `key`. Positions are *not* re-verified for sortedness against the
    /// root here; that's the caller's job once it has reconstructed chain
    /// states, matching the reference decoder's layered validation.
    pub fn decode(blob: &[u8], expected_channel: u32, key: &SealingKey) -> Result<Subscription> {
        if blob.len() != SUBSCRIPTION_BYTES {
            return Err(Error::MalformedSubscription("wrong size"));
        }

        let channel = u32::from_be_bytes(blob[OFF_CHANNEL..OFF_CHANNEL + 4].try_into().unwrap());
        if channel != expected_channel {
            return Err(Error::UnknownChannel(channel));
        }

        let start = u64::from_be_bytes(blob[OFF_START..OFF_START + 8].try_into().unwrap());
        let end = u64::from_be_bytes(blob[OFF_END..OFF_END + 8].try_into().unwrap());
        if start > end {
            return Err(Error::InvalidWindow { lo: start, hi: end });
        }

        let fn_count = blob[OFF_FN] as usize;
        let bn_count = blob[OFF_BN] as usize;
        if fn_count > MAX_ANCHORS || bn_count > MAX_ANCHORS {
            return Err(Error::MalformedSubscription("anchor count exceeds 64"));
        }

        let fwd_positions = read_positions(&blob[OFF_FWD_POS..OFF_FWD_POS + POSITIONS_BYTES], fn_count)?;
        let bwd_positions = read_positions(&blob[OFF_BWD_POS..OFF_BWD_POS + POSITIONS_BYTES], bn_count)?;
        let fwd_ciphertexts = read_ciphertexts(&blob[OFF_FWD_CIPHER..OFF_FWD_CIPHER + CIPHERTEXTS_BYTES], fn_count);
        let bwd_ciphertexts = read_ciphertexts(&blob[OFF_BWD_CIPHER..OFF_BWD_CIPHER + CIPHERTEXTS_BYTES], bn_count);

        let _ = key; // unsealing happens in `reconstruct`; keep key around for that

        Ok(Subscription {
            channel,
            start,
            end,
            forward: fwd_positions.into_iter().zip(fwd_ciphertexts).collect(),
            backward: bwd_positions.into_iter().zip(bwd_ciphertexts).collect(),
        })
    }

    /// Unseal every intermediate, reconstructing cleartext `(position,
    /// state)` pairs usable by [`crate::chain::extend`].
    pub fn reconstruct(&self, key: &SealingKey) -> alloc::vec::Vec<Intermediate> {
        self.forward
            .iter()
            .chain(self.backward.iter())
            .map(|(pos, ct)| Intermediate { position: *pos, state: u128::from_be_bytes(unseal(key, *ct)) })
            .collect()
    }

    pub fn forward_intermediates(&self, key: &SealingKey) -> alloc::vec::Vec<Intermediate> {
        self.forward
            .iter()
            .map(|(pos, ct)| Intermediate { position: *pos, state: u128::from_be_bytes(unseal(key, *ct)) })
            .collect()
    }

    pub fn backward_intermediates(&self, key: &SealingKey) -> alloc::vec::Vec<Intermediate> {
        self.backward
            .iter()
            .map(|(pos, ct)| Intermediate { position: *pos, state: u128::from_be_bytes(unseal(key, *ct)) })
            .collect()
    }
}

fn write_positions(dst: &mut [u8], entries: &[(u64, [u8; 16])]) {
    for (i, (pos, _)) in entries.iter().enumerate() {
        dst[i * 8..i * 8 + 8].copy_from_slice(&pos.to_be_bytes());
    }
}

fn write_ciphertexts(dst: &mut [u8], entries: &[(u64, [u8; 16])]) {
    for (i, (_, ct)) in entries.iter().enumerate() {
        dst[i * 16..i * 16 + 16].copy_from_slice(ct);
    }
}

fn read_positions(src: &[u8], count: usize) -> Result<alloc::vec::Vec<u64>> {
    let mut out = alloc::vec::Vec::with_capacity(count);
    let mut last: Option<u64> = None;
    for i in 0..count {
        let pos = u64::from_be_bytes(src[i * 8..i * 8 + 8].try_into().unwrap());
        if let Some(prev) = last {
            if pos <= prev {
                return Err(Error::MalformedSubscription("positions not strictly increasing"));
            }
        }
        last = Some(pos);
        out.push(pos);
    }
    Ok(out)
}

fn read_ciphertexts(src: &[u8], count: usize) -> alloc::vec::Vec<[u8; 16]> {
    (0..count)
        .map(|i| src[i * 16..i * 16 + 16].try_into().unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Blake3Compressor;
    use crate::seal::{sealing_key, Mt19937Expander};

    #[test]
    fn emergency_subscription_has_one_anchor_each_side() {
        let key = sealing_key::<Mt19937Expander>(0xabc);
        let sub =
            Subscription::build::<Blake3Compressor>(0, 0, u64::MAX, 111, 222, &key).unwrap();
        assert_eq!(sub.forward.len(), 1);
        assert_eq!(sub.backward.len(), 1);
        assert_eq!(sub.forward[0].0, 0);
        assert_eq!(sub.backward[0].0, 0);
    }

    #[test]
    fn round_trip_through_wire_format() {
        let key = sealing_key::<Mt19937Expander>(77);
        let sub = Subscription::build::<Blake3Compressor>(3, 50, 200, 1, 2, &key).unwrap();
        let blob = sub.encode().unwrap();
        assert_eq!(blob.len(), SUBSCRIPTION_BYTES);

        let decoded = Subscription::decode(&blob, 3, &key).unwrap();
        assert_eq!(decoded.channel, 3);
        assert_eq!(decoded.start, 50);
        assert_eq!(decoded.end, 200);
        assert_eq!(decoded.forward.len(), sub.forward.len());
        assert_eq!(decoded.backward.len(), sub.backward.len());

        let original_inters = sub.reconstruct(&key);
        let decoded_inters = decoded.reconstruct(&key);
        assert_eq!(original_inters, decoded_inters);
    }

    #[test]
    fn wrong_channel_rejected() {
        let key = sealing_key::<Mt19937Expander>(1);
        let sub = Subscription::build::<Blake3Compressor>(3, 0, 10, 1, 2, &key).unwrap();
        let blob = sub.encode().unwrap();
        assert_eq!(Subscription::decode(&blob, 4, &key), Err(Error::UnknownChannel(3)));
    }

    #[test]
    fn sealing_isolation_across_devices() {
        let key_a = sealing_key::<Mt19937Expander>((1u128 << 96) | (0xAAu128 << 32));
        let key_b = sealing_key::<Mt19937Expander>((1u128 << 96) | (0xBBu128 << 32));

        let sub = Subscription::build::<Blake3Compressor>(1, 0, 100, 9, 10, &key_a).unwrap();
        let blob = sub.encode().unwrap();
        let decoded = Subscription::decode(&blob, 1, &key_a).unwrap();

        let right = decoded.reconstruct(&key_a);
        let wrong = decoded.reconstruct(&key_b);
        assert_ne!(right, wrong);
    }
}
