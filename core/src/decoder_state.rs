//! The decoder-side state machine of §4.9: per-channel subscription
//! storage, frame decoding, and the monotonicity watermark.
//!
//! `last_t` is per-channel instance state (never global, §5), and a new
//! subscription for a channel atomically replaces the previous one — there
//! is no window where a partially-installed subscription is visible to a
//! concurrent decode.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::marker::PhantomData;

use ed25519_dalek::VerifyingKey;

use crate::chain::ChainCompressor;
use crate::error::{Error, Result};
use crate::frame::{decode_frame, EncodedFrame, FRAME_SIZE};
use crate::planner::Intermediate;
use crate::seal::SealingKey;
use crate::subscription::Subscription;

enum ChannelSubscriptionState {
    Unsubscribed,
    Subscribed { start: u64, end: u64, forward: Vec<Intermediate>, backward: Vec<Intermediate>, last_t: Option<u64> },
}

struct ChannelEntry {
    sealing_key: SealingKey,
    state: ChannelSubscriptionState,
}

/// Everything one decoder needs to hold to decode frames: one entry per
/// channel it has device-key material for, plus the issuer's verifying
/// key. Channel 0 must be registered and provisioned before any frame on
/// it can be decoded (the caller baking its subscription in at
/// provisioning time is how `DecoderImage` achieves "permanently
/// Subscribed from provisioning").
pub struct DecoderState<C: ChainCompressor> {
    channels: BTreeMap<u32, ChannelEntry>,
    verifying_key: VerifyingKey,
    _compressor: PhantomData<C>,
}

impl<C: ChainCompressor> DecoderState<C> {
    pub fn new(verifying_key: VerifyingKey) -> Self {
        DecoderState { channels: BTreeMap::new(), verifying_key, _compressor: PhantomData }
    }

    /// Register the device-key material for `channel`, leaving it
    /// `Unsubscribed` until a subscription blob is installed.
    pub fn register_channel(&mut self, channel: u32, sealing_key: SealingKey) {
        self.channels
            .entry(channel)
            .or_insert(ChannelEntry { sealing_key, state: ChannelSubscriptionState::Unsubscribed });
    }

    /// Install a subscription blob for `channel`. A channel-0 subscription
    /// can only be installed once, at provisioning time — matching the
    /// reference decoder, which refuses channel-0 subscriptions issued
    /// after the fact.
    pub fn install_subscription(&mut self, channel: u32, blob: &[u8], allow_channel_zero: bool) -> Result<()> {
        if channel == 0 && !allow_channel_zero {
            return Err(Error::UnknownChannel(0));
        }

        let entry = self.channels.get_mut(&channel).ok_or(Error::UnknownChannel(channel))?;
        let sub = Subscription::decode(blob, channel, &entry.sealing_key)?;

        let forward = sub.forward_intermediates(&entry.sealing_key);
        let backward = sub.backward_intermediates(&entry.sealing_key);

        // Decode + reconstruct fully into a scratch value before touching
        // `entry.state`, so a concurrent decode never observes a
        // half-installed subscription (§5).
        entry.state =
            ChannelSubscriptionState::Subscribed { start: sub.start, end: sub.end, forward, backward, last_t: None };

        Ok(())
    }

    /// Provision channel 0 with its permanent `[0, END_OF_TIME]`
    /// subscription. Must be called once before any channel-0 frame can be
    /// decoded.
    pub fn provision_channel_zero(&mut self, sealing_key: SealingKey, emergency_blob: &[u8]) -> Result<()> {
        self.register_channel(0, sealing_key);
        self.install_subscription(0, emergency_blob, true)
    }

    /// Decode one frame packet. Per §7's policy, any rejection (unknown
    /// channel, out of window, replay, bad signature, malformed state)
    /// silently drops the frame and updates no state — the return value is
    /// `None`, never an error the caller is expected to log or signal.
    pub fn decode(&mut self, packet: &EncodedFrame) -> Option<[u8; FRAME_SIZE]> {
        let entry = self.channels.get_mut(&packet.channel)?;

        let ChannelSubscriptionState::Subscribed { start, end, forward, backward, last_t } = &mut entry.state
        else {
            return None;
        };

        let frame = decode_frame::<C>(
            packet,
            *start,
            *end,
            *last_t,
            forward.as_slice(),
            backward.as_slice(),
            &self.verifying_key,
        )
        .ok()?;

        *last_t = Some(packet.timestamp);
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Blake3Compressor;
    use crate::device::device_channel_seed_key;
    use crate::seal::{sealing_key, Mt19937Expander};
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn signing_pair() -> (SigningKey, VerifyingKey) {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        (sk, vk)
    }

    fn padded(msg: &[u8]) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        out[FRAME_SIZE - msg.len()..].copy_from_slice(msg);
        out
    }

    #[test]
    fn emergency_channel_decodes_across_full_range() {
        let (sk, vk) = signing_pair();
        let forward_root = 0x1u128;
        let backward_root = 0x2u128;
        let system_secret = 42u64;
        let decoder_id = 7u32;

        let key = device_channel_seed_key::<Mt19937Expander>(system_secret, decoder_id, 0);
        let emergency = Subscription::build::<Blake3Compressor>(0, 0, u64::MAX, forward_root, backward_root, &key)
            .unwrap()
            .encode()
            .unwrap();

        let mut decoder = DecoderState::<Blake3Compressor>::new(vk);
        decoder.provision_channel_zero(key, &emergency).unwrap();

        for t in [0u64, 1, 1_000_000, u64::MAX] {
            let frame = padded(b"EMERGENCY ALERT");
            let encoded = crate::frame::encode_frame::<Blake3Compressor>(&sk, forward_root, backward_root, 0, &frame, t);
            let decoded = decoder.decode(&encoded);
            assert_eq!(decoded, Some(frame), "channel 0 must decode at t={t}");
        }
    }

    #[test]
    fn subscribed_channel_round_trips_and_rejects_replay() {
        let (sk, vk) = signing_pair();
        let forward_root = 5u128;
        let backward_root = 6u128;
        let key = device_channel_seed_key::<Mt19937Expander>(1, 1, 3);

        let sub = Subscription::build::<Blake3Compressor>(3, 50, 200, forward_root, backward_root, &key)
            .unwrap()
            .encode()
            .unwrap();

        let mut decoder = DecoderState::<Blake3Compressor>::new(vk);
        decoder.register_channel(3, key);
        decoder.install_subscription(3, &sub, false).unwrap();

        let frame = padded(b"subscriber content");
        let encoded = crate::frame::encode_frame::<Blake3Compressor>(&sk, forward_root, backward_root, 3, &frame, 100);

        assert_eq!(decoder.decode(&encoded), Some(frame));
        assert_eq!(decoder.decode(&encoded), None, "replay must be dropped");
    }

    #[test]
    fn subscription_for_other_device_fails_signature_check_path() {
        let (sk, vk) = signing_pair();
        let forward_root = 5u128;
        let backward_root = 6u128;

        let key_for_device_a = device_channel_seed_key::<Mt19937Expander>(1, 7, 3);
        let key_for_device_b = device_channel_seed_key::<Mt19937Expander>(1, 8, 3);

        let sub = Subscription::build::<Blake3Compressor>(3, 0, 1000, forward_root, backward_root, &key_for_device_a)
            .unwrap()
            .encode()
            .unwrap();

        let mut decoder_b = DecoderState::<Blake3Compressor>::new(vk);
        decoder_b.register_channel(3, key_for_device_b);
        decoder_b.install_subscription(3, &sub, false).unwrap();

        let frame = padded(b"not for device b");
        let encoded = crate::frame::encode_frame::<Blake3Compressor>(&sk, forward_root, backward_root, 3, &frame, 500);

        assert_eq!(decoder_b.decode(&encoded), None, "wrong device key must not decode");
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let (_sk, vk) = signing_pair();
        let key = device_channel_seed_key::<Mt19937Expander>(1, 1, 3);

        let mut decoder = DecoderState::<Blake3Compressor>::new(vk);
        let err = decoder.install_subscription(3, &[0u8; crate::subscription::SUBSCRIPTION_BYTES], false);
        assert_eq!(err, Err(Error::UnknownChannel(3)));
        let _ = key;
    }
}
