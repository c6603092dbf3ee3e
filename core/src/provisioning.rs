//! Decoder build artifacts (`std`-only): the three files a firmware build
//! would bake into a decoder image (§3 `DecoderImage`, §6 external
//! interfaces). No firmware target exists in this workspace to consume
//! them, so this module is the host-side producer a future integration (or
//! a test harness standing in for one) would call.

use crate::chain::ChainCompressor;
use crate::device::device_channel_seed_key;
use crate::error::{Error, Result};
use crate::seal::DeterministicSeedExpander;
use crate::secrets::SecretsBundle;
use crate::subscription::{Subscription, SUBSCRIPTION_BYTES};

/// One decoder's baked-in material: its per-channel sealing keys (in
/// `channels` order), the channel-0 emergency subscription blob, and the
/// issuer's raw Ed25519 public key.
pub struct DecoderImage {
    pub channels: Vec<u32>,
    pub keys: Vec<u8>,
    pub emergency: [u8; SUBSCRIPTION_BYTES],
    pub public_key: [u8; 32],
}

impl DecoderImage {
    /// Build the artifacts for `decoder_id` from a secrets bundle: one
    /// 32-byte sealing key per channel in `bundle.channels` order
    /// (concatenated, matching `keys.bin`'s layout), the permanent
    /// `[0, END_OF_TIME]` channel-0 subscription sealed under that device's
    /// channel-0 key, and the raw 32-byte verifying key.
    pub fn build<C: ChainCompressor, E: DeterministicSeedExpander>(
        bundle: &SecretsBundle,
        decoder_id: u32,
    ) -> Result<DecoderImage> {
        let mut keys = Vec::with_capacity(bundle.channels.len() * 32);
        let mut emergency_key = None;

        for &channel in &bundle.channels {
            let key = device_channel_seed_key::<E>(bundle.systemsecret, decoder_id, channel);
            keys.extend_from_slice(&key.0);
            if channel == 0 {
                emergency_key = Some(key);
            }
        }
        let emergency_key = emergency_key.ok_or(Error::UnknownChannel(0))?;

        let roots = bundle.channel_roots(0)?;
        let emergency = Subscription::build::<C>(0, 0, u64::MAX, roots.forward, roots.backward, &emergency_key)?
            .encode()?;

        let verifying_key = bundle.verifying_key()?;

        Ok(DecoderImage {
            channels: bundle.channels.clone(),
            keys,
            emergency,
            public_key: verifying_key.to_bytes(),
        })
    }

    pub fn sealing_key_for(&self, channel: u32) -> Option<[u8; 32]> {
        let idx = self.channels.iter().position(|&c| c == channel)?;
        self.keys.get(idx * 32..idx * 32 + 32)?.try_into().ok()
    }
}

/// Generate a subscription blob for `(decoder_id, channel)` covering
/// `[start, end]`, from the issuer's secrets bundle. This is the C4/C8
/// entry point the `gen-subscription` CLI command drives.
pub fn gen_subscription<C: ChainCompressor, E: DeterministicSeedExpander>(
    bundle: &SecretsBundle,
    decoder_id: u32,
    channel: u32,
    start: u64,
    end: u64,
) -> Result<[u8; SUBSCRIPTION_BYTES]> {
    let roots = bundle.channel_roots(channel)?;
    let key = device_channel_seed_key::<E>(bundle.systemsecret, decoder_id, channel);
    Subscription::build::<C>(channel, start, end, roots.forward, roots.backward, &key)?.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Blake3Compressor;
    use crate::seal::Mt19937Expander;

    #[test]
    fn decoder_image_has_one_key_per_channel() {
        let bundle = SecretsBundle::generate(&[1, 2], None).unwrap();
        let image = DecoderImage::build::<Blake3Compressor, Mt19937Expander>(&bundle, 99).unwrap();
        assert_eq!(image.keys.len(), bundle.channels.len() * 32);
        assert!(image.sealing_key_for(0).is_some());
        assert!(image.sealing_key_for(1).is_some());
        assert!(image.sealing_key_for(2).is_some());
        assert!(image.sealing_key_for(7).is_none());
    }

    #[test]
    fn emergency_subscription_decodes_for_the_baked_in_key() {
        let bundle = SecretsBundle::generate(&[1], None).unwrap();
        let image = DecoderImage::build::<Blake3Compressor, Mt19937Expander>(&bundle, 1).unwrap();

        let key = crate::seal::sealing_key::<Mt19937Expander>(crate::device::device_channel_seed(
            bundle.systemsecret,
            1,
            0,
        ));
        let decoded = Subscription::decode(&image.emergency, 0, &key).unwrap();
        assert_eq!(decoded.start, 0);
        assert_eq!(decoded.end, u64::MAX);
    }

    #[test]
    fn gen_subscription_round_trips_under_the_device_key() {
        let bundle = SecretsBundle::generate(&[3], None).unwrap();
        let blob = gen_subscription::<Blake3Compressor, Mt19937Expander>(&bundle, 5, 3, 10, 20).unwrap();

        let key = device_channel_seed_key::<Mt19937Expander>(bundle.systemsecret, 5, 3);
        let decoded = Subscription::decode(&blob, 3, &key).unwrap();
        assert_eq!(decoded.start, 10);
        assert_eq!(decoded.end, 20);
    }
}
