//! Per-device key derivation (C8): the `(SystemSecret, decoder_id,
//! channel)` seed and the 32-byte key it expands to.

use crate::seal::{sealing_key, DeterministicSeedExpander, SealingKey};

/// `(SystemSecret << 64) | (decoder_id << 32) | channel`, as specified in
/// §4.4/§4.6. Shared by subscription sealing (C4) and the decoder-image
/// build (C8) — they derive from the same seed on purpose, so a decoder's
/// baked-in channel seed is exactly the key an issued subscription for that
/// channel was sealed under.
pub fn device_channel_seed(system_secret: u64, decoder_id: u32, channel: u32) -> u128 {
    ((system_secret as u128) << 64) | ((decoder_id as u128) << 32) | (channel as u128)
}

/// Derive the 32-byte AES-OFB sealing key baked into a decoder image (or
/// used at issuance time) for `(decoder_id, channel)`.
pub fn device_channel_seed_key<E: DeterministicSeedExpander>(
    system_secret: u64,
    decoder_id: u32,
    channel: u32,
) -> SealingKey {
    sealing_key::<E>(device_channel_seed(system_secret, decoder_id, channel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seal::Mt19937Expander;

    #[test]
    fn seed_packs_fields_into_disjoint_bit_ranges() {
        let seed = device_channel_seed(0x1122_3344_5566_7788, 0xdead_beef, 0xc0ff_ee00);
        assert_eq!(seed >> 64, 0x1122_3344_5566_7788);
        assert_eq!((seed >> 32) & 0xFFFF_FFFF, 0xdead_beef);
        assert_eq!(seed & 0xFFFF_FFFF, 0xc0ff_ee00);
    }

    #[test]
    fn distinct_channels_yield_distinct_keys() {
        let a = device_channel_seed_key::<Mt19937Expander>(7, 1, 0);
        let b = device_channel_seed_key::<Mt19937Expander>(7, 1, 1);
        assert_ne!(a.0, b.0);
    }
}
