//! Secrets generator (C5): the issuer-side bundle that seeds the system.
//!
//! Everything here is `std`-only — it needs OS randomness, PKCS#8/PEM
//! encoding, and JSON, none of which make sense on a resource-constrained
//! decoder.

use std::collections::BTreeMap;

use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{ChannelRoots, EMERGENCY_CHANNEL};

#[derive(Serialize, Deserialize, Clone, Copy)]
struct ChannelRootsJson {
    forward: u128,
    backward: u128,
}

impl From<ChannelRoots> for ChannelRootsJson {
    fn from(r: ChannelRoots) -> Self {
        ChannelRootsJson { forward: r.forward, backward: r.backward }
    }
}

impl From<ChannelRootsJson> for ChannelRoots {
    fn from(r: ChannelRootsJson) -> Self {
        ChannelRoots { forward: r.forward, backward: r.backward }
    }
}

/// The wire shape of a secrets file. Channel roots are keyed by channel id
/// rendered as a JSON object key (i.e. a string), matching the reference
/// tooling's `json.dumps` of a dict with integer keys — `serde(flatten)`
/// can't be used directly over a `u32`-keyed map (the flattened buffer
/// deserializes object keys as strings and refuses to hand them to a `u32`
/// key deserializer), so the per-channel entries round-trip through a
/// string-keyed `Map` here and get parsed by hand in [`SecretsBundle`].
#[derive(Serialize, Deserialize)]
struct SecretsBundleWire {
    channels: Vec<u32>,
    systemsecret: u64,
    private: String,
    public: String,
    #[serde(flatten)]
    channel_roots: Map<String, Value>,
}

/// The contents of a secrets file: channel list (channel 0 included),
/// system secret, issuer Ed25519 keypair (PEM), and per-channel roots.
pub struct SecretsBundle {
    pub channels: Vec<u32>,
    pub systemsecret: u64,
    pub private: String,
    pub public: String,
    channel_roots: BTreeMap<u32, ChannelRootsJson>,
}

impl SecretsBundle {
    /// Generate a fresh bundle for `channels` (channel 0 is appended
    /// automatically, per §4.5/§3). `passphrase` protects the private
    /// key at rest via PKCS#8 PBES2 encryption; pass `None` to write an
    /// unencrypted PKCS#8 document (useful for non-interactive test runs,
    /// at the cost of the "password-encrypted at rest" guarantee).
    pub fn generate(channels: &[u32], passphrase: Option<&str>) -> Result<SecretsBundle> {
        let mut channel_list: Vec<u32> = channels.to_vec();
        channel_list.push(EMERGENCY_CHANNEL);

        let mut rng = OsRng;

        let mut secret_bytes = [0u8; 8];
        rng.fill_bytes(&mut secret_bytes);
        let systemsecret = u64::from_be_bytes(secret_bytes);

        let signing_key = SigningKey::generate(&mut rng);
        let private = match passphrase {
            Some(pw) => signing_key
                .to_pkcs8_encrypted_pem(&mut rng, pw.as_bytes(), LineEnding::LF)
                .map_err(|_| Error::IoError)?
                .to_string(),
            None => signing_key.to_pkcs8_pem(LineEnding::LF).map_err(|_| Error::IoError)?.to_string(),
        };
        let public = signing_key.verifying_key().to_public_key_pem(LineEnding::LF).map_err(|_| Error::IoError)?;

        let mut channel_roots = BTreeMap::new();
        for &channel in &channel_list {
            let mut forward_bytes = [0u8; 16];
            rng.fill_bytes(&mut forward_bytes);
            let mut backward_bytes = [0u8; 16];
            rng.fill_bytes(&mut backward_bytes);

            channel_roots.insert(
                channel,
                ChannelRootsJson { forward: u128::from_be_bytes(forward_bytes), backward: u128::from_be_bytes(backward_bytes) },
            );
        }

        Ok(SecretsBundle { channels: channel_list, systemsecret, private, public, channel_roots })
    }

    pub fn to_json(&self) -> Result<String> {
        let mut channel_roots = Map::with_capacity(self.channel_roots.len());
        for (&channel, roots) in &self.channel_roots {
            let value = serde_json::to_value(roots).map_err(|_| Error::IoError)?;
            channel_roots.insert(channel.to_string(), value);
        }

        let wire = SecretsBundleWire {
            channels: self.channels.clone(),
            systemsecret: self.systemsecret,
            private: self.private.clone(),
            public: self.public.clone(),
            channel_roots,
        };
        serde_json::to_string(&wire).map_err(|_| Error::IoError)
    }

    pub fn from_json(data: &str) -> Result<SecretsBundle> {
        let wire: SecretsBundleWire = serde_json::from_str(data).map_err(|_| Error::IoError)?;

        let mut channel_roots = BTreeMap::new();
        for (key, value) in wire.channel_roots {
            let channel: u32 = key.parse().map_err(|_| Error::IoError)?;
            let roots: ChannelRootsJson = serde_json::from_value(value).map_err(|_| Error::IoError)?;
            channel_roots.insert(channel, roots);
        }

        Ok(SecretsBundle {
            channels: wire.channels,
            systemsecret: wire.systemsecret,
            private: wire.private,
            public: wire.public,
            channel_roots,
        })
    }

    pub fn channel_roots(&self, channel: u32) -> Result<ChannelRoots> {
        self.channel_roots.get(&channel).copied().map(Into::into).ok_or(Error::UnknownChannel(channel))
    }

    /// Load the signing key, decrypting it with `passphrase` if the PEM
    /// document is an encrypted PKCS#8 key.
    pub fn signing_key(&self, passphrase: Option<&str>) -> Result<SigningKey> {
        match passphrase {
            Some(pw) => SigningKey::from_pkcs8_encrypted_pem(&self.private, pw).map_err(|_| Error::IoError),
            None => SigningKey::from_pkcs8_pem(&self.private).map_err(|_| Error::IoError),
        }
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_public_key_pem(&self.public).map_err(|_| Error::IoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_bundle_contains_requested_and_emergency_channels() {
        let bundle = SecretsBundle::generate(&[1, 2], None).unwrap();
        assert_eq!(bundle.channels, vec![1, 2, 0]);
        for &c in &[0, 1, 2] {
            let roots = bundle.channel_roots(c).unwrap();
            assert_ne!(roots.forward, roots.backward, "extremely unlikely collision for c={c}");
        }
    }

    #[test]
    fn json_round_trips() {
        let bundle = SecretsBundle::generate(&[1], None).unwrap();
        let json = bundle.to_json().unwrap();
        let reloaded = SecretsBundle::from_json(&json).unwrap();
        assert_eq!(reloaded.channels, bundle.channels);
        assert_eq!(reloaded.systemsecret, bundle.systemsecret);
        assert_eq!(reloaded.channel_roots(1).unwrap(), bundle.channel_roots(1).unwrap());
    }

    #[test]
    fn keys_round_trip_unencrypted() {
        let bundle = SecretsBundle::generate(&[1], None).unwrap();
        let sk = bundle.signing_key(None).unwrap();
        let vk = bundle.verifying_key().unwrap();
        assert_eq!(sk.verifying_key(), vk);
    }

    #[test]
    fn keys_round_trip_encrypted() {
        let bundle = SecretsBundle::generate(&[1], Some("correct horse battery staple")).unwrap();
        let sk = bundle.signing_key(Some("correct horse battery staple")).unwrap();
        assert_eq!(sk.verifying_key(), bundle.verifying_key().unwrap());
    }
}
