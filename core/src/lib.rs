//! Cryptographic core of a conditional-access issuer/decoder pair: the
//! two-sided hash chain, the subscription codec it backs, and the frame
//! encoder/decoder that rides on top of both.
//!
//! Built `no_std` + `alloc` so the decoder-side pieces (the state machine in
//! [`decoder_state`], frame decode, subscription decode) are usable from a
//! firmware target with no OS underneath it. The `std` feature pulls in the
//! issuer-only pieces: [`secrets`] and [`provisioning`], plus OS randomness,
//! JSON, and PEM/file-facing support.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

extern crate alloc;

pub mod chain;
pub mod device;
pub mod error;
pub mod frame;
pub mod model;
pub mod planner;
pub mod seal;
pub mod subscription;

pub mod decoder_state;

#[cfg(feature = "std")]
pub mod provisioning;
#[cfg(feature = "std")]
pub mod secrets;

pub use chain::{Blake3Compressor, ChainCompressor};
pub use decoder_state::DecoderState;
pub use error::{Error, Result};
pub use frame::{decode_frame, encode_frame, EncodedFrame, EncoderCache, END_OF_TIME, FRAME_SIZE};
pub use model::{ChannelRoots, EMERGENCY_CHANNEL};
pub use planner::Intermediate;
pub use seal::{DeterministicSeedExpander, Mt19937Expander, SealingKey};
pub use subscription::{Subscription, SUBSCRIPTION_BYTES};

#[cfg(feature = "std")]
pub use provisioning::{gen_subscription, DecoderImage};
#[cfg(feature = "std")]
pub use secrets::SecretsBundle;
