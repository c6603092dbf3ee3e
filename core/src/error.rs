use thiserror::Error;

/// Every way an issuer-side operation in this crate can fail.
///
/// Decoder-side decode paths never surface this type: per the frame-decode
/// policy, malformed or unauthorized frames are dropped silently and no
/// state is updated (see [`crate::frame::decode_frame`]).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    #[error("window [{lo}, {hi}] is invalid")]
    InvalidWindow { lo: u64, hi: u64 },

    #[error("channel {0} is not present in this bundle")]
    UnknownChannel(u32),

    #[error("subscription blob is malformed: {0}")]
    MalformedSubscription(&'static str),

    #[error("frame timestamp did not strictly increase")]
    MonotonicityViolation,

    #[error("ed25519 signature verification failed")]
    SignatureInvalid,

    #[error("frame timestamp is outside the subscription window")]
    OutOfWindow,

    #[error("I/O error")]
    IoError,
}

pub type Result<T> = core::result::Result<T, Error>;
