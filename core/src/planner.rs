//! Intermediate planner (C3): choose the minimal set of anchor positions
//! covering a window `[lo, hi]`, and seal each one for shipment.

use alloc::vec::Vec;

use crate::chain::{wind, ChainCompressor};
use crate::error::{Error, Result};

/// Planner emits at most this many anchors for any window (popcount bound,
/// see §4.3).
pub const MAX_ANCHORS: usize = 64;

/// A precomputed `(position, state)` pair enabling partial chain evaluation
/// without the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intermediate {
    pub position: u64,
    pub state: u128,
}

/// Position of the next anchor after `p`: clear the run of low bits that
/// would re-enter during winding, by adding `p`'s lowest set bit back onto
/// itself. This is the "advance by lowest set bit" rule §9 calls out
/// as the final, load-bearing version (an earlier, abandoned variant
/// advanced by a computed complement of the highest bit instead).
fn next_anchor(p: u64) -> Option<u64> {
    if p == 0 {
        return None;
    }
    let lowest_bit = p & p.wrapping_neg();
    p.checked_add(lowest_bit)
}

/// Plan the anchor sequence covering `[lo, hi]` in one direction of a chain
/// rooted at `root`.
///
/// Per §4.3: if `lo == 0`, the single anchor `(0, root)` covers the
/// whole chain. Otherwise anchors are emitted starting at `lo`, advancing
/// by [`next_anchor`], until the next anchor would exceed `hi`.
pub fn plan_anchors<C: ChainCompressor>(root: u128, lo: u64, hi: u64) -> Result<Vec<Intermediate>> {
    if lo > hi {
        return Err(Error::InvalidWindow { lo, hi });
    }

    let mut anchors = Vec::new();

    if lo == 0 {
        anchors.push(Intermediate { position: 0, state: root });
        return Ok(anchors);
    }

    let mut p = lo;
    loop {
        anchors.push(Intermediate { position: p, state: wind::<C>(root, p) });

        match next_anchor(p) {
            Some(next) if next <= hi => p = next,
            _ => break,
        }
    }

    Ok(anchors)
}

/// Select, among `anchors` (sorted ascending by position, as planned), the
/// one with the largest position `<= target`. Used by both the planner's
/// own invariant checks and the decoder's chain extension (§4.8).
pub fn select_anchor(anchors: &[Intermediate], target: u64) -> Option<&Intermediate> {
    anchors.iter().rev().find(|a| a.position <= target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{extend, Blake3Compressor};

    #[test]
    fn lo_zero_yields_single_anchor() {
        let root = 42u128;
        let anchors = plan_anchors::<Blake3Compressor>(root, 0, u64::MAX).unwrap();
        assert_eq!(anchors, [Intermediate { position: 0, state: root }]);
    }

    #[test]
    fn invalid_window_rejected() {
        let err = plan_anchors::<Blake3Compressor>(1, 10, 5).unwrap_err();
        assert_eq!(err, Error::InvalidWindow { lo: 10, hi: 5 });
    }

    #[test]
    fn anchors_strictly_increasing_and_bounded() {
        let root = 0xc0ffeeu128;
        let anchors = plan_anchors::<Blake3Compressor>(root, 1234, 56789).unwrap();

        assert!(anchors.len() <= MAX_ANCHORS);
        for w in anchors.windows(2) {
            assert!(w[0].position < w[1].position);
        }
        assert!(anchors.last().unwrap().position <= 56789);
        assert_eq!(anchors.first().unwrap().position, 1234);
    }

    #[test]
    fn every_timestamp_in_window_is_covered() {
        let root = 0xabcu128;
        let lo = 100u64;
        let hi = 500u64;
        let anchors = plan_anchors::<Blake3Compressor>(root, lo, hi).unwrap();

        for t in lo..=hi {
            let anchor = select_anchor(&anchors, t).expect("some anchor covers t");
            let reconstructed = extend::<Blake3Compressor>(anchor.state, anchor.position, t);
            let direct = wind::<Blake3Compressor>(root, t);
            assert_eq!(reconstructed, direct, "mismatch at t={t}");
        }
    }

    #[test]
    fn end_of_time_window_is_legal() {
        let anchors = plan_anchors::<Blake3Compressor>(1, 0, u64::MAX).unwrap();
        assert_eq!(anchors.len(), 1);
    }
}
