//! Merkle root over a block's transaction ids

use crate::error::Result;
use crate::hash::hash256;
use crate::transaction::Tx;

/// `hash256(left || right)`
#[must_use]
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    hash256(&combined)
}

/// Compute the merkle root from an ordered list of hashes.
///
/// Levels are reduced pairwise, duplicating the last hash of an odd-length
/// level. At least one level is always hashed, so a single hash `h` yields
/// `hash256(h || h)`. An empty list yields 32 zero bytes.
#[must_use]
pub fn compute_root(hashes: &[[u8; 32]]) -> [u8; 32] {
    if hashes.is_empty() {
        return [0u8; 32];
    }

    let mut level = hashes.to_vec();
    loop {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        if level.len() == 1 {
            return level[0];
        }
    }
}

/// Merkle root of a transaction list, over each transaction's id
pub fn merkle_root(txs: &[Tx]) -> Result<[u8; 32]> {
    let ids = txs.iter().map(Tx::id).collect::<Result<Vec<_>>>()?;
    Ok(compute_root(&ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list() {
        assert_eq!(compute_root(&[]), [0u8; 32]);
    }

    #[test]
    fn test_single_hash_is_duplicated() {
        let h = [0x42u8; 32];
        assert_eq!(compute_root(&[h]), hash_pair(&h, &h));
    }

    #[test]
    fn test_two_hashes() {
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];
        assert_eq!(compute_root(&[a, b]), hash_pair(&a, &b));
    }

    #[test]
    fn test_three_hashes_duplicate_last() {
        let (a, b, c) = ([0x11u8; 32], [0x22u8; 32], [0x33u8; 32]);
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(compute_root(&[a, b, c]), expected);
    }

    #[test]
    fn test_order_sensitive() {
        let (a, b) = ([0x11u8; 32], [0x22u8; 32]);
        assert_ne!(compute_root(&[a, b]), compute_root(&[b, a]));
        assert_eq!(compute_root(&[a, b]), compute_root(&[a, b]));
    }

    #[test]
    fn test_hash_pair_matches_concatenation() {
        let (a, b) = ([0x01u8; 32], [0x02u8; 32]);
        let mut joined = a.to_vec();
        joined.extend_from_slice(&b);
        assert_eq!(hash_pair(&a, &b), hash256(&joined));
    }
}
