//! Hash functions used by the ledger: SHA-256, SHA-1, RIPEMD-160 and the
//! composite double-SHA-256 (`hash256`) and `hash160` digests.

use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Double SHA-256, used for transaction ids, block hashes, Merkle nodes and signing
#[must_use]
pub fn hash256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Compute SHA-1 hash (only reachable through `OP_SHA1`)
#[must_use]
pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// Compute RIPEMD-160 hash
#[must_use]
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(data).into()
}

/// RIPEMD160(SHA256(x)), the public key hash inside addresses and P2PKH scripts
#[must_use]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_vectors() {
        let test_cases = [
            (
                b"".as_slice(),
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            ),
            (
                b"abc".as_slice(),
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            ),
        ];

        for (input, expected) in test_cases {
            assert_eq!(hex::encode(sha256(input)), expected);
        }
    }

    #[test]
    fn test_hash256() {
        let result = hash256(b"hello");
        assert_eq!(result, sha256(&sha256(b"hello")));
        assert_eq!(
            hex::encode(result),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_sha1_and_ripemd160_vectors() {
        assert_eq!(
            hex::encode(sha1(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hex::encode(ripemd160(b"")),
            "9c1185a5c5e9fc54612808977ee8f548b2258d31"
        );
        assert_eq!(
            hex::encode(ripemd160(b"abc")),
            "8eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
        );
    }

    #[test]
    fn test_hash160_of_generator_pubkey() {
        // Compressed SEC encoding of G (secret key 1)
        let pk = hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
            .unwrap();
        assert_eq!(
            hex::encode(hash160(&pk)),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }
}
