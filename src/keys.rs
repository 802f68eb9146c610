//! Utilities to generate secret/public key pairs and Base58Check addresses

use crate::curves::{Point, scalar_mul};
use crate::ecdsa::{self, Signature};
use crate::error::{LedgerError, Result};
use crate::hash::{hash160, hash256};
use crate::params::SECP256K1;
use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Network selector: address version byte and block magic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Main,
    Test,
}

impl Network {
    /// Get version byte for addresses
    #[inline]
    pub const fn version_byte(self) -> u8 {
        match self {
            Network::Main => 0x00,
            Network::Test => 0x6f,
        }
    }

    /// Four bytes that open every serialized block
    #[inline]
    pub const fn magic(self) -> [u8; 4] {
        match self {
            Network::Main => [0xf9, 0xbe, 0xb4, 0xd9],
            Network::Test => [0x0b, 0x11, 0x09, 0x07],
        }
    }

    /// Get network name
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
        }
    }

    pub const fn from_version_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Network::Main),
            0x6f => Some(Network::Test),
            _ => None,
        }
    }
}

impl TryFrom<&str> for Network {
    type Error = LedgerError;

    fn try_from(s: &str) -> Result<Self> {
        match s {
            "main" | "mainnet" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            _ => Err(LedgerError::InvalidFormat(format!("Unknown network: {s}"))),
        }
    }
}

/// Generate a secret key with uniform random distribution in [1, n)
pub fn gen_secret_key<R>(n: &BigInt, rng: &mut R) -> BigInt
where
    R: RngCore + ?Sized,
{
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        let key = BigInt::from_bytes_be(Sign::Plus, &bytes);
        if key >= BigInt::one() && key < *n {
            return key;
        }
    }
}

/// Public key - a Point on the secp256k1 curve with SEC encoding/decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub point: Point,
}

impl PublicKey {
    /// Create from a Point
    pub const fn from_point(pt: Point) -> Self {
        PublicKey { point: pt }
    }

    /// Derive public key from secret key
    pub fn from_secret(sk: &BigInt) -> Self {
        PublicKey::from_point(scalar_mul(sk, &SECP256K1.g))
    }

    /// Derive public key from hex string secret key
    pub fn from_secret_hex(sk_hex: &str) -> Result<Self> {
        let sk = BigInt::parse_bytes(sk_hex.as_bytes(), 16)
            .ok_or_else(|| LedgerError::InvalidFormat(format!("secret key is not hex: {sk_hex}")))?;
        Ok(Self::from_secret(&sk))
    }

    /// Decode from SEC binary format
    ///
    /// `0x04 x y` is uncompressed, `0x02`/`0x03 x` compressed with the y parity in the
    /// prefix, and a lone `0x00` is the point at infinity. Coordinates must be field
    /// elements and the resulting point must lie on the curve.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let invalid = |why: &str| LedgerError::InvalidFormat(format!("public key: {why}"));
        let curve = &SECP256K1.curve;
        let p = &curve.p;

        let Some(&prefix) = bytes.first() else {
            return Err(invalid("empty"));
        };

        match prefix {
            0x00 if bytes.len() == 1 => Ok(PublicKey::from_point(Point::Infinity)),
            // Uncompressed format
            0x04 => {
                if bytes.len() != 65 {
                    return Err(invalid("uncompressed key must be 65 bytes"));
                }
                let x = BigInt::from_bytes_be(Sign::Plus, &bytes[1..33]);
                let y = BigInt::from_bytes_be(Sign::Plus, &bytes[33..65]);
                let point = Point::new(x, y);
                if !curve.contains(&point) {
                    return Err(invalid("point is not on the curve"));
                }
                Ok(PublicKey { point })
            }
            // Compressed format
            0x02 | 0x03 => {
                if bytes.len() != 33 {
                    return Err(invalid("compressed key must be 33 bytes"));
                }
                let want_even = prefix == 0x02;
                let x = BigInt::from_bytes_be(Sign::Plus, &bytes[1..33]);
                if &x >= p {
                    return Err(invalid("x coordinate is not a field element"));
                }

                // Solve y^2 = x^3 + 7 (mod p)
                let y2 = (x.modpow(&BigInt::from(3), p) + &curve.b).mod_floor(p);

                // y = y2^((p+1)/4) mod p (works because p = 3 mod 4 for secp256k1)
                let exp = (p + BigInt::one()) >> 2usize;
                let mut y = y2.modpow(&exp, p);
                if (&y * &y).mod_floor(p) != y2 {
                    return Err(invalid("x has no square root on the curve"));
                }

                if y.is_even() != want_even {
                    y = (p - &y).mod_floor(p);
                }

                Ok(PublicKey {
                    point: Point::new(x, y),
                })
            }
            _ => Err(invalid("unknown prefix")),
        }
    }

    /// Encode to SEC format
    pub fn encode(&self, compressed: bool) -> Vec<u8> {
        let (x, y) = match &self.point {
            Point::Infinity => return vec![0x00],
            Point::Affine { x, y } => (x, y),
        };

        let x_bytes = bigint_to_32_bytes(x);

        if compressed {
            let prefix = if y.is_even() { 0x02 } else { 0x03 };
            let mut result = Vec::with_capacity(33);
            result.push(prefix);
            result.extend_from_slice(&x_bytes);
            result
        } else {
            let mut result = Vec::with_capacity(65);
            result.push(0x04);
            result.extend_from_slice(&x_bytes);
            result.extend_from_slice(&bigint_to_32_bytes(y));
            result
        }
    }

    /// Not the identity, on the curve and of order n
    #[must_use]
    pub fn is_valid(&self) -> bool {
        ecdsa::is_valid_public_point(&self.point)
    }

    /// Encode and hash with HASH160
    pub fn hash160(&self, compressed: bool) -> [u8; 20] {
        hash160(&self.encode(compressed))
    }

    /// Get the Base58Check address for a specific network
    pub fn address(&self, net: Network, compressed: bool) -> String {
        pubkey_hash_to_address(&self.hash160(compressed), net)
    }

    pub fn verify(&self, message: &[u8], sig: &Signature) -> bool {
        ecdsa::verify(&self.point, message, sig)
    }
}

/// A secret scalar together with its public point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub secret: BigInt,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the caller's randomness source
    pub fn generate<R>(rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let secret = gen_secret_key(&SECP256K1.n, rng);
        let public = PublicKey::from_secret(&secret);
        KeyPair { secret, public }
    }

    /// Generate a key pair from the thread-local RNG
    pub fn random() -> Self {
        Self::generate(&mut rand::rng())
    }

    /// Wrap an existing secret, which must lie in [1, n-1]
    pub fn from_secret(secret: BigInt) -> Result<Self> {
        if secret.is_zero() || secret.sign() == Sign::Minus || secret >= SECP256K1.n {
            return Err(LedgerError::Crypto("secret key outside [1, n-1]".into()));
        }
        let public = PublicKey::from_secret(&secret);
        Ok(KeyPair { secret, public })
    }

    pub fn sign<R>(&self, message: &[u8], rng: &mut R) -> Result<Signature>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        ecdsa::sign(&self.secret, message, rng)
    }
}

/// Convert BigInt to 32-byte big-endian array
fn bigint_to_32_bytes(n: &BigInt) -> [u8; 32] {
    let (_, bytes) = n.to_bytes_be();
    let mut result = [0u8; 32];
    let take = bytes.len().min(32);
    result[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    result
}

// -----------------------------------------------------------------------------
// Base58 encoding/decoding

const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn alphabet_inv(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&x| x == c).map(|i| i as u8)
}

/// Base58 encode bytes; each leading zero byte becomes a leading '1'
pub fn b58encode(bytes: &[u8]) -> String {
    let mut n = BigInt::from_bytes_be(Sign::Plus, bytes);
    let mut chars = Vec::new();
    let fifty_eight = BigInt::from(58);

    while n > BigInt::zero() {
        let (quotient, remainder) = n.div_rem(&fifty_eight);
        let (_, rem_bytes) = remainder.to_bytes_be();
        let idx = rem_bytes.first().copied().unwrap_or(0) as usize;
        chars.push(ALPHABET[idx] as char);
        n = quotient;
    }

    let num_leading_zeros = bytes.iter().take_while(|&&b| b == 0).count();
    chars.extend(std::iter::repeat_n('1', num_leading_zeros));

    chars.iter().rev().collect()
}

/// Base58 decode to bytes
pub fn b58decode(s: &str) -> Result<Vec<u8>> {
    let mut n = BigInt::zero();
    let fifty_eight = BigInt::from(58);

    for c in s.bytes() {
        let val = alphabet_inv(c).ok_or_else(|| {
            LedgerError::InvalidFormat(format!("invalid base58 character {:?}", c as char))
        })?;
        n = n * &fifty_eight + BigInt::from(val);
    }

    let num_leading_ones = s.bytes().take_while(|&c| c == b'1').count();
    let mut result = vec![0u8; num_leading_ones];
    if !n.is_zero() {
        result.extend(n.to_bytes_be().1);
    }
    Ok(result)
}

/// Append a 4-byte double-SHA-256 checksum and Base58 encode
pub fn b58check_encode(payload: &[u8]) -> String {
    let mut bytes = payload.to_vec();
    bytes.extend_from_slice(&hash256(payload)[..4]);
    b58encode(&bytes)
}

/// Base58 decode and strip a verified 4-byte checksum
pub fn b58check_decode(s: &str) -> Result<Vec<u8>> {
    let bytes = b58decode(s)?;
    if bytes.len() < 4 {
        return Err(LedgerError::InvalidFormat("base58check payload too short".into()));
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    if hash256(payload)[..4] != *checksum {
        return Err(LedgerError::Validation("invalid base58check checksum".into()));
    }
    Ok(payload.to_vec())
}

/// Convert a public key hash to a P2PKH address
pub fn pubkey_hash_to_address(hash: &[u8; 20], net: Network) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(net.version_byte());
    payload.extend_from_slice(hash);
    b58check_encode(&payload)
}

/// Network and public key hash of a Base58Check P2PKH address
pub fn decode_address(address: &str) -> Result<(Network, [u8; 20])> {
    let payload = b58check_decode(address)?;
    if payload.len() != 21 {
        return Err(LedgerError::InvalidFormat(format!(
            "address payload must be 21 bytes, found {}",
            payload.len()
        )));
    }
    let net = Network::from_version_byte(payload[0]).ok_or_else(|| {
        LedgerError::InvalidFormat(format!("unknown address version 0x{:02x}", payload[0]))
    })?;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok((net, hash))
}

/// Extract the public key hash from a Base58Check address
pub fn address_to_pubkey_hash(address: &str) -> Result<[u8; 20]> {
    decode_address(address).map(|(_, hash)| hash)
}
