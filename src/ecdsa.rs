//! Elliptic Curve Digital Signature Algorithm (ECDSA)
//! Functions that sign/verify digital signatures and related utilities

use crate::curves::{Point, mod_inv, scalar_mul};
use crate::error::{LedgerError, Result};
use crate::hash::hash256;
use crate::keys::gen_secret_key;
use crate::params::SECP256K1;
use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::Zero;
use rand::{CryptoRng, RngCore};
use tracing::debug;

/// How many fresh nonces `sign` draws before giving up on degenerate `r`/`s`.
/// Each retry has probability ~2^-256, so hitting the limit means the RNG is broken.
pub const MAX_SIGNING_ATTEMPTS: usize = 16;

/// Longest DER integer we accept: 32 bytes plus a sign-padding zero.
const MAX_DER_INT_LEN: usize = 33;

/// ECDSA Signature (r, s)
///
/// Represents a digital signature consisting of two big integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub r: BigInt,
    pub s: BigInt,
}

impl Signature {
    pub fn new(r: BigInt, s: BigInt) -> Self {
        Signature { r, s }
    }

    /// Decode from DER format
    /// Format: 0x30 [total-length] 0x02 [R-length] [R] 0x02 [S-length] [S]
    ///
    /// Only the minimal encoding of each integer is accepted, so anything this
    /// returns re-encodes to the same bytes.
    pub fn decode(der: &[u8]) -> Result<Self> {
        let invalid = |why: &str| LedgerError::InvalidFormat(format!("DER signature: {why}"));

        if der.len() < 8 {
            return Err(invalid("too short"));
        }
        if der[0] != 0x30 {
            return Err(invalid("missing sequence marker"));
        }
        if der[1] as usize != der.len() - 2 {
            return Err(invalid("sequence length does not match buffer"));
        }

        let (r, rest) = decode_der_int(&der[2..]).map_err(|why| invalid(&format!("r: {why}")))?;
        let (s, rest) = decode_der_int(rest).map_err(|why| invalid(&format!("s: {why}")))?;
        if !rest.is_empty() {
            return Err(invalid("trailing bytes"));
        }

        Ok(Signature { r, s })
    }

    /// Encode to DER format
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let r_bytes = encode_der_int(&self.r);
        let s_bytes = encode_der_int(&self.s);

        let mut result = Vec::with_capacity(6 + r_bytes.len() + s_bytes.len());
        result.push(0x30);
        result.push((4 + r_bytes.len() + s_bytes.len()) as u8);
        result.push(0x02);
        result.push(r_bytes.len() as u8);
        result.extend(&r_bytes);
        result.push(0x02);
        result.push(s_bytes.len() as u8);
        result.extend(&s_bytes);
        result
    }

    /// Both components in (0, n)
    #[must_use]
    pub fn is_in_range(&self) -> bool {
        let n = &SECP256K1.n;
        self.r.sign() == Sign::Plus && &self.r < n && self.s.sign() == Sign::Plus && &self.s < n
    }

    #[must_use]
    pub fn is_low_s(&self) -> bool {
        self.s <= SECP256K1.half_n
    }

    /// Replace s with n - s when s is in the upper half of the range (BIP-62)
    #[must_use]
    pub fn normalize_s(mut self) -> Self {
        if !self.is_low_s() {
            self.s = &SECP256K1.n - &self.s;
        }
        self
    }
}

/// Parse one `0x02 len bytes` element, returning the value and the rest of the buffer.
fn decode_der_int(buf: &[u8]) -> std::result::Result<(BigInt, &[u8]), &'static str> {
    if buf.len() < 2 || buf[0] != 0x02 {
        return Err("missing integer marker");
    }
    let len = buf[1] as usize;
    if len == 0 {
        return Err("empty integer");
    }
    if len > MAX_DER_INT_LEN {
        return Err("integer too long");
    }
    let body = buf.get(2..2 + len).ok_or("integer runs past the end")?;
    if body[0] & 0x80 != 0 {
        return Err("negative integer");
    }
    if len > 1 && body[0] == 0x00 && body[1] & 0x80 == 0 {
        return Err("non-minimal integer padding");
    }
    Ok((BigInt::from_bytes_be(Sign::Plus, body), &buf[2 + len..]))
}

/// Minimal big-endian bytes, with a 0x00 prefix when the high bit would read as negative.
fn encode_der_int(n: &BigInt) -> Vec<u8> {
    let (_, mut bytes) = n.to_bytes_be();
    if bytes.is_empty() {
        bytes.push(0);
    }
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0x00);
    }
    bytes
}

/// Hash a message the way signing and verification do (double SHA-256) and read it as an integer.
fn message_scalar(message: &[u8]) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &hash256(message))
}

/// Sign a message with a secret key
///
/// Uses double SHA-256 hashing and draws the nonce `k` from `rng`.
/// A degenerate `r == 0` or `s == 0` is retried with a fresh nonce.
/// Ensures low S value per BIP-62.
pub fn sign<R>(secret_key: &BigInt, message: &[u8], rng: &mut R) -> Result<Signature>
where
    R: RngCore + CryptoRng + ?Sized,
{
    let n = &SECP256K1.n;
    if secret_key.sign() != Sign::Plus || secret_key >= n {
        return Err(LedgerError::Crypto("secret key outside [1, n-1]".into()));
    }

    let z = message_scalar(message);

    for attempt in 1..=MAX_SIGNING_ATTEMPTS {
        let k = gen_secret_key(n, rng);
        let r = match scalar_mul(&k, &SECP256K1.g) {
            Point::Affine { x, .. } => x.mod_floor(n),
            Point::Infinity => BigInt::zero(),
        };
        if r.is_zero() {
            debug!(attempt, "degenerate r, retrying with a fresh nonce");
            continue;
        }

        let s = (mod_inv(&k, n) * (&z + secret_key * &r)).mod_floor(n);
        if s.is_zero() {
            debug!(attempt, "degenerate s, retrying with a fresh nonce");
            continue;
        }

        return Ok(Signature::new(r, s).normalize_s());
    }

    Err(LedgerError::Crypto(format!(
        "no usable nonce after {MAX_SIGNING_ATTEMPTS} attempts"
    )))
}

/// A public key point is usable for verification when it is not the identity,
/// lies on the curve and is annihilated by the group order.
#[must_use]
pub fn is_valid_public_point(point: &Point) -> bool {
    !point.is_infinity()
        && SECP256K1.curve.contains(point)
        && scalar_mul(&SECP256K1.n, point).is_infinity()
}

/// Verify a signature
///
/// Returns `true` if the signature is valid for the given public key and message.
/// Invalid keys and out-of-range components are rejected, never panicked on.
#[must_use]
pub fn verify(public_key: &Point, message: &[u8], sig: &Signature) -> bool {
    let n = &SECP256K1.n;

    if !sig.is_in_range() || !is_valid_public_point(public_key) {
        return false;
    }

    let z = message_scalar(message);

    let w = mod_inv(&sig.s, n);
    let u1 = (&z * &w).mod_floor(n);
    let u2 = (&sig.r * &w).mod_floor(n);

    let p1 = scalar_mul(&u1, &SECP256K1.g);
    let p2 = scalar_mul(&u2, public_key);

    match &p1 + &p2 {
        Point::Affine { x, .. } => x.mod_floor(n) == sig.r,
        Point::Infinity => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyPair, PublicKey};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_ecdsa_sign_verify() {
        let mut rng = rng();
        // Create two identities
        let alice = KeyPair::generate(&mut rng);
        let bob = KeyPair::generate(&mut rng);

        let message = b"user pk1 would like to pay user pk2 1 BTC kkthx";

        // Random signature should fail
        let fake_r = gen_secret_key(&SECP256K1.n, &mut rng);
        let fake_s = gen_secret_key(&SECP256K1.n, &mut rng);
        let fake_sig = Signature::new(fake_r, fake_s);
        assert!(!verify(&alice.public.point, message, &fake_sig));

        // Signature with wrong key should fail
        let sig2 = sign(&bob.secret, message, &mut rng).unwrap();
        assert!(!verify(&alice.public.point, message, &sig2));

        // Correct signature should pass
        let sig1 = sign(&alice.secret, message, &mut rng).unwrap();
        assert!(sig1.is_low_s());
        assert!(verify(&alice.public.point, message, &sig1));
    }

    #[test]
    fn test_sig_der_decode() {
        // From Programming Bitcoin Chapter 4
        let der = hex::decode("3045022037206a0610995c58074999cb9767b87af4c4978db68c06e8e6e81d282047a7c60221008ca63759c1157ebeaec0d03cecca119fc9a75bf8e6d0fa65c841c8e2738cdaec").unwrap();
        let sig = Signature::decode(&der).unwrap();

        let expected_r = BigInt::parse_bytes(
            b"37206a0610995c58074999cb9767b87af4c4978db68c06e8e6e81d282047a7c6",
            16,
        )
        .unwrap();
        let expected_s = BigInt::parse_bytes(
            b"8ca63759c1157ebeaec0d03cecca119fc9a75bf8e6d0fa65c841c8e2738cdaec",
            16,
        )
        .unwrap();

        assert_eq!(sig.r, expected_r);
        assert_eq!(sig.s, expected_s);

        // Test roundtrip encoding
        assert_eq!(der, sig.encode());
    }

    #[test]
    fn test_der_rejects_malformed() {
        let good = hex::decode("3006020101020102").unwrap();
        assert!(Signature::decode(&good).is_ok());

        for bad in [
            "",                   // empty
            "3106020101020102",   // wrong marker
            "3007020101020102",   // length mismatch
            "3006030101020102",   // wrong r marker
            "3006020181020102",   // negative r
            "300702020001020102", // padded r
            "30060201010201",     // truncated s
            "300702010102010200", // trailing byte inside sequence
            "3006020001020201",   // empty r
        ] {
            let bytes = hex::decode(bad).unwrap();
            assert!(Signature::decode(&bytes).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_der_encodes_high_bit_with_padding() {
        let sig = Signature::new(BigInt::from(0x80), BigInt::from(1));
        let der = sig.encode();
        assert_eq!(hex::encode(&der), "3007020200800201 01".replace(' ', ""));
        assert_eq!(Signature::decode(&der).unwrap(), sig);
    }

    #[test]
    fn test_signature_der_roundtrip() {
        let mut rng = rng();
        let key = KeyPair::generate(&mut rng);
        let sig = sign(&key.secret, b"Test message", &mut rng).unwrap();
        let decoded = Signature::decode(&sig.encode()).unwrap();
        assert_eq!(sig, decoded);
    }

    #[test]
    fn test_invalid_signature() {
        let mut rng = rng();
        let key = KeyPair::generate(&mut rng);
        let sig = sign(&key.secret, b"Hello, Bitcoin!", &mut rng).unwrap();
        assert!(!verify(&key.public.point, b"Wrong message!", &sig));
    }

    #[test]
    fn test_out_of_range_components_rejected() {
        let mut rng = rng();
        let key = KeyPair::generate(&mut rng);
        let sig = sign(&key.secret, b"msg", &mut rng).unwrap();

        let zero_r = Signature::new(BigInt::zero(), sig.s.clone());
        assert!(!verify(&key.public.point, b"msg", &zero_r));
        let big_s = Signature::new(sig.r.clone(), &sig.s + &SECP256K1.n);
        assert!(!verify(&key.public.point, b"msg", &big_s));
    }

    #[test]
    fn test_invalid_public_keys_rejected() {
        let mut rng = rng();
        let key = KeyPair::generate(&mut rng);
        let sig = sign(&key.secret, b"msg", &mut rng).unwrap();

        assert!(!verify(&Point::Infinity, b"msg", &sig));
        let off_curve = Point::new(BigInt::from(1), BigInt::from(1));
        assert!(!verify(&off_curve, b"msg", &sig));
        assert!(!is_valid_public_point(&off_curve));
        assert!(is_valid_public_point(&PublicKey::from_secret(&key.secret).point));
    }

    #[test]
    fn test_secret_key_range_checked() {
        let mut rng = rng();
        assert!(sign(&BigInt::zero(), b"msg", &mut rng).is_err());
        assert!(sign(&SECP256K1.n, b"msg", &mut rng).is_err());
    }

    #[test]
    fn test_deterministic_with_seeded_rng() {
        let key = KeyPair::generate(&mut rng());
        let a = sign(&key.secret, b"same", &mut StdRng::seed_from_u64(99)).unwrap();
        let b = sign(&key.secret, b"same", &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }
}
