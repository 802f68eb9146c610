//! Core functions for math over Elliptic Curves over Finite Fields:
//! points on a short Weierstrass curve, the group law and double-and-add
//! scalar multiplication.
//!
//! Arithmetic never fails. Malformed coordinates simply produce points that
//! do not satisfy [`Curve::contains`].

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};
use std::ops::{Add, Mul};

use crate::params::SECP256K1;

/// Extended Euclidean Algorithm
/// Returns (gcd, x, y) s.t. a * x + b * y == gcd
#[must_use]
pub fn extended_euclidean_algorithm(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let mut old_r = a.clone();
    let mut r = b.clone();
    let mut old_s = BigInt::one();
    let mut s = BigInt::zero();
    let mut old_t = BigInt::zero();
    let mut t = BigInt::one();

    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);

        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);

        let next_t = &old_t - &quotient * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }

    (old_r, old_s, old_t)
}

/// Returns modular multiplicative inverse m s.t. (n * m) % p == 1
///
/// `n` may be negative or larger than `p`; it is reduced first.
#[must_use]
#[inline]
pub fn mod_inv(n: &BigInt, p: &BigInt) -> BigInt {
    let (_, x, _) = extended_euclidean_algorithm(&n.mod_floor(p), p);
    x.mod_floor(p)
}

/// Elliptic Curve over the field of integers modulo a prime.
/// Points on the curve satisfy y^2 = x^3 + a*x + b (mod p).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curve {
    pub p: BigInt,
    pub a: BigInt,
    pub b: BigInt,
}

/// A point on a curve, or the point at infinity (the group identity)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Point {
    Infinity,
    Affine { x: BigInt, y: BigInt },
}

impl Point {
    #[must_use]
    pub const fn new(x: BigInt, y: BigInt) -> Self {
        Point::Affine { x, y }
    }

    /// Point at infinity
    #[must_use]
    pub const fn infinity() -> Self {
        Point::Infinity
    }

    #[must_use]
    #[inline]
    pub const fn is_infinity(&self) -> bool {
        matches!(self, Point::Infinity)
    }

    #[must_use]
    pub const fn x(&self) -> Option<&BigInt> {
        match self {
            Point::Affine { x, .. } => Some(x),
            Point::Infinity => None,
        }
    }

    #[must_use]
    pub const fn y(&self) -> Option<&BigInt> {
        match self {
            Point::Affine { y, .. } => Some(y),
            Point::Infinity => None,
        }
    }
}

impl Curve {
    #[must_use]
    pub const fn new(p: BigInt, a: BigInt, b: BigInt) -> Self {
        Curve { p, a, b }
    }

    /// Does the point satisfy the curve equation? The identity is always on the curve.
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        match point {
            Point::Infinity => true,
            Point::Affine { x, y } => {
                if x.sign() == num_bigint::Sign::Minus || y.sign() == num_bigint::Sign::Minus {
                    return false;
                }
                if x >= &self.p || y >= &self.p {
                    return false;
                }
                let lhs = (y * y).mod_floor(&self.p);
                let rhs = (x * x * x + &self.a * x + &self.b).mod_floor(&self.p);
                lhs == rhs
            }
        }
    }

    /// Group law: identity, inverse cancellation and doubling handled explicitly
    #[must_use]
    pub fn add(&self, lhs: &Point, rhs: &Point) -> Point {
        let (x1, y1, x2, y2) = match (lhs, rhs) {
            (Point::Infinity, _) => return rhs.clone(),
            (_, Point::Infinity) => return lhs.clone(),
            (Point::Affine { x: x1, y: y1 }, Point::Affine { x: x2, y: y2 }) => (x1, y1, x2, y2),
        };
        let p = &self.p;

        if x1 == x2 && y1 != y2 {
            return Point::Infinity;
        }

        let m = if x1 == x2 {
            // P + P; a vertical tangent when y == 0
            if y1.is_zero() {
                return Point::Infinity;
            }
            let numerator = (BigInt::from(3) * x1 * x1 + &self.a).mod_floor(p);
            let denominator = (BigInt::from(2) * y1).mod_floor(p);
            (numerator * mod_inv(&denominator, p)).mod_floor(p)
        } else {
            let numerator = (y1 - y2).mod_floor(p);
            let denominator = (x1 - x2).mod_floor(p);
            (numerator * mod_inv(&denominator, p)).mod_floor(p)
        };

        let rx = (&m * &m - x1 - x2).mod_floor(p);
        let ry = (-(&m * (&rx - x1) + y1)).mod_floor(p);

        Point::Affine { x: rx, y: ry }
    }

    #[must_use]
    pub fn double(&self, point: &Point) -> Point {
        self.add(point, point)
    }

    /// Double-and-add over the binary expansion of `k`, least significant bit first.
    /// Negative scalars yield the identity.
    #[must_use]
    pub fn scalar_mul(&self, k: &BigInt, point: &Point) -> Point {
        let mut result = Point::Infinity;
        if k.sign() != num_bigint::Sign::Plus {
            return result;
        }
        let mut addend = point.clone();
        let mut k = k.clone();

        while !k.is_zero() {
            if k.is_odd() {
                result = self.add(&result, &addend);
            }
            addend = self.double(&addend);
            k >>= 1;
        }
        result
    }
}

/// Addition on secp256k1
impl Add for Point {
    type Output = Point;

    #[inline]
    fn add(self, other: Point) -> Point {
        SECP256K1.curve.add(&self, &other)
    }
}

impl Add<&Point> for &Point {
    type Output = Point;

    #[inline]
    fn add(self, other: &Point) -> Point {
        SECP256K1.curve.add(self, other)
    }
}

/// Scalar multiplication on secp256k1: k * Point
impl Mul<&Point> for &BigInt {
    type Output = Point;

    fn mul(self, point: &Point) -> Point {
        scalar_mul(self, point)
    }
}

impl Mul<Point> for BigInt {
    type Output = Point;

    fn mul(self, point: Point) -> Point {
        scalar_mul(&self, &point)
    }
}

/// Double-and-add scalar multiplication on secp256k1
#[must_use]
pub fn scalar_mul(k: &BigInt, point: &Point) -> Point {
    SECP256K1.curve.scalar_mul(k, point)
}
