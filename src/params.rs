//! secp256k1 domain parameters, built once and never mutated

use crate::curves::{Curve, Point};
use num_bigint::{BigInt, Sign};
use std::sync::LazyLock;

// http://www.oid-info.com/get/1.3.132.0.10
const P: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xfc, 0x2f,
];
const GX: [u8; 32] = [
    0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87, 0x0b, 0x07,
    0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b, 0x16, 0xf8, 0x17, 0x98,
];
const GY: [u8; 32] = [
    0x48, 0x3a, 0xda, 0x77, 0x26, 0xa3, 0xc4, 0x65, 0x5d, 0xa4, 0xfb, 0xfc, 0x0e, 0x11, 0x08, 0xa8,
    0xfd, 0x17, 0xb4, 0x48, 0xa6, 0x85, 0x54, 0x19, 0x9c, 0x47, 0xd0, 0x8f, 0xfb, 0x10, 0xd4, 0xb8,
];
const N: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

/// The curve, its base point and the order of the base point
#[derive(Debug, Clone)]
pub struct CurveParams {
    pub curve: Curve,
    /// Base point G
    pub g: Point,
    /// Order of G, so n*G = INF
    pub n: BigInt,
    /// floor(n / 2), the low-S bound
    pub half_n: BigInt,
}

fn secp256k1() -> CurveParams {
    let p = BigInt::from_bytes_be(Sign::Plus, &P);
    let n = BigInt::from_bytes_be(Sign::Plus, &N);
    let g = Point::new(
        BigInt::from_bytes_be(Sign::Plus, &GX),
        BigInt::from_bytes_be(Sign::Plus, &GY),
    );
    CurveParams {
        curve: Curve::new(p, BigInt::from(0), BigInt::from(7)),
        g,
        half_n: &n >> 1usize,
        n,
    }
}

/// Global secp256k1 parameters
pub static SECP256K1: LazyLock<CurveParams> = LazyLock::new(secp256k1);
