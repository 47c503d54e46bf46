//! The StarkNet Pedersen hash over the STARK curve.
//!
//! `H(a, b) = [P0 + a_low * P1 + a_high * P2 + b_low * P3 + b_high * P4].x`
//! where `a_low` is the low 248 bits of `a` and `a_high` the remaining 4 bits.
//! The curve is `y^2 = x^3 + x + BETA` over the STARK field.
//!
//! Points are accumulated in Jacobian coordinates so that a hash costs a
//! single field inversion for the final conversion back to affine form (plus
//! one for the high-bits partial sum when either input is wide enough to have
//! one).

use ruint::{aliases::U256, uint};

use crate::felt::{Felt, MODULUS};

/// Number of low bits of each input multiplied against the first point of
/// its pair.
const LOW_BITS: usize = 248;

/// Total number of bits of a canonical felt.
const FELT_BITS: usize = 252;

const BETA: U256 =
    uint!(0x6f21413efbe40de150e596d72f7a8c5609ad26c15c915c1f4cdfcb99cee9e89_U256);

const MODULUS_MINUS_TWO: U256 =
    uint!(0x800000000000010ffffffffffffffffffffffffffffffffffffffffffffffff_U256);

const SHIFT_POINT: AffinePoint = AffinePoint {
    x: uint!(0x49ee3eba8c1600700ee1b87eb599f16716b0b1022947733551fde4050ca6804_U256),
    y: uint!(0x3ca0cfe4b3bc6ddf346d49d06ea0ed34e621062c0e056c1d0405d266e10268a_U256),
};

const P1: AffinePoint = AffinePoint {
    x: uint!(0x234287dcbaffe7f969c748655fca9e58fa8120b6d56eb0c1080d17957ebe47b_U256),
    y: uint!(0x3b056f100f96fb21e889527d41f4e39940135dd7a6c94cc6ed0268ee89e5615_U256),
};

const P2: AffinePoint = AffinePoint {
    x: uint!(0x4fa56f376c83db33f9dab2656558f3399099ec1de5e3018b7a6932dba8aa378_U256),
    y: uint!(0x3fa0984c931c9e38113e0c0e47e4401562761f92a7a23b45168f4e80ff5b54d_U256),
};

const P3: AffinePoint = AffinePoint {
    x: uint!(0x4ba4cc166be8dec764910f75b45f74b40c690c74709e90f3aa372f0bd2d6997_U256),
    y: uint!(0x40301cf5c1751f4b971e46c4ede85fcac5c59a5ce5ae7c48151f27b24b219c_U256),
};

const P4: AffinePoint = AffinePoint {
    x: uint!(0x54302dcb0e6cc1c6e44cca8f61a63bb2ca65048d53fb325d36ff12c49a58202_U256),
    y: uint!(0x1b77b3e37d13504b348046268d8ae25ce98ad783c25561a879dcc77e99c2426_U256),
};

/// Hashes two field elements into one.
pub fn pedersen_hash(a: &Felt, b: &Felt) -> Felt {
    let a = a.as_uint();
    let b = b.as_uint();

    let mut acc = ProjectivePoint::IDENTITY;
    for i in (0..LOW_BITS).rev() {
        acc = acc.double();
        if a.bit(i) {
            acc = acc.add_affine(&P1);
        }
        if b.bit(i) {
            acc = acc.add_affine(&P3);
        }
    }

    let mut high = ProjectivePoint::IDENTITY;
    for i in (LOW_BITS..FELT_BITS).rev() {
        high = high.double();
        if a.bit(i) {
            high = high.add_affine(&P2);
        }
        if b.bit(i) {
            high = high.add_affine(&P4);
        }
    }

    if let Some(high) = high.to_affine() {
        acc = acc.add_affine(&high);
    }
    acc = acc.add_affine(&SHIFT_POINT);

    match acc.to_affine() {
        Some(point) => Felt::from_raw(point.x),
        // Reaching infinity takes a small linear relation between the shift
        // point and P1..P4. The points come from the digits of pi, so finding
        // one is as hard as a discrete log.
        None => unreachable!("pedersen sum reached the point at infinity"),
    }
}

fn add(a: U256, b: U256) -> U256 {
    a.add_mod(b, MODULUS)
}

fn sub(a: U256, b: U256) -> U256 {
    a.add_mod(MODULUS - b, MODULUS)
}

fn mul(a: U256, b: U256) -> U256 {
    a.mul_mod(b, MODULUS)
}

fn inv(a: U256) -> U256 {
    a.pow_mod(MODULUS_MINUS_TWO, MODULUS)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct AffinePoint {
    x: U256,
    y: U256,
}

impl AffinePoint {
    #[cfg(test)]
    fn is_on_curve(&self) -> bool {
        let lhs = mul(self.y, self.y);
        let rhs = add(add(mul(mul(self.x, self.x), self.x), self.x), BETA);
        lhs == rhs
    }
}

/// A point in Jacobian coordinates: `(X, Y, Z)` stands for
/// `(X / Z^2, Y / Z^3)`. `Z == 0` is the point at infinity.
#[derive(Clone, Copy, Debug)]
struct ProjectivePoint {
    x: U256,
    y: U256,
    z: U256,
}

impl ProjectivePoint {
    const IDENTITY: Self = Self {
        x: U256::from_limbs([1, 0, 0, 0]),
        y: U256::from_limbs([1, 0, 0, 0]),
        z: U256::ZERO,
    };

    fn is_identity(&self) -> bool {
        self.z == U256::ZERO
    }

    fn from_affine(p: &AffinePoint) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: U256::from(1u64),
        }
    }

    fn double(&self) -> Self {
        if self.is_identity() || self.y == U256::ZERO {
            return Self::IDENTITY;
        }

        let yy = mul(self.y, self.y);
        let s = mul(U256::from(4u64), mul(self.x, yy));
        let zz = mul(self.z, self.z);
        // The curve coefficient of `x` is 1, so `a * Z^4` is just `Z^4`.
        let m = add(mul(U256::from(3u64), mul(self.x, self.x)), mul(zz, zz));

        let x = sub(mul(m, m), add(s, s));
        let y = sub(
            mul(m, sub(s, x)),
            mul(U256::from(8u64), mul(yy, yy)),
        );
        let z = mul(U256::from(2u64), mul(self.y, self.z));

        Self { x, y, z }
    }

    /// Mixed addition of an affine point.
    fn add_affine(&self, p: &AffinePoint) -> Self {
        if self.is_identity() {
            return Self::from_affine(p);
        }

        let zz = mul(self.z, self.z);
        let u2 = mul(p.x, zz);
        let s2 = mul(p.y, mul(self.z, zz));
        let h = sub(u2, self.x);
        let r = sub(s2, self.y);

        if h == U256::ZERO {
            return match r == U256::ZERO {
                true => self.double(),
                false => Self::IDENTITY,
            };
        }

        let hh = mul(h, h);
        let hhh = mul(h, hh);
        let v = mul(self.x, hh);

        let x = sub(sub(mul(r, r), hhh), add(v, v));
        let y = sub(mul(r, sub(v, x)), mul(self.y, hhh));
        let z = mul(self.z, h);

        Self { x, y, z }
    }

    fn to_affine(self) -> Option<AffinePoint> {
        if self.is_identity() {
            return None;
        }

        let z_inv = inv(self.z);
        let z_inv2 = mul(z_inv, z_inv);
        Some(AffinePoint {
            x: mul(self.x, z_inv2),
            y: mul(self.y, mul(z_inv, z_inv2)),
        })
    }
}
