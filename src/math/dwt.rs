//! Generic core of the discrete weighted transform.
//!
//! One butterfly routine, two instantiations: integer modular arithmetic
//! drives the negacyclic NTT, and double-precision complex arithmetic drives
//! the CKKS canonical embedding. The algorithm follows Longa–Naehrig
//! (<https://eprint.iacr.org/2016/504>): forward butterflies in bit-reversed
//! output order, inverse butterflies consuming the scrambled root table, with
//! the 1/n correction merged into the final scalar pass.

/// The arithmetic a transform runs over. `guard` lets modular instantiations
/// keep values in a lazy range between layers.
pub trait TransformArith: Clone {
    type Value;
    type Root;
    type Scalar;

    fn add(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn sub(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn mul_root(&self, a: &Self::Value, r: &Self::Root) -> Self::Value;
    fn mul_scalar(&self, a: &Self::Value, s: &Self::Scalar) -> Self::Value;
    fn guard(&self, a: &Self::Value) -> Self::Value;
}

#[derive(Clone, Default)]
pub struct DwtHandler<A: TransformArith> {
    arithmetic: A,
}

impl<A: TransformArith> DwtHandler<A> {
    pub fn new(arithmetic: &A) -> Self {
        Self {
            arithmetic: arithmetic.clone(),
        }
    }

    /// Forward transform; `roots` holds the powers of psi in bit-reversed
    /// order, `roots[0]` unused past layer zero.
    pub fn transform_to_rev(
        &self,
        values: &mut [A::Value],
        log_n: usize,
        roots: &[A::Root],
        scalar: Option<&A::Scalar>,
    ) {
        let n = 1 << log_n;
        for layer in 0..log_n {
            let m = 1 << layer;
            let gap = n >> (1 + layer);
            let mut offset = 0;
            for root in &roots[m..2 * m] {
                let (left, right) = values[offset..offset + 2 * gap].split_at_mut(gap);
                for (x, y) in left.iter_mut().zip(right.iter_mut()) {
                    let u = self.arithmetic.guard(x);
                    let v = self.arithmetic.mul_root(y, root);
                    *x = self.arithmetic.add(&u, &v);
                    *y = self.arithmetic.sub(&u, &v);
                }
                offset += gap << 1;
            }
        }
        if let Some(scalar) = scalar {
            for value in values.iter_mut() {
                *value = self.arithmetic.mul_scalar(value, scalar);
            }
        }
    }

    /// Inverse transform; root `i` is the `(rev(i-1)+1)`-th power of psi^-1.
    pub fn transform_from_rev(
        &self,
        values: &mut [A::Value],
        log_n: usize,
        roots: &[A::Root],
        scalar: Option<&A::Scalar>,
    ) {
        let n = 1 << log_n;
        for layer in 0..log_n {
            let gap = 1 << layer;
            let m = n >> (1 + layer);
            let mut offset = 0;
            for root in &roots[n - 2 * m + 1..n - m + 1] {
                let (left, right) = values[offset..offset + 2 * gap].split_at_mut(gap);
                for (x, y) in left.iter_mut().zip(right.iter_mut()) {
                    let u = self.arithmetic.guard(&self.arithmetic.add(x, y));
                    let v = self.arithmetic.sub(x, y);
                    *x = u;
                    *y = self.arithmetic.mul_root(&v, root);
                }
                offset += gap << 1;
            }
        }
        if let Some(scalar) = scalar {
            for value in values.iter_mut() {
                *value = self.arithmetic.mul_scalar(value, scalar);
            }
        }
    }
}
