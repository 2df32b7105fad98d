//! Pedersen commitments over the room's group
//!
//! `commit(x, r) = g^(x mod q) · h^r mod p`. A fresh `r` is drawn from
//! `Z_q` for every commitment. Commitments multiply into a commitment to the
//! sum of the committed values, which is how a whole room proves its
//! blinding keys cancel without revealing any of them.
//!
//! Key commitments are opened with a zero-sum mask instead of fresh
//! randomness, so no single opening is ever published: the room's product
//! is `g^(Σk) · h^(Σr) = 1` exactly when the keys cancel.

pub mod proofs;

use crate::group::GroupParams;
use num_bigint::{BigInt, BigUint};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use proofs::{
    AndProof, DlogProof, DlogStatement, Known, OrBranch, OrProof, PedersenProof, ResendProof,
};

/// A Pedersen commitment, a subgroup element
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Commitment(#[serde(with = "crate::types::decimal")] pub BigUint);

impl Commitment {
    /// The committed group element
    pub fn value(&self) -> &BigUint {
        &self.0
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self.0)
    }
}

/// Commit to `x` with randomness `r`
pub fn commit(group: &GroupParams, x: &BigUint, r: &BigUint) -> Commitment {
    let x = x % &group.q;
    Commitment(group.mul(&group.pow_g(&x), &group.pow_h(r)))
}

/// Commit to a signed value, reduced into `Z_q` first
pub fn commit_signed(group: &GroupParams, x: &BigInt, r: &BigUint) -> Commitment {
    commit(group, &group.reduce(x), r)
}

/// Commit to `x` with fresh randomness; returns the commitment and its opening
pub fn commit_random<R: Rng + ?Sized>(
    group: &GroupParams,
    x: &BigInt,
    rng: &mut R,
) -> (Commitment, BigUint) {
    let r = group.random_exponent(rng);
    (commit_signed(group, x, &r), r)
}

/// True if `commitment` opens to `x` under `r`
pub fn verify(group: &GroupParams, commitment: &Commitment, x: &BigInt, r: &BigUint) -> bool {
    group.contains(&commitment.0) && commit_signed(group, x, r) == *commitment
}

/// Product of commitments, a commitment to the sum of their values
pub fn aggregate<'a>(
    group: &GroupParams,
    commitments: impl IntoIterator<Item = &'a Commitment>,
) -> Commitment {
    let product = commitments
        .into_iter()
        .fold(BigUint::from(1u32), |acc, c| group.mul(&acc, &c.0));
    Commitment(product)
}

/// True if every commitment is a subgroup element and their product is 1
///
/// Holds for commitments whose values and openings both sum to zero mod q.
pub fn cancels<'a>(
    group: &GroupParams,
    commitments: impl IntoIterator<Item = &'a Commitment>,
) -> bool {
    let commitments: Vec<&Commitment> = commitments.into_iter().collect();
    commitments.iter().all(|c| group.contains(&c.0))
        && aggregate(group, commitments).0 == BigUint::from(1u32)
}
