//! Non-interactive sigma-protocol proofs over the room's group
//!
//! Every proof is made non-interactive with Fiat-Shamir: the challenge is
//! SHA-256 over a domain label, the prover's node index, the group
//! parameters, the statement and the prover's first message, reduced mod `q`.
//! Binding the node index keeps one node from replaying another's proof.

use crate::commitment::Commitment;
use crate::group::GroupParams;
use crate::{Error, NodeIndex, Result};
use num_bigint::BigUint;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DLOG_LABEL: &[u8] = b"dcnet/proof/dlog/v1";
const PEDERSEN_LABEL: &[u8] = b"dcnet/proof/pedersen/v1";
const AND_LABEL: &[u8] = b"dcnet/proof/and/v1";
const OR_LABEL: &[u8] = b"dcnet/proof/or/v1";
const RESEND_LABEL: &[u8] = b"dcnet/proof/resend/v1";

/// Fiat-Shamir transcript
struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    fn new(label: &[u8], node: NodeIndex, group: &GroupParams) -> Self {
        let mut transcript = Self {
            hasher: Sha256::new(),
        };
        transcript.append_bytes(label);
        transcript.append_bytes(&(node as u64).to_be_bytes());
        for element in [&group.p, &group.q, &group.g, &group.h] {
            transcript.append(element);
        }
        transcript
    }

    fn append_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
    }

    fn append(&mut self, value: &BigUint) {
        self.append_bytes(&value.to_bytes_be());
    }

    fn challenge(self, q: &BigUint) -> BigUint {
        BigUint::from_bytes_be(&self.hasher.finalize()) % q
    }
}

/// Claim of knowing `x` with `public = base^x mod p`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlogStatement {
    #[serde(with = "crate::types::decimal")]
    pub base: BigUint,
    #[serde(with = "crate::types::decimal")]
    pub public: BigUint,
}

impl DlogStatement {
    /// Statement for `base^x`
    pub fn new(group: &GroupParams, base: &BigUint, x: &BigUint) -> Self {
        Self {
            base: base.clone(),
            public: group.exp(base, x),
        }
    }

    fn append_to(&self, transcript: &mut Transcript) {
        transcript.append(&self.base);
        transcript.append(&self.public);
    }

    fn check(&self, group: &GroupParams) -> Result<()> {
        if !group.contains(&self.base) || !group.contains(&self.public) {
            return Err(Error::VerificationFailed(
                "Statement elements are not in the subgroup".into(),
            ));
        }
        Ok(())
    }

    /// `base^response == commitment · public^challenge`
    fn holds(
        &self,
        group: &GroupParams,
        commitment: &BigUint,
        challenge: &BigUint,
        response: &BigUint,
    ) -> bool {
        group.exp(&self.base, response)
            == group.mul(commitment, &group.exp(&self.public, challenge))
    }

    /// First message that verifies for a chosen challenge and response
    fn simulate(&self, group: &GroupParams, challenge: &BigUint, response: &BigUint) -> BigUint {
        let blind = group.exp(&self.public, challenge);
        group.div(&group.exp(&self.base, response), &blind)
    }
}

/// Schnorr proof of knowledge of a discrete logarithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlogProof {
    #[serde(with = "crate::types::decimal")]
    pub commitment: BigUint,
    #[serde(with = "crate::types::decimal")]
    pub response: BigUint,
}

impl DlogProof {
    pub fn prove<R: Rng + ?Sized>(
        group: &GroupParams,
        node: NodeIndex,
        statement: &DlogStatement,
        x: &BigUint,
        rng: &mut R,
    ) -> Self {
        let k = group.random_exponent(rng);
        let commitment = group.exp(&statement.base, &k);

        let mut transcript = Transcript::new(DLOG_LABEL, node, group);
        statement.append_to(&mut transcript);
        transcript.append(&commitment);
        let c = transcript.challenge(&group.q);

        let response = group.scalar_add(&k, &group.scalar_mul(&c, x));
        Self {
            commitment,
            response,
        }
    }

    pub fn verify(
        &self,
        group: &GroupParams,
        node: NodeIndex,
        statement: &DlogStatement,
    ) -> Result<()> {
        statement.check(group)?;

        let mut transcript = Transcript::new(DLOG_LABEL, node, group);
        statement.append_to(&mut transcript);
        transcript.append(&self.commitment);
        let c = transcript.challenge(&group.q);

        if !statement.holds(group, &self.commitment, &c, &self.response) {
            return Err(Error::VerificationFailed(format!(
                "Discrete-log proof from node {} rejected",
                node
            )));
        }
        Ok(())
    }
}

/// Proof of knowing an opening `(x, r)` of a Pedersen commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PedersenProof {
    #[serde(with = "crate::types::decimal")]
    pub commitment: BigUint,
    #[serde(with = "crate::types::decimal")]
    pub value_response: BigUint,
    #[serde(with = "crate::types::decimal")]
    pub randomness_response: BigUint,
}

impl PedersenProof {
    pub fn prove<R: Rng + ?Sized>(
        group: &GroupParams,
        node: NodeIndex,
        target: &Commitment,
        x: &BigUint,
        r: &BigUint,
        rng: &mut R,
    ) -> Self {
        let a = group.random_exponent(rng);
        let b = group.random_exponent(rng);
        let commitment = group.mul(&group.pow_g(&a), &group.pow_h(&b));

        let c = Self::challenge(group, node, target, &commitment);
        Self {
            commitment,
            value_response: group.scalar_add(&a, &group.scalar_mul(&c, x)),
            randomness_response: group.scalar_add(&b, &group.scalar_mul(&c, r)),
        }
    }

    pub fn verify(&self, group: &GroupParams, node: NodeIndex, target: &Commitment) -> Result<()> {
        if !group.contains(target.value()) {
            return Err(Error::VerificationFailed(
                "Commitment is not in the subgroup".into(),
            ));
        }

        let c = Self::challenge(group, node, target, &self.commitment);
        let lhs = group.mul(
            &group.pow_g(&self.value_response),
            &group.pow_h(&self.randomness_response),
        );
        let rhs = group.mul(&self.commitment, &group.exp(target.value(), &c));
        if lhs != rhs {
            return Err(Error::VerificationFailed(format!(
                "Pedersen opening proof from node {} rejected",
                node
            )));
        }
        Ok(())
    }

    fn challenge(
        group: &GroupParams,
        node: NodeIndex,
        target: &Commitment,
        commitment: &BigUint,
    ) -> BigUint {
        let mut transcript = Transcript::new(PEDERSEN_LABEL, node, group);
        transcript.append(target.value());
        transcript.append(commitment);
        transcript.challenge(&group.q)
    }
}

/// Conjunction of two discrete-log statements under one challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndProof {
    pub left: DlogProof,
    pub right: DlogProof,
}

impl AndProof {
    pub fn prove<R: Rng + ?Sized>(
        group: &GroupParams,
        node: NodeIndex,
        statements: (&DlogStatement, &DlogStatement),
        witnesses: (&BigUint, &BigUint),
        rng: &mut R,
    ) -> Self {
        let k_left = group.random_exponent(rng);
        let k_right = group.random_exponent(rng);
        let t_left = group.exp(&statements.0.base, &k_left);
        let t_right = group.exp(&statements.1.base, &k_right);

        let c = challenge(AND_LABEL, group, node, statements, (&t_left, &t_right));
        Self {
            left: DlogProof {
                commitment: t_left,
                response: group.scalar_add(&k_left, &group.scalar_mul(&c, witnesses.0)),
            },
            right: DlogProof {
                commitment: t_right,
                response: group.scalar_add(&k_right, &group.scalar_mul(&c, witnesses.1)),
            },
        }
    }

    pub fn verify(
        &self,
        group: &GroupParams,
        node: NodeIndex,
        statements: (&DlogStatement, &DlogStatement),
    ) -> Result<()> {
        statements.0.check(group)?;
        statements.1.check(group)?;

        let c = challenge(
            AND_LABEL,
            group,
            node,
            statements,
            (&self.left.commitment, &self.right.commitment),
        );
        let left = statements
            .0
            .holds(group, &self.left.commitment, &c, &self.left.response);
        let right = statements
            .1
            .holds(group, &self.right.commitment, &c, &self.right.response);
        if !(left && right) {
            return Err(Error::VerificationFailed(format!(
                "AND proof from node {} rejected",
                node
            )));
        }
        Ok(())
    }
}

/// One side of an [`OrProof`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrBranch {
    #[serde(with = "crate::types::decimal")]
    pub commitment: BigUint,
    #[serde(with = "crate::types::decimal")]
    pub challenge: BigUint,
    #[serde(with = "crate::types::decimal")]
    pub response: BigUint,
}

/// Which side of a disjunction the prover can open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Known {
    Left,
    Right,
}

/// Cramer-Damgard-Schoenmakers proof of knowing one of two discrete logarithms
///
/// The verifier learns that the prover knows a witness for the left or the
/// right statement, but not which.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrProof {
    pub left: OrBranch,
    pub right: OrBranch,
}

impl OrProof {
    pub fn prove<R: Rng + ?Sized>(
        group: &GroupParams,
        node: NodeIndex,
        statements: (&DlogStatement, &DlogStatement),
        known: Known,
        witness: &BigUint,
        rng: &mut R,
    ) -> Self {
        Self::prove_labeled(OR_LABEL, group, node, statements, known, witness, rng)
    }

    pub fn verify(
        &self,
        group: &GroupParams,
        node: NodeIndex,
        statements: (&DlogStatement, &DlogStatement),
    ) -> Result<()> {
        self.verify_labeled(OR_LABEL, group, node, statements)
    }

    fn prove_labeled<R: Rng + ?Sized>(
        label: &[u8],
        group: &GroupParams,
        node: NodeIndex,
        statements: (&DlogStatement, &DlogStatement),
        known: Known,
        witness: &BigUint,
        rng: &mut R,
    ) -> Self {
        let (real, fake) = match known {
            Known::Left => (statements.0, statements.1),
            Known::Right => (statements.1, statements.0),
        };

        let fake_challenge = group.random_exponent(rng);
        let fake_response = group.random_exponent(rng);
        let fake_commitment = fake.simulate(group, &fake_challenge, &fake_response);

        let k = group.random_exponent(rng);
        let real_commitment = group.exp(&real.base, &k);

        let (t_left, t_right) = match known {
            Known::Left => (&real_commitment, &fake_commitment),
            Known::Right => (&fake_commitment, &real_commitment),
        };
        let c = challenge(label, group, node, statements, (t_left, t_right));

        let real_challenge = group.scalar_sub(&c, &fake_challenge);
        let real_response = group.scalar_add(&k, &group.scalar_mul(&real_challenge, witness));

        let real = OrBranch {
            commitment: real_commitment,
            challenge: real_challenge,
            response: real_response,
        };
        let fake = OrBranch {
            commitment: fake_commitment,
            challenge: fake_challenge,
            response: fake_response,
        };
        match known {
            Known::Left => Self {
                left: real,
                right: fake,
            },
            Known::Right => Self {
                left: fake,
                right: real,
            },
        }
    }

    fn verify_labeled(
        &self,
        label: &[u8],
        group: &GroupParams,
        node: NodeIndex,
        statements: (&DlogStatement, &DlogStatement),
    ) -> Result<()> {
        statements.0.check(group)?;
        statements.1.check(group)?;

        let c = challenge(
            label,
            group,
            node,
            statements,
            (&self.left.commitment, &self.right.commitment),
        );
        let split = group.scalar_add(&self.left.challenge, &self.right.challenge);
        let left = statements.0.holds(
            group,
            &self.left.commitment,
            &self.left.challenge,
            &self.left.response,
        );
        let right = statements.1.holds(
            group,
            &self.right.commitment,
            &self.right.challenge,
            &self.right.response,
        );

        if split != c || !left || !right {
            return Err(Error::VerificationFailed(format!(
                "OR proof from node {} rejected",
                node
            )));
        }
        Ok(())
    }
}

fn challenge(
    label: &[u8],
    group: &GroupParams,
    node: NodeIndex,
    statements: (&DlogStatement, &DlogStatement),
    commitments: (&BigUint, &BigUint),
) -> BigUint {
    let mut transcript = Transcript::new(label, node, group);
    statements.0.append_to(&mut transcript);
    statements.1.append_to(&mut transcript);
    transcript.append(commitments.0);
    transcript.append(commitments.1);
    transcript.challenge(&group.q)
}

/// Proof tying a child-round message commitment to its father round
///
/// A node that contended in the father round either resends the same value
/// in the child (`child / father` commits to zero) or stays silent (`child`
/// commits to zero). Both cases reduce to knowing a discrete log to base `h`,
/// combined with an [`OrProof`] so the verifier cannot tell which case holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendProof {
    pub inner: OrProof,
}

impl ResendProof {
    /// Prove `child` and `father` commit to the same value
    pub fn prove_resend<R: Rng + ?Sized>(
        group: &GroupParams,
        node: NodeIndex,
        child: &Commitment,
        father: &Commitment,
        child_randomness: &BigUint,
        father_randomness: &BigUint,
        rng: &mut R,
    ) -> Self {
        let witness = group.scalar_sub(child_randomness, father_randomness);
        let statements = Self::statements(group, child, father);
        Self {
            inner: OrProof::prove_labeled(
                RESEND_LABEL,
                group,
                node,
                (&statements.0, &statements.1),
                Known::Left,
                &witness,
                rng,
            ),
        }
    }

    /// Prove `child` commits to zero
    pub fn prove_silent<R: Rng + ?Sized>(
        group: &GroupParams,
        node: NodeIndex,
        child: &Commitment,
        father: &Commitment,
        child_randomness: &BigUint,
        rng: &mut R,
    ) -> Self {
        let statements = Self::statements(group, child, father);
        Self {
            inner: OrProof::prove_labeled(
                RESEND_LABEL,
                group,
                node,
                (&statements.0, &statements.1),
                Known::Right,
                child_randomness,
                rng,
            ),
        }
    }

    pub fn verify(
        &self,
        group: &GroupParams,
        node: NodeIndex,
        child: &Commitment,
        father: &Commitment,
    ) -> Result<()> {
        let statements = Self::statements(group, child, father);
        self.inner
            .verify_labeled(RESEND_LABEL, group, node, (&statements.0, &statements.1))
    }

    fn statements(
        group: &GroupParams,
        child: &Commitment,
        father: &Commitment,
    ) -> (DlogStatement, DlogStatement) {
        let ratio = group.div(child.value(), father.value());
        (
            DlogStatement {
                base: group.h.clone(),
                public: ratio,
            },
            DlogStatement {
                base: group.h.clone(),
                public: child.value().clone(),
            },
        )
    }
}
