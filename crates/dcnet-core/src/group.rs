//! Prime-order subgroup parameters
//!
//! Pedersen commitments, the sigma-protocol proofs and the Diffie-Hellman
//! blinding strategy all live in the order-`q` subgroup of `Z_p*` where
//! `p = k·q + 1`. Generation retries random candidates but is bounded, so a
//! pathological RNG surfaces as [`Error::CryptoSetup`] instead of a hang.

use crate::{Error, Result};
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Candidates tried per prime search before giving up
pub const MAX_PRIME_ATTEMPTS: usize = 100_000;

/// Candidates tried per generator search before giving up
pub const MAX_GENERATOR_ATTEMPTS: usize = 1_000;

/// Miller-Rabin rounds used for primality checks
pub const MILLER_RABIN_ROUNDS: usize = 40;

/// Default bit length of the subgroup order `q`
pub const DEFAULT_Q_BITS: u64 = 256;

/// Default bit length of the modulus `p`
pub const DEFAULT_P_BITS: u64 = 1024;

const SMALL_PRIMES: [u32; 24] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Group parameters `(p, q, g, h)` shared by the whole room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParams {
    /// Prime modulus
    #[serde(with = "crate::types::decimal")]
    pub p: BigUint,
    /// Prime order of the subgroup, divides `p - 1`
    #[serde(with = "crate::types::decimal")]
    pub q: BigUint,
    /// First subgroup generator
    #[serde(with = "crate::types::decimal")]
    pub g: BigUint,
    /// Second subgroup generator, independent of `g`
    #[serde(with = "crate::types::decimal")]
    pub h: BigUint,
}

impl GroupParams {
    /// Generate fresh parameters with a `q_bits` subgroup inside a `p_bits` modulus
    pub fn generate<R: Rng + ?Sized>(q_bits: u64, p_bits: u64, rng: &mut R) -> Result<Self> {
        if q_bits < 16 || p_bits < q_bits + 2 {
            return Err(Error::InvalidConfig(format!(
                "Unsupported group sizes: q={} bits, p={} bits",
                q_bits, p_bits
            )));
        }

        let q = random_prime(q_bits, rng)?;
        let cofactor_bits = p_bits - q_bits;

        for attempt in 0..MAX_PRIME_ATTEMPTS {
            let mut k = rng.gen_biguint(cofactor_bits) | (BigUint::one() << (cofactor_bits - 1));
            if k.is_odd() {
                k -= 1u32;
            }

            let p = &k * &q + 1u32;
            if !is_probable_prime(&p, MILLER_RABIN_ROUNDS, rng) {
                continue;
            }

            debug!(attempt, p_bits = p.bits(), "Found group modulus");

            let g = find_generator(&p, &k, None, rng)?;
            let h = find_generator(&p, &k, Some(&g), rng)?;
            return Ok(Self { p, q, g, h });
        }

        Err(Error::CryptoSetup(format!(
            "No prime p = k*q + 1 found after {} attempts",
            MAX_PRIME_ATTEMPTS
        )))
    }

    /// Check the invariants: `p`, `q` prime, `q | p - 1`, `g`, `h` of order `q`
    pub fn validate(&self) -> Result<()> {
        let mut rng = rand::thread_rng();

        if !is_probable_prime(&self.q, MILLER_RABIN_ROUNDS, &mut rng) {
            return Err(Error::InvalidConfig("q is not prime".into()));
        }
        if !is_probable_prime(&self.p, MILLER_RABIN_ROUNDS, &mut rng) {
            return Err(Error::InvalidConfig("p is not prime".into()));
        }
        if !(&self.p - 1u32).is_multiple_of(&self.q) {
            return Err(Error::InvalidConfig("q does not divide p - 1".into()));
        }
        for (name, generator) in [("g", &self.g), ("h", &self.h)] {
            if generator.is_one() || !self.contains(generator) {
                return Err(Error::InvalidConfig(format!(
                    "{} does not generate the order-q subgroup",
                    name
                )));
            }
        }
        if self.g == self.h {
            return Err(Error::InvalidConfig("g and h must differ".into()));
        }
        Ok(())
    }

    /// True if `element` lies in the order-`q` subgroup
    pub fn contains(&self, element: &BigUint) -> bool {
        !element.is_zero() && element < &self.p && element.modpow(&self.q, &self.p).is_one()
    }

    /// `base^exponent mod p`
    pub fn exp(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        base.modpow(exponent, &self.p)
    }

    /// `g^exponent mod p`
    pub fn pow_g(&self, exponent: &BigUint) -> BigUint {
        self.exp(&self.g, exponent)
    }

    /// `h^exponent mod p`
    pub fn pow_h(&self, exponent: &BigUint) -> BigUint {
        self.exp(&self.h, exponent)
    }

    /// `a·b mod p`
    pub fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.p
    }

    /// Multiplicative inverse mod `p`
    pub fn inv(&self, a: &BigUint) -> BigUint {
        a.modpow(&(&self.p - 2u32), &self.p)
    }

    /// `a / b mod p`
    pub fn div(&self, a: &BigUint, b: &BigUint) -> BigUint {
        self.mul(a, &self.inv(b))
    }

    /// Reduce a signed integer into `[0, q)`
    pub fn reduce(&self, x: &BigInt) -> BigUint {
        let q = BigInt::from(self.q.clone());
        x.mod_floor(&q).magnitude().clone()
    }

    /// `a + b mod q`
    pub fn scalar_add(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + b) % &self.q
    }

    /// `a - b mod q`
    pub fn scalar_sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        let b = b % &self.q;
        (a + &self.q - b) % &self.q
    }

    /// `a·b mod q`
    pub fn scalar_mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.q
    }

    /// Uniform exponent in `[0, q)`
    pub fn random_exponent<R: Rng + ?Sized>(&self, rng: &mut R) -> BigUint {
        rng.gen_biguint_below(&self.q)
    }
}

/// Random prime of exactly `bits` bits
fn random_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> Result<BigUint> {
    let top = BigUint::one() << (bits - 1);

    for _ in 0..MAX_PRIME_ATTEMPTS {
        let candidate = rng.gen_biguint(bits) | &top | BigUint::one();
        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
            return Ok(candidate);
        }
    }

    Err(Error::CryptoSetup(format!(
        "No {}-bit prime found after {} attempts",
        bits, MAX_PRIME_ATTEMPTS
    )))
}

/// Raise random elements to the cofactor until one lands on a non-identity subgroup element
fn find_generator<R: Rng + ?Sized>(
    p: &BigUint,
    cofactor: &BigUint,
    distinct_from: Option<&BigUint>,
    rng: &mut R,
) -> Result<BigUint> {
    let two = BigUint::from(2u32);
    let upper = p - 1u32;

    for _ in 0..MAX_GENERATOR_ATTEMPTS {
        let x = rng.gen_biguint_range(&two, &upper);
        let candidate = x.modpow(cofactor, p);
        if candidate.is_one() || Some(&candidate) == distinct_from {
            continue;
        }
        return Ok(candidate);
    }

    Err(Error::CryptoSetup(format!(
        "No subgroup generator found after {} attempts",
        MAX_GENERATOR_ATTEMPTS
    )))
}

/// Miller-Rabin probabilistic primality test
pub fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    if n == &two {
        return true;
    }
    if n.is_even() {
        return false;
    }
    for small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if n == &small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}
