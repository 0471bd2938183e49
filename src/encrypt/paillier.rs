//! Paillier cryptosystem with $`g = n + 1`$.
//!
//! - $`\mathsf{Enc}(m; r) = (1 + n)^m r^n \bmod n^2`$
//! - $`\mathsf{Dec}(c) = L(c^{\varphi} \bmod n^2) \cdot \varphi^{-1} \bmod n`$ where $`L(x) = (x - 1) / n`$
//!
//! Homomorphic evaluation lives on [PaillierPublicKey] so that every party holding the public key
//! can add ciphertexts and scale them by plaintexts.

use crate::encrypt::encoding::{scaling_factor, EncodedNumber, MIN_EXPONENT};
use crate::error::CryptoError;
use num_bigint_dig::{BigUint, ModInverse, RandBigInt, RandPrime};
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng};
use sha2::{Digest, Sha256};
use std::fmt;

/// Shortest modulus accepted for key generation.
pub const MIN_KEY_LENGTH: usize = 512;

/// Lowest exponent a ciphertext may carry. Exponents lie in `MIN_CIPHER_EXPONENT..=0`.
///
/// A training step multiplies at most three encoded scalars, so honest exponents stay above
/// `3 * MIN_EXPONENT`.
pub const MIN_CIPHER_EXPONENT: i32 = 8 * MIN_EXPONENT;

fn check_exponent(exponent: i32) -> Result<i32, CryptoError> {
    if (MIN_CIPHER_EXPONENT..=0).contains(&exponent) {
        Ok(exponent)
    } else {
        Err(CryptoError::InvalidCiphertext)
    }
}

/// Public half of a Paillier keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct PaillierPublicKey {
    n: BigUint,
    nsquare: BigUint,
    max_int: BigUint,
    key_id: u64,
}

/// Private half of a Paillier keypair. Never leaves the arbiter.
#[derive(Clone)]
pub struct PaillierPrivateKey {
    key_id: u64,
    n: BigUint,
    nsquare: BigUint,
    max_int: BigUint,
    phi: BigUint,
    mu: BigUint,
}

/// Encryption of an [EncodedNumber] under the key identified by `key_id`.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext {
    key_id: u64,
    c: BigUint,
    exponent: i32,
}

impl fmt::Debug for PaillierPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PaillierPublicKey {{ bits: {}, key_id: {:016x} }}",
            self.n.bits(),
            self.key_id
        )
    }
}

impl fmt::Debug for PaillierPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaillierPrivateKey {{ key_id: {:016x} }}", self.key_id)
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ciphertext {{ key_id: {:016x}, exponent: {} }}",
            self.key_id, self.exponent
        )
    }
}

fn fingerprint(n: &BigUint) -> u64 {
    let digest = Sha256::digest(n.to_bytes_le());
    let mut b = [0u8; 8];
    b.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(b)
}

/// Generate a keypair whose modulus has exactly `key_length` bits.
pub fn generate_keypair<R: Rng + CryptoRng>(
    key_length: usize,
    rng: &mut R,
) -> (PaillierPublicKey, PaillierPrivateKey) {
    loop {
        let p: BigUint = rng.gen_prime(key_length / 2);
        let q: BigUint = rng.gen_prime(key_length - key_length / 2);
        if p == q {
            continue;
        }

        let n = &p * &q;
        if n.bits() != key_length {
            continue;
        }

        let phi = (&p - BigUint::one()) * (&q - BigUint::one());
        let mu = match phi
            .clone()
            .mod_inverse(&n)
            .and_then(|inv| inv.to_biguint())
        {
            Some(mu) => mu,
            None => continue,
        };

        let public_key = PaillierPublicKey::new(n);
        let private_key = PaillierPrivateKey {
            key_id: public_key.key_id,
            n: public_key.n.clone(),
            nsquare: public_key.nsquare.clone(),
            max_int: public_key.max_int.clone(),
            phi,
            mu,
        };

        return (public_key, private_key);
    }
}

impl PaillierPublicKey {
    /// Rebuild a public key from a modulus received from a peer.
    ///
    /// The modulus must be odd and at least [MIN_KEY_LENGTH] bits long.
    pub fn from_modulus(n: BigUint) -> Result<Self, CryptoError> {
        if n.bits() < MIN_KEY_LENGTH || (&n % 2u32).is_zero() {
            return Err(CryptoError::InvalidPublicKey { bits: n.bits() });
        }
        Ok(Self::new(n))
    }

    fn new(n: BigUint) -> Self {
        let nsquare = &n * &n;
        let max_int = &n / BigUint::from(3u32);
        let key_id = fingerprint(&n);
        Self {
            n,
            nsquare,
            max_int,
            key_id,
        }
    }

    /// The modulus $`n`$.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// Fingerprint of the modulus, carried by every ciphertext.
    pub fn key_id(&self) -> u64 {
        self.key_id
    }

    fn raw_encrypt<R: Rng + CryptoRng>(&self, m: &BigUint, rng: &mut R) -> BigUint {
        let r = loop {
            let r = rng.gen_biguint_below(&self.n);
            if !r.is_zero() {
                break r;
            }
        };
        let g_m = (BigUint::one() + &self.n * m) % &self.nsquare;
        let r_n = r.modpow(&self.n, &self.nsquare);
        (g_m * r_n) % &self.nsquare
    }

    /// Encrypt a float.
    pub fn encrypt<R: Rng + CryptoRng>(
        &self,
        value: f64,
        rng: &mut R,
    ) -> Result<Ciphertext, CryptoError> {
        let encoded = EncodedNumber::encode(value)?;
        let m = encoded.to_residue(&self.n, &self.max_int)?;
        Ok(Ciphertext {
            key_id: self.key_id,
            c: self.raw_encrypt(&m, rng),
            exponent: encoded.exponent,
        })
    }

    /// Deterministic encryption of zero, the neutral element of [PaillierPublicKey::add].
    pub fn zero(&self) -> Ciphertext {
        Ciphertext {
            key_id: self.key_id,
            c: BigUint::one(),
            exponent: 0,
        }
    }

    /// Reject ciphertexts from another key, outside of $`[1, n^2)`$ or with an exponent below
    /// [MIN_CIPHER_EXPONENT] or above zero.
    pub fn check(&self, ct: &Ciphertext) -> Result<(), CryptoError> {
        if ct.key_id != self.key_id {
            return Err(CryptoError::KeyMismatch {
                expected: self.key_id,
                found: ct.key_id,
            });
        }
        if ct.c.is_zero() || ct.c >= self.nsquare {
            return Err(CryptoError::InvalidCiphertext);
        }
        check_exponent(ct.exponent)?;
        Ok(())
    }

    fn decrease_exponent_to(
        &self,
        ct: &Ciphertext,
        new_exponent: i32,
    ) -> Result<Ciphertext, CryptoError> {
        if new_exponent >= ct.exponent {
            return Ok(ct.clone());
        }
        let diff = ct
            .exponent
            .checked_sub(check_exponent(new_exponent)?)
            .ok_or(CryptoError::InvalidCiphertext)?;
        let factor = scaling_factor(diff.unsigned_abs());
        Ok(Ciphertext {
            key_id: ct.key_id,
            c: ct.c.modpow(&factor, &self.nsquare),
            exponent: new_exponent,
        })
    }

    /// $`[[a]] + [[b]]`$
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, CryptoError> {
        self.check(a)?;
        self.check(b)?;

        let exponent = a.exponent.min(b.exponent);
        let a = self.decrease_exponent_to(a, exponent)?;
        let b = self.decrease_exponent_to(b, exponent)?;

        Ok(Ciphertext {
            key_id: self.key_id,
            c: (&a.c * &b.c) % &self.nsquare,
            exponent,
        })
    }

    /// $`[[a]] + v`$ for a plaintext `v`, without fresh randomness.
    pub fn add_plain(&self, a: &Ciphertext, value: f64) -> Result<Ciphertext, CryptoError> {
        self.check(a)?;

        let encoded = EncodedNumber::encode(value)?;
        let exponent = a.exponent.min(encoded.exponent);
        let a = self.decrease_exponent_to(a, exponent)?;
        let m = encoded
            .decrease_exponent_to(exponent)
            .to_residue(&self.n, &self.max_int)?;
        let g_m = (BigUint::one() + &self.n * m) % &self.nsquare;

        Ok(Ciphertext {
            key_id: self.key_id,
            c: (&a.c * g_m) % &self.nsquare,
            exponent,
        })
    }

    /// $`s \cdot [[a]]`$ for a plaintext scalar `s`.
    pub fn mul_scalar(&self, a: &Ciphertext, scalar: f64) -> Result<Ciphertext, CryptoError> {
        self.check(a)?;

        let encoded = EncodedNumber::encode(scalar)?;
        let exponent = a
            .exponent
            .checked_add(encoded.exponent)
            .filter(|e| *e >= MIN_CIPHER_EXPONENT)
            .ok_or(CryptoError::Overflow)?;
        if encoded.is_zero() {
            return Ok(Ciphertext {
                exponent,
                ..self.zero()
            });
        }

        let (base, power) = if encoded.mantissa < num_bigint_dig::BigInt::zero() {
            let inv = a
                .c
                .clone()
                .mod_inverse(&self.nsquare)
                .and_then(|inv| inv.to_biguint())
                .ok_or(CryptoError::InvalidCiphertext)?;
            (inv, (-&encoded.mantissa).to_biguint())
        } else {
            (a.c.clone(), encoded.mantissa.to_biguint())
        };
        let power = power.ok_or(CryptoError::Overflow)?;
        if power > self.max_int {
            return Err(CryptoError::Overflow);
        }

        Ok(Ciphertext {
            key_id: self.key_id,
            c: base.modpow(&power, &self.nsquare),
            exponent,
        })
    }

    /// Sum of a sequence of ciphertexts, [PaillierPublicKey::zero] when empty.
    pub fn sum<'a, I>(&self, cts: I) -> Result<Ciphertext, CryptoError>
    where
        I: IntoIterator<Item = &'a Ciphertext>,
    {
        cts.into_iter()
            .try_fold(self.zero(), |acc, ct| self.add(&acc, ct))
    }
}

impl PaillierPrivateKey {
    /// Fingerprint of the matching public key.
    pub fn key_id(&self) -> u64 {
        self.key_id
    }

    /// Decrypt to a float.
    pub fn decrypt(&self, ct: &Ciphertext) -> Result<f64, CryptoError> {
        if ct.key_id != self.key_id {
            return Err(CryptoError::KeyMismatch {
                expected: self.key_id,
                found: ct.key_id,
            });
        }
        if ct.c.is_zero() || ct.c >= self.nsquare {
            return Err(CryptoError::InvalidCiphertext);
        }
        check_exponent(ct.exponent)?;

        let x = ct.c.modpow(&self.phi, &self.nsquare);
        let l = (x - BigUint::one()) / &self.n;
        let m = (l * &self.mu) % &self.n;

        EncodedNumber::from_residue(&m, ct.exponent, &self.n, &self.max_int)?.decode()
    }
}

impl Ciphertext {
    /// Rebuild a ciphertext received from the wire. It is validated on first use.
    pub fn from_parts(key_id: u64, c: BigUint, exponent: i32) -> Self {
        Self {
            key_id,
            c,
            exponent,
        }
    }

    /// Fingerprint of the key the ciphertext was produced under.
    pub fn key_id(&self) -> u64 {
        self.key_id
    }

    /// The group element.
    pub fn raw(&self) -> &BigUint {
        &self.c
    }

    /// Base-16 exponent of the encoded plaintext.
    pub fn exponent(&self) -> i32 {
        self.exponent
    }
}
