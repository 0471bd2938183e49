//! Additively homomorphic encryption used by the training protocol.
//!
//! The arbiter generates a keypair and distributes the public key; guest and host only ever
//! install that public key. The homomorphic properties the protocol relies on are
//!
//! ```math
//! \mathsf{Dec}([[a]] + [[b]]) = a + b, \qquad \mathsf{Dec}(c \cdot [[a]]) = c a
//! ```
//!
//! for plaintext scalars $`c`$. See [paillier] for the scheme and [encoding] for how floats are
//! mapped into the plaintext space.

use crate::error::CryptoError;
use rand::{CryptoRng, Rng};
use scuttlebutt::AesRng;

pub mod encoding;
pub mod paillier;
pub use paillier::{
    generate_keypair, Ciphertext, PaillierPrivateKey, PaillierPublicKey, MIN_CIPHER_EXPONENT,
    MIN_KEY_LENGTH,
};

/// Trait for encryption operators held by the three roles.
pub trait EncryptOperator {
    /// Shareable key type.
    type PublicKey: Clone;
    /// Ciphertext type.
    type Ciphertext: Clone;

    /// Generate a fresh keypair, replacing any installed key.
    fn generate_key(&mut self, key_length: usize) -> Result<(), CryptoError>;

    /// The installed public key.
    fn public_key(&self) -> Option<&Self::PublicKey>;

    /// Install a public key received from the key holder.
    fn set_public_key(&mut self, public_key: Self::PublicKey);

    /// Encrypt one scalar.
    fn encrypt(&mut self, value: f64) -> Result<Self::Ciphertext, CryptoError>;

    /// Decrypt one scalar. Fails with [CryptoError::NoPrivateKey] without a private key.
    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<f64, CryptoError>;

    /// Encrypt a vector element-wise.
    fn encrypt_list(&mut self, values: &[f64]) -> Result<Vec<Self::Ciphertext>, CryptoError> {
        values.iter().map(|&v| self.encrypt(v)).collect()
    }

    /// Decrypt a vector element-wise.
    fn decrypt_list(&self, cts: &[Self::Ciphertext]) -> Result<Vec<f64>, CryptoError> {
        cts.iter().map(|c| self.decrypt(c)).collect()
    }
}

/// Paillier operator. Holds a private key only on the arbiter.
pub struct PaillierEncrypt<RNG: Rng + CryptoRng = AesRng> {
    public_key: Option<PaillierPublicKey>,
    private_key: Option<PaillierPrivateKey>,
    rng: RNG,
}

impl PaillierEncrypt<AesRng> {
    /// Operator without keys, using a freshly seeded [AesRng].
    pub fn new() -> Self {
        Self::with_rng(AesRng::new())
    }
}

impl Default for PaillierEncrypt<AesRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<RNG: Rng + CryptoRng> PaillierEncrypt<RNG> {
    /// Operator without keys using the given randomness source.
    pub fn with_rng(rng: RNG) -> Self {
        Self {
            public_key: None,
            private_key: None,
            rng,
        }
    }

    /// Public key or [CryptoError::NoPublicKey].
    pub fn key(&self) -> Result<&PaillierPublicKey, CryptoError> {
        self.public_key.as_ref().ok_or(CryptoError::NoPublicKey)
    }

    /// Whether this operator can decrypt.
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }
}

impl<RNG: Rng + CryptoRng> EncryptOperator for PaillierEncrypt<RNG> {
    type PublicKey = PaillierPublicKey;
    type Ciphertext = Ciphertext;

    fn generate_key(&mut self, key_length: usize) -> Result<(), CryptoError> {
        let (public_key, private_key) = generate_keypair(key_length, &mut self.rng);
        self.public_key = Some(public_key);
        self.private_key = Some(private_key);
        Ok(())
    }

    fn public_key(&self) -> Option<&PaillierPublicKey> {
        self.public_key.as_ref()
    }

    fn set_public_key(&mut self, public_key: PaillierPublicKey) {
        if let Some(sk) = &self.private_key {
            if sk.key_id() != public_key.key_id() {
                self.private_key = None;
            }
        }
        self.public_key = Some(public_key);
    }

    fn encrypt(&mut self, value: f64) -> Result<Ciphertext, CryptoError> {
        let pk = self.public_key.as_ref().ok_or(CryptoError::NoPublicKey)?;
        pk.encrypt(value, &mut self.rng)
    }

    fn decrypt(&self, ct: &Ciphertext) -> Result<f64, CryptoError> {
        let sk = self.private_key.as_ref().ok_or(CryptoError::NoPrivateKey)?;
        sk.decrypt(ct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_without_private_key() {
        let mut arbiter = PaillierEncrypt::new();
        arbiter.generate_key(MIN_KEY_LENGTH).unwrap();

        let mut guest = PaillierEncrypt::new();
        assert_eq!(guest.encrypt(1.0).unwrap_err(), CryptoError::NoPublicKey);

        guest.set_public_key(arbiter.public_key().unwrap().clone());
        let c = guest.encrypt(1.0).unwrap();

        assert_eq!(guest.decrypt(&c).unwrap_err(), CryptoError::NoPrivateKey);
        assert_eq!(arbiter.decrypt(&c).unwrap(), 1.0);
    }

    #[test]
    fn test_list_round_trip() {
        let mut op = PaillierEncrypt::new();
        op.generate_key(MIN_KEY_LENGTH).unwrap();

        for values in [vec![0.0; 4], vec![1.0, -2.0, 0.5], vec![]] {
            let cts = op.encrypt_list(&values).unwrap();
            assert_eq!(op.decrypt_list(&cts).unwrap(), values);
        }
    }

    #[test]
    fn test_vector_homomorphism() {
        let mut op = PaillierEncrypt::new();
        op.generate_key(MIN_KEY_LENGTH).unwrap();

        let a = [1.5, -4.0, 0.0];
        let b = [2.25, 1.0, -8.5];
        let c = -0.5;

        let ea = op.encrypt_list(&a).unwrap();
        let eb = op.encrypt_list(&b).unwrap();
        let pk = op.key().unwrap().clone();

        let sum = ea
            .iter()
            .zip(eb.iter())
            .map(|(x, y)| pk.add(x, y).unwrap())
            .collect::<Vec<_>>();
        let scaled = ea
            .iter()
            .map(|x| pk.mul_scalar(x, c).unwrap())
            .collect::<Vec<_>>();

        let expected_sum = a.iter().zip(b.iter()).map(|(x, y)| x + y).collect::<Vec<_>>();
        let expected_scaled = a.iter().map(|x| x * c).collect::<Vec<_>>();

        assert_eq!(op.decrypt_list(&sum).unwrap(), expected_sum);
        assert_eq!(op.decrypt_list(&scaled).unwrap(), expected_scaled);
    }
}
