//! Values exchanged between the roles and their wire encoding.

use crate::channel_utils::{
    read_biguint, read_ciphertext, read_f64, read_u64, read_vec_f64, write_biguint,
    write_ciphertext, write_f64, write_u64, write_vec_f64, MAX_ITEMS,
};
use crate::encrypt::{Ciphertext, PaillierPublicKey};
use crate::error::DesyncError;
use crate::feature::RowId;
use crate::transfer::TransferName;
use anyhow::{Context, Result};
use scuttlebutt::AbstractChannel;

/// Message body.
///
/// Every variant is either ciphertext or a non-sensitive control value: batch metadata, flags,
/// the public key and the arbiter's plaintext optimizer outputs.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Public key of the arbiter.
    PublicKey(PaillierPublicKey),
    /// Batch metadata announced by the guest.
    BatchInfo {
        /// Effective batch size.
        batch_size: usize,
        /// Number of batches per iteration.
        batch_num: usize,
    },
    /// Row ids of one batch.
    BatchIndex(Vec<RowId>),
    /// Host's `([[wx]], [[wx^2]])` per row.
    HostForward(Vec<(RowId, Ciphertext, Ciphertext)>),
    /// One ciphertext per row.
    CipherRows(Vec<(RowId, Ciphertext)>),
    /// Encrypted vector.
    CipherVector(Vec<Ciphertext>),
    /// Encrypted scalar.
    Cipher(Ciphertext),
    /// Plaintext vector.
    PlainVector(Vec<f64>),
    /// One plaintext score per row.
    PlainRows(Vec<(RowId, f64)>),
    /// Boolean flag.
    Flag(bool),
}

macro_rules! payload_accessor {
    ($fn:ident, $variant:ident, $t:ty) => {
        #[doc = concat!("Unwrap a [Payload::", stringify!($variant), "].")]
        pub fn $fn(self, name: TransferName) -> Result<$t, DesyncError> {
            match self {
                Payload::$variant(v) => Ok(v),
                other => Err(other.mismatch(name, stringify!($variant))),
            }
        }
    };
}

impl Payload {
    /// Variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::PublicKey(_) => "PublicKey",
            Payload::BatchInfo { .. } => "BatchInfo",
            Payload::BatchIndex(_) => "BatchIndex",
            Payload::HostForward(_) => "HostForward",
            Payload::CipherRows(_) => "CipherRows",
            Payload::CipherVector(_) => "CipherVector",
            Payload::Cipher(_) => "Cipher",
            Payload::PlainVector(_) => "PlainVector",
            Payload::PlainRows(_) => "PlainRows",
            Payload::Flag(_) => "Flag",
        }
    }

    fn code(&self) -> usize {
        match self {
            Payload::PublicKey(_) => 0,
            Payload::BatchInfo { .. } => 1,
            Payload::BatchIndex(_) => 2,
            Payload::HostForward(_) => 3,
            Payload::CipherRows(_) => 4,
            Payload::CipherVector(_) => 5,
            Payload::Cipher(_) => 6,
            Payload::PlainVector(_) => 7,
            Payload::PlainRows(_) => 8,
            Payload::Flag(_) => 9,
        }
    }

    fn mismatch(&self, name: TransferName, expected: &str) -> DesyncError {
        DesyncError::UnexpectedPayload {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: self.kind().to_string(),
        }
    }

    payload_accessor!(into_public_key, PublicKey, PaillierPublicKey);
    payload_accessor!(into_batch_index, BatchIndex, Vec<RowId>);
    payload_accessor!(into_host_forward, HostForward, Vec<(RowId, Ciphertext, Ciphertext)>);
    payload_accessor!(into_cipher_rows, CipherRows, Vec<(RowId, Ciphertext)>);
    payload_accessor!(into_cipher_vector, CipherVector, Vec<Ciphertext>);
    payload_accessor!(into_cipher, Cipher, Ciphertext);
    payload_accessor!(into_plain_vector, PlainVector, Vec<f64>);
    payload_accessor!(into_plain_rows, PlainRows, Vec<(RowId, f64)>);
    payload_accessor!(into_flag, Flag, bool);

    /// Unwrap a [Payload::BatchInfo] as `(batch_size, batch_num)`.
    pub fn into_batch_info(self, name: TransferName) -> Result<(usize, usize), DesyncError> {
        match self {
            Payload::BatchInfo {
                batch_size,
                batch_num,
            } => Ok((batch_size, batch_num)),
            other => Err(other.mismatch(name, "BatchInfo")),
        }
    }

    /// Variant code followed by the body.
    pub fn write<C: AbstractChannel>(&self, channel: &mut C) -> Result<()> {
        channel
            .write_usize(self.code())
            .with_context(|| format!("@{}:{}", file!(), line!()))?;

        match self {
            Payload::PublicKey(pk) => write_biguint(channel, pk.n())?,
            Payload::BatchInfo {
                batch_size,
                batch_num,
            } => {
                channel.write_usize(*batch_size)?;
                channel.write_usize(*batch_num)?;
            }
            Payload::BatchIndex(ids) => {
                channel.write_usize(ids.len())?;
                for id in ids {
                    write_u64(channel, *id)?;
                }
            }
            Payload::HostForward(rows) => {
                channel.write_usize(rows.len())?;
                for (id, wx, wx2) in rows {
                    write_u64(channel, *id)?;
                    write_ciphertext(channel, wx)?;
                    write_ciphertext(channel, wx2)?;
                }
            }
            Payload::CipherRows(rows) => {
                channel.write_usize(rows.len())?;
                for (id, ct) in rows {
                    write_u64(channel, *id)?;
                    write_ciphertext(channel, ct)?;
                }
            }
            Payload::CipherVector(cts) => {
                channel.write_usize(cts.len())?;
                for ct in cts {
                    write_ciphertext(channel, ct)?;
                }
            }
            Payload::Cipher(ct) => write_ciphertext(channel, ct)?,
            Payload::PlainVector(v) => {
                write_vec_f64(channel, v)?;
            }
            Payload::PlainRows(rows) => {
                channel.write_usize(rows.len())?;
                for (id, v) in rows {
                    write_u64(channel, *id)?;
                    write_f64(channel, *v)?;
                }
            }
            Payload::Flag(b) => channel.write_usize(*b as usize)?,
        }

        Ok(())
    }

    /// Inverse of [Payload::write].
    pub fn read<C: AbstractChannel>(channel: &mut C) -> Result<Self> {
        let code = channel
            .read_usize()
            .with_context(|| format!("@{}:{}", file!(), line!()))?;

        let payload = match code {
            0 => Payload::PublicKey(
                PaillierPublicKey::from_modulus(read_biguint(channel)?)
                    .with_context(|| format!("@{}:{}", file!(), line!()))?,
            ),
            1 => Payload::BatchInfo {
                batch_size: channel.read_usize()?,
                batch_num: channel.read_usize()?,
            },
            2 => {
                let len = read_len(channel)?;
                Payload::BatchIndex((0..len).map(|_| read_u64(channel)).collect::<Result<_>>()?)
            }
            3 => {
                let len = read_len(channel)?;
                let rows = (0..len)
                    .map(|_| {
                        Ok((
                            read_u64(channel)?,
                            read_ciphertext(channel)?,
                            read_ciphertext(channel)?,
                        ))
                    })
                    .collect::<Result<_>>()?;
                Payload::HostForward(rows)
            }
            4 => {
                let len = read_len(channel)?;
                let rows = (0..len)
                    .map(|_| Ok((read_u64(channel)?, read_ciphertext(channel)?)))
                    .collect::<Result<_>>()?;
                Payload::CipherRows(rows)
            }
            5 => {
                let len = read_len(channel)?;
                let cts = (0..len)
                    .map(|_| read_ciphertext(channel))
                    .collect::<Result<_>>()?;
                Payload::CipherVector(cts)
            }
            6 => Payload::Cipher(read_ciphertext(channel)?),
            7 => Payload::PlainVector(read_vec_f64(channel)?),
            8 => {
                let len = read_len(channel)?;
                let rows = (0..len)
                    .map(|_| Ok((read_u64(channel)?, read_f64(channel)?)))
                    .collect::<Result<_>>()?;
                Payload::PlainRows(rows)
            }
            9 => match channel.read_usize()? {
                0 => Payload::Flag(false),
                1 => Payload::Flag(true),
                b => return Err(DesyncError::Malformed(format!("flag value {}", b)).into()),
            },
            _ => return Err(DesyncError::Malformed(format!("payload code {}", code)).into()),
        };

        Ok(payload)
    }
}

fn read_len<C: AbstractChannel>(channel: &mut C) -> Result<usize> {
    let len = channel
        .read_usize()
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    if len > MAX_ITEMS {
        return Err(DesyncError::Malformed(format!("payload of {} items", len)).into());
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::{generate_keypair, MIN_KEY_LENGTH};
    use crate::error::CryptoError;
    use num_bigint_dig::BigUint;
    use scuttlebutt::{AesRng, Channel};
    use std::io::{BufReader, BufWriter};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_read_public_key() {
        let mut rng = AesRng::new();
        let (pk, _sk) = generate_keypair(MIN_KEY_LENGTH, &mut rng);
        let sent = Payload::PublicKey(pk);
        let expected = sent.clone();

        let (sender, receiver) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = Channel::new(
                BufReader::new(sender.try_clone().unwrap()),
                BufWriter::new(sender),
            );
            for n in [0u32, 1] {
                channel.write_usize(0).unwrap();
                write_biguint(&mut channel, &BigUint::from(n)).unwrap();
            }
            sent.write(&mut channel).unwrap();
            channel.flush().unwrap();
        });

        let mut channel = Channel::new(
            BufReader::new(receiver.try_clone().unwrap()),
            BufWriter::new(receiver),
        );
        for _ in 0..2 {
            let err = Payload::read(&mut channel).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CryptoError>(),
                Some(CryptoError::InvalidPublicKey { .. })
            ));
        }
        assert_eq!(Payload::read(&mut channel).unwrap(), expected);

        handle.join().unwrap();
    }

    #[test]
    fn test_accessors() {
        assert!(Payload::Flag(true).into_flag(TransferName::IsStopped).unwrap());
        assert_eq!(
            Payload::BatchInfo {
                batch_size: 3,
                batch_num: 1
            }
            .into_batch_info(TransferName::BatchInfo)
            .unwrap(),
            (3, 1)
        );

        let err = Payload::Flag(true)
            .into_plain_vector(TransferName::GuestOptimGradient)
            .unwrap_err();
        assert_eq!(
            err,
            DesyncError::UnexpectedPayload {
                name: "guest_optim_gradient".to_string(),
                expected: "PlainVector".to_string(),
                actual: "Flag".to_string(),
            }
        );
    }
}
