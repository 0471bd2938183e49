//! Byte channels between the parties and the primitive codecs used by the transfer layer.
//!
//! Every party holds one [AbstractChannel] per peer. See [sync_channel], [tcp_channel] and
//! [sync_channel_by_cb] for the available transports.

use crate::encrypt::{Ciphertext, MIN_CIPHER_EXPONENT};
use crate::error::{CryptoError, DesyncError};
use anyhow::{Context, Result};
use num_bigint_dig::BigUint;
use scuttlebutt::AbstractChannel;

pub mod sync_channel;
pub mod sync_channel_by_cb;
pub mod tcp_channel;

/// Upper bound on the byte length of a single big integer on the wire.
pub const MAX_BIGUINT_BYTES: usize = 1 << 16;

/// Upper bound on the element count of a single vector on the wire.
pub const MAX_ITEMS: usize = 1 << 24;

/// Length-prefixed little-endian bytes of `v`.
pub fn write_biguint<C: AbstractChannel>(channel: &mut C, v: &BigUint) -> Result<()> {
    let bytes = v.to_bytes_le();

    channel
        .write_usize(bytes.len())
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    channel
        .write_bytes(&bytes)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    Ok(())
}

/// Inverse of [write_biguint].
pub fn read_biguint<C: AbstractChannel>(channel: &mut C) -> Result<BigUint> {
    let len = channel
        .read_usize()
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    if len > MAX_BIGUINT_BYTES {
        return Err(DesyncError::Malformed(format!("big integer of {} bytes", len)).into());
    }

    let mut bytes = vec![0u8; len];
    channel
        .read_bytes(&mut bytes)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    Ok(BigUint::from_bytes_le(&bytes))
}

/// Eight little-endian bytes.
pub fn write_u64<C: AbstractChannel>(channel: &mut C, v: u64) -> Result<()> {
    channel
        .write_bytes(&v.to_le_bytes())
        .with_context(|| format!("@{}:{}", file!(), line!()))
}

/// Inverse of [write_u64].
pub fn read_u64<C: AbstractChannel>(channel: &mut C) -> Result<u64> {
    let mut buf = [0u8; 8];
    channel
        .read_bytes(&mut buf)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    Ok(u64::from_le_bytes(buf))
}

/// IEEE-754 little-endian bytes.
pub fn write_f64<C: AbstractChannel>(channel: &mut C, v: f64) -> Result<()> {
    channel
        .write_bytes(&v.to_le_bytes())
        .with_context(|| format!("@{}:{}", file!(), line!()))
}

/// Inverse of [write_f64].
pub fn read_f64<C: AbstractChannel>(channel: &mut C) -> Result<f64> {
    let mut buf = [0u8; 8];
    channel
        .read_bytes(&mut buf)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    Ok(f64::from_le_bytes(buf))
}

/// Length-prefixed vector of floats.
pub fn write_vec_f64<C: AbstractChannel>(channel: &mut C, v: &[f64]) -> Result<usize> {
    let bytes = v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<_>>();

    let len = bytes.len();

    channel
        .write_usize(len)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    channel
        .write_bytes(&bytes)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    Ok(len)
}

/// Inverse of [write_vec_f64].
pub fn read_vec_f64<C: AbstractChannel>(channel: &mut C) -> Result<Vec<f64>> {
    let bytes_len = channel
        .read_usize()
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    if bytes_len % 8 != 0 || bytes_len / 8 > MAX_ITEMS {
        return Err(DesyncError::Malformed(format!("float vector of {} bytes", bytes_len)).into());
    }

    let mut res = vec![0u8; bytes_len];

    channel
        .read_bytes(&mut res)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    let res = res
        .chunks_exact(8)
        .map(|x| {
            let mut b = [0u8; 8];
            b.copy_from_slice(x);
            f64::from_le_bytes(b)
        })
        .collect();

    Ok(res)
}

/// `key fingerprint | exponent | group element`
pub fn write_ciphertext<C: AbstractChannel>(channel: &mut C, ct: &Ciphertext) -> Result<()> {
    write_u64(channel, ct.key_id())?;
    channel
        .write_bytes(&ct.exponent().to_le_bytes())
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    write_biguint(channel, ct.raw())
}

/// Inverse of [write_ciphertext]. The exponent is range checked here, the group element against
/// the key when first used.
pub fn read_ciphertext<C: AbstractChannel>(channel: &mut C) -> Result<Ciphertext> {
    let key_id = read_u64(channel)?;
    let mut buf = [0u8; 4];
    channel
        .read_bytes(&mut buf)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    let exponent = i32::from_le_bytes(buf);
    if !(MIN_CIPHER_EXPONENT..=0).contains(&exponent) {
        return Err(CryptoError::InvalidCiphertext)
            .with_context(|| format!("ciphertext exponent {}", exponent));
    }
    let c = read_biguint(channel)?;
    Ok(Ciphertext::from_parts(key_id, c, exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::{generate_keypair, MIN_KEY_LENGTH};
    use scuttlebutt::{AesRng, Channel};
    use std::io::{BufReader, BufWriter};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_write_read_primitives() {
        let mut rng = AesRng::new();
        let (pk, _sk) = generate_keypair(MIN_KEY_LENGTH, &mut rng);
        let ct = pk.encrypt(-2.75, &mut rng).unwrap();
        let n = pk.n().clone();

        let v = vec![0.5, -1.25, f64::MAX];
        let w = v.clone();
        let ct2 = ct.clone();
        let n2 = n.clone();

        let (sender, receiver) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = Channel::new(
                BufReader::new(sender.try_clone().unwrap()),
                BufWriter::new(sender),
            );

            channel.write_bytes(b"hello").unwrap();
            write_biguint(&mut channel, &n2).unwrap();
            write_vec_f64(&mut channel, &w).unwrap();
            write_ciphertext(&mut channel, &ct2).unwrap();
            write_u64(&mut channel, u64::MAX - 1).unwrap();
            channel.flush().unwrap();
        });

        let mut channel = Channel::new(
            BufReader::new(receiver.try_clone().unwrap()),
            BufWriter::new(receiver),
        );

        let mut buf = [0u8; 5];
        channel.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        assert_eq!(read_biguint(&mut channel).unwrap(), n);
        assert_eq!(read_vec_f64(&mut channel).unwrap(), v);
        assert_eq!(read_ciphertext(&mut channel).unwrap(), ct);
        assert_eq!(read_u64(&mut channel).unwrap(), u64::MAX - 1);

        handle.join().unwrap();
    }

    #[test]
    fn test_reject_oversized_and_malformed() {
        let mut rng = AesRng::new();
        let (pk, _sk) = generate_keypair(MIN_KEY_LENGTH, &mut rng);
        let raw = pk.encrypt(1.0, &mut rng).unwrap().raw().clone();

        let (sender, receiver) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = Channel::new(
                BufReader::new(sender.try_clone().unwrap()),
                BufWriter::new(sender),
            );

            channel.write_usize(1 << 63).unwrap();
            channel.write_usize((MAX_ITEMS + 1) * 8).unwrap();
            for exponent in [i32::MAX, 1, MIN_CIPHER_EXPONENT - 1] {
                write_u64(&mut channel, 7).unwrap();
                channel.write_bytes(&exponent.to_le_bytes()).unwrap();
                write_biguint(&mut channel, &raw).unwrap();
            }
            channel.flush().unwrap();
        });

        let mut channel = Channel::new(
            BufReader::new(receiver.try_clone().unwrap()),
            BufWriter::new(receiver),
        );

        for _ in 0..2 {
            let err = read_vec_f64(&mut channel).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DesyncError>(),
                Some(DesyncError::Malformed(_))
            ));
        }
        for _ in 0..3 {
            let err = read_ciphertext(&mut channel).unwrap_err();
            assert_eq!(
                err.downcast_ref::<CryptoError>(),
                Some(&CryptoError::InvalidCiphertext)
            );
            // the group element is left unread on rejection
            read_biguint(&mut channel).unwrap();
        }

        handle.join().unwrap();
    }
}
