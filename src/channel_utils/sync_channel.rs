//! Module about unix domain socket channel. See [UnixStream].
//! This module provides a function to create a full mesh of unix domain socket channels.

use anyhow::{Context, Result};
use itertools::Itertools;
use scuttlebutt::SyncChannel;
use std::{
    io::{BufReader, BufWriter},
    os::unix::net::UnixStream,
};

type Channel = (
    usize,
    SyncChannel<BufReader<UnixStream>, BufWriter<UnixStream>>,
);

/// Create a full mesh of unix domain socket channels. See [UnixStream].
///
/// Entry `i` of the result holds party `i`'s channels, each tagged with the index of the peer.
pub fn create_unix_channels(nparties: usize) -> Result<Vec<Vec<Channel>>> {
    let mut channels = (0..nparties)
        .map(|_| (0..nparties).map(|_| None).collect_vec())
        .collect_vec();

    for i in 0..nparties {
        for j in (i + 1)..nparties {
            let (s, r) = UnixStream::pair().with_context(|| format!("@{}:{}", file!(), line!()))?;
            let rs = s
                .try_clone()
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            let rr = r
                .try_clone()
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            let left = SyncChannel::new(BufReader::new(rs), BufWriter::new(s));
            let right = SyncChannel::new(BufReader::new(rr), BufWriter::new(r));
            channels[i][j] = Some((j, left));
            channels[j][i] = Some((i, right));
        }
    }

    let channels = channels
        .into_iter()
        .map(|cs| cs.into_iter().flatten().collect_vec())
        .collect_vec();

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::AbstractChannel;

    #[test]
    fn test_unix_mesh() {
        let mut channels = create_unix_channels(3).unwrap();
        let mut host = channels.pop().unwrap();
        let mut guest = channels.pop().unwrap();

        // guest (1) -> host (2)
        let (peer, c) = &mut guest[1];
        assert_eq!(*peer, 2);
        c.write_usize(42).unwrap();
        c.flush().unwrap();

        let (peer, c) = &mut host[1];
        assert_eq!(*peer, 1);
        assert_eq!(c.read_usize().unwrap(), 42);
    }
}
