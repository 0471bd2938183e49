//! Module about tcp channel. See [TcpStream].
//! This module provides functions to connect the parties over localhost tcp streams.
//!
//! Party `me` listens on `base_port + me`, dials every party with a smaller index and accepts
//! connections from every party with a larger one.

use anyhow::{anyhow, Context, Result};
use scuttlebutt::SyncChannel;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::sleep;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

type Channel = (
    usize,
    SyncChannel<BufReader<TcpStream>, BufWriter<TcpStream>>,
);

fn exchange_index(stream: &mut TcpStream, me: usize, dial: bool) -> Result<usize> {
    let m = me.to_be_bytes();
    let mut buf = [0u8; 8];

    if dial {
        stream
            .write_all(&m)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        stream
            .read_exact(&mut buf)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
    } else {
        stream
            .read_exact(&mut buf)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        stream
            .write_all(&m)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
    }

    Ok(usize::from_be_bytes(buf))
}

/// Channels of party `me`, sorted by peer index.
pub fn create_tcp_channels_for_party(
    nparties: usize,
    base_port: usize,
    me: usize,
) -> Result<Vec<Channel>> {
    let addr = SocketAddr::from(([127, 0, 0, 1], (base_port + me) as _));
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("me={} addr={} @{}:{}", me, addr, file!(), line!()))?;

    sleep(Duration::from_millis(100 * me as u64));

    let mut streams = (0..me)
        .map(|i| {
            let port = base_port + i;
            let addr = SocketAddr::from(([127, 0, 0, 1], port as _));
            let mut stream = TcpStream::connect_timeout(&addr, TIMEOUT)
                .with_context(|| format!("me={} addr={} @{}:{}", me, addr, file!(), line!()))?;
            let m = exchange_index(&mut stream, me, true)?;
            Ok((m, stream))
        })
        .collect::<Result<Vec<(usize, TcpStream)>>>()?;

    let recv_streams = listener
        .incoming()
        .take(nparties - 1 - me)
        .map(|s| {
            let mut s = s.with_context(|| format!("@{}:{}", file!(), line!()))?;
            let m = exchange_index(&mut s, me, false)?;
            Ok((m, s))
        })
        .collect::<Result<Vec<_>>>()?;

    streams.extend(recv_streams);

    streams.sort_by(|a, b| a.0.cmp(&b.0));

    let res = streams
        .into_iter()
        .map(|(m, s)| {
            s.set_nodelay(true)
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            let ss = s
                .try_clone()
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            Ok((m, SyncChannel::new(BufReader::new(ss), BufWriter::new(s))))
        })
        .collect::<Result<Vec<Channel>>>()?;

    Ok(res)
}

/// Connect all parties on localhost.
///
/// Entry `i` of the result holds party `i`'s channels, each tagged with the index of the peer.
pub fn create_tcp_channels(nparties: usize, port: usize) -> Result<Vec<Vec<Channel>>> {
    let handles = (0..nparties)
        .map(|me| std::thread::spawn(move || create_tcp_channels_for_party(nparties, port, me)))
        .collect::<Vec<_>>();

    let channels = handles
        .into_iter()
        .map(|h| {
            h.join()
                .map_err(|_| anyhow!("channel setup thread panicked @{}:{}", file!(), line!()))?
        })
        .collect::<Result<Vec<Vec<Channel>>>>()?;

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::AbstractChannel;

    fn test_nparty(nparties: usize, base_port: usize) {
        let handles = (1..nparties)
            .map(|me| {
                std::thread::spawn(move || {
                    let mut channels =
                        create_tcp_channels_for_party(nparties, base_port, me).unwrap();

                    for (i, c) in channels.iter_mut() {
                        let i = *i;
                        if i < me {
                            c.write_usize(me).unwrap();
                            c.flush().unwrap();
                            let m = c.read_usize().unwrap();
                            assert_eq!(m, i);
                        } else if i > me {
                            let m = c.read_usize().unwrap();
                            assert_eq!(m, i);
                            c.write_usize(me).unwrap();
                            c.flush().unwrap();
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut channels = create_tcp_channels_for_party(nparties, base_port, 0).unwrap();

        for (i, c) in channels.iter_mut() {
            let i = *i;
            let m = c.read_usize().unwrap();
            assert_eq!(m, i);
            c.write_usize(0).unwrap();
            c.flush().unwrap();
        }

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_2party() {
        test_nparty(2, 10000);
    }

    #[test]
    fn test_3party() {
        test_nparty(3, 5000);
    }

    #[test]
    fn test_create_tcp_channels() {
        let channels = create_tcp_channels(3, 25000).unwrap();
        assert_eq!(channels.len(), 3);
        for (me, cs) in channels.iter().enumerate() {
            let peers = cs.iter().map(|(i, _)| *i).collect::<Vec<_>>();
            let expected = (0..3).filter(|i| *i != me).collect::<Vec<_>>();
            assert_eq!(peers, expected);
        }
    }
}
