//! Module about native channel of Rust. See [crossbeam].
//! This module provides a function to create a full mesh of crossbeam channels for a given number of parties.

use itertools::Itertools;
use scuttlebutt::SyncChannel;
pub mod crossbeam_wrapper;
use crossbeam_wrapper::cbch_pair;
pub use crossbeam_wrapper::{CrossbeamReceiver, CrossbeamSender};

type Channel = (usize, SyncChannel<CrossbeamReceiver, CrossbeamSender>);

/// Create a full mesh of crossbeam channels.
///
/// Entry `i` of the result holds party `i`'s channels, each tagged with the index of the peer.
pub fn create_crossbeam_channels(nparties: usize) -> Vec<Vec<Channel>> {
    let mut channels = (0..nparties)
        .map(|_| (0..nparties).map(|_| None).collect_vec())
        .collect_vec();

    for i in 0..nparties {
        for j in (i + 1)..nparties {
            let (sr, rl) = cbch_pair();
            let (sl, rr) = cbch_pair();
            let left = SyncChannel::new(rl, sl);
            let right = SyncChannel::new(rr, sr);
            channels[i][j] = Some((j, left));
            channels[j][i] = Some((i, right));
        }
    }

    channels
        .into_iter()
        .map(|cs| cs.into_iter().flatten().collect_vec())
        .collect_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::AbstractChannel;

    #[test]
    fn test_mesh() {
        let nparties = 3;
        let channels = create_crossbeam_channels(nparties);
        assert!(channels.iter().all(|cs| cs.len() == nparties - 1));

        let handles = channels
            .into_iter()
            .enumerate()
            .map(|(me, mut cs)| {
                std::thread::spawn(move || {
                    for (_, c) in cs.iter_mut() {
                        c.write_usize(me).unwrap();
                        c.flush().unwrap();
                    }
                    for (i, c) in cs.iter_mut() {
                        assert_eq!(c.read_usize().unwrap(), *i);
                    }
                })
            })
            .collect_vec();

        for h in handles {
            h.join().unwrap();
        }
    }
}
