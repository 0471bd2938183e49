//! Tagged point-to-point messaging between the three roles.
//!
//! A message is identified by its transfer variable [TransferName] and a [Tag]. Every
//! `(name, tag)` pair has exactly one producer and one consumer per direction and is delivered
//! exactly once. [Federation] implements [Transfer] over one [AbstractChannel] per peer:
//!
//! ```text
//! frame = name (usize) | tag kind, a, b (usize x 3) | payload code (usize) | body
//! ```
//!
//! Frames that arrive ahead of the one being awaited are buffered per peer; seeing the same key
//! twice is a [DesyncError::Duplicate].

use crate::error::DesyncError;
use anyhow::{Context, Result};
use scuttlebutt::AbstractChannel;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use tracing::{debug, trace};

pub mod payload;
pub use payload::Payload;

/// Participant roles. Each role has exactly one party.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Key holder and optimizer.
    Arbiter,
    /// Label holder.
    Guest,
    /// Feature-only party.
    Host,
}

impl Role {
    /// Party index used by the channel constructors.
    pub fn index(&self) -> usize {
        match self {
            Role::Arbiter => 0,
            Role::Guest => 1,
            Role::Host => 2,
        }
    }

    /// Inverse of [Role::index].
    pub fn from_index(i: usize) -> Result<Self, DesyncError> {
        match i {
            0 => Ok(Role::Arbiter),
            1 => Ok(Role::Guest),
            2 => Ok(Role::Host),
            _ => Err(DesyncError::NoChannel(format!("party {}", i))),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Arbiter => write!(f, "arbiter"),
            Role::Guest => write!(f, "guest"),
            Role::Host => write!(f, "host"),
        }
    }
}

/// Transfer variables of the training and prediction protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransferName {
    /// Arbiter to guest and host.
    PaillierPubkey,
    /// Guest to arbiter and host.
    BatchInfo,
    /// Guest to host, first iteration only.
    BatchDataIndex,
    /// Host to guest.
    HostForward,
    /// Guest to host.
    ForeGradient,
    /// Host to arbiter.
    HostGradient,
    /// Guest to arbiter.
    GuestGradient,
    /// Arbiter to host.
    HostOptimGradient,
    /// Arbiter to guest.
    GuestOptimGradient,
    /// Host to guest, only with a penalty.
    HostLossRegular,
    /// Guest to arbiter.
    Loss,
    /// Arbiter to guest and host.
    IsStopped,
    /// Host to guest, prediction.
    HostProb,
}

const TRANSFER_NAMES: [TransferName; 13] = [
    TransferName::PaillierPubkey,
    TransferName::BatchInfo,
    TransferName::BatchDataIndex,
    TransferName::HostForward,
    TransferName::ForeGradient,
    TransferName::HostGradient,
    TransferName::GuestGradient,
    TransferName::HostOptimGradient,
    TransferName::GuestOptimGradient,
    TransferName::HostLossRegular,
    TransferName::Loss,
    TransferName::IsStopped,
    TransferName::HostProb,
];

impl TransferName {
    fn code(&self) -> usize {
        *self as usize
    }

    fn from_code(code: usize) -> Result<Self, DesyncError> {
        TRANSFER_NAMES
            .get(code)
            .copied()
            .ok_or_else(|| DesyncError::Malformed(format!("transfer name code {}", code)))
    }
}

impl Display for TransferName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferName::PaillierPubkey => "paillier_pubkey",
            TransferName::BatchInfo => "batch_info",
            TransferName::BatchDataIndex => "batch_data_index",
            TransferName::HostForward => "host_forward_dict",
            TransferName::ForeGradient => "fore_gradient",
            TransferName::HostGradient => "host_gradient",
            TransferName::GuestGradient => "guest_gradient",
            TransferName::HostOptimGradient => "host_optim_gradient",
            TransferName::GuestOptimGradient => "guest_optim_gradient",
            TransferName::HostLossRegular => "host_loss_regular",
            TransferName::Loss => "loss",
            TransferName::IsStopped => "is_stopped",
            TransferName::HostProb => "host_prob",
        };
        write!(f, "{}", s)
    }
}

/// Message tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// Sent once per training run.
    Once,
    /// Sent once per prediction flow.
    Flow(usize),
    /// Sent once per `(iteration, batch)`.
    Batch {
        /// Iteration index.
        n_iter: usize,
        /// Batch index within the iteration.
        batch_index: usize,
    },
}

impl Tag {
    fn encode(&self) -> [usize; 3] {
        match *self {
            Tag::Once => [0, 0, 0],
            Tag::Flow(id) => [1, id, 0],
            Tag::Batch {
                n_iter,
                batch_index,
            } => [2, n_iter, batch_index],
        }
    }

    fn decode(v: [usize; 3]) -> Result<Self, DesyncError> {
        match v {
            [0, 0, 0] => Ok(Tag::Once),
            [1, id, 0] => Ok(Tag::Flow(id)),
            [2, n_iter, batch_index] => Ok(Tag::Batch {
                n_iter,
                batch_index,
            }),
            _ => Err(DesyncError::Malformed(format!("tag {:?}", v))),
        }
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::Once => write!(f, "once"),
            Tag::Flow(id) => write!(f, "flow.{}", id),
            Tag::Batch {
                n_iter,
                batch_index,
            } => write!(f, "{}.{}", n_iter, batch_index),
        }
    }
}

/// Reliable tagged delivery between roles.
pub trait Transfer {
    /// Send `payload` as `(name, tag)` to `dst`.
    fn remote(&mut self, payload: &Payload, name: TransferName, tag: Tag, dst: Role) -> Result<()>;

    /// Block until `(name, tag)` from `src` is available.
    fn get(&mut self, name: TransferName, tag: Tag, src: Role) -> Result<Payload>;
}

type Key = (Role, TransferName, Tag);

fn duplicate((peer, name, tag): Key) -> DesyncError {
    DesyncError::Duplicate {
        name: name.to_string(),
        tag: tag.to_string(),
        peer: peer.to_string(),
    }
}

/// [Transfer] over one byte channel per peer.
pub struct Federation<C: AbstractChannel> {
    me: Role,
    channels: HashMap<Role, C>,
    pending: HashMap<Key, Payload>,
    delivered: HashSet<Key>,
    sent: HashSet<Key>,
}

impl<C: AbstractChannel> Federation<C> {
    /// Wrap the channels of party `me`, each tagged with the peer's party index.
    pub fn new(me: Role, channels: Vec<(usize, C)>) -> Result<Self> {
        let channels = channels
            .into_iter()
            .map(|(i, c)| Ok((Role::from_index(i)?, c)))
            .collect::<Result<HashMap<_, _>, DesyncError>>()
            .with_context(|| format!("@{}:{}", file!(), line!()))?;

        Ok(Self {
            me,
            channels,
            pending: HashMap::new(),
            delivered: HashSet::new(),
            sent: HashSet::new(),
        })
    }

    /// Own role.
    pub fn me(&self) -> Role {
        self.me
    }

    fn channel(&mut self, peer: Role) -> Result<&mut C, DesyncError> {
        self.channels
            .get_mut(&peer)
            .ok_or_else(|| DesyncError::NoChannel(peer.to_string()))
    }
}

/// Write one frame and flush.
pub fn write_frame<C: AbstractChannel>(
    channel: &mut C,
    name: TransferName,
    tag: Tag,
    payload: &Payload,
) -> Result<()> {
    channel
        .write_usize(name.code())
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    for v in tag.encode() {
        channel
            .write_usize(v)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
    }
    payload.write(channel)?;
    channel
        .flush()
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    Ok(())
}

/// Read one frame.
pub fn read_frame<C: AbstractChannel>(channel: &mut C) -> Result<(TransferName, Tag, Payload)> {
    let name = channel
        .read_usize()
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    let name = TransferName::from_code(name)?;

    let mut tag = [0usize; 3];
    for v in tag.iter_mut() {
        *v = channel
            .read_usize()
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
    }
    let tag = Tag::decode(tag)?;

    let payload = Payload::read(channel)?;

    Ok((name, tag, payload))
}

impl<C: AbstractChannel> Transfer for Federation<C> {
    fn remote(&mut self, payload: &Payload, name: TransferName, tag: Tag, dst: Role) -> Result<()> {
        let key = (dst, name, tag);
        if self.sent.contains(&key) {
            return Err(duplicate(key).into());
        }

        trace!(%name, %tag, peer = %dst, kind = payload.kind(), "remote");
        let channel = self.channel(dst)?;
        write_frame(channel, name, tag, payload)
            .with_context(|| format!("sending {} {} to {}", name, tag, dst))?;

        self.sent.insert(key);
        Ok(())
    }

    fn get(&mut self, name: TransferName, tag: Tag, src: Role) -> Result<Payload> {
        let key = (src, name, tag);
        if self.delivered.contains(&key) {
            return Err(duplicate(key).into());
        }

        if let Some(payload) = self.pending.remove(&key) {
            self.delivered.insert(key);
            return Ok(payload);
        }

        loop {
            let channel = self.channel(src)?;
            let (n, t, payload) = read_frame(channel)
                .with_context(|| format!("waiting for {} {} from {}", name, tag, src))?;
            let got = (src, n, t);

            if self.delivered.contains(&got) || self.pending.contains_key(&got) {
                return Err(duplicate(got).into());
            }

            if got == key {
                trace!(%name, %tag, peer = %src, kind = payload.kind(), "get");
                self.delivered.insert(key);
                return Ok(payload);
            }

            debug!(name = %n, tag = %t, peer = %src, "buffering early frame");
            self.pending.insert(got, payload);
        }
    }
}
