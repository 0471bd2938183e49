//! Heterogeneous (vertically partitioned) logistic regression over Paillier.
//!
//! Three roles train one model without revealing features or labels:
//!
//! - [Arbiter] holds the private key, decrypts gradients and losses, runs the optimizer and decides
//!   when to stop.
//! - [Guest] holds the labels and part of the features. It plans the mini-batches and assembles
//!   the encrypted forward values, fore-gradient and loss.
//! - [Host] holds the remaining features.
//!
//! For each `(iteration, batch)`:
//!
//! 1. guest and host encrypt their partial $`w^\top x`$ and $`(w^\top x)^2`$; the host sends its part
//!    to the guest, which combines them with
//!    $`(a + b)^2 = a^2 + b^2 + 2ab`$,
//! 2. the guest sends the encrypted fore-gradient $`[[d]]`$ to the host,
//! 3. both send their encrypted gradient slice to the arbiter, which decrypts the concatenation
//!    (host first), optimizes and returns each party's plaintext delta,
//! 4. the guest sends the encrypted loss, the arbiter decrypts it and broadcasts `is_stopped`.
//!
//! Every role is a [RoleMachine]: an explicit state enum whose [RoleMachine::expects] names the
//! messages the current state waits for and whose [RoleMachine::advance] consumes them and returns
//! what to send. [drive] connects a machine to a [Transfer].

use crate::error::DesyncError;
use crate::feature::DataInstance;
use crate::table::Table;
use crate::transfer::{Payload, Role, Tag, Transfer, TransferName};
use anyhow::{Context, Result};
use std::fmt::Display;

pub mod arbiter;
pub mod bin;
pub mod guest;
pub mod host;

pub use arbiter::Arbiter;
pub use bin::run;
pub use guest::{Guest, PredictResult};
pub use host::Host;

/// A message a state waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expect {
    /// Transfer variable.
    pub name: TransferName,
    /// Tag.
    pub tag: Tag,
    /// Sender.
    pub src: Role,
}

impl Display for Expect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} from {}", self.name, self.tag, self.src)
    }
}

/// A received message.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Transfer variable.
    pub name: TransferName,
    /// Tag.
    pub tag: Tag,
    /// Sender.
    pub src: Role,
    /// Body.
    pub payload: Payload,
}

/// A message to send.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    /// Transfer variable.
    pub name: TransferName,
    /// Tag.
    pub tag: Tag,
    /// Receiver.
    pub dst: Role,
    /// Body.
    pub payload: Payload,
}

impl Outbound {
    pub(crate) fn new(name: TransferName, tag: Tag, dst: Role, payload: Payload) -> Self {
        Self {
            name,
            tag,
            dst,
            payload,
        }
    }
}

/// Protocol state machine of one role.
pub trait RoleMachine {
    /// Own role.
    fn role(&self) -> Role;

    /// Messages the current state needs, in the order they are consumed.
    fn expects(&self) -> Vec<Expect>;

    /// Consume the expected messages, move to the next state and return what to send.
    fn advance(&mut self, inbound: Vec<Inbound>) -> Result<Vec<Outbound>>;

    /// Whether the machine reached its final state.
    fn is_done(&self) -> bool;
}

/// Run `machine` to completion over `transfer`.
pub fn drive<M, T>(machine: &mut M, transfer: &mut T) -> Result<()>
where
    M: RoleMachine + ?Sized,
    T: Transfer + ?Sized,
{
    while !machine.is_done() {
        let inbound = machine
            .expects()
            .into_iter()
            .map(|e| {
                let payload = transfer.get(e.name, e.tag, e.src)?;
                Ok(Inbound {
                    name: e.name,
                    tag: e.tag,
                    src: e.src,
                    payload,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let outbound = machine
            .advance(inbound)
            .with_context(|| format!("{} failed @{}:{}", machine.role(), file!(), line!()))?;

        for o in outbound {
            transfer.remote(&o.payload, o.name, o.tag, o.dst)?;
        }
    }

    Ok(())
}

/// Check `inbound` against `expects` and return the payloads in order.
pub(crate) fn receive<const N: usize>(
    role: Role,
    expects: &[Expect],
    inbound: Vec<Inbound>,
) -> Result<[Payload; N], DesyncError> {
    let fmt_list = |v: Vec<String>| format!("[{}]", v.join(", "));

    let matches = expects.len() == N
        && inbound.len() == N
        && expects
            .iter()
            .zip(inbound.iter())
            .all(|(e, i)| e.name == i.name && e.tag == i.tag && e.src == i.src);

    if !matches {
        return Err(DesyncError::UnexpectedMessage {
            role: role.to_string(),
            expected: fmt_list(expects.iter().map(|e| e.to_string()).collect()),
            actual: fmt_list(
                inbound
                    .iter()
                    .map(|i| format!("{} {} from {}", i.name, i.tag, i.src))
                    .collect(),
            ),
        });
    }

    let payloads = inbound.into_iter().map(|i| i.payload).collect::<Vec<_>>();
    payloads
        .try_into()
        .map_err(|_: Vec<Payload>| DesyncError::UnexpectedMessage {
            role: role.to_string(),
            expected: format!("{} messages", N),
            actual: "a different count".to_string(),
        })
}

/// Tag of `(n_iter, batch_index)`.
pub fn batch_tag(n_iter: usize, batch_index: usize) -> Tag {
    Tag::Batch {
        n_iter,
        batch_index,
    }
}

/// The batch following `(n_iter, batch_index)`, `None` once `max_iter` iterations are done.
///
/// All three roles walk the same cursor, so they leave the loops together.
pub fn next_batch(
    n_iter: usize,
    batch_index: usize,
    batch_num: usize,
    max_iter: usize,
) -> Option<(usize, usize)> {
    if batch_index + 1 < batch_num {
        Some((n_iter, batch_index + 1))
    } else if n_iter + 1 < max_iter {
        Some((n_iter + 1, 0))
    } else {
        None
    }
}

/// Result of a training run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainOutcome {
    /// Whether the convergence predicate fired before `max_iter`.
    pub converged: bool,
    /// Number of iterations entered.
    pub n_iter: usize,
}

/// Local part of the model.
#[derive(Clone, Debug, PartialEq)]
pub struct LogisticWeights {
    /// Feature weights.
    pub coef: Vec<f64>,
    /// Intercept, always zero on the host.
    pub intercept: f64,
    /// Whether `intercept` is learned.
    pub fit_intercept: bool,
}

impl LogisticWeights {
    /// Split an initial vector, whose last entry is the intercept when `fit_intercept`.
    pub fn from_init(mut weights: Vec<f64>, fit_intercept: bool) -> Self {
        let intercept = if fit_intercept {
            weights.pop().unwrap_or(0.0)
        } else {
            0.0
        };
        Self {
            coef: weights,
            intercept,
            fit_intercept,
        }
    }

    /// Number of entries in the gradient of this party.
    pub fn gradient_len(&self) -> usize {
        self.coef.len() + self.fit_intercept as usize
    }
}

/// Plaintext $`w^\top x + b`$ per row.
pub fn compute_wx(data: &Table<DataInstance>, weights: &LogisticWeights) -> Result<Table<f64>> {
    data.try_map_values(|inst| {
        Ok::<_, crate::error::ShapeError>(inst.features.dot(&weights.coef)? + weights.intercept)
    })
    .with_context(|| format!("@{}:{}", file!(), line!()))
}

/// Feature count shared by every row.
pub(crate) fn feature_dim(data: &Table<DataInstance>) -> Result<usize> {
    let mut shapes = data.iter().map(|(_, inst)| inst.features.shape());
    let dim = shapes.next().unwrap_or(0);
    if let Some(other) = shapes.find(|s| *s != dim) {
        return Err(crate::error::ShapeError::DimensionMismatch {
            expected: dim,
            actual: other,
        }
        .into());
    }
    Ok(dim)
}
