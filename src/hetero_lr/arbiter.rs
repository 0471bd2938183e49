//! Arbiter: key holder, optimizer and convergence judge.

use super::{
    batch_tag, next_batch, receive, Expect, Inbound, Outbound, RoleMachine, TrainOutcome,
};
use crate::encrypt::{EncryptOperator, PaillierEncrypt};
use crate::error::DesyncError;
use crate::optim::convergence::{converge_func_factory, ConvergeFunction};
use crate::optim::federated_aggregator::{aggregate, separate};
use crate::optim::Optimizer;
use crate::param::LogisticParams;
use crate::transfer::{Payload, Role, Tag, Transfer, TransferName};
use anyhow::{anyhow, Result};
use tracing::{debug, info, warn, Span};

enum State {
    Init,
    AwaitingBatchInfo,
    AwaitingGradients { n_iter: usize, batch_index: usize },
    AwaitingLoss { n_iter: usize, batch_index: usize },
    Done(TrainOutcome),
    Failed,
}

/// Arbiter role.
pub struct Arbiter {
    params: LogisticParams,
    encrypt_operator: PaillierEncrypt,
    optimizer: Optimizer,
    converge_func: Box<dyn ConvergeFunction + Send>,
    batch_num: usize,
    gradient_sizes: Option<(usize, usize)>,
    loss_history: Vec<f64>,
    observed: Vec<(usize, usize)>,
    state: State,
    span: Span,
}

impl Arbiter {
    /// Validate `params` and set up the arbiter. Nothing is sent yet.
    pub fn new(params: LogisticParams, span: Span) -> Result<Self> {
        params.validate()?;

        let optimizer = Optimizer::new(params.optimizer, params.learning_rate());
        let converge_func = converge_func_factory(params.converge_func, params.eps);

        Ok(Self {
            params,
            encrypt_operator: PaillierEncrypt::new(),
            optimizer,
            converge_func,
            batch_num: 0,
            gradient_sizes: None,
            loss_history: Vec::new(),
            observed: Vec::new(),
            state: State::Init,
            span,
        })
    }

    /// Run the training protocol.
    pub fn fit<T: Transfer + ?Sized>(&mut self, transfer: &mut T) -> Result<TrainOutcome> {
        let span = self.span.clone();
        let _enter = span.enter();
        info!("enter hetero_lr arbiter fit");

        super::drive(self, transfer)?;
        self.outcome()
    }

    /// Outcome of a finished run.
    pub fn outcome(&self) -> Result<TrainOutcome> {
        match self.state {
            State::Done(outcome) => Ok(outcome),
            _ => Err(anyhow!("arbiter has not finished training")),
        }
    }

    /// Decrypted loss of every batch.
    pub fn loss_history(&self) -> &[f64] {
        &self.loss_history
    }

    /// `(iteration, batch)` of every finished batch.
    pub fn observed(&self) -> &[(usize, usize)] {
        &self.observed
    }

    fn check_gradient_sizes(&mut self, host: usize, guest: usize) -> Result<(), DesyncError> {
        for (role, len) in [(Role::Host, host), (Role::Guest, guest)] {
            if len == 0 {
                return Err(DesyncError::EmptyGradient(role.to_string()));
            }
        }

        match self.gradient_sizes {
            None => {
                self.gradient_sizes = Some((host, guest));
                Ok(())
            }
            Some((h, _)) if h != host => Err(DesyncError::GradientLength {
                role: Role::Host.to_string(),
                expected: h,
                actual: host,
            }),
            Some((_, g)) if g != guest => Err(DesyncError::GradientLength {
                role: Role::Guest.to_string(),
                expected: g,
                actual: guest,
            }),
            Some(_) => Ok(()),
        }
    }

    fn optimize(
        &mut self,
        n_iter: usize,
        batch_index: usize,
        host_gradient: Payload,
        guest_gradient: Payload,
    ) -> Result<Vec<Outbound>> {
        let host_gradient = host_gradient.into_cipher_vector(TransferName::HostGradient)?;
        let guest_gradient = guest_gradient.into_cipher_vector(TransferName::GuestGradient)?;
        self.check_gradient_sizes(host_gradient.len(), guest_gradient.len())?;

        let gradient = aggregate(&[&host_gradient, &guest_gradient]);
        let gradient = self.encrypt_operator.decrypt_list(&gradient)?;

        let optim_gradient = self.optimizer.apply_gradients(&gradient, n_iter)?;
        let mut parts = separate(&optim_gradient, &[host_gradient.len(), guest_gradient.len()])?;
        let guest_optim_gradient = parts.pop().unwrap_or_default();
        let host_optim_gradient = parts.pop().unwrap_or_default();
        debug!(n_iter, batch_index, "gradients optimized");

        let tag = batch_tag(n_iter, batch_index);
        Ok(vec![
            Outbound::new(
                TransferName::HostOptimGradient,
                tag,
                Role::Host,
                Payload::PlainVector(host_optim_gradient),
            ),
            Outbound::new(
                TransferName::GuestOptimGradient,
                tag,
                Role::Guest,
                Payload::PlainVector(guest_optim_gradient),
            ),
        ])
    }

    fn check_loss(&mut self, n_iter: usize, batch_index: usize, loss: Payload) -> Result<Vec<Outbound>> {
        let loss = self
            .encrypt_operator
            .decrypt(&loss.into_cipher(TransferName::Loss)?)?;
        info!(n_iter, batch_index, loss, "get loss from guest");

        self.loss_history.push(loss);
        self.observed.push((n_iter, batch_index));

        let is_stop = self.converge_func.is_converge(loss);

        self.state = if is_stop {
            info!(n_iter, "model is converged");
            State::Done(TrainOutcome {
                converged: true,
                n_iter: n_iter + 1,
            })
        } else {
            match next_batch(n_iter, batch_index, self.batch_num, self.params.max_iter) {
                Some((n_iter, batch_index)) => State::AwaitingGradients {
                    n_iter,
                    batch_index,
                },
                None => {
                    warn!(
                        max_iter = self.params.max_iter,
                        "maximum iterations reached without convergence"
                    );
                    State::Done(TrainOutcome {
                        converged: false,
                        n_iter: self.params.max_iter,
                    })
                }
            }
        };

        let tag = batch_tag(n_iter, batch_index);
        Ok([Role::Host, Role::Guest]
            .into_iter()
            .map(|dst| Outbound::new(TransferName::IsStopped, tag, dst, Payload::Flag(is_stop)))
            .collect())
    }
}

impl RoleMachine for Arbiter {
    fn role(&self) -> Role {
        Role::Arbiter
    }

    fn expects(&self) -> Vec<Expect> {
        match self.state {
            State::Init | State::Done(_) | State::Failed => vec![],
            State::AwaitingBatchInfo => vec![Expect {
                name: TransferName::BatchInfo,
                tag: Tag::Once,
                src: Role::Guest,
            }],
            State::AwaitingGradients {
                n_iter,
                batch_index,
            } => {
                let tag = batch_tag(n_iter, batch_index);
                vec![
                    Expect {
                        name: TransferName::HostGradient,
                        tag,
                        src: Role::Host,
                    },
                    Expect {
                        name: TransferName::GuestGradient,
                        tag,
                        src: Role::Guest,
                    },
                ]
            }
            State::AwaitingLoss {
                n_iter,
                batch_index,
            } => vec![Expect {
                name: TransferName::Loss,
                tag: batch_tag(n_iter, batch_index),
                src: Role::Guest,
            }],
        }
    }

    fn advance(&mut self, inbound: Vec<Inbound>) -> Result<Vec<Outbound>> {
        let expects = self.expects();

        match std::mem::replace(&mut self.state, State::Failed) {
            State::Init => {
                receive::<0>(Role::Arbiter, &expects, inbound)?;

                self.encrypt_operator
                    .generate_key(self.params.encrypt_param.key_length)?;
                let public_key = self
                    .encrypt_operator
                    .public_key()
                    .cloned()
                    .ok_or_else(|| anyhow!("key generation left no public key"))?;
                info!(key = ?public_key, "remote public_key to host and guest");

                self.state = State::AwaitingBatchInfo;
                Ok([Role::Host, Role::Guest]
                    .into_iter()
                    .map(|dst| {
                        Outbound::new(
                            TransferName::PaillierPubkey,
                            Tag::Once,
                            dst,
                            Payload::PublicKey(public_key.clone()),
                        )
                    })
                    .collect())
            }
            State::AwaitingBatchInfo => {
                let [batch_info] = receive::<1>(Role::Arbiter, &expects, inbound)?;
                let (batch_size, batch_num) = batch_info.into_batch_info(TransferName::BatchInfo)?;
                info!(batch_size, batch_num, "get batch_info from guest");

                if batch_num == 0 {
                    return Err(DesyncError::BatchCount {
                        expected: 1,
                        actual: 0,
                    }
                    .into());
                }
                self.batch_num = batch_num;

                self.state = State::AwaitingGradients {
                    n_iter: 0,
                    batch_index: 0,
                };
                Ok(vec![])
            }
            State::AwaitingGradients {
                n_iter,
                batch_index,
            } => {
                let [host_gradient, guest_gradient] =
                    receive::<2>(Role::Arbiter, &expects, inbound)?;
                let outbound = self.optimize(n_iter, batch_index, host_gradient, guest_gradient)?;

                self.state = State::AwaitingLoss {
                    n_iter,
                    batch_index,
                };
                Ok(outbound)
            }
            State::AwaitingLoss {
                n_iter,
                batch_index,
            } => {
                let [loss] = receive::<1>(Role::Arbiter, &expects, inbound)?;
                self.check_loss(n_iter, batch_index, loss)
            }
            State::Done(outcome) => {
                self.state = State::Done(outcome);
                Ok(vec![])
            }
            State::Failed => Err(anyhow!("arbiter is in a failed state")),
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, State::Done(_) | State::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::MIN_KEY_LENGTH;
    use tracing::info_span;

    fn params() -> LogisticParams {
        let mut params = LogisticParams::default();
        params.encrypt_param.key_length = MIN_KEY_LENGTH;
        params
    }

    fn inbound(name: TransferName, tag: Tag, src: Role, payload: Payload) -> Inbound {
        Inbound {
            name,
            tag,
            src,
            payload,
        }
    }

    #[test]
    fn test_key_distribution_and_batch_info() {
        let mut arbiter = Arbiter::new(params(), info_span!("arbiter")).unwrap();
        assert!(arbiter.expects().is_empty());

        let out = arbiter.advance(vec![]).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .all(|o| o.name == TransferName::PaillierPubkey && o.tag == Tag::Once));
        assert_eq!(
            out.iter().map(|o| o.dst).collect::<Vec<_>>(),
            vec![Role::Host, Role::Guest]
        );

        assert_eq!(
            arbiter.expects(),
            vec![Expect {
                name: TransferName::BatchInfo,
                tag: Tag::Once,
                src: Role::Guest
            }]
        );
        let out = arbiter
            .advance(vec![inbound(
                TransferName::BatchInfo,
                Tag::Once,
                Role::Guest,
                Payload::BatchInfo {
                    batch_size: 3,
                    batch_num: 1,
                },
            )])
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(arbiter.expects().len(), 2);
    }

    #[test]
    fn test_zero_batches_rejected() {
        let mut arbiter = Arbiter::new(params(), info_span!("arbiter")).unwrap();
        arbiter.advance(vec![]).unwrap();

        let err = arbiter
            .advance(vec![inbound(
                TransferName::BatchInfo,
                Tag::Once,
                Role::Guest,
                Payload::BatchInfo {
                    batch_size: 0,
                    batch_num: 0,
                },
            )])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DesyncError>(),
            Some(DesyncError::BatchCount { .. })
        ));
    }

    #[test]
    fn test_unexpected_message() {
        let mut arbiter = Arbiter::new(params(), info_span!("arbiter")).unwrap();
        arbiter.advance(vec![]).unwrap();

        let err = arbiter
            .advance(vec![inbound(
                TransferName::Loss,
                batch_tag(0, 0),
                Role::Guest,
                Payload::Flag(true),
            )])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DesyncError>(),
            Some(DesyncError::UnexpectedMessage { .. })
        ));
    }

    #[test]
    fn test_gradient_round() {
        let mut arbiter = Arbiter::new(params(), info_span!("arbiter")).unwrap();
        arbiter.advance(vec![]).unwrap();
        arbiter
            .advance(vec![inbound(
                TransferName::BatchInfo,
                Tag::Once,
                Role::Guest,
                Payload::BatchInfo {
                    batch_size: 3,
                    batch_num: 2,
                },
            )])
            .unwrap();

        let pk = arbiter.encrypt_operator.key().unwrap().clone();
        let mut rng = scuttlebutt::AesRng::new();
        let enc = |v: &[f64], rng: &mut scuttlebutt::AesRng| {
            v.iter()
                .map(|x| pk.encrypt(*x, rng).unwrap())
                .collect::<Vec<_>>()
        };

        let tag = batch_tag(0, 0);
        let out = arbiter
            .advance(vec![
                inbound(
                    TransferName::HostGradient,
                    tag,
                    Role::Host,
                    Payload::CipherVector(enc(&[1.0], &mut rng)),
                ),
                inbound(
                    TransferName::GuestGradient,
                    tag,
                    Role::Guest,
                    Payload::CipherVector(enc(&[2.0, -4.0], &mut rng)),
                ),
            ])
            .unwrap();

        // sgd with lr 0.01
        assert_eq!(out[0].dst, Role::Host);
        assert_eq!(out[0].payload, Payload::PlainVector(vec![0.01]));
        assert_eq!(out[1].dst, Role::Guest);
        assert_eq!(out[1].payload, Payload::PlainVector(vec![0.02, -0.04]));

        let out = arbiter
            .advance(vec![inbound(
                TransferName::Loss,
                tag,
                Role::Guest,
                Payload::Cipher(pk.encrypt(0.5, &mut rng).unwrap()),
            )])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.payload == Payload::Flag(false)));
        assert_eq!(arbiter.loss_history(), &[0.5]);
        assert_eq!(arbiter.observed(), &[(0, 0)]);

        // second batch with a resized host gradient
        let tag = batch_tag(0, 1);
        let err = arbiter
            .advance(vec![
                inbound(
                    TransferName::HostGradient,
                    tag,
                    Role::Host,
                    Payload::CipherVector(enc(&[1.0, 1.0], &mut rng)),
                ),
                inbound(
                    TransferName::GuestGradient,
                    tag,
                    Role::Guest,
                    Payload::CipherVector(enc(&[2.0, -4.0], &mut rng)),
                ),
            ])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<DesyncError>(),
            Some(&DesyncError::GradientLength {
                role: "host".to_string(),
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_empty_gradient_rejected() {
        let mut arbiter = Arbiter::new(params(), info_span!("arbiter")).unwrap();
        arbiter.advance(vec![]).unwrap();
        arbiter
            .advance(vec![inbound(
                TransferName::BatchInfo,
                Tag::Once,
                Role::Guest,
                Payload::BatchInfo {
                    batch_size: 3,
                    batch_num: 1,
                },
            )])
            .unwrap();

        let pk = arbiter.encrypt_operator.key().unwrap().clone();
        let mut rng = scuttlebutt::AesRng::new();
        let tag = batch_tag(0, 0);
        let err = arbiter
            .advance(vec![
                inbound(
                    TransferName::HostGradient,
                    tag,
                    Role::Host,
                    Payload::CipherVector(vec![pk.encrypt(1.0, &mut rng).unwrap()]),
                ),
                inbound(
                    TransferName::GuestGradient,
                    tag,
                    Role::Guest,
                    Payload::CipherVector(vec![]),
                ),
            ])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<DesyncError>(),
            Some(&DesyncError::EmptyGradient("guest".to_string()))
        );
        assert_eq!(err.root_cause().to_string(), "empty gradient from guest");
    }
}
