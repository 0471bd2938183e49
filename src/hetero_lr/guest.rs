//! Guest: label holder and batch planner.

use super::{
    batch_tag, compute_wx, feature_dim, next_batch, receive, Expect, Inbound, LogisticWeights,
    Outbound, RoleMachine, TrainOutcome,
};
use crate::encrypt::{Ciphertext, EncryptOperator, PaillierEncrypt, PaillierPublicKey};
use crate::error::{ConfigError, DesyncError};
use crate::feature::{DataInstance, RowId};
use crate::model_selection::BatchPlanCache;
use crate::optim::activation::sigmoid;
use crate::optim::gradient::{compute_fore_gradient, compute_gradient_and_loss};
use crate::optim::initializer::init_model;
use crate::optim::updater::{plain_update, Updater};
use crate::param::LogisticParams;
use crate::table::Table;
use crate::transfer::{Payload, Role, Tag, Transfer, TransferName};
use anyhow::{anyhow, Context, Result};
use scuttlebutt::AesRng;
use tracing::{debug, info, Span};

/// Guest's `([[wx]], [[wx^2]], wx)` per row of the current batch.
pub type GuestForward = Table<(Ciphertext, Ciphertext, f64)>;

enum State {
    Init,
    AwaitingHostForward {
        n_iter: usize,
        batch_index: usize,
        batch: Table<DataInstance>,
        forward: GuestForward,
    },
    AwaitingOptimGradient {
        n_iter: usize,
        batch_index: usize,
        loss: Ciphertext,
    },
    AwaitingHostLossRegular {
        n_iter: usize,
        batch_index: usize,
        loss: Ciphertext,
    },
    AwaitingStop {
        n_iter: usize,
        batch_index: usize,
    },
    Done(TrainOutcome),
    Failed,
}

/// One row of [Guest::predict].
#[derive(Clone, Debug, PartialEq)]
pub struct PredictResult {
    /// Row.
    pub row_id: RowId,
    /// True label mapped to `1` / `-1`, if known.
    pub label: Option<f64>,
    /// $`\sigma(w^\top x)`$, when probabilities are requested.
    pub probability: Option<f64>,
    /// `1.0` above the threshold, `-1.0` otherwise.
    pub predicted_label: f64,
}

/// Guest role.
pub struct Guest {
    params: LogisticParams,
    data: Table<DataInstance>,
    dim: usize,
    encrypt_operator: PaillierEncrypt,
    updater: Option<Updater>,
    plan: BatchPlanCache,
    weights: LogisticWeights,
    rng: AesRng,
    observed: Vec<(usize, usize)>,
    observed_rows: Vec<Vec<RowId>>,
    state: State,
    span: Span,
}

/// Row-wise $`([[a]] + [[b]],\ [[a^2]] + [[b^2]] + 2a[[b]])`$ of the guest part $`a`$ and host part $`b`$.
///
/// Both sides must cover the same rows.
pub fn aggregate_forward(
    pk: &PaillierPublicKey,
    guest_forward: &GuestForward,
    host_forward: &Table<(Ciphertext, Ciphertext)>,
) -> Result<Table<(Ciphertext, Ciphertext)>> {
    guest_forward
        .try_join(host_forward, |(g_wx, g_wx2, wx), (h_wx, h_wx2)| -> Result<_> {
            let en_wx = pk.add(g_wx, h_wx)?;
            let cross = pk.mul_scalar(h_wx, 2.0 * wx)?;
            let en_wx2 = pk.add(&pk.add(g_wx2, h_wx2)?, &cross)?;
            Ok((en_wx, en_wx2))
        })
        .with_context(|| format!("@{}:{}", file!(), line!()))
}

fn signed_label(label: f64) -> f64 {
    if label == 1.0 {
        1.0
    } else {
        -1.0
    }
}

impl Guest {
    /// Validate `params` and the local data. Labels other than `1` are mapped to `-1`.
    pub fn new(params: LogisticParams, data: Table<DataInstance>, span: Span) -> Result<Self> {
        params.validate()?;

        let data = data
            .iter()
            .map(|(id, inst)| {
                let label = inst.label.ok_or_else(|| ConfigError::InvalidParam {
                    name: "label",
                    reason: format!("row {} has no label", id),
                })?;
                let mut inst = inst.clone();
                inst.label = Some(signed_label(label));
                Ok((id, inst))
            })
            .collect::<Result<Table<_>, ConfigError>>()?;
        let dim = feature_dim(&data)?;

        let updater = Updater::new(params.penalty, params.alpha);
        let fit_intercept = params.init_param.fit_intercept;

        Ok(Self {
            params,
            data,
            dim,
            encrypt_operator: PaillierEncrypt::new(),
            updater,
            plan: BatchPlanCache::new(),
            weights: LogisticWeights {
                coef: vec![0.0; dim],
                intercept: 0.0,
                fit_intercept,
            },
            rng: AesRng::new(),
            observed: Vec::new(),
            observed_rows: Vec::new(),
            state: State::Init,
            span,
        })
    }

    /// Run the training protocol.
    pub fn fit<T: Transfer + ?Sized>(&mut self, transfer: &mut T) -> Result<TrainOutcome> {
        let span = self.span.clone();
        let _enter = span.enter();
        info!("enter hetero_lr guest fit");

        super::drive(self, transfer)?;
        match self.state {
            State::Done(outcome) => Ok(outcome),
            _ => Err(anyhow!("guest has not finished training")),
        }
    }

    /// Current weights.
    pub fn weights(&self) -> &LogisticWeights {
        &self.weights
    }

    /// `(iteration, batch)` of every finished batch.
    pub fn observed(&self) -> &[(usize, usize)] {
        &self.observed
    }

    /// Row ids of every finished batch.
    pub fn observed_rows(&self) -> &[Vec<RowId>] {
        &self.observed_rows
    }

    /// Combine the host's plaintext scores of `flow_id` with the local ones and classify.
    pub fn predict<T: Transfer + ?Sized>(
        &self,
        data: &Table<DataInstance>,
        transfer: &mut T,
        flow_id: usize,
    ) -> Result<Vec<PredictResult>> {
        let span = self.span.clone();
        let _enter = span.enter();
        info!("start predict");

        let prob_guest = compute_wx(data, &self.weights)?;
        let prob_host: Table<f64> = transfer
            .get(TransferName::HostProb, Tag::Flow(flow_id), Role::Host)?
            .into_plain_rows(TransferName::HostProb)?
            .into_iter()
            .collect();
        info!("get probability from host");

        let threshold = self.params.predict_param.threshold;
        let with_proba = self.params.predict_param.with_proba;
        let prob = prob_guest.try_join(&prob_host, |g, h| Ok::<_, anyhow::Error>(sigmoid(g + h)))?;

        Ok(prob.map(|row_id, p| PredictResult {
            row_id,
            label: data.get(row_id).and_then(|inst| inst.label).map(signed_label),
            probability: with_proba.then_some(*p),
            predicted_label: if *p > threshold { 1.0 } else { -1.0 },
        }))
    }

    /// Encrypt this party's part of the forward values.
    pub fn compute_forward(&mut self, batch: &Table<DataInstance>) -> Result<GuestForward> {
        let wx = compute_wx(batch, &self.weights)?;
        let encrypt_operator = &mut self.encrypt_operator;
        wx.try_map_values(|v| {
            Ok((
                encrypt_operator.encrypt(*v)?,
                encrypt_operator.encrypt(v * v)?,
                *v,
            ))
        })
    }

    fn public_key(&self) -> Result<&PaillierPublicKey> {
        Ok(self.encrypt_operator.key()?)
    }

    /// Messages opening batch `(n_iter, batch_index)` and the state waiting for the host.
    fn start_batch(&mut self, n_iter: usize, batch_index: usize) -> Result<Vec<Outbound>> {
        let data = &self.data;
        let plan = self
            .plan
            .get_or_plan(|| data.keys().collect(), self.params.batch_size)?;
        let ids = plan
            .batch(batch_index)
            .ok_or(DesyncError::BatchCount {
                expected: plan.batch_num(),
                actual: batch_index + 1,
            })?
            .to_vec();
        debug!(n_iter, batch_index, rows = ids.len(), "start batch");

        let mut outbound = vec![];
        if n_iter == 0 {
            outbound.push(Outbound::new(
                TransferName::BatchDataIndex,
                batch_tag(n_iter, batch_index),
                Role::Host,
                Payload::BatchIndex(ids.clone()),
            ));
        }

        let batch = self.data.select(&ids)?;
        let forward = self.compute_forward(&batch)?;

        self.state = State::AwaitingHostForward {
            n_iter,
            batch_index,
            batch,
            forward,
        };
        Ok(outbound)
    }

    fn update_model(&mut self, delta: &[f64], n_iter: usize) -> Result<()> {
        let expected = self.weights.gradient_len();
        if delta.len() != expected {
            return Err(DesyncError::GradientLength {
                role: Role::Guest.to_string(),
                expected,
                actual: delta.len(),
            }
            .into());
        }

        let (coef_delta, intercept_delta) = delta.split_at(self.weights.coef.len());
        match &self.updater {
            Some(updater) => {
                let lr = self.params.learning_rate().at(n_iter);
                updater.update_coef(&mut self.weights.coef, coef_delta, lr)?;
            }
            None => plain_update(&mut self.weights.coef, coef_delta)?,
        }
        if let Some(d) = intercept_delta.first() {
            self.weights.intercept -= d;
        }
        Ok(())
    }

    fn send_loss(&mut self, n_iter: usize, batch_index: usize, loss: Ciphertext) -> Vec<Outbound> {
        self.state = State::AwaitingStop {
            n_iter,
            batch_index,
        };
        vec![Outbound::new(
            TransferName::Loss,
            batch_tag(n_iter, batch_index),
            Role::Arbiter,
            Payload::Cipher(loss),
        )]
    }
}

impl RoleMachine for Guest {
    fn role(&self) -> Role {
        Role::Guest
    }

    fn expects(&self) -> Vec<Expect> {
        let expect = |name, n_iter, batch_index, src| {
            vec![Expect {
                name,
                tag: batch_tag(n_iter, batch_index),
                src,
            }]
        };

        match self.state {
            State::Init => vec![Expect {
                name: TransferName::PaillierPubkey,
                tag: Tag::Once,
                src: Role::Arbiter,
            }],
            State::AwaitingHostForward {
                n_iter,
                batch_index,
                ..
            } => expect(TransferName::HostForward, n_iter, batch_index, Role::Host),
            State::AwaitingOptimGradient {
                n_iter,
                batch_index,
                ..
            } => expect(
                TransferName::GuestOptimGradient,
                n_iter,
                batch_index,
                Role::Arbiter,
            ),
            State::AwaitingHostLossRegular {
                n_iter,
                batch_index,
                ..
            } => expect(TransferName::HostLossRegular, n_iter, batch_index, Role::Host),
            State::AwaitingStop {
                n_iter,
                batch_index,
            } => expect(TransferName::IsStopped, n_iter, batch_index, Role::Arbiter),
            State::Done(_) | State::Failed => vec![],
        }
    }

    fn advance(&mut self, inbound: Vec<Inbound>) -> Result<Vec<Outbound>> {
        let expects = self.expects();

        match std::mem::replace(&mut self.state, State::Failed) {
            State::Init => {
                let [public_key] = receive::<1>(Role::Guest, &expects, inbound)?;
                let public_key = public_key.into_public_key(TransferName::PaillierPubkey)?;
                info!(key = ?public_key, "get public_key from arbiter");
                self.encrypt_operator.set_public_key(public_key);

                let data = &self.data;
                let plan = self
                    .plan
                    .get_or_plan(|| data.keys().collect(), self.params.batch_size)?;
                let batch_info = Payload::BatchInfo {
                    batch_size: plan.batch_size(),
                    batch_num: plan.batch_num(),
                };
                info!(
                    batch_size = plan.batch_size(),
                    batch_num = plan.batch_num(),
                    "remote batch_info to host and arbiter"
                );

                let fit_intercept = self.params.init_param.fit_intercept;
                let shape = self.dim + fit_intercept as usize;
                let init = init_model(shape, &self.params.init_param, &mut self.rng);
                self.weights = LogisticWeights::from_init(init, fit_intercept);

                let mut outbound = [Role::Host, Role::Arbiter]
                    .into_iter()
                    .map(|dst| {
                        Outbound::new(TransferName::BatchInfo, Tag::Once, dst, batch_info.clone())
                    })
                    .collect::<Vec<_>>();
                outbound.extend(self.start_batch(0, 0)?);
                Ok(outbound)
            }
            State::AwaitingHostForward {
                n_iter,
                batch_index,
                batch,
                forward,
            } => {
                let [host_forward] = receive::<1>(Role::Guest, &expects, inbound)?;
                let host_forward: Table<(Ciphertext, Ciphertext)> = host_forward
                    .into_host_forward(TransferName::HostForward)?
                    .into_iter()
                    .map(|(id, wx, wx2)| (id, (wx, wx2)))
                    .collect();
                debug!(n_iter, batch_index, "get host_forward from host");

                let pk = self.public_key()?.clone();
                let aggregate = aggregate_forward(&pk, &forward, &host_forward)?;
                let en_wx = aggregate.map_values(|(wx, _)| wx.clone());
                let en_wx_square = aggregate.map_values(|(_, wx2)| wx2.clone());

                let fore_gradient = compute_fore_gradient(&pk, &batch, &en_wx)?;
                let (guest_gradient, mut loss) = compute_gradient_and_loss(
                    &pk,
                    &batch,
                    &fore_gradient,
                    &en_wx,
                    &en_wx_square,
                    self.dim,
                    self.weights.fit_intercept,
                )?;

                if let Some(updater) = &self.updater {
                    let guest_loss_regular = updater.loss_norm(&self.weights.coef);
                    let en_regular = self.encrypt_operator.encrypt(guest_loss_regular)?;
                    loss = pk.add(&loss, &en_regular)?;
                }

                self.observed_rows.push(batch.keys().collect());
                self.state = State::AwaitingOptimGradient {
                    n_iter,
                    batch_index,
                    loss,
                };

                let tag = batch_tag(n_iter, batch_index);
                Ok(vec![
                    Outbound::new(
                        TransferName::ForeGradient,
                        tag,
                        Role::Host,
                        Payload::CipherRows(fore_gradient.collect()),
                    ),
                    Outbound::new(
                        TransferName::GuestGradient,
                        tag,
                        Role::Arbiter,
                        Payload::CipherVector(guest_gradient),
                    ),
                ])
            }
            State::AwaitingOptimGradient {
                n_iter,
                batch_index,
                loss,
            } => {
                let [delta] = receive::<1>(Role::Guest, &expects, inbound)?;
                let delta = delta.into_plain_vector(TransferName::GuestOptimGradient)?;
                self.update_model(&delta, n_iter)?;
                debug!(n_iter, batch_index, "model updated");

                if self.updater.is_some() {
                    self.state = State::AwaitingHostLossRegular {
                        n_iter,
                        batch_index,
                        loss,
                    };
                    Ok(vec![])
                } else {
                    Ok(self.send_loss(n_iter, batch_index, loss))
                }
            }
            State::AwaitingHostLossRegular {
                n_iter,
                batch_index,
                loss,
            } => {
                let [host_regular] = receive::<1>(Role::Guest, &expects, inbound)?;
                let host_regular = host_regular.into_cipher(TransferName::HostLossRegular)?;
                let loss = self.public_key()?.add(&loss, &host_regular)?;
                Ok(self.send_loss(n_iter, batch_index, loss))
            }
            State::AwaitingStop {
                n_iter,
                batch_index,
            } => {
                let [is_stopped] = receive::<1>(Role::Guest, &expects, inbound)?;
                let is_stopped = is_stopped.into_flag(TransferName::IsStopped)?;
                debug!(n_iter, batch_index, is_stopped, "get is_stop flag from arbiter");
                self.observed.push((n_iter, batch_index));

                if is_stopped {
                    info!(n_iter, "get stop signal from arbiter, model is converged");
                    self.state = State::Done(TrainOutcome {
                        converged: true,
                        n_iter: n_iter + 1,
                    });
                    return Ok(vec![]);
                }

                let batch_num = self.plan.plan().map(|p| p.batch_num()).unwrap_or(0);
                match next_batch(n_iter, batch_index, batch_num, self.params.max_iter) {
                    Some((n, b)) => self.start_batch(n, b),
                    None => {
                        info!(max_iter = self.params.max_iter, "reach max iter, train model finish");
                        self.state = State::Done(TrainOutcome {
                            converged: false,
                            n_iter: self.params.max_iter,
                        });
                        Ok(vec![])
                    }
                }
            }
            State::Done(outcome) => {
                self.state = State::Done(outcome);
                Ok(vec![])
            }
            State::Failed => Err(anyhow!("guest is in a failed state")),
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, State::Done(_) | State::Failed)
    }
}
