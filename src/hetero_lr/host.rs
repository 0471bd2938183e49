//! Host: feature-only party.

use super::{
    batch_tag, compute_wx, feature_dim, next_batch, receive, Expect, Inbound, LogisticWeights,
    Outbound, RoleMachine, TrainOutcome,
};
use crate::encrypt::{Ciphertext, EncryptOperator, PaillierEncrypt};
use crate::error::DesyncError;
use crate::feature::{DataInstance, RowId};
use crate::model_selection::BatchIndexCache;
use crate::optim::gradient::compute_gradient;
use crate::optim::initializer::init_model;
use crate::optim::updater::{plain_update, Updater};
use crate::param::LogisticParams;
use crate::table::Table;
use crate::transfer::{Payload, Role, Tag, Transfer, TransferName};
use anyhow::{anyhow, Result};
use scuttlebutt::AesRng;
use tracing::{debug, info, Span};

enum State {
    Init,
    AwaitingBatchInfo,
    AwaitingBatchIndex {
        n_iter: usize,
        batch_index: usize,
    },
    AwaitingForeGradient {
        n_iter: usize,
        batch_index: usize,
        batch: Table<DataInstance>,
    },
    AwaitingOptimGradient {
        n_iter: usize,
        batch_index: usize,
    },
    AwaitingStop {
        n_iter: usize,
        batch_index: usize,
    },
    Done(TrainOutcome),
    Failed,
}

/// Host role.
pub struct Host {
    params: LogisticParams,
    data: Table<DataInstance>,
    dim: usize,
    encrypt_operator: PaillierEncrypt,
    updater: Option<Updater>,
    batch_num: usize,
    batch_index_cache: BatchIndexCache,
    weights: LogisticWeights,
    rng: AesRng,
    observed: Vec<(usize, usize)>,
    observed_rows: Vec<Vec<RowId>>,
    state: State,
    span: Span,
}

impl Host {
    /// Validate `params` and the local data. Labels, if any, are ignored.
    pub fn new(params: LogisticParams, data: Table<DataInstance>, span: Span) -> Result<Self> {
        params.validate()?;
        let dim = feature_dim(&data)?;
        let updater = Updater::new(params.penalty, params.alpha);

        Ok(Self {
            params,
            data,
            dim,
            encrypt_operator: PaillierEncrypt::new(),
            updater,
            batch_num: 0,
            batch_index_cache: BatchIndexCache::new(),
            weights: LogisticWeights::from_init(vec![0.0; dim], false),
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
        info!("enter hetero_lr host fit");

        super::drive(self, transfer)?;
        match self.state {
            State::Done(outcome) => Ok(outcome),
            _ => Err(anyhow!("host has not finished training")),
        }
    }

    /// Current weights; the intercept stays zero.
    pub fn weights(&self) -> &LogisticWeights {
        &self.weights
    }

    /// `(iteration, batch)` of every finished batch.
    pub fn observed(&self) -> &[(usize, usize)] {
        &self.observed
    }

    /// Row ids of every batch a gradient was computed on.
    pub fn observed_rows(&self) -> &[Vec<RowId>] {
        &self.observed_rows
    }

    /// Send the plaintext partial scores of `data` to the guest under `flow_id`.
    pub fn predict<T: Transfer + ?Sized>(
        &self,
        data: &Table<DataInstance>,
        transfer: &mut T,
        flow_id: usize,
    ) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        info!("start predict");

        let prob_host = compute_wx(data, &self.weights)?;
        transfer.remote(
            &Payload::PlainRows(prob_host.collect()),
            TransferName::HostProb,
            Tag::Flow(flow_id),
            Role::Guest,
        )?;
        info!("remote probability to guest");
        Ok(())
    }

    /// Encrypted $`w^\top x`$ and $`(w^\top x)^2`$ of every row in `batch`.
    pub fn compute_forward(
        &mut self,
        batch: &Table<DataInstance>,
    ) -> Result<Vec<(RowId, Ciphertext, Ciphertext)>> {
        let wx = compute_wx(batch, &self.weights)?;
        let encrypt_operator = &mut self.encrypt_operator;
        wx.iter()
            .map(|(id, v)| {
                Ok((
                    id,
                    encrypt_operator.encrypt(*v)?,
                    encrypt_operator.encrypt(v * v)?,
                ))
            })
            .collect()
    }

    /// Encrypt the forward of `ids` and wait for the fore-gradient.
    fn send_forward(
        &mut self,
        n_iter: usize,
        batch_index: usize,
        ids: &[RowId],
    ) -> Result<Vec<Outbound>> {
        let batch = self.data.select(ids)?;
        let forward = self.compute_forward(&batch)?;
        debug!(n_iter, batch_index, rows = forward.len(), "remote host_forward to guest");

        self.state = State::AwaitingForeGradient {
            n_iter,
            batch_index,
            batch,
        };
        Ok(vec![Outbound::new(
            TransferName::HostForward,
            batch_tag(n_iter, batch_index),
            Role::Guest,
            Payload::HostForward(forward),
        )])
    }

    /// The first iteration waits for the guest's indices, later ones replay them.
    fn start_batch(&mut self, n_iter: usize, batch_index: usize) -> Result<Vec<Outbound>> {
        if n_iter == 0 {
            self.state = State::AwaitingBatchIndex {
                n_iter,
                batch_index,
            };
            return Ok(vec![]);
        }

        let ids = self.batch_index_cache.get(batch_index)?.to_vec();
        self.send_forward(n_iter, batch_index, &ids)
    }

    fn update_model(
        &mut self,
        delta: &[f64],
        n_iter: usize,
        batch_index: usize,
    ) -> Result<Vec<Outbound>> {
        if delta.len() != self.weights.gradient_len() {
            return Err(DesyncError::GradientLength {
                role: Role::Host.to_string(),
                expected: self.weights.gradient_len(),
                actual: delta.len(),
            }
            .into());
        }

        match &self.updater {
            Some(updater) => {
                let lr = self.params.learning_rate().at(n_iter);
                updater.update_coef(&mut self.weights.coef, delta, lr)?;
                let loss_regular = updater.loss_norm(&self.weights.coef);
                Ok(vec![Outbound::new(
                    TransferName::HostLossRegular,
                    batch_tag(n_iter, batch_index),
                    Role::Guest,
                    Payload::Cipher(self.encrypt_operator.encrypt(loss_regular)?),
                )])
            }
            None => {
                plain_update(&mut self.weights.coef, delta)?;
                Ok(vec![])
            }
        }
    }
}

impl RoleMachine for Host {
    fn role(&self) -> Role {
        Role::Host
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
            State::AwaitingBatchInfo => vec![Expect {
                name: TransferName::BatchInfo,
                tag: Tag::Once,
                src: Role::Guest,
            }],
            State::AwaitingBatchIndex {
                n_iter,
                batch_index,
            } => expect(TransferName::BatchDataIndex, n_iter, batch_index, Role::Guest),
            State::AwaitingForeGradient {
                n_iter,
                batch_index,
                ..
            } => expect(TransferName::ForeGradient, n_iter, batch_index, Role::Guest),
            State::AwaitingOptimGradient {
                n_iter,
                batch_index,
            } => expect(
                TransferName::HostOptimGradient,
                n_iter,
                batch_index,
                Role::Arbiter,
            ),
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
                let [public_key] = receive::<1>(Role::Host, &expects, inbound)?;
                let public_key = public_key.into_public_key(TransferName::PaillierPubkey)?;
                info!(key = ?public_key, "get public_key from arbiter");
                self.encrypt_operator.set_public_key(public_key);

                let mut init_param = self.params.init_param.clone();
                init_param.fit_intercept = false;
                let init = init_model(self.dim, &init_param, &mut self.rng);
                self.weights = LogisticWeights::from_init(init, false);

                self.state = State::AwaitingBatchInfo;
                Ok(vec![])
            }
            State::AwaitingBatchInfo => {
                let [batch_info] = receive::<1>(Role::Host, &expects, inbound)?;
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
                self.start_batch(0, 0)
            }
            State::AwaitingBatchIndex {
                n_iter,
                batch_index,
            } => {
                let [ids] = receive::<1>(Role::Host, &expects, inbound)?;
                let ids = ids.into_batch_index(TransferName::BatchDataIndex)?;
                self.batch_index_cache.push(batch_index, ids.clone())?;
                if batch_index + 1 == self.batch_num {
                    self.batch_index_cache.seal(self.batch_num)?;
                }
                self.send_forward(n_iter, batch_index, &ids)
            }
            State::AwaitingForeGradient {
                n_iter,
                batch_index,
                batch,
            } => {
                let [fore_gradient] = receive::<1>(Role::Host, &expects, inbound)?;
                let fore_gradient: Table<Ciphertext> = fore_gradient
                    .into_cipher_rows(TransferName::ForeGradient)?
                    .into_iter()
                    .collect();
                debug!(n_iter, batch_index, "get fore_gradient from guest");

                let pk = self.encrypt_operator.key()?;
                let host_gradient = compute_gradient(pk, &batch, &fore_gradient, self.dim, false)?;
                self.observed_rows.push(batch.keys().collect());

                self.state = State::AwaitingOptimGradient {
                    n_iter,
                    batch_index,
                };
                Ok(vec![Outbound::new(
                    TransferName::HostGradient,
                    batch_tag(n_iter, batch_index),
                    Role::Arbiter,
                    Payload::CipherVector(host_gradient),
                )])
            }
            State::AwaitingOptimGradient {
                n_iter,
                batch_index,
            } => {
                let [delta] = receive::<1>(Role::Host, &expects, inbound)?;
                let delta = delta.into_plain_vector(TransferName::HostOptimGradient)?;
                let outbound = self.update_model(&delta, n_iter, batch_index)?;
                debug!(n_iter, batch_index, "model updated");

                self.state = State::AwaitingStop {
                    n_iter,
                    batch_index,
                };
                Ok(outbound)
            }
            State::AwaitingStop {
                n_iter,
                batch_index,
            } => {
                let [is_stopped] = receive::<1>(Role::Host, &expects, inbound)?;
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

                match next_batch(n_iter, batch_index, self.batch_num, self.params.max_iter) {
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
            State::Failed => Err(anyhow!("host is in a failed state")),
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, State::Done(_) | State::Failed)
    }
}
