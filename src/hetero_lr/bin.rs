//! Runner used by the `hetero_lr` binary: the three roles on threads of one process.

use super::{Arbiter, Guest, Host, LogisticWeights, PredictResult, TrainOutcome};
use crate::cli_utils::{create_channels, HeteroLRArgs};
use crate::data_utils::{create_vertical_dataset, VerticalDataset};
use crate::feature::RowId;
use crate::param::LogisticParams;
use crate::transfer::{Federation, Role, Transfer};
use anyhow::{anyhow, Context, Result};
use scuttlebutt::AesRng;
use std::thread::JoinHandle;
use tracing::{info, info_span};

/// What each role saw during a run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Arbiter's outcome.
    pub outcome: TrainOutcome,
    /// Decrypted loss per batch.
    pub loss_history: Vec<f64>,
    /// `(iteration, batch)` sequence of arbiter, guest and host, in that order.
    pub observed: [Vec<(usize, usize)>; 3],
    /// Rows of every batch on the guest.
    pub guest_rows: Vec<Vec<RowId>>,
    /// Rows of every batch on the host.
    pub host_rows: Vec<Vec<RowId>>,
    /// Guest's final weights.
    pub guest_weights: LogisticWeights,
    /// Host's final weights.
    pub host_weights: LogisticWeights,
    /// Guest's predictions on the training rows.
    pub predictions: Vec<PredictResult>,
}

impl RunReport {
    /// Share of rows whose predicted label equals the true one.
    pub fn accuracy(&self) -> f64 {
        if self.predictions.is_empty() {
            return 0.0;
        }
        let hits = self
            .predictions
            .iter()
            .filter(|p| p.label == Some(p.predicted_label))
            .count();
        hits as f64 / self.predictions.len() as f64
    }
}

fn spawn<T, F>(name: &str, f: F) -> Result<JoinHandle<Result<T>>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .with_context(|| format!("Failed to spawn {}.", name))
}

fn join<T>(name: &str, handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{} panicked @{}:{}", name, file!(), line!()))?
        .with_context(|| format!("Failed to run {}.", name))
}

/// Train on `dataset` and predict its rows, one thread per role.
///
/// `transfers` are the arbiter's, the guest's and the host's, in that order.
pub fn train_and_predict<T>(
    params: LogisticParams,
    dataset: VerticalDataset,
    transfers: [T; 3],
) -> Result<RunReport>
where
    T: Transfer + Send + 'static,
{
    let [mut arbiter_transfer, mut guest_transfer, mut host_transfer] = transfers;
    let VerticalDataset { guest, host, .. } = dataset;

    let arbiter_params = params.clone();
    let arbiter = spawn("arbiter", move || {
        let mut arbiter = Arbiter::new(arbiter_params, info_span!("arbiter"))?;
        arbiter.fit(&mut arbiter_transfer)?;
        Ok(arbiter)
    })?;

    let host_params = params.clone();
    let host = spawn("host", move || {
        let mut role = Host::new(host_params, host.clone(), info_span!("host"))?;
        role.fit(&mut host_transfer)?;
        role.predict(&host, &mut host_transfer, 0)?;
        Ok(role)
    })?;

    let guest = spawn("guest", move || {
        let mut role = Guest::new(params, guest.clone(), info_span!("guest"))?;
        role.fit(&mut guest_transfer)?;
        let predictions = role.predict(&guest, &mut guest_transfer, 0)?;
        Ok((role, predictions))
    })?;

    let arbiter = join("arbiter", arbiter)?;
    let host = join("host", host)?;
    let (guest, predictions) = join("guest", guest)?;

    Ok(RunReport {
        outcome: arbiter.outcome()?,
        loss_history: arbiter.loss_history().to_vec(),
        observed: [
            arbiter.observed().to_vec(),
            guest.observed().to_vec(),
            host.observed().to_vec(),
        ],
        guest_rows: guest.observed_rows().to_vec(),
        host_rows: host.observed_rows().to_vec(),
        guest_weights: guest.weights().clone(),
        host_weights: host.weights().clone(),
        predictions,
    })
}

/// Generate a dataset, run the protocol over the requested channels and print the result.
pub fn run(args: HeteroLRArgs) -> Result<()> {
    let params = args.params()?;
    info!(?params, "parameters loaded");

    let mut rng = AesRng::new();
    let dataset = create_vertical_dataset(args.rows, args.guest_dim, args.host_dim, &mut rng)
        .with_context(|| "Failed to create dataset.")?;
    println!("dataset prepared.");

    let channels = create_channels(args.channel_type, 3, args.port)
        .with_context(|| "Failed to create channels.")?;
    let transfers = channels
        .into_iter()
        .enumerate()
        .map(|(i, chs)| Federation::new(Role::from_index(i)?, chs))
        .collect::<Result<Vec<_>>>()?;
    let transfers: [_; 3] = transfers
        .try_into()
        .map_err(|_| anyhow!("expected 3 parties @{}:{}", file!(), line!()))?;

    let report = train_and_predict(params, dataset, transfers)?;

    if args.verbose {
        for p in report.predictions.iter() {
            println!("{:?}", p);
        }
    }
    println!(
        "converged = {}, iterations = {}, final loss = {:?}",
        report.outcome.converged,
        report.outcome.n_iter,
        report.loss_history.last()
    );
    println!("guest weights = {:?}", report.guest_weights);
    println!("host weights = {:?}", report.host_weights);
    println!("accuracy = {:.4}", report.accuracy());

    Ok(())
}
