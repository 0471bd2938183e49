//! CLI (CommandLine Interface) utilities for the hetero logistic regression demo.
//!
//! Here, you can know the options for a run through enum types and structs.
//! See [hetero_lr](crate::hetero_lr) for the protocol and [param](crate::param) for what the
//! training options mean.

use crate::channel_utils::sync_channel::create_unix_channels;
use crate::channel_utils::sync_channel_by_cb::create_crossbeam_channels;
use crate::channel_utils::sync_channel_by_cb::{CrossbeamReceiver, CrossbeamSender};
use crate::channel_utils::tcp_channel::create_tcp_channels;
use crate::optim::updater::Penalty;
use crate::optim::OptimizerType;
use crate::param::LogisticParams;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use scuttlebutt::{AbstractChannel, SyncChannel};
use std::fmt::Display;
use std::net::TcpStream;
use std::{
    io::{BufReader, BufWriter},
    os::unix::net::UnixStream,
};

/// Channel types. Channels are used to communicate between roles. More details: [channel_utils](crate::channel_utils).
#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ChannelType {
    /// Unix domain socket. See [UnixStream].
    Unix,
    /// TCP socket. See [TcpStream].
    Tcp,
    /// Native channel of Rust. See [CrossbeamReceiver] and [CrossbeamSender].
    CrossBeam,
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Unix => write!(f, "unix"),
            ChannelType::Tcp => write!(f, "tcp"),
            ChannelType::CrossBeam => write!(f, "crossbeam"),
        }
    }
}

/// Arguments for a hetero logistic regression run on a synthetic, vertically split dataset.
/// This struct implements [clap::Parser] to make that this binary has CommandLine Arguments.
///
/// Options given here override the ones read from `--config`.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, next_line_help = true)]
pub struct HeteroLRArgs {
    /// Number of rows shared by guest and host.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub rows: usize,

    /// Number of features held by the guest.
    #[arg(long, default_value_t = 3)]
    pub guest_dim: usize,

    /// Number of features held by the host.
    #[arg(long, default_value_t = 2)]
    pub host_dim: usize,

    /// TOML file with training parameters. See [LogisticParams].
    #[arg(short = 'f', long = "config")]
    pub config: Option<String>,

    /// Rows per mini-batch. Full batch if omitted.
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Maximum number of passes over the data.
    #[arg(short = 'm', long)]
    pub max_iter: Option<usize>,

    /// Update rule.
    #[arg(short = 'o', long)]
    pub optimizer: Option<OptimizerType>,

    /// Regularization.
    #[arg(long)]
    pub penalty: Option<Penalty>,

    /// Initial learning rate.
    #[arg(short = 'l', long)]
    pub learning_rate: Option<f64>,

    /// Paillier modulus length in bits.
    #[arg(short = 'k', long)]
    pub key_length: Option<usize>,

    /// Channel Types.
    #[arg(short = 'c', long = "channel", default_value_t = ChannelType::CrossBeam)]
    pub channel_type: ChannelType,

    /// Port number for TCP channel.
    ///
    /// The port is used internally. No function to communicate externally is implemented.
    #[arg(short = 'p', long = "port", default_value_t = 10000)]
    pub port: usize,

    /// Log filter, in the `RUST_LOG` syntax.
    #[arg(long = "log", default_value = "info")]
    pub log: String,

    /// Verbose mode.
    ///
    /// If specified, print every prediction.
    #[arg(long = "verbose", default_value_t = false)]
    pub verbose: bool,
}

impl HeteroLRArgs {
    /// Training parameters: `--config` (or the defaults) with the command line overrides applied.
    pub fn params(&self) -> Result<LogisticParams> {
        let mut params = match &self.config {
            Some(path) => LogisticParams::from_file(path)
                .with_context(|| format!("Failed to read config {}.", path))?,
            None => LogisticParams::default(),
        };

        if self.batch_size.is_some() {
            params.batch_size = self.batch_size;
        }
        if let Some(max_iter) = self.max_iter {
            params.max_iter = max_iter;
        }
        if let Some(optimizer) = self.optimizer {
            params.optimizer = optimizer;
        }
        if let Some(penalty) = self.penalty {
            params.penalty = penalty;
        }
        if let Some(learning_rate) = self.learning_rate {
            params.learning_rate = learning_rate;
        }
        if let Some(key_length) = self.key_length {
            params.encrypt_param.key_length = key_length;
        }

        params.validate()?;
        Ok(params)
    }
}

/// Enum type to handle multiple channel types on runtime.
pub enum ChannelUnion {
    /// Unix domain socket. See [UnixStream].
    Unix(SyncChannel<BufReader<UnixStream>, BufWriter<UnixStream>>),
    /// TCP socket. See [TcpStream].
    Tcp(SyncChannel<BufReader<TcpStream>, BufWriter<TcpStream>>),
    /// Native channel of Rust. See [CrossbeamReceiver] and [CrossbeamSender].
    CrossBeam(SyncChannel<CrossbeamReceiver, CrossbeamSender>),
}

use ChannelUnion::*;

impl AbstractChannel for ChannelUnion {
    #[inline(always)]
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Unix(c) => c.write_bytes(bytes),
            Tcp(c) => c.write_bytes(bytes),
            CrossBeam(c) => c.write_bytes(bytes),
        }
    }

    #[inline(always)]
    fn read_bytes(&mut self, bytes: &mut [u8]) -> std::io::Result<()> {
        match self {
            Unix(c) => c.read_bytes(bytes),
            Tcp(c) => c.read_bytes(bytes),
            CrossBeam(c) => c.read_bytes(bytes),
        }
    }

    #[inline(always)]
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Unix(c) => c.flush(),
            Tcp(c) => c.flush(),
            CrossBeam(c) => c.flush(),
        }
    }

    #[inline(always)]
    fn clone(&self) -> Self {
        match self {
            Unix(c) => Unix(c.clone()),
            Tcp(c) => Tcp(c.clone()),
            CrossBeam(c) => CrossBeam(c.clone()),
        }
    }
}

macro_rules! make_union_channel {
    ($c:expr, $t:path) => {{
        let channels = $c;
        Ok(channels
            .into_iter()
            .map(|cs| cs.into_iter().map(|(i, c)| (i, $t(c))).collect())
            .collect())
    }};
}

type Ucu = (usize, ChannelUnion);

/// Create a full mesh of channels between `nparties` parties. Runtime utility.
///
/// Entry `i` holds party `i`'s channels, each tagged with the index of the peer.
pub fn create_channels(type_: ChannelType, nparties: usize, port: usize) -> Result<Vec<Vec<Ucu>>> {
    match type_ {
        ChannelType::Unix => make_union_channel!(create_unix_channels(nparties)?, Unix),
        ChannelType::Tcp => make_union_channel!(create_tcp_channels(nparties, port)?, Tcp),
        ChannelType::CrossBeam => {
            make_union_channel!(create_crossbeam_channels(nparties), CrossBeam)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = HeteroLRArgs::parse_from([
            "hetero_lr",
            "--batch-size",
            "16",
            "--optimizer",
            "adam",
            "--penalty",
            "none",
            "-k",
            "512",
        ]);
        let params = args.params().unwrap();

        assert_eq!(params.batch_size, Some(16));
        assert_eq!(params.optimizer, OptimizerType::Adam);
        assert_eq!(params.penalty, Penalty::None);
        assert_eq!(params.encrypt_param.key_length, 512);
        assert_eq!(params.max_iter, LogisticParams::default().max_iter);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = HeteroLRArgs::parse_from(["hetero_lr", "--batch-size", "0"]);
        assert!(args.params().is_err());
    }
}
