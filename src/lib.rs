//! # Hetero logistic regression with Paillier
//!
//! Logistic regression over vertically partitioned data: a guest holding labels and some
//! features, a host holding the other features and an arbiter holding the Paillier private key
//! train one model without revealing features or labels to each other.
//!
//! [hetero_lr] is the main module of this library. [optim] holds the encrypted gradient and loss
//! math and the optimizers, [transfer] the tagged message delivery between the roles.
#![warn(missing_docs)]

pub mod channel_utils;
pub mod cli_utils;
pub mod data_utils;
pub mod encrypt;
pub mod error;
pub mod feature;
pub mod hetero_lr;
pub mod logging;
pub mod model_selection;
pub mod optim;
pub mod param;
pub mod table;
pub mod transfer;
