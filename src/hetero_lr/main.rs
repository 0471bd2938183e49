use anyhow::{Context, Result};
use clap::Parser;
use hetero_lr_with_paillier::cli_utils::HeteroLRArgs;
use hetero_lr_with_paillier::hetero_lr::run;
use hetero_lr_with_paillier::logging;

fn main() -> Result<()> {
    let args = HeteroLRArgs::parse();

    logging::configure(&args.log)?;
    println!("{:?}", args);

    run(args).with_context(|| "Failed to run the protocol.")?;

    Ok(())
}
