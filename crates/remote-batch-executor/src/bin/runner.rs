//! Remote-side runner.
//!
//! Invoked by the decode-then-execute wrapper line: reads the base64
//! batch payload from stdin, executes it, and leaves status and result
//! artifacts in the artifact directory for the controller to poll.
//!
//! Individual task failures are recorded in the result manifest; the
//! process itself exits non-zero only when the batch could not run at
//! all (bad payload, unwritable artifact directory).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;

use remote_batch_core::BatchPayload;
use remote_batch_executor::{BatchExecutor, DirArtifacts};

#[derive(Debug, Parser)]
#[command(name = "remote-batch-runner", version, about = "Execute an encoded task batch")]
struct Args {
    /// Directory where status and result artifacts are written.
    #[arg(long)]
    artifact_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut blob = String::new();
    tokio::io::stdin()
        .read_to_string(&mut blob)
        .await
        .context("reading payload from stdin")?;
    let payload = BatchPayload::decode(&blob).context("decoding batch payload")?;

    let store = Arc::new(DirArtifacts::new(&args.artifact_dir));
    let executor = BatchExecutor::new(store);
    let results = executor
        .execute(&payload)
        .await
        .context("executing batch")?;

    tracing::info!(
        batch_id = %payload.batch_id,
        tasks = results.len(),
        "batch run complete"
    );
    Ok(())
}
