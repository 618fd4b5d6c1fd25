use anaplan::Client;
use anyhow::{Result, bail};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [workspace, model, file, rest @ ..] = args.as_slice() else {
        bail!("usage: download_file <workspace-id> <model-id> <file-id> [target]");
    };
    let target = rest.first().map(PathBuf::from).unwrap_or_default();

    let client = Client::from_env()?;
    let written = client.download_file(workspace, model, file, &target)?;
    println!("wrote {}", written.display());
    Ok(())
}
