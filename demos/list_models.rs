use anaplan::Client;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // RUST_LOG=anaplan=debug shows every page request.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Configure credentials via env vars or a `.anaplanrc` file.
    let client = Client::from_env()?.with_page_size(100);

    for ws in client.workspaces()? {
        println!("{} ({})", ws.name, ws.id);
        for model in client.models(Some(ws.id.as_str()))? {
            println!(
                "  {} ({}) {}",
                model.name,
                model.id,
                model.active_state.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
