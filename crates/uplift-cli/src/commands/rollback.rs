//! `uplift rollback` command.

use std::path::Path;

/// Revert the most recent promotion commit touching an environment.
pub async fn run(config_path: &Path, environment: &str, requested_by: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let engine = super::build_engine(&config)?;

    match engine.rollback(environment, requested_by).await {
        Ok(sha) => {
            println!("✔ Rolled back '{environment}'; trunk is now {sha}");
            println!("The sync controller will converge the environment shortly.");
            Ok(())
        }
        Err(err) => {
            eprintln!("✖ Rollback failed (kind={}): {err}", err.kind().as_str());
            Err(err.into())
        }
    }
}
