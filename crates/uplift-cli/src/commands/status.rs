//! `uplift status`, `uplift diff`, and `uplift sync` commands.

use std::path::Path;

/// Print an environment's reconciliation state.
pub async fn status(config_path: &Path, environment: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let controller = super::build_sync_controller(&config)?;

    let state = controller.get(environment).await?;
    println!("Environment: {environment}");
    println!("Application: {}", config.application_name(environment));
    println!("Status:      {}", state.status);
    println!("Desired:     {}", state.desired_revision);
    println!(
        "Live:        {}",
        if state.live_revision.is_empty() {
            "(none)"
        } else {
            &state.live_revision
        }
    );
    Ok(())
}

/// Print per-resource drift between desired and live state.
pub async fn diff(config_path: &Path, environment: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let controller = super::build_sync_controller(&config)?;

    let resources = controller.diff(environment).await?;
    if resources.is_empty() {
        println!("No managed resources reported for '{environment}'.");
        return Ok(());
    }

    let drifted = resources.iter().filter(|r| !r.in_sync).count();
    println!("Resources ({}, {} drifted):", resources.len(), drifted);
    for resource in &resources {
        let marker = if resource.in_sync { "=" } else { "!" };
        println!("  {} {:<24} {}", marker, resource.kind, resource.name);
    }
    if drifted > 0 {
        println!("Run `uplift sync --env {environment}` to reconcile.");
    }
    Ok(())
}

/// Ask the controller to reconcile an environment now.
pub async fn sync(config_path: &Path, environment: &str, force: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let controller = super::build_sync_controller(&config)?;

    controller.sync(environment, force).await?;
    println!("✔ Sync requested for '{environment}' (force: {force})");
    Ok(())
}
