//! `uplift promote` command.

use std::path::Path;

use uplift_core::PromotionRequest;
use uplift_engine::Outcome;

/// Promote a commit into an environment and print the outcome.
///
/// Failures are printed with their stable error kind so CI callers can
/// branch on it without parsing the message.
pub async fn run(
    config_path: &Path,
    commit: &str,
    environment: &str,
    requested_by: &str,
) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let engine = super::build_engine(&config)?;

    let request = PromotionRequest::new(commit, environment, requested_by);
    println!(
        "Promoting {} into '{}' (request {})...",
        commit, environment, request.id
    );

    match engine.promote(&request).await {
        Ok(Outcome::Committed { sha }) => {
            println!("✔ Committed to trunk: {sha}");
            println!("The sync controller will converge '{environment}' shortly.");
            Ok(())
        }
        Ok(Outcome::ReviewOpened { review_id }) => {
            println!("✔ Opened review {review_id} (awaiting approvals)");
            println!("Next:");
            println!("  uplift approvals check {review_id} --env {environment}");
            println!("  uplift approvals merge {review_id} --env {environment}");
            Ok(())
        }
        Ok(Outcome::AlreadyPromoted) => {
            println!("✔ Already promoted; '{environment}' is at this commit. Nothing to do.");
            Ok(())
        }
        Err(err) => {
            eprintln!("✖ Promotion failed (kind={}): {err}", err.kind().as_str());
            Err(err.into())
        }
    }
}
