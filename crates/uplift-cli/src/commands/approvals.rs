//! `uplift approvals` commands.

use anyhow::Context;
use std::path::Path;

use uplift_publish::{ApprovalCheck, ReviewId};

/// Show the approval gate state for a review.
pub async fn check(config_path: &Path, review_id: &str, environment: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let engine = super::build_engine(&config)?;
    let env = engine
        .planner()
        .environment(environment)
        .with_context(|| format!("unknown environment '{environment}'"))?;

    let review_id = ReviewId(review_id.to_string());
    match engine.publisher().check_approvals(&review_id, env).await? {
        ApprovalCheck::Satisfied => {
            println!("✔ Approval gate satisfied for review {review_id}");
            println!("Run: uplift approvals merge {review_id} --env {environment}");
        }
        ApprovalCheck::Pending { missing_groups } => {
            println!("Review {review_id} is still pending approvals.");
            if missing_groups.is_empty() {
                println!("  More distinct approvals are required.");
            } else {
                println!("  Groups without an approving member:");
                for group in &missing_groups {
                    println!("    - {group}");
                }
            }
        }
    }
    Ok(())
}

/// Merge a review if its approval gate is satisfied.
pub async fn merge(config_path: &Path, review_id: &str, environment: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let engine = super::build_engine(&config)?;
    let env = engine
        .planner()
        .environment(environment)
        .with_context(|| format!("unknown environment '{environment}'"))?;

    let review_id = ReviewId(review_id.to_string());
    match engine
        .publisher()
        .merge_when_approved(&review_id, env)
        .await?
    {
        Some(sha) => {
            println!("✔ Merged review {review_id}; trunk is now {sha}");
            println!("The sync controller will converge '{environment}' shortly.");
        }
        None => {
            println!("✖ Approval gate not satisfied; review {review_id} was not merged.");
            println!("Run: uplift approvals check {review_id} --env {environment}");
        }
    }
    Ok(())
}
