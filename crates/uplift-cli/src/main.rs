use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "uplift", version, about = "GitOps image promotion engine")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "uplift.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Promote a commit's images into an environment.
    Promote {
        /// Full commit SHA of the build being promoted.
        #[arg(long)]
        commit: String,

        /// Target environment name.
        #[arg(long)]
        env: String,

        /// Identity recorded as the requester (CI identity or operator).
        #[arg(long = "as", default_value = "ci")]
        requested_by: String,
    },

    /// Revert the most recent promotion commit touching an environment.
    Rollback {
        /// Environment to roll back.
        #[arg(long)]
        env: String,

        /// Identity recorded as the requester.
        #[arg(long = "as", default_value = "operator")]
        requested_by: String,
    },

    /// Show an environment's reconciliation state (desired vs live).
    Status {
        /// Environment name.
        #[arg(long)]
        env: String,
    },

    /// List per-resource drift between desired and live state.
    Diff {
        /// Environment name.
        #[arg(long)]
        env: String,
    },

    /// Ask the sync controller to reconcile an environment now.
    Sync {
        /// Environment name.
        #[arg(long)]
        env: String,

        /// Replace drifted resources instead of patching them.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Approval-gated review operations for manual-sync environments.
    Approvals {
        #[command(subcommand)]
        cmd: ApprovalsCommand,
    },

    /// Validate the configuration files and report findings.
    Check,
}

#[derive(Subcommand, Debug)]
enum ApprovalsCommand {
    /// Show the approval gate state for a review.
    Check {
        /// Review (pull request) identifier.
        review_id: String,

        /// Environment the review targets.
        #[arg(long)]
        env: String,
    },

    /// Merge a review if and only if its approval gate is satisfied.
    Merge {
        /// Review (pull request) identifier.
        review_id: String,

        /// Environment the review targets.
        #[arg(long)]
        env: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Promote {
            commit,
            env,
            requested_by,
        } => commands::promote::run(&cli.config, &commit, &env, &requested_by).await?,

        Command::Rollback { env, requested_by } => {
            commands::rollback::run(&cli.config, &env, &requested_by).await?
        }

        Command::Status { env } => commands::status::status(&cli.config, &env).await?,

        Command::Diff { env } => commands::status::diff(&cli.config, &env).await?,

        Command::Sync { env, force } => commands::status::sync(&cli.config, &env, force).await?,

        Command::Approvals { cmd } => match cmd {
            ApprovalsCommand::Check { review_id, env } => {
                commands::approvals::check(&cli.config, &review_id, &env).await?
            }
            ApprovalsCommand::Merge { review_id, env } => {
                commands::approvals::merge(&cli.config, &review_id, &env).await?
            }
        },

        Command::Check => commands::check::run(&cli.config)?,
    }

    Ok(())
}
