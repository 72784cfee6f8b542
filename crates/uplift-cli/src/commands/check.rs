//! `uplift check` command.
//!
//! Validates the configuration for consistency before anything is promoted:
//! environment definitions, approver group wiring, and the endpoints the
//! engine needs at runtime.

use anyhow::Result;
use std::path::Path;

use uplift_core::{SyncPolicy, UpliftConfig};

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational message.
    Info,
    /// Warning, may indicate a potential issue.
    Warning,
    /// Error, configuration is invalid.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    /// Severity of the finding.
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: String,
    /// Human-readable message describing the finding.
    pub message: String,
    /// Location within the configuration (e.g. "environments.staging").
    pub location: Option<String>,
}

impl CheckFinding {
    fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn extend(&mut self, findings: impl IntoIterator<Item = CheckFinding>) {
        self.findings.extend(findings);
    }

    /// Returns true if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    /// Count of errors.
    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    /// Count of warnings.
    pub fn warning_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    fn print_summary(&self) {
        for finding in &self.findings {
            let location = finding
                .location
                .as_deref()
                .map(|l| format!(" [{l}]"))
                .unwrap_or_default();
            println!(
                "  {} [{}]{}: {}",
                finding.severity, finding.category, location, finding.message
            );
        }

        println!();
        if self.findings.is_empty() {
            println!("✔ All checks passed.");
        } else {
            println!(
                "Summary: {} error(s), {} warning(s)",
                self.error_count(),
                self.warning_count()
            );
        }
    }
}

/// Run all configuration checks and print a summary.
pub fn run(config_path: &Path) -> Result<()> {
    println!("Checking {} ...", config_path.display());

    let config = super::load_config(config_path)?;
    let results = run_quiet(&config);
    results.print_summary();

    if results.has_errors() {
        anyhow::bail!(
            "configuration check failed with {} error(s)",
            results.error_count()
        );
    }
    Ok(())
}

/// Run all checks without printing; used by tests and embedding callers.
pub fn run_quiet(config: &UpliftConfig) -> CheckResults {
    let mut results = CheckResults::default();
    results.extend(check_environments(config));
    results.extend(check_approver_groups(config));
    results.extend(check_endpoints(config));
    results
}

fn check_environments(config: &UpliftConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    if config.environments.is_empty() {
        findings.push(CheckFinding::error(
            "environments",
            "no environments defined; nothing can be promoted",
        ));
        return findings;
    }

    if let Err(err) = config.environment_registry() {
        findings.push(CheckFinding::error("environments", err.to_string()));
    }

    for env in &config.environments {
        let location = format!("environments.{}", env.name);

        if env.name.trim().is_empty() {
            findings.push(
                CheckFinding::error("environments", "environment with an empty name")
                    .at(&location),
            );
        }
        if env.image_tag_prefix.trim().is_empty() {
            findings.push(
                CheckFinding::error(
                    "environments",
                    format!("environment '{}' has an empty image_tag_prefix", env.name),
                )
                .at(&location),
            );
        }
        if env.services.is_empty() {
            findings.push(
                CheckFinding::error(
                    "environments",
                    format!("environment '{}' defines no services", env.name),
                )
                .at(&location),
            );
        }

        let mut seen = std::collections::BTreeSet::new();
        for service in &env.services {
            if service.repository.trim().is_empty() {
                findings.push(
                    CheckFinding::error(
                        "environments",
                        format!(
                            "service '{}' in environment '{}' has an empty repository",
                            service.name, env.name
                        ),
                    )
                    .at(format!("{location}.services.{}", service.name)),
                );
            }
            if !seen.insert(service.name.as_str()) {
                findings.push(
                    CheckFinding::error(
                        "environments",
                        format!(
                            "duplicate service '{}' in environment '{}'",
                            service.name, env.name
                        ),
                    )
                    .at(&location),
                );
            }
        }
    }

    findings
}

fn check_approver_groups(config: &UpliftConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    for env in &config.environments {
        let SyncPolicy::Manual {
            required_approvals,
            approver_groups,
        } = &env.sync_policy
        else {
            continue;
        };
        let location = format!("environments.{}.sync_policy", env.name);

        if *required_approvals == 0 {
            findings.push(
                CheckFinding::error(
                    "approvals",
                    format!(
                        "manual-sync environment '{}' requires zero approvals; use mode: auto instead",
                        env.name
                    ),
                )
                .at(&location),
            );
        }
        if approver_groups.is_empty() {
            findings.push(
                CheckFinding::error(
                    "approvals",
                    format!(
                        "manual-sync environment '{}' names no approver groups",
                        env.name
                    ),
                )
                .at(&location),
            );
        }

        for group in approver_groups {
            match config.approvers.get(group) {
                None => {
                    findings.push(
                        CheckFinding::error(
                            "approvals",
                            format!(
                                "approver group '{}' referenced by '{}' is not defined under approvers",
                                group, env.name
                            ),
                        )
                        .at(&location),
                    );
                }
                Some(members) if members.is_empty() => {
                    findings.push(
                        CheckFinding::error(
                            "approvals",
                            format!("approver group '{group}' has no members"),
                        )
                        .at(format!("approvers.{group}")),
                    );
                }
                Some(_) => {}
            }
        }
    }

    findings
}

fn check_endpoints(config: &UpliftConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    if config.registry.url.trim().is_empty() {
        findings.push(CheckFinding::error(
            "endpoints",
            "registry.url is not set; images cannot be verified",
        ));
    }

    let any_manual = config
        .environments
        .iter()
        .any(|env| env.sync_policy.requires_review());
    let forge_configured =
        config.reviews.api_url.is_some() && config.reviews.repository.is_some();
    if any_manual && !forge_configured {
        findings.push(CheckFinding::warning(
            "endpoints",
            "manual-sync environments exist but no review forge is configured; \
             reviews will not survive this process",
        ));
    }

    if config.sync.server_url.is_none() {
        findings.push(CheckFinding::warning(
            "endpoints",
            "sync.server_url is not set; status, diff, and sync commands will fail",
        ));
    }

    findings
}
