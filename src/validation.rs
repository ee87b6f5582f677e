//! Validation of task names and versions before they become node ids.

use anyhow::{bail, Context, Result};

use crate::models::TaskSpec;

/// Maximum allowed length for task names.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum allowed length for summaries.
pub const MAX_SUMMARY_LENGTH: usize = 500;

/// Validates a task name.
///
/// A name is valid if it is non-empty, at most `MAX_NAME_LENGTH` characters,
/// and contains only alphanumeric characters, dashes and underscores. The
/// `@` separator of node ids is therefore never part of a name.
///
/// ```
/// use trellis::validation::validate_name;
///
/// assert!(validate_name("unit-tests").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("build@1").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Task name cannot be empty");
    }

    if name.len() > MAX_NAME_LENGTH {
        bail!(
            "Task name too long: {} characters (max {})",
            name.len(),
            MAX_NAME_LENGTH
        );
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_chars {
        bail!("Task name '{name}' contains invalid characters. Use only alphanumeric characters, dashes (-), and underscores (_)");
    }

    Ok(())
}

/// Validates that a version is a semantic version (`1.2.0`).
pub fn validate_version(version: &str) -> Result<()> {
    semver::Version::parse(version)
        .with_context(|| format!("Invalid version '{version}': expected semantic version"))?;
    Ok(())
}

/// Validates a whole task spec: name, version, summary length and unique
/// port names per direction.
pub fn validate_task(task: &TaskSpec) -> Result<()> {
    validate_name(&task.name)?;
    validate_version(&task.version)?;

    if task.summary.len() > MAX_SUMMARY_LENGTH {
        bail!(
            "Summary of '{}' too long: {} characters (max {})",
            task.name,
            task.summary.len(),
            MAX_SUMMARY_LENGTH
        );
    }

    for (direction, ports) in [("input", &task.inputs), ("output", &task.outputs)] {
        let mut seen = std::collections::HashSet::new();
        for port in ports {
            if port.name.trim().is_empty() {
                bail!("Task '{}' has an unnamed {direction} port", task.name);
            }
            if !seen.insert(port.name.as_str()) {
                bail!(
                    "Task '{}' declares {direction} port '{}' twice",
                    task.name,
                    port.name
                );
            }
        }
    }

    Ok(())
}
