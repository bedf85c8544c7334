//! Companion extension presence and version checks.
//!
//! Two companions matter:
//!
//! - the rich companion (`ms-python.vscode-pylance`) hosts the Rich backend
//!   and must be at least `2022.5.1-pre.1`, or a `dev` build, to take part in
//!   the notebook experiment
//! - the notebook companion (`ms-toolsai.jupyter`) must satisfy
//!   `>=2022.4.100`
//!
//! Unparseable or missing versions never pass a check.

use crate::host::ExtensionRegistry;
use semver::{Version, VersionReq};
use tracing::trace;

pub const RICH_COMPANION_ID: &str = "ms-python.vscode-pylance";
pub const NOTEBOOK_COMPANION_ID: &str = "ms-toolsai.jupyter";

const RICH_COMPANION_MINIMUM: &str = "2022.5.1-pre.1";
const NOTEBOOK_COMPANION_REQUIREMENT: &str = ">=2022.4.100";

pub fn is_rich_companion_installed(extensions: &dyn ExtensionRegistry) -> bool {
    extensions.extension(RICH_COMPANION_ID).is_some()
}

pub fn is_notebook_companion_installed(extensions: &dyn ExtensionRegistry) -> bool {
    extensions.extension(NOTEBOOK_COMPANION_ID).is_some()
}

pub fn rich_companion_supports_experiment(extensions: &dyn ExtensionRegistry) -> bool {
    installed_version(extensions, RICH_COMPANION_ID)
        .is_some_and(|version| is_at_least_or_dev(&version, RICH_COMPANION_MINIMUM))
}

pub fn notebook_companion_supports_experiment(extensions: &dyn ExtensionRegistry) -> bool {
    installed_version(extensions, NOTEBOOK_COMPANION_ID)
        .is_some_and(|version| satisfies(&version, NOTEBOOK_COMPANION_REQUIREMENT))
}

fn installed_version(extensions: &dyn ExtensionRegistry, id: &str) -> Option<String> {
    extensions.extension(id).and_then(|info| info.version)
}

/// Whether `version` satisfies the semver `requirement`.
pub fn satisfies(version: &str, requirement: &str) -> bool {
    match (Version::parse(version.trim()), VersionReq::parse(requirement)) {
        (Ok(version), Ok(requirement)) => requirement.matches(&version),
        (version, requirement) => {
            trace!(?version, ?requirement, "Unparseable version check");
            false
        }
    }
}

/// Whether `version >= minimum`, or `version` carries a `dev` pre-release
/// component.
pub fn is_at_least_or_dev(version: &str, minimum: &str) -> bool {
    let (Ok(version), Ok(minimum)) = (Version::parse(version.trim()), Version::parse(minimum)) else {
        return false;
    };
    version >= minimum || version.pre.as_str().split('.').any(|part| part == "dev")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeExtensions;

    #[test]
    fn test_rich_companion_minimum() {
        assert!(is_at_least_or_dev("2022.5.1-pre.1", RICH_COMPANION_MINIMUM));
        assert!(is_at_least_or_dev("2022.5.1", RICH_COMPANION_MINIMUM));
        assert!(is_at_least_or_dev("2023.1.10", RICH_COMPANION_MINIMUM));
        assert!(!is_at_least_or_dev("2022.5.0", RICH_COMPANION_MINIMUM));
        assert!(!is_at_least_or_dev("2022.5.1-pre.0", RICH_COMPANION_MINIMUM));
    }

    #[test]
    fn test_dev_builds_pass() {
        assert!(is_at_least_or_dev("2021.1.0-dev", RICH_COMPANION_MINIMUM));
        assert!(is_at_least_or_dev("2021.1.0-dev.3", RICH_COMPANION_MINIMUM));
        assert!(!is_at_least_or_dev("2021.1.0-devel", RICH_COMPANION_MINIMUM));
    }

    #[test]
    fn test_notebook_companion_requirement() {
        assert!(satisfies("2022.4.100", NOTEBOOK_COMPANION_REQUIREMENT));
        assert!(satisfies("2023.1.0", NOTEBOOK_COMPANION_REQUIREMENT));
        assert!(!satisfies("2022.4.99", NOTEBOOK_COMPANION_REQUIREMENT));
        assert!(!satisfies("2023.1.0-pre.1", NOTEBOOK_COMPANION_REQUIREMENT));
    }

    #[test]
    fn test_unparseable_versions_fail() {
        assert!(!satisfies("latest", NOTEBOOK_COMPANION_REQUIREMENT));
        assert!(!satisfies("", NOTEBOOK_COMPANION_REQUIREMENT));
        assert!(!is_at_least_or_dev("2022.5", RICH_COMPANION_MINIMUM));
    }

    #[test]
    fn test_registry_checks() {
        let extensions = FakeExtensions::new();
        assert!(!is_rich_companion_installed(&extensions));
        assert!(!rich_companion_supports_experiment(&extensions));

        extensions.install(RICH_COMPANION_ID, None);
        assert!(is_rich_companion_installed(&extensions));
        // installed without a version never supports the experiment
        assert!(!rich_companion_supports_experiment(&extensions));

        extensions.install(NOTEBOOK_COMPANION_ID, Some("2022.4.100"));
        assert!(is_notebook_companion_installed(&extensions));
        assert!(notebook_companion_supports_experiment(&extensions));
    }
}
