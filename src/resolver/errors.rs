//! Resolution error types.

use thiserror::Error;

/// Error during build plan resolution.
///
/// All variants fire before any side effect: a request that does not
/// resolve never fetches, patches, or builds anything.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cycle detected in dependency graph: {}", packages.join(" -> "))]
    Cycle { packages: Vec<String> },

    #[error("missing dependency: `{package}` (required by `{required_by}`)")]
    MissingDependency {
        package: String,
        required_by: String,
    },

    #[error("unknown package `{package}`")]
    UnknownPackage { package: String },

    #[error("invalid option selection: {message}")]
    Options { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_members() {
        let err = ResolveError::Cycle {
            packages: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "cycle detected in dependency graph: a -> b -> c"
        );
    }

    #[test]
    fn test_missing_dependency_names_requirer() {
        let err = ResolveError::MissingDependency {
            package: "qrupdate-openblas".to_string(),
            required_by: "octave-openblas".to_string(),
        };
        assert!(err.to_string().contains("qrupdate-openblas"));
        assert!(err.to_string().contains("octave-openblas"));
    }
}
