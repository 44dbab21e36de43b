//! The patch engine: ordered text substitutions over an extracted source
//! tree.
//!
//! Every operation must match at least once. A zero-match operation means
//! the recipe has drifted from the source it describes, and that must
//! surface as an error rather than a silent no-op.

use std::path::Path;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::core::PatchOp;

/// Error applying a patch operation.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The operation matched nothing: the recipe is stale relative to
    /// the actual source.
    #[error("patch matched nothing in `{file}` (pattern `{pattern}`)")]
    Mismatch { file: String, pattern: String },

    #[error("patch target `{file}` is unreadable: {source}")]
    Read {
        file: String,
        source: std::io::Error,
    },

    #[error("failed to write patched `{file}`: {source}")]
    Write {
        file: String,
        source: std::io::Error,
    },
}

/// Apply all operations in declared order. Stops at the first failure.
pub fn apply_all(ops: &[PatchOp], source_root: &Path) -> Result<(), PatchError> {
    for op in ops {
        apply(op, source_root)?;
    }
    Ok(())
}

/// Apply a single operation to the tree rooted at `source_root`.
pub fn apply(op: &PatchOp, source_root: &Path) -> Result<(), PatchError> {
    let path = source_root.join(op.file());
    let contents = std::fs::read_to_string(&path).map_err(|source| PatchError::Read {
        file: op.file().to_string(),
        source,
    })?;

    let patched = match op {
        PatchOp::Literal { find, replace, .. } => {
            let matches = contents.matches(find.as_str()).count();
            if matches == 0 {
                return Err(mismatch(op));
            }
            debug!(file = op.file(), matches, "literal replace");
            contents.replace(find.as_str(), replace)
        }
        PatchOp::Regex { regex, replace, .. } => {
            // Validated at recipe load; a compile failure here is a bug.
            let re = Regex::new(regex).expect("patch regex validated at load");
            if re.find(&contents).is_none() {
                return Err(mismatch(op));
            }
            debug!(file = op.file(), "regex replace");
            re.replace_all(&contents, replace.as_str()).into_owned()
        }
        PatchOp::Append { append, .. } => {
            debug!(file = op.file(), "append line");
            let mut patched = contents;
            if !patched.is_empty() && !patched.ends_with('\n') {
                patched.push('\n');
            }
            patched.push_str(append);
            patched.push('\n');
            patched
        }
    };

    std::fs::write(&path, patched).map_err(|source| PatchError::Write {
        file: op.file().to_string(),
        source,
    })
}

fn mismatch(op: &PatchOp) -> PatchError {
    PatchError::Mismatch {
        file: op.file().to_string(),
        pattern: op.pattern().to_string(),
    }
}
