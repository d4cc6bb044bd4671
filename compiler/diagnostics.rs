// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 Error reporting for the compiler.

 Every failure surfaces as a [`CompileError`]; the fatal kinds abort the
 current operation, the recoverable kinds ([`CompileError::is_recoverable`])
 are returned to the caller with the repository left untouched.
*/

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum CompileError {
    /// File could not be read or written
    #[error("could not access {}: {}", .path.display(), .source)]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error without a file attached (e.g. writing to a stream)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing library header, unclosed element, mismatched tags
    #[error("malformed triggers XML: {0}")]
    MalformedXml(String),

    /// A cross-element reference `(library, kind, id)` did not resolve
    #[error("unresolved reference: {0}")]
    BrokenReference(String),

    /// The element store contradicts one of its structural invariants
    #[error("invariant violated: {0}")]
    InvalidInvariant(String),

    /// An unrecognized `#NAME` in a script code body
    #[error("unknown script macro: {0}")]
    UnknownMacro(String),

    /// A mutation was requested on an element that cannot host it
    #[error("{0}")]
    BadMutationTarget(String),

    /// A caller-supplied argument failed to parse or validate
    #[error("invalid argument: {0}")]
    BadArgument(String),
}

impl CompileError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File { path: path.into(), source }
    }

    /// Recoverable errors leave the repository unchanged and are meant to be
    /// reported to the user rather than aborting the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BadMutationTarget(_) | Self::BadArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(CompileError::BadMutationTarget("nope".into()).is_recoverable());
        assert!(CompileError::BadArgument("nope".into()).is_recoverable());
        assert!(!CompileError::MalformedXml("nope".into()).is_recoverable());
        assert!(!CompileError::UnknownMacro("FOO".into()).is_recoverable());
    }

    #[test]
    fn file_error_keeps_the_path() {
        let err = CompileError::file(
            "Mods/Missing.SC2Mod/Triggers",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let message = err.to_string();
        assert!(message.contains("Mods/Missing.SC2Mod/Triggers"));
        assert!(message.contains("gone"));
    }
}
