// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
# autotrigger-compiler

Compiler library for the GUI-authored trigger format of the StarCraft II
editor. It parses `Triggers` XML libraries into an element graph, regenerates
the Galaxy sources the editor would emit, supports programmatic mutation of
the graph, and serializes the result back, so trigger logic can live in
source control instead of the editor.

The pipeline: [`parser`] → [`element_tree`] → ([`edits`] ↔ store) →
[`generator`]; [`serializer`] re-emits the XML and localization.
*/

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

pub mod builtin_macros;
pub mod diagnostics;
pub mod edits;
pub mod element_tree;
pub mod generator;
pub mod lexer;
pub mod literals;
pub mod parser;
pub mod serializer;
pub mod typeregister;

pub use diagnostics::{CompileError, Result};
pub use element_tree::Repository;

/// Tool configuration, read from a `config.json` co-located with the tool.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CompilerConfiguration {
    /// Path to the native library's triggers file.
    pub native: PathBuf,
    /// Path to the native library's trigger strings.
    pub native_triggerstrings: PathBuf,
    /// Directory holding the project's `<Name>.SC2Mod` folders.
    #[serde(default = "default_mods_folder")]
    pub mods_folder: PathBuf,
    /// Project libraries to load, in dependency order.
    #[serde(default)]
    pub mods: Vec<String>,
}

fn default_mods_folder() -> PathBuf {
    PathBuf::from("Mods")
}

impl CompilerConfiguration {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CompileError::file(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| CompileError::BadArgument(format!("invalid {}: {e}", path.display())))
    }

    pub fn triggers_path(&self, mod_name: &str) -> PathBuf {
        self.mods_folder.join(format!("{mod_name}.SC2Mod")).join("Triggers")
    }

    pub fn trigger_strings_path(&self, mod_name: &str) -> PathBuf {
        self.mods_folder
            .join(format!("{mod_name}.SC2Mod"))
            .join("enUS.SC2Data")
            .join("LocalizedData")
            .join("TriggerStrings.txt")
    }
}

/// Load the native library plus every configured project library into a
/// repository, native first.
pub fn load_repository(config: &CompilerConfiguration) -> Result<Repository> {
    let mut libs =
        vec![parser::load_library("Native", &config.native, &config.native_triggerstrings)?];
    for mod_name in &config.mods {
        libs.push(parser::load_library(
            mod_name,
            &config.triggers_path(mod_name),
            &config.trigger_strings_path(mod_name),
        )?);
    }
    Repository::new(libs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_parses_with_defaults() {
        let config: CompilerConfiguration = serde_json::from_str(
            r#"{ "native": "ntve/Triggers", "native_triggerstrings": "ntve/Strings.txt" }"#,
        )
        .unwrap();
        assert_eq!(config.mods_folder, PathBuf::from("Mods"));
        assert!(config.mods.is_empty());
        assert_eq!(
            config.triggers_path("ArchipelagoTriggers"),
            PathBuf::from("Mods/ArchipelagoTriggers.SC2Mod/Triggers")
        );
    }
}
