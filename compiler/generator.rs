// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
The module responsible for the code generation.

There is one sub module for the target language; everything else consumes it
through [`generate`] and [`generate_header`].
*/

use std::io::Write;

use crate::diagnostics::Result;
use crate::element_tree::{Repository, TriggerLib};

pub mod galaxy;

/// Write the generated Galaxy source of one library.
pub fn generate(
    repo: &Repository,
    lib: &TriggerLib,
    destination: &mut impl Write,
) -> Result<()> {
    tracing::debug!(library = %lib.library, "generating galaxy source");
    let output = galaxy::codegen_library(repo, lib)?;
    destination.write_all(output.as_bytes())?;
    destination.write_all(b"\n")?;
    Ok(())
}

/// Write the header sibling (`Lib<tag>_h`): variable, function, and trigger
/// declarations.
pub fn generate_header(
    repo: &Repository,
    lib: &TriggerLib,
    destination: &mut impl Write,
) -> Result<()> {
    let output = galaxy::codegen_library_header(repo, lib)?;
    destination.write_all(output.as_bytes())?;
    destination.write_all(b"\n")?;
    Ok(())
}
