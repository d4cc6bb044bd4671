// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*! Deterministic re-emission of a library.

The serializer sorts the element store (see the sort order on
[`TriggerLib::sorted_elements`]) and dumps each element's raw lines back out,
re-indented by the shared indentation state machine. Localization is written
as lexicographically sorted `Key=Value` lines.
*/

use std::path::Path;

use crate::diagnostics::{CompileError, Result};
use crate::element_tree::TriggerLib;
use crate::lexer;

/// Serialize the triggers XML for a library.
///
/// The native library is never serialized; asking for it is an invariant
/// violation.
pub fn serialize_triggers(lib: &TriggerLib) -> Result<String> {
    if lib.is_native() {
        return Err(CompileError::InvalidInvariant(
            "the native library is read-only and is never serialized".into(),
        ));
    }
    let sorted = lib.sorted_elements()?;
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<TriggerData>\n");
    out.push_str(&format!("    <Library Id=\"{}\">\n", lib.library));
    for element in &sorted {
        let mut depth = 2;
        for line in element.lines.borrow().iter() {
            let (this, next) = lexer::indentation(line, depth);
            depth = next;
            out.push_str(&"    ".repeat(this.max(0) as usize));
            out.push_str(line);
            out.push('\n');
        }
        if depth != 2 {
            return Err(CompileError::InvalidInvariant(format!(
                "element {element} has unbalanced tags"
            )));
        }
    }
    out.push_str("    </Library>\n");
    out.push_str("</TriggerData>");
    Ok(out)
}

pub fn write_triggers(lib: &TriggerLib, path: &Path) -> Result<()> {
    let text = serialize_triggers(lib)?;
    std::fs::write(path, text).map_err(|e| CompileError::file(path, e))?;
    tracing::info!(library = %lib.library, path = %path.display(), "wrote triggers");
    Ok(())
}

/// The localization file, sorted ascending by key.
pub fn serialize_trigger_strings(lib: &TriggerLib) -> String {
    let mut out = String::new();
    for (key, value) in &lib.trigger_strings {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

pub fn write_trigger_strings(lib: &TriggerLib, path: &Path) -> Result<()> {
    std::fs::write(path, serialize_trigger_strings(lib))
        .map_err(|e| CompileError::file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<TriggerData>
    <Library Id="ABCD1234">
        <Root>
            <Item Type="Category" Library="ABCD1234" Id="00000010"/>
        </Root>
        <Element Type="Category" Id="00000010">
            <Item Type="FunctionDef" Library="ABCD1234" Id="00000020"/>
        </Element>
        <Element Type="FunctionDef" Id="00000020">
            <Identifier>DoThing</Identifier>
            <ScriptCode>
                f();
            </ScriptCode>
            <Parameter Type="ParamDef" Library="ABCD1234" Id="00000030"/>
        </Element>
        <Element Type="ParamDef" Id="00000030">
            <Identifier>value</Identifier>
        </Element>
    </Library>
</TriggerData>"#;

    #[test]
    fn round_trips_through_the_parser() {
        let lib = parser::parse_triggers_source(SOURCE, "Proj").unwrap();
        let serialized = serialize_triggers(&lib).unwrap();
        let reparsed = parser::parse_triggers_source(&serialized, "Proj").unwrap();
        let keys: Vec<_> = lib.objects.keys().cloned().collect();
        let mut reparsed_keys: Vec<_> = reparsed.objects.keys().cloned().collect();
        let mut sorted_keys = keys.clone();
        sorted_keys.sort();
        reparsed_keys.sort();
        assert_eq!(sorted_keys, reparsed_keys);
        for element in lib.objects.values() {
            let parent = lib.parent_of(element).unwrap();
            let reparsed_parent = reparsed
                .parent_of(&reparsed.element(&element.id, element.kind).unwrap())
                .unwrap();
            assert_eq!(parent.key(), reparsed_parent.key());
        }
        // serializing the reparsed store is a fixed point
        assert_eq!(serialized, serialize_triggers(&reparsed).unwrap());
    }

    #[test]
    fn indentation_matches_the_editor_layout() {
        let lib = parser::parse_triggers_source(SOURCE, "Proj").unwrap();
        let serialized = serialize_triggers(&lib).unwrap();
        assert!(serialized.contains("    <Library Id=\"ABCD1234\">"));
        assert!(serialized.contains("\n        <Root>\n"));
        assert!(serialized.contains("\n            <Item Type=\"Category\" Library=\"ABCD1234\" Id=\"00000010\"/>\n"));
        assert!(serialized.contains("\n            <ScriptCode>\n"));
        assert!(serialized.contains("\n                f();\n"));
        assert!(serialized.ends_with("</TriggerData>"));
    }

    #[test]
    fn refuses_the_native_library() {
        let mut lib = parser::parse_triggers_source(SOURCE, "Native").unwrap();
        lib.name = "Native".into();
        assert!(matches!(
            serialize_triggers(&lib),
            Err(CompileError::InvalidInvariant(_))
        ));
    }

    #[test]
    fn trigger_strings_round_trip_sorted() {
        let mut lib = parser::parse_triggers_source(SOURCE, "Proj").unwrap();
        lib.trigger_strings = parser::parse_trigger_strings_source(
            "Trigger/Name/lib_ABCD1234_00000020=Zed\nCategory/Name/lib_ABCD1234_00000010=Alpha\n",
        );
        let written = serialize_trigger_strings(&lib);
        assert_eq!(
            written,
            "Category/Name/lib_ABCD1234_00000010=Alpha\nTrigger/Name/lib_ABCD1234_00000020=Zed\n"
        );
        assert_eq!(parser::parse_trigger_strings_source(&written), lib.trigger_strings);
    }
}
