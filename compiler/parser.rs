// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*! The Triggers file parser.

This module reads the three files that make up one library — the `Triggers`
XML, the `TriggerStrings` localization, and the optional `DocumentInfo`
dependency list — into a [`TriggerLib`] with its indices built.

The XML reader is deliberately line oriented: the editor writes one tag per
line, so elements are accumulated between `<Element …>`/`</Element>` (and
`<Root>`/`</Root>`) boundary lines with each line whitespace-trimmed.
*/

use std::collections::BTreeMap;
use std::path::Path;

use smol_str::SmolStr;

use crate::diagnostics::{CompileError, Result};
use crate::element_tree::{Element, TriggerLib};

/// Library tag used for empty or nearly-empty trigger files.
pub const NO_LIBRARY: &str = "nolibrary";

/// Strip a UTF-8 BOM, including the mojibake form it takes after a
/// round-trip through a Latin-1 read.
fn fix_bom(source: &str) -> &str {
    source.strip_prefix('\u{feff}').or_else(|| source.strip_prefix("ï»¿")).unwrap_or(source)
}

fn parse_library_header(line: &str) -> Option<SmolStr> {
    let rest = line.strip_prefix("<Library Id=\"").or_else(|| line.strip_prefix("<Standard Id=\""))?;
    let (id, rest) = rest.split_once('"')?;
    if id.is_empty() || !(rest == ">" || rest == "/>") {
        return None;
    }
    Some(SmolStr::new(id))
}

/// Parse the body of a `Triggers` file into a library named `name`.
///
/// Line 3 must carry the library id. A file of three lines or fewer becomes
/// a library whose only element is an empty root, tagged [`NO_LIBRARY`].
pub fn parse_triggers_source(source: &str, name: &str) -> Result<TriggerLib> {
    let source = fix_bom(source);
    let mut lib = TriggerLib::new(name);
    let lines: Vec<&str> = source.lines().collect();
    if lines.len() <= 3 {
        lib.library = SmolStr::new(NO_LIBRARY);
        lib.insert(Element::from_lines(
            vec!["<Root>".into(), "</Root>".into()],
            lib.library.clone(),
        )?);
        lib.update_indices()?;
        return Ok(lib);
    }
    let mut current: Option<Vec<String>> = None;
    for (index, raw) in lines.iter().enumerate().skip(2) {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line_number == 3 {
            lib.library = parse_library_header(line).ok_or_else(|| {
                CompileError::MalformedXml(format!("line 3 didn't have the library id: {line}"))
            })?;
        } else if line == "</Library>" || line == "</Standard>" || line == "</TriggerData>" {
            continue;
        } else if line.starts_with("<Element") || line == "<Root>" {
            if current.is_some() {
                return Err(CompileError::MalformedXml(format!(
                    "element opened inside another element at line {line_number}"
                )));
            }
            current = Some(vec![line.to_string()]);
        } else if line == "</Element>" || line == "</Root>" {
            let mut buffer = current.take().ok_or_else(|| {
                CompileError::MalformedXml(format!("stray {line} at line {line_number}"))
            })?;
            buffer.push(line.to_string());
            lib.insert(Element::from_lines(buffer, lib.library.clone())?);
        } else {
            let buffer = current.as_mut().ok_or_else(|| {
                CompileError::MalformedXml(format!(
                    "content outside any element at line {line_number}: {line}"
                ))
            })?;
            buffer.push(line.to_string());
        }
    }
    if current.is_some() {
        return Err(CompileError::MalformedXml("unclosed element at end of file".into()));
    }
    lib.update_indices()?;
    lib.update_keyword_parameters()?;
    tracing::debug!(library = %lib.library, elements = lib.objects.len(), "parsed triggers");
    Ok(lib)
}

/// Parse a `TriggerStrings` localization file: `Key=Value` per line.
pub fn parse_trigger_strings_source(source: &str) -> BTreeMap<String, String> {
    let source = fix_bom(source);
    let mut strings = BTreeMap::new();
    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            strings.insert(key.to_string(), value.to_string());
        }
    }
    strings
}

/// Parse the `<Dependencies>` block of a `DocumentInfo` file.
pub fn parse_dependencies_source(source: &str) -> Vec<String> {
    let source = fix_bom(source);
    let mut dependencies = vec![];
    let mut in_dependencies = false;
    for line in source.lines() {
        let line = line.trim();
        if line == "<Dependencies>" {
            in_dependencies = true;
        } else if line == "</Dependencies>" {
            in_dependencies = false;
        } else if in_dependencies {
            let Some(rest) = line.strip_prefix("<Value>file:Mods") else { continue };
            let Some(rest) = rest.strip_prefix(['/', '\\']) else { continue };
            let Some(name) = rest.strip_suffix(".SC2Mod</Value>") else { continue };
            if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                dependencies.push(name.to_string());
            }
        }
    }
    dependencies
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| CompileError::file(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Load one library from disk: the triggers file, the localization next to
/// it (absent file means an empty mapping, not an error), and the sibling
/// `DocumentInfo` dependency list when present.
pub fn load_library(
    name: &str,
    triggers_path: &Path,
    trigger_strings_path: &Path,
) -> Result<TriggerLib> {
    let mut lib = parse_triggers_source(&read_lossy(triggers_path)?, name)?;
    let document_info = triggers_path.parent().map(|dir| dir.join("DocumentInfo"));
    if let Some(document_info) = document_info.filter(|p| p.is_file()) {
        lib.dependencies = parse_dependencies_source(&read_lossy(&document_info)?);
    }
    match std::fs::read(trigger_strings_path) {
        Ok(bytes) => {
            lib.trigger_strings =
                parse_trigger_strings_source(&String::from_utf8_lossy(&bytes));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(CompileError::file(trigger_strings_path, e)),
    }
    tracing::info!(
        library = %lib.library,
        name,
        strings = lib.trigger_strings.len(),
        dependencies = lib.dependencies.len(),
        "loaded library"
    );
    Ok(lib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element_tree::{ElementKind, ROOT_ID};

    pub(crate) const SMALL_LIBRARY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<TriggerData>
    <Library Id="ABCD1234">
        <Root>
            <Item Type="Category" Library="ABCD1234" Id="00000010"/>
        </Root>
        <Element Type="Category" Id="00000010">
            <Item Type="Trigger" Library="ABCD1234" Id="00000020"/>
        </Element>
        <Element Type="Trigger" Id="00000020">
            <Identifier>MyTrigger</Identifier>
        </Element>
    </Library>
</TriggerData>
"#;

    #[test]
    fn parses_a_small_library() {
        let lib = parse_triggers_source(SMALL_LIBRARY, "Proj").unwrap();
        assert_eq!(lib.library, "ABCD1234");
        assert_eq!(lib.objects.len(), 3);
        let trigger = lib.element("00000020", ElementKind::Trigger).unwrap();
        assert_eq!(trigger.inline_value("Identifier").as_deref(), Some("MyTrigger"));
        let category = lib.parent_of(&trigger).unwrap();
        assert_eq!(category.kind, ElementKind::Category);
        assert_eq!(lib.parent_of(&category).unwrap().id, ROOT_ID);
    }

    #[test]
    fn bom_and_mojibake_are_stripped() {
        let with_bom = format!("\u{feff}{SMALL_LIBRARY}");
        assert!(parse_triggers_source(&with_bom, "Proj").is_ok());
        let mojibake = format!("ï»¿{SMALL_LIBRARY}");
        assert!(parse_triggers_source(&mojibake, "Proj").is_ok());
    }

    #[test]
    fn nearly_empty_file_becomes_nolibrary() {
        let lib = parse_triggers_source(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<TriggerData/>\n",
            "Proj",
        )
        .unwrap();
        assert_eq!(lib.library, NO_LIBRARY);
        let root = lib.root().unwrap();
        assert!(lib.children_of(&root).is_empty());
    }

    #[test]
    fn missing_library_header_is_fatal() {
        let source = "<?xml version=\"1.0\"?>\n<TriggerData>\n<NotALibrary>\n</TriggerData>\n";
        assert!(matches!(
            parse_triggers_source(source, "Proj"),
            Err(CompileError::MalformedXml(_))
        ));
    }

    #[test]
    fn unclosed_element_is_fatal() {
        let source = "<?xml version=\"1.0\"?>\n<TriggerData>\n<Library Id=\"AB\">\n<Element Type=\"Trigger\" Id=\"00000001\">\n</Library>\n</TriggerData>\n";
        assert!(matches!(
            parse_triggers_source(source, "Proj"),
            Err(CompileError::MalformedXml(_))
        ));
    }

    #[test]
    fn trigger_strings_parse_and_skip_blanks() {
        let strings =
            parse_trigger_strings_source("\u{feff}B/Name/lib_AB_00000002=Second\nA/Name/lib_AB_00000001=First=Equal\n\n");
        assert_eq!(strings.len(), 2);
        assert_eq!(strings["A/Name/lib_AB_00000001"], "First=Equal");
        assert_eq!(strings["B/Name/lib_AB_00000002"], "Second");
    }

    #[test]
    fn dependencies_parse() {
        let source = "<?xml version=\"1.0\"?>\n<DocInfo>\n<Dependencies>\n    <Value>file:Mods/ArchipelagoCore.SC2Mod</Value>\n    <Value>file:Mods\\ArchipelagoPlayer.SC2Mod</Value>\n</Dependencies>\n<Value>file:Mods/Ignored.SC2Mod</Value>\n</DocInfo>\n";
        assert_eq!(parse_dependencies_source(source), vec!["ArchipelagoCore", "ArchipelagoPlayer"]);
    }

    #[test]
    fn load_library_tolerates_missing_strings() {
        let dir = tempfile::tempdir().unwrap();
        let triggers = dir.path().join("Triggers");
        std::fs::write(&triggers, SMALL_LIBRARY).unwrap();
        let lib = load_library("Proj", &triggers, &dir.path().join("TriggerStrings.txt")).unwrap();
        assert!(lib.trigger_strings.is_empty());
    }
}
