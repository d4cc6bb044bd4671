// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 Hand-written line scanners.

 The triggers format is line oriented: every query the element store or the
 generator makes boils down to scanning one trimmed line for an attribute, a
 cross-element reference, or a `#MACRO(args)` invocation. The scanners here
 replace a regex engine; they are strict about the shapes the editor actually
 emits (8 uppercase hex digit ids, word-character tags).

 This module also hosts the indentation state machine shared by the XML
 serializer, the Galaxy generator, and the interactive pretty-printer.
*/

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// An element id is 8 uppercase hex digits (the reserved `root` id is handled
/// by the element store, not here).
pub fn is_element_id(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

/// The value of `attr="…"` anywhere on the line.
///
/// The attribute name must sit on a word boundary, so asking for `Id` will
/// not match inside `ValueId="…"`. Empty values are skipped like the editor
/// skips them.
pub fn attribute_in<'a>(line: &'a str, attr: &str) -> Option<&'a str> {
    let mut from = 0;
    while let Some(pos) = line[from..].find(attr) {
        let at = from + pos;
        let boundary = at == 0 || !is_word(line.as_bytes()[at - 1]);
        if boundary {
            if let Some(rest) = line[at + attr.len()..].strip_prefix("=\"") {
                if let Some(end) = rest.find('"') {
                    if end > 0 {
                        return Some(&rest[..end]);
                    }
                }
            }
        }
        from = at + 1;
    }
    None
}

/// A `Type="…" Library="…" Id="…"` triple found anywhere on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    pub kind: &'a str,
    pub library: &'a str,
    pub id: &'a str,
}

fn triple_at(s: &str) -> Option<Reference<'_>> {
    let rest = s.strip_prefix("Type=\"")?;
    let kind_end = rest.find('"')?;
    let kind = &rest[..kind_end];
    if kind.is_empty() || !kind.bytes().all(is_word) {
        return None;
    }
    let rest = rest[kind_end..].strip_prefix("\" Library=\"")?;
    let lib_end = rest.find('"')?;
    let library = &rest[..lib_end];
    if library.is_empty() || !library.bytes().all(is_word) {
        return None;
    }
    let rest = rest[lib_end..].strip_prefix("\" Id=\"")?;
    let id = rest.get(..8)?;
    if !is_element_id(id) || rest.as_bytes().get(8) != Some(&b'"') {
        return None;
    }
    Some(Reference { kind, library, id })
}

pub fn type_lib_id(line: &str) -> Option<Reference<'_>> {
    let mut from = 0;
    while let Some(pos) = line[from..].find("Type=\"") {
        let at = from + pos;
        if let Some(r) = triple_at(&line[at..]) {
            return Some(r);
        }
        from = at + 1;
    }
    None
}

/// A whole-line child reference: `<Tag Type="…" Library="…" Id="…"/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef<'a> {
    pub tag: &'a str,
    pub kind: &'a str,
    pub library: &'a str,
    pub id: &'a str,
}

pub fn child_reference(line: &str) -> Option<ChildRef<'_>> {
    let rest = line.strip_prefix('<')?;
    let tag_end = rest.bytes().position(|b| !is_word(b))?;
    if tag_end == 0 {
        return None;
    }
    let tag = &rest[..tag_end];
    let rest = rest[tag_end..].strip_prefix(' ')?;
    let r = triple_at(rest)?;
    let triple_len = 24 + r.kind.len() + r.library.len() + 8;
    if &rest[triple_len..] != "/>" {
        return None;
    }
    Some(ChildRef { tag, kind: r.kind, library: r.library, id: r.id })
}

/// One `#NAME(args)` invocation inside a script code line.
///
/// Arguments are split on every comma with whitespace preserved; the
/// argument text cannot contain a closing parenthesis. A `#` with no
/// complete invocation after it is skipped so a later complete one can
/// still match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroCall {
    pub name: String,
    pub args: Vec<String>,
    pub start: usize,
    /// exclusive, one past the closing parenthesis
    pub end: usize,
}

pub fn find_macro(line: &str) -> Option<MacroCall> {
    let bytes = line.as_bytes();
    let mut at = 0;
    while let Some(pos) = line[at..].find('#') {
        let start = at + pos;
        let mut i = start + 1;
        while i < bytes.len() && is_word(bytes[i]) {
            i += 1;
        }
        if i > start + 1 && bytes.get(i) == Some(&b'(') {
            if let Some(close) = line[i + 1..].find(')') {
                let inner = &line[i + 1..i + 1 + close];
                return Some(MacroCall {
                    name: line[start + 1..i].to_string(),
                    args: inner.split(',').map(str::to_string).collect(),
                    start,
                    end: i + close + 2,
                });
            }
        }
        at = start + 1;
    }
    None
}

fn is_self_contained(line: &str) -> bool {
    if !line.starts_with('<') || !line.ends_with('>') {
        return false;
    }
    let Some(open_end) = line.find('>') else { return false };
    let open = &line[1..open_end];
    if open.is_empty() || open.contains(['/', '<']) {
        return false;
    }
    let rest = &line[open_end + 1..];
    let Some(close_start) = rest.find("</") else { return false };
    if rest[..close_start].contains('<') {
        return false;
    }
    let Some(close) = rest[close_start + 2..].strip_suffix('>') else { return false };
    !close.is_empty() && !close.contains(['/', '<', '>'])
}

/// Returns `(indent of this line, depth for the next line)`.
///
/// Drives both XML lines and generated Galaxy lines, which is why braces and
/// parentheses take part alongside tags.
pub fn indentation(line: &str, mut depth: i32) -> (i32, i32) {
    if line.is_empty() {
        return (0, depth);
    }
    let mut this = depth;
    if line.starts_with("</") && line.ends_with('>') {
        depth -= 1;
        this = depth;
    } else if line.starts_with('<') && line.ends_with("/>") {
        // self-closing, stays level
    } else if is_self_contained(line) {
        // <Tag>value</Tag> on one line, stays level
    } else if line.starts_with('<') && line.ends_with('>') {
        depth += 1;
    } else if line.ends_with('(') || line.ends_with('{') {
        depth += 1;
    } else if line.starts_with(')') || line.starts_with('}') {
        depth -= 1;
        this = depth;
    }
    (this, depth)
}

/// Indent a block of lines with four spaces per level, returning the depth
/// after the block so statement sequences can share one running depth.
pub fn indent_lines(lines: &[String], mut depth: i32) -> (i32, Vec<String>) {
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let (this, next) = indentation(line, depth);
        depth = next;
        if line.is_empty() {
            out.push(String::new());
        } else {
            out.push(format!("{}{}", "    ".repeat(this.max(0) as usize), line));
        }
    }
    (depth, out)
}

pub fn unescape_xml(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_respects_word_boundaries() {
        let line = r#"<ValueId Id="AbilTrain"/>"#;
        assert_eq!(attribute_in(line, "Id"), Some("AbilTrain"));
        let line = r#"<ValueType Type="int"/>"#;
        assert_eq!(attribute_in(line, "Type"), Some("int"));
        // `Id` must not match inside `ValueId`
        let line = r#"<Thing ValueId="x"/>"#;
        assert_eq!(attribute_in(line, "Id"), None);
        // empty values are skipped
        assert_eq!(attribute_in(r#"<T Id=""/>"#, "Id"), None);
    }

    #[test]
    fn triple_extraction() {
        let line = r#"<FunctionDef Type="FunctionDef" Library="Ntve" Id="9F8EF8FB"/>"#;
        let r = type_lib_id(line).unwrap();
        assert_eq!((r.kind, r.library, r.id), ("FunctionDef", "Ntve", "9F8EF8FB"));
        // lowercase hex is not an element id
        assert_eq!(type_lib_id(r#"<X Type="Param" Library="L" Id="9f8ef8fb"/>"#), None);
        assert_eq!(type_lib_id("<Identifier>foo</Identifier>"), None);
    }

    #[test]
    fn child_reference_is_whole_line() {
        let line = r#"<Item Type="Category" Library="ABFE498B" Id="28E8D3FE"/>"#;
        let r = child_reference(line).unwrap();
        assert_eq!((r.tag, r.kind, r.library, r.id), ("Item", "Category", "ABFE498B", "28E8D3FE"));
        // trailing content disqualifies
        assert!(child_reference(r#"<Item Type="Category" Library="AB" Id="28E8D3FE"/> junk"#)
            .is_none());
        assert!(child_reference("<Identifier>foo</Identifier>").is_none());
    }

    #[test]
    fn macro_scanning() {
        let m = find_macro("x = #PARAM(value);").unwrap();
        assert_eq!(m.name, "PARAM");
        assert_eq!(m.args, vec!["value"]);
        assert_eq!(&"x = #PARAM(value);"[m.start..m.end], "#PARAM(value)");

        let m = find_macro(r#"#SUBFUNCS(if," && ")"#).unwrap();
        assert_eq!(m.args, vec!["if", "\" && \""]);

        // the argument text runs to the first closing parenthesis
        let m = find_macro("#IFHAVESUBFUNCS(else,foo #PARAM(x)").unwrap();
        assert_eq!(m.name, "IFHAVESUBFUNCS");
        assert_eq!(m.args, vec!["else", "foo #PARAM(x"]);
        // unterminated: nothing matches
        assert_eq!(find_macro("#IFHAVESUBFUNCS(else,foo"), None);
        assert_eq!(find_macro("no macros here"), None);
    }

    #[test]
    fn indentation_state_machine() {
        assert_eq!(indentation("", 3), (0, 3));
        assert_eq!(indentation("</Element>", 2), (1, 1));
        assert_eq!(indentation(r#"<Item Type="Trigger" Library="L" Id="00000001"/>"#, 2), (2, 2));
        assert_eq!(indentation("<Identifier>foo</Identifier>", 2), (2, 2));
        assert_eq!(indentation("<ScriptCode>", 2), (2, 3));
        assert_eq!(indentation("if (x) {", 1), (1, 2));
        assert_eq!(indentation("}", 2), (1, 1));
        assert_eq!(indentation("UnitKill(u);", 2), (2, 2));
    }

    #[test]
    fn indent_lines_runs_the_depth_through() {
        let lines: Vec<String> =
            ["if (x) {", "f();", "}", ""].iter().map(|s| s.to_string()).collect();
        let (depth, out) = indent_lines(&lines, 1);
        assert_eq!(depth, 1);
        assert_eq!(out, vec!["    if (x) {", "        f();", "    }", ""]);
    }

    #[test]
    fn xml_escaping_round_trip() {
        let raw = r#"a < b && "c" > 'd'"#;
        assert_eq!(unescape_xml(&escape_xml(raw)), raw);
        assert_eq!(unescape_xml("&quot;&amp;lt;&quot;"), "\"&lt;\"");
    }
}
