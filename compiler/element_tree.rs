// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 This module contains the in-memory representation of the trigger tree.

 An [`Element`] is one `<Element …>…</Element>` block of a `Triggers` file,
 kept as its raw trimmed lines; everything else about it is derived by
 scanning those lines. A [`TriggerLib`] is one library's worth of elements
 together with the parent/child/keyword-parameter indices, and a
 [`Repository`] is the fixed set of libraries loaded together (the native
 library first, then the project libraries), which is what cross-library
 references resolve against.
*/

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::rc::Rc;
use std::str::FromStr;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::diagnostics::{CompileError, Result};
use crate::lexer;

/// The id of the unique root element of every library.
pub const ROOT_ID: &str = "root";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString,
)]
pub enum ElementKind {
    Library,
    Root,
    Category,
    Trigger,
    FunctionCall,
    FunctionDef,
    Param,
    ParamDef,
    SubFuncType,
    Label,
    Comment,
    Variable,
    CustomScript,
    Structure,
    Preset,
    PresetValue,
}

impl ElementKind {
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s)
            .map_err(|_| CompileError::MalformedXml(format!("unknown element kind '{s}'")))
    }
}

/// Elements are shared freely between the indices; identity is `(id, kind)`
/// within a library.
pub type ElementRc = Rc<Element>;

/// Lookup key for an element within its library.
pub type ElementKey = (SmolStr, ElementKind);

#[derive(Debug)]
pub struct Element {
    pub kind: ElementKind,
    /// Tag of the enclosing library.
    pub library: SmolStr,
    /// 8 hex digits, or the reserved `root`.
    pub id: SmolStr,
    /// The raw XML lines from `<Element …>` through `</Element>`, each
    /// whitespace-trimmed. The mutation API writes here to keep the
    /// serialized form in sync with the logical graph.
    pub lines: RefCell<Vec<String>>,
}

impl Element {
    pub fn from_lines(lines: Vec<String>, library: SmolStr) -> Result<ElementRc> {
        let first = lines
            .first()
            .ok_or_else(|| CompileError::MalformedXml("empty element buffer".into()))?;
        let (kind, id) = if first == "<Root>" {
            (ElementKind::Root, SmolStr::new(ROOT_ID))
        } else {
            let kind = lexer::attribute_in(first, "Type")
                .ok_or_else(|| {
                    CompileError::MalformedXml(format!("element without a Type: {first}"))
                })
                .and_then(ElementKind::parse)?;
            let id = lexer::attribute_in(first, "Id").ok_or_else(|| {
                CompileError::MalformedXml(format!("element without an Id: {first}"))
            })?;
            (kind, SmolStr::new(id))
        };
        Ok(Rc::new(Element { kind, library, id, lines: RefCell::new(lines) }))
    }

    pub fn key(&self) -> ElementKey {
        (self.id.clone(), self.kind)
    }

    /// The text inside the first one-line `<Tag>…</Tag>`, still XML-escaped.
    pub fn inline_value(&self, tag: &str) -> Option<String> {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        for line in self.lines.borrow().iter() {
            if let Some(rest) = line.strip_prefix(&open) {
                return rest.strip_suffix(&close).map(str::to_string);
            }
        }
        None
    }

    /// The unescaped lines between a `<Tag>` line and its `</Tag>` line.
    pub fn multiline_value(&self, tag: &str) -> Result<Option<Vec<String>>> {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        let lines = self.lines.borrow();
        let Some(start) = lines.iter().position(|l| *l == open) else {
            return Ok(None);
        };
        let end = lines.iter().position(|l| *l == close).ok_or_else(|| {
            CompileError::MalformedXml(format!("unclosed tag in element {self}: {open}"))
        })?;
        Ok(Some(lines[start + 1..end].iter().map(|l| lexer::unescape_xml(l)).collect()))
    }

    /// The value of attribute `attr` on the first line of tag `tag` that
    /// carries it.
    pub fn attribute(&self, tag: &str, attr: &str) -> Option<String> {
        let prefix = format!("<{tag}");
        for line in self.lines.borrow().iter() {
            if line.starts_with(&prefix) {
                if let Some(value) = lexer::attribute_in(line, attr) {
                    return Some(value.to_string());
                }
            }
        }
        None
    }

    pub fn first_line_of_tag(&self, tag: &str) -> Option<String> {
        let prefix = format!("<{tag} ");
        self.lines.borrow().iter().find(|l| l.starts_with(&prefix)).cloned()
    }

    pub fn lines_of_tag(&self, tag: &str) -> Vec<String> {
        let prefix = format!("<{tag}");
        self.lines.borrow().iter().filter(|l| l.starts_with(&prefix)).cloned().collect()
    }

    pub fn has_line(&self, exact: &str) -> bool {
        self.lines.borrow().iter().any(|l| l == exact)
    }

    pub fn is_disabled(&self) -> bool {
        self.has_line("<Disabled/>")
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(lib={}, id={})", self.kind, self.library, self.id)
    }
}

/// One library: a `Triggers` file, its localization, and its indices.
#[derive(Debug, Default)]
pub struct TriggerLib {
    /// 8-hex tag, or a reserved short name like `Ntve`.
    pub library: SmolStr,
    /// Human-readable name; drives file paths and display.
    pub name: String,
    pub objects: IndexMap<ElementKey, ElementRc>,
    pub trigger_strings: BTreeMap<String, String>,
    pub children: HashMap<ElementKey, Vec<ElementRc>>,
    pub parents: HashMap<ElementKey, ElementRc>,
    pub dependencies: Vec<String>,
    /// For every scripted FunctionDef: parameter identifier → ParamDef.
    pub keyword_parameters: HashMap<ElementKey, HashMap<SmolStr, ElementRc>>,
}

fn parent_priority(kind: ElementKind) -> u32 {
    match kind {
        ElementKind::Category | ElementKind::Root => 10,
        ElementKind::Preset => 8,
        _ => 1,
    }
}

impl TriggerLib {
    pub fn new(name: impl Into<String>) -> Self {
        TriggerLib { name: name.into(), ..Default::default() }
    }

    /// The native library is referenced but never mutated or serialized.
    pub fn is_native(&self) -> bool {
        self.name == "Native"
    }

    pub fn get(&self, id: &str, kind: ElementKind) -> Option<&ElementRc> {
        self.objects.get(&(SmolStr::new(id), kind))
    }

    pub fn element(&self, id: &str, kind: ElementKind) -> Result<ElementRc> {
        self.get(id, kind).cloned().ok_or_else(|| {
            CompileError::BrokenReference(format!("{kind} {}/{id}", self.library))
        })
    }

    pub fn root(&self) -> Result<ElementRc> {
        self.element(ROOT_ID, ElementKind::Root)
    }

    pub fn insert(&mut self, element: ElementRc) {
        self.objects.insert(element.key(), element);
    }

    pub fn parent_of(&self, element: &Element) -> Option<ElementRc> {
        self.parents.get(&element.key()).cloned()
    }

    pub fn children_of(&self, element: &Element) -> &[ElementRc] {
        self.children.get(&element.key()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_of_kind(&self, element: &Element, kind: ElementKind) -> Vec<ElementRc> {
        self.children_of(element).iter().filter(|c| c.kind == kind).cloned().collect()
    }

    /// Display name of an element, via the localization mapping.
    pub fn id_to_string(&self, id: &str, kind: ElementKind, default: &str) -> String {
        if id == ROOT_ID {
            return "Root".into();
        }
        let key = format!("{kind}/Name/lib_{}_{id}", self.library);
        self.trigger_strings.get(&key).cloned().unwrap_or_else(|| default.to_string())
    }

    pub fn display_name(&self, element: &Element) -> String {
        self.id_to_string(&element.id, element.kind, &element.id)
    }

    /// Allocate an element id unused for `kind` in this library.
    pub fn fresh_id(&self, kind: ElementKind) -> SmolStr {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        loop {
            let value: u32 = rng.gen_range(100..=u32::MAX);
            let id = SmolStr::new(format!("{value:08X}"));
            if !self.objects.contains_key(&(id.clone(), kind)) {
                return id;
            }
        }
    }

    /// Rebuild `children` and `parents` from the raw lines alone.
    ///
    /// Category and Root list children as `<Item …/>` entries; every other
    /// parent embeds references, and any same-library
    /// `Type="…" Library="…" Id="…"` triple on a line counts. When several
    /// parents name one child, Category/Root beat Preset beat everything
    /// else.
    pub fn update_indices(&mut self) -> Result<()> {
        self.children.clear();
        self.parents.clear();
        for element in self.objects.values() {
            match element.kind {
                ElementKind::Root | ElementKind::Category => {
                    let mut list = vec![];
                    for line in element.lines.borrow().iter() {
                        let Some(r) = lexer::child_reference(line) else { continue };
                        if r.tag != "Item" || r.library != self.library {
                            continue;
                        }
                        list.push(self.element(r.id, ElementKind::parse(r.kind)?)?);
                    }
                    self.children.insert(element.key(), list);
                }
                ElementKind::Comment | ElementKind::CustomScript => {}
                _ => {
                    let mut list = vec![];
                    let lines = element.lines.borrow();
                    for line in lines.iter().skip(1).take(lines.len().saturating_sub(2)) {
                        let Some(r) = lexer::type_lib_id(line) else { continue };
                        if r.library != self.library {
                            continue;
                        }
                        list.push(self.element(r.id, ElementKind::parse(r.kind)?)?);
                    }
                    drop(lines);
                    self.children.insert(element.key(), list);
                }
            }
        }
        for (parent_key, children) in &self.children {
            let parent = self.objects[parent_key].clone();
            for child in children {
                match self.parents.get(&child.key()) {
                    None => {
                        self.parents.insert(child.key(), parent.clone());
                    }
                    Some(existing)
                        if parent_priority(parent.kind) > parent_priority(existing.kind) =>
                    {
                        self.parents.insert(child.key(), parent.clone());
                    }
                    Some(_) => {}
                }
            }
        }
        let root = self.root()?;
        self.parents.insert(root.key(), root);
        Ok(())
    }

    /// Rebuild the identifier → ParamDef index of every scripted
    /// FunctionDef. Duplicate or missing identifiers violate the invariants
    /// of scripted definitions.
    pub fn update_keyword_parameters(&mut self) -> Result<()> {
        self.keyword_parameters.clear();
        for element in self.objects.values() {
            if element.kind != ElementKind::FunctionDef || !element.has_line("<ScriptCode>") {
                continue;
            }
            let mut index = HashMap::new();
            for parameter in self.children_of_kind(element, ElementKind::ParamDef) {
                let identifier = parameter.inline_value("Identifier").ok_or_else(|| {
                    CompileError::InvalidInvariant(format!(
                        "scripted def {element} has a parameter without an identifier: {parameter}"
                    ))
                })?;
                if index.insert(SmolStr::new(&identifier), parameter.clone()).is_some() {
                    return Err(CompileError::InvalidInvariant(format!(
                        "scripted def {element} has duplicate parameter identifier '{identifier}'"
                    )));
                }
            }
            self.keyword_parameters.insert(element.key(), index);
        }
        Ok(())
    }

    /// Depth-first pre-order from the root, filtering children by kind at
    /// each step so leaf-like kinds stay with their natural owner:
    /// Trigger/FunctionDef/CustomScript belong to categories, ParamDefs to
    /// their FunctionDef, Variables never to a Param. Unreached elements
    /// keep their relative order after all reached ones; the root sorts
    /// first.
    pub fn sorted_elements(&self) -> Result<Vec<ElementRc>> {
        let root = self.root()?;
        let mut order: HashMap<ElementKey, usize> = HashMap::new();
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            if order.contains_key(&node.key()) {
                continue;
            }
            order.insert(node.key(), order.len());
            let mut filter: Vec<ElementKind> = vec![];
            if !matches!(node.kind, ElementKind::Category | ElementKind::Root) {
                filter.extend([
                    ElementKind::Trigger,
                    ElementKind::FunctionDef,
                    ElementKind::CustomScript,
                ]);
            }
            if node.kind != ElementKind::FunctionDef {
                filter.push(ElementKind::ParamDef);
            }
            if node.kind == ElementKind::Param {
                filter.push(ElementKind::Variable);
            }
            for child in self.children_of(&node).iter().rev() {
                if !filter.contains(&child.kind) {
                    stack.push(child.clone());
                }
            }
        }
        let reached = order.len() as i64;
        let mut elements: Vec<ElementRc> = self.objects.values().cloned().collect();
        let position: HashMap<ElementKey, i64> = self
            .objects
            .keys()
            .enumerate()
            .map(|(i, k)| (k.clone(), i as i64))
            .collect();
        elements.sort_by_key(|e| {
            if e.kind == ElementKind::Root {
                -1
            } else {
                order
                    .get(&e.key())
                    .map(|i| *i as i64)
                    .unwrap_or_else(|| reached + position[&e.key()])
            }
        });
        Ok(elements)
    }

    /// Reorder the object table into sorted order and rebuild the indices.
    pub fn sort(&mut self) -> Result<()> {
        let sorted = self.sorted_elements()?;
        self.objects = sorted.into_iter().map(|e| (e.key(), e)).collect();
        self.update_indices()?;
        self.update_keyword_parameters()
    }
}

/// The fixed, ordered set of libraries loaded together.
#[derive(Debug, Default)]
pub struct Repository {
    libs: Vec<TriggerLib>,
}

impl Repository {
    pub fn new(libs: Vec<TriggerLib>) -> Result<Self> {
        for (i, lib) in libs.iter().enumerate() {
            if libs[..i].iter().any(|other| other.library == lib.library) {
                return Err(CompileError::InvalidInvariant(format!(
                    "duplicate library tag {}",
                    lib.library
                )));
            }
        }
        Ok(Repository { libs })
    }

    pub fn libs(&self) -> impl Iterator<Item = &TriggerLib> {
        self.libs.iter()
    }

    pub fn lib(&self, tag: &str) -> Result<&TriggerLib> {
        self.libs
            .iter()
            .find(|l| l.library == tag)
            .ok_or_else(|| CompileError::BrokenReference(format!("library {tag} is not loaded")))
    }

    pub fn lib_by_name(&self, name: &str) -> Result<&TriggerLib> {
        self.libs
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| CompileError::BrokenReference(format!("library '{name}' is not loaded")))
    }

    pub fn lib_mut(&mut self, tag: &str) -> Result<&mut TriggerLib> {
        self.libs
            .iter_mut()
            .find(|l| l.library == tag)
            .ok_or_else(|| CompileError::BrokenReference(format!("library {tag} is not loaded")))
    }

    pub fn lib_by_name_mut(&mut self, name: &str) -> Result<&mut TriggerLib> {
        self.libs
            .iter_mut()
            .find(|l| l.name == name)
            .ok_or_else(|| CompileError::BrokenReference(format!("library '{name}' is not loaded")))
    }

    pub fn resolve(&self, library: &str, id: &str, kind: ElementKind) -> Result<(&TriggerLib, ElementRc)> {
        let lib = self.lib(library)?;
        Ok((lib, lib.element(id, kind)?))
    }

    /// Resolve the first `Type="…" Library="…" Id="…"` reference on a line.
    pub fn resolve_line(&self, line: &str) -> Result<(&TriggerLib, ElementRc)> {
        let r = lexer::type_lib_id(line).ok_or_else(|| {
            CompileError::BrokenReference(format!("no element reference on line: {line}"))
        })?;
        self.resolve(r.library, r.id, ElementKind::parse(r.kind)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(lines: &[&str]) -> ElementRc {
        Element::from_lines(lines.iter().map(|l| l.to_string()).collect(), SmolStr::new("AB"))
            .unwrap()
    }

    #[test]
    fn element_identity_from_first_line() {
        let e = element(&[r#"<Element Type="Trigger" Id="00C0FFEE">"#, "</Element>"]);
        assert_eq!(e.kind, ElementKind::Trigger);
        assert_eq!(e.id, "00C0FFEE");
        let root = element(&["<Root>", "</Root>"]);
        assert_eq!(root.kind, ElementKind::Root);
        assert_eq!(root.id, ROOT_ID);
        assert!(Element::from_lines(vec!["<Element Type=\"Nope\" Id=\"00000001\">".into()],
            SmolStr::new("AB")).is_err());
    }

    #[test]
    fn derived_queries() {
        let e = element(&[
            r#"<Element Type="FunctionDef" Id="00000001">"#,
            "<Identifier>DoThing</Identifier>",
            r#"<FlagAction/>"#,
            "<ScriptCode>",
            "f(&quot;x&quot;);",
            "</ScriptCode>",
            r#"<ReturnType>"#,
            "</Element>",
        ]);
        assert_eq!(e.inline_value("Identifier").as_deref(), Some("DoThing"));
        assert_eq!(e.multiline_value("ScriptCode").unwrap(), Some(vec!["f(\"x\");".to_string()]));
        assert!(e.has_line("<FlagAction/>"));
        assert!(!e.is_disabled());
        assert_eq!(e.multiline_value("Nothing").unwrap(), None);
        let unclosed = element(&[
            r#"<Element Type="CustomScript" Id="00000002">"#,
            "<ScriptCode>",
            "</Element>",
        ]);
        assert!(unclosed.multiline_value("ScriptCode").is_err());
    }

    fn library_fixture() -> TriggerLib {
        let mut lib = TriggerLib::new("Proj");
        lib.library = SmolStr::new("AB");
        let mk = |lines: &[&str]| element(lines);
        lib.insert(mk(&[
            "<Root>",
            r#"<Item Type="Category" Library="AB" Id="00000010"/>"#,
            "</Root>",
        ]));
        lib.insert(mk(&[
            r#"<Element Type="Category" Id="00000010">"#,
            r#"<Item Type="FunctionDef" Library="AB" Id="00000020"/>"#,
            r#"<Item Type="Preset" Library="AB" Id="00000040"/>"#,
            "</Element>",
        ]));
        lib.insert(mk(&[
            r#"<Element Type="FunctionDef" Id="00000020">"#,
            r#"<Parameter Type="ParamDef" Library="AB" Id="00000030"/>"#,
            "</Element>",
        ]));
        lib.insert(mk(&[r#"<Element Type="ParamDef" Id="00000030">"#, "</Element>"]));
        lib.insert(mk(&[
            r#"<Element Type="Preset" Id="00000040">"#,
            r#"<Item Type="PresetValue" Library="AB" Id="00000050"/>"#,
            "</Element>",
        ]));
        lib.insert(mk(&[r#"<Element Type="PresetValue" Id="00000050">"#, "</Element>"]));
        lib.update_indices().unwrap();
        lib.update_keyword_parameters().unwrap();
        lib
    }

    #[test]
    fn parent_child_indices() {
        let lib = library_fixture();
        let root = lib.root().unwrap();
        let category = lib.element("00000010", ElementKind::Category).unwrap();
        let def = lib.element("00000020", ElementKind::FunctionDef).unwrap();
        let paramdef = lib.element("00000030", ElementKind::ParamDef).unwrap();
        assert_eq!(lib.parent_of(&root).unwrap().key(), root.key());
        assert_eq!(lib.parent_of(&category).unwrap().key(), root.key());
        assert_eq!(lib.parent_of(&def).unwrap().key(), category.key());
        assert_eq!(lib.parent_of(&paramdef).unwrap().key(), def.key());
        // parent consistency: every child is listed by its parent
        for e in lib.objects.values() {
            if e.kind == ElementKind::Root {
                continue;
            }
            let parent = lib.parent_of(e).unwrap();
            assert!(lib.children_of(&parent).iter().any(|c| c.key() == e.key()), "{e}");
        }
    }

    #[test]
    fn category_wins_parenthood_over_preset() {
        // a PresetValue listed by both its Preset and a Category belongs to
        // the Category
        let mut lib = library_fixture();
        let category_lines = vec![
            r#"<Element Type="Category" Id="00000011">"#.to_string(),
            r#"<Item Type="PresetValue" Library="AB" Id="00000050"/>"#.to_string(),
            "</Element>".to_string(),
        ];
        lib.insert(Element::from_lines(category_lines, SmolStr::new("AB")).unwrap());
        let root = lib.root().unwrap();
        root.lines
            .borrow_mut()
            .insert(2, r#"<Item Type="Category" Library="AB" Id="00000011"/>"#.to_string());
        lib.update_indices().unwrap();
        let value = lib.element("00000050", ElementKind::PresetValue).unwrap();
        assert_eq!(lib.parent_of(&value).unwrap().kind, ElementKind::Category);
    }

    #[test]
    fn sort_is_deterministic_and_idempotent() {
        let mut lib = library_fixture();
        let once: Vec<ElementKey> =
            lib.sorted_elements().unwrap().iter().map(|e| e.key()).collect();
        let twice: Vec<ElementKey> =
            lib.sorted_elements().unwrap().iter().map(|e| e.key()).collect();
        assert_eq!(once, twice);
        lib.sort().unwrap();
        let after: Vec<ElementKey> = lib.objects.values().map(|e| e.key()).collect();
        assert_eq!(once, after);
        lib.sort().unwrap();
        let again: Vec<ElementKey> = lib.objects.values().map(|e| e.key()).collect();
        assert_eq!(after, again);
        // root first
        assert_eq!(after[0].1, ElementKind::Root);
    }

    #[test]
    fn fresh_ids_are_valid_and_unused() {
        let lib = library_fixture();
        for _ in 0..32 {
            let id = lib.fresh_id(ElementKind::Param);
            assert!(lexer::is_element_id(&id));
            assert!(lib.get(&id, ElementKind::Param).is_none());
        }
    }

    #[test]
    fn duplicate_keyword_parameter_identifiers_are_rejected() {
        let mut lib = TriggerLib::new("Proj");
        lib.library = SmolStr::new("AB");
        lib.insert(element(&["<Root>", r#"<Item Type="FunctionDef" Library="AB" Id="00000001"/>"#, "</Root>"]));
        lib.insert(element(&[
            r#"<Element Type="FunctionDef" Id="00000001">"#,
            "<ScriptCode>",
            "</ScriptCode>",
            r#"<Parameter Type="ParamDef" Library="AB" Id="00000002"/>"#,
            r#"<Parameter Type="ParamDef" Library="AB" Id="00000003"/>"#,
            "</Element>",
        ]));
        lib.insert(element(&[
            r#"<Element Type="ParamDef" Id="00000002">"#,
            "<Identifier>value</Identifier>",
            "</Element>",
        ]));
        lib.insert(element(&[
            r#"<Element Type="ParamDef" Id="00000003">"#,
            "<Identifier>value</Identifier>",
            "</Element>",
        ]));
        lib.update_indices().unwrap();
        assert!(matches!(
            lib.update_keyword_parameters(),
            Err(CompileError::InvalidInvariant(_))
        ));
    }

    #[test]
    fn repository_rejects_duplicate_tags() {
        let mut a = TriggerLib::new("A");
        a.library = SmolStr::new("AB");
        let mut b = TriggerLib::new("B");
        b.library = SmolStr::new("AB");
        assert!(Repository::new(vec![a, b]).is_err());
    }
}
