// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 The mutation API.

 Every operation allocates fresh element ids, attaches new elements to a
 parent at a requested position, and keeps the parent's raw lines in sync
 with the logical graph by splicing a `<Tag Type=… Library=… Id=…/>`
 reference after the first `index` existing child-reference lines. Failures
 are recoverable: the target library is left untouched.
*/

use smol_str::SmolStr;

use crate::diagnostics::{CompileError, Result};
use crate::element_tree::{Element, ElementKind, ElementRc, TriggerLib};
use crate::lexer;

fn ensure_mutable(lib: &TriggerLib) -> Result<()> {
    if lib.is_native() {
        return Err(CompileError::BadMutationTarget("the native library is read-only".into()));
    }
    Ok(())
}

/// Fresh ids for several elements of one kind, distinct from each other.
fn fresh_ids(lib: &TriggerLib, kind: ElementKind, count: usize) -> Vec<SmolStr> {
    let mut ids: Vec<SmolStr> = Vec::with_capacity(count);
    while ids.len() < count {
        let id = lib.fresh_id(kind);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Register `element` as a child of `parent` at `index` (−1 appends) and,
/// when `tag_name` is given, splice the reference line into the parent's raw
/// lines at the matching textual position.
pub fn add_element(
    lib: &mut TriggerLib,
    element: ElementRc,
    parent: &ElementRc,
    index: isize,
    tag_name: Option<&str>,
) -> Result<()> {
    ensure_mutable(lib)?;
    lib.insert(element.clone());
    lib.parents.insert(element.key(), parent.clone());
    lib.children.entry(element.key()).or_default();
    let sibling_count = lib.children.get(&parent.key()).map_or(0, Vec::len);
    let mut position = index;
    if position < 0 {
        // -1 goes one past the current end, so it appends
        position += sibling_count as isize + 1;
    }
    let position = position.clamp(0, sibling_count as isize) as usize;
    lib.children.entry(parent.key()).or_default().insert(position, element.clone());
    let Some(tag_name) = tag_name else { return Ok(()) };
    let mut lines = parent.lines.borrow_mut();
    let mut insert_at = lines.len().saturating_sub(1);
    let mut encountered = 0usize;
    for (i, line) in lines[..lines.len() - 1].iter().enumerate() {
        if let Some(r) = lexer::child_reference(line) {
            if r.library == lib.library {
                encountered += 1;
            }
        }
        if encountered >= position {
            insert_at = i + 1;
            break;
        }
    }
    lines.insert(
        insert_at,
        format!(
            "<{tag_name} Type=\"{}\" Library=\"{}\" Id=\"{}\"/>",
            element.kind, lib.library, element.id
        ),
    );
    Ok(())
}

/// The enclosing definition's single ParamDef; zero or several is a
/// recoverable error.
fn sole_paramdef(lib: &TriggerLib, parent: &ElementRc) -> Result<ElementRc> {
    let defs = lib.children_of_kind(parent, ElementKind::ParamDef);
    match defs.as_slice() {
        [only] => Ok(only.clone()),
        other => Err(CompileError::BadMutationTarget(format!(
            "the target function definition needs exactly one parameter (got {})",
            other.len()
        ))),
    }
}

/// Add a new function definition with one `player` parameter (int,
/// defaulting to 0) under a Root or Category.
pub fn add_function_def(
    lib: &mut TriggerLib,
    parent: &ElementRc,
    index: isize,
    name: &str,
) -> Result<()> {
    ensure_mutable(lib)?;
    if !matches!(parent.kind, ElementKind::Root | ElementKind::Category) {
        return Err(CompileError::BadMutationTarget(
            "function definitions can only be added under the root or a category".into(),
        ));
    }
    let function_def_id = lib.fresh_id(ElementKind::FunctionDef);
    let param_def_id = lib.fresh_id(ElementKind::ParamDef);
    let default_param_id = lib.fresh_id(ElementKind::Param);
    let tag = lib.library.clone();

    let function_def = Element::from_lines(
        vec![
            format!("<Element Type=\"FunctionDef\" Id=\"{function_def_id}\">"),
            format!("<Identifier>{name}</Identifier>"),
            format!("<Parameter Type=\"ParamDef\" Library=\"{tag}\" Id=\"{param_def_id}\"/>"),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    lib.trigger_strings
        .insert(format!("FunctionDef/Name/lib_{tag}_{function_def_id}"), name.to_string());
    add_element(lib, function_def.clone(), parent, index, Some("Item"))?;

    let param_def = Element::from_lines(
        vec![
            format!("<Element Type=\"ParamDef\" Id=\"{param_def_id}\">"),
            "<ParameterType>".into(),
            "<Type Value=\"int\"/>".into(),
            "</ParameterType>".into(),
            format!("<Default Type=\"Param\" Library=\"{tag}\" Id=\"{default_param_id}\"/>"),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    lib.trigger_strings
        .insert(format!("ParamDef/Name/lib_{tag}_{param_def_id}"), "player".to_string());
    add_element(lib, param_def.clone(), &function_def, -1, None)?;

    let default_param = Element::from_lines(
        vec![
            format!("<Element Type=\"Param\" Id=\"{default_param_id}\">"),
            "<Value>0</Value>".into(),
            "<ValueType Type=\"int\"/>".into(),
            "</Element>".into(),
        ],
        tag,
    )?;
    add_element(lib, default_param, &param_def, -1, None)?;
    lib.update_keyword_parameters()
}

/// Add a call to the native `SetUpgradeLevelForPlayer`, wiring the player
/// argument to the enclosing definition's sole parameter.
pub fn add_upgrade_call(
    lib: &mut TriggerLib,
    parent: &ElementRc,
    index: isize,
    upgrade_name: &str,
) -> Result<()> {
    ensure_mutable(lib)?;
    if parent.kind != ElementKind::FunctionDef {
        return Err(CompileError::BadMutationTarget(
            "function calls can only be added to function definitions".into(),
        ));
    }
    let player_paramdef = sole_paramdef(lib, parent)?;
    let call_id = lib.fresh_id(ElementKind::FunctionCall);
    let arg_ids = fresh_ids(lib, ElementKind::Param, 3);
    let (player_arg_id, upgrade_arg_id, level_arg_id) = (&arg_ids[0], &arg_ids[1], &arg_ids[2]);
    let tag = lib.library.clone();

    // libNtve_gf_SetUpgradeLevelForPlayer
    let call = Element::from_lines(
        vec![
            format!("<Element Type=\"FunctionCall\" Id=\"{call_id}\">"),
            "<FunctionDef Type=\"FunctionDef\" Library=\"Ntve\" Id=\"9F8EF8FB\"/>".into(),
            format!("<Parameter Type=\"Param\" Library=\"{tag}\" Id=\"{player_arg_id}\"/>"),
            format!("<Parameter Type=\"Param\" Library=\"{tag}\" Id=\"{upgrade_arg_id}\"/>"),
            format!("<Parameter Type=\"Param\" Library=\"{tag}\" Id=\"{level_arg_id}\"/>"),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    add_element(lib, call.clone(), parent, index, Some("FunctionCall"))?;

    let player_arg = Element::from_lines(
        vec![
            format!("<Element Type=\"Param\" Id=\"{player_arg_id}\">"),
            "<ParameterDef Type=\"ParamDef\" Library=\"Ntve\" Id=\"C7188352\"/>".into(),
            format!(
                "<Parameter Type=\"ParamDef\" Library=\"{tag}\" Id=\"{}\"/>",
                player_paramdef.id
            ),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    add_element(lib, player_arg, &call, -1, None)?;

    let upgrade_arg = Element::from_lines(
        vec![
            format!("<Element Type=\"Param\" Id=\"{upgrade_arg_id}\">"),
            "<ParameterDef Type=\"ParamDef\" Library=\"Ntve\" Id=\"7E5035EE\"/>".into(),
            format!("<Value>{}</Value>", lexer::escape_xml(upgrade_name)),
            "<ValueType Type=\"gamelink\"/>".into(),
            "<ValueGameType Type=\"Upgrade\"/>".into(),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    add_element(lib, upgrade_arg, &call, -1, None)?;

    let level_arg = Element::from_lines(
        vec![
            format!("<Element Type=\"Param\" Id=\"{level_arg_id}\">"),
            "<ParameterDef Type=\"ParamDef\" Library=\"Ntve\" Id=\"3BFEECBB\"/>".into(),
            "<Value>1</Value>".into(),
            "<ValueType Type=\"int\"/>".into(),
            "</Element>".into(),
        ],
        tag,
    )?;
    add_element(lib, level_arg, &call, -1, None)?;
    lib.update_keyword_parameters()
}

/// Add a call to the native `TechTreeUnitAllow`, locking or unlocking a unit
/// for the enclosing definition's player parameter.
pub fn add_unit_allow_call(
    lib: &mut TriggerLib,
    parent: &ElementRc,
    index: isize,
    tech_tree_name: &str,
    lock: bool,
) -> Result<()> {
    ensure_mutable(lib)?;
    if parent.kind != ElementKind::FunctionDef {
        return Err(CompileError::BadMutationTarget(format!(
            "attempted to add a unit lock call to a {}",
            parent.kind
        )));
    }
    let player_paramdef = sole_paramdef(lib, parent)?;
    let call_id = lib.fresh_id(ElementKind::FunctionCall);
    let arg_ids = fresh_ids(lib, ElementKind::Param, 3);
    let (player_arg_id, unit_arg_id, allow_arg_id) = (&arg_ids[0], &arg_ids[1], &arg_ids[2]);
    let tag = lib.library.clone();

    // TechTreeUnitAllow
    let call = Element::from_lines(
        vec![
            format!("<Element Type=\"FunctionCall\" Id=\"{call_id}\">"),
            "<FunctionDef Type=\"FunctionDef\" Library=\"Ntve\" Id=\"51A273F5\"/>".into(),
            format!("<Parameter Type=\"Param\" Library=\"{tag}\" Id=\"{player_arg_id}\"/>"),
            format!("<Parameter Type=\"Param\" Library=\"{tag}\" Id=\"{unit_arg_id}\"/>"),
            format!("<Parameter Type=\"Param\" Library=\"{tag}\" Id=\"{allow_arg_id}\"/>"),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    add_element(lib, call.clone(), parent, index, Some("FunctionCall"))?;

    let player_arg = Element::from_lines(
        vec![
            format!("<Element Type=\"Param\" Id=\"{player_arg_id}\">"),
            "<ParameterDef Type=\"ParamDef\" Library=\"Ntve\" Id=\"B15D29C1\"/>".into(),
            format!(
                "<Parameter Type=\"ParamDef\" Library=\"{tag}\" Id=\"{}\"/>",
                player_paramdef.id
            ),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    add_element(lib, player_arg, &call, -1, None)?;

    let unit_arg = Element::from_lines(
        vec![
            format!("<Element Type=\"Param\" Id=\"{unit_arg_id}\">"),
            "<ParameterDef Type=\"ParamDef\" Library=\"Ntve\" Id=\"BC66D9AD\"/>".into(),
            format!("<Value>{}</Value>", lexer::escape_xml(tech_tree_name)),
            "<ValueType Type=\"gamelink\"/>".into(),
            "<ValueGameType Type=\"Unit\"/>".into(),
            "</Element>".into(),
        ],
        tag.clone(),
    )?;
    add_element(lib, unit_arg, &call, -1, None)?;

    let preset_id = if lock { "00000106" } else { "00000107" };
    let allow_arg = Element::from_lines(
        vec![
            format!("<Element Type=\"Param\" Id=\"{allow_arg_id}\">"),
            "<ParameterDef Type=\"ParamDef\" Library=\"Ntve\" Id=\"C26556EA\"/>".into(),
            format!("<Preset Type=\"PresetValue\" Library=\"Ntve\" Id=\"{preset_id}\"/>"),
            "</Element>".into(),
        ],
        tag,
    )?;
    add_element(lib, allow_arg, &call, -1, None)?;
    lib.update_keyword_parameters()
}

/// Bool literals accepted by the mutation console.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" => Ok(true),
        "false" | "f" => Ok(false),
        _ => Err(CompileError::BadArgument(format!("invalid bool literal '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn project_lib() -> TriggerLib {
        parser::parse_triggers_source(
            r#"<?xml version="1.0" encoding="utf-8"?>
<TriggerData>
    <Library Id="ABCD1234">
        <Root>
            <Item Type="Category" Library="ABCD1234" Id="00000010"/>
        </Root>
        <Element Type="Category" Id="00000010">
        </Element>
    </Library>
</TriggerData>"#,
            "Proj",
        )
        .unwrap()
    }

    #[test]
    fn add_function_def_builds_the_whole_subtree() {
        let mut lib = project_lib();
        let category = lib.element("00000010", ElementKind::Category).unwrap();
        add_function_def(&mut lib, &category, -1, "AP_Triggers_unlockZergling").unwrap();
        let defs: Vec<ElementRc> = lib
            .objects
            .values()
            .filter(|e| e.kind == ElementKind::FunctionDef)
            .cloned()
            .collect();
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(
            def.inline_value("Identifier").as_deref(),
            Some("AP_Triggers_unlockZergling")
        );
        // the category's raw lines got the Item reference
        assert!(category
            .lines
            .borrow()
            .iter()
            .any(|l| l.contains("Item Type=\"FunctionDef\"") && l.contains(&*def.id)));
        // the def owns one ParamDef, which owns the default Param
        let paramdefs = lib.children_of_kind(def, ElementKind::ParamDef);
        assert_eq!(paramdefs.len(), 1);
        assert_eq!(lib.children_of_kind(&paramdefs[0], ElementKind::Param).len(), 1);
        // name registered in the localization
        assert!(lib
            .trigger_strings
            .values()
            .any(|v| v == "AP_Triggers_unlockZergling"));
        // the index stays rebuildable from the raw lines alone
        lib.update_indices().unwrap();
        assert_eq!(lib.children_of(&category).len(), 1);
    }

    #[test]
    fn add_function_def_refuses_non_categories() {
        let mut lib = project_lib();
        let category = lib.element("00000010", ElementKind::Category).unwrap();
        add_function_def(&mut lib, &category, -1, "fn").unwrap();
        let def = lib
            .objects
            .values()
            .find(|e| e.kind == ElementKind::FunctionDef)
            .cloned()
            .unwrap();
        let paramdef = lib.children_of_kind(&def, ElementKind::ParamDef)[0].clone();
        let before = lib.objects.len();
        let err = add_function_def(&mut lib, &paramdef, -1, "nope").unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(lib.objects.len(), before);
    }

    #[test]
    fn upgrade_call_requires_exactly_one_paramdef() {
        let mut lib = project_lib();
        let category = lib.element("00000010", ElementKind::Category).unwrap();
        add_function_def(&mut lib, &category, -1, "unlock").unwrap();
        let def = lib
            .objects
            .values()
            .find(|e| e.kind == ElementKind::FunctionDef)
            .cloned()
            .unwrap();
        add_upgrade_call(&mut lib, &def, -1, "AP_ZergCreepStomach").unwrap();
        let call = lib
            .objects
            .values()
            .find(|e| e.kind == ElementKind::FunctionCall)
            .cloned()
            .unwrap();
        assert!(call.has_line(
            "<FunctionDef Type=\"FunctionDef\" Library=\"Ntve\" Id=\"9F8EF8FB\"/>"
        ));
        assert_eq!(lib.children_of_kind(&call, ElementKind::Param).len(), 3);

        // a def with zero paramdefs is a recoverable error target
        let bare_category = lib.element("00000010", ElementKind::Category).unwrap();
        let err = add_upgrade_call(&mut lib, &bare_category, -1, "X").unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn reference_lines_splice_at_the_requested_index() {
        let mut lib = project_lib();
        let category = lib.element("00000010", ElementKind::Category).unwrap();
        add_function_def(&mut lib, &category, -1, "first").unwrap();
        add_function_def(&mut lib, &category, 0, "second").unwrap();
        // "second" lands before "first", both in the index and the raw lines
        let children = lib.children_of(&category);
        assert_eq!(children[0].inline_value("Identifier").as_deref(), Some("second"));
        assert_eq!(children[1].inline_value("Identifier").as_deref(), Some("first"));
        let lines = category.lines.borrow();
        let first_pos = lines.iter().position(|l| l.contains(&*children[1].id)).unwrap();
        let second_pos = lines.iter().position(|l| l.contains(&*children[0].id)).unwrap();
        assert!(second_pos < first_pos);
    }

    #[test]
    fn bool_literals() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("T").unwrap());
        assert!(!parse_bool("f").unwrap());
        assert!(parse_bool("yes").is_err());
    }
}
