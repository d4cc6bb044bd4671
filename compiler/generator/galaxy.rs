// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*! The Galaxy code generator.

Every element kind that can appear in executable position has a `codegen_*`
function here: parameters (value expressions), function calls (with the
special-form dispatch for containers, operators, events, and scripted
definitions), function definitions, triggers, and whole libraries with their
header siblings.

The generator treats the element store as read only and is deterministic
over the sorted store: two runs over the same inputs produce byte-identical
output.
*/

use std::collections::HashMap;

use itertools::Itertools;
use smol_str::SmolStr;

use crate::builtin_macros::{self, AutoVarBuilder, CallContext};
use crate::diagnostics::{CompileError, Result};
use crate::element_tree::{Element, ElementKind, ElementRc, Repository, TriggerLib};
use crate::lexer;
use crate::literals;
use crate::parser::NO_LIBRARY;
use crate::typeregister::{self, remap_type};

// ---------------------------------------------------------------------------
// Naming

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_lowercase().collect::<String>() + chars.as_str(),
    }
}

fn toggle_case_of_first_letter(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) if c.is_uppercase() => c.to_lowercase().collect::<String>() + chars.as_str(),
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

/// Display names become identifiers by dropping the characters the editor
/// tolerates in names but Galaxy does not.
pub fn escape_identifier(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, ' ' | '(' | ')' | '/' | '+' | '-')).collect()
}

pub fn parameter_name(lib: &TriggerLib, element: &Element) -> String {
    if let Some(identifier) = element.inline_value("Identifier") {
        return format!("lp_{identifier}");
    }
    let display = lib.display_name(element);
    escape_identifier(&format!("lp_{}", lower_first(&display).replace(' ', "")))
}

pub fn local_variable_name(lib: &TriggerLib, element: &Element) -> String {
    let identifier = element
        .inline_value("Identifier")
        .unwrap_or_else(|| lower_first(&lib.display_name(element)));
    escape_identifier(&format!("lv_{identifier}"))
}

pub fn global_variable_name(lib: &TriggerLib, element: &Element) -> String {
    let identifier = element.inline_value("Identifier").unwrap_or_else(|| {
        toggle_case_of_first_letter(&escape_identifier(&lib.display_name(element)))
    });
    format!("lib{}_gv_{identifier}", lib.library)
}

/// Variables owned by the Root or a Category are globals; the rest are
/// function locals.
pub fn variable_name(lib: &TriggerLib, element: &Element) -> String {
    match lib.parent_of(element) {
        Some(parent) if matches!(parent.kind, ElementKind::Root | ElementKind::Category) => {
            global_variable_name(lib, element)
        }
        _ => local_variable_name(lib, element),
    }
}

pub fn function_name(lib: &TriggerLib, element: &Element) -> String {
    let prefix = if element.has_line("<FlagNative/>") {
        String::new()
    } else {
        format!("lib{}_gf_", lib.library)
    };
    match element.inline_value("Identifier") {
        Some(identifier) => format!("{prefix}{identifier}"),
        None => format!("{prefix}{}", escape_identifier(&lib.display_name(element))),
    }
}

pub fn trigger_name(lib: &TriggerLib, element: &Element) -> String {
    let prefix = format!("lib{}_gt_", lib.library);
    match element.inline_value("Identifier") {
        Some(identifier) => format!("{prefix}{identifier}"),
        None => format!("{prefix}{}", escape_identifier(&lib.display_name(element))),
    }
}

pub fn preset_type_name(lib: &TriggerLib, element: &Element) -> String {
    escape_identifier(&lib.display_name(element))
}

pub fn preset_value_name(lib: &TriggerLib, element: &Element) -> Result<String> {
    if let Some(value) = element.inline_value("Value") {
        return Ok(lexer::unescape_xml(&value));
    }
    let identifier = match element.inline_value("Identifier") {
        Some(identifier) => lexer::unescape_xml(&identifier),
        None => escape_identifier(&lib.display_name(element)),
    };
    let preset = lib
        .parent_of(element)
        .filter(|p| p.kind == ElementKind::Preset)
        .ok_or_else(|| {
            CompileError::InvalidInvariant(format!("{element} is not owned by a preset"))
        })?;
    Ok(format!("lib{}_ge_{}_{identifier}", lib.library, preset_type_name(lib, &preset)))
}

// ---------------------------------------------------------------------------
// Type resolution

pub fn preset_backing_type(element: &Element) -> Result<String> {
    if element.kind != ElementKind::Preset {
        return Err(CompileError::InvalidInvariant(format!("{element} is not a preset")));
    }
    element.attribute("BaseType", "Value").ok_or_else(|| {
        CompileError::InvalidInvariant(format!("{element} has no backing base type"))
    })
}

/// The Galaxy type of a Variable or ParamDef, read from its
/// `<VariableType>`/`<ParameterType>` block; `preset` resolves through the
/// referenced type element.
pub fn get_variable_type(repo: &Repository, element: &Element) -> Result<String> {
    let mut in_type_block = false;
    let mut variable_type = String::new();
    let mut type_element: Option<ElementRc> = None;
    for line in element.lines.borrow().clone() {
        if line == "<VariableType>" || line == "<ParameterType>" {
            in_type_block = true;
        } else if in_type_block && line.starts_with("<Type ") {
            if let Some(value) = lexer::attribute_in(&line, "Value") {
                variable_type = value.to_string();
            }
        } else if in_type_block && line.starts_with("<TypeElement") {
            type_element = Some(repo.resolve_line(&line)?.1);
        }
    }
    if variable_type == "preset" {
        let type_element = type_element.ok_or_else(|| {
            CompileError::InvalidInvariant(format!(
                "{element} has a preset type but no type element"
            ))
        })?;
        let backing = preset_backing_type(&type_element)?;
        return Ok(remap_type(&backing).to_string());
    }
    Ok(remap_type(&variable_type).to_string())
}

/// Static type of a Param, following the `ParameterDef` → `Default` →
/// `Preset`/`TypeElement` chains. `None` when nothing pins a type down.
pub fn codegen_parameter_type(repo: &Repository, element: &Element) -> Result<Option<String>> {
    let mut result: Option<String> = None;
    if matches!(element.kind, ElementKind::ParamDef | ElementKind::Variable) {
        if let Some(line) = element
            .first_line_of_tag("Preset")
            .or_else(|| element.first_line_of_tag("TypeElement"))
        {
            let (_, referenced) = repo.resolve_line(&line)?;
            return match referenced.kind {
                ElementKind::Preset => Ok(Some(preset_backing_type(&referenced)?)),
                ElementKind::ParamDef => codegen_parameter_type(repo, &referenced),
                _ => Err(CompileError::InvalidInvariant(format!(
                    "unexpected type reference to {referenced}"
                ))),
            };
        }
        if let Some(line) = element.first_line_of_tag("Default") {
            let (_, default) = repo.resolve_line(&line)?;
            result = codegen_parameter_type(repo, &default)?;
        }
    } else if let Some(line) = element.first_line_of_tag("Preset") {
        let (preset_lib, preset_value) = repo.resolve_line(&line)?;
        if preset_value.kind != ElementKind::PresetValue {
            return Err(CompileError::InvalidInvariant(format!(
                "preset reference to non-preset-value {preset_value}"
            )));
        }
        let preset = preset_lib.parent_of(&preset_value).ok_or_else(|| {
            CompileError::BrokenReference(format!("{preset_value} has no owning preset"))
        })?;
        return Ok(Some(preset_backing_type(&preset)?));
    }
    if result.is_none() {
        result = element.attribute("Type", "Value");
    }
    if result.is_none() {
        if let Some(line) = element.first_line_of_tag("Parameter") {
            let (_, parameter) = repo.resolve_line(&line)?;
            result = codegen_parameter_type(repo, &parameter)?;
        }
    }
    if result.is_none() {
        if let Some(line) = element.first_line_of_tag("Variable") {
            let (_, variable) = repo.resolve_line(&line)?;
            result = codegen_parameter_type(repo, &variable)?;
        }
    }
    if result.as_deref() == Some("preset") {
        return Err(CompileError::InvalidInvariant(format!(
            "unresolved preset type on {element}"
        )));
    }
    Ok(result)
}

/// A Param is constant when its value is inline or it references a
/// `<Constant/>` variable; the returned text is usable as an initializer.
pub fn constant_parameter_value(repo: &Repository, element: &Element) -> Result<Option<String>> {
    if let Some(value) = element.inline_value("Value") {
        return Ok(Some(value));
    }
    if let Some(line) = element.first_line_of_tag("Variable") {
        let (variable_lib, variable) = repo.resolve_line(&line)?;
        if !variable.has_line("<Constant/>") {
            return Ok(None);
        }
        return Ok(Some(variable_name(variable_lib, &variable)));
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Parameters

/// Generate the value expression of a Param.
pub fn codegen_parameter(
    repo: &Repository,
    element: &ElementRc,
    auto: &mut AutoVarBuilder,
) -> Result<String> {
    if element.kind != ElementKind::Param {
        return Err(CompileError::InvalidInvariant(format!("{element} is not a parameter")));
    }
    let lib = repo.lib(&element.library)?;
    let mut value = String::new();
    let mut value_type = String::new();
    let mut variable = String::new();
    let mut value_id = String::new();
    let mut array_parts: Vec<String> = vec![];
    let mut expression = String::new();
    let mut in_script_code = false;
    let mut script_code: Vec<String> = vec![];
    let lines = element.lines.borrow().clone();
    for line in &lines {
        if let Some(rest) = line.strip_prefix("<Value>") {
            value = lexer::unescape_xml(rest.strip_suffix("</Value>").unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("<ExpressionText>") {
            expression =
                lexer::unescape_xml(rest.strip_suffix("</ExpressionText>").unwrap_or(rest));
        } else if line == "<ScriptCode>" {
            in_script_code = true;
        } else if line == "</ScriptCode>" {
            return Ok(script_code.join("\n"));
        } else if in_script_code {
            script_code.push(lexer::unescape_xml(line));
        } else if line.starts_with("<ValueType ") {
            if let Some(ty) = lexer::attribute_in(line, "Type") {
                value_type = remap_type(ty).to_string();
            }
        } else if line.starts_with("<ValueId ") {
            if let Some(id) = lexer::attribute_in(line, "Id") {
                value_id = id.to_string();
            }
        } else if line.starts_with("<Variable ") {
            let (variable_lib, referenced) = repo.resolve_line(line)?;
            variable = variable_name(variable_lib, &referenced);
        } else if line.starts_with("<Array ") {
            let (_, index_param) = repo.resolve_line(line)?;
            array_parts.push(format!("[{}]", codegen_parameter(repo, &index_param, auto)?));
        } else if line.starts_with("<FunctionCall ") {
            let (_, call) = repo.resolve_line(line)?;
            let generated = codegen_function_call(repo, &call, auto, "", 0)?;
            let [single] = generated.as_slice() else {
                return Err(CompileError::InvalidInvariant(format!(
                    "call {call} in value position generated {} lines",
                    generated.len()
                )));
            };
            return Ok(single.clone());
        } else if line.starts_with("<ValueElement ") {
            let (value_lib, referenced) = repo.resolve_line(line)?;
            match referenced.kind {
                ElementKind::Trigger => return Ok(trigger_name(value_lib, &referenced)),
                ElementKind::Preset => {
                    if let Some(value_preset) = element.first_line_of_tag("ValuePreset") {
                        let (preset_lib, preset_value) = repo.resolve_line(&value_preset)?;
                        if preset_value.kind != ElementKind::PresetValue {
                            return Err(CompileError::InvalidInvariant(format!(
                                "value preset reference to {preset_value}"
                            )));
                        }
                        return preset_value_name(preset_lib, &preset_value);
                    }
                    if let Some(base) = referenced.attribute("BaseType", "Value") {
                        if let Some(default) = typeregister::default_return_value(&base) {
                            return Ok(default.to_string());
                        }
                    }
                    return Ok(escape_identifier(&value_lib.display_name(&referenced)));
                }
                _ => {
                    return Err(CompileError::InvalidInvariant(format!(
                        "don't know how to render a value element of {referenced}"
                    )))
                }
            }
        } else if line.starts_with("<Preset ") {
            let (preset_lib, preset_value) = repo.resolve_line(line)?;
            return preset_value_name(preset_lib, &preset_value);
        } else if line.starts_with("<Parameter Type=\"ParamDef\"") {
            let (def_lib, paramdef) = repo.resolve_line(line)?;
            return Ok(parameter_name(def_lib, &paramdef));
        }
    }
    if value_type == "abilcmd" {
        let id = if value_id.is_empty() { "0" } else { value_id.as_str() };
        return Ok(format!("AbilityCommand(\"{value}\", {id})"));
    }
    if !value_id.is_empty() {
        return Ok(value_id);
    }
    if value_type == "layoutframerel" {
        let frame = value.rsplit('/').next().unwrap_or(value.as_str());
        return Ok(format!("\"{frame}\""));
    }
    if !array_parts.is_empty() {
        if variable.is_empty() {
            return Err(CompileError::InvalidInvariant(format!(
                "{element} has array indices but no variable"
            )));
        }
        return Ok(format!("{variable}{}", array_parts.concat()));
    }
    if !variable.is_empty() {
        return Ok(variable);
    }
    if value_type == "text" {
        let key = format!("{}/Value/lib_{}_{}", element.kind, lib.library, element.id);
        return Ok(if lib.trigger_strings.contains_key(&key) {
            format!("StringExternal(\"{key}\")")
        } else {
            "StringToText(\"\")".to_string()
        });
    }
    if !expression.is_empty() {
        return expression_text(repo, lib, element, &expression, auto);
    }
    if value_type == "string" && value.is_empty() {
        return Ok("\"\"".into());
    }
    if value.is_empty() {
        return Ok(format!("@param{}", element.id));
    }
    if value_type == "color" {
        return literals::color(&value);
    }
    if value_type == "fixed" {
        return literals::fixed(&value);
    }
    if value_type == "string" {
        return Ok(literals::quote_string(&value));
    }
    if value_type == "unitfilter" {
        return literals::unit_filter(&value);
    }
    Ok(value)
}

/// Substitute every `~NAME~` with the generated child Param whose
/// `ExpressionCode` matches, then parenthesize the whole expression.
fn expression_text(
    repo: &Repository,
    lib: &TriggerLib,
    element: &Element,
    expression: &str,
    auto: &mut AutoVarBuilder,
) -> Result<String> {
    let mut children_by_code: HashMap<String, ElementRc> = HashMap::new();
    for child in lib.children_of(element) {
        if let Some(code) = child.attribute("ExpressionCode", "Value") {
            children_by_code.insert(code, child.clone());
        }
    }
    let mut out = String::from("(");
    let mut rest = expression;
    while let Some(start) = rest.find('~') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let code_len = after.bytes().take_while(|b| b.is_ascii_uppercase()).count();
        if code_len > 0 && after.as_bytes().get(code_len) == Some(&b'~') {
            let code = &after[..code_len];
            match children_by_code.get(code).cloned() {
                Some(child) => out.push_str(&codegen_parameter(repo, &child, auto)?),
                // unknown codes stay verbatim
                None => out.push_str(&format!("~{code}~")),
            }
            rest = &after[code_len + 1..];
        } else {
            out.push('~');
            rest = after;
        }
    }
    out.push_str(rest);
    out.push(')');
    Ok(out)
}

// ---------------------------------------------------------------------------
// Function calls

pub fn paramdef_line(paramdef: &Element) -> String {
    format!(
        "<ParameterDef Type=\"ParamDef\" Library=\"{}\" Id=\"{}\"/>",
        paramdef.library, paramdef.id
    )
}

pub fn subfunction_line(subfunction: &Element) -> String {
    format!(
        "<SubFunctionType Type=\"SubFuncType\" Library=\"{}\" Id=\"{}\"/>",
        subfunction.library, subfunction.id
    )
}

fn parameter_def_id(element: &Element) -> Result<SmolStr> {
    for line in element.lines.borrow().iter() {
        if line.starts_with("<ParameterDef ") {
            if let Some(r) = lexer::type_lib_id(line) {
                return Ok(SmolStr::new(r.id));
            }
        }
    }
    Err(CompileError::BrokenReference(format!("{element} targets no parameter def")))
}

/// Order a call's arguments by the definition's declared parameter order.
fn sort_parameters(
    parameters: &mut Vec<ElementRc>,
    param_order: &[ElementRc],
    call: &Element,
) -> Result<()> {
    let mut keyed: Vec<(usize, ElementRc)> = Vec::with_capacity(parameters.len());
    for parameter in parameters.iter() {
        let def_id = parameter_def_id(parameter)?;
        let position = param_order.iter().position(|p| p.id == def_id).ok_or_else(|| {
            CompileError::BrokenReference(format!(
                "parameter {parameter} of {call} targets a def outside the declared order"
            ))
        })?;
        keyed.push((position, parameter.clone()));
    }
    keyed.sort_by_key(|(position, _)| *position);
    *parameters = keyed.into_iter().map(|(_, p)| p).collect();
    Ok(())
}

/// Generate a function call. `end` is the terminal punctuation in statement
/// context; `this_subfunc_order` is the call's position among its sibling
/// subfunctions (consumed by `#IFSUBFUNC(notfirst, …)`).
pub fn codegen_function_call(
    repo: &Repository,
    element: &ElementRc,
    auto: &mut AutoVarBuilder,
    end: &str,
    this_subfunc_order: usize,
) -> Result<Vec<String>> {
    if element.kind != ElementKind::FunctionCall {
        return Err(CompileError::InvalidInvariant(format!("{element} is not a function call")));
    }
    let lib = repo.lib(&element.library)?;
    if element.is_disabled() {
        return Ok(vec![]);
    }
    let def_lines = element.lines_of_tag("FunctionDef");
    let child_elements: Vec<ElementRc> = lib
        .children_of(element)
        .iter()
        .filter(|c| c.kind != ElementKind::Comment)
        .cloned()
        .collect();
    let mut parameters: Vec<ElementRc> =
        child_elements.iter().filter(|c| c.kind == ElementKind::Param).cloned().collect();
    let subfunction_parameters: Vec<ElementRc> = child_elements
        .iter()
        .filter(|c| c.kind == ElementKind::FunctionCall)
        .cloned()
        .collect();
    if def_lines.is_empty() {
        return Ok(vec!["@nofunc@".to_string()]);
    }
    if def_lines.len() > 1 {
        return Err(CompileError::InvalidInvariant(format!(
            "{element} references several function defs"
        )));
    }
    let (def_lib, def) = repo.resolve_line(&def_lines[0])?;
    let name = function_name(def_lib, &def);
    let param_order = def_lib.children_of_kind(&def, ElementKind::ParamDef);
    let subfunc_order = def_lib.children_of_kind(&def, ElementKind::SubFuncType);
    let mut script_code = def.multiline_value("ScriptCode")?;
    if def.library == typeregister::NATIVE_LIBRARY && def.id == typeregister::CUSTOM_SCRIPT_DEF_ID
    {
        script_code = Some(element.multiline_value("ScriptCode")?.ok_or_else(|| {
            CompileError::InvalidInvariant(format!("custom script call {element} has no script"))
        })?);
    }
    let Some(script_code) = script_code else {
        if !subfunc_order.is_empty() {
            // container definition: the body is the single subfunction slot
            if !param_order.is_empty() || subfunc_order.len() != 1 {
                return Err(CompileError::InvalidInvariant(format!(
                    "container def {def} mixes parameters and subfunctions"
                )));
            }
            let mut result = vec![];
            let enabled = subfunction_parameters.iter().filter(|s| !s.is_disabled());
            for (order, subfunction) in enabled.enumerate() {
                result.extend(codegen_function_call(repo, subfunction, auto, ";", order)?);
            }
            return Ok(result);
        }
        if def.has_line("<FlagOperator/>") && matches!(parameters.len(), 1 | 3) {
            sort_parameters(&mut parameters, &param_order, element)?;
            let mut rendered = vec![];
            for parameter in &parameters {
                rendered.push(codegen_parameter(repo, parameter, auto)?);
            }
            return Ok(vec![format!("({}){end}", rendered.join(" "))]);
        }
        sort_parameters(&mut parameters, &param_order, element)?;
        let mut arguments: Vec<String> = vec![];
        if def.has_line("<FlagEvent/>") {
            arguments.push(auto.event_arg.to_string());
        }
        for parameter in &parameters {
            arguments.push(codegen_parameter(repo, parameter, auto)?);
        }
        return Ok(vec![format!("{name}({}){end}", arguments.join(", "))]);
    };

    // scripted definition: bind arguments and subfunctions, then expand the
    // macro language against this call site
    let mut auto_var_owner = element.id.clone();
    let mut params: HashMap<SmolStr, Vec<ElementRc>> = HashMap::new();
    for paramdef in &param_order {
        let identifier = paramdef.inline_value("Identifier").map(SmolStr::new).ok_or_else(|| {
            CompileError::InvalidInvariant(format!(
                "{paramdef} of scripted def {def} has no identifier"
            ))
        })?;
        let binding_line = paramdef_line(paramdef);
        let arguments: Vec<ElementRc> =
            parameters.iter().filter(|c| c.has_line(&binding_line)).cloned().collect();
        if !arguments.is_empty() {
            params.insert(identifier.clone(), arguments);
        }
        if let Some(default_line) = paramdef.first_line_of_tag("Default") {
            let (_, default) = repo.resolve_line(&default_line)?;
            params.entry(identifier).or_insert_with(|| vec![default]);
            continue;
        }
        if paramdef.attribute("Type", "Value").as_deref() == Some("sameasparent") {
            // the loop variable of a nested loop body: typed by the parent
            // call's sole argument, owned by the parent call
            let parent = lib.parent_of(element).ok_or_else(|| {
                CompileError::BrokenReference(format!("{element} has no parent"))
            })?;
            if parent.kind != ElementKind::FunctionCall {
                return Err(CompileError::InvalidInvariant(format!(
                    "sameasparent parameter outside a nested call: {element}"
                )));
            }
            auto_var_owner = parent.id.clone();
            let parent_params = lib.children_of_kind(&parent, ElementKind::Param);
            let [parent_param] = parent_params.as_slice() else {
                return Err(CompileError::InvalidInvariant(format!(
                    "expected exactly one argument on {parent}"
                )));
            };
            let parent_def_line =
                parent_param.first_line_of_tag("ParameterDef").ok_or_else(|| {
                    CompileError::BrokenReference(format!(
                        "{parent_param} targets no parameter def"
                    ))
                })?;
            let (_, parent_paramdef) = repo.resolve_line(&parent_def_line)?;
            if let Some(default_line) = parent_paramdef.first_line_of_tag("Default") {
                let (_, default) = repo.resolve_line(&default_line)?;
                params.entry(identifier).or_insert_with(|| vec![default]);
            }
        }
    }
    let mut subfuncs: HashMap<SmolStr, Vec<ElementRc>> = HashMap::new();
    for subfunc_def in &subfunc_order {
        let identifier =
            subfunc_def.inline_value("Identifier").map(SmolStr::new).ok_or_else(|| {
                CompileError::InvalidInvariant(format!(
                    "{subfunc_def} of scripted def {def} has no identifier"
                ))
            })?;
        let binding_line = subfunction_line(subfunc_def);
        let bound: Vec<ElementRc> = subfunction_parameters
            .iter()
            .filter(|c| c.has_line(&binding_line) && !c.is_disabled())
            .cloned()
            .collect();
        subfuncs.insert(identifier, bound);
    }
    let ctx = CallContext {
        repo,
        call: element.clone(),
        def,
        params,
        subfuncs,
        this_subfunc_order,
        auto_var_owner,
    };
    builtin_macros::expand_script_code(&ctx, &script_code, auto)
}

// ---------------------------------------------------------------------------
// Custom scripts and variable initialization

pub fn codegen_custom_script(element: &ElementRc) -> Result<Vec<String>> {
    element.multiline_value("ScriptCode")?.ok_or_else(|| {
        CompileError::MalformedXml(format!("custom script {element} is missing its script block"))
    })
}

fn variable_value_param(repo: &Repository, element: &Element) -> Result<Option<ElementRc>> {
    let line = element
        .lines
        .borrow()
        .iter()
        .find(|l| l.starts_with("<Value Type=\"Param\""))
        .cloned();
    match line {
        Some(line) => Ok(Some(repo.resolve_line(&line)?.1)),
        None => Ok(None),
    }
}

/// The assignment that initializes a variable, or nothing when the value is
/// a default, constant, or absent. Constants are initialized in the header.
pub fn codegen_variable_init(repo: &Repository, element: &ElementRc) -> Result<Vec<String>> {
    let lib = repo.lib(&element.library)?;
    let Some(value_param) = variable_value_param(repo, element)? else {
        return Ok(vec![]);
    };
    if element.has_line("<Constant/>") {
        return Ok(vec![]);
    }
    let mut auto = AutoVarBuilder::new("void");
    let init = codegen_parameter(repo, &value_param, &mut auto)?;
    if matches!(init.as_str(), "0" | "0.0" | "null" | "false") {
        return Ok(vec![]);
    }
    if !auto.is_empty() {
        return Err(CompileError::InvalidInvariant(format!(
            "initializer of {element} synthesized local variables"
        )));
    }
    Ok(vec![format!("{} = {init};", variable_name(lib, element))])
}

// ---------------------------------------------------------------------------
// Function definitions

fn parse_return_type(element: &Element) -> String {
    let mut in_block = false;
    for line in element.lines.borrow().iter() {
        if line == "<ReturnType>" {
            in_block = true;
        } else if line == "</ReturnType>" {
            in_block = false;
        } else if in_block && line.starts_with("<Type ") {
            if let Some(value) = lexer::attribute_in(line, "Value") {
                return remap_type(value).to_string();
            }
        }
    }
    "void".into()
}

fn put(result: &mut Vec<String>, indent: i32, text: &str) {
    if text.is_empty() {
        result.push(String::new());
    } else {
        result.push(format!("{}{}", "    ".repeat(indent.max(0) as usize), text));
    }
}

pub fn codegen_function_def(
    repo: &Repository,
    lib: &TriggerLib,
    element: &ElementRc,
) -> Result<String> {
    if element.kind != ElementKind::FunctionDef {
        return Err(CompileError::InvalidInvariant(format!(
            "{element} is not a function definition"
        )));
    }
    let parameters = lib.children_of_kind(element, ElementKind::ParamDef);
    let functions = lib.children_of_kind(element, ElementKind::FunctionCall);
    let variables = lib.children_of_kind(element, ElementKind::Variable);
    let mut this_function_name = function_name(lib, element);
    let mut return_type = parse_return_type(element);
    if return_type == "preset" {
        let line = element.first_line_of_tag("TypeElement").ok_or_else(|| {
            CompileError::InvalidInvariant(format!(
                "{element} returns a preset but references no type element"
            ))
        })?;
        let (_, preset) = repo.resolve_line(&line)?;
        return_type = preset_backing_type(&preset)?;
    }
    if element.is_disabled() {
        return Ok(String::new());
    }
    let mut parameter_types_names: Vec<(String, String)> = vec![];
    for parameter in &parameters {
        parameter_types_names
            .push((get_variable_type(repo, parameter)?, parameter_name(lib, parameter)));
    }
    let mut trigger_vars: Vec<(String, String)> = vec![];
    let mut trigger_parameter_types_names: Vec<(String, String)> = vec![];
    let mut result: Vec<String> = vec![];
    if element.has_line("<FlagCreateThread/>") {
        // thread dispatch: the public function copies its arguments into
        // shadow globals and fires a lazily created trigger; the body runs
        // in the trigger's func and reads them back
        let trigger_basename = format!("auto_{this_function_name}");
        let trigger_variable = format!("{trigger_basename}_Trigger");
        let dispatcher_name = this_function_name.clone();
        this_function_name = format!("{trigger_variable}Func");
        result.push(format!("trigger {trigger_variable} = null;"));
        trigger_vars = parameter_types_names
            .iter()
            .map(|(ty, name)| (ty.clone(), format!("{trigger_basename}_{name}")))
            .collect();
        for (ty, name) in &trigger_vars {
            result.push(format!("{ty} {name};"));
        }
        result.push(String::new());
        result.push(format!(
            "{return_type} {dispatcher_name} ({}) {{",
            parameter_types_names.iter().map(|(ty, name)| format!("{ty} {name}")).join(", ")
        ));
        for ((_, shadow_name), (_, parameter)) in trigger_vars.iter().zip(&parameter_types_names)
        {
            result.push(format!("    {shadow_name} = {parameter};"));
        }
        if !trigger_vars.is_empty() {
            result.push(String::new());
        }
        result.push(format!("    if ({trigger_variable} == null) {{"));
        result.push(format!("        {trigger_variable} = TriggerCreate(\"{this_function_name}\");"));
        result.push("    }".into());
        result.push(String::new());
        result.push(format!("    TriggerExecute({trigger_variable}, false, false);"));
        result.push("}".into());
        result.push(String::new());
        trigger_parameter_types_names = std::mem::take(&mut parameter_types_names);
        parameter_types_names =
            vec![("bool".into(), "testConds".into()), ("bool".into(), "runActions".into())];
        return_type = "bool".into();
    } else if element.has_line("<FlagEvent/>") {
        parameter_types_names.insert(0, ("trigger".into(), "t".into()));
    }
    let mut indent: i32 = 0;
    put(
        &mut result,
        indent,
        &format!(
            "{return_type} {this_function_name} ({}) {{",
            parameter_types_names.iter().map(|(ty, name)| format!("{ty} {name}")).join(", ")
        ),
    );
    indent += 1;
    if !trigger_vars.is_empty() {
        for ((shadow_type, shadow_name), (_, parameter)) in
            trigger_vars.iter().zip(&trigger_parameter_types_names)
        {
            put(&mut result, indent, &format!("{shadow_type} {parameter} = {shadow_name};"));
        }
        put(&mut result, indent, "");
    }
    if !variables.is_empty() {
        put(&mut result, indent, "// Variable Declarations");
        for variable in &variables {
            put(
                &mut result,
                indent,
                &format!(
                    "{} {};",
                    get_variable_type(repo, variable)?,
                    local_variable_name(lib, variable)
                ),
            );
        }
        put(&mut result, indent, "");
    }
    put(&mut result, indent, "// Automatic Variable Declarations");
    let auto_var_insertion_point = result.len();
    let mut auto = AutoVarBuilder::new(&return_type);
    if !variables.is_empty() {
        put(&mut result, indent, "// Variable Initialization");
        for variable in &variables {
            for line in codegen_variable_init(repo, variable)? {
                put(&mut result, indent, &line);
            }
        }
        put(&mut result, indent, "");
    }
    put(&mut result, indent, "// Implementation");
    for function in &functions {
        let lines = codegen_function_call(repo, function, &mut auto, ";", 0)?;
        let (next_indent, indented) = lexer::indent_lines(&lines, indent);
        indent = next_indent;
        result.extend(indented);
    }
    if return_type != "void" {
        let mut last = result.len().saturating_sub(1);
        while last > 0 && matches!(result[last].trim(), "}" | "") {
            last -= 1;
        }
        if !result[last].trim_start().starts_with("return") {
            let default = typeregister::default_return_value(&return_type).unwrap_or_default();
            put(&mut result, indent, &format!("return {default};"));
        }
    }
    indent -= 1;
    if !auto.is_empty() {
        result.insert(auto_var_insertion_point, String::new());
    }
    for (offset, line) in auto.declarations().into_iter().enumerate() {
        result.insert(auto_var_insertion_point + offset, line);
    }
    debug_assert_eq!(indent, 0, "unbalanced body generated for {element}");
    put(&mut result, indent, "}");
    Ok(result.join("\n"))
}

// ---------------------------------------------------------------------------
// Triggers

fn banner() -> String {
    format!("//{}", "-".repeat(98))
}

fn trigger_children_of_tag(
    repo: &Repository,
    trigger: &Element,
    tag: &str,
) -> Result<Vec<ElementRc>> {
    let mut out = vec![];
    for line in trigger.lines.borrow().clone() {
        let Some(r) = lexer::child_reference(&line) else { continue };
        if r.tag == tag {
            out.push(repo.resolve(r.library, r.id, ElementKind::parse(r.kind)?)?.1);
        }
    }
    Ok(out)
}

pub fn codegen_trigger(repo: &Repository, lib: &TriggerLib, element: &ElementRc) -> Result<String> {
    if element.kind != ElementKind::Trigger {
        return Err(CompileError::InvalidInvariant(format!("{element} is not a trigger")));
    }
    if element.is_disabled() {
        return Ok(String::new());
    }
    let name = trigger_name(lib, element);
    let events = trigger_children_of_tag(repo, element, "Event")?;
    let conditions = trigger_children_of_tag(repo, element, "Condition")?;
    let actions = trigger_children_of_tag(repo, element, "Action")?;
    let variables = lib.children_of_kind(element, ElementKind::Variable);

    let mut result =
        vec![banner(), format!("// Trigger: {}", lib.display_name(element)), banner()];
    result.push(format!("bool {name}_Func (bool testConds, bool runActions) {{"));
    let mut indent: i32 = 1;
    if !variables.is_empty() {
        put(&mut result, indent, "// Variable Declarations");
        for variable in &variables {
            put(
                &mut result,
                indent,
                &format!(
                    "{} {};",
                    get_variable_type(repo, variable)?,
                    local_variable_name(lib, variable)
                ),
            );
        }
        put(&mut result, indent, "");
    }
    put(&mut result, indent, "// Automatic Variable Declarations");
    let auto_var_insertion_point = result.len();
    let mut auto = AutoVarBuilder::new("bool");
    if !variables.is_empty() {
        put(&mut result, indent, "// Variable Initialization");
        for variable in &variables {
            for line in codegen_variable_init(repo, variable)? {
                put(&mut result, indent, &line);
            }
        }
        put(&mut result, indent, "");
    }
    if !conditions.is_empty() {
        put(&mut result, indent, "// Conditions");
        for condition in &conditions {
            let lines = codegen_function_call(repo, condition, &mut auto, "", 0)?;
            match lines.as_slice() {
                [] => continue,
                [expr] => {
                    put(&mut result, indent, "if (testConds) {");
                    put(&mut result, indent, &format!("    if (!({expr})) {{"));
                    put(&mut result, indent, "        return false;");
                    put(&mut result, indent, "    }");
                    put(&mut result, indent, "}");
                    put(&mut result, indent, "");
                }
                _ => {
                    return Err(CompileError::InvalidInvariant(format!(
                        "condition {condition} generated several lines"
                    )))
                }
            }
        }
    }
    put(&mut result, indent, "// Actions");
    put(&mut result, indent, "if (!runActions) {");
    put(&mut result, indent, "    return true;");
    put(&mut result, indent, "}");
    put(&mut result, indent, "");
    for action in &actions {
        let lines = codegen_function_call(repo, action, &mut auto, ";", 0)?;
        let (next_indent, indented) = lexer::indent_lines(&lines, indent);
        indent = next_indent;
        result.extend(indented);
    }
    put(&mut result, indent, "return true;");
    if !auto.is_empty() {
        result.insert(auto_var_insertion_point, String::new());
    }
    for (offset, line) in auto.declarations().into_iter().enumerate() {
        result.insert(auto_var_insertion_point + offset, line);
    }
    result.push("}".into());
    result.push(String::new());
    result.push(banner());
    result.push(format!("void {name}_Init () {{"));
    result.push(format!("    {name} = TriggerCreate(\"{name}_Func\");"));
    if element.has_line("<InitOff/>") {
        result.push(format!("    TriggerEnable({name}, false);"));
    }
    let mut event_auto = AutoVarBuilder::with_event_arg("void", &name);
    for event in &events {
        for line in codegen_function_call(repo, event, &mut event_auto, ";", 0)? {
            result.push(format!("    {line}"));
        }
    }
    result.push("}".into());
    Ok(result.join("\n"))
}

// ---------------------------------------------------------------------------
// Libraries

fn is_top_level(lib: &TriggerLib, element: &Element) -> bool {
    matches!(
        lib.parent_of(element).map(|p| p.kind),
        Some(ElementKind::Root) | Some(ElementKind::Category)
    )
}

/// Generate the whole Galaxy source of a library: includes, the one-shot
/// init functions, custom scripts, functions, and triggers. Sections with no
/// content are omitted entirely.
pub fn codegen_library(repo: &Repository, lib: &TriggerLib) -> Result<String> {
    let sorted = lib.sorted_elements()?;
    let mut result: Vec<String> = vec!["include \"TriggerLibs/NativeLib\"".into()];
    for dependency in &lib.dependencies {
        let dep = repo.lib_by_name(dependency)?;
        result.push(format!("include \"Lib{}\"", dep.library));
    }
    result.push(String::new());
    if lib.library != NO_LIBRARY {
        result.push(format!("include \"Lib{}_h\"", lib.library));
        result.push(String::new());
    }
    if let Some(display) = lib.trigger_strings.get(&format!("Library/Name/{}", lib.library)) {
        result.extend([banner(), format!("// Library: {display}"), banner()]);
    }
    if !lib.dependencies.is_empty() {
        result.push("// External Library Initialization".into());
        result.push(format!("void lib{}_InitLibraries () {{", lib.library));
        result.push("    libNtve_InitVariables();".into());
        for dependency in &lib.dependencies {
            let dep = repo.lib_by_name(dependency)?;
            result.push(format!("    lib{}_InitVariables();", dep.library));
        }
        result.push("}".into());
        result.push(String::new());
    }
    result.push("// Variable Initialization".into());
    result.push(format!("bool lib{}_InitVariables_completed = false;", lib.library));
    result.push(String::new());
    result.push(format!("void lib{}_InitVariables () {{", lib.library));
    result.push(format!("    if (lib{}_InitVariables_completed) {{", lib.library));
    result.push("        return;".into());
    result.push("    }".into());
    result.push(String::new());
    result.push(format!("    lib{}_InitVariables_completed = true;", lib.library));
    result.push(String::new());
    for element in &sorted {
        if element.kind != ElementKind::Variable || !is_top_level(lib, element) {
            continue;
        }
        for line in codegen_variable_init(repo, element)? {
            result.push(format!("    {line}"));
        }
    }
    result.push("}".into());
    result.push(String::new());

    let custom_scripts: Vec<&ElementRc> = sorted
        .iter()
        .filter(|e| e.kind == ElementKind::CustomScript && is_top_level(lib, e))
        .collect();
    if !custom_scripts.is_empty() {
        result.push("// Custom Script".into());
        for custom_script in &custom_scripts {
            result.extend([
                banner(),
                format!("// Custom Script: {}", lib.display_name(custom_script)),
                banner(),
            ]);
            let (_, indented) = lexer::indent_lines(&codegen_custom_script(custom_script)?, 0);
            result.extend(indented);
            result.push(String::new());
        }
        result.push(format!("void lib{}_InitCustomScript () {{", lib.library));
        for custom_script in &custom_scripts {
            if let Some(init_func) = custom_script.inline_value("InitFunc") {
                result.push(format!("    {init_func}();"));
            }
        }
        result.push("}".into());
        result.push(String::new());
    }

    let mut function_blocks: Vec<String> = vec![];
    for element in &sorted {
        if element.kind != ElementKind::FunctionDef {
            continue;
        }
        let generated = codegen_function_def(repo, lib, element)?;
        if !generated.is_empty() {
            function_blocks.push(generated);
        }
    }
    if !function_blocks.is_empty() {
        result.push("// Functions".into());
        for block in function_blocks {
            result.push(block);
            result.push(String::new());
        }
    }

    let mut trigger_names: Vec<String> = vec![];
    let mut trigger_blocks: Vec<String> = vec![];
    for element in &sorted {
        if element.kind != ElementKind::Trigger {
            continue;
        }
        let generated = codegen_trigger(repo, lib, element)?;
        if !generated.is_empty() {
            trigger_names.push(trigger_name(lib, element));
            trigger_blocks.push(generated);
        }
    }
    let has_triggers = !trigger_blocks.is_empty();
    if has_triggers {
        result.push("// Triggers".into());
        for block in trigger_blocks {
            result.push(block);
            result.push(String::new());
        }
        result.push(format!("void lib{}_InitTriggers () {{", lib.library));
        for name in &trigger_names {
            result.push(format!("    {name}_Init();"));
        }
        result.push("}".into());
        result.push(String::new());
    }

    if !lib.dependencies.is_empty() || !custom_scripts.is_empty() || has_triggers {
        result.extend([banner(), "// Library Initialization".into(), banner()]);
        result.push(format!("bool lib{}_InitLib_completed = false;", lib.library));
        result.push(String::new());
        result.push(format!("void lib{}_InitLib () {{", lib.library));
        result.push(format!("    if (lib{}_InitLib_completed) {{", lib.library));
        result.push("        return;".into());
        result.push("    }".into());
        result.push(String::new());
        result.push(format!("    lib{}_InitLib_completed = true;", lib.library));
        result.push(String::new());
        if !lib.dependencies.is_empty() {
            result.push(format!("    lib{}_InitLibraries();", lib.library));
        }
        result.push(format!("    lib{}_InitVariables();", lib.library));
        if !custom_scripts.is_empty() {
            result.push(format!("    lib{}_InitCustomScript();", lib.library));
        }
        if has_triggers {
            result.push(format!("    lib{}_InitTriggers();", lib.library));
        }
        result.push("}".into());
    }
    while result.last().is_some_and(|l| l.is_empty()) {
        result.pop();
    }
    Ok(result.join("\n"))
}

/// The header sibling: declarations for globals (constants with their
/// initializer), function prototypes, and trigger variables.
pub fn codegen_library_header(repo: &Repository, lib: &TriggerLib) -> Result<String> {
    let sorted = lib.sorted_elements()?;
    let mut result: Vec<String> = vec!["include \"TriggerLibs/NativeLib\"".into(), String::new()];
    if let Some(display) = lib.trigger_strings.get(&format!("Library/Name/{}", lib.library)) {
        result.extend([banner(), format!("// Library: {display}"), banner()]);
    }
    let mut globals: Vec<String> = vec![];
    for element in &sorted {
        if element.kind != ElementKind::Variable || !is_top_level(lib, element) {
            continue;
        }
        let ty = get_variable_type(repo, element)?;
        let name = global_variable_name(lib, element);
        if element.has_line("<Constant/>") {
            if let Some(value_param) = variable_value_param(repo, element)? {
                let mut auto = AutoVarBuilder::new("void");
                let init = codegen_parameter(repo, &value_param, &mut auto)?;
                globals.push(format!("const {ty} {name} = {init};"));
                continue;
            }
        }
        globals.push(format!("{ty} {name};"));
    }
    if !globals.is_empty() {
        result.push("// Variable Declarations".into());
        result.extend(globals);
        result.push(String::new());
    }
    let mut prototypes: Vec<String> = vec![];
    for element in &sorted {
        if element.kind != ElementKind::FunctionDef
            || element.is_disabled()
            || element.has_line("<FlagNative/>")
        {
            continue;
        }
        let mut return_type = parse_return_type(element);
        if return_type == "preset" {
            let Some(line) = element.first_line_of_tag("TypeElement") else { continue };
            return_type = preset_backing_type(&repo.resolve_line(&line)?.1)?;
        }
        let mut parameter_list: Vec<String> = vec![];
        if element.has_line("<FlagEvent/>") {
            parameter_list.push("trigger t".into());
        }
        for parameter in lib.children_of_kind(element, ElementKind::ParamDef) {
            parameter_list.push(format!(
                "{} {}",
                get_variable_type(repo, &parameter)?,
                parameter_name(lib, &parameter)
            ));
        }
        prototypes.push(format!(
            "{return_type} {} ({});",
            function_name(lib, element),
            parameter_list.join(", ")
        ));
    }
    if !prototypes.is_empty() {
        result.push("// Function Declarations".into());
        result.extend(prototypes);
        result.push(String::new());
    }
    let mut triggers: Vec<String> = vec![];
    for element in &sorted {
        if element.kind != ElementKind::Trigger || element.is_disabled() {
            continue;
        }
        triggers.push(format!("trigger {};", trigger_name(lib, element)));
    }
    if !triggers.is_empty() {
        result.push("// Trigger Declarations".into());
        result.extend(triggers);
    }
    while result.last().is_some_and(|l| l.is_empty()) {
        result.pop();
    }
    Ok(result.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_escaping() {
        assert_eq!(escape_identifier("Set Upgrade (Level)"), "SetUpgradeLevel");
        assert_eq!(escape_identifier("a/b+c-d"), "abcd");
    }

    #[test]
    fn case_toggling() {
        assert_eq!(toggle_case_of_first_letter("Upgrade"), "upgrade");
        assert_eq!(toggle_case_of_first_letter("upgrade"), "Upgrade");
        assert_eq!(toggle_case_of_first_letter(""), "");
    }

    #[test]
    fn lower_first_only_lowers() {
        assert_eq!(lower_first("Player"), "player");
        assert_eq!(lower_first("player"), "player");
    }
}
