// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 Expansion of the `#MACRO(…)` language inside `ScriptCode` bodies.

 A scripted function definition carries a templated body; at every call site
 the expander walks the body line by line, substituting macro invocations
 against the actual call: bound parameters, bound subfunctions, the enclosing
 return type, and the synthesized ("auto") local variables that the body
 declares on the fly.

 Auto variables accumulate in an [`AutoVarBuilder`]: an append-only list with
 a movable insertion index, so the If-Then-Else definition can snapshot the
 index before its then branch and restore it before the else branch (the
 editor declares the else branch's variables first).
*/

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::diagnostics::{CompileError, Result};
use crate::element_tree::{ElementKind, ElementRc, Repository};
use crate::generator::galaxy;
use crate::lexer;
use crate::typeregister;

/// One synthesized local, named `auto<ownerId>_<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoVariable {
    pub name: String,
    pub var_type: SmolStr,
    /// A constant initializer suppresses the in-place assignment.
    pub constant: Option<String>,
}

#[derive(Debug)]
pub struct AutoVarBuilder {
    vars: Vec<AutoVariable>,
    insert_at: usize,
    pub return_type: SmolStr,
    /// What `<FlagEvent/>` calls pass as their extra first argument: `t`
    /// inside function bodies, the trigger variable inside `_Init`.
    pub event_arg: SmolStr,
}

impl AutoVarBuilder {
    pub fn new(return_type: &str) -> Self {
        Self::with_event_arg(return_type, "t")
    }

    pub fn with_event_arg(return_type: &str, event_arg: &str) -> Self {
        AutoVarBuilder {
            vars: vec![],
            insert_at: 0,
            return_type: SmolStr::new(return_type),
            event_arg: SmolStr::new(event_arg),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v.name == name)
    }

    pub fn push(&mut self, var: AutoVariable) {
        self.vars.insert(self.insert_at, var);
        self.insert_at += 1;
    }

    pub fn snapshot(&self) -> usize {
        self.insert_at
    }

    pub fn restore(&mut self, at: usize) {
        self.insert_at = at.min(self.vars.len());
    }

    pub fn vars(&self) -> &[AutoVariable] {
        &self.vars
    }

    /// Declaration lines, ready to splice into a function body.
    pub fn declarations(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|v| {
                let (prefix, init) = match &v.constant {
                    Some(c) => ("const ", format!(" = {c}")),
                    None => ("", String::new()),
                };
                format!("    {}{} {}{};", prefix, v.var_type, v.name, init)
            })
            .collect()
    }
}

/// Everything the expander knows about one scripted call site.
pub(crate) struct CallContext<'a> {
    pub repo: &'a Repository,
    pub call: ElementRc,
    pub def: ElementRc,
    /// Parameter identifier → bound arguments (or the definition's default).
    pub params: HashMap<SmolStr, Vec<ElementRc>>,
    /// Subfunction identifier → bound calls, disabled ones already filtered.
    pub subfuncs: HashMap<SmolStr, Vec<ElementRc>>,
    pub this_subfunc_order: usize,
    /// Element id that prefixes synthesized variable names.
    pub auto_var_owner: SmolStr,
}

impl CallContext<'_> {
    fn subfuncs_bound_to(&self, identifier: &str) -> Result<&[ElementRc]> {
        self.subfuncs.get(identifier).map(Vec::as_slice).ok_or_else(|| {
            CompileError::BrokenReference(format!(
                "script code of {} names unknown subfunction '{identifier}'",
                self.def
            ))
        })
    }

    fn param_bound_to(&self, identifier: &str) -> Option<&ElementRc> {
        self.params.get(identifier).and_then(|list| list.first())
    }
}

/// Walk up through enclosing FunctionCalls until one whose definition's
/// identifier is `ident`; that call's id becomes the auto-variable owner.
fn find_ancestor_call(
    repo: &Repository,
    call: &ElementRc,
    def: &ElementRc,
    ident: &str,
) -> Result<SmolStr> {
    let mut call = call.clone();
    let mut def = def.clone();
    loop {
        if def.inline_value("Identifier").as_deref() == Some(ident) {
            return Ok(call.id.clone());
        }
        let lib = repo.lib(&call.library)?;
        let mut parent = lib.parent_of(&call).ok_or_else(|| {
            CompileError::BrokenReference(format!("{call} has no parent"))
        })?;
        while !matches!(parent.kind, ElementKind::Root | ElementKind::FunctionCall) {
            let parent_lib = repo.lib(&parent.library)?;
            let next = parent_lib.parent_of(&parent).ok_or_else(|| {
                CompileError::BrokenReference(format!("{parent} has no parent"))
            })?;
            parent = next;
        }
        if parent.kind == ElementKind::Root {
            return Err(CompileError::BrokenReference(format!(
                "no enclosing call of '{ident}' above {call}"
            )));
        }
        let def_line = parent.first_line_of_tag("FunctionDef").ok_or_else(|| {
            CompileError::BrokenReference(format!("{parent} has no function def"))
        })?;
        let (_, parent_def) = repo.resolve_line(&def_line)?;
        call = parent;
        def = parent_def;
    }
}

/// Resolve an `#AUTOVAR(name, parent)` reference: the type comes from the
/// parent call's argument bound to `name`, and the parent call owns the
/// variable.
fn parent_autovar(
    ctx: &CallContext<'_>,
    identifier: &str,
) -> Result<(SmolStr, SmolStr)> {
    // Switch statements bind the scrutinee as `value` but their cases ask
    // for `val`.
    let identifier = if identifier == "val" { "value" } else { identifier };
    let lib = ctx.repo.lib(&ctx.call.library)?;
    let parent = lib.parent_of(&ctx.call).ok_or_else(|| {
        CompileError::BrokenReference(format!("{} has no parent", ctx.call))
    })?;
    let def_line = parent.first_line_of_tag("FunctionDef").ok_or_else(|| {
        CompileError::BrokenReference(format!("{parent} has no function def"))
    })?;
    let (parent_def_lib, parent_def) = ctx.repo.resolve_line(&def_line)?;
    let paramdef = parent_def_lib
        .keyword_parameters
        .get(&parent_def.key())
        .and_then(|params| params.get(identifier))
        .ok_or_else(|| {
            CompileError::BrokenReference(format!(
                "{parent_def} has no keyword parameter '{identifier}'"
            ))
        })?;
    let paramdef_line = galaxy::paramdef_line(paramdef);
    let arguments: Vec<ElementRc> = lib
        .children_of(&parent)
        .iter()
        .filter(|c| c.kind == ElementKind::Param && c.has_line(&paramdef_line))
        .cloned()
        .collect();
    let [argument] = arguments.as_slice() else {
        return Err(CompileError::InvalidInvariant(format!(
            "expected exactly one argument bound to '{identifier}' on {parent}"
        )));
    };
    let var_type = galaxy::get_variable_type(ctx.repo, argument)?;
    Ok((parent.id.clone(), SmolStr::new(var_type)))
}

pub(crate) fn expand_script_code(
    ctx: &CallContext<'_>,
    script: &[String],
    auto: &mut AutoVarBuilder,
) -> Result<Vec<String>> {
    let is_if_else = ctx.def.library == typeregister::NATIVE_LIBRARY
        && ctx.def.id == typeregister::IF_THEN_ELSE_DEF_ID;
    let mut block_count = 0usize;
    let mut then_insert_at: Option<usize> = None;

    let mut result: Vec<String> = vec![];
    let mut index = 0;
    while index < script.len() {
        let mut line = script[index].clone();
        index += 1;
        let mut emit = true;
        let mut ate_extra_line = false;

        if line == "#SMARTBREAK" {
            line = "break;".into();
        } else if line == "#SMARTCONTINUE" {
            line = "continue;".into();
        } else if line.contains("#DEFRETURN") {
            let default =
                typeregister::default_return_value(&auto.return_type).unwrap_or_default();
            line = line.replace("#DEFRETURN", default);
        }

        while emit && line.contains('#') {
            let invocation = match lexer::find_macro(&line) {
                Some(m) => m,
                None => {
                    // #IFHAVESUBFUNCS sometimes spreads across two script
                    // lines: the closing parenthesis sits on the next one.
                    if index >= script.len() {
                        return Err(CompileError::UnknownMacro(format!(
                            "unterminated macro invocation in {}: {line}",
                            ctx.def
                        )));
                    }
                    index += 1;
                    ate_extra_line = true;
                    line.push(')');
                    lexer::find_macro(&line).ok_or_else(|| {
                        CompileError::UnknownMacro(format!(
                            "unterminated macro invocation in {}: {line}",
                            ctx.def
                        ))
                    })?
                }
            };
            let lexer::MacroCall { name, args, start, end } = invocation;
            let mut replacement: Option<String> = None;
            match name.as_str() {
                "AUTOVAR" => {
                    let (var_name, type_spec) = match args.as_slice() {
                        [n] => (n.clone(), "int".to_string()),
                        [n, t] => (n.clone(), t.clone()),
                        _ => {
                            return Err(CompileError::InvalidInvariant(format!(
                                "AUTOVAR takes one or two arguments, got {}",
                                args.len()
                            )))
                        }
                    };
                    let mut owner = ctx.auto_var_owner.clone();
                    let mut var_type = SmolStr::new(type_spec.trim());
                    if let Some(ancestor) = type_spec.trim().strip_prefix("ancestor:") {
                        owner = find_ancestor_call(ctx.repo, &ctx.call, &ctx.def, ancestor)?;
                    } else if type_spec.trim() == "parent" {
                        let (parent_owner, parent_type) = parent_autovar(ctx, &var_name)?;
                        owner = parent_owner;
                        var_type = parent_type;
                    }
                    let auto_name = format!("auto{owner}_{var_name}");
                    if !auto.contains(&auto_name) {
                        auto.push(AutoVariable {
                            name: auto_name.clone(),
                            var_type,
                            constant: None,
                        });
                    }
                    replacement = Some(auto_name);
                }
                "INITAUTOVAR" => {
                    let [var_name, param_ident] = args.as_slice() else {
                        return Err(CompileError::InvalidInvariant(format!(
                            "INITAUTOVAR takes two arguments, got {}",
                            args.len()
                        )));
                    };
                    let auto_name = format!("auto{}_{var_name}", ctx.auto_var_owner);
                    let parameter = ctx
                        .param_bound_to(param_ident)
                        .ok_or_else(|| {
                            CompileError::BrokenReference(format!(
                                "no parameter bound to '{param_ident}' on {}",
                                ctx.call
                            ))
                        })?
                        .clone();
                    let var_type = galaxy::codegen_parameter_type(ctx.repo, &parameter)?
                        .map(|t| typeregister::remap_type(&t).to_string())
                        .unwrap_or_else(|| "int".to_string());
                    let constant = galaxy::constant_parameter_value(ctx.repo, &parameter)?;
                    if !auto.contains(&auto_name) {
                        auto.push(AutoVariable {
                            name: auto_name.clone(),
                            var_type: SmolStr::new(var_type),
                            constant: constant.clone(),
                        });
                    }
                    if constant.is_none() {
                        let value = galaxy::codegen_parameter(ctx.repo, &parameter, auto)?;
                        replacement = Some(format!("{auto_name} = {value};"));
                    } else {
                        replacement = Some(String::new());
                    }
                }
                "PARAM" => match args.as_slice() {
                    [ident] => {
                        replacement = Some(match ctx.param_bound_to(ident) {
                            // unbound parameters substitute a sentinel
                            None => "true".to_string(),
                            Some(parameter) => {
                                let parameter = parameter.clone();
                                galaxy::codegen_parameter(ctx.repo, &parameter, auto)?
                            }
                        });
                    }
                    [ident, joiner] => {
                        let bindings = ctx.params.get(ident.as_str()).cloned().unwrap_or_default();
                        let mut parts = vec![];
                        for parameter in &bindings {
                            parts.push(galaxy::codegen_parameter(ctx.repo, parameter, auto)?);
                        }
                        replacement = Some(parts.join(joiner.trim_matches('"')));
                    }
                    _ => {
                        return Err(CompileError::InvalidInvariant(format!(
                            "PARAM takes one or two arguments, got {}",
                            args.len()
                        )))
                    }
                },
                "IFHAVESUBFUNCS" => {
                    let [ident, text] = args.as_slice() else {
                        return Err(CompileError::InvalidInvariant(format!(
                            "IFHAVESUBFUNCS takes two arguments, got {}",
                            args.len()
                        )));
                    };
                    let bound = ctx.subfuncs_bound_to(ident)?;
                    replacement =
                        Some(if bound.is_empty() { String::new() } else { text.clone() });
                }
                "IFSUBFUNC" => {
                    let [condition, text] = args.as_slice() else {
                        return Err(CompileError::InvalidInvariant(format!(
                            "IFSUBFUNC takes two arguments, got {}",
                            args.len()
                        )));
                    };
                    if condition.trim() != "notfirst" {
                        return Err(CompileError::UnknownMacro(format!(
                            "IFSUBFUNC condition '{condition}'"
                        )));
                    }
                    replacement =
                        Some(if ctx.this_subfunc_order > 0 { text.clone() } else { String::new() });
                }
                "SUBFUNCS" => match args.as_slice() {
                    [ident] => {
                        if start != 0 || end != line.len() {
                            return Err(CompileError::InvalidInvariant(format!(
                                "one-argument SUBFUNCS must be the entire line: {line}"
                            )));
                        }
                        if is_if_else {
                            match block_count {
                                0 => then_insert_at = Some(auto.snapshot()),
                                1 => {
                                    if let Some(at) = then_insert_at {
                                        auto.restore(at);
                                    }
                                }
                                _ => {}
                            }
                            block_count += 1;
                        }
                        let bound = ctx.subfuncs_bound_to(ident)?.to_vec();
                        for (order, subfunction) in bound.iter().enumerate() {
                            result.extend(galaxy::codegen_function_call(
                                ctx.repo,
                                subfunction,
                                auto,
                                ";",
                                order,
                            )?);
                        }
                        line.clear();
                        emit = false;
                    }
                    [ident, joiner] => {
                        let bound = ctx.subfuncs_bound_to(ident)?.to_vec();
                        if bound.is_empty() {
                            replacement = Some("true".to_string());
                        } else {
                            let mut parts = vec![];
                            for (order, subfunction) in bound.iter().enumerate() {
                                let lines = galaxy::codegen_function_call(
                                    ctx.repo,
                                    subfunction,
                                    auto,
                                    "",
                                    order,
                                )?;
                                match lines.as_slice() {
                                    [] => {}
                                    [single] => parts.push(single.clone()),
                                    _ => {
                                        return Err(CompileError::InvalidInvariant(format!(
                                            "joined subfunction {subfunction} generated {} lines",
                                            lines.len()
                                        )))
                                    }
                                }
                            }
                            replacement = Some(parts.join(joiner.trim_matches('"')));
                        }
                    }
                    _ => {
                        return Err(CompileError::InvalidInvariant(format!(
                            "SUBFUNCS takes one or two arguments, got {}",
                            args.len()
                        )))
                    }
                },
                unknown => {
                    return Err(CompileError::UnknownMacro(unknown.to_string()));
                }
            }
            if let Some(text) = replacement {
                line.replace_range(start..end, &text);
                if line.is_empty() {
                    match name.as_str() {
                        // an emptied-out INITAUTOVAR leaves no statement
                        "INITAUTOVAR" => emit = false,
                        // an emptied-out conditional that ate its closing
                        // line vanishes entirely
                        "IFHAVESUBFUNCS" if ate_extra_line => emit = false,
                        _ => {}
                    }
                }
            }
        }
        if emit {
            // parameter substitution can splice in multi-line script code
            result.extend(line.split('\n').map(str::to_string));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> AutoVariable {
        AutoVariable { name: name.into(), var_type: SmolStr::new("int"), constant: None }
    }

    #[test]
    fn push_keeps_first_occurrence_order() {
        let mut auto = AutoVarBuilder::new("void");
        auto.push(var("auto1_a"));
        auto.push(var("auto1_b"));
        let names: Vec<&str> = auto.vars().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["auto1_a", "auto1_b"]);
    }

    #[test]
    fn restore_moves_the_insertion_point() {
        let mut auto = AutoVarBuilder::new("void");
        let at = auto.snapshot();
        auto.push(var("auto1_then1"));
        auto.push(var("auto1_then2"));
        auto.restore(at);
        auto.push(var("auto1_else1"));
        let names: Vec<&str> = auto.vars().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["auto1_else1", "auto1_then1", "auto1_then2"]);
    }

    #[test]
    fn declarations_render_constants() {
        let mut auto = AutoVarBuilder::new("int");
        auto.push(var("auto1_g"));
        auto.push(AutoVariable {
            name: "auto1_c".into(),
            var_type: SmolStr::new("string"),
            constant: Some("\"x\"".into()),
        });
        assert_eq!(
            auto.declarations(),
            vec!["    int auto1_g;", "    const string auto1_c = \"x\";"]
        );
    }
}
