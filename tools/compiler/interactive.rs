// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 The interactive trigger console.

 Elements are navigated like directories: a path component matches a child's
 display name (case-insensitive), a `Kind` + 8-hex id, or a (possibly
 negative) child index. Core errors are printed, never fatal.
*/

use std::io::{self, BufRead, Write};
use std::path::Path;

use autotrigger_compiler::builtin_macros::AutoVarBuilder;
use autotrigger_compiler::element_tree::{ElementKind, ElementRc, Repository, TriggerLib};
use autotrigger_compiler::generator::galaxy;
use autotrigger_compiler::{
    edits, generator, lexer, serializer, CompileError, CompilerConfiguration, Result,
};

const PROMPT_COLOR: &str = "\x1b[95m";
const RESET_COLOR: &str = "\x1b[0m";

fn print_help() {
    println!("cd - change directory");
    println!("ls - print current object info");
    println!("gen - generate the galaxy code for the element");
    println!("xml - display the xml lines for the element");
    println!("add - add a function def or function call as a child to the current element");
    println!("write - write the .galaxy, .xml, and trigger strings to a specified directory");
    println!("help");
    println!("exit");
}

fn element_name(lib: &TriggerLib, element: &ElementRc) -> String {
    let mut name = lib.id_to_string(&element.id, element.kind, "Unnamed");
    if element.kind == ElementKind::Category {
        name.push('/');
    }
    name
}

fn element_abspath(lib: &TriggerLib, element: &ElementRc) -> String {
    let mut parts: Vec<String> = vec![];
    let mut current = element.clone();
    while current.kind != ElementKind::Root {
        parts.push(lib.id_to_string(&current.id, current.kind, &current.to_string()));
        match lib.parent_of(&current) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    parts.reverse();
    format!("/{}", parts.join("/"))
}

fn path_to_element(
    lib: &TriggerLib,
    start: &ElementRc,
    path: &str,
) -> std::result::Result<ElementRc, String> {
    if path.is_empty() {
        return Err("No path provided".into());
    }
    let mut current = start.clone();
    let mut rest = path;
    if let Some(stripped) = path.strip_prefix('/') {
        current = lib.root().map_err(|e| e.to_string())?;
        rest = stripped;
    }
    for part in rest.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            if let Some(parent) = lib.parent_of(&current) {
                current = parent;
            }
            continue;
        }
        if part.len() > 8 {
            let (kind_text, id) = part.split_at(part.len() - 8);
            let id = id.to_ascii_uppercase();
            if lexer::is_element_id(&id) {
                if let Ok(kind) = kind_text.parse::<ElementKind>() {
                    if let Some(found) = lib.get(&id, kind) {
                        current = found.clone();
                        continue;
                    }
                }
            }
        }
        if let Some(by_name) = lib
            .children_of(&current)
            .iter()
            .find(|c| lib.id_to_string(&c.id, c.kind, "").eq_ignore_ascii_case(part))
        {
            current = by_name.clone();
            continue;
        }
        if let Ok(index) = part.parse::<isize>() {
            let children = lib.children_of(&current);
            let len = children.len() as isize;
            let resolved = if index < 0 { index + len } else { index };
            if resolved < 0 || resolved >= len {
                return Err(format!(
                    "index {index} is out of bounds for {} ({len} children)",
                    element_abspath(lib, &current)
                ));
            }
            current = children[resolved as usize].clone();
            continue;
        }
        return Err(format!(
            "Unknown name \"{part}\" in directory {}",
            element_abspath(lib, &current)
        ));
    }
    Ok(current)
}

fn print_generated(repo: &Repository, lib: &TriggerLib, element: &ElementRc) {
    let outcome: Result<()> = (|| {
        match element.kind {
            ElementKind::Trigger => {
                println!("{}", galaxy::codegen_trigger(repo, lib, element)?);
            }
            ElementKind::FunctionDef => {
                println!("{}", galaxy::codegen_function_def(repo, lib, element)?);
            }
            ElementKind::FunctionCall => {
                let mut auto = AutoVarBuilder::new("void");
                let lines = galaxy::codegen_function_call(repo, element, &mut auto, "", 0)?;
                let (_, indented) = lexer::indent_lines(&lines, 0);
                for line in indented {
                    println!("{line}");
                }
            }
            ElementKind::Variable => {
                for line in galaxy::codegen_variable_init(repo, element)? {
                    println!("{line}");
                }
            }
            ElementKind::Param => {
                let mut auto = AutoVarBuilder::new("void");
                println!("{}", galaxy::codegen_parameter(repo, element, &mut auto)?);
            }
            ElementKind::PresetValue => {
                println!("{}", galaxy::preset_value_name(lib, element)?);
            }
            ElementKind::Comment => {
                let contents = element.multiline_value("Comment")?.unwrap_or_default();
                if contents.is_empty() {
                    println!("--");
                }
                for line in contents {
                    println!("-- {line}");
                }
            }
            _ => println!("[{}] ({element})", element_name(lib, element)),
        }
        Ok(())
    })();
    if let Err(error) = outcome {
        println!("{error}");
    }
}

fn resolve_or_current(
    lib: &TriggerLib,
    current: &ElementRc,
    args: &[&str],
) -> std::result::Result<ElementRc, String> {
    match args.first() {
        Some(path) => path_to_element(lib, current, path),
        None => Ok(current.clone()),
    }
}

fn cmd_ls(repo: &Repository, lib: &TriggerLib, current: &ElementRc, args: &[&str]) {
    let mut args: Vec<&str> = args.to_vec();
    let gen_print = if let Some(at) = args.iter().position(|a| *a == "-g") {
        args.remove(at);
        true
    } else {
        false
    };
    if args.len() > 1 {
        println!("ls takes up to 1 argument, {} given", args.len());
        return;
    }
    let target = match resolve_or_current(lib, current, &args) {
        Ok(element) => element,
        Err(message) => {
            println!("{message}");
            return;
        }
    };
    println!("Contents of {} ({target})", element_name(lib, &target));
    if gen_print {
        for (index, child) in lib.children_of(&target).to_vec().iter().enumerate() {
            print!("{index} ");
            print_generated(repo, lib, child);
        }
        return;
    }
    let children: Vec<(String, ElementRc)> =
        lib.children_of(&target).iter().map(|c| (element_name(lib, c), c.clone())).collect();
    let width = children.iter().map(|(name, _)| name.len()).max().unwrap_or(1) + 2;
    if let Some(parent) = lib.parent_of(&target) {
        println!(".. {:width$} ({parent})", "");
    }
    for (index, (name, child)) in children.iter().enumerate() {
        println!("{index:>2} {name:<width$} ({child})");
    }
}

fn cmd_xml(lib: &TriggerLib, current: &ElementRc, args: &[&str]) {
    let target = match resolve_or_current(lib, current, args) {
        Ok(element) => element,
        Err(message) => {
            println!("{message}");
            return;
        }
    };
    println!("{}", element_name(lib, &target));
    let (_, indented) = lexer::indent_lines(&target.lines.borrow(), 0);
    for line in indented {
        println!("{line}");
    }
}

fn parse_index(text: &str) -> Result<isize> {
    text.parse().map_err(|_| CompileError::BadArgument(format!("invalid index '{text}'")))
}

fn cmd_add(repo: &mut Repository, lib_tag: &str, current: &ElementRc, args: &[&str]) {
    const USAGE: &str = "Implemented operations are: unlock_fn(index, name), \
                         upgrade(index, upgrade_name), unit(index, tech_tree_name, lock)";
    let Some(operation) = args.first() else {
        println!("Must specify a function type to add");
        println!("{USAGE}");
        return;
    };
    let outcome: Result<()> = (|| {
        let lib = repo.lib_mut(lib_tag)?;
        match (*operation, &args[1..]) {
            ("unlock_fn", [index, name]) => {
                edits::add_function_def(lib, current, parse_index(index)?, name)
            }
            ("upgrade", [index, upgrade_name]) => {
                edits::add_upgrade_call(lib, current, parse_index(index)?, upgrade_name)
            }
            ("unit", [index, tech_tree_name, lock]) => edits::add_unit_allow_call(
                lib,
                current,
                parse_index(index)?,
                tech_tree_name,
                edits::parse_bool(lock)?,
            ),
            ("unlock_fn" | "upgrade" | "unit", rest) => Err(CompileError::BadArgument(format!(
                "wrong number of args specified for {operation}: got {}",
                rest.len()
            ))),
            _ => {
                println!("Unrecognized add operation \"{operation}\"");
                println!("{USAGE}");
                Ok(())
            }
        }
    })();
    if let Err(error) = outcome {
        println!("{error}");
    }
}

fn cmd_write(repo: &mut Repository, lib_tag: &str, args: &[&str]) {
    let target = args.first().copied().unwrap_or("out");
    let outcome: Result<()> = (|| {
        repo.lib_mut(lib_tag)?.sort()?;
        let dir = Path::new(target);
        std::fs::create_dir_all(dir).map_err(|e| CompileError::file(dir, e))?;
        let repo_ref: &Repository = repo;
        let lib = repo_ref.lib(lib_tag)?;
        let galaxy_path = dir.join("lib.galaxy");
        let mut galaxy_file =
            std::fs::File::create(&galaxy_path).map_err(|e| CompileError::file(&galaxy_path, e))?;
        generator::generate(repo_ref, lib, &mut galaxy_file)?;
        let header_path = dir.join("lib_h.galaxy");
        let mut header_file =
            std::fs::File::create(&header_path).map_err(|e| CompileError::file(&header_path, e))?;
        generator::generate_header(repo_ref, lib, &mut header_file)?;
        serializer::write_triggers(lib, &dir.join("Triggers.xml"))?;
        serializer::write_trigger_strings(lib, &dir.join("TriggerStrings.txt"))?;
        Ok(())
    })();
    match outcome {
        Ok(()) => println!("Generated files to {target}/"),
        Err(error) => println!("{error}"),
    }
}

pub fn run(repo: &mut Repository, config: &CompilerConfiguration) -> Result<()> {
    let Some(mod_name) = config.mods.first() else {
        return Err(CompileError::BadArgument(
            "no project libraries configured; nothing to browse".into(),
        ));
    };
    let lib_tag = repo.lib_by_name(mod_name)?.library.clone();
    let mut current: ElementRc = repo.lib(&lib_tag)?.root()?;
    println!("Started interactive trigger console");
    let stdin = io::stdin();
    loop {
        {
            let lib = repo.lib(&lib_tag)?;
            print!("{PROMPT_COLOR}{}{RESET_COLOR} $ ", element_abspath(lib, &current));
            io::stdout().flush().ok();
        }
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(command) = words.first() else { continue };
        match *command {
            "help" => print_help(),
            "exit" => break,
            "ls" => {
                let repo_ref: &Repository = repo;
                let lib = repo_ref.lib(&lib_tag)?;
                cmd_ls(repo_ref, lib, &current, &words[1..]);
            }
            "cd" => {
                let Some(path) = words.get(1) else {
                    println!("cd takes an argument");
                    continue;
                };
                let lib = repo.lib(&lib_tag)?;
                match path_to_element(lib, &current, path) {
                    Ok(element) => current = element,
                    Err(message) => println!("{message}"),
                }
            }
            "xml" => {
                let lib = repo.lib(&lib_tag)?;
                cmd_xml(lib, &current, &words[1..]);
            }
            "gen" => {
                let repo_ref: &Repository = repo;
                let lib = repo_ref.lib(&lib_tag)?;
                match resolve_or_current(lib, &current, &words[1..]) {
                    Ok(element) => print_generated(repo_ref, lib, &element),
                    Err(message) => println!("{message}"),
                }
            }
            "add" => cmd_add(repo, &lib_tag, &current, &words[1..]),
            "write" => cmd_write(repo, &lib_tag, &words[1..]),
            other => println!("Unknown command: {other}"),
        }
    }
    Ok(())
}
