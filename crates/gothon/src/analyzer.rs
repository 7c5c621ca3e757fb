//! Source analyzer: pattern scanner over a constrained Python dialect.
//!
//! Walks every `.py` file under a project root (ignoring the generated
//! `.gothon/` staging subtree) and attaches a [`Statement`] record to each
//! line that declares or touches a shared variable. Detection is regex- and
//! split-based, not a real parser: the dialect is assumed to keep one shared
//! access per simple statement, and anything the patterns cannot see passes
//! through untouched.
//!
//! Passes run in a fixed order per module (declarations, compound
//! arithmetic, queue operations, assignments/usages, mutex calls, wait
//! calls) and each appends its own statements. Where two passes match the
//! same line, the earlier statement wins at rewrite time.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::{Actions, DefaultValue, Module, Package, Statement, VarKind, Variable};

const REQUIRE_PARENS_KEY: &str = "gothon:var_usage:require_parens";
const PREFIX_KEY: &str = "gothon:var_def:prefix";
const SUFFIX_KEY: &str = "gothon:var_def:suffix";

/// Lines with these prefixes are never rewritten and never examined.
const IGNORED_LINE_PREFIXES: &[&str] = &[
    "import ", "from ", "class ", "def ", "try:", "except ", "finally:", "else:", "\"\"\"", "#",
    "@",
];

/// Control-structure heads keep their full text on the rvalue side.
const CONTROL_STRUCTURE_PREFIXES: &[&str] = &[
    "if ", "if(", "elif ", "elif(", "while ", "while(", "for ", "for(",
];

const SCALAR_TYPES: &[&str] = &["bool", "int", "float", "str", "callable"];
const QUEUE_ELEMENT_TYPES: &[&str] = &["bool", "int", "float", "str"];

/// Analyzes every module under `project_dir`.
pub fn parse(project_dir: impl AsRef<Path>) -> Result<Package> {
    let project_dir = fs::canonicalize(project_dir)?;
    let mut modules = discover_modules(&project_dir)?;

    for module in &mut modules {
        let source = fs::read_to_string(&module.absolute_path)?;
        collect_definitions(module, &source)?;
        collect_numeric_operations(module, &source);
        collect_queue_operations(module, &source);
        collect_assignments(module, &source);
        collect_mutex_calls(module, &source);
        collect_wait_calls(module, &source);
    }

    Ok(Package { modules })
}

// ── Module discovery and directives ──────────────────────────────────────────

fn discover_modules(project_dir: &Path) -> Result<Vec<Module>> {
    let mut paths = Vec::new();
    collect_python_files(project_dir, &mut paths)?;
    paths.sort();

    let mut modules = Vec::with_capacity(paths.len());
    for path in paths {
        let relative = path
            .strip_prefix(project_dir)
            .unwrap_or(&path)
            .to_path_buf();
        let name = relative
            .with_extension("")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "_");

        let mut module = Module {
            name,
            absolute_path: path,
            relative_path: relative,
            project_dir: project_dir.to_path_buf(),
            require_parens: false,
            variable_prefix: String::new(),
            variable_suffix: String::new(),
            statements: Vec::new(),
        };
        process_directives(&mut module)?;
        modules.push(module);
    }

    Ok(modules)
}

fn collect_python_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.file_name().is_some_and(|n| n == ".gothon") {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_python_files(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "py") {
            out.push(path);
        }
    }
    Ok(())
}

/// Scans the file for `# gothon:` directive comments and applies defaults:
/// prefix and suffix default to `_`, and the literal `None` means empty.
fn process_directives(module: &mut Module) -> Result<()> {
    let source = fs::read_to_string(&module.absolute_path)?;
    let module_name = module.name.clone();

    for line in source.lines() {
        if !line.starts_with("# gothon:") {
            continue;
        }

        let value = |line: &str| -> Result<String> {
            line.split_once('=')
                .map(|(_, v)| v.trim().to_string())
                .ok_or_else(|| Error::Directive {
                    module: module_name.clone(),
                    line: line.to_string(),
                    reason: "missing `=`".to_string(),
                })
        };

        if line.starts_with(&format!("# {REQUIRE_PARENS_KEY}")) {
            let raw = value(line)?;
            module.require_parens = parse_bool(&raw).ok_or_else(|| Error::Directive {
                module: module_name.clone(),
                line: line.to_string(),
                reason: format!("`{raw}` is not a boolean"),
            })?;
        } else if line.starts_with(&format!("# {PREFIX_KEY}")) {
            module.variable_prefix = value(line)?;
        } else if line.starts_with(&format!("# {SUFFIX_KEY}")) {
            module.variable_suffix = value(line)?;
        }
    }

    if module.variable_prefix.is_empty() {
        module.variable_prefix = "_".to_string();
    } else if module.variable_prefix == "None" {
        module.variable_prefix = String::new();
    }

    if module.variable_suffix.is_empty() {
        module.variable_suffix = "_".to_string();
    } else if module.variable_suffix == "None" {
        module.variable_suffix = String::new();
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "True" | "TRUE" => Some(true),
        "0" | "f" | "F" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

// ── Declarations ─────────────────────────────────────────────────────────────

fn collect_definitions(module: &mut Module, source: &str) -> Result<()> {
    let ident = Regex::new("[_A-Za-z][_A-Za-z0-9]*").expect("identifier pattern");

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();

        if should_skip_line(text) {
            continue;
        }

        let Some((before_eq, _)) = text.split_once('=') else {
            continue;
        };
        let colon_parts: Vec<&str> = before_eq.split(':').collect();
        if colon_parts.len() != 2 {
            continue;
        }

        let var_type = colon_parts[1].trim();
        if !is_supported_type(var_type) {
            continue;
        }

        let varname = colon_parts[0].trim().replacen("self.", "", 1);
        if !varname.starts_with(&module.variable_prefix) || !varname.ends_with(&module.variable_suffix)
        {
            continue;
        }

        let inner = varname
            .strip_prefix(&module.variable_prefix)
            .unwrap_or(&varname)
            .strip_suffix(&module.variable_suffix)
            .unwrap_or(&varname)
            .to_string();
        if !ident.is_match(&inner) {
            continue;
        }

        // The rewriter injects its own `node` / `node_count` definitions;
        // source declarations of those names are recorded but dropped.
        if inner == "node" || inner == "node_count" {
            module.statements.push(Statement {
                line,
                actions: Actions::DEFINE,
                original_code: raw.to_string(),
                should_skip: true,
                ..Statement::default()
            });
            continue;
        }

        if var_type == "callable"
            && !inner.starts_with("lock_")
            && !inner.starts_with("unlock_")
            && !inner.starts_with("sync_")
        {
            continue;
        }

        let tag = if var_type == "callable" {
            let bare = inner
                .strip_prefix("unlock_")
                .or_else(|| inner.strip_prefix("lock_"))
                .unwrap_or(&inner);
            format!(
                "{}mutex_{}{}",
                module.variable_prefix, bare, module.variable_suffix
            )
        } else {
            String::new()
        };

        let (lvalue, rvalue) = lr_values(raw);
        let id = format!("{}/{}", module.name, varname);
        let default = parse_default(var_type, &rvalue).map_err(|reason| Error::DefaultValue {
            variable: id.clone(),
            value: rvalue.trim().to_string(),
            reason,
        })?;

        let variable = Variable {
            id,
            kind: kind_of(var_type, &inner),
            subkind: subkind_of(var_type),
            name: varname,
            tag,
            default,
        };

        module.statements.push(Statement {
            line,
            indentation: indentation(raw),
            actions: Actions::DEFINE,
            target: Some(variable),
            original_code: raw.to_string(),
            modified_code: raw.to_string(),
            original_lvalue: lvalue,
            original_rvalue: rvalue.clone(),
            modified_rvalue: rvalue,
            ..Statement::default()
        });
    }

    Ok(())
}

fn is_supported_type(var_type: &str) -> bool {
    if SCALAR_TYPES.contains(&var_type) {
        return true;
    }
    QUEUE_ELEMENT_TYPES.iter().any(|elem| {
        var_type == format!("Queue[{elem}]") || var_type == format!("LifoQueue[{elem}]")
    })
}

fn kind_of(var_type: &str, inner_name: &str) -> VarKind {
    match var_type {
        "bool" => VarKind::Bool,
        "int" => VarKind::Int,
        "float" => VarKind::Float,
        "str" => VarKind::Str,
        "callable" => {
            if inner_name.starts_with("lock_") {
                VarKind::LockFunc
            } else if inner_name.starts_with("unlock_") {
                VarKind::UnlockFunc
            } else {
                VarKind::WaitGroup
            }
        }
        t if t.starts_with("LifoQueue") => VarKind::LifoQueue,
        _ => VarKind::Queue,
    }
}

fn subkind_of(var_type: &str) -> Option<VarKind> {
    let elem = var_type
        .strip_prefix("LifoQueue[")
        .or_else(|| var_type.strip_prefix("Queue["))?
        .strip_suffix(']')?;
    Some(kind_of(elem, ""))
}

fn parse_default(var_type: &str, rvalue: &str) -> std::result::Result<DefaultValue, String> {
    let rvalue = rvalue.trim();

    match var_type {
        "callable" => {
            // `lambda n=<token>: ...` binds the initial value; a plain lambda
            // keeps the whole expression as an opaque token.
            let value = match rvalue.split_once('=') {
                Some((_, bound)) => bound.split(':').next().unwrap_or("").trim().to_string(),
                None => rvalue.to_string(),
            };
            Ok(DefaultValue::Str(value))
        }
        "bool" => parse_bool(rvalue)
            .map(DefaultValue::Bool)
            .ok_or_else(|| format!("`{rvalue}` is not a boolean")),
        "int" => rvalue
            .parse::<i64>()
            .map(DefaultValue::Int)
            .map_err(|e| e.to_string()),
        "float" => rvalue
            .parse::<f64>()
            .map(DefaultValue::Float)
            .map_err(|e| e.to_string()),
        "str" => {
            let unquoted = rvalue
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .or_else(|| {
                    rvalue
                        .strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                })
                .unwrap_or(rvalue);
            Ok(DefaultValue::Str(unquoted.to_string()))
        }
        t if t.starts_with("LifoQueue") || t.starts_with("Queue") => {
            let capacity = rvalue
                .trim_start_matches("LifoQueue(")
                .trim_start_matches("Queue(")
                .trim_end_matches(')')
                .trim()
                .replace('_', "");
            capacity
                .parse::<i64>()
                .map(DefaultValue::Int)
                .map_err(|_| format!("`{rvalue}` is not a queue capacity"))
        }
        _ => Err("unsupported type".to_string()),
    }
}

// ── Compound arithmetic ──────────────────────────────────────────────────────

fn collect_numeric_operations(module: &mut Module, source: &str) {
    let variables = owned_variables(module);
    let operators = [
        ("+=", Actions::ADD),
        ("-=", Actions::SUB),
        ("*=", Actions::MUL),
        ("/=", Actions::DIV),
    ];

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if has_ignored_prefix(text) {
            continue;
        }

        let mut statement = blank_statement(line, raw);

        for (token, action) in operators {
            let parts: Vec<&str> = text.split(token).collect();
            if parts.len() != 2 {
                continue;
            }

            if let Some(target) = module.variable_by_name(&variable_name(parts[0])) {
                statement.actions |= action;
                statement.target = Some(target.clone());
            }
            check_for_variable_usage(&mut statement, parts[1], &variables, module.require_parens);
        }

        if !statement.actions.is_empty() {
            module.statements.push(statement);
        }
    }
}

// ── Queue operations ─────────────────────────────────────────────────────────

/// Per-queue-variable call-site patterns; `v.size(` also accepts the stdlib
/// spelling `v.qsize(`, and the receiver may be parenthesized.
fn queue_method_pattern(name: &str, method: &str) -> Regex {
    let method = if method == "size" { "(q)?size" } else { method };
    Regex::new(&format!(r"\(?{name}\)?\.{method}\(")).expect("queue method pattern")
}

fn collect_queue_operations(module: &mut Module, source: &str) {
    let queues: Vec<Variable> = owned_variables(module)
        .into_iter()
        .filter(|v| v.kind.is_queue())
        .collect();
    if queues.is_empty() {
        return;
    }

    let patterns: Vec<(usize, [Regex; 5])> = queues
        .iter()
        .enumerate()
        .map(|(i, v)| {
            (
                i,
                [
                    queue_method_pattern(&v.name, "size"),
                    queue_method_pattern(&v.name, "empty"),
                    queue_method_pattern(&v.name, "full"),
                    queue_method_pattern(&v.name, "put"),
                    queue_method_pattern(&v.name, "get"),
                ],
            )
        })
        .collect();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if has_ignored_prefix(text) {
            continue;
        }

        let mut statement = blank_statement(line, raw);

        for (i, [size, empty, full, put, get]) in &patterns {
            let variable = &queues[*i];
            let mut used = false;

            if size.is_match(text) {
                statement.actions |= Actions::QUEUE_SIZE;
                used = true;
            }
            if empty.is_match(text) {
                statement.actions |= Actions::QUEUE_EMPTY;
                used = true;
            }
            if full.is_match(text) {
                statement.actions |= Actions::QUEUE_FULL;
                used = true;
            }
            if put.is_match(text) {
                statement.actions |= Actions::QUEUE_PUT;
                statement.target = Some(variable.clone());
            }
            if get.is_match(text) {
                statement.actions |= Actions::QUEUE_GET;
                statement.target = Some(variable.clone());
            }

            if used {
                statement.used.push(variable.clone());
            }
        }

        if !statement.actions.is_empty() {
            module.statements.push(statement);
        }
    }
}

// ── Assignments and usages ───────────────────────────────────────────────────

fn collect_assignments(module: &mut Module, source: &str) {
    let variables = owned_variables(module);

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if has_ignored_prefix(text) {
            continue;
        }

        let mut statement = blank_statement(line, raw);

        let parts: Vec<&str> = text.split('=').collect();
        if parts.len() == 2 {
            if let Some(target) = module.variable_by_name(&variable_name(parts[0])) {
                statement.actions |= Actions::ASSIGN;
                statement.target = Some(target.clone());
            }

            // A line an earlier pass already claimed (declaration, compound
            // op, queue op) keeps that pass's usage bookkeeping.
            if module.statement_at(line).is_none() {
                check_for_variable_usage(&mut statement, parts[1], &variables, module.require_parens);
            }
        } else {
            check_for_variable_usage(&mut statement, text, &variables, module.require_parens);
        }

        if !statement.actions.is_empty() {
            module.statements.push(statement);
        }
    }
}

/// Marks scalar shared variables read by `expression`. Lock, unlock,
/// wait-group and queue variables never count as expression usages.
fn check_for_variable_usage(
    statement: &mut Statement,
    expression: &str,
    variables: &[Variable],
    require_parens: bool,
) {
    let expression = expression.trim();

    for variable in variables {
        if !matches!(
            variable.kind,
            VarKind::Bool | VarKind::Int | VarKind::Float | VarKind::Str
        ) {
            continue;
        }

        let found = if require_parens {
            expression.contains(&format!("({})", variable.name))
        } else {
            dotted_name_pattern(&variable.name).is_match(expression)
        };

        if found && !statement.used.iter().any(|v| v.id == variable.id) {
            statement.actions |= Actions::USE;
            statement.used.push(variable.clone());
        }
    }
}

// ── Mutex and wait calls ─────────────────────────────────────────────────────

fn collect_mutex_calls(module: &mut Module, source: &str) {
    let callables: Vec<Variable> = owned_variables(module)
        .into_iter()
        .filter(|v| matches!(v.kind, VarKind::LockFunc | VarKind::UnlockFunc))
        .collect();
    if callables.is_empty() {
        return;
    }

    let patterns: Vec<Regex> = callables
        .iter()
        .map(|v| whole_line_call_pattern(&v.name))
        .collect();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if has_ignored_prefix(text) {
            continue;
        }

        let mut statement = blank_statement(line, raw);

        for (variable, pattern) in callables.iter().zip(&patterns) {
            if pattern.is_match(text) {
                statement.actions = if variable.kind == VarKind::LockFunc {
                    Actions::LOCK
                } else {
                    Actions::UNLOCK
                };
                statement.target = Some(variable.clone());
                break;
            }
        }

        if !statement.actions.is_empty() {
            module.statements.push(statement);
        }
    }
}

fn collect_wait_calls(module: &mut Module, source: &str) {
    let groups: Vec<Variable> = owned_variables(module)
        .into_iter()
        .filter(|v| v.kind == VarKind::WaitGroup)
        .collect();
    if groups.is_empty() {
        return;
    }

    let patterns: Vec<Regex> = groups
        .iter()
        .map(|v| line_start_call_pattern(&v.name))
        .collect();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if has_ignored_prefix(text) {
            continue;
        }

        let mut statement = blank_statement(line, raw);

        for (variable, pattern) in groups.iter().zip(&patterns) {
            if pattern.is_match(text) {
                statement.actions = Actions::WAIT;
                statement.target = Some(variable.clone());
                break;
            }
        }

        if !statement.actions.is_empty() {
            module.statements.push(statement);
        }
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

fn owned_variables(module: &Module) -> Vec<Variable> {
    module.variables().into_iter().cloned().collect()
}

fn blank_statement(line: usize, raw: &str) -> Statement {
    let (lvalue, rvalue) = lr_values(raw);
    Statement {
        line,
        indentation: indentation(raw),
        original_code: raw.to_string(),
        modified_code: raw.to_string(),
        original_lvalue: lvalue,
        original_rvalue: rvalue.clone(),
        modified_rvalue: rvalue,
        ..Statement::default()
    }
}

fn should_skip_line(text: &str) -> bool {
    text.is_empty() || has_ignored_prefix(text)
}

fn has_ignored_prefix(text: &str) -> bool {
    IGNORED_LINE_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// Matches `name`, optionally behind a dotted receiver (`self.name`).
pub(crate) fn dotted_name_pattern(name: &str) -> Regex {
    Regex::new(&format!(r"([_A-Za-z][_A-Za-z0-9]*\.)?({name})")).expect("dotted name pattern")
}

/// Matches a line that is exactly `name()` behind an optional receiver.
fn whole_line_call_pattern(name: &str) -> Regex {
    Regex::new(&format!(r"^([_A-Za-z][_A-Za-z0-9]*\.)?({name}\(\))$")).expect("call pattern")
}

/// Matches a line beginning with `name(` behind an optional receiver.
fn line_start_call_pattern(name: &str) -> Regex {
    Regex::new(&format!(r"^([_A-Za-z][_A-Za-z0-9]*\.)?({name}\()")).expect("call-start pattern")
}

/// Splits a line around its top-level `=`, if any.
///
/// Control-structure lines and lines whose first `(` precedes the first `=`
/// are not assignments: the whole (trimmed) line lands on the rvalue side.
/// Compound operators leave their symbol at the end of the lvalue, so
/// `lvalue + "=" + rvalue` reconstructs the original operator.
pub(crate) fn lr_values(code: &str) -> (String, String) {
    let code = code.trim();

    if should_skip_line(code) {
        return (String::new(), String::new());
    }

    for prefix in CONTROL_STRUCTURE_PREFIXES {
        if code.starts_with(prefix) {
            return (String::new(), code.to_string());
        }
    }

    for c in code.chars() {
        if c == '(' {
            return (String::new(), code.to_string());
        }
        if c == '=' {
            break;
        }
    }

    match code.split_once('=') {
        Some((left, right)) => (left.to_string(), right.to_string()),
        None => (String::new(), code.to_string()),
    }
}

/// Leading run of spaces or tabs (whichever the line starts with).
pub(crate) fn indentation(code: &str) -> String {
    if code.trim().is_empty() {
        return String::new();
    }
    let fill = match code.chars().next() {
        Some(' ') => ' ',
        Some('\t') => '\t',
        _ => return String::new(),
    };
    code.chars().take_while(|&c| c == fill).collect()
}

/// Bare variable name from an lvalue: trims and keeps the last dotted part.
fn variable_name(raw: &str) -> String {
    raw.trim().rsplit('.').next().unwrap_or("").to_string()
}
