//! Rewriter: turns analyzed statements into helper calls and emits the
//! per-worker shim module and staged source trees.
//!
//! Three steps, mirroring the session pipeline:
//! 1. [`rewrite`] fills every statement's `modified_rvalue`/`modified_code`
//!    and assembles the shared [`ShimModule`] (socket objects, address
//!    strings, helper functions, setup block) with `{{gothon_dir}}` and
//!    `{{node_id}}` placeholders left in place;
//! 2. [`inject`] specializes the shim per worker, drops it into every
//!    directory of each staged tree (so `from _gothon_ import *` resolves
//!    from any submodule), and writes the rewritten module files with the
//!    injected `node` / `node_count` constants.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use crate::analyzer::dotted_name_pattern;
use crate::error::{Error, Result};
use crate::shim;
use crate::types::{Actions, Module, Package, Statement, VarKind, Variable};

/// The generated worker shim, before per-worker placeholder substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct ShimModule(String);

impl ShimModule {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShimModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rewrites every matched statement in place and builds the shim module.
pub fn rewrite(pkg: &mut Package) -> Result<ShimModule> {
    for module in &mut pkg.modules {
        let module_name = module.name.clone();
        for statement in &mut module.statements {
            rewrite_statement(statement, &module_name)?;
        }
    }
    build_shim(pkg)
}

// ── Statement rewriting ──────────────────────────────────────────────────────

fn get_call(variable: &Variable) -> String {
    format!("gothon_{}_get()", variable.translated_id())
}

fn wrap_call(variable: &Variable, op: &str, arg: &str) -> String {
    format!("gothon_{}_{}({})", variable.translated_id(), op, arg.trim())
}

/// Substitutes every usage of `variable` in `text` with its `_get()` call.
fn substitute_usage(text: &str, variable: &Variable) -> String {
    let pattern = dotted_name_pattern(&variable.name);
    pattern
        .replace_all(text, get_call(variable).as_str())
        .trim()
        .to_string()
}

/// Replaces a queue method call site (`q.put(`, `q.get(`, `q.size(`,
/// `q.qsize(`, `q.empty(`, `q.full(`) with the opening of the matching
/// helper call; the original argument list and closing paren are kept.
fn substitute_queue_call(text: &str, variable: &Variable, method: &str, helper_op: &str) -> String {
    let method = if method == "size" { "(q)?size" } else { method };
    let pattern = regex::Regex::new(&format!(r"\(?{}\)?\.{}\(", variable.name, method))
        .expect("queue call pattern");
    let opening = format!("gothon_{}_{}(", variable.translated_id(), helper_op);
    pattern.replace_all(text, opening.as_str()).to_string()
}

fn compose(statement: &Statement) -> String {
    if statement.original_lvalue.is_empty() {
        format!("{}{}", statement.indentation, statement.modified_rvalue.trim())
    } else {
        format!(
            "{}{}= {}",
            statement.indentation,
            statement.original_lvalue,
            statement.modified_rvalue.trim()
        )
    }
}

fn target<'a>(statement: &'a Statement, module: &str) -> Result<&'a Variable> {
    statement.target.as_ref().ok_or_else(|| Error::Rewrite {
        module: module.to_string(),
        line: statement.line,
        code: statement.original_code.clone(),
    })
}

fn rewrite_statement(statement: &mut Statement, module: &str) -> Result<()> {
    if statement.actions.contains(Actions::DEFINE) || statement.should_skip {
        return Ok(());
    }

    if statement.actions.contains(Actions::ASSIGN) {
        let mut rvalue = statement.original_rvalue.clone();
        for used in &statement.used {
            rvalue = substitute_usage(&rvalue, used);
        }
        let variable = target(statement, module)?;
        statement.modified_rvalue = wrap_call(variable, "set", &rvalue);
        statement.modified_code = compose(statement);
        return Ok(());
    }

    if statement.actions.intersects(Actions::LOCK | Actions::UNLOCK) {
        let variable = target(statement, module)?;
        statement.modified_rvalue = format!("gothon_{}()", variable.translated_id());
        statement.modified_code =
            format!("{}{}", statement.indentation, statement.modified_rvalue);
        return Ok(());
    }

    if statement.actions.contains(Actions::WAIT) {
        let variable = target(statement, module)?;
        let count = wait_argument(&statement.original_rvalue).ok_or_else(|| Error::Rewrite {
            module: module.to_string(),
            line: statement.line,
            code: statement.original_code.clone(),
        })?;
        statement.modified_rvalue =
            format!("gothon_{}({})", variable.translated_id(), count);
        statement.modified_code =
            format!("{}{}", statement.indentation, statement.modified_rvalue);
        return Ok(());
    }

    if statement.actions.contains(Actions::USE) {
        let used = statement.used.clone();
        for variable in &used {
            statement.modified_rvalue = substitute_usage(&statement.modified_rvalue, variable);
        }
        if statement.actions == Actions::USE && statement.original_lvalue.is_empty() {
            statement.modified_code =
                format!("{}{}", statement.indentation, statement.modified_rvalue);
            return Ok(());
        }
    }

    if statement.actions.contains(Actions::ADD) {
        let variable = target(statement, module)?;
        statement.modified_rvalue = wrap_call(variable, "add", &statement.modified_rvalue);
    }

    if statement.actions.contains(Actions::SUB) {
        let variable = target(statement, module)?.clone();
        statement.modified_rvalue = wrap_call(&variable, "sub", &statement.modified_rvalue);

        // Python has no `-=` on str; the call already performs the trailing
        // removal, so the line degrades to a plain assignment.
        if variable.kind == VarKind::Str {
            statement.modified_code = compose(statement).replacen("-=", "=", 1);
            return Ok(());
        }
    }

    if statement.actions.contains(Actions::MUL) {
        let variable = target(statement, module)?;
        statement.modified_rvalue = wrap_call(variable, "mul", &statement.modified_rvalue);
    }

    if statement.actions.contains(Actions::DIV) {
        let variable = target(statement, module)?;
        statement.modified_rvalue = wrap_call(variable, "div", &statement.modified_rvalue);
    }

    let interrogations = [
        (Actions::QUEUE_SIZE, "size", "size"),
        (Actions::QUEUE_EMPTY, "empty", "empty"),
        (Actions::QUEUE_FULL, "full", "full"),
    ];
    for (action, method, helper) in interrogations {
        if !statement.actions.contains(action) {
            continue;
        }
        let used = statement.used.clone();
        for variable in used.iter().filter(|v| v.kind.is_queue()) {
            statement.modified_rvalue =
                substitute_queue_call(&statement.modified_rvalue, variable, method, helper);
        }
        if statement.actions == action {
            statement.modified_code = compose(statement);
            return Ok(());
        }
    }

    if statement.actions.contains(Actions::QUEUE_PUT) {
        let variable = target(statement, module)?.clone();
        statement.modified_rvalue =
            substitute_queue_call(&statement.modified_rvalue, &variable, "put", "set");
    }

    if statement.actions == Actions::QUEUE_GET {
        let variable = target(statement, module)?.clone();
        statement.modified_rvalue =
            substitute_queue_call(&statement.modified_rvalue, &variable, "get", "get");
    }

    if statement.modified_rvalue == statement.original_rvalue {
        return Err(Error::Rewrite {
            module: module.to_string(),
            line: statement.line,
            code: statement.original_code.clone(),
        });
    }

    statement.modified_code = compose(statement);
    Ok(())
}

/// Extracts the integer argument of a wait call; empty parens mean 0.
fn wait_argument(rvalue: &str) -> Option<String> {
    let open = rvalue.find('(')?;
    let close = rvalue.rfind(')')?;
    if close <= open {
        return None;
    }
    let arg = rvalue[open + 1..close].trim();
    if arg.is_empty() {
        return Some("0".to_string());
    }
    arg.chars().all(|c| c.is_ascii_digit()).then(|| arg.to_string())
}

// ── Shim assembly ────────────────────────────────────────────────────────────

fn build_shim(pkg: &Package) -> Result<ShimModule> {
    let mut socks = BTreeMap::new();
    let mut addrs = BTreeMap::new();
    let mut funcs = BTreeMap::new();
    let mut init = BTreeMap::new();

    for module in &pkg.modules {
        for statement in &module.statements {
            if statement.should_skip {
                continue;
            }
            socket_definitions(&mut socks, statement);
            address_definitions(&mut addrs, statement);
            function_definitions(&mut funcs, statement)?;
            socket_init(&mut init, statement);
        }
    }

    if socks.len() != addrs.len() {
        return Err(Error::Shim(format!(
            "{} sockets vs {} addresses",
            socks.len(),
            addrs.len()
        )));
    }

    let mut out = String::new();
    out.push_str("import struct\nimport sys\nimport socket\n\n");
    for def in socks.values() {
        out.push_str(def);
        out.push('\n');
    }
    out.push('\n');
    for def in addrs.values() {
        out.push_str(def);
        out.push('\n');
    }
    out.push('\n');
    for def in funcs.values() {
        out.push_str(def);
        out.push_str("\n\n");
    }
    out.push('\n');
    if !init.is_empty() {
        out.push_str("try:");
        for block in init.values() {
            out.push_str(block);
        }
        out.push_str("\nexcept socket.error as msg:\n    print(msg, file=sys.stderr)\n    sys.exit(1)\n");
    }

    Ok(ShimModule(out))
}

fn is_plain_endpoint_kind(kind: VarKind) -> bool {
    matches!(
        kind,
        VarKind::LockFunc | VarKind::UnlockFunc | VarKind::WaitGroup
    )
}

fn add_socket_pair(defs: &mut BTreeMap<String, String>, tid: &str, op: Option<&str>) {
    let stem = match op {
        Some(op) => format!("_sock_{tid}_{op}"),
        None => format!("_sock_{tid}"),
    };
    for dir in ["in", "out"] {
        let name = format!("{stem}_{dir}");
        let def = format!("{name} = socket.socket(socket.AF_UNIX, socket.SOCK_DGRAM)");
        defs.insert(name, def);
    }
}

fn socket_definitions(defs: &mut BTreeMap<String, String>, s: &Statement) {
    if s.actions.intersects(Actions::DEFINE | Actions::ASSIGN) {
        if let Some(v) = &s.target {
            if is_plain_endpoint_kind(v.kind) {
                add_socket_pair(defs, &v.translated_id(), None);
            } else {
                add_socket_pair(defs, &v.translated_id(), Some("set"));
            }
        }
    }

    if s.actions.contains(Actions::USE) {
        for v in &s.used {
            add_socket_pair(defs, &v.translated_id(), Some("get"));
        }
    }

    let arithmetic = [
        (Actions::ADD, "add"),
        (Actions::SUB, "sub"),
        (Actions::MUL, "mul"),
        (Actions::DIV, "div"),
    ];
    for (action, op) in arithmetic {
        if s.actions.contains(action) {
            if let Some(v) = &s.target {
                add_socket_pair(defs, &v.translated_id(), Some(op));
            }
        }
    }

    let interrogations = [
        (Actions::QUEUE_SIZE, "size"),
        (Actions::QUEUE_EMPTY, "empty"),
        (Actions::QUEUE_FULL, "full"),
    ];
    for (action, op) in interrogations {
        if s.actions.contains(action) {
            for v in s.used.iter().filter(|v| v.kind.is_queue()) {
                add_socket_pair(defs, &v.translated_id(), Some(op));
            }
        }
    }

    if s.actions.contains(Actions::QUEUE_PUT) {
        if let Some(v) = &s.target {
            add_socket_pair(defs, &v.translated_id(), Some("set"));
        }
    }

    if s.actions == Actions::QUEUE_GET {
        if let Some(v) = &s.target {
            let tid = v.translated_id();
            add_socket_pair(defs, &tid, Some("get"));
            let name = format!("_sock_{tid}_get_ok");
            let def = format!("{name} = socket.socket(socket.AF_UNIX, socket.SOCK_DGRAM)");
            defs.insert(name, def);
        }
    }
}

fn add_address_pair(defs: &mut BTreeMap<String, String>, v: &Variable, op: Option<&str>) {
    let tid = v.translated_id();
    match op {
        Some(op) => {
            for dir in ["in", "out"] {
                let name = format!("_addr_{tid}_{op}_{dir}");
                let def = format!(
                    "{name} = '{{{{gothon_dir}}}}/sock/{{{{node_id}}}}/{}/{op}_{dir}'",
                    v.id
                );
                defs.insert(name, def);
            }
        }
        None => {
            // Mutex and wait-group endpoints flatten to `<id>_<dir>`.
            for dir in ["in", "out"] {
                let name = format!("_addr_{tid}_{dir}");
                let def = format!(
                    "{name} = '{{{{gothon_dir}}}}/sock/{{{{node_id}}}}/{}_{dir}'",
                    v.id
                );
                defs.insert(name, def);
            }
        }
    }
}

fn address_definitions(defs: &mut BTreeMap<String, String>, s: &Statement) {
    if s
        .actions
        .intersects(Actions::DEFINE | Actions::ASSIGN | Actions::QUEUE_PUT)
    {
        if let Some(v) = &s.target {
            if is_plain_endpoint_kind(v.kind) {
                add_address_pair(defs, v, None);
            } else {
                add_address_pair(defs, v, Some("set"));
            }
        }
    }

    if s.actions.contains(Actions::USE) {
        for v in &s.used {
            add_address_pair(defs, v, Some("get"));
        }
    }

    let arithmetic = [
        (Actions::ADD, "add"),
        (Actions::SUB, "sub"),
        (Actions::MUL, "mul"),
        (Actions::DIV, "div"),
    ];
    for (action, op) in arithmetic {
        if s.actions.contains(action) {
            if let Some(v) = &s.target {
                add_address_pair(defs, v, Some(op));
            }
        }
    }

    let interrogations = [
        (Actions::QUEUE_SIZE, "size"),
        (Actions::QUEUE_EMPTY, "empty"),
        (Actions::QUEUE_FULL, "full"),
    ];
    for (action, op) in interrogations {
        if s.actions.contains(action) {
            for v in s.used.iter().filter(|v| v.kind.is_queue()) {
                add_address_pair(defs, v, Some(op));
            }
        }
    }

    if s.actions == Actions::QUEUE_GET {
        if let Some(v) = &s.target {
            add_address_pair(defs, v, Some("get"));
            let tid = v.translated_id();
            let name = format!("_addr_{tid}_get_ok");
            let def = format!(
                "{name} = '{{{{gothon_dir}}}}/sock/{{{{node_id}}}}/{}/get_ok'",
                v.id
            );
            defs.insert(name, def);
        }
    }
}

/// Template key and helper name for one (variable, operation) helper.
fn helper_entry(v: &Variable, op: &str) -> Result<(String, String)> {
    let tid = v.translated_id();
    let (name, key) = match v.kind {
        VarKind::LockFunc | VarKind::UnlockFunc => (format!("gothon_{tid}"), "mutex".to_string()),
        VarKind::WaitGroup => (format!("gothon_{tid}"), "sync".to_string()),
        VarKind::Queue | VarKind::LifoQueue => match op {
            "set" | "get" => {
                let elem = v.subkind.unwrap_or(VarKind::Int).as_str();
                (format!("gothon_{tid}_{op}"), format!("{elem}_queue_{op}"))
            }
            _ => (format!("gothon_{tid}_{op}"), format!("queue_{op}")),
        },
        _ => (format!("gothon_{tid}_{op}"), format!("{}_{op}", v.kind.as_str())),
    };

    let template = shim::template(&key)
        .ok_or_else(|| Error::Shim(format!("no helper template for `{key}`")))?;
    Ok((name, shim::fill(template, &tid, op)))
}

fn function_definitions(funcs: &mut BTreeMap<String, String>, s: &Statement) -> Result<()> {
    let mut push = |v: &Variable, op: &str| -> Result<()> {
        let (name, def) = helper_entry(v, op)?;
        funcs.insert(name, def);
        Ok(())
    };

    if s
        .actions
        .intersects(Actions::DEFINE | Actions::ASSIGN | Actions::QUEUE_PUT)
    {
        if let Some(v) = &s.target {
            push(v, "set")?;
        }
    }

    if s
        .actions
        .intersects(Actions::LOCK | Actions::UNLOCK | Actions::WAIT)
    {
        if let Some(v) = &s.target {
            push(v, "set")?; // key resolves to "mutex"/"sync" by kind
        }
    }

    if s.actions.contains(Actions::USE) {
        for v in &s.used {
            push(v, "get")?;
        }
    }

    let arithmetic = [
        (Actions::ADD, "add"),
        (Actions::SUB, "sub"),
        (Actions::MUL, "mul"),
        (Actions::DIV, "div"),
    ];
    for (action, op) in arithmetic {
        if s.actions.contains(action) {
            if let Some(v) = &s.target {
                push(v, op)?;
            }
        }
    }

    let interrogations = [
        (Actions::QUEUE_SIZE, "size"),
        (Actions::QUEUE_EMPTY, "empty"),
        (Actions::QUEUE_FULL, "full"),
    ];
    for (action, op) in interrogations {
        if s.actions.contains(action) {
            for v in s.used.iter().filter(|v| v.kind.is_queue()) {
                push(v, op)?;
            }
        }
    }

    if s.actions == Actions::QUEUE_GET {
        if let Some(v) = &s.target {
            push(v, "get")?;
        }
    }

    Ok(())
}

fn init_entry(init: &mut BTreeMap<String, String>, v: &Variable, op: &str) {
    let tid = v.translated_id();
    match op {
        "plain" => {
            init.insert(tid.clone(), shim::fill(shim::SOCKET_INIT_PLAIN, &tid, ""));
        }
        "queue_get_ok" => {
            init.insert(
                format!("{tid}_ok"),
                shim::fill(shim::SOCKET_INIT_QUEUE_GET_OK, &tid, ""),
            );
        }
        _ => {
            init.insert(
                format!("{tid}_{op}"),
                shim::fill(shim::SOCKET_INIT, &tid, op),
            );
        }
    }
}

fn socket_init(init: &mut BTreeMap<String, String>, s: &Statement) {
    if s
        .actions
        .intersects(Actions::DEFINE | Actions::ASSIGN | Actions::QUEUE_PUT)
    {
        if let Some(v) = &s.target {
            if is_plain_endpoint_kind(v.kind) {
                init_entry(init, v, "plain");
            } else {
                init_entry(init, v, "set");
            }
        }
    }

    if s
        .actions
        .intersects(Actions::LOCK | Actions::UNLOCK | Actions::WAIT)
    {
        if let Some(v) = &s.target {
            init_entry(init, v, "plain");
        }
    }

    if s.actions.contains(Actions::USE) {
        for v in &s.used {
            init_entry(init, v, "get");
        }
    }

    let arithmetic = [
        (Actions::ADD, "add"),
        (Actions::SUB, "sub"),
        (Actions::MUL, "mul"),
        (Actions::DIV, "div"),
    ];
    for (action, op) in arithmetic {
        if s.actions.contains(action) {
            if let Some(v) = &s.target {
                init_entry(init, v, op);
            }
        }
    }

    let interrogations = [
        (Actions::QUEUE_SIZE, "size"),
        (Actions::QUEUE_EMPTY, "empty"),
        (Actions::QUEUE_FULL, "full"),
    ];
    for (action, op) in interrogations {
        if s.actions.contains(action) {
            for v in s.used.iter().filter(|v| v.kind.is_queue()) {
                init_entry(init, v, op);
            }
        }
    }

    if s.actions == Actions::QUEUE_GET {
        if let Some(v) = &s.target {
            init_entry(init, v, "get");
            init_entry(init, v, "queue_get_ok");
        }
    }
}

// ── Injection into staged trees ──────────────────────────────────────────────

/// Writes the worker-specialized shim into every directory of each staged
/// tree and replaces each module file with its rewritten form.
pub fn inject(pkg: &Package, shim: &ShimModule, node_count: usize) -> Result<()> {
    let Some(project_dir) = pkg.project_dir() else {
        return Ok(());
    };
    let gothon_dir = project_dir.join(".gothon");

    for node in 0..node_count {
        let code = shim
            .as_str()
            .replace("{{gothon_dir}}", &gothon_dir.to_string_lossy())
            .replace("{{node_id}}", &node.to_string());
        let src_dir = gothon_dir.join("src").join(node.to_string());
        write_shim_everywhere(&src_dir, &code)?;

        for module in &pkg.modules {
            let path = src_dir.join(&module.relative_path);
            let original = fs::read_to_string(&path)?;
            fs::write(&path, rewrite_module_source(module, &original, node_count, node))?;
        }
    }

    Ok(())
}

fn write_shim_everywhere(dir: &std::path::Path, code: &str) -> Result<()> {
    fs::write(dir.join("_gothon_.py"), code)?;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            write_shim_everywhere(&entry.path(), code)?;
        }
    }
    Ok(())
}

fn rewrite_module_source(module: &Module, original: &str, node_count: usize, node: usize) -> String {
    let mut out = String::new();
    out.push_str("from _gothon_ import *\n\n\n");
    out.push_str(&format!(
        "{p}node_count{s}: int = {node_count}\n{p}node{s}: int = {node}\n\n\n",
        p = module.variable_prefix,
        s = module.variable_suffix,
    ));

    for (idx, text) in original.lines().enumerate() {
        match module.statement_at(idx + 1) {
            None => {
                out.push_str(text);
                out.push('\n');
            }
            Some(statement) if statement.should_skip => {
                // Dropped: the injected header already defines it.
            }
            Some(statement) => {
                out.push_str(&statement.modified_code);
                out.push('\n');
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DefaultValue;

    fn variable(id: &str, name: &str, kind: VarKind) -> Variable {
        Variable {
            id: id.to_string(),
            kind,
            subkind: None,
            name: name.to_string(),
            tag: String::new(),
            default: DefaultValue::Int(0),
        }
    }

    fn statement(code: &str, actions: Actions) -> Statement {
        let (lvalue, rvalue) = crate::analyzer::lr_values(code);
        Statement {
            line: 1,
            indentation: crate::analyzer::indentation(code),
            actions,
            original_code: code.to_string(),
            modified_code: code.to_string(),
            original_lvalue: lvalue,
            original_rvalue: rvalue.clone(),
            modified_rvalue: rvalue,
            ..Statement::default()
        }
    }

    // ── rewrite recipes ──────────────────────────────────────────────────────

    #[test]
    fn test_assignment_wraps_rhs_in_set() {
        let v = variable("main/_x_", "_x_", VarKind::Int);
        let mut s = statement("_x_ = 5", Actions::ASSIGN);
        s.target = Some(v);
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "_x_ = gothon_main__x__set(5)");
    }

    #[test]
    fn test_assignment_substitutes_usages_first() {
        let x = variable("main/_x_", "_x_", VarKind::Int);
        let y = variable("main/_y_", "_y_", VarKind::Int);
        let mut s = statement("_x_ = _y_ + 1", Actions::ASSIGN | Actions::USE);
        s.target = Some(x);
        s.used = vec![y];
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(
            s.modified_code,
            "_x_ = gothon_main__x__set(gothon_main__y__get() + 1)"
        );
    }

    #[test]
    fn test_assignment_substitutes_every_used_variable() {
        let a = variable("m/_a_", "_a_", VarKind::Int);
        let b = variable("m/_b_", "_b_", VarKind::Int);
        let c = variable("m/_c_", "_c_", VarKind::Int);
        let mut s = statement("_a_ = _b_ + _c_", Actions::ASSIGN | Actions::USE);
        s.target = Some(a);
        s.used = vec![b, c];
        rewrite_statement(&mut s, "m").unwrap();
        assert_eq!(
            s.modified_code,
            "_a_ = gothon_m__a__set(gothon_m__b__get() + gothon_m__c__get())"
        );
    }

    #[test]
    fn test_compound_add_keeps_operator() {
        let v = variable("main/_x_", "_x_", VarKind::Int);
        let mut s = statement("    _x_ += 1", Actions::ADD);
        s.target = Some(v);
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "    _x_ += gothon_main__x__add(1)");
    }

    #[test]
    fn test_string_subtract_degrades_to_assignment() {
        let v = variable("main/_s_", "_s_", VarKind::Str);
        let mut s = statement("_s_ -= 'tail'", Actions::SUB);
        s.target = Some(v);
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "_s_ = gothon_main__s__sub('tail')");
    }

    #[test]
    fn test_usage_only_line_rewrites_in_place() {
        let v = variable("main/_x_", "_x_", VarKind::Int);
        let mut s = statement("if _x_ == 3:", Actions::USE);
        s.used = vec![v];
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "if gothon_main__x__get() == 3:");
    }

    #[test]
    fn test_usage_replaces_dotted_receiver() {
        let v = variable("main/_x_", "_x_", VarKind::Int);
        let mut s = statement("while self._x_ < 10:", Actions::USE);
        s.used = vec![v];
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "while gothon_main__x__get() < 10:");
    }

    #[test]
    fn test_mutex_line_becomes_bare_helper_call() {
        let v = variable("main/_lock_x_", "_lock_x_", VarKind::LockFunc);
        let mut s = statement("    _lock_x_()", Actions::LOCK);
        s.target = Some(v);
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "    gothon_main__lock_x_()");
    }

    #[test]
    fn test_wait_call_carries_integer_argument() {
        let v = variable("main/_sync_start_", "_sync_start_", VarKind::WaitGroup);
        let mut s = statement("_sync_start_(1)", Actions::WAIT);
        s.target = Some(v.clone());
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "gothon_main__sync_start_(1)");

        let mut empty = statement("_sync_start_()", Actions::WAIT);
        empty.target = Some(v);
        rewrite_statement(&mut empty, "main").unwrap();
        assert_eq!(empty.modified_code, "gothon_main__sync_start_(0)");
    }

    #[test]
    fn test_queue_put_and_get_rewrites() {
        let mut q = variable("main/_q_", "_q_", VarKind::Queue);
        q.subkind = Some(VarKind::Int);

        let mut put = statement("_q_.put(7)", Actions::QUEUE_PUT);
        put.target = Some(q.clone());
        rewrite_statement(&mut put, "main").unwrap();
        assert_eq!(put.modified_code, "gothon_main__q__set(7)");

        let mut get = statement("v = _q_.get()", Actions::QUEUE_GET);
        get.target = Some(q);
        rewrite_statement(&mut get, "main").unwrap();
        assert_eq!(get.modified_code, "v = gothon_main__q__get()");
    }

    #[test]
    fn test_queue_interrogations_keep_control_structure() {
        let mut q = variable("main/_q_", "_q_", VarKind::Queue);
        q.subkind = Some(VarKind::Int);

        let mut s = statement("while _q_.empty():", Actions::QUEUE_EMPTY);
        s.used = vec![q.clone()];
        rewrite_statement(&mut s, "main").unwrap();
        assert_eq!(s.modified_code, "while gothon_main__q__empty():");

        let mut qsize = statement("n = _q_.qsize()", Actions::QUEUE_SIZE);
        qsize.used = vec![q];
        rewrite_statement(&mut qsize, "main").unwrap();
        assert_eq!(qsize.modified_code, "n = gothon_main__q__size()");
    }

    #[test]
    fn test_unchanged_rewrite_is_an_error() {
        let mut s = statement("x = y", Actions::QUEUE_PUT);
        s.target = Some(variable("m/_q_", "_q_", VarKind::Queue));
        let err = rewrite_statement(&mut s, "m").unwrap_err();
        assert!(matches!(err, Error::Rewrite { line: 1, .. }));
    }

    #[test]
    fn test_wait_argument_extraction() {
        assert_eq!(wait_argument("_w_(3)").as_deref(), Some("3"));
        assert_eq!(wait_argument("_w_()").as_deref(), Some("0"));
        assert_eq!(wait_argument("_w_(n)"), None);
        assert_eq!(wait_argument("_w_"), None);
    }

    // ── module source rewriting ──────────────────────────────────────────────

    #[test]
    fn test_rewrite_module_source_header_and_lines() {
        let mut module = Module {
            name: "main".to_string(),
            absolute_path: Default::default(),
            relative_path: Default::default(),
            project_dir: Default::default(),
            require_parens: false,
            variable_prefix: "_".to_string(),
            variable_suffix: "_".to_string(),
            statements: Vec::new(),
        };
        let mut assign = statement("_x_ = 1", Actions::ASSIGN);
        assign.line = 2;
        assign.modified_code = "_x_ = gothon_main__x__set(1)".to_string();
        let mut skipped = statement("_node_: int = 0", Actions::DEFINE);
        skipped.line = 3;
        skipped.should_skip = true;
        module.statements = vec![assign, skipped];

        let source = "print('hi')\n_x_ = 1\n_node_: int = 0\nprint('bye')\n";
        let out = rewrite_module_source(&module, source, 4, 2);

        assert!(out.starts_with("from _gothon_ import *\n\n\n"));
        assert!(out.contains("_node_count_: int = 4\n_node_: int = 2\n"));
        assert!(out.contains("print('hi')\n"));
        assert!(out.contains("_x_ = gothon_main__x__set(1)\n"));
        assert!(out.contains("print('bye')\n"));
        // The reserved declaration is dropped in favor of the header.
        assert_eq!(out.matches("_node_: int = 0").count(), 0);
    }
}
