//! Endpoint fabric: enumerates every endpoint path the analyzed package
//! demands and wires bound endpoints to register slots.
//!
//! Paths are relative to the per-worker socket root. Ordinary operations use
//! `<module>/<name>/<op>_<in|out>` (queue get adds `get_ok`); mutex and
//! wait-group endpoints flatten to `<module>/<name>_<in|out>`. Enumeration
//! is deterministic (sorted), so the k-th `set_in` and k-th `set_out` of a
//! register always belong to the same worker and slot pairing by attach
//! order is sound.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::register::{SlotDir, SlotOp};
use crate::registry::Registry;
use crate::socket::SocketArray;
use crate::types::{Actions, Package, Statement, VarKind, Variable};

/// Relative endpoint paths for every (variable, operation) the package uses.
pub fn endpoint_paths(pkg: &Package) -> Result<Vec<String>> {
    let mut paths = BTreeSet::new();

    for module in &pkg.modules {
        for statement in &module.statements {
            if statement.should_skip {
                continue;
            }
            statement_paths(&module.name, statement, &mut paths)?;
        }
    }

    Ok(paths.into_iter().collect())
}

fn pair(paths: &mut BTreeSet<String>, module: &str, variable: &Variable, op: &str) {
    paths.insert(format!("{module}/{}/{op}_in", variable.name));
    paths.insert(format!("{module}/{}/{op}_out", variable.name));
}

fn plain_pair(paths: &mut BTreeSet<String>, module: &str, variable: &Variable) {
    paths.insert(format!("{module}/{}_in", variable.name));
    paths.insert(format!("{module}/{}_out", variable.name));
}

fn invalid(variable: &Variable, op: &str) -> Error {
    Error::InvalidOperation {
        variable: variable.id.clone(),
        op: op.to_string(),
    }
}

fn statement_paths(
    module: &str,
    statement: &Statement,
    paths: &mut BTreeSet<String>,
) -> Result<()> {
    if statement.actions.contains(Actions::DEFINE) {
        if let Some(v) = &statement.target {
            match v.kind {
                VarKind::LockFunc | VarKind::UnlockFunc | VarKind::WaitGroup => {
                    plain_pair(paths, module, v)
                }
                _ => pair(paths, module, v, "set"),
            }
        }
    }

    if statement
        .actions
        .intersects(Actions::ASSIGN | Actions::QUEUE_PUT)
    {
        if let Some(v) = &statement.target {
            match v.kind {
                VarKind::LockFunc | VarKind::UnlockFunc => return Err(invalid(v, "set")),
                _ => pair(paths, module, v, "set"),
            }
        }
    }

    if statement.actions == Actions::QUEUE_GET {
        if let Some(v) = &statement.target {
            pair(paths, module, v, "get");
            paths.insert(format!("{module}/{}/get_ok", v.name));
        }
    }

    if statement.actions.contains(Actions::USE) {
        for v in &statement.used {
            match v.kind {
                VarKind::LockFunc | VarKind::UnlockFunc => return Err(invalid(v, "get")),
                VarKind::Queue | VarKind::LifoQueue => {
                    pair(paths, module, v, "get");
                    paths.insert(format!("{module}/{}/get_ok", v.name));
                }
                _ => pair(paths, module, v, "get"),
            }
        }
    }

    let arithmetic = [
        (Actions::ADD, "add", true),
        (Actions::SUB, "sub", true),
        (Actions::MUL, "mul", false),
        (Actions::DIV, "div", false),
    ];
    for (action, op, allows_str) in arithmetic {
        if !statement.actions.contains(action) {
            continue;
        }
        if let Some(v) = &statement.target {
            let ok = matches!(v.kind, VarKind::Int | VarKind::Float)
                || (allows_str && v.kind == VarKind::Str);
            if !ok {
                return Err(invalid(v, op));
            }
            pair(paths, module, v, op);
        }
    }

    let interrogations = [
        (Actions::QUEUE_SIZE, "size"),
        (Actions::QUEUE_EMPTY, "empty"),
        (Actions::QUEUE_FULL, "full"),
    ];
    for (action, op) in interrogations {
        if !statement.actions.contains(action) {
            continue;
        }
        for v in statement.used.iter().filter(|v| v.kind.is_queue()) {
            pair(paths, module, v, op);
        }
    }

    Ok(())
}

// ── Attachment ───────────────────────────────────────────────────────────────

fn parse_op_segment(segment: &str) -> Option<(SlotOp, SlotDir)> {
    let (op, dir) = segment.rsplit_once('_')?;
    let dir = match dir {
        "in" => SlotDir::In,
        "out" => SlotDir::Out,
        "ok" => SlotDir::Ok,
        _ => return None,
    };
    let op = match op {
        "set" => SlotOp::Set,
        "get" => SlotOp::Get,
        "add" => SlotOp::Add,
        "sub" => SlotOp::Sub,
        "mul" => SlotOp::Mul,
        "div" => SlotOp::Div,
        "size" => SlotOp::Size,
        "empty" => SlotOp::Empty,
        "full" => SlotOp::Full,
        _ => return None,
    };
    Some((op, dir))
}

fn strip_direction(tag: &str) -> (&str, Option<SlotDir>) {
    if let Some(stripped) = tag.strip_suffix("_in") {
        (stripped, Some(SlotDir::In))
    } else if let Some(stripped) = tag.strip_suffix("_out") {
        (stripped, Some(SlotDir::Out))
    } else {
        (tag, None)
    }
}

/// Wires every endpoint of the array to its register slot, parsing the
/// trailing path segment. Mutex endpoints normalize their variable name
/// (`lock_`/`unlock_` → `mutex_`) so both halves join the one register.
pub fn attach_endpoints(registry: &mut Registry, sockets: &SocketArray) -> Result<()> {
    for socket in sockets.iter() {
        let tag = socket.tag();

        if let Some((prefix, segment)) = tag.rsplit_once('/') {
            if let Some((op, dir)) = parse_op_segment(segment) {
                registry.attach(prefix, op, dir, Arc::clone(socket))?;
                continue;
            }
        }

        // Flattened mutex / wait-group endpoint: `<module>/<name>_<dir>`.
        let (name, dir) = strip_direction(tag);
        let Some(dir) = dir else {
            return Err(Error::UnknownRegister {
                path: tag.to_string(),
                variable: tag.to_string(),
            });
        };

        if name.contains("sync_") {
            registry.attach(name, SlotOp::Set, dir, Arc::clone(socket))?;
        } else if name.contains("unlock_") {
            let id = name.replacen("unlock_", "mutex_", 1);
            registry.attach(&id, SlotOp::Unlock, dir, Arc::clone(socket))?;
        } else {
            let id = name.replacen("lock_", "mutex_", 1);
            registry.attach(&id, SlotOp::Lock, dir, Arc::clone(socket))?;
        }
    }

    Ok(())
}
