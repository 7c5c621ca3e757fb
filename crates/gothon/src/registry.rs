//! Registry: variable id → register, built once per session.
//!
//! Lock and unlock declarations collapse onto a single mutex register keyed
//! by the pair's `tag` (`<module>/<prefix>mutex_<name><suffix>`); wait-group
//! registers whose declared default is the reserved `node_count` token start
//! at the session's worker count.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::register::{
    BoolRegister, FloatRegister, IntRegister, MutexRegister, QueueRegister, Register, SlotDir,
    SlotOp, StrRegister, WaitGroupRegister,
};
use crate::socket::DatagramSocket;
use crate::types::{Actions, DefaultValue, Module, Package, VarKind, Variable};

pub struct Registry {
    registers: HashMap<String, Box<dyn Register>>,
}

impl Registry {
    /// Materializes one register per declared variable.
    pub fn build(pkg: &Package, node_count: usize) -> Result<Registry> {
        let mut registers: HashMap<String, Box<dyn Register>> = HashMap::new();

        for module in &pkg.modules {
            for statement in &module.statements {
                if statement.actions != Actions::DEFINE || statement.should_skip {
                    continue;
                }
                let Some(variable) = &statement.target else {
                    continue;
                };
                let (id, register) = build_register(variable, module, node_count)?;
                registers.insert(id, register);
            }
        }

        Ok(Registry { registers })
    }

    /// Routes one endpoint to its register's slot.
    pub fn attach(
        &mut self,
        id: &str,
        op: SlotOp,
        dir: SlotDir,
        socket: std::sync::Arc<DatagramSocket>,
    ) -> Result<()> {
        let register = self.registers.get_mut(id).ok_or_else(|| Error::UnknownRegister {
            path: socket.tag().to_string(),
            variable: id.to_string(),
        })?;
        register.slots_mut().attach(op, dir, socket)
    }

    /// Spawns every register's reader threads.
    pub fn start(&mut self) {
        for register in self.registers.values_mut() {
            register.start();
        }
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registers.contains_key(id)
    }
}

fn mismatch(variable: &Variable, expected: &str) -> Error {
    Error::DefaultValue {
        variable: variable.id.clone(),
        value: format!("{:?}", variable.default),
        reason: format!("expected a {expected} default"),
    }
}

/// The registry key for a lock/unlock declaration: the declaration's module
/// path joined with the shared mutex tag.
fn mutex_register_id(variable: &Variable) -> String {
    let base = variable
        .id
        .rsplit_once('/')
        .map(|(module, _)| module)
        .unwrap_or("");
    format!("{base}/{}", variable.tag)
}

fn build_register(
    variable: &Variable,
    module: &Module,
    node_count: usize,
) -> Result<(String, Box<dyn Register>)> {
    let id = variable.id.clone();

    let register: (String, Box<dyn Register>) = match variable.kind {
        VarKind::Bool => match variable.default {
            DefaultValue::Bool(v) => (id.clone(), Box::new(BoolRegister::new(id.as_str(), v))),
            _ => return Err(mismatch(variable, "bool")),
        },
        VarKind::Int => match variable.default {
            DefaultValue::Int(v) => (id.clone(), Box::new(IntRegister::new(id.as_str(), v))),
            _ => return Err(mismatch(variable, "int")),
        },
        VarKind::Float => match variable.default {
            DefaultValue::Float(v) => (id.clone(), Box::new(FloatRegister::new(id.as_str(), v))),
            _ => return Err(mismatch(variable, "float")),
        },
        VarKind::Str => match &variable.default {
            DefaultValue::Str(v) => (id.clone(), Box::new(StrRegister::new(id.as_str(), v.clone()))),
            _ => return Err(mismatch(variable, "str")),
        },
        VarKind::LockFunc | VarKind::UnlockFunc => {
            let mutex_id = mutex_register_id(variable);
            (mutex_id.clone(), Box::new(MutexRegister::new(mutex_id.as_str())))
        }
        VarKind::WaitGroup => {
            let DefaultValue::Str(token) = &variable.default else {
                return Err(mismatch(variable, "counter"));
            };
            let reserved = format!(
                "{}node_count{}",
                module.variable_prefix, module.variable_suffix
            );
            let count = if *token == reserved {
                node_count as i64
            } else {
                token.parse::<i64>().map_err(|_| mismatch(variable, "counter"))?
            };
            (id.clone(), Box::new(WaitGroupRegister::new(id.as_str(), count)))
        }
        VarKind::Queue | VarKind::LifoQueue => {
            let DefaultValue::Int(capacity) = variable.default else {
                return Err(mismatch(variable, "capacity"));
            };
            let capacity = usize::try_from(capacity).map_err(|_| mismatch(variable, "capacity"))?;
            let lifo = variable.kind == VarKind::LifoQueue;
            let register: Box<dyn Register> = match variable.subkind {
                Some(VarKind::Bool) => Box::new(QueueRegister::<bool>::new(id.as_str(), capacity, lifo)),
                Some(VarKind::Float) => Box::new(QueueRegister::<f64>::new(id.as_str(), capacity, lifo)),
                Some(VarKind::Str) => Box::new(QueueRegister::<String>::new(id.as_str(), capacity, lifo)),
                _ => Box::new(QueueRegister::<i64>::new(id.as_str(), capacity, lifo)),
            };
            (id.clone(), register)
        }
    };

    Ok(register)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Statement;
    use std::path::PathBuf;

    fn module_with(statements: Vec<Statement>) -> Module {
        Module {
            name: "main".to_string(),
            absolute_path: PathBuf::new(),
            relative_path: PathBuf::new(),
            project_dir: PathBuf::new(),
            require_parens: false,
            variable_prefix: "_".to_string(),
            variable_suffix: "_".to_string(),
            statements,
        }
    }

    fn define(variable: Variable) -> Statement {
        Statement {
            line: 1,
            actions: Actions::DEFINE,
            target: Some(variable),
            ..Statement::default()
        }
    }

    fn variable(name: &str, kind: VarKind, default: DefaultValue) -> Variable {
        Variable {
            id: format!("main/{name}"),
            kind,
            subkind: None,
            name: name.to_string(),
            tag: String::new(),
            default,
        }
    }

    #[test]
    fn test_build_creates_one_register_per_declaration() {
        let pkg = Package {
            modules: vec![module_with(vec![
                define(variable("_a_", VarKind::Int, DefaultValue::Int(0))),
                define(variable("_b_", VarKind::Str, DefaultValue::Str(String::new()))),
            ])],
        };
        let registry = Registry::build(&pkg, 3).expect("build");
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("main/_a_"));
        assert!(registry.contains("main/_b_"));
    }

    #[test]
    fn test_lock_unlock_collapse_to_one_mutex_register() {
        let mut lock = variable(
            "_lock_x_",
            VarKind::LockFunc,
            DefaultValue::Str("lambda: m.lock()".to_string()),
        );
        lock.tag = "_mutex_x_".to_string();
        let mut unlock = variable(
            "_unlock_x_",
            VarKind::UnlockFunc,
            DefaultValue::Str("lambda: m.unlock()".to_string()),
        );
        unlock.tag = "_mutex_x_".to_string();

        let pkg = Package {
            modules: vec![module_with(vec![define(lock), define(unlock)])],
        };
        let registry = Registry::build(&pkg, 2).expect("build");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("main/_mutex_x_"));
    }

    #[test]
    fn test_wait_group_node_count_token_resolves() {
        let wg = variable(
            "_sync_start_",
            VarKind::WaitGroup,
            DefaultValue::Str("_node_count_".to_string()),
        );
        let pkg = Package {
            modules: vec![module_with(vec![define(wg)])],
        };
        // Resolves against the session's worker count without error.
        let registry = Registry::build(&pkg, 5).expect("build");
        assert!(registry.contains("main/_sync_start_"));
    }

    #[test]
    fn test_wait_group_bad_counter_is_an_error() {
        let wg = variable(
            "_sync_start_",
            VarKind::WaitGroup,
            DefaultValue::Str("lambda: wg.wait()".to_string()),
        );
        let pkg = Package {
            modules: vec![module_with(vec![define(wg)])],
        };
        assert!(matches!(
            Registry::build(&pkg, 5),
            Err(Error::DefaultValue { .. })
        ));
    }

    #[test]
    fn test_queue_default_must_be_capacity() {
        let mut q = variable("_q_", VarKind::Queue, DefaultValue::Str("x".to_string()));
        q.subkind = Some(VarKind::Int);
        let pkg = Package {
            modules: vec![module_with(vec![define(q)])],
        };
        assert!(Registry::build(&pkg, 1).is_err());
    }

    #[test]
    fn test_attach_unknown_variable_is_an_error() {
        let pkg = Package { modules: vec![] };
        let mut registry = Registry::build(&pkg, 1).expect("build");
        let socket = std::sync::Arc::new(DatagramSocket::new(
            PathBuf::from("/tmp/none"),
            "main/_x_/set_in",
        ));
        let err = registry
            .attach("main/_x_", SlotOp::Set, SlotDir::In, socket)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownRegister { .. }));
    }
}
