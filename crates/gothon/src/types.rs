//! Analyzed-source data model.
//!
//! The analyzer turns a project tree into a [`Package`] of [`Module`]s, each
//! carrying [`Statement`] records for the lines it will rewrite. A
//! [`Variable`] is one shared cell; its `id` (`<module-name>/<bare-name>`) is
//! the stable key used by registers, endpoint paths, and generated helper
//! names alike.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The closed set of shared-variable kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    Bool,
    Int,
    Float,
    Str,
    LockFunc,
    UnlockFunc,
    WaitGroup,
    Queue,
    LifoQueue,
}

impl VarKind {
    /// Stable lowercase token, used to key shim templates by element kind.
    pub fn as_str(self) -> &'static str {
        match self {
            VarKind::Bool => "bool",
            VarKind::Int => "int",
            VarKind::Float => "float",
            VarKind::Str => "str",
            VarKind::LockFunc => "lock_func",
            VarKind::UnlockFunc => "unlock_func",
            VarKind::WaitGroup => "wait_group",
            VarKind::Queue => "fifo_queue",
            VarKind::LifoQueue => "lifo_queue",
        }
    }

    /// True for the queue kinds (which carry an element subkind).
    pub fn is_queue(self) -> bool {
        matches!(self, VarKind::Queue | VarKind::LifoQueue)
    }
}

/// Parsed initial value of a declaration. Queue declarations store their
/// capacity as `Int`; callable declarations store the bound token as `Str`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

bitflags! {
    /// Primitive actions a source line performs on shared variables. A line
    /// may accumulate several (e.g. an assignment whose rhs reads another
    /// shared variable).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Actions: u32 {
        const DEFINE      = 1 << 0;
        const ASSIGN      = 1 << 1;
        const ADD         = 1 << 2;
        const SUB         = 1 << 3;
        const MUL         = 1 << 4;
        const DIV         = 1 << 5;
        const USE         = 1 << 6;
        const LOCK        = 1 << 7;
        const UNLOCK      = 1 << 8;
        const WAIT        = 1 << 9;
        const QUEUE_FULL  = 1 << 10;
        const QUEUE_EMPTY = 1 << 11;
        const QUEUE_SIZE  = 1 << 12;
        const QUEUE_PUT   = 1 << 13;
        const QUEUE_GET   = 1 << 14;
    }
}

/// Converts a variable id (or id-derived path) into a Python identifier
/// fragment: path separators and dots become underscores.
pub fn translate_id(id: &str) -> String {
    id.replace(['/', '.'], "_")
}

/// One shared variable, as declared in source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// `<module-name>/<name>`; unique within a package.
    pub id: String,
    pub kind: VarKind,
    /// Element kind, for queue variables only.
    pub subkind: Option<VarKind>,
    /// Name as written in source, affixes included.
    pub name: String,
    /// For lock/unlock pairs: the id suffix of the shared mutex register.
    pub tag: String,
    pub default: DefaultValue,
}

impl Variable {
    /// The id as a Python identifier fragment (`main/_x_` → `main__x_`).
    pub fn translated_id(&self) -> String {
        translate_id(&self.id)
    }
}

/// One analyzed source line and the rewrite produced for it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statement {
    /// 1-based source line.
    pub line: usize,
    /// Leading whitespace, preserved verbatim in the rewrite.
    pub indentation: String,
    pub actions: Actions,
    pub target: Option<Variable>,
    pub used: Vec<Variable>,
    pub original_code: String,
    pub modified_code: String,
    /// Text left of the top-level `=` (compound operators keep their symbol
    /// at the end, so re-joining with `=` reproduces `+=` etc.).
    pub original_lvalue: String,
    pub original_rvalue: String,
    pub modified_rvalue: String,
    /// Reserved declarations (`node`, `node_count`) that the rewriter must
    /// drop in favor of its own injected definitions.
    pub should_skip: bool,
}

/// One source file.
#[derive(Debug, Serialize)]
pub struct Module {
    /// Relative path with separators flattened to `_`, `.py` stripped.
    pub name: String,
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    pub project_dir: PathBuf,
    pub require_parens: bool,
    pub variable_prefix: String,
    pub variable_suffix: String,
    pub statements: Vec<Statement>,
}

impl Module {
    /// Variables declared in this module (definition-only statements).
    pub fn variables(&self) -> Vec<&Variable> {
        self.statements
            .iter()
            .filter(|s| s.actions == Actions::DEFINE && !s.should_skip)
            .filter_map(|s| s.target.as_ref())
            .collect()
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables().into_iter().find(|v| v.name == name)
    }

    /// First statement recorded for `line`. When several passes matched the
    /// same line, the earliest pass wins (declarations first).
    pub fn statement_at(&self, line: usize) -> Option<&Statement> {
        self.statements.iter().find(|s| s.line == line)
    }
}

/// All modules under one project root, in discovery order.
#[derive(Debug, Default, Serialize)]
pub struct Package {
    pub modules: Vec<Module>,
}

impl Package {
    pub fn project_dir(&self) -> Option<&Path> {
        self.modules.first().map(|m| m.project_dir.as_path())
    }

    pub fn variables(&self) -> Vec<&Variable> {
        self.modules.iter().flat_map(|m| m.variables()).collect()
    }

    pub fn variable_by_id(&self, id: &str) -> Option<&Variable> {
        self.variables().into_iter().find(|v| v.id == id)
    }
}
