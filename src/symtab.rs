use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::emit::Segment;

/// The storage class of a declared identifier.
///
/// `Static` and `Field` live in class scope; `Arg` and `Var` in subroutine
/// scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Static,
    Field,
    Arg,
    Var,
}

impl VarKind {
    /// The VM memory segment holding variables of this kind.
    pub fn segment(self) -> Segment {
        match self {
            VarKind::Static => Segment::Static,
            VarKind::Field => Segment::This,
            VarKind::Arg => Segment::Argument,
            VarKind::Var => Segment::Local,
        }
    }

    fn slot(self) -> usize {
        match self {
            VarKind::Static => 0,
            VarKind::Field => 1,
            VarKind::Arg => 2,
            VarKind::Var => 3,
        }
    }
}

/// A resolved symbol: storage class, declared type, and segment offset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SymbolEntry {
    pub kind: VarKind,
    #[serde(rename = "type")]
    pub ty: String,
    pub index: u16,
}

/// One lexical scope: a name map plus per-kind running counters.
///
/// Indices are assigned in declaration order and double as the VM segment
/// offsets emitted by the code generator.
#[derive(Clone, Debug, Default)]
struct Scope {
    entries: BTreeMap<String, SymbolEntry>,
    counts: [u16; 4],
}

impl Scope {
    /// Insert `name`, assigning the next index for its kind. Returns the
    /// assigned index, or `None` if the name is already declared here.
    fn define(&mut self, name: &str, ty: &str, kind: VarKind) -> Option<u16> {
        if self.entries.contains_key(name) {
            return None;
        }
        let index = self.counts[kind.slot()];
        self.counts[kind.slot()] += 1;
        self.entries.insert(
            name.to_string(),
            SymbolEntry {
                kind,
                ty: ty.to_string(),
                index,
            },
        );
        Some(index)
    }
}

/// The two-scope symbol table of one compilation unit.
///
/// Class scope persists for the whole class; the subroutine scope is replaced
/// wholesale on each subroutine entry, so stale bindings cannot leak between
/// subroutines.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    class_scope: Scope,
    subroutine_scope: Scope,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh, empty subroutine scope.
    pub fn start_subroutine(&mut self) {
        self.subroutine_scope = Scope::default();
    }

    /// Declare an identifier, routed to class or subroutine scope by kind.
    /// Returns the assigned index, or `None` on redeclaration within the
    /// same scope (shadowing across scopes is allowed).
    pub fn define(&mut self, name: &str, ty: &str, kind: VarKind) -> Option<u16> {
        match kind {
            VarKind::Static | VarKind::Field => self.class_scope.define(name, ty, kind),
            VarKind::Arg | VarKind::Var => self.subroutine_scope.define(name, ty, kind),
        }
    }

    /// Number of identifiers of `kind` declared so far in its scope.
    pub fn var_count(&self, kind: VarKind) -> u16 {
        match kind {
            VarKind::Static | VarKind::Field => self.class_scope.counts[kind.slot()],
            VarKind::Arg | VarKind::Var => self.subroutine_scope.counts[kind.slot()],
        }
    }

    /// Resolve a name, subroutine scope first. `None` means the name is not
    /// a variable; callers decide whether that is a class name or an error.
    pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
        self.subroutine_scope
            .entries
            .get(name)
            .or_else(|| self.class_scope.entries.get(name))
    }

    /// Write both tables as pretty-printed JSON under `dir`.
    ///
    /// The subroutine table reflects the most recently compiled subroutine.
    pub fn write_dumps(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let class_json = serde_json::to_string_pretty(&self.class_scope.entries)?;
        let sub_json = serde_json::to_string_pretty(&self.subroutine_scope.entries)?;
        fs::write(dir.join("class_table.txt"), class_json)?;
        fs::write(dir.join("subroutine_table.txt"), sub_json)?;
        Ok(())
    }
}
