//! Normalized program graph: symbols, classes, fields, hierarchy.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ast;
use super::cfg::Cfg;
use crate::error::{FlowError, Result};
use crate::ttype::Ty;

/// A source position (1-indexed line/column; 0 when synthetic).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    #[inline]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    #[inline]
    pub fn line(line: u32) -> Self {
        Self { line, column: 1 }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Stable identity of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

/// Stable identity of a function, method, or constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// Abstract identity of a field: the *declaring* class plus the field name.
///
/// All instances of a class are deliberately abstracted together; reads and
/// writes of an inherited field resolve to the same key whether they go
/// through the subclass or the parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub class: ClassId,
    pub name: String,
}

impl FieldKey {
    pub fn new(class: ClassId, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
        }
    }
}

/// A declared field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    /// Declared type; `Unknown` when unannotated.
    pub declared_ty: Ty,
    pub pos: Pos,
}

/// A class in the normalized graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: String,
    pub parent: Option<ClassId>,
    /// Direct subclasses.
    pub children: Vec<ClassId>,
    pub is_abstract: bool,
    /// Fields declared directly on this class.
    pub fields: FxHashMap<String, FieldInfo>,
    /// Non-constructor methods declared directly on this class.
    pub methods: FxHashMap<String, SymbolId>,
    /// Constructor declared directly on this class, if any.
    pub constructor: Option<SymbolId>,
    pub pos: Pos,
}

/// Declared parameter of a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    /// Declared type; `Unknown` when unannotated.
    pub ty: Ty,
}

/// A function, method, or constructor in the normalized graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    /// `Class::method` for methods, plain name for functions.
    pub fq_name: String,
    pub class: Option<ClassId>,
    pub params: Vec<ParamInfo>,
    pub ret_hint: Option<Ty>,
    pub is_async: bool,
    pub is_abstract: bool,
    pub is_constructor: bool,
    pub is_static: bool,
    /// The ancestor method this one overrides, if any.
    pub overrides: Option<SymbolId>,
    pub pos: Pos,
}

/// A non-fatal problem found while normalizing the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildIssue {
    /// Fully-qualified name of the enclosing declaration.
    pub context: String,
    pub pos: Pos,
    pub message: String,
}

/// Direct hierarchy neighbourhood of a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hierarchy {
    pub parents: Vec<ClassId>,
    pub children: Vec<ClassId>,
}

/// The normalized whole-program representation the engines run on.
///
/// Built once from the front end's [`ast::Program`]; read-only afterwards.
#[derive(Debug)]
pub struct ProgramGraph {
    symbols: Vec<Symbol>,
    classes: Vec<ClassInfo>,
    cfgs: FxHashMap<SymbolId, Cfg>,
    functions_by_name: FxHashMap<String, SymbolId>,
    classes_by_name: FxHashMap<String, ClassId>,
    /// Dangling references and similar recovered problems.
    pub issues: Vec<BuildIssue>,
}

impl ProgramGraph {
    /// Normalize a front-end program.
    ///
    /// Dangling symbol references are recovered (the node stays, resolution
    /// yields `Unknown`) and recorded in [`ProgramGraph::issues`]; only
    /// structurally unusable input — a cycle in the class hierarchy — is an
    /// error.
    pub fn build(program: &ast::Program) -> Result<ProgramGraph> {
        super::builder::build(program)
    }

    pub(crate) fn from_parts(
        symbols: Vec<Symbol>,
        classes: Vec<ClassInfo>,
        cfgs: FxHashMap<SymbolId, Cfg>,
        functions_by_name: FxHashMap<String, SymbolId>,
        classes_by_name: FxHashMap<String, ClassId>,
        issues: Vec<BuildIssue>,
    ) -> Self {
        Self {
            symbols,
            classes,
            cfgs,
            functions_by_name,
            classes_by_name,
            issues,
        }
    }

    // -------------------------------------------------------------------------
    // Symbol access
    // -------------------------------------------------------------------------

    pub fn symbol(&self, id: SymbolId) -> Result<&Symbol> {
        self.symbols
            .get(id.0 as usize)
            .ok_or(FlowError::UnknownSymbol(id))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// The control-flow graph of a symbol's body; `None` for abstract
    /// methods.
    pub fn cfg_of(&self, id: SymbolId) -> Option<&Cfg> {
        self.cfgs.get(&id)
    }

    /// Look up a top-level function by name.
    pub fn function(&self, name: &str) -> Option<SymbolId> {
        self.functions_by_name.get(name).copied()
    }

    // -------------------------------------------------------------------------
    // Class access and hierarchy
    // -------------------------------------------------------------------------

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0 as usize]
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.classes_by_name.get(name).copied()
    }

    /// Direct parents and children of a class.
    pub fn hierarchy_of(&self, id: ClassId) -> Hierarchy {
        let info = self.class(id);
        Hierarchy {
            parents: info.parent.into_iter().collect(),
            children: info.children.clone(),
        }
    }

    /// The class itself followed by its ancestors, root-last.
    pub fn ancestors(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = vec![id];
        let mut cursor = self.class(id).parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.class(parent).parent;
        }
        chain
    }

    /// The class itself and all transitive subclasses.
    pub fn descendants(&self, id: ClassId) -> Vec<ClassId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.class(next).children.iter().copied());
        }
        out
    }

    /// Whether `child` is `parent` or a transitive subclass of it.
    pub fn is_subclass_of(&self, child: ClassId, parent: ClassId) -> bool {
        self.ancestors(child).contains(&parent)
    }

    // -------------------------------------------------------------------------
    // Member resolution
    // -------------------------------------------------------------------------

    /// Resolve a field read/write against the hierarchy: the key names the
    /// *declaring* class so subclass and parent accesses agree.
    pub fn resolve_field(&self, class: ClassId, name: &str) -> Option<FieldKey> {
        self.ancestors(class)
            .into_iter()
            .find(|cid| self.class(*cid).fields.contains_key(name))
            .map(|cid| FieldKey::new(cid, name))
    }

    /// Every field reachable on an instance of `class`, keyed by declaring
    /// class.
    pub fn all_fields(&self, class: ClassId) -> Vec<(FieldKey, &FieldInfo)> {
        let mut out = Vec::new();
        for cid in self.ancestors(class) {
            for info in self.class(cid).fields.values() {
                out.push((FieldKey::new(cid, info.name.clone()), info));
            }
        }
        out
    }

    /// The method `name` as seen from `class`: the nearest declaration
    /// walking up the hierarchy.
    pub fn lookup_method(&self, class: ClassId, name: &str) -> Option<SymbolId> {
        self.ancestors(class)
            .into_iter()
            .find_map(|cid| self.class(cid).methods.get(name).copied())
    }

    /// The constructor that runs for `new class(..)`: the nearest declared
    /// constructor walking up the hierarchy.
    pub fn lookup_constructor(&self, class: ClassId) -> Option<SymbolId> {
        self.ancestors(class)
            .into_iter()
            .find_map(|cid| self.class(cid).constructor)
    }

    /// The method declared *directly* on `class`, if any.
    pub fn method_in_class(&self, class: ClassId, name: &str) -> Option<SymbolId> {
        self.class(class).methods.get(name).copied()
    }
}
