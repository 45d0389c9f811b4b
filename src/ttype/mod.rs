//! The type join-semilattice.
//!
//! Inferred types are drawn from a small tagged lattice:
//!
//! ```text
//!                 Unknown (top)
//!        /     |        |         \
//!   Prim(..) Instance  Collection  Awaitable   (unions of these)
//!        \     |        |         /
//!                 Bottom (unreachable)
//! ```
//!
//! `Unknown` is the top element: anything the engine cannot pin down. `Bottom`
//! marks unreachable code and is the identity of [`Ty::join`]. Unions are kept
//! in a normal form (flattened, deduplicated, width-bounded) so that joins are
//! idempotent and state comparisons are cheap `==` checks.
//!
//! The lattice only ever grows under [`Ty::join`]; the fixed-point solvers rely
//! on that for termination.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::program::types::ClassId;

/// Maximum number of atoms a union may hold before widening to `Unknown`.
const MAX_UNION_WIDTH: usize = 8;

/// Primitive scalar types of the analyzed language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prim {
    Bool,
    Int,
    Float,
    Str,
    Null,
}

impl fmt::Display for Prim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prim::Bool => write!(f, "bool"),
            Prim::Int => write!(f, "int"),
            Prim::Float => write!(f, "float"),
            Prim::Str => write!(f, "string"),
            Prim::Null => write!(f, "null"),
        }
    }
}

/// An inferred or declared type.
///
/// Constructed values are always in normal form:
/// - `Union` holds at least two atoms, none of which is `Union`, `Unknown`,
///   `Bottom`, or `Prim(Null)`;
/// - nullability is expressed through `Nullable`, never through a raw union
///   with `null`;
/// - `Nullable` never wraps `Unknown`, `Bottom`, `Null`, or another `Nullable`.
///
/// Use [`Ty::union_of`] / [`Ty::join`] instead of building `Union` directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ty {
    /// Unreachable-code marker; identity element of `join`.
    Bottom,
    /// A primitive scalar.
    Prim(Prim),
    /// An instance of a specific class.
    Instance(ClassId),
    /// A parametric collection with the given element type.
    Collection(Box<Ty>),
    /// A suspended computation producing the inner type when awaited.
    Awaitable(Box<Ty>),
    /// `T | null`.
    Nullable(Box<Ty>),
    /// Union of two or more non-null atoms.
    Union(Vec<Ty>),
    /// Top element: no information.
    Unknown,
}

impl Default for Ty {
    fn default() -> Self {
        Ty::Unknown
    }
}

impl Ty {
    /// Shorthand for a collection of `elem`.
    pub fn collection(elem: Ty) -> Ty {
        Ty::Collection(Box::new(elem))
    }

    /// Shorthand for an awaitable of `inner`.
    pub fn awaitable(inner: Ty) -> Ty {
        Ty::Awaitable(Box::new(inner))
    }

    /// Shorthand for `inner | null`, normalized.
    pub fn nullable(inner: Ty) -> Ty {
        match inner {
            Ty::Unknown => Ty::Unknown,
            Ty::Bottom | Ty::Prim(Prim::Null) => Ty::Prim(Prim::Null),
            Ty::Nullable(t) => Ty::Nullable(t),
            other => Ty::Nullable(Box::new(other)),
        }
    }

    #[inline]
    pub fn is_bottom(&self) -> bool {
        matches!(self, Ty::Bottom)
    }

    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Ty::Unknown)
    }

    /// Whether `null` inhabits this type.
    pub fn admits_null(&self) -> bool {
        matches!(self, Ty::Nullable(_) | Ty::Prim(Prim::Null) | Ty::Unknown)
    }

    /// Lattice join (least upper bound) of two types.
    pub fn join(&self, other: &Ty) -> Ty {
        match (self, other) {
            (Ty::Bottom, t) | (t, Ty::Bottom) => t.clone(),
            (Ty::Unknown, _) | (_, Ty::Unknown) => Ty::Unknown,
            (a, b) if a == b => a.clone(),
            _ => {
                let mut atoms = Vec::new();
                let mut nullable = false;
                self.collect_atoms(&mut atoms, &mut nullable);
                other.collect_atoms(&mut atoms, &mut nullable);
                Ty::from_atoms(atoms, nullable)
            }
        }
    }

    /// Join every type in `iter`; `Bottom` when the iterator is empty.
    pub fn join_all<I: IntoIterator<Item = Ty>>(iter: I) -> Ty {
        let mut acc = Ty::Bottom;
        for ty in iter {
            acc = acc.join(&ty);
        }
        acc
    }

    /// Build a normalized union from arbitrary member types.
    pub fn union_of<I: IntoIterator<Item = Ty>>(members: I) -> Ty {
        let mut atoms = Vec::new();
        let mut nullable = false;
        for member in members {
            member.collect_atoms(&mut atoms, &mut nullable);
        }
        Ty::from_atoms(atoms, nullable)
    }

    /// The result type of awaiting a value of this type.
    ///
    /// `Awaitable<T>` unwraps to `T`; awaiting anything else is the identity
    /// (the runtime would coerce, the analysis does not care). Unions unwrap
    /// member-wise.
    pub fn unwrap_awaited(&self) -> Ty {
        match self {
            Ty::Awaitable(inner) => (**inner).clone(),
            Ty::Nullable(inner) => Ty::nullable(inner.unwrap_awaited()),
            Ty::Union(members) => Ty::union_of(members.iter().map(Ty::unwrap_awaited)),
            other => other.clone(),
        }
    }

    /// Element type of a collection value; `Unknown` when the value is not
    /// known to be a collection.
    pub fn element(&self) -> Ty {
        match self {
            Ty::Collection(elem) => (**elem).clone(),
            Ty::Nullable(inner) => inner.element(),
            Ty::Union(members) => Ty::join_all(members.iter().map(Ty::element)),
            Ty::Bottom => Ty::Bottom,
            _ => Ty::Unknown,
        }
    }

    /// The non-null part of this type (`T | null` refines to `T` on the
    /// non-null branch of a null check).
    pub fn strip_null(&self) -> Ty {
        match self {
            Ty::Nullable(inner) => (**inner).clone(),
            Ty::Prim(Prim::Null) => Ty::Bottom,
            other => other.clone(),
        }
    }

    /// Whether a value of this type is acceptable where `declared` is
    /// expected. `subclass_of(child, parent)` supplies the class hierarchy.
    ///
    /// `Unknown` and `Bottom` are compatible with everything — the engine
    /// never reports mismatches it cannot prove.
    pub fn compatible_with(
        &self,
        declared: &Ty,
        subclass_of: &dyn Fn(ClassId, ClassId) -> bool,
    ) -> bool {
        match (self, declared) {
            (Ty::Bottom, _) | (Ty::Unknown, _) | (_, Ty::Unknown) => true,
            (_, Ty::Bottom) => false,
            (Ty::Union(members), d) => members.iter().all(|m| m.compatible_with(d, subclass_of)),
            (Ty::Nullable(inner), d) => {
                d.admits_null() && inner.compatible_with(&d.strip_null(), subclass_of)
            }
            (Ty::Prim(Prim::Null), d) => d.admits_null(),
            (a, Ty::Nullable(inner)) => a.compatible_with(inner, subclass_of),
            (a, Ty::Union(members)) => members.iter().any(|m| a.compatible_with(m, subclass_of)),
            (Ty::Prim(a), Ty::Prim(b)) => a == b || (*a == Prim::Int && *b == Prim::Float),
            (Ty::Instance(a), Ty::Instance(b)) => a == b || subclass_of(*a, *b),
            (Ty::Collection(a), Ty::Collection(b)) => a.compatible_with(b, subclass_of),
            (Ty::Awaitable(a), Ty::Awaitable(b)) => a.compatible_with(b, subclass_of),
            _ => false,
        }
    }

    /// Decompose into non-null atoms, tracking nullability separately.
    fn collect_atoms(&self, atoms: &mut Vec<Ty>, nullable: &mut bool) {
        match self {
            Ty::Bottom => {}
            Ty::Prim(Prim::Null) => *nullable = true,
            Ty::Nullable(inner) => {
                *nullable = true;
                inner.collect_atoms(atoms, nullable);
            }
            Ty::Union(members) => {
                for member in members {
                    member.collect_atoms(atoms, nullable);
                }
            }
            other => atoms.push(other.clone()),
        }
    }

    /// Rebuild a normal-form type from atoms.
    fn from_atoms(atoms: Vec<Ty>, nullable: bool) -> Ty {
        let mut merged: Vec<Ty> = Vec::new();
        for atom in atoms {
            if atom.is_unknown() {
                return Ty::Unknown;
            }
            // Collections and awaitables merge covariantly instead of
            // widening the union.
            match atom {
                Ty::Collection(elem) => {
                    if let Some(Ty::Collection(existing)) =
                        merged.iter_mut().find(|m| matches!(m, Ty::Collection(_)))
                    {
                        **existing = existing.join(&elem);
                        continue;
                    }
                    merged.push(Ty::Collection(elem));
                }
                Ty::Awaitable(inner) => {
                    if let Some(Ty::Awaitable(existing)) =
                        merged.iter_mut().find(|m| matches!(m, Ty::Awaitable(_)))
                    {
                        **existing = existing.join(&inner);
                        continue;
                    }
                    merged.push(Ty::Awaitable(inner));
                }
                other => {
                    if !merged.contains(&other) {
                        merged.push(other);
                    }
                }
            }
        }

        if merged.len() > MAX_UNION_WIDTH {
            return Ty::Unknown;
        }

        let base = match merged.len() {
            0 => {
                return if nullable { Ty::Prim(Prim::Null) } else { Ty::Bottom };
            }
            1 => merged.pop().expect("len checked"),
            _ => Ty::Union(merged),
        };

        if nullable {
            Ty::nullable(base)
        } else {
            base
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Bottom => write!(f, "nothing"),
            Ty::Prim(p) => write!(f, "{p}"),
            Ty::Instance(c) => write!(f, "instance#{}", c.0),
            Ty::Collection(elem) => write!(f, "vec<{elem}>"),
            Ty::Awaitable(inner) => write!(f, "awaitable<{inner}>"),
            Ty::Nullable(inner) => write!(f, "?{inner}"),
            Ty::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{member}")?;
                }
                Ok(())
            }
            Ty::Unknown => write!(f, "mixed"),
        }
    }
}
