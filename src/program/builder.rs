//! Lowering from the front-end tree to the normalized program graph.
//!
//! Bodies become CFGs here: structured `if`/`while` turn into branch blocks
//! and back edges, everything else flattens into block-local instructions.
//! Statements following a `return` land in a fresh block with no incoming
//! edge; the solver keeps such blocks at `Bottom`, which is exactly the
//! unreachable-code marker.

use rustc_hash::{FxHashMap, FxHashSet};

use super::ast::{self, Callee, Expr, StmtKind};
use super::cfg::{Block, BlockId, BlockKind, Cfg, CfgEdge, EdgeKind, Instr, InstrKind};
use super::types::{
    BuildIssue, ClassId, ClassInfo, FieldInfo, ParamInfo, Pos, ProgramGraph, Symbol, SymbolId,
};
use crate::error::{FlowError, Result};
use crate::ttype::Ty;

pub(crate) fn build(program: &ast::Program) -> Result<ProgramGraph> {
    let mut builder = GraphBuilder::default();
    builder.intern_classes(program)?;
    builder.intern_symbols(program);
    builder.link_overrides();
    builder.lower_bodies(program);
    Ok(builder.finish())
}

#[derive(Default)]
struct GraphBuilder {
    symbols: Vec<Symbol>,
    classes: Vec<ClassInfo>,
    cfgs: FxHashMap<SymbolId, Cfg>,
    functions_by_name: FxHashMap<String, SymbolId>,
    classes_by_name: FxHashMap<String, ClassId>,
    issues: Vec<BuildIssue>,
    /// Declarations in interning order, for the lowering pass.
    decl_order: Vec<(SymbolId, ast::FunctionDecl)>,
}

impl GraphBuilder {
    fn issue(&mut self, context: &str, pos: Pos, message: String) {
        self.issues.push(BuildIssue {
            context: context.to_string(),
            pos,
            message,
        });
    }

    // -------------------------------------------------------------------------
    // Classes
    // -------------------------------------------------------------------------

    fn intern_classes(&mut self, program: &ast::Program) -> Result<()> {
        for decl in &program.classes {
            if self.classes_by_name.contains_key(&decl.name) {
                self.issue(
                    &decl.name,
                    decl.pos,
                    format!("duplicate class `{}` ignored", decl.name),
                );
                continue;
            }
            let id = ClassId(self.classes.len() as u32);
            self.classes_by_name.insert(decl.name.clone(), id);
            let mut fields = FxHashMap::default();
            for field in &decl.fields {
                fields.insert(
                    field.name.clone(),
                    FieldInfo {
                        name: field.name.clone(),
                        declared_ty: field.ty.clone().unwrap_or(Ty::Unknown),
                        pos: field.pos,
                    },
                );
            }
            self.classes.push(ClassInfo {
                id,
                name: decl.name.clone(),
                parent: None,
                children: Vec::new(),
                is_abstract: decl.is_abstract,
                fields,
                methods: FxHashMap::default(),
                constructor: None,
                pos: decl.pos,
            });
        }

        // Link parents; a dangling parent name is recovered, a cycle is not.
        for decl in &program.classes {
            let Some(id) = self.classes_by_name.get(&decl.name).copied() else {
                continue;
            };
            if let Some(parent_name) = &decl.parent {
                match self.classes_by_name.get(parent_name).copied() {
                    Some(parent_id) => {
                        self.classes[id.0 as usize].parent = Some(parent_id);
                        self.classes[parent_id.0 as usize].children.push(id);
                    }
                    None => self.issue(
                        &decl.name,
                        decl.pos,
                        format!("unknown parent class `{parent_name}`"),
                    ),
                }
            }
        }

        // Cycle check: a parent chain longer than the class count repeats.
        for start in 0..self.classes.len() {
            let mut seen = FxHashSet::default();
            let mut cursor = Some(ClassId(start as u32));
            while let Some(id) = cursor {
                if !seen.insert(id) {
                    return Err(FlowError::MalformedProgram(format!(
                        "cycle in class hierarchy involving `{}`",
                        self.classes[id.0 as usize].name
                    )));
                }
                cursor = self.classes[id.0 as usize].parent;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------------

    fn add_symbol(&mut self, decl: &ast::FunctionDecl, class: Option<ClassId>) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        let fq_name = match class {
            Some(cid) => format!("{}::{}", self.classes[cid.0 as usize].name, decl.name),
            None => decl.name.clone(),
        };
        self.symbols.push(Symbol {
            id,
            name: decl.name.clone(),
            fq_name,
            class,
            params: decl
                .params
                .iter()
                .map(|p| ParamInfo {
                    name: p.name.clone(),
                    ty: p.ty.clone().unwrap_or(Ty::Unknown),
                })
                .collect(),
            ret_hint: decl.ret.clone(),
            is_async: decl.is_async,
            is_abstract: decl.is_abstract,
            is_constructor: decl.is_constructor,
            is_static: decl.is_static,
            overrides: None,
            pos: decl.pos,
        });
        self.decl_order.push((id, decl.clone()));
        id
    }

    fn intern_symbols(&mut self, program: &ast::Program) {
        for decl in &program.functions {
            if self.functions_by_name.contains_key(&decl.name) {
                self.issue(
                    &decl.name,
                    decl.pos,
                    format!("duplicate function `{}` ignored", decl.name),
                );
                continue;
            }
            let id = self.add_symbol(decl, None);
            self.functions_by_name.insert(decl.name.clone(), id);
        }

        for class_decl in &program.classes {
            let Some(cid) = self.classes_by_name.get(&class_decl.name).copied() else {
                continue;
            };
            for method in &class_decl.methods {
                if method.is_constructor {
                    if self.classes[cid.0 as usize].constructor.is_some() {
                        self.issue(
                            &class_decl.name,
                            method.pos,
                            "duplicate constructor ignored".to_string(),
                        );
                        continue;
                    }
                    let id = self.add_symbol(method, Some(cid));
                    self.classes[cid.0 as usize].constructor = Some(id);
                } else {
                    if self.classes[cid.0 as usize].methods.contains_key(&method.name) {
                        self.issue(
                            &class_decl.name,
                            method.pos,
                            format!("duplicate method `{}` ignored", method.name),
                        );
                        continue;
                    }
                    let id = self.add_symbol(method, Some(cid));
                    self.classes[cid.0 as usize]
                        .methods
                        .insert(method.name.clone(), id);
                }
            }
        }
    }

    fn link_overrides(&mut self) {
        let mut links = Vec::new();
        for symbol in &self.symbols {
            let (Some(cid), false) = (symbol.class, symbol.is_constructor) else {
                continue;
            };
            let mut cursor = self.classes[cid.0 as usize].parent;
            while let Some(ancestor) = cursor {
                if let Some(&overridden) = self.classes[ancestor.0 as usize].methods.get(&symbol.name)
                {
                    links.push((symbol.id, overridden));
                    break;
                }
                cursor = self.classes[ancestor.0 as usize].parent;
            }
        }
        for (id, overridden) in links {
            self.symbols[id.0 as usize].overrides = Some(overridden);
        }
    }

    // -------------------------------------------------------------------------
    // Body lowering
    // -------------------------------------------------------------------------

    fn lower_bodies(&mut self, _program: &ast::Program) {
        let decls = std::mem::take(&mut self.decl_order);
        for (id, decl) in &decls {
            if decl.is_abstract {
                continue;
            }
            let cfg = lower_body(decl);
            debug_assert!(cfg.validate().is_ok());
            self.cfgs.insert(*id, cfg);
        }
        self.decl_order = decls;
    }

    fn finish(self) -> ProgramGraph {
        ProgramGraph::from_parts(
            self.symbols,
            self.classes,
            self.cfgs,
            self.functions_by_name,
            self.classes_by_name,
            self.issues,
        )
    }
}

// =============================================================================
// CFG lowering
// =============================================================================

struct Lowering {
    blocks: Vec<Block>,
    edges: Vec<CfgEdge>,
    exit: BlockId,
    await_points: usize,
}

impl Lowering {
    fn new_block(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            kind,
            instrs: Vec::new(),
            branch: None,
            branch_pos: None,
        });
        id
    }

    fn edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        self.edges.push(CfgEdge { from, to, kind });
    }

    fn push_instr(&mut self, block: BlockId, kind: InstrKind, pos: Pos) {
        self.blocks[block.0 as usize].instrs.push(Instr { kind, pos });
    }

    /// Lower a statement list into `cur`, returning the block where control
    /// continues. After a `return`, a fresh unreachable block is opened so
    /// trailing code still lowers (and stays at `Bottom` during solving).
    fn lower_stmts(&mut self, stmts: &[ast::Stmt], mut cur: BlockId) -> BlockId {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Assign { local, value } => {
                    self.await_points += count_awaits(value);
                    self.push_instr(
                        cur,
                        InstrKind::Assign {
                            local: local.clone(),
                            value: value.clone(),
                        },
                        stmt.pos,
                    );
                }
                StmtKind::FieldSet { obj, field, value } => {
                    self.await_points += count_awaits(obj) + count_awaits(value);
                    self.push_instr(
                        cur,
                        InstrKind::FieldSet {
                            obj: obj.clone(),
                            field: field.clone(),
                            value: value.clone(),
                        },
                        stmt.pos,
                    );
                }
                StmtKind::Expr(expr) => {
                    self.await_points += count_awaits(expr);
                    self.push_instr(cur, InstrKind::Eval(expr.clone()), stmt.pos);
                }
                StmtKind::Return(value) => {
                    if let Some(v) = value {
                        self.await_points += count_awaits(v);
                    }
                    self.push_instr(cur, InstrKind::Return(value.clone()), stmt.pos);
                    self.edge(cur, self.exit, EdgeKind::Return);
                    cur = self.new_block(BlockKind::Body);
                }
                StmtKind::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.await_points += count_awaits(cond);
                    {
                        let block = &mut self.blocks[cur.0 as usize];
                        block.kind = BlockKind::Branch;
                        block.branch = Some(cond.clone());
                        block.branch_pos = Some(stmt.pos);
                    }
                    let then_block = self.new_block(BlockKind::Body);
                    let else_block = self.new_block(BlockKind::Body);
                    self.edge(cur, then_block, EdgeKind::True);
                    self.edge(cur, else_block, EdgeKind::False);

                    let then_end = self.lower_stmts(then_body, then_block);
                    let else_end = self.lower_stmts(else_body, else_block);

                    let merge = self.new_block(BlockKind::Body);
                    self.edge(then_end, merge, EdgeKind::Seq);
                    self.edge(else_end, merge, EdgeKind::Seq);
                    cur = merge;
                }
                StmtKind::While { cond, body } => {
                    self.await_points += count_awaits(cond);
                    let header = self.new_block(BlockKind::LoopHeader);
                    {
                        let block = &mut self.blocks[header.0 as usize];
                        block.branch = Some(cond.clone());
                        block.branch_pos = Some(stmt.pos);
                    }
                    self.edge(cur, header, EdgeKind::Seq);

                    let body_block = self.new_block(BlockKind::Body);
                    let after = self.new_block(BlockKind::Body);
                    self.edge(header, body_block, EdgeKind::True);
                    self.edge(header, after, EdgeKind::False);

                    let body_end = self.lower_stmts(body, body_block);
                    self.edge(body_end, header, EdgeKind::Back);
                    cur = after;
                }
            }
        }
        cur
    }
}

fn lower_body(decl: &ast::FunctionDecl) -> Cfg {
    let mut lowering = Lowering {
        blocks: Vec::new(),
        edges: Vec::new(),
        exit: BlockId(0),
        await_points: 0,
    };
    let entry = lowering.new_block(BlockKind::Entry);
    let exit = lowering.new_block(BlockKind::Exit);
    lowering.exit = exit;

    let first = lowering.new_block(BlockKind::Body);
    lowering.edge(entry, first, EdgeKind::Seq);
    let last = lowering.lower_stmts(&decl.body, first);
    lowering.edge(last, exit, EdgeKind::Seq);

    lowering.blocks[exit.0 as usize].kind = BlockKind::Exit;
    Cfg::new(
        lowering.blocks,
        lowering.edges,
        entry,
        exit,
        decl.is_async,
        lowering.await_points,
    )
}

/// Count `await` suspension points in an expression tree.
fn count_awaits(expr: &Expr) -> usize {
    match expr {
        Expr::Await(inner) => 1 + count_awaits(inner),
        Expr::FieldGet { obj, .. } => count_awaits(obj),
        Expr::Call { callee, args } => {
            let mut n = args.iter().map(count_awaits).sum::<usize>();
            if let Callee::Method { recv, .. } = callee {
                n += count_awaits(recv);
            }
            n
        }
        Expr::New { args, .. } => args.iter().map(count_awaits).sum(),
        Expr::CollectionLit(elems) => elems.iter().map(count_awaits).sum(),
        Expr::CollectionMap { recv, .. } => count_awaits(recv),
        Expr::Binary { lhs, rhs, .. } => count_awaits(lhs) + count_awaits(rhs),
        Expr::Unary { expr, .. } => count_awaits(expr),
        Expr::This | Expr::Local(_) | Expr::Literal(_) | Expr::Superglobal(_) => 0,
    }
}
