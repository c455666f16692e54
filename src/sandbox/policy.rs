//! Capability policy
//!
//! Snippets can only reach the interpreter builtins and the Tool API, so a
//! denied capability is never actually callable. The policy exists to turn
//! an attempt into a precise `CapabilityDenied` error (instead of a vague
//! `NameError`) and to reject such snippets before a worker is spawned.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::script::ast::{walk_expr, walk_target, Expr, Program, Stmt, StmtKind, Target};

/// Named classes of operations snippets may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    DynamicEval,
    ProcessSpawn,
    FileOpen,
    Network,
    ModuleImport,
    Introspection,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::DynamicEval,
        Capability::ProcessSpawn,
        Capability::FileOpen,
        Capability::Network,
        Capability::ModuleImport,
        Capability::Introspection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::DynamicEval => "dynamic-eval",
            Capability::ProcessSpawn => "process-spawn",
            Capability::FileOpen => "file-open",
            Capability::Network => "network",
            Capability::ModuleImport => "module-import",
            Capability::Introspection => "introspection",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Which capability an identifier (or the root of a dotted module path) reaches for.
    pub fn classify(identifier: &str) -> Option<Self> {
        let root = identifier.split('.').next().unwrap_or(identifier);
        let cap = match root {
            "eval" | "exec" | "compile" => Capability::DynamicEval,
            "subprocess" | "system" | "popen" | "os" | "fork" | "spawn" | "multiprocessing"
            | "pty" | "signal" => Capability::ProcessSpawn,
            "open" | "io" | "pathlib" | "file" | "shutil" | "tempfile" | "glob" => Capability::FileOpen,
            "socket" | "urllib" | "requests" | "http" | "httpx" | "ssl" | "ftplib" => Capability::Network,
            "__import__" | "importlib" => Capability::ModuleImport,
            "globals" | "locals" | "vars" | "getattr" | "setattr" | "delattr" | "__builtins__"
            | "type" | "dir" | "inspect" | "sys" => Capability::Introspection,
            _ if root.starts_with("__") && root.ends_with("__") => Capability::Introspection,
            _ => return None,
        };
        Some(cap)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rejected attempt: which capability, through which identifier, on which line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub capability: Capability,
    pub identifier: String,
    pub line: usize,
}

/// The set of denied capabilities for one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityPolicy {
    denied: BTreeSet<Capability>,
}

impl CapabilityPolicy {
    pub fn new(denied: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
        }
    }

    pub fn deny_all() -> Self {
        Self::new(Capability::ALL)
    }

    pub fn denied(&self) -> impl Iterator<Item = Capability> + '_ {
        self.denied.iter().copied()
    }

    pub fn is_denied(&self, capability: Capability) -> bool {
        self.denied.contains(&capability)
    }

    /// Classify `identifier` and report it when its capability is denied.
    pub fn check(&self, identifier: &str) -> Option<Capability> {
        Capability::classify(identifier).filter(|c| self.is_denied(*c))
    }

    /// Static scan of a parsed snippet. Returns the first denied use in source order.
    ///
    /// Names the snippet binds itself (a variable called `file`, say) are not
    /// capability attempts and are skipped.
    pub fn scan(&self, program: &Program) -> Result<(), Denial> {
        let mut bound = BTreeSet::new();
        collect_bound(&program.body, &mut bound);
        self.scan_block(&program.body, &bound)
    }

    fn scan_block(&self, body: &[Stmt], bound: &BTreeSet<String>) -> Result<(), Denial> {
        for stmt in body {
            let mut exprs: Vec<&Expr> = Vec::new();
            let mut targets: Vec<&Target> = Vec::new();
            let mut blocks: Vec<&[Stmt]> = Vec::new();

            match &stmt.kind {
                StmtKind::Import { module } => {
                    if self.is_denied(Capability::ModuleImport) {
                        return Err(Denial {
                            capability: Capability::ModuleImport,
                            identifier: module.clone(),
                            line: stmt.line,
                        });
                    }
                    if let Some(capability) = self.check(module) {
                        return Err(Denial { capability, identifier: module.clone(), line: stmt.line });
                    }
                }
                StmtKind::Expr(e) => exprs.push(e),
                StmtKind::Assign { targets: t, value } => {
                    targets.extend(t);
                    exprs.push(value);
                }
                StmtKind::AugAssign { target, value, .. } => {
                    targets.push(target);
                    exprs.push(value);
                }
                StmtKind::If { branches, orelse } => {
                    for (cond, block) in branches {
                        exprs.push(cond);
                        blocks.push(block);
                    }
                    blocks.push(orelse);
                }
                StmtKind::For { target, iter, body } => {
                    targets.push(target);
                    exprs.push(iter);
                    blocks.push(body);
                }
                StmtKind::While { cond, body } => {
                    exprs.push(cond);
                    blocks.push(body);
                }
                StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
            }

            let mut found: Option<(Capability, String)> = None;
            let mut visit = |expr: &Expr| {
                if found.is_some() {
                    return;
                }
                let identifier = match expr {
                    Expr::Name(name) if !bound.contains(name) => name.as_str(),
                    Expr::Attr { name, .. } if name.starts_with("__") => name.as_str(),
                    _ => return,
                };
                if let Some(cap) = self.check(identifier) {
                    found = Some((cap, identifier.to_string()));
                }
            };
            for target in targets {
                walk_target(target, &mut visit);
            }
            for expr in exprs {
                walk_expr(expr, &mut visit);
            }

            if let Some((capability, identifier)) = found {
                return Err(Denial { capability, identifier, line: stmt.line });
            }

            for block in blocks {
                self.scan_block(block, bound)?;
            }
        }
        Ok(())
    }
}

fn collect_bound(body: &[Stmt], bound: &mut BTreeSet<String>) {
    fn target_names(target: &Target, bound: &mut BTreeSet<String>) {
        match target {
            Target::Name(n) => {
                bound.insert(n.clone());
            }
            Target::Tuple(items) => items.iter().for_each(|t| target_names(t, bound)),
            Target::Index { .. } => {}
        }
    }

    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                targets.iter().for_each(|t| target_names(t, bound));
                comprehension_names(value, bound);
            }
            StmtKind::AugAssign { target, .. } => target_names(target, bound),
            StmtKind::For { target, body, .. } => {
                target_names(target, bound);
                collect_bound(body, bound);
            }
            StmtKind::While { body, .. } => collect_bound(body, bound),
            StmtKind::If { branches, orelse } => {
                branches.iter().for_each(|(_, b)| collect_bound(b, bound));
                collect_bound(orelse, bound);
            }
            StmtKind::Expr(e) => comprehension_names(e, bound),
            _ => {}
        }
    }

    fn comprehension_names(expr: &Expr, bound: &mut BTreeSet<String>) {
        walk_expr(expr, &mut |e| {
            if let Expr::ListComp { generator, .. } = e {
                target_names(&generator.target, bound);
            }
        });
    }
}
