//! Static checks run on a parsed program before any of it executes.

use tracing::warn;

use super::ast::{Comprehension, Expr, FStringPart, Program, Stmt, StmtKind, Target};
use crate::error::{Error, Result};

/// Modules agent code is known to reach for to escape the sandbox. Every
/// import is rejected; these are named as denylisted and logged.
pub const BLOCKED_MODULES: &[&str] = &[
    "os", "sys", "subprocess", "socket", "urllib", "http", "ftplib", "smtplib", "telnetlib",
    "poplib", "imaplib", "nntplib", "ssl", "email", "xmlrpc", "multiprocessing", "ctypes", "cffi",
    "mmap", "resource", "posix", "nt", "pwd", "grp", "spwd", "crypt", "termios", "tty", "pty",
    "fcntl", "msvcrt", "winreg", "_winapi", "select", "selectors",
];

/// Names that may never be referenced, called or not.
pub const FORBIDDEN_NAMES: &[&str] = &["eval", "exec", "compile", "__import__", "open"];

/// Names bound by the host for every session.
pub const HOST_PRIMITIVES: &[&str] = &[
    "read_chunk",
    "search_chunks",
    "list_chunks_by_tag",
    "get_linked_chunks",
    "llm_query",
    "FINAL",
];

/// Whether `module` (or its top-level package) is on the denylist.
pub fn is_blocked_module(module: &str) -> bool {
    let root = module.split('.').next().unwrap_or(module);
    BLOCKED_MODULES.contains(&root)
}

/// Reject the first disallowed construct in `program`.
pub fn check(program: &Program) -> Result<()> {
    match program {
        Program::Expression(expr) => check_expr(expr),
        Program::Statements(stmts) => check_block(stmts),
    }
}

fn violation(message: String) -> Result<()> {
    Err(Error::sandbox_violation(message))
}

fn reject_import(module: &str, from: bool) -> Result<()> {
    if is_blocked_module(module) {
        warn!(module, "Denylisted import in agent code");
        return violation(format!(
            "Import of denylisted module '{}' is not allowed",
            module
        ));
    }
    let kind = if from { "Import from" } else { "Import of" };
    violation(format!("{} '{}' is not allowed", kind, module))
}

fn check_block(stmts: &[Stmt]) -> Result<()> {
    stmts.iter().try_for_each(check_stmt)
}

fn check_stmt(stmt: &Stmt) -> Result<()> {
    match &stmt.kind {
        StmtKind::Import { modules } => {
            let module = modules
                .iter()
                .find(|m| is_blocked_module(m))
                .or_else(|| modules.first());
            match module {
                Some(module) => reject_import(module, false),
                None => Ok(()),
            }
        }
        StmtKind::ImportFrom { module } => reject_import(module, true),
        StmtKind::Expr(expr) => check_expr(expr),
        StmtKind::Assign { targets, value } => {
            targets.iter().try_for_each(check_target)?;
            check_expr(value)
        }
        StmtKind::AugAssign { target, value, .. } => {
            check_target(target)?;
            check_expr(value)
        }
        StmtKind::If { branches, orelse } => {
            for (test, body) in branches {
                check_expr(test)?;
                check_block(body)?;
            }
            check_block(orelse)
        }
        StmtKind::For { target, iter, body } => {
            check_target(target)?;
            check_expr(iter)?;
            check_block(body)
        }
        StmtKind::Pass | StmtKind::Break | StmtKind::Continue => Ok(()),
    }
}

fn check_binding(name: &str) -> Result<()> {
    if HOST_PRIMITIVES.contains(&name) {
        return violation(format!("Cannot rebind host primitive '{}'", name));
    }
    check_name(name)
}

fn check_target(target: &Target) -> Result<()> {
    match target {
        Target::Name(name) => check_binding(name),
        Target::Tuple(items) => items.iter().try_for_each(check_target),
        Target::Subscript { value, index } => {
            check_expr(value)?;
            check_expr(index)
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    if FORBIDDEN_NAMES.contains(&name) {
        return violation(format!("Use of '{}()' is not allowed", name));
    }
    if name.starts_with("__") {
        return violation(format!("Access to '{}' is not allowed", name));
    }
    Ok(())
}

fn check_clause(clause: &Comprehension) -> Result<()> {
    check_expr(&clause.iter)?;
    check_target(&clause.target)?;
    clause.conditions.iter().try_for_each(check_expr)
}

fn check_expr(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Name(name) => check_name(name),
        Expr::FString(parts) => parts.iter().try_for_each(|part| match part {
            FStringPart::Literal(_) => Ok(()),
            FStringPart::Expr { expr, .. } => check_expr(expr),
        }),
        Expr::List(items) | Expr::Tuple(items) => items.iter().try_for_each(check_expr),
        Expr::Dict(pairs) => pairs.iter().try_for_each(|(k, v)| {
            check_expr(k)?;
            check_expr(v)
        }),
        Expr::Unary { operand, .. } => check_expr(operand),
        Expr::Binary { left, right, .. } | Expr::Bool { left, right, .. } => {
            check_expr(left)?;
            check_expr(right)
        }
        Expr::Compare { left, ops } => {
            check_expr(left)?;
            ops.iter().try_for_each(|(_, e)| check_expr(e))
        }
        Expr::Call { func, args, kwargs } => {
            check_expr(func)?;
            args.iter().try_for_each(check_expr)?;
            kwargs.iter().try_for_each(|(_, e)| check_expr(e))
        }
        Expr::Attribute { value, attr } => {
            if attr.starts_with("__") {
                return violation(format!("Access to '{}' is not allowed", attr));
            }
            check_expr(value)
        }
        Expr::Subscript { value, index } => {
            check_expr(value)?;
            check_expr(index)
        }
        Expr::Slice {
            value,
            lower,
            upper,
        } => {
            check_expr(value)?;
            lower.iter().try_for_each(|e| check_expr(e))?;
            upper.iter().try_for_each(|e| check_expr(e))
        }
        Expr::IfExp { test, body, orelse } => {
            check_expr(test)?;
            check_expr(body)?;
            check_expr(orelse)
        }
        Expr::ListComp { elt, clause } => {
            check_clause(clause)?;
            check_expr(elt)
        }
        Expr::DictComp { key, value, clause } => {
            check_clause(clause)?;
            check_expr(key)?;
            check_expr(value)
        }
        Expr::Lambda { params, body } => {
            params.iter().try_for_each(|p| check_binding(p))?;
            check_expr(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::parser::parse_program;

    fn verdict(src: &str) -> Option<String> {
        match check(&parse_program(src).unwrap()) {
            Ok(()) => None,
            Err(Error::SandboxViolation { construct }) => Some(construct),
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_imports_rejected() {
        assert_eq!(
            verdict("x = 1\nif x:\n    import json\n").as_deref(),
            Some("Import of 'json' is not allowed")
        );
        assert_eq!(
            verdict("from collections import Counter").as_deref(),
            Some("Import from 'collections' is not allowed")
        );
    }

    #[test]
    fn test_denylisted_imports_are_named() {
        assert_eq!(
            verdict("import os").as_deref(),
            Some("Import of denylisted module 'os' is not allowed")
        );
        assert_eq!(
            verdict("from subprocess import run").as_deref(),
            Some("Import of denylisted module 'subprocess' is not allowed")
        );
        assert_eq!(
            verdict("import json, os.path").as_deref(),
            Some("Import of denylisted module 'os.path' is not allowed")
        );
    }

    #[test]
    fn test_forbidden_calls() {
        assert_eq!(
            verdict("eval('1+1')").as_deref(),
            Some("Use of 'eval()' is not allowed")
        );
        assert_eq!(
            verdict("f = open").as_deref(),
            Some("Use of 'open()' is not allowed")
        );
        assert_eq!(
            verdict("__import__('os')").as_deref(),
            Some("Use of '__import__()' is not allowed")
        );
    }

    #[test]
    fn test_dunder_access() {
        assert_eq!(
            verdict("x = ().__class__").as_deref(),
            Some("Access to '__class__' is not allowed")
        );
        assert_eq!(
            verdict("__builtins__").as_deref(),
            Some("Access to '__builtins__' is not allowed")
        );
    }

    #[test]
    fn test_host_primitives_cannot_be_rebound() {
        assert_eq!(
            verdict("FINAL = print").as_deref(),
            Some("Cannot rebind host primitive 'FINAL'")
        );
        assert_eq!(
            verdict("for llm_query in []:\n    pass\n").as_deref(),
            Some("Cannot rebind host primitive 'llm_query'")
        );
    }

    #[test]
    fn test_first_violation_wins() {
        assert_eq!(
            verdict("eval('x')\nimport os\n").as_deref(),
            Some("Use of 'eval()' is not allowed")
        );
    }

    #[test]
    fn test_clean_program_passes() {
        let src = "\
hits = search_chunks('editor', limit=3)
best = sorted(hits, key=lambda h: h['score'])[-1] if hits else None
FINAL(best['content'] if best else 'none')
";
        assert_eq!(verdict(src), None);
    }

    #[test]
    fn test_denylist_lookup() {
        assert!(is_blocked_module("os.path"));
        assert!(is_blocked_module("urllib"));
        assert!(!is_blocked_module("json"));
    }
}
