//! Static identifier search over compiled script functions.
//!
//! Nothing here evaluates code: the search walks the function's syntax tree.

use std::collections::HashSet;

use rhai::{ASTNode, Expr, FnPtr, Stmt, AST};

/// Name prefix the interpreter gives the functions it compiles closures into.
const CLOSURE_PREFIX: &str = "anon$";

/// Check whether any script function named `function` in `library` mentions
/// `identifier`.
///
/// A mention is a parameter, a variable read, a local declaration, a property
/// name, or the name of a called function or method. Closures defined inside
/// the function are searched too. Returns false when no script function has
/// that name.
pub fn function_references(library: &AST, function: &str, identifier: &str) -> bool {
    let mut pending = vec![function.to_owned()];
    let mut visited = HashSet::new();

    while let Some(name) = pending.pop() {
        if !visited.insert(name.clone()) {
            continue;
        }
        for def in library.iter_fn_def().filter(|def| def.name.as_str() == name) {
            if def.params.iter().any(|param| param.as_str() == identifier) {
                return true;
            }
            let mut found = false;
            let mut closures = Vec::new();
            let mut path = Vec::new();
            let mut on_node = |path: &[ASTNode]| {
                if let Some(node) = path.last() {
                    found |= mentions(node, identifier);
                    closures.extend(closure_name(node));
                }
                !found
            };
            for stmt in def.body.iter() {
                if !stmt.walk(&mut path, &mut on_node) {
                    break;
                }
            }
            if found {
                return true;
            }
            pending.extend(closures);
        }
    }
    false
}

/// Call `on_literal` with the field names of every record literal in `ast`,
/// in source order. Function bodies are included.
pub(crate) fn record_literals(ast: &AST, mut on_literal: impl FnMut(&[&str])) {
    ast.walk(&mut |path: &[ASTNode]| {
        if let Some(ASTNode::Expr(Expr::Map(map, ..))) = path.last() {
            let keys: Vec<&str> = map.0.iter().map(|(ident, _)| ident.name.as_str()).collect();
            on_literal(&keys);
        }
        true
    });
}

fn mentions(node: &ASTNode, identifier: &str) -> bool {
    match node {
        ASTNode::Expr(expr) => match expr {
            Expr::Variable(var, ..) => var.1.as_str() == identifier,
            Expr::Property(property, ..) => property.2.as_str() == identifier,
            Expr::FnCall(call, ..) | Expr::MethodCall(call, ..) => call.name.as_str() == identifier,
            _ => false,
        },
        ASTNode::Stmt(stmt) => match stmt {
            Stmt::Var(decl, ..) => decl.0.name.as_str() == identifier,
            Stmt::FnCall(call, ..) => call.name.as_str() == identifier,
            _ => false,
        },
        _ => false,
    }
}

/// The compiled function behind a closure expression.
fn closure_name(node: &ASTNode) -> Option<String> {
    let ASTNode::Expr(Expr::DynamicConstant(value, ..)) = node else {
        return None;
    };
    let fn_ptr = value.read_lock::<FnPtr>()?;
    let name = fn_ptr.fn_name();
    name.starts_with(CLOSURE_PREFIX).then(|| name.to_owned())
}
