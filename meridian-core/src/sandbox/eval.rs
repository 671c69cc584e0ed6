//! Tree-walking interpreter for policy-checked programs.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::ast::{BoolOp, CmpOp, Comprehension, Expr, FStringPart, Program, Stmt, StmtKind, Target};
use super::builtins::{self, Args, BUILTINS};
use super::policy::HOST_PRIMITIVES;
use super::value::{
    as_int, binary, check_depth, check_len, compare, contains, equals, format_with_spec, iterate,
    normalize_index, repr, slice, subscript, to_str, truthy, type_error, type_name, unary,
    value_error, MAX_DEPTH,
};
use crate::error::{Error, Result};

/// Script-visible variables.
pub type Namespace = BTreeMap<String, Value>;

/// What the interpreter needs from whoever runs it.
pub trait Effects {
    /// Dispatch one of [`HOST_PRIMITIVES`].
    fn call_primitive(&mut self, name: &str, args: Args) -> Result<Value>;

    fn print(&mut self, line: String);

    /// Fails once the wall-clock budget is spent.
    fn check_deadline(&self) -> Result<()>;

    fn max_range(&self) -> usize;
}

enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interpreter<'a, E: Effects> {
    globals: &'a mut Namespace,
    /// Comprehension and lambda scopes, innermost last.
    locals: Vec<Namespace>,
    effects: &'a mut E,
}

fn at_line(err: Error, line: usize) -> Error {
    match err {
        Error::Script(msg) if !msg.starts_with("line ") => {
            Error::Script(format!("line {}: {}", line, msg))
        }
        other => other,
    }
}

fn name_error(name: &str) -> Error {
    Error::script(format!("NameError: name '{}' is not defined", name))
}

fn dict_key(key: Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s),
        other => Err(type_error(format!(
            "dict keys must be strings, not '{}'",
            type_name(&other)
        ))),
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null | Value::Bool(_), _) | (_, Value::Null | Value::Bool(_)) => false,
        _ => type_name(a) == type_name(b) && equals(a, b),
    }
}

fn compare_op(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    use std::cmp::Ordering::{Greater, Less};
    Ok(match op {
        CmpOp::Eq => equals(left, right),
        CmpOp::NotEq => !equals(left, right),
        CmpOp::Lt => compare(left, right)? == Less,
        CmpOp::LtE => compare(left, right)? != Greater,
        CmpOp::Gt => compare(left, right)? == Greater,
        CmpOp::GtE => compare(left, right)? != Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
    })
}

fn child_mut<'v>(container: &'v mut Value, key: &Value) -> Result<&'v mut Value> {
    match container {
        Value::Array(items) => {
            let i = as_int(key, "list indices")?;
            let idx = normalize_index(items.len(), i)
                .ok_or_else(|| Error::script("IndexError: list index out of range"))?;
            Ok(&mut items[idx])
        }
        Value::Object(map) => match key {
            Value::String(k) => map
                .get_mut(k)
                .ok_or_else(|| Error::script(format!("KeyError: {}", repr(key)))),
            other => Err(Error::script(format!("KeyError: {}", repr(other)))),
        },
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

/// How deep a value stored one level below `path` may nest.
fn item_depth_limit(path: &[Value]) -> usize {
    MAX_DEPTH.saturating_sub(path.len() + 1)
}

fn store_item(container: &mut Value, key: Value, item: Value) -> Result<()> {
    match container {
        Value::Array(items) => {
            let i = as_int(&key, "list indices")?;
            let idx = normalize_index(items.len(), i)
                .ok_or_else(|| Error::script("IndexError: list assignment index out of range"))?;
            items[idx] = item;
            Ok(())
        }
        Value::Object(map) => {
            map.insert(dict_key(key)?, item);
            Ok(())
        }
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            type_name(other)
        ))),
    }
}

impl<'a, E: Effects> Interpreter<'a, E> {
    pub fn new(globals: &'a mut Namespace, effects: &'a mut E) -> Self {
        Self {
            globals,
            locals: Vec::new(),
            effects,
        }
    }

    /// Run a program. An expression program yields its value, statements
    /// yield null.
    pub fn run(&mut self, program: &Program) -> Result<Value> {
        match program {
            Program::Expression(expr) => self.eval(expr).map_err(|e| at_line(e, 1)),
            Program::Statements(stmts) => match self.exec_block(stmts)? {
                Flow::Normal => Ok(Value::Null),
                Flow::Break => Err(Error::script("SyntaxError: 'break' outside loop")),
                Flow::Continue => Err(Error::script(
                    "SyntaxError: 'continue' not properly in loop",
                )),
            },
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.locals.iter().any(|scope| scope.contains_key(name)) || self.globals.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        for scope in self.locals.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if BUILTINS.contains(&name) || HOST_PRIMITIVES.contains(&name) {
            return Err(type_error(format!(
                "'{}' is a function and can only be called",
                name
            )));
        }
        Err(name_error(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Result<&mut Value> {
        for scope in self.locals.iter_mut().rev() {
            if let Some(value) = scope.get_mut(name) {
                return Ok(value);
            }
        }
        self.globals.get_mut(name).ok_or_else(|| name_error(name))
    }

    fn assign_name(&mut self, name: &str, value: Value) {
        match self.locals.last_mut() {
            Some(scope) => scope.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    // Statements

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            self.effects.check_deadline()?;
            let flow = self.exec(stmt).map_err(|e| at_line(e, stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.bind(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.aug_assign(target, *op, value)?;
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if truthy(&self.eval(test)?) {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                let items = iterate(&self.eval(iter)?)?;
                for item in items {
                    self.effects.check_deadline()?;
                    self.bind(target, item)?;
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Import { modules } => {
                let module = modules.first().map(String::as_str).unwrap_or_default();
                return Err(Error::sandbox_violation(format!(
                    "Import of '{}' is not allowed",
                    module
                )));
            }
            StmtKind::ImportFrom { module } => {
                return Err(Error::sandbox_violation(format!(
                    "Import from '{}' is not allowed",
                    module
                )));
            }
        }
        Ok(Flow::Normal)
    }

    fn bind(&mut self, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => {
                check_depth(&value, MAX_DEPTH)?;
                self.assign_name(name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = iterate(&value)?;
                if items.len() > targets.len() {
                    return Err(value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.bind(target, item)?;
                }
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let (root, path) = self.resolve_path(container)?;
                let key = self.eval(index)?;
                check_depth(&value, item_depth_limit(&path))?;
                let parent = self.place(&root, &path)?;
                store_item(parent, key, value)
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: super::ast::BinOp, value: &Expr) -> Result<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = binary(op, &current, &rhs)?;
                check_depth(&updated, MAX_DEPTH)?;
                self.assign_name(name, updated);
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let (root, path) = self.resolve_path(container)?;
                let key = self.eval(index)?;
                let rhs = self.eval(value)?;
                let parent = self.place(&root, &path)?;
                let current = subscript(parent, &key)?;
                let updated = binary(op, &current, &rhs)?;
                check_depth(&updated, item_depth_limit(&path))?;
                store_item(parent, key, updated)
            }
            Target::Tuple(_) => Err(Error::script(
                "SyntaxError: illegal expression for augmented assignment",
            )),
        }
    }

    /// Split `a[k1][k2]` into the root name and evaluated keys.
    fn resolve_path(&mut self, expr: &Expr) -> Result<(String, Vec<Value>)> {
        match expr {
            Expr::Name(name) => Ok((name.clone(), Vec::new())),
            Expr::Subscript { value, index } => {
                let (root, mut path) = self.resolve_path(value)?;
                path.push(self.eval(index)?);
                Ok((root, path))
            }
            _ => Err(type_error("can only assign into items of named values")),
        }
    }

    fn place(&mut self, root: &str, path: &[Value]) -> Result<&mut Value> {
        let mut current = self.lookup_mut(root)?;
        for key in path {
            current = child_mut(current, key)?;
        }
        Ok(current)
    }

    fn is_place(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Name(name) => self.is_bound(name),
            Expr::Subscript { value, .. } => self.is_place(value),
            _ => false,
        }
    }

    // Expressions

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr { expr, spec } => {
                            let value = self.eval(expr)?;
                            match spec {
                                Some(spec) => out.push_str(&format_with_spec(&value, spec)?),
                                None => out.push_str(&to_str(&value)),
                            }
                        }
                    }
                }
                check_len(out.len())?;
                Ok(Value::String(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) | Expr::Tuple(items) => Ok(Value::Array(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut map = Map::new();
                for (key, value) in pairs {
                    let key = dict_key(self.eval(key)?)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            }
            Expr::Unary { op, operand } => unary(*op, &self.eval(operand)?),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Bool { op, left, right } => {
                let left = self.eval(left)?;
                match (op, truthy(&left)) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Compare { left, ops } => {
                let mut left = self.eval(left)?;
                for (op, right) in ops {
                    let right = self.eval(right)?;
                    if !compare_op(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call { func, args, kwargs } => self.call(func, args, kwargs),
            Expr::Attribute { value, attr } => {
                let value = self.eval(value)?;
                Err(type_error(format!(
                    "'{}.{}' can only be called",
                    type_name(&value),
                    attr
                )))
            }
            Expr::Subscript { value, index } => {
                let value = self.eval(value)?;
                let index = self.eval(index)?;
                subscript(&value, &index)
            }
            Expr::Slice {
                value,
                lower,
                upper,
            } => {
                let value = self.eval(value)?;
                let lower = self.slice_bound(lower.as_deref())?;
                let upper = self.slice_bound(upper.as_deref())?;
                slice(&value, lower, upper)
            }
            Expr::IfExp { test, body, orelse } => {
                if truthy(&self.eval(test)?) {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::ListComp { elt, clause } => {
                let mut out = Vec::new();
                self.comprehend(clause, |this| {
                    out.push(this.eval(elt)?);
                    check_len(out.len())
                })?;
                Ok(Value::Array(out))
            }
            Expr::DictComp { key, value, clause } => {
                let mut map = Map::new();
                self.comprehend(clause, |this| {
                    let k = dict_key(this.eval(key)?)?;
                    let v = this.eval(value)?;
                    map.insert(k, v);
                    check_len(map.len())
                })?;
                Ok(Value::Object(map))
            }
            Expr::Lambda { .. } => Err(type_error(
                "lambda can only be used as the key= argument of sorted(), min() or max()",
            )),
        }
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> Result<Option<i64>> {
        match bound {
            None => Ok(None),
            Some(expr) => match self.eval(expr)? {
                Value::Null => Ok(None),
                value => as_int(&value, "slice indices").map(Some),
            },
        }
    }

    /// Run `body` once per item that passes every condition, in a fresh
    /// scope so the loop variable does not leak.
    fn comprehend<F>(&mut self, clause: &Comprehension, mut body: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        let items = iterate(&self.eval(&clause.iter)?)?;
        self.locals.push(Namespace::new());
        let result = self.comprehend_items(clause, items, &mut body);
        self.locals.pop();
        result
    }

    fn comprehend_items<F>(&mut self, clause: &Comprehension, items: Vec<Value>, body: &mut F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        'items: for item in items {
            self.effects.check_deadline()?;
            self.bind(&clause.target, item)?;
            for condition in &clause.conditions {
                if !truthy(&self.eval(condition)?) {
                    continue 'items;
                }
            }
            body(self)?;
        }
        Ok(())
    }

    // Calls

    fn eval_args(&mut self, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<Args> {
        let positional = self.eval_all(args)?;
        let mut keywords = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            keywords.push((name.clone(), self.eval(expr)?));
        }
        Ok(Args::new(positional, keywords))
    }

    fn call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<Value> {
        match func {
            Expr::Name(name) if !self.is_bound(name) => self.call_function(name, args, kwargs),
            Expr::Attribute { value, attr } => self.call_method(value, attr, args, kwargs),
            other => {
                let value = self.eval(other)?;
                Err(type_error(format!(
                    "'{}' object is not callable",
                    type_name(&value)
                )))
            }
        }
    }

    fn call_function(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value> {
        match name {
            "sorted" | "min" | "max" => self.call_ordering(name, args, kwargs),
            "print" => {
                let mut args = self.eval_args(args, kwargs)?;
                let sep = args
                    .take_keyword("sep")
                    .map(|v| to_str(&v))
                    .unwrap_or_else(|| " ".to_string());
                args.check("print", 0, usize::MAX)?;
                let line: Vec<String> = args.positional.iter().map(to_str).collect();
                self.effects.print(line.join(&sep));
                Ok(Value::Null)
            }
            n if HOST_PRIMITIVES.contains(&n) => {
                let args = self.eval_args(args, kwargs)?;
                self.effects.call_primitive(n, args)
            }
            n if BUILTINS.contains(&n) => {
                let args = self.eval_args(args, kwargs)?;
                builtins::call_builtin(n, args, self.effects.max_range())
            }
            n => Err(name_error(n)),
        }
    }

    fn call_ordering(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value> {
        let key_fn = kwargs.iter().find(|(k, _)| k == "key").map(|(_, e)| e);
        let positional = self.eval_all(args)?;
        let mut keywords = Vec::new();
        for (k, e) in kwargs.iter().filter(|(k, _)| k != "key") {
            keywords.push((k.clone(), self.eval(e)?));
        }
        let mut args = Args::new(positional, keywords);

        if name == "sorted" {
            let reverse = args.take_keyword("reverse").is_some_and(|v| truthy(&v));
            args.check(name, 1, 1)?;
            let items = iterate(&args.positional[0])?;
            let keys = self.keys_for(&items, key_fn)?;
            return Ok(Value::Array(builtins::sort_by_keys(items, keys, reverse)?));
        }

        let default = args.take_keyword("default");
        args.check(name, 1, usize::MAX)?;
        let items = if args.positional.len() == 1 {
            iterate(&args.positional[0])?
        } else {
            std::mem::take(&mut args.positional)
        };
        if items.is_empty() {
            return default
                .ok_or_else(|| value_error(format!("{}() arg is an empty sequence", name)));
        }
        let keys = self.keys_for(&items, key_fn)?;
        let idx = builtins::extreme_index(&keys, name == "max")?.unwrap_or(0);
        Ok(items[idx].clone())
    }

    /// Sort keys for `items` under an optional `key=` argument.
    fn keys_for(&mut self, items: &[Value], key_fn: Option<&Expr>) -> Result<Vec<Value>> {
        match key_fn {
            None => Ok(items.to_vec()),
            Some(Expr::Lambda { params, body }) => {
                let [param] = params.as_slice() else {
                    return Err(type_error("key function must take exactly one argument"));
                };
                self.locals.push(Namespace::new());
                let result = self.apply_lambda(param, body, items);
                self.locals.pop();
                result
            }
            Some(Expr::Name(name))
                if !self.is_bound(name)
                    && BUILTINS.contains(&name.as_str())
                    && !matches!(name.as_str(), "sorted" | "min" | "max" | "print") =>
            {
                let max_range = self.effects.max_range();
                items
                    .iter()
                    .map(|item| {
                        builtins::call_builtin(name, Args::new(vec![item.clone()], Vec::new()), max_range)
                    })
                    .collect()
            }
            Some(_) => Err(type_error("key must be a lambda or a builtin function")),
        }
    }

    fn apply_lambda(&mut self, param: &str, body: &Expr, items: &[Value]) -> Result<Vec<Value>> {
        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            self.effects.check_deadline()?;
            self.assign_name(param, item.clone());
            keys.push(self.eval(body)?);
        }
        Ok(keys)
    }

    fn call_method(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value> {
        if method == "sort" && kwargs.iter().any(|(k, _)| k == "key") {
            return self.sort_in_place(receiver, args, kwargs);
        }
        if self.is_place(receiver) {
            let (root, path) = self.resolve_path(receiver)?;
            let args = self.eval_args(args, kwargs)?;
            let limit = item_depth_limit(&path);
            for arg in args.positional.iter().chain(args.keywords.iter().map(|(_, v)| v)) {
                check_depth(arg, limit)?;
            }
            let target = self.place(&root, &path)?;
            builtins::call_method(target, method, args)
        } else {
            let mut value = self.eval(receiver)?;
            let args = self.eval_args(args, kwargs)?;
            builtins::call_method(&mut value, method, args)
        }
    }

    /// `list.sort(key=...)`.
    fn sort_in_place(
        &mut self,
        receiver: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value> {
        if !args.is_empty() {
            return Err(type_error("sort() takes no positional arguments"));
        }
        let key_fn = kwargs.iter().find(|(k, _)| k == "key").map(|(_, e)| e);
        let mut reverse = false;
        for (k, e) in kwargs.iter().filter(|(k, _)| k != "key") {
            if k != "reverse" {
                return Err(type_error(format!(
                    "sort() got an unexpected keyword argument '{}'",
                    k
                )));
            }
            reverse = truthy(&self.eval(e)?);
        }
        let items = match self.eval(receiver)? {
            Value::Array(items) => items,
            other => {
                return Err(Error::script(format!(
                    "AttributeError: '{}' object has no attribute 'sort'",
                    type_name(&other)
                )))
            }
        };
        let keys = self.keys_for(&items, key_fn)?;
        let sorted = builtins::sort_by_keys(items, keys, reverse)?;
        if self.is_place(receiver) {
            let (root, path) = self.resolve_path(receiver)?;
            *self.place(&root, &path)? = Value::Array(sorted);
        }
        Ok(Value::Null)
    }
}
