//! Recursive-descent parser for agent scripts.

use serde_json::{Number, Value};

use super::ast::{
    BinOp, BoolOp, CmpOp, Comprehension, Expr, FStringPart, Program, Stmt, StmtKind, Target,
    UnaryOp,
};
use super::lexer::{tokenize, Tok, Token};
use crate::error::{Error, Result};

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const UNSUPPORTED_STATEMENTS: &[&str] = &[
    "def", "class", "while", "return", "try", "except", "finally", "with", "del", "global",
    "nonlocal", "raise", "yield", "assert", "async", "await",
];

const AUG_OPS: &[(&str, BinOp)] = &[
    ("+=", BinOp::Add),
    ("-=", BinOp::Sub),
    ("*=", BinOp::Mul),
    ("/=", BinOp::Div),
    ("//=", BinOp::FloorDiv),
    ("%=", BinOp::Mod),
    ("**=", BinOp::Pow),
];

/// Parse a submission. A lone expression yields [`Program::Expression`];
/// anything else is parsed as a statement list.
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    if let Ok(expr) = Parser::new(tokens.clone()).expression_only() {
        return Ok(Program::Expression(expr));
    }
    Parser::new(tokens).statements().map(Program::Statements)
}

/// Parse `source` as a single expression.
pub fn parse_expression(source: &str) -> Result<Expr> {
    Parser::new(tokenize(source)?).expression_only()
}

/// Deepest nesting of brackets, unary operators, and blocks a script may use.
pub const MAX_NESTING: usize = 40;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Run `rule` one nesting level deeper.
    fn nested<T>(&mut self, rule: fn(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "too many nested levels (limit {})",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    // Token helpers

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.line(), message)
    }

    fn unexpected(&self) -> Error {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
            Tok::Op(op) => format!("'{}'", op),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax near {}", found))
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> Result<String> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn at_expression_end(&self) -> bool {
        match self.peek() {
            Tok::Newline | Tok::Eof | Tok::Indent | Tok::Dedent => true,
            Tok::Op(op) => {
                matches!(*op, "=" | ")" | "]" | "}" | ":")
                    || AUG_OPS.iter().any(|(aug, _)| aug == op)
            }
            Tok::Name(n) => n == "in",
            _ => false,
        }
    }

    // Statements

    fn expression_only(&mut self) -> Result<Expr> {
        let expr = self.expr_list()?;
        while matches!(self.peek(), Tok::Newline) {
            self.pos += 1;
        }
        if !matches!(self.peek(), Tok::Eof) {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    fn statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                Tok::Indent => return Err(self.error("unexpected indent")),
                Tok::Dedent => return Err(self.error("unexpected dedent")),
                _ => stmts.push(self.statement()?),
            }
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        if let Tok::Name(name) = self.peek() {
            match name.as_str() {
                "if" => return self.if_statement(),
                "for" => return self.for_statement(),
                "elif" | "else" => return Err(self.unexpected()),
                kw if UNSUPPORTED_STATEMENTS.contains(&kw) => {
                    return Err(Error::syntax(
                        line,
                        format!("'{}' statements are not supported", kw),
                    ));
                }
                _ => {}
            }
        }
        let stmt = self.simple_statement()?;
        self.end_of_statement()?;
        Ok(stmt)
    }

    fn end_of_statement(&mut self) -> Result<()> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    fn simple_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        let kind = if self.eat_kw("pass") {
            StmtKind::Pass
        } else if self.eat_kw("break") {
            StmtKind::Break
        } else if self.eat_kw("continue") {
            StmtKind::Continue
        } else if self.eat_kw("import") {
            let mut modules = vec![self.dotted_name()?];
            if self.eat_kw("as") {
                self.expect_name()?;
            }
            while self.eat_op(",") {
                modules.push(self.dotted_name()?);
                if self.eat_kw("as") {
                    self.expect_name()?;
                }
            }
            StmtKind::Import { modules }
        } else if self.eat_kw("from") {
            let mut module = String::new();
            while self.eat_op(".") {
                module.push('.');
            }
            if !self.is_kw("import") {
                module.push_str(&self.dotted_name()?);
            }
            self.expect_kw("import")?;
            while !matches!(self.peek(), Tok::Newline | Tok::Eof) {
                self.pos += 1;
            }
            StmtKind::ImportFrom { module }
        } else {
            self.expression_statement()?
        };
        Ok(Stmt { kind, line })
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn expression_statement(&mut self) -> Result<StmtKind> {
        let first = self.expr_list()?;

        if self.is_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.expr_list()?);
            }
            let value = exprs.pop().ok_or_else(|| self.unexpected())?;
            let targets = exprs
                .into_iter()
                .map(|e| self.to_target(e))
                .collect::<Result<Vec<_>>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        let aug = match self.peek() {
            Tok::Op(op) => AUG_OPS.iter().find(|(aug, _)| aug == op).map(|(_, b)| *b),
            _ => None,
        };
        if let Some(op) = aug {
            self.pos += 1;
            let target = self.to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn to_target(&self, expr: Expr) -> Result<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Tuple(items) | Expr::List(items) => items
                .into_iter()
                .map(|e| self.to_target(e))
                .collect::<Result<Vec<_>>>()
                .map(Target::Tuple),
            Expr::Subscript { value, index } => Ok(Target::Subscript { value, index }),
            Expr::Attribute { .. } => Err(self.error("cannot assign to attribute")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            let stmt = self.simple_statement()?;
            self.end_of_statement()?;
            return Ok(vec![stmt]);
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;

        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                Tok::Indent => return Err(self.error("unexpected indent")),
                _ => body.push(self.statement()?),
            }
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.expect_kw("if")?;
        let test = self.test()?;
        let mut branches = vec![(test, self.block()?)];
        let mut orelse = Vec::new();

        loop {
            if self.eat_kw("elif") {
                let test = self.test()?;
                branches.push((test, self.block()?));
            } else if self.eat_kw("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        if self.is_kw("else") {
            return Err(self.error("'for ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn target_list(&mut self) -> Result<Target> {
        let first = self.arith()?;
        if !self.is_op(",") {
            return self.to_target(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_kw("in") {
                break;
            }
            items.push(self.arith()?);
        }
        self.to_target(Expr::Tuple(items))
    }

    // Expressions

    fn expr_list(&mut self) -> Result<Expr> {
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expression_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> Result<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr> {
        if self.is_kw("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if !self.eat_kw("if") {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw("else")?;
        let orelse = self.test()?;
        Ok(Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn lambda(&mut self) -> Result<Expr> {
        self.expect_kw("lambda")?;
        let mut params = Vec::new();
        if !self.is_op(":") {
            params.push(self.expect_name()?);
            while self.eat_op(",") {
                params.push(self.expect_name()?);
            }
        }
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn or_test(&mut self) -> Result<Expr> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Bool {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::Bool {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat_kw("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let next_is = |kw: &str| matches!(self.peek_at(1), Tok::Name(m) if m == kw);
        let (op, width) = match self.peek() {
            Tok::Op("==") => (CmpOp::Eq, 1),
            Tok::Op("!=") => (CmpOp::NotEq, 1),
            Tok::Op("<") => (CmpOp::Lt, 1),
            Tok::Op("<=") => (CmpOp::LtE, 1),
            Tok::Op(">") => (CmpOp::Gt, 1),
            Tok::Op(">=") => (CmpOp::GtE, 1),
            Tok::Name(n) if n == "in" => (CmpOp::In, 1),
            Tok::Name(n) if n == "not" && next_is("in") => (CmpOp::NotIn, 2),
            Tok::Name(n) if n == "is" && next_is("not") => (CmpOp::IsNot, 2),
            Tok::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn arith(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.term()?;
            left = Self::binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.factor()?;
            left = Self::binary(op, left, right);
        }
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Pos
        } else {
            return self.power();
        };
        let operand = self.nested(Self::factor)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.eat_op("**") {
            let exponent = self.nested(Self::factor)?;
            return Ok(Self::binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call(&mut self, func: Expr) -> Result<Expr> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while !self.is_op(")") {
            let is_keyword = matches!(self.peek(), Tok::Name(_))
                && matches!(self.peek_at(1), Tok::Op("="));
            if is_keyword {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.test()?;
                if self.is_kw("for") {
                    let clause = self.comprehension()?;
                    args.push(Expr::ListComp {
                        elt: Box::new(arg),
                        clause,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;

        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self, value: Expr) -> Result<Expr> {
        let lower = if self.is_op(":") {
            None
        } else {
            Some(self.expr_list()?)
        };

        if self.eat_op(":") {
            let upper = if self.is_op("]") || self.is_op(":") {
                None
            } else {
                Some(self.test()?)
            };
            if self.is_op(":") {
                return Err(self.error("slice steps are not supported"));
            }
            self.expect_op("]")?;
            return Ok(Expr::Slice {
                value: Box::new(value),
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
            });
        }

        self.expect_op("]")?;
        let index = lower.ok_or_else(|| self.error("empty subscript"))?;
        Ok(Expr::Subscript {
            value: Box::new(value),
            index: Box::new(index),
        })
    }

    fn comprehension(&mut self) -> Result<Comprehension> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.or_test()?;
        let mut conditions = Vec::new();
        while self.eat_kw("if") {
            conditions.push(self.or_test()?);
        }
        if self.is_kw("for") {
            return Err(self.error("nested comprehension clauses are not supported"));
        }
        Ok(Comprehension {
            target,
            iter: Box::new(iter),
            conditions,
        })
    }

    fn atom(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Name(name) => {
                self.pos += 1;
                match name.as_str() {
                    "True" => Ok(Expr::Literal(Value::Bool(true))),
                    "False" => Ok(Expr::Literal(Value::Bool(false))),
                    "None" => Ok(Expr::Literal(Value::Null)),
                    kw if KEYWORDS.contains(&kw) => {
                        self.pos -= 1;
                        Err(self.unexpected())
                    }
                    _ => Ok(Expr::Name(name)),
                }
            }
            Tok::Int(i) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::from(i)))
            }
            Tok::Float(f) => {
                self.pos += 1;
                Number::from_f64(f)
                    .map(|n| Expr::Literal(Value::Number(n)))
                    .ok_or_else(|| Error::syntax(line, "float literal out of range"))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(),
            Tok::Op("(") => {
                self.pos += 1;
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let clause = self.comprehension()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        clause,
                    });
                }
                if !self.is_op(",") {
                    self.expect_op(")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.pos += 1;
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let clause = self.comprehension()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        clause,
                    });
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.pos += 1;
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.test()?;
                if !self.eat_op(":") {
                    return Err(self.error("set literals are not supported"));
                }
                let value = self.test()?;
                if self.is_kw("for") {
                    let clause = self.comprehension()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp {
                        key: Box::new(key),
                        value: Box::new(value),
                        clause,
                    });
                }
                let mut pairs = vec![(key, value)];
                while self.eat_op(",") {
                    if self.is_op("}") {
                        break;
                    }
                    let key = self.test()?;
                    self.expect_op(":")?;
                    pairs.push((key, self.test()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// run an f-string.
    fn strings(&mut self) -> Result<Expr> {
        let line = self.line();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;

        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    push_literal(&mut parts, &s);
                }
                Tok::FStr(body) => {
                    self.pos += 1;
                    formatted = true;
                    for part in fstring_parts(&body, line)? {
                        match part {
                            FStringPart::Literal(s) => push_literal(&mut parts, &s),
                            expr => parts.push(expr),
                        }
                    }
                }
                _ => break,
            }
        }

        if formatted {
            return Ok(Expr::FString(parts));
        }
        let text = match parts.pop() {
            Some(FStringPart::Literal(s)) => s,
            _ => String::new(),
        };
        Ok(Expr::Literal(Value::String(text)))
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

/// Split an f-string body into literal text and `{expr[:spec]}` fields.
fn fstring_parts(body: &str, line: usize) -> Result<Vec<FStringPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => return Err(Error::syntax(line, "f-string: single '}' is not allowed")),
            '{' => {
                let (end, spec_start) = field_bounds(&chars, i + 1)
                    .ok_or_else(|| Error::syntax(line, "f-string: expecting '}'"))?;
                let expr_end = spec_start.unwrap_or(end);
                let text: String = chars[i + 1..expr_end].iter().collect();
                if text.trim().is_empty() {
                    return Err(Error::syntax(
                        line,
                        "f-string: empty expression not allowed",
                    ));
                }
                let expr = parse_expression(text.trim()).map_err(|e| match e {
                    Error::Syntax { message, .. } => {
                        Error::syntax(line, format!("f-string: {}", message))
                    }
                    other => other,
                })?;
                let spec = spec_start.map(|s| chars[s + 1..end].iter().collect::<String>());

                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(FStringPart::Expr { expr, spec });
                i = end + 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

/// Find the closing `}` of a replacement field and the top-level `:` that
/// starts its format spec, if any.
fn field_bounds(chars: &[char], start: usize) -> Option<(usize, Option<usize>)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut spec = None;

    for (offset, c) in chars[start..].iter().enumerate() {
        let j = start + offset;
        if let Some(q) = quote {
            if *c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(*c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' => return Some((j, spec)),
            ':' if depth == 0 && spec.is_none() => spec = Some(j),
            _ => {}
        }
    }
    None
}
