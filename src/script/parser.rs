//! Recursive-descent parser for the snippet language

use super::ast::*;
use super::lexer::{tokenize, Tok, Token};
use super::ScriptError;

/// Statements the language deliberately leaves out.
const UNSUPPORTED: &[&str] = &[
    "def", "class", "try", "except", "finally", "with", "return", "lambda", "global",
    "nonlocal", "del", "raise", "assert", "yield", "async", "await",
];

/// Deepest nesting of brackets, blocks, unary operators and operator chains a
/// snippet may use. Parsing and every later walk of the tree recurse once per
/// level, so this bounds their stack use.
pub const MAX_NESTING: usize = 64;

const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "in", "not", "and", "or", "is", "break", "continue",
    "pass", "import", "from", "as", "True", "False", "None",
];

pub fn parse_program(src: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.extend(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
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

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line())
    }

    fn unexpected(&self) -> ScriptError {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
            Tok::Op(op) => format!("'{}'", op),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "unexpected indent".to_string(),
            Tok::Dedent => "unexpected dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax near {}", found))
    }

    fn deepen(&mut self) -> Result<(), ScriptError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("too many nested levels (limit {})", MAX_NESTING)));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        self.deepen()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ScriptError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), ScriptError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn end_of_simple(&mut self) -> Result<(), ScriptError> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    // ── statements ──────────────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let line = self.line();
        if let Tok::Name(name) = self.peek().clone() {
            if UNSUPPORTED.contains(&name.as_str()) {
                return Err(self.error(format!("'{}' is not supported in snippets", name)));
            }
            match name.as_str() {
                "if" => return Ok(vec![self.if_statement(line)?]),
                "for" => return Ok(vec![self.for_statement(line)?]),
                "while" => return Ok(vec![self.while_statement(line)?]),
                _ => {}
            }
        }
        if matches!(self.peek(), Tok::Indent) {
            return Err(self.error("unexpected indent"));
        }
        self.simple_statements()
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        self.end_of_simple()?;
        Ok(stmts)
    }

    fn small_statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        let kind = if self.eat_kw("pass") {
            StmtKind::Pass
        } else if self.eat_kw("break") {
            StmtKind::Break
        } else if self.eat_kw("continue") {
            StmtKind::Continue
        } else if self.eat_kw("import") {
            let module = self.dotted_name()?;
            self.skip_import_tail();
            StmtKind::Import { module }
        } else if self.eat_kw("from") {
            let module = self.dotted_name()?;
            self.expect_kw("import")?;
            self.skip_import_tail();
            StmtKind::Import { module }
        } else {
            self.expression_statement()?
        };
        Ok(Stmt { kind, line })
    }

    fn dotted_name(&mut self) -> Result<String, ScriptError> {
        let mut name = match self.advance() {
            Tok::Name(n) => n,
            _ => return Err(self.error("expected a module name")),
        };
        while self.eat_op(".") {
            match self.advance() {
                Tok::Name(n) => {
                    name.push('.');
                    name.push_str(&n);
                }
                _ => return Err(self.error("expected a module name")),
            }
        }
        Ok(name)
    }

    fn skip_import_tail(&mut self) {
        while !matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) && !self.at_op(";") {
            self.pos += 1;
        }
    }

    fn expression_statement(&mut self) -> Result<StmtKind, ScriptError> {
        let first = self.expr_list()?;

        for (op_text, op) in [
            ("+=", BinOp::Add),
            ("-=", BinOp::Sub),
            ("*=", BinOp::Mul),
            ("/=", BinOp::Div),
        ] {
            if self.eat_op(op_text) {
                let target = self.to_target(first)?;
                if matches!(target, Target::Tuple(_)) {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                let value = self.expr_list()?;
                return Ok(StmtKind::AugAssign { target, op, value });
            }
        }

        if !self.at_op("=") {
            return Ok(StmtKind::Expr(first));
        }

        let mut chain = vec![first];
        while self.eat_op("=") {
            chain.push(self.expr_list()?);
        }
        let value = chain.pop().ok_or_else(|| self.unexpected())?;
        let targets = chain
            .into_iter()
            .map(|e| self.to_target(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, expr: Expr) -> Result<Target, ScriptError> {
        match expr {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Index { obj, index } => Ok(Target::Index { obj: *obj, index: *index }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Attr { name, .. } => {
                Err(self.error(format!("cannot assign to attribute '{}'", name)))
            }
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_op(":")?;
        if !self.at(&Tok::Newline) {
            return self.simple_statements();
        }
        self.pos += 1;
        if !self.at(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;
        let mut body = Vec::new();
        while !matches!(self.peek(), Tok::Dedent | Tok::Eof) {
            body.extend(self.statement()?);
        }
        if self.at(&Tok::Dedent) {
            self.pos += 1;
        }
        Ok(body)
    }

    fn if_statement(&mut self, line: usize) -> Result<Stmt, ScriptError> {
        self.expect_kw("if")?;
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));
        let mut orelse = Vec::new();
        loop {
            if self.eat_kw("elif") {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.eat_kw("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt { kind: StmtKind::If { branches, orelse }, line })
    }

    fn for_statement(&mut self, line: usize) -> Result<Stmt, ScriptError> {
        self.expect_kw("for")?;
        let target = self.for_target()?;
        self.expect_kw("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        if self.at_kw("else") {
            return Err(self.error("'for ... else' is not supported in snippets"));
        }
        Ok(Stmt { kind: StmtKind::For { target, iter, body }, line })
    }

    fn for_target(&mut self) -> Result<Target, ScriptError> {
        let mut items = vec![self.postfix()?];
        let mut tuple = false;
        while self.eat_op(",") {
            tuple = true;
            if self.at_kw("in") {
                break;
            }
            items.push(self.postfix()?);
        }
        let expr = if tuple {
            Expr::Tuple(items)
        } else {
            items.pop().ok_or_else(|| self.unexpected())?
        };
        self.to_target(expr)
    }

    fn while_statement(&mut self, line: usize) -> Result<Stmt, ScriptError> {
        self.expect_kw("while")?;
        let cond = self.expr()?;
        let body = self.block()?;
        Ok(Stmt { kind: StmtKind::While { cond, body }, line })
    }

    // ── expressions ─────────────────────────────────────────────────────────

    /// Comma-separated expressions; more than one (or a trailing comma) is a tuple.
    fn expr_list(&mut self) -> Result<Expr, ScriptError> {
        let first = self.expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.starts_expr() {
                items.push(self.expr()?);
            } else {
                break;
            }
        }
        Ok(Expr::Tuple(items))
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => !matches!(n.as_str(), "in" | "for" | "if" | "else" | "and" | "or" | "is"),
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let value = self.or_test()?;
        if self.eat_kw("if") {
            let cond = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.expr()?;
            return Ok(Expr::IfExp {
                cond: Box::new(cond),
                then: Box::new(value),
                orelse: Box::new(orelse),
            });
        }
        Ok(value)
    }

    fn or_test(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.depth;
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            self.deepen()?;
            let right = self.and_test()?;
            left = Expr::BoolOp { op: BoolOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        self.depth = mark;
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.depth;
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            self.deepen()?;
            let right = self.not_test()?;
            left = Expr::BoolOp { op: BoolOp::And, left: Box::new(left), right: Box::new(right) };
        }
        self.depth = mark;
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_kw("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare { left: Box::new(left), rest })
        }
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek().clone() {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            Tok::Name(n) if n == "in" => CmpOp::In,
            Tok::Name(n) if n == "not" => {
                if !matches!(self.peek_next(), Tok::Name(m) if m == "in") {
                    return None;
                }
                self.pos += 1;
                CmpOp::NotIn
            }
            Tok::Name(n) if n == "is" => {
                if matches!(self.peek_next(), Tok::Name(m) if m == "not") {
                    self.pos += 1;
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn arith(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.depth;
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                self.depth = mark;
                return Ok(left);
            };
            self.deepen()?;
            let right = self.term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.depth;
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                self.depth = mark;
                return Ok(left);
            };
            self.deepen()?;
            let right = self.factor()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_op("-") {
            let operand = self.nested(Self::factor)?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) });
        }
        if self.eat_op("+") {
            let operand = self.nested(Self::factor)?;
            return Ok(Expr::Unary { op: UnaryOp::Pos, operand: Box::new(operand) });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.nested(Self::factor)?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.depth;
        let mut expr = self.atom()?;
        loop {
            if matches!(self.peek(), Tok::Op("(" | "[" | ".")) {
                self.deepen()?;
            }
            if self.eat_op("(") {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call { func: Box::new(expr), args, kwargs };
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(self.error("expected attribute name after '.'")),
                };
                expr = Expr::Attr { obj: Box::new(expr), name };
            } else {
                self.depth = mark;
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ScriptError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.error("argument unpacking is not supported in snippets"));
            }
            if let (Tok::Name(name), Tok::Op("=")) = (self.peek().clone(), self.peek_next().clone()) {
                self.pos += 2;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expr()?;
                if self.at_kw("for") {
                    return Err(self.error("generator expressions are not supported; use a list comprehension"));
                }
                args.push(arg);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self, obj: Expr) -> Result<Expr, ScriptError> {
        let lower = if self.at_op(":") { None } else { Some(self.expr_list()?) };
        if !self.eat_op(":") {
            self.expect_op("]")?;
            let index = lower.ok_or_else(|| self.unexpected())?;
            return Ok(Expr::Index { obj: Box::new(obj), index: Box::new(index) });
        }
        let upper = if self.at_op(":") || self.at_op("]") { None } else { Some(self.expr()?) };
        let step = if self.eat_op(":") && !self.at_op("]") { Some(self.expr()?) } else { None };
        self.expect_op("]")?;
        Ok(Expr::Slice {
            obj: Box::new(obj),
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            step: step.map(Box::new),
        })
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Int(i)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Str(s) => self.string_concat(vec![FPart::Lit(s)], line),
            Tok::FStr(body) => {
                let parts = parse_fstring(&body, line, self.depth)?;
                self.string_concat(parts, line)
            }
            Tok::Name(n) => match n.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                _ if UNSUPPORTED.contains(&n.as_str()) => {
                    Err(ScriptError::syntax(format!("'{}' is not supported in snippets", n), line))
                }
                _ if KEYWORDS.contains(&n.as_str()) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                _ => Ok(Expr::Name(n)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let inner = self.expr_list()?;
                if self.at_kw("for") {
                    return Err(self.error("generator expressions are not supported; use a list comprehension"));
                }
                self.expect_op(")")?;
                Ok(inner)
            }
            Tok::Op("[") => self.list_display(),
            Tok::Op("{") => self.dict_display(),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    /// Adjacent string literals concatenate, as in Python.
    fn string_concat(&mut self, mut parts: Vec<FPart>, line: usize) -> Result<Expr, ScriptError> {
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    parts.push(FPart::Lit(s));
                }
                Tok::FStr(body) => {
                    self.pos += 1;
                    parts.extend(parse_fstring(&body, line, self.depth)?);
                }
                _ => break,
            }
        }

        if parts.iter().all(|p| matches!(p, FPart::Lit(_))) {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Lit(s) => s,
                    FPart::Field { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Str(text));
        }
        Ok(Expr::FString(parts))
    }

    fn list_display(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expr()?;
        if self.eat_kw("for") {
            let target = self.for_target()?;
            self.expect_kw("in")?;
            let iter = self.nested(Self::or_test)?;
            let mut conds = Vec::new();
            while self.eat_kw("if") {
                conds.push(self.nested(Self::or_test)?);
            }
            if self.at_kw("for") {
                return Err(self.error("nested comprehensions are not supported in snippets"));
            }
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generator: Box::new(Comprehension { target, iter, conds }),
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> Result<Expr, ScriptError> {
        let mut pairs = Vec::new();
        while !self.at_op("}") {
            let key = self.expr()?;
            if !self.eat_op(":") {
                return Err(self.error("set literals are not supported; use a list"));
            }
            let value = self.expr()?;
            pairs.push((key, value));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(pairs))
    }
}

/// Split an f-string body into literal text and `{expr[!r][:spec]}` fields.
fn parse_fstring(body: &str, line: usize, depth: usize) -> Result<Vec<FPart>, ScriptError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            literal.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(ScriptError::syntax("f-string: single '}' is not allowed", line));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        // Find the end of the field, tracking nesting and quotes.
        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut split: Option<usize> = None;
        let mut j = start;
        loop {
            let Some(&ch) = chars.get(j) else {
                return Err(ScriptError::syntax("f-string: expecting '}'", line));
            };
            match (quote, ch) {
                (Some(q), ch) if ch == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(ch),
                (None, '(' | '[' | '{') => depth += 1,
                (None, ')' | ']') => depth = depth.saturating_sub(1),
                (None, '}') if depth > 0 => depth -= 1,
                (None, '}') => break,
                (None, '!') if depth == 0 && split.is_none() && chars.get(j + 1) != Some(&'=') => {
                    split = Some(j)
                }
                (None, ':') if depth == 0 && split.is_none() => split = Some(j),
                _ => {}
            }
            j += 1;
        }

        let expr_end = split.unwrap_or(j);
        let source: String = chars[start..expr_end].iter().collect();
        let spec = split.map(|s| chars[s..j].iter().collect::<String>());
        if source.trim().is_empty() {
            return Err(ScriptError::syntax("f-string: empty expression not allowed", line));
        }

        let mut tokens = tokenize(source.trim()).map_err(|e| e.at_line(line))?;
        for token in &mut tokens {
            token.line = line;
        }
        let mut inner = Parser { tokens, pos: 0, depth };
        let expr = inner.expr_list()?;
        if !matches!(inner.peek(), Tok::Newline | Tok::Eof) {
            return Err(ScriptError::syntax("f-string: invalid expression", line));
        }

        if !literal.is_empty() {
            parts.push(FPart::Lit(std::mem::take(&mut literal)));
        }
        parts.push(FPart::Field { expr, spec });
        i = j + 1;
    }

    if !literal.is_empty() {
        parts.push(FPart::Lit(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> StmtKind {
        let program = parse_program(src).unwrap();
        assert_eq!(program.body.len(), 1, "{:?}", program.body);
        program.body.into_iter().next().unwrap().kind
    }

    #[test]
    fn test_assignment_and_call() {
        match parse_one("result = read_file('user.md')") {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets, vec![Target::Name("result".into())]);
                assert!(matches!(value, Expr::Call { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_keyword_arguments() {
        match parse_one("create_file(file_path='a.md', content='x')") {
            StmtKind::Expr(Expr::Call { args, kwargs, .. }) => {
                assert!(args.is_empty());
                assert_eq!(kwargs.len(), 2);
                assert_eq!(kwargs[0].0, "file_path");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        match parse_one("x = 1 + 2 * 3") {
            StmtKind::Assign { value: Expr::Binary { op: BinOp::Add, right, .. }, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else_blocks() {
        let src = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        match parse_one(src) {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_with_tuple_target() {
        match parse_one("for k, v in d.items():\n    print(k)\n") {
            StmtKind::For { target: Target::Tuple(items), .. } => assert_eq!(items.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_in_and_is_not() {
        match parse_one("x = a not in b and c is not None") {
            StmtKind::Assign { value: Expr::BoolOp { left, right, .. }, .. } => {
                assert!(matches!(*left, Expr::Compare { ref rest, .. } if rest[0].0 == CmpOp::NotIn));
                assert!(matches!(*right, Expr::Compare { ref rest, .. } if rest[0].0 == CmpOp::IsNot));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fstring_fields() {
        match parse_one("x = f'{name}: {value:.2f}!'") {
            StmtKind::Assign { value: Expr::FString(parts), .. } => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[2], FPart::Field { spec: Some(s), .. } if s == ":.2f"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_list_comprehension() {
        match parse_one("x = [f for f in files if f.endswith('.md')]") {
            StmtKind::Assign { value: Expr::ListComp { generator, .. }, .. } => {
                assert_eq!(generator.conds.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_slices() {
        match parse_one("x = s[1:-1]") {
            StmtKind::Assign { value: Expr::Slice { lower, upper, step, .. }, .. } => {
                assert!(lower.is_some() && upper.is_some() && step.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_imports_are_parsed() {
        assert_eq!(parse_one("import os.path"), StmtKind::Import { module: "os.path".into() });
        assert_eq!(
            parse_one("from subprocess import run as r"),
            StmtKind::Import { module: "subprocess".into() }
        );
    }

    #[test]
    fn test_unsupported_statements() {
        let err = parse_program("def f():\n    pass\n").unwrap_err();
        assert!(err.message.contains("'def' is not supported"));
        assert!(parse_program("x = lambda: 1").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("x = {}1{}", "(".repeat(MAX_NESTING - 2), ")".repeat(MAX_NESTING - 2));
        assert!(parse_program(&ok).is_ok());

        for src in [
            format!("x = {}1{}", "(".repeat(300), ")".repeat(300)),
            format!("x = {}1{}", "[".repeat(5000), "]".repeat(5000)),
            format!("x = {}1", "-".repeat(5000)),
            format!("x = {}True", "not ".repeat(5000)),
            format!("x = 1{}", " + 1".repeat(5000)),
            format!("x = a{}", "[0]".repeat(5000)),
            format!("x = 2{}", " ** 2".repeat(5000)),
            format!("x = f'{{{}1{}}}'", "(".repeat(300), ")".repeat(300)),
            format!("x = {}1{}", "[y for y in ".repeat(300), "]".repeat(300)),
        ] {
            let err = parse_program(&src).unwrap_err();
            assert_eq!(err.kind, "SyntaxError");
            assert!(err.message.contains("nested"), "{}", err.message);
        }
    }

    #[test]
    fn test_deep_blocks_rejected() {
        let mut src = String::new();
        for level in 0..150 {
            src.push_str(&"    ".repeat(level));
            src.push_str("if True:\n");
        }
        src.push_str(&"    ".repeat(150));
        src.push_str("pass\n");
        let err = parse_program(&src).unwrap_err();
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn test_syntax_error_line_number() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.kind, "SyntaxError");
        assert!(err.line >= 2);
    }

    #[test]
    fn test_semicolons_and_chained_assignment() {
        let program = parse_program("a = b = 1; c = 2").unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(matches!(&program.body[0].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
    }
}
