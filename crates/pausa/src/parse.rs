//! Lowers the ruff Python AST into the smaller node tree the compiler understands.

use std::{borrow::Cow, fmt};

use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, ConversionFlag as RuffConversionFlag, Expr as AstExpr, InterpolatedStringElement,
    Number, Operator as AstOperator, Stmt, UnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};
use serde::{Deserialize, Serialize};

use crate::{
    ExcType, Exception,
    exception::{CodeLoc, StackFrame},
    expressions::{
        CmpOperator, Conversion, ExceptHandler, Expr, ExprLoc, FStringPart, FunctionDef, Literal, Module, Node,
        Operator, Param, Target, Try,
    },
};

/// Maximum nesting depth for statements and expressions.
///
/// Keeps deeply nested input like `((((x,),),),)` from overflowing the native stack
/// in the recursive lowering and compilation passes.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds have much larger stack frames.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u16 = 35;

/// Span of source code, start and end both 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: CodeLoc,
    pub end: CodeLoc,
}

impl CodeRange {
    #[must_use]
    pub const fn new(start: CodeLoc, end: CodeLoc) -> Self {
        Self { start, end }
    }
}

/// Parses Python source into statement nodes.
pub(crate) fn parse(code: &str) -> Result<Vec<Node>, ParseError> {
    let mut parser = Parser::new(code);
    let parsed = parse_module(code).map_err(|e| ParseError::syntax(e.to_string(), parser.convert_range(e.range())))?;
    let module = parsed.into_syntax();
    parser.parse_statements(module.body)
}

struct Parser<'a> {
    code: &'a str,
    /// Byte offset of every `\n`, to convert offsets to line and column.
    line_ends: Vec<usize>,
    depth_remaining: u16,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str) -> Self {
        let line_ends = code.match_indices('\n').map(|(i, _)| i).collect();
        Self {
            code,
            line_ends,
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    fn parse_statements(&mut self, statements: impl IntoIterator<Item = Stmt>) -> Result<Vec<Node>, ParseError> {
        statements.into_iter().map(|s| self.parse_statement(s)).collect()
    }

    fn parse_elif_else_clauses(&mut self, clauses: Vec<ast::ElifElseClause>) -> Result<Vec<Node>, ParseError> {
        let mut tail: Vec<Node> = Vec::new();
        for clause in clauses.into_iter().rev() {
            match clause.test {
                Some(test) => {
                    let test = self.parse_expression(test)?;
                    let body = self.parse_statements(clause.body)?;
                    tail = vec![Node::If {
                        test,
                        body,
                        or_else: tail,
                    }];
                }
                None => {
                    tail = self.parse_statements(clause.body)?;
                }
            }
        }
        Ok(tail)
    }

    fn parse_except_handler(&mut self, handler: ast::ExceptHandler) -> Result<ExceptHandler, ParseError> {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        let exc_type = match h.type_ {
            Some(expr) => Some(self.parse_expression(*expr)?),
            None => None,
        };
        let name = h.name.map(|n| n.id.to_string());
        let body = self.parse_statements(h.body)?;
        Ok(ExceptHandler { exc_type, name, body })
    }

    fn parse_statement(&mut self, statement: Stmt) -> Result<Node, ParseError> {
        self.decr_depth_remaining(|| statement.range())?;
        let result = self.parse_statement_impl(statement);
        self.depth_remaining += 1;
        result
    }

    fn parse_statement_impl(&mut self, statement: Stmt) -> Result<Node, ParseError> {
        match statement {
            Stmt::FunctionDef(function) => {
                let position = self.convert_range(function.range);
                if !function.decorator_list.is_empty() {
                    return Err(ParseError::not_implemented("decorators", position));
                }
                let params = &function.parameters;
                if params.vararg.is_some() || params.kwarg.is_some() || !params.kwonlyargs.is_empty() {
                    return Err(ParseError::not_implemented(
                        "*args, **kwargs or keyword-only parameters",
                        position,
                    ));
                }
                let mut parsed_params = Vec::new();
                for p in params.posonlyargs.iter().chain(params.args.iter()) {
                    let default = match &p.default {
                        Some(expr) => Some(self.parse_expression((**expr).clone())?),
                        None => None,
                    };
                    parsed_params.push(Param {
                        name: p.parameter.name.id.to_string(),
                        default,
                    });
                }
                let body = self.parse_statements(function.body)?;
                Ok(Node::FunctionDef(FunctionDef {
                    name: function.name.id.to_string(),
                    params: parsed_params,
                    body,
                    position,
                }))
            }
            Stmt::ClassDef(c) => Err(ParseError::not_implemented(
                "class definitions",
                self.convert_range(c.range),
            )),
            Stmt::Return(ast::StmtReturn { value, range, .. }) => Ok(Node::Return {
                value: value.map(|v| self.parse_expression(*v)).transpose()?,
                position: self.convert_range(range),
            }),
            Stmt::Delete(d) => Err(ParseError::not_implemented("del statements", self.convert_range(d.range))),
            Stmt::TypeAlias(t) => Err(ParseError::not_implemented("type aliases", self.convert_range(t.range))),
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                let targets = targets
                    .into_iter()
                    .map(|t| self.parse_target(t))
                    .collect::<Result<_, _>>()?;
                Ok(Node::Assign {
                    targets,
                    value: self.parse_expression(*value)?,
                })
            }
            Stmt::AugAssign(ast::StmtAugAssign {
                target,
                op,
                value,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                Ok(Node::AugAssign {
                    target: self.parse_target(*target)?,
                    op: convert_op(op, position)?,
                    value: self.parse_expression(*value)?,
                    position,
                })
            }
            Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => match value {
                Some(value) => Ok(Node::Assign {
                    targets: vec![self.parse_target(*target)?],
                    value: self.parse_expression(*value)?,
                }),
                None => Ok(Node::Pass),
            },
            Stmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                if is_async {
                    return Err(ParseError::not_implemented("async for loops", position));
                }
                Ok(Node::For {
                    target: self.parse_target(*target)?,
                    iter: self.parse_expression(*iter)?,
                    body: self.parse_statements(body)?,
                    or_else: self.parse_statements(orelse)?,
                    position,
                })
            }
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => Ok(Node::While {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body)?,
                or_else: self.parse_statements(orelse)?,
            }),
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => {
                let test = self.parse_expression(*test)?;
                let body = self.parse_statements(body)?;
                let or_else = self.parse_elif_else_clauses(elif_else_clauses)?;
                Ok(Node::If { test, body, or_else })
            }
            Stmt::With(w) => Err(ParseError::not_implemented("with statements", self.convert_range(w.range))),
            Stmt::Match(m) => Err(ParseError::not_implemented("match statements", self.convert_range(m.range))),
            Stmt::Raise(ast::StmtRaise { exc, cause, range, .. }) => {
                let position = self.convert_range(range);
                if cause.is_some() {
                    return Err(ParseError::not_implemented("raise ... from ...", position));
                }
                Ok(Node::Raise {
                    exc: exc.map(|e| self.parse_expression(*e)).transpose()?,
                    position,
                })
            }
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                range,
                ..
            }) => {
                if is_star {
                    return Err(ParseError::not_implemented("except*", self.convert_range(range)));
                }
                let body = self.parse_statements(body)?;
                let handlers = handlers
                    .into_iter()
                    .map(|h| self.parse_except_handler(h))
                    .collect::<Result<_, _>>()?;
                let or_else = self.parse_statements(orelse)?;
                let finally = self.parse_statements(finalbody)?;
                Ok(Node::Try(Try {
                    body,
                    handlers,
                    or_else,
                    finally,
                }))
            }
            Stmt::Assert(ast::StmtAssert { test, msg, range, .. }) => Ok(Node::Assert {
                test: self.parse_expression(*test)?,
                msg: msg.map(|m| self.parse_expression(*m)).transpose()?,
                position: self.convert_range(range),
            }),
            Stmt::Import(ast::StmtImport { names, range, .. }) => {
                let position = self.convert_range(range);
                if names.len() != 1 {
                    return Err(ParseError::not_implemented("multi-module import statements", position));
                }
                let alias = &names[0];
                let module = Module::from_name(alias.name.as_str())
                    .ok_or_else(|| ParseError::import(format!("No module named '{}'", alias.name.as_str()), position))?;
                let binding = alias
                    .asname
                    .as_ref()
                    .map_or_else(|| alias.name.as_str().to_owned(), |a| a.as_str().to_owned());
                Ok(Node::Import { module, binding })
            }
            Stmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                if level > 0 {
                    return Err(ParseError::import(
                        "attempted relative import with no known parent package",
                        position,
                    ));
                }
                let module_name = module.as_ref().map_or("", |m| m.as_str());
                let module = Module::from_name(module_name)
                    .ok_or_else(|| ParseError::import(format!("No module named '{module_name}'"), position))?;
                let mut imported = Vec::with_capacity(names.len());
                for alias in &names {
                    let name = alias.name.as_str();
                    if !module.exports().contains(&name) {
                        return Err(ParseError::import(
                            format!("cannot import name '{name}' from '{module}'"),
                            position,
                        ));
                    }
                    let binding = alias.asname.as_ref().map_or(name, |a| a.as_str());
                    imported.push((name.to_owned(), binding.to_owned()));
                }
                Ok(Node::ImportFrom {
                    module,
                    names: imported,
                    position,
                })
            }
            Stmt::Global(ast::StmtGlobal { names, .. }) => {
                Ok(Node::Global(names.iter().map(|n| n.id.to_string()).collect()))
            }
            Stmt::Nonlocal(n) => Err(ParseError::not_implemented("nonlocal", self.convert_range(n.range))),
            Stmt::Expr(ast::StmtExpr { value, .. }) => Ok(Node::Expr(self.parse_expression(*value)?)),
            Stmt::Pass(_) => Ok(Node::Pass),
            Stmt::Break(b) => Ok(Node::Break(self.convert_range(b.range))),
            Stmt::Continue(c) => Ok(Node::Continue(self.convert_range(c.range))),
            Stmt::IpyEscapeCommand(i) => Err(ParseError::not_implemented(
                "IPython escape commands",
                self.convert_range(i.range),
            )),
        }
    }

    fn parse_target(&mut self, target: AstExpr) -> Result<Target, ParseError> {
        match target {
            AstExpr::Name(ast::ExprName { id, .. }) => Ok(Target::Name(id.to_string())),
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Target::Subscript {
                object: self.parse_expression(*value)?,
                index: self.parse_expression(*slice)?,
            }),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) | AstExpr::List(ast::ExprList { elts, .. }) => {
                let targets = elts
                    .into_iter()
                    .map(|e| self.parse_target(e))
                    .collect::<Result<_, _>>()?;
                Ok(Target::Tuple(targets))
            }
            other => Err(ParseError::not_implemented(
                "this assignment target",
                self.convert_range(other.range()),
            )),
        }
    }

    fn parse_expression(&mut self, expression: AstExpr) -> Result<ExprLoc, ParseError> {
        self.decr_depth_remaining(|| expression.range())?;
        let result = self.parse_expression_impl(expression);
        self.depth_remaining += 1;
        result
    }

    fn parse_expression_impl(&mut self, expression: AstExpr) -> Result<ExprLoc, ParseError> {
        match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, range, .. }) => {
                let values = values
                    .into_iter()
                    .map(|v| self.parse_expression(v))
                    .collect::<Result<_, _>>()?;
                let expr = match op {
                    BoolOp::And => Expr::And(values),
                    BoolOp::Or => Expr::Or(values),
                };
                Ok(ExprLoc::new(self.convert_range(range), expr))
            }
            AstExpr::Named(n) => Err(ParseError::not_implemented(
                "assignment expressions (:=)",
                self.convert_range(n.range),
            )),
            AstExpr::BinOp(ast::ExprBinOp {
                left, op, right, range, ..
            }) => {
                let position = self.convert_range(range);
                let left = self.parse_expression(*left)?;
                let right = self.parse_expression(*right)?;
                Ok(ExprLoc::new(
                    position,
                    Expr::Op {
                        left: Box::new(left),
                        op: convert_op(op, position)?,
                        right: Box::new(right),
                    },
                ))
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, range, .. }) => {
                let position = self.convert_range(range);
                let operand = Box::new(self.parse_expression(*operand)?);
                match op {
                    UnaryOp::Not => Ok(ExprLoc::new(position, Expr::Not(operand))),
                    UnaryOp::USub => Ok(ExprLoc::new(position, Expr::Neg(operand))),
                    UnaryOp::UAdd => Ok(ExprLoc::new(position, Expr::Pos(operand))),
                    UnaryOp::Invert => Err(ParseError::not_implemented("the ~ operator", position)),
                }
            }
            AstExpr::Lambda(l) => Err(ParseError::not_implemented("lambda", self.convert_range(l.range))),
            AstExpr::If(ast::ExprIf {
                test,
                body,
                orelse,
                range,
                ..
            }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::IfElse {
                    test: Box::new(self.parse_expression(*test)?),
                    body: Box::new(self.parse_expression(*body)?),
                    orelse: Box::new(self.parse_expression(*orelse)?),
                },
            )),
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                let position = self.convert_range(range);
                let mut pairs = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let Some(key) = key else {
                        return Err(ParseError::not_implemented("dict unpacking (**)", position));
                    };
                    pairs.push((self.parse_expression(key)?, self.parse_expression(value)?));
                }
                Ok(ExprLoc::new(position, Expr::Dict(pairs)))
            }
            AstExpr::Set(s) => Err(ParseError::not_implemented("sets", self.convert_range(s.range))),
            AstExpr::ListComp(c) => Err(ParseError::not_implemented(
                "list comprehensions",
                self.convert_range(c.range),
            )),
            AstExpr::SetComp(c) => Err(ParseError::not_implemented(
                "set comprehensions",
                self.convert_range(c.range),
            )),
            AstExpr::DictComp(c) => Err(ParseError::not_implemented(
                "dict comprehensions",
                self.convert_range(c.range),
            )),
            AstExpr::Generator(g) => Err(ParseError::not_implemented(
                "generator expressions",
                self.convert_range(g.range),
            )),
            AstExpr::Await(a) => {
                let value = self.parse_expression(*a.value)?;
                Ok(ExprLoc::new(self.convert_range(a.range), Expr::Await(Box::new(value))))
            }
            AstExpr::Yield(y) => Err(ParseError::not_implemented("yield", self.convert_range(y.range))),
            AstExpr::YieldFrom(y) => Err(ParseError::not_implemented("yield from", self.convert_range(y.range))),
            AstExpr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                let left = Box::new(self.parse_expression(*left)?);
                let mut comparisons = Vec::with_capacity(ops.len());
                for (op, right) in ops.into_vec().into_iter().zip(comparators.into_vec()) {
                    comparisons.push((convert_compare_op(op), self.parse_expression(right)?));
                }
                Ok(ExprLoc::new(position, Expr::Compare { left, comparisons }))
            }
            AstExpr::Call(ast::ExprCall {
                func, arguments, range, ..
            }) => {
                let position = self.convert_range(range);
                let ast::Arguments { args, keywords, .. } = arguments;
                let args = args
                    .into_vec()
                    .into_iter()
                    .map(|a| match a {
                        AstExpr::Starred(ast::ExprStarred { value, range, .. }) => Ok(ExprLoc::new(
                            self.convert_range(range),
                            Expr::Starred(Box::new(self.parse_expression(*value)?)),
                        )),
                        other => self.parse_expression(other),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let mut kwargs = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    let Some(arg) = keyword.arg else {
                        return Err(ParseError::not_implemented("**kwargs unpacking", position));
                    };
                    kwargs.push((arg.id.to_string(), self.parse_expression(keyword.value)?));
                }
                let expr = match *func {
                    AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Expr::MethodCall {
                        object: Box::new(self.parse_expression(*value)?),
                        method: attr.id.to_string(),
                        args,
                        kwargs,
                    },
                    other => Expr::Call {
                        func: Box::new(self.parse_expression(other)?),
                        args,
                        kwargs,
                    },
                };
                Ok(ExprLoc::new(position, expr))
            }
            AstExpr::FString(ast::ExprFString { value, range, .. }) => self.parse_fstring(&value, range),
            AstExpr::TString(t) => Err(ParseError::not_implemented(
                "template strings (t-strings)",
                self.convert_range(t.range),
            )),
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Literal(Literal::Str(value.to_string())),
            )),
            AstExpr::BytesLiteral(ast::ExprBytesLiteral { value, range, .. }) => {
                let bytes: Cow<'_, [u8]> = Cow::from(&value);
                Ok(ExprLoc::new(
                    self.convert_range(range),
                    Expr::Literal(Literal::Bytes(bytes.into_owned())),
                ))
            }
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => {
                let position = self.convert_range(range);
                let literal = match value {
                    Number::Int(i) => match i.as_i64() {
                        Some(i) => Literal::Int(i),
                        None => {
                            return Err(ParseError::not_supported(
                                format!("integer literal {i} does not fit in 64 bits"),
                                position,
                            ));
                        }
                    },
                    Number::Float(f) => Literal::Float(f),
                    Number::Complex { .. } => return Err(ParseError::not_implemented("complex numbers", position)),
                };
                Ok(ExprLoc::new(position, Expr::Literal(literal)))
            }
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Literal(Literal::Bool(value)),
            )),
            AstExpr::NoneLiteral(ast::ExprNoneLiteral { range, .. }) => {
                Ok(ExprLoc::new(self.convert_range(range), Expr::Literal(Literal::None)))
            }
            AstExpr::EllipsisLiteral(ast::ExprEllipsisLiteral { range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Literal(Literal::Ellipsis),
            )),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Attribute {
                    object: Box::new(self.parse_expression(*value)?),
                    attr: attr.id.to_string(),
                },
            )),
            AstExpr::Subscript(ast::ExprSubscript {
                value, slice, range, ..
            }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Subscript {
                    object: Box::new(self.parse_expression(*value)?),
                    index: Box::new(self.parse_expression(*slice)?),
                },
            )),
            AstExpr::Starred(s) => Err(ParseError::not_implemented(
                "starred expressions outside calls",
                self.convert_range(s.range),
            )),
            AstExpr::Name(ast::ExprName { id, range, .. }) => {
                Ok(ExprLoc::new(self.convert_range(range), Expr::Name(id.to_string())))
            }
            AstExpr::List(ast::ExprList { elts, range, .. }) => {
                let items = self.parse_elements(elts)?;
                Ok(ExprLoc::new(self.convert_range(range), Expr::List(items)))
            }
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) => {
                let items = self.parse_elements(elts)?;
                Ok(ExprLoc::new(self.convert_range(range), Expr::Tuple(items)))
            }
            AstExpr::Slice(ast::ExprSlice {
                lower,
                upper,
                step,
                range,
                ..
            }) => {
                let lower = lower.map(|e| self.parse_expression(*e)).transpose()?;
                let upper = upper.map(|e| self.parse_expression(*e)).transpose()?;
                let step = step.map(|e| self.parse_expression(*e)).transpose()?;
                Ok(ExprLoc::new(
                    self.convert_range(range),
                    Expr::Slice {
                        lower: lower.map(Box::new),
                        upper: upper.map(Box::new),
                        step: step.map(Box::new),
                    },
                ))
            }
            AstExpr::IpyEscapeCommand(i) => Err(ParseError::not_implemented(
                "IPython escape commands",
                self.convert_range(i.range),
            )),
        }
    }

    fn parse_elements(&mut self, elts: Vec<AstExpr>) -> Result<Vec<ExprLoc>, ParseError> {
        elts.into_iter().map(|e| self.parse_expression(e)).collect()
    }

    fn parse_fstring(&mut self, value: &ast::FStringValue, range: TextRange) -> Result<ExprLoc, ParseError> {
        let position = self.convert_range(range);
        let mut parts = Vec::new();
        for fstring_part in value {
            match fstring_part {
                ast::FStringPart::Literal(lit) => {
                    let text = lit.value.to_string();
                    if !text.is_empty() {
                        parts.push(FStringPart::Literal(text));
                    }
                }
                ast::FStringPart::FString(fstring) => {
                    for element in &fstring.elements {
                        parts.push(self.parse_fstring_element(element, position)?);
                    }
                }
            }
        }
        Ok(ExprLoc::new(position, Expr::FString(parts)))
    }

    fn parse_fstring_element(
        &mut self,
        element: &InterpolatedStringElement,
        position: CodeRange,
    ) -> Result<FStringPart, ParseError> {
        match element {
            InterpolatedStringElement::Literal(lit) => Ok(FStringPart::Literal(lit.value.to_string())),
            InterpolatedStringElement::Interpolation(interp) => {
                if interp.debug_text.is_some() {
                    return Err(ParseError::not_implemented("f-string `=` specifiers", position));
                }
                let expr = Box::new(self.parse_expression((*interp.expression).clone())?);
                let conversion = match interp.conversion {
                    RuffConversionFlag::None => Conversion::None,
                    RuffConversionFlag::Str => Conversion::Str,
                    RuffConversionFlag::Repr => Conversion::Repr,
                    RuffConversionFlag::Ascii => {
                        return Err(ParseError::not_implemented("the !a conversion", position));
                    }
                };
                let format_spec = match &interp.format_spec {
                    Some(spec) => {
                        let mut text = String::new();
                        for element in &spec.elements {
                            match element {
                                InterpolatedStringElement::Literal(lit) => text.push_str(&lit.value),
                                InterpolatedStringElement::Interpolation(_) => {
                                    return Err(ParseError::not_implemented("nested format specs", position));
                                }
                            }
                        }
                        Some(text)
                    }
                    None => None,
                };
                Ok(FStringPart::Interpolation {
                    expr,
                    conversion,
                    format_spec,
                })
            }
        }
    }

    fn convert_range(&self, range: TextRange) -> CodeRange {
        let start: usize = range.start().into();
        let end: usize = range.end().into();
        CodeRange::new(self.index_to_loc(start), self.index_to_loc(end))
    }

    fn index_to_loc(&self, index: usize) -> CodeLoc {
        let line = self.line_ends.partition_point(|end| *end < index);
        let line_start = if line == 0 { 0 } else { self.line_ends[line - 1] + 1 };
        let column = self.code[line_start..index.min(self.code.len())].chars().count();
        CodeLoc::new(line as u32 + 1, column as u32 + 1)
    }

    fn decr_depth_remaining(&mut self, get_range: impl FnOnce() -> TextRange) -> Result<(), ParseError> {
        if let Some(depth_remaining) = self.depth_remaining.checked_sub(1) {
            self.depth_remaining = depth_remaining;
            Ok(())
        } else {
            let position = self.convert_range(get_range());
            Err(ParseError::syntax("too many nested parentheses", position))
        }
    }
}

fn convert_op(op: AstOperator, position: CodeRange) -> Result<Operator, ParseError> {
    match op {
        AstOperator::Add => Ok(Operator::Add),
        AstOperator::Sub => Ok(Operator::Sub),
        AstOperator::Mult => Ok(Operator::Mult),
        AstOperator::Div => Ok(Operator::Div),
        AstOperator::FloorDiv => Ok(Operator::FloorDiv),
        AstOperator::Mod => Ok(Operator::Mod),
        AstOperator::Pow => Ok(Operator::Pow),
        other => Err(ParseError::not_implemented(
            format!("the {} operator", other.as_str()),
            position,
        )),
    }
}

fn convert_compare_op(op: CmpOp) -> CmpOperator {
    match op {
        CmpOp::Eq => CmpOperator::Eq,
        CmpOp::NotEq => CmpOperator::NotEq,
        CmpOp::Lt => CmpOperator::Lt,
        CmpOp::LtE => CmpOperator::LtE,
        CmpOp::Gt => CmpOperator::Gt,
        CmpOp::GtE => CmpOperator::GtE,
        CmpOp::Is => CmpOperator::Is,
        CmpOp::IsNot => CmpOperator::IsNot,
        CmpOp::In => CmpOperator::In,
        CmpOp::NotIn => CmpOperator::NotIn,
    }
}

/// Error raised while parsing or compiling source code.
#[derive(Debug, Clone)]
pub enum ParseError {
    /// Invalid Python syntax.
    Syntax {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
    /// Valid Python the interpreter does not support.
    /// Message gets prefixed with "The pausa parser does not yet support ".
    NotImplemented {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
    /// Unsupported construct with a custom full message.
    NotSupported {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
    /// Import of an unknown module or name.
    Import {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
}

impl ParseError {
    pub(crate) fn not_implemented(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::NotImplemented {
            msg: msg.into(),
            position,
        }
    }

    pub(crate) fn not_supported(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::NotSupported {
            msg: msg.into(),
            position,
        }
    }

    fn import(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::Import {
            msg: msg.into(),
            position,
        }
    }

    pub(crate) fn syntax(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::Syntax {
            msg: msg.into(),
            position,
        }
    }

    /// Converts this parser error into a Python exception with source location.
    #[must_use]
    pub fn into_python_exc(self, filename: &str, source: &str) -> Exception {
        let (exc_type, message, position) = match self {
            Self::Syntax { msg, position } => (ExcType::SyntaxError, msg.into_owned(), position),
            Self::NotImplemented { msg, position } => (
                ExcType::NotImplementedError,
                format!("The pausa parser does not yet support {msg}"),
                position,
            ),
            Self::NotSupported { msg, position } => (ExcType::NotImplementedError, msg.into_owned(), position),
            Self::Import { msg, position } => (ExcType::ImportError, msg.into_owned(), position),
        };
        let frame = StackFrame::from_position(position, filename, None, source);
        Exception::new_full(exc_type, Some(message), vec![frame], None)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { msg, .. } | Self::NotSupported { msg, .. } | Self::Import { msg, .. } => f.write_str(msg),
            Self::NotImplemented { msg, .. } => write!(f, "The pausa parser does not yet support {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based() {
        let nodes = parse("x = 1\ny = x + 2\n").unwrap();
        let Node::Assign { value, .. } = &nodes[1] else {
            panic!("expected assignment");
        };
        assert_eq!(value.position.start, CodeLoc::new(2, 5));
        assert_eq!(value.position.end, CodeLoc::new(2, 10));
    }

    #[test]
    fn elif_chain_nests() {
        let nodes = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n").unwrap();
        let Node::If { or_else, .. } = &nodes[0] else {
            panic!("expected if");
        };
        assert!(matches!(or_else.as_slice(), [Node::If { .. }]));
    }

    #[test]
    fn unsupported_syntax_is_not_implemented() {
        let err = parse("class A:\n    pass\n").unwrap_err();
        let exc = err.into_python_exc("main.py", "class A:\n    pass\n");
        assert_eq!(exc.exc_type(), ExcType::NotImplementedError);
        assert_eq!(
            exc.message(),
            Some("The pausa parser does not yet support class definitions")
        );
    }

    #[test]
    fn unknown_import() {
        let err = parse("import socket").unwrap_err();
        let exc = err.into_python_exc("main.py", "import socket");
        assert_eq!(exc.exc_type(), ExcType::ImportError);
        assert_eq!(exc.message(), Some("No module named 'socket'"));
    }

    #[test]
    fn syntax_error() {
        let err = parse("x = (").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }
}
