//! Compiles the parsed node tree into bytecode.
//!
//! Each function body becomes its own [`Code`]; index 0 of the function table is the module.
//! Names are resolved statically: function locals live in frame slots, everything assigned at
//! module level (or declared `global`) lives in a global slot, and unassigned builtin names load
//! the builtin directly.

use ahash::AHashSet;
use indexmap::IndexSet;

use super::{builder::CodeBuilder, code::Code, op::Opcode};
use crate::{
    ExcType,
    builtins::Builtin,
    expressions::{
        CmpOperator, ExceptHandler, Expr, ExprLoc, FStringPart, FunctionDef, Literal, Node, Operator, Target, Try,
        exc_type_for_name,
    },
    parse::{CodeRange, ParseError},
    value::Value,
};

pub(crate) type CompileError = ParseError;

/// Output of compiling a module.
#[derive(Debug)]
pub(crate) struct CompileResult {
    /// Code objects, index 0 is the module body.
    pub functions: Vec<Code>,
    /// Name of every global slot: external functions, then inputs, then the rest.
    pub global_names: Vec<String>,
}

/// Where a name is read from or written to.
#[derive(Debug, Clone, Copy)]
enum NameSlot {
    Local(u32),
    Global(u32),
    Builtin(Builtin),
    ExcClass(ExcType),
}

/// A block that `break`, `continue` or `return` must unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    /// Inside a `try` body, a handler is registered.
    Try,
    /// Inside an `except` clause, an exception is being handled.
    Handler,
    /// Inside a `try` that has a `finally` clause.
    Finally,
}

#[derive(Debug)]
struct LoopContext {
    continue_target: u32,
    break_jumps: Vec<usize>,
    /// Length of the block stack when the loop was entered.
    block_depth: usize,
    /// `for` loops keep their iterator on the stack.
    is_for: bool,
}

/// Global state shared by the module compiler and every nested function compiler.
#[derive(Debug)]
struct Shared {
    functions: Vec<Code>,
    globals: IndexSet<String>,
    /// Names that are bound at module level or declared `global` somewhere.
    module_names: AHashSet<String>,
}

pub(crate) struct Compiler<'s> {
    builder: CodeBuilder,
    shared: &'s mut Shared,
    /// Local slots, `None` at module level.
    locals: Option<IndexSet<String>>,
    loops: Vec<LoopContext>,
    blocks: Vec<BlockKind>,
}

impl Compiler<'_> {
    /// Compiles a module.
    ///
    /// `external_functions` and `input_names` occupy the first global slots in that order.
    pub fn compile_module(
        nodes: &[Node],
        external_functions: &[String],
        input_names: &[String],
    ) -> Result<CompileResult, CompileError> {
        let mut globals = IndexSet::new();
        globals.extend(external_functions.iter().cloned());
        globals.extend(input_names.iter().cloned());

        let mut module_names: AHashSet<String> = globals.iter().cloned().collect();
        let mut declared_global = AHashSet::new();
        let mut assigned = IndexSet::new();
        collect_assigned(nodes, &mut assigned, &mut declared_global);
        collect_declared_globals(nodes, &mut declared_global);
        module_names.extend(assigned);
        module_names.extend(declared_global);

        let mut shared = Shared {
            functions: vec![Code::default()],
            globals,
            module_names,
        };
        let mut compiler = Compiler {
            builder: CodeBuilder::new(),
            shared: &mut shared,
            locals: None,
            loops: Vec::new(),
            blocks: Vec::new(),
        };

        // the final expression statement is the module's result
        match nodes.split_last() {
            Some((Node::Expr(expr), rest)) => {
                compiler.compile_block(rest)?;
                compiler.compile_expr(expr)?;
            }
            _ => {
                compiler.compile_block(nodes)?;
                compiler.load_none();
            }
        }
        compiler.builder.emit(Opcode::Return);
        let module = compiler.builder.build("<module>".to_owned(), Vec::new(), 0);

        shared.functions[0] = module;
        Ok(CompileResult {
            functions: shared.functions,
            global_names: shared.globals.into_iter().collect(),
        })
    }
}

impl Compiler<'_> {
    fn compile_function(&mut self, def: &FunctionDef) -> Result<u32, CompileError> {
        let index = self.shared.functions.len();
        self.shared.functions.push(Code::default());

        let mut declared_global = AHashSet::new();
        let mut assigned = IndexSet::new();
        collect_assigned(&def.body, &mut assigned, &mut declared_global);
        let mut locals: IndexSet<String> = def.params.iter().map(|p| p.name.clone()).collect();
        for name in assigned {
            if !declared_global.contains(&name) {
                locals.insert(name);
            }
        }

        let mut compiler = Compiler {
            builder: CodeBuilder::new(),
            shared: &mut *self.shared,
            locals: Some(locals),
            loops: Vec::new(),
            blocks: Vec::new(),
        };
        compiler.builder.set_location(def.position);
        compiler.compile_block(&def.body)?;
        compiler.load_none();
        compiler.builder.emit(Opcode::Return);

        let local_names = compiler.locals.take().unwrap_or_default().into_iter().collect();
        let code = compiler
            .builder
            .build(def.name.clone(), local_names, def.params.len() as u32);
        self.shared.functions[index] = code;
        Ok(index as u32)
    }

    fn compile_block(&mut self, nodes: &[Node]) -> Result<(), CompileError> {
        nodes.iter().try_for_each(|node| self.compile_node(node))
    }

    fn compile_node(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Expr(expr) => {
                self.compile_expr(expr)?;
                self.builder.emit(Opcode::Pop);
            }
            Node::Assign { targets, value } => {
                self.compile_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.builder.emit(Opcode::Dup);
                    }
                    self.compile_store(target, value.position)?;
                }
            }
            Node::AugAssign {
                target,
                op,
                value,
                position,
            } => match target {
                Target::Name(name) => {
                    self.builder.set_location(*position);
                    self.compile_load_name(name);
                    self.compile_expr(value)?;
                    self.builder.set_location(*position);
                    self.builder.emit(Opcode::Inplace(*op));
                    self.compile_store_name(name);
                }
                Target::Subscript { object, index } => {
                    self.compile_expr(object)?;
                    self.compile_expr(index)?;
                    self.builder.set_location(*position);
                    self.builder.emit(Opcode::Dup2);
                    self.builder.emit(Opcode::Subscript);
                    self.compile_expr(value)?;
                    self.builder.set_location(*position);
                    self.builder.emit(Opcode::Inplace(*op));
                    self.builder.emit(Opcode::Rot3);
                    self.builder.emit(Opcode::StoreSubscript);
                }
                Target::Tuple(_) => {
                    return Err(ParseError::syntax(
                        "'tuple' is an illegal expression for augmented assignment",
                        *position,
                    ));
                }
            },
            Node::If { test, body, or_else } => {
                self.compile_expr(test)?;
                let to_else = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.compile_block(body)?;
                if or_else.is_empty() {
                    self.builder.patch_jump(to_else);
                } else {
                    let to_end = self.builder.emit_jump(Opcode::Jump);
                    self.builder.patch_jump(to_else);
                    self.compile_block(or_else)?;
                    self.builder.patch_jump(to_end);
                }
            }
            Node::While { test, body, or_else } => {
                let start = self.builder.offset();
                self.compile_expr(test)?;
                let to_exit = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.push_loop(start, false);
                self.compile_block(body)?;
                self.builder.emit(Opcode::Jump(start));
                let context = self.loops.pop();
                self.builder.patch_jump(to_exit);
                self.compile_block(or_else)?;
                self.patch_breaks(context);
            }
            Node::For {
                target,
                iter,
                body,
                or_else,
                position,
            } => {
                self.compile_expr(iter)?;
                self.builder.set_location(*position);
                self.builder.emit(Opcode::GetIter);
                let start = self.builder.offset();
                let to_exit = self.builder.emit_jump(Opcode::ForIter);
                self.compile_store(target, *position)?;
                self.push_loop(start, true);
                self.compile_block(body)?;
                self.builder.emit(Opcode::Jump(start));
                let context = self.loops.pop();
                self.builder.patch_jump(to_exit);
                self.compile_block(or_else)?;
                self.patch_breaks(context);
            }
            Node::Break(position) => {
                self.builder.set_location(*position);
                let Some(context) = self.loops.last() else {
                    return Err(ParseError::syntax("'break' outside loop", *position));
                };
                let (block_depth, is_for) = (context.block_depth, context.is_for);
                self.unwind_blocks(block_depth, "'break'", *position)?;
                if is_for {
                    self.builder.emit(Opcode::Pop);
                }
                let jump = self.builder.emit_jump(Opcode::Jump);
                if let Some(context) = self.loops.last_mut() {
                    context.break_jumps.push(jump);
                }
            }
            Node::Continue(position) => {
                self.builder.set_location(*position);
                let Some(context) = self.loops.last() else {
                    return Err(ParseError::syntax("'continue' not properly in loop", *position));
                };
                let (block_depth, target) = (context.block_depth, context.continue_target);
                self.unwind_blocks(block_depth, "'continue'", *position)?;
                self.builder.emit(Opcode::Jump(target));
            }
            Node::Pass | Node::Global(_) => {}
            Node::FunctionDef(def) => {
                self.builder.set_location(def.position);
                let mut defaults = 0;
                for param in &def.params {
                    if let Some(default) = &param.default {
                        self.compile_expr(default)?;
                        defaults += 1;
                    }
                }
                let function = self.compile_function(def)?;
                self.builder.set_location(def.position);
                self.builder.emit(Opcode::MakeFunction { function, defaults });
                self.compile_store_name(&def.name);
            }
            Node::Return { value, position } => {
                if self.locals.is_none() {
                    return Err(ParseError::syntax("'return' outside function", *position));
                }
                if self.blocks.contains(&BlockKind::Finally) {
                    return Err(ParseError::not_implemented("'return' inside 'try' with 'finally'", *position));
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.load_none(),
                }
                self.builder.set_location(*position);
                self.builder.emit(Opcode::Return);
            }
            Node::Try(try_) => self.compile_try(try_)?,
            Node::Raise { exc, position } => {
                match exc {
                    Some(exc) => {
                        self.compile_expr(exc)?;
                        self.builder.set_location(*position);
                        self.builder.emit(Opcode::Raise);
                    }
                    None => {
                        self.builder.set_location(*position);
                        self.builder.emit(Opcode::Reraise);
                    }
                }
            }
            Node::Assert { test, msg, position } => {
                self.compile_expr(test)?;
                let to_end = self.builder.emit_jump(Opcode::JumpIfTrue);
                self.builder.set_location(*position);
                self.builder.emit(Opcode::LoadExcClass(ExcType::AssertionError));
                let args = match msg {
                    Some(msg) => {
                        self.compile_expr(msg)?;
                        1
                    }
                    None => 0,
                };
                self.builder.set_location(*position);
                self.builder.emit(Opcode::Call { args, kwnames: None });
                self.builder.emit(Opcode::Raise);
                self.builder.patch_jump(to_end);
            }
            Node::Import { module, binding } => {
                self.builder.emit(Opcode::ImportModule(*module));
                self.compile_store_name(binding);
            }
            Node::ImportFrom {
                module,
                names,
                position,
            } => {
                self.builder.set_location(*position);
                for (name, binding) in names {
                    self.builder.emit(Opcode::ImportModule(*module));
                    let idx = self.builder.add_name(name);
                    self.builder.emit(Opcode::GetAttr(idx));
                    self.compile_store_name(binding);
                }
            }
        }
        Ok(())
    }

    fn compile_try(&mut self, try_: &Try) -> Result<(), CompileError> {
        if try_.finally.is_empty() {
            return self.compile_try_except(&try_.body, &try_.handlers, &try_.or_else);
        }
        let to_finally = self.builder.emit_jump(Opcode::SetupExcept);
        self.blocks.push(BlockKind::Finally);
        self.compile_try_except(&try_.body, &try_.handlers, &try_.or_else)?;
        self.blocks.pop();
        self.builder.emit(Opcode::PopBlock);
        self.compile_block(&try_.finally)?;
        let to_end = self.builder.emit_jump(Opcode::Jump);

        // exception path: run the finally body, then re-raise
        self.builder.patch_jump(to_finally);
        self.builder.emit(Opcode::Pop);
        self.blocks.push(BlockKind::Handler);
        self.compile_block(&try_.finally)?;
        self.blocks.pop();
        self.builder.emit(Opcode::Reraise);
        self.builder.patch_jump(to_end);
        Ok(())
    }

    fn compile_try_except(
        &mut self,
        body: &[Node],
        handlers: &[ExceptHandler],
        or_else: &[Node],
    ) -> Result<(), CompileError> {
        if handlers.is_empty() {
            self.compile_block(body)?;
            return self.compile_block(or_else);
        }
        let to_handlers = self.builder.emit_jump(Opcode::SetupExcept);
        self.blocks.push(BlockKind::Try);
        self.compile_block(body)?;
        self.blocks.pop();
        self.builder.emit(Opcode::PopBlock);
        self.compile_block(or_else)?;
        let mut to_end = vec![self.builder.emit_jump(Opcode::Jump)];

        // the raised exception is on top of the stack here
        self.builder.patch_jump(to_handlers);
        for handler in handlers {
            let to_next = match &handler.exc_type {
                Some(exc_type) => {
                    self.builder.emit(Opcode::Dup);
                    self.compile_expr(exc_type)?;
                    self.builder.set_location(exc_type.position);
                    self.builder.emit(Opcode::CheckExcMatch);
                    Some(self.builder.emit_jump(Opcode::JumpIfFalse))
                }
                None => None,
            };
            match &handler.name {
                Some(name) => self.compile_store_name(name),
                None => self.builder.emit(Opcode::Pop),
            }
            self.blocks.push(BlockKind::Handler);
            self.compile_block(&handler.body)?;
            self.blocks.pop();
            self.builder.emit(Opcode::PopExcept);
            to_end.push(self.builder.emit_jump(Opcode::Jump));
            if let Some(to_next) = to_next {
                self.builder.patch_jump(to_next);
            }
        }
        self.builder.emit(Opcode::Reraise);
        for jump in to_end {
            self.builder.patch_jump(jump);
        }
        Ok(())
    }

    fn push_loop(&mut self, continue_target: u32, is_for: bool) {
        self.loops.push(LoopContext {
            continue_target,
            break_jumps: Vec::new(),
            block_depth: self.blocks.len(),
            is_for,
        });
    }

    fn patch_breaks(&mut self, context: Option<LoopContext>) {
        if let Some(context) = context {
            for jump in context.break_jumps {
                self.builder.patch_jump(jump);
            }
        }
    }

    /// Emits the instructions leaving every block entered since `depth`.
    fn unwind_blocks(&mut self, depth: usize, keyword: &str, position: CodeRange) -> Result<(), CompileError> {
        for i in (depth..self.blocks.len()).rev() {
            match self.blocks[i] {
                BlockKind::Try => self.builder.emit(Opcode::PopBlock),
                BlockKind::Handler => self.builder.emit(Opcode::PopExcept),
                BlockKind::Finally => {
                    return Err(ParseError::not_implemented(
                        format!("{keyword} inside 'try' with 'finally'"),
                        position,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Stores the value on top of the stack into `target`.
    fn compile_store(&mut self, target: &Target, position: CodeRange) -> Result<(), CompileError> {
        match target {
            Target::Name(name) => self.compile_store_name(name),
            Target::Subscript { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder.set_location(position);
                self.builder.emit(Opcode::StoreSubscript);
            }
            Target::Tuple(targets) => {
                self.builder.set_location(position);
                self.builder.emit(Opcode::UnpackSequence(targets.len() as u32));
                for target in targets {
                    self.compile_store(target, position)?;
                }
            }
        }
        Ok(())
    }

    fn resolve(&mut self, name: &str) -> NameSlot {
        if let Some(locals) = &self.locals
            && let Some(idx) = locals.get_index_of(name)
        {
            return NameSlot::Local(idx as u32);
        }
        if !self.shared.module_names.contains(name) {
            if let Some(builtin) = Builtin::from_name(name) {
                return NameSlot::Builtin(builtin);
            }
            if let Some(exc_type) = exc_type_for_name(name) {
                return NameSlot::ExcClass(exc_type);
            }
        }
        let (idx, _) = self.shared.globals.insert_full(name.to_owned());
        NameSlot::Global(idx as u32)
    }

    fn compile_load_name(&mut self, name: &str) {
        let op = match self.resolve(name) {
            NameSlot::Local(idx) => Opcode::LoadLocal(idx),
            NameSlot::Global(idx) => Opcode::LoadGlobal(idx),
            NameSlot::Builtin(builtin) => Opcode::LoadBuiltin(builtin),
            NameSlot::ExcClass(exc_type) => Opcode::LoadExcClass(exc_type),
        };
        self.builder.emit(op);
    }

    fn compile_store_name(&mut self, name: &str) {
        let op = match self.resolve(name) {
            NameSlot::Local(idx) => Opcode::StoreLocal(idx),
            NameSlot::Global(idx) => Opcode::StoreGlobal(idx),
            // only reachable for a builtin name bound in a way the scan does not see
            NameSlot::Builtin(_) | NameSlot::ExcClass(_) => {
                let (idx, _) = self.shared.globals.insert_full(name.to_owned());
                Opcode::StoreGlobal(idx as u32)
            }
        };
        self.builder.emit(op);
    }

    fn load_none(&mut self) {
        let idx = self.builder.add_const(Value::None);
        self.builder.emit(Opcode::LoadConst(idx));
    }

    fn compile_expr(&mut self, expr: &ExprLoc) -> Result<(), CompileError> {
        self.builder.set_location(expr.position);
        match &expr.expr {
            Expr::Literal(literal) => {
                let value = match literal {
                    Literal::None => Value::None,
                    Literal::Ellipsis => Value::Ellipsis,
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Int(i) => Value::Int(*i),
                    Literal::Float(f) => Value::Float(*f),
                    Literal::Str(s) => Value::Str(s.clone()),
                    Literal::Bytes(b) => Value::Bytes(b.clone()),
                };
                let idx = self.builder.add_const(value);
                self.builder.emit(Opcode::LoadConst(idx));
            }
            Expr::FString(parts) => {
                for part in parts {
                    match part {
                        FStringPart::Literal(s) => {
                            let idx = self.builder.add_const(Value::Str(s.clone()));
                            self.builder.emit(Opcode::LoadConst(idx));
                        }
                        FStringPart::Interpolation {
                            expr: inner,
                            conversion,
                            format_spec,
                        } => {
                            self.compile_expr(inner)?;
                            let spec = format_spec
                                .as_ref()
                                .map(|spec| self.builder.add_const(Value::Str(spec.clone())));
                            self.builder.set_location(expr.position);
                            self.builder.emit(Opcode::FormatValue {
                                conversion: *conversion,
                                spec,
                            });
                        }
                    }
                }
                self.builder.emit(Opcode::BuildString(parts.len() as u32));
            }
            Expr::Name(name) => self.compile_load_name(name),
            Expr::List(items) => {
                self.compile_exprs(items)?;
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::BuildList(items.len() as u32));
            }
            Expr::Tuple(items) => {
                self.compile_exprs(items)?;
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::BuildTuple(items.len() as u32));
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::BuildDict(pairs.len() as u32));
            }
            Expr::Op { left, op, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::Binary(*op));
            }
            Expr::And(values) => self.compile_bool_op(values, Opcode::JumpIfFalseOrPop)?,
            Expr::Or(values) => self.compile_bool_op(values, Opcode::JumpIfTrueOrPop)?,
            Expr::Not(operand) => {
                self.compile_expr(operand)?;
                self.builder.emit(Opcode::Not);
            }
            Expr::Neg(operand) => {
                self.compile_expr(operand)?;
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::Neg);
            }
            Expr::Pos(operand) => {
                self.compile_expr(operand)?;
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::Pos);
            }
            Expr::Compare { left, comparisons } => self.compile_compare(left, comparisons, expr.position)?,
            Expr::IfElse { test, body, orelse } => {
                self.compile_expr(test)?;
                let to_else = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(body)?;
                let to_end = self.builder.emit_jump(Opcode::Jump);
                self.builder.patch_jump(to_else);
                self.compile_expr(orelse)?;
                self.builder.patch_jump(to_end);
            }
            Expr::Call { func, args, kwargs } => {
                self.compile_expr(func)?;
                let starred = self.compile_call_args(args)?;
                let kwnames = self.compile_kwargs(kwargs)?;
                self.builder.set_location(expr.position);
                if starred {
                    self.builder.emit(Opcode::CallVar { kwnames });
                } else {
                    self.builder.emit(Opcode::Call {
                        args: args.len() as u32,
                        kwnames,
                    });
                }
            }
            Expr::MethodCall {
                object,
                method,
                args,
                kwargs,
            } => {
                self.compile_expr(object)?;
                let starred = self.compile_call_args(args)?;
                let kwnames = self.compile_kwargs(kwargs)?;
                let name = self.builder.add_name(method);
                self.builder.set_location(expr.position);
                if starred {
                    self.builder.emit(Opcode::CallMethodVar { name, kwnames });
                } else {
                    self.builder.emit(Opcode::CallMethod {
                        name,
                        args: args.len() as u32,
                        kwnames,
                    });
                }
            }
            Expr::Attribute { object, attr } => {
                self.compile_expr(object)?;
                let idx = self.builder.add_name(attr);
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::GetAttr(idx));
            }
            Expr::Subscript { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::Subscript);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step] {
                    match part {
                        Some(part) => self.compile_expr(part)?,
                        None => self.load_none(),
                    }
                }
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::BuildSlice);
            }
            Expr::Await(value) => {
                self.compile_expr(value)?;
                self.builder.set_location(expr.position);
                self.builder.emit(Opcode::Await);
            }
            Expr::Starred(_) => {
                return Err(ParseError::syntax("can't use starred expression here", expr.position));
            }
        }
        Ok(())
    }

    fn compile_exprs(&mut self, exprs: &[ExprLoc]) -> Result<(), CompileError> {
        exprs.iter().try_for_each(|e| self.compile_expr(e))
    }

    /// Compiles positional arguments, returns whether they were packed into one tuple for `*args`.
    fn compile_call_args(&mut self, args: &[ExprLoc]) -> Result<bool, CompileError> {
        if !args.iter().any(|a| matches!(a.expr, Expr::Starred(_))) {
            self.compile_exprs(args)?;
            return Ok(false);
        }
        // concatenate runs of plain arguments and starred iterables into a single tuple
        let mut pending = 0;
        let mut have_tuple = false;
        for arg in args {
            if let Expr::Starred(inner) = &arg.expr {
                if pending > 0 || !have_tuple {
                    self.builder.emit(Opcode::BuildTuple(pending));
                    if have_tuple {
                        self.builder.emit(Opcode::Binary(Operator::Add));
                    }
                    have_tuple = true;
                    pending = 0;
                }
                self.compile_expr(inner)?;
                self.builder.set_location(arg.position);
                self.builder.emit(Opcode::ToTuple);
                self.builder.emit(Opcode::Binary(Operator::Add));
            } else {
                self.compile_expr(arg)?;
                pending += 1;
            }
        }
        if pending > 0 {
            self.builder.emit(Opcode::BuildTuple(pending));
            self.builder.emit(Opcode::Binary(Operator::Add));
        }
        Ok(true)
    }

    fn compile_kwargs(&mut self, kwargs: &[(String, ExprLoc)]) -> Result<Option<u32>, CompileError> {
        for (_, value) in kwargs {
            self.compile_expr(value)?;
        }
        Ok(self.builder.add_kwnames(kwargs.iter().map(|(k, _)| k.clone()).collect()))
    }

    fn compile_bool_op(&mut self, values: &[ExprLoc], jump: fn(u32) -> Opcode) -> Result<(), CompileError> {
        let mut jumps = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            self.compile_expr(value)?;
            if i + 1 < values.len() {
                jumps.push(self.builder.emit_jump(jump));
            }
        }
        for jump in jumps {
            self.builder.patch_jump(jump);
        }
        Ok(())
    }

    /// `a < b < c` evaluates `b` once and stops at the first false comparison.
    fn compile_compare(
        &mut self,
        left: &ExprLoc,
        comparisons: &[(CmpOperator, ExprLoc)],
        position: CodeRange,
    ) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        let mut cleanup_jumps = Vec::new();
        for (i, (op, right)) in comparisons.iter().enumerate() {
            self.compile_expr(right)?;
            self.builder.set_location(position);
            if i + 1 < comparisons.len() {
                self.builder.emit(Opcode::Dup);
                self.builder.emit(Opcode::Rot3);
                self.builder.emit(Opcode::Compare(*op));
                cleanup_jumps.push(self.builder.emit_jump(Opcode::JumpIfFalseOrPop));
            } else {
                self.builder.emit(Opcode::Compare(*op));
            }
        }
        if !cleanup_jumps.is_empty() {
            let to_end = self.builder.emit_jump(Opcode::Jump);
            for jump in cleanup_jumps {
                self.builder.patch_jump(jump);
            }
            // drop the saved operand below the false result
            self.builder.emit(Opcode::Rot2);
            self.builder.emit(Opcode::Pop);
            self.builder.patch_jump(to_end);
        }
        Ok(())
    }
}

/// Collects every name bound by `nodes` without entering nested function bodies.
fn collect_assigned(nodes: &[Node], assigned: &mut IndexSet<String>, declared_global: &mut AHashSet<String>) {
    for node in nodes {
        match node {
            Node::Assign { targets, .. } => targets.iter().for_each(|t| collect_target(t, assigned)),
            Node::AugAssign { target, .. } => collect_target(target, assigned),
            Node::For {
                target, body, or_else, ..
            } => {
                collect_target(target, assigned);
                collect_assigned(body, assigned, declared_global);
                collect_assigned(or_else, assigned, declared_global);
            }
            Node::If { body, or_else, .. } | Node::While { body, or_else, .. } => {
                collect_assigned(body, assigned, declared_global);
                collect_assigned(or_else, assigned, declared_global);
            }
            Node::Try(try_) => {
                collect_assigned(&try_.body, assigned, declared_global);
                for handler in &try_.handlers {
                    if let Some(name) = &handler.name {
                        assigned.insert(name.clone());
                    }
                    collect_assigned(&handler.body, assigned, declared_global);
                }
                collect_assigned(&try_.or_else, assigned, declared_global);
                collect_assigned(&try_.finally, assigned, declared_global);
            }
            Node::FunctionDef(def) => {
                assigned.insert(def.name.clone());
            }
            Node::Import { binding, .. } => {
                assigned.insert(binding.clone());
            }
            Node::ImportFrom { names, .. } => {
                assigned.extend(names.iter().map(|(_, binding)| binding.clone()));
            }
            Node::Global(names) => declared_global.extend(names.iter().cloned()),
            Node::Expr(_)
            | Node::Break(_)
            | Node::Continue(_)
            | Node::Pass
            | Node::Return { .. }
            | Node::Raise { .. }
            | Node::Assert { .. } => {}
        }
    }
}

fn collect_target(target: &Target, assigned: &mut IndexSet<String>) {
    match target {
        Target::Name(name) => {
            assigned.insert(name.clone());
        }
        Target::Tuple(targets) => targets.iter().for_each(|t| collect_target(t, assigned)),
        Target::Subscript { .. } => {}
    }
}

/// Collects `global` declarations from every function nested anywhere in `nodes`.
fn collect_declared_globals(nodes: &[Node], declared: &mut AHashSet<String>) {
    for node in nodes {
        match node {
            Node::FunctionDef(def) => {
                let mut assigned = IndexSet::new();
                collect_assigned(&def.body, &mut assigned, declared);
                collect_declared_globals(&def.body, declared);
            }
            Node::If { body, or_else, .. } | Node::While { body, or_else, .. } | Node::For { body, or_else, .. } => {
                collect_declared_globals(body, declared);
                collect_declared_globals(or_else, declared);
            }
            Node::Try(try_) => {
                collect_declared_globals(&try_.body, declared);
                for handler in &try_.handlers {
                    collect_declared_globals(&handler.body, declared);
                }
                collect_declared_globals(&try_.or_else, declared);
                collect_declared_globals(&try_.finally, declared);
            }
            _ => {}
        }
    }
}
