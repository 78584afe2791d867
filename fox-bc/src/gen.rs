use std::collections::HashMap;

use fox_ast::{
    AstContext, AstNode, BuiltinKind, DeclId, DeclKind, ExprId, ExprKind, StmtId, StmtKind,
    TypeId, TypeKind, UnOp,
};
use fox_common::{DiagId, DiagnosticEngine, SourceRange};

use crate::module::{BytecodeModule, FunctionEntry, GlobalEntry, Instr, TypeTag};
use crate::regalloc::{RegisterAllocator, RegisterValue};

/// Lowers a checked unit to bytecode. Refuses to run over an AST that still
/// carries errors; callers gate on the diagnostic engine's error count.
pub fn generate_module(
    ctx: &AstContext,
    diags: &mut DiagnosticEngine<'_>,
    unit: DeclId,
) -> BytecodeModule {
    if diags.had_errors() {
        return BytecodeModule::default();
    }
    let mut gen = BcGen {
        ctx,
        diags,
        module: BytecodeModule::default(),
        fn_ids: HashMap::new(),
        global_ids: HashMap::new(),
    };
    gen.run(unit);
    gen.module
}

struct BcGen<'a, 's> {
    ctx: &'a AstContext,
    diags: &'a mut DiagnosticEngine<'s>,
    module: BytecodeModule,
    fn_ids: HashMap<DeclId, u16>,
    global_ids: HashMap<DeclId, u16>,
}

impl<'a, 's> BcGen<'a, 's> {
    fn run(&mut self, unit: DeclId) {
        let decls = match &self.ctx.decl(unit).kind {
            DeclKind::Unit { decls, .. } => decls.clone(),
            _ => unreachable!("code generation needs a unit declaration"),
        };

        // Ids are assigned up front so references can load functions and
        // globals declared later in the file.
        for &decl in &decls {
            match &self.ctx.decl(decl).kind {
                DeclKind::Func { .. } => {
                    let id = self.fn_ids.len() as u16;
                    self.fn_ids.insert(decl, id);
                }
                DeclKind::Var { global: true, .. } => {
                    let id = self.global_ids.len() as u16;
                    self.global_ids.insert(decl, id);
                }
                _ => {}
            }
        }

        for &decl in &decls {
            match &self.ctx.decl(decl).kind {
                DeclKind::Var { global: true, .. } => self.gen_global(decl),
                DeclKind::Func { .. } => self.gen_function(decl),
                _ => {}
            }
        }
    }

    fn gen_global(&mut self, decl: DeclId) {
        let (name, type_loc, init) = match &self.ctx.decl(decl).kind {
            DeclKind::Var {
                name,
                type_loc,
                init,
                ..
            } => (*name, *type_loc, *init),
            _ => unreachable!(),
        };
        let id = self.global_ids[&decl];
        let start = self.module.next_index();

        if let Some(init) = init {
            let regs = RegisterAllocator::new();
            let mut body = FnGen {
                bc: self,
                regs: &regs,
            };
            let value = body
                .gen_expr(init, None)
                .expect("global initializer has no value");
            let src = value.address();
            body.bc.module.push(Instr::SetGlobal { global: id, src });
            drop(value);
            self.check_register_pressure(&regs, self.ctx.decl(decl).range);
        }

        let end = self.module.next_index();
        let name = self.ctx.ident_str(name).to_string();
        let tag = type_tag(self.ctx, type_loc.ty);
        self.module.globals.push(GlobalEntry {
            name,
            tag,
            init_range: start..end,
        });
    }

    fn gen_function(&mut self, decl: DeclId) {
        let (name, params, ret, body) = match &self.ctx.decl(decl).kind {
            DeclKind::Func {
                name,
                params,
                ret,
                body,
                ..
            } => (*name, params.clone(), *ret, *body),
            _ => unreachable!(),
        };

        let regs = RegisterAllocator::new();
        // Parameters occupy the first registers, in declaration order, for
        // the whole body.
        let param_handles: Vec<RegisterValue<'_>> =
            params.iter().map(|&p| regs.bind_decl(p)).collect();

        let start = self.module.next_index();
        {
            let mut gen = FnGen {
                bc: self,
                regs: &regs,
            };
            gen.gen_stmt(body);
        }
        // Jumps past the last statement (an `if` with a returning body, a
        // `while` at the end) land here, so every function closes with an
        // unconditional return.
        self.module.push(Instr::Return);
        let end = self.module.next_index();

        drop(param_handles);
        self.check_register_pressure(&regs, self.ctx.decl(decl).range);

        let returns_void = ret.is_none() || ret.is_some_and(|t| t.ty == self.ctx.void_type());
        let name = self.ctx.ident_str(name).to_string();
        self.module.functions.push(FunctionEntry {
            name,
            param_count: params.len() as u8,
            returns_void,
            range: start..end,
            register_count: regs.peak().min(u8::MAX as u16) as u8,
        });
    }

    fn check_register_pressure(&mut self, regs: &RegisterAllocator, range: SourceRange) {
        if regs.overflowed() {
            self.diags
                .report(
                    DiagId::TooManyRegisters,
                    range,
                    "expression requires more registers than the instruction format can address",
                )
                .emit();
        }
    }
}

fn type_tag(ctx: &AstContext, ty: TypeId) -> TypeTag {
    match ctx.type_kind(ctx.rvalue(ty)) {
        TypeKind::Int => TypeTag::Int,
        TypeKind::Double => TypeTag::Double,
        TypeKind::Bool => TypeTag::Bool,
        TypeKind::Char => TypeTag::Char,
        TypeKind::String => TypeTag::String,
        TypeKind::Array(_) => TypeTag::Array,
        other => unreachable!("global of unexpected type {other:?}"),
    }
}

/// How one argument of a builtin call is produced.
#[derive(Clone, Copy)]
enum CallArg {
    Expr(ExprId),
    /// Char operand promoted with a `charToString` call first.
    Promoted(ExprId),
}

/// Per-function generator: owns nothing, borrows the module builder and the
/// function's register allocator.
struct FnGen<'g, 'a, 's> {
    bc: &'g mut BcGen<'a, 's>,
    regs: &'g RegisterAllocator,
}

impl<'g, 'a, 's> FnGen<'g, 'a, 's> {
    fn emit(&mut self, instr: Instr) -> u32 {
        self.bc.module.push(instr)
    }

    fn emit_with_range(&mut self, instr: Instr, range: SourceRange) -> u32 {
        let idx = self.bc.module.push(instr);
        self.bc.module.set_debug_range(idx, range);
        idx
    }

    // ---- statements ----

    fn gen_stmt(&mut self, stmt: StmtId) {
        let range = self.bc.ctx.stmt(stmt).range;
        match self.bc.ctx.stmt(stmt).kind.clone() {
            StmtKind::Null => {}
            StmtKind::Compound(nodes) => {
                // Binding handles collected here free their registers when
                // the scope ends.
                let mut locals: Vec<RegisterValue<'g>> = Vec::new();
                for node in nodes {
                    match node {
                        AstNode::Decl(decl) => self.gen_local_var(decl, &mut locals),
                        AstNode::Stmt(inner) => self.gen_stmt(inner),
                        AstNode::Expr(expr) => self.gen_discarded_expr(expr),
                    }
                }
            }
            StmtKind::Condition {
                cond,
                then_body,
                else_body,
            } => self.gen_condition(range, cond, then_body, else_body),
            StmtKind::While { cond, body } => self.gen_while(range, cond, body),
            StmtKind::Return(expr) => self.gen_return(expr),
        }
    }

    fn gen_condition(
        &mut self,
        range: SourceRange,
        cond: ExprId,
        then_body: StmtId,
        else_body: Option<StmtId>,
    ) {
        {
            let cond_reg = self.gen_expr(cond, None).expect("condition has no value");
            let cond_addr = cond_reg.address();
            // If the condition holds, hop over the jump-to-else.
            self.emit(Instr::CondJump {
                cond: cond_addr,
                offset: 1,
            });
        }
        let jump_if_not = self.emit(Instr::Jump { offset: 0 });

        self.gen_stmt(then_body);

        match else_body {
            Some(else_body) => {
                let jump_end = self.emit(Instr::Jump { offset: 0 });
                let else_start = self.bc.module.next_index();
                self.patch_jump(jump_if_not, else_start, range);
                self.gen_stmt(else_body);
                let end = self.bc.module.next_index();
                self.patch_jump(jump_end, end, range);
            }
            None => {
                let end = self.bc.module.next_index();
                self.patch_jump(jump_if_not, end, range);
            }
        }
    }

    fn gen_while(&mut self, range: SourceRange, cond: ExprId, body: StmtId) {
        let top = self.bc.module.next_index();
        {
            let cond_reg = self.gen_expr(cond, None).expect("condition has no value");
            let cond_addr = cond_reg.address();
            self.emit(Instr::CondJump {
                cond: cond_addr,
                offset: 1,
            });
        }
        let exit_jump = self.emit(Instr::Jump { offset: 0 });

        self.gen_stmt(body);

        let back_jump = self.emit(Instr::Jump { offset: 0 });
        self.patch_jump(back_jump, top, range);
        let end = self.bc.module.next_index();
        self.patch_jump(exit_jump, end, range);
    }

    fn gen_return(&mut self, expr: Option<ExprId>) {
        if let Some(expr) = expr {
            // The return value travels in register 0.
            let value = self.gen_expr(expr, None).expect("return value missing");
            if value.address() != 0 {
                let src = value.address();
                self.emit(Instr::Copy { dst: 0, src });
            }
            drop(value);
        }
        self.emit(Instr::Return);
    }

    fn gen_local_var(&mut self, decl: DeclId, locals: &mut Vec<RegisterValue<'g>>) {
        let regs = self.regs;
        let binding = regs.bind_decl(decl);
        let init = match &self.bc.ctx.decl(decl).kind {
            DeclKind::Var { init, .. } => *init,
            _ => unreachable!("local declaration is not a variable"),
        };
        if let Some(init) = init {
            let dest = regs.use_decl(decl);
            let out = self.gen_expr(init, Some(dest));
            drop(out);
        }
        locals.push(binding);
    }

    fn gen_discarded_expr(&mut self, expr: ExprId) {
        let result = self.gen_expr(expr, None);
        drop(result);
    }

    // ---- jump patching ----

    fn patch_jump(&mut self, jump_idx: u32, target: u32, range: SourceRange) {
        let offset = self.jump_offset(jump_idx, target, range);
        match &mut self.bc.module.instrs[jump_idx as usize] {
            Instr::Jump { offset: slot } | Instr::CondJump { offset: slot, .. } => *slot = offset,
            other => unreachable!("patching a non-jump instruction {other:?}"),
        }
    }

    /// Offset so that executing the jump at `from` continues at `target`.
    fn jump_offset(&mut self, from: u32, target: u32, range: SourceRange) -> i16 {
        let delta = i64::from(target) - (i64::from(from) + 1);
        match i16::try_from(delta) {
            Ok(offset) => offset,
            Err(_) => {
                self.bc
                    .diags
                    .report(
                        DiagId::JumpOffsetTooLarge,
                        range,
                        "jump distance exceeds the instruction format's offset range",
                    )
                    .emit();
                0
            }
        }
    }

    // ---- expressions ----

    /// Generates `expr`. When `dest` is given the value lands there and the
    /// returned handle is `dest` itself; otherwise the generator picks a
    /// register, recycling a child's where possible. Void-typed expressions
    /// take no destination and return `None`.
    fn gen_expr(
        &mut self,
        expr: ExprId,
        dest: Option<RegisterValue<'g>>,
    ) -> Option<RegisterValue<'g>> {
        let expected = dest.as_ref().map(|d| d.address());
        let result = self.gen_expr_inner(expr, dest);
        if let Some(expected) = expected {
            debug_assert_eq!(
                result.as_ref().map(|r| r.address()),
                Some(expected),
                "destination register was provided but not respected"
            );
        }
        result
    }

    fn gen_expr_inner(
        &mut self,
        expr: ExprId,
        dest: Option<RegisterValue<'g>>,
    ) -> Option<RegisterValue<'g>> {
        let range = self.bc.ctx.expr(expr).range;
        match self.bc.ctx.expr(expr).kind.clone() {
            ExprKind::IntLit(value) => {
                let dest = self.try_use(dest);
                self.emit_store_int(dest.address(), value, range);
                Some(dest)
            }
            ExprKind::BoolLit(value) => {
                let dest = self.try_use(dest);
                self.emit_store_int(dest.address(), value as i64, range);
                Some(dest)
            }
            ExprKind::CharLit(value) => {
                let dest = self.try_use(dest);
                self.emit_store_int(dest.address(), value as i64, range);
                Some(dest)
            }
            ExprKind::DoubleLit(value) => {
                let dest = self.try_use(dest);
                let k = self.double_const(value, range);
                self.emit(Instr::LoadDoubleK {
                    dst: dest.address(),
                    k,
                });
                Some(dest)
            }
            ExprKind::StringLit(value) => {
                let dest = self.try_use(dest);
                if value.is_empty() {
                    self.emit(Instr::NewString {
                        dst: dest.address(),
                    });
                } else {
                    let k = self.string_const(&value, range);
                    self.emit(Instr::LoadStringK {
                        dst: dest.address(),
                        k,
                    });
                }
                Some(dest)
            }
            ExprKind::ArrayLit(elems) => self.gen_array_lit(expr, &elems, dest, range),
            ExprKind::Binary { op, lhs, rhs, .. } => {
                if op.is_assignment() {
                    self.gen_assignment(lhs, rhs, dest, range)
                } else if op == fox_ast::BinOp::Concat {
                    self.gen_concat(lhs, rhs, dest, range)
                } else {
                    self.gen_numeric_or_bool_binary(op, lhs, rhs, dest, range)
                }
            }
            ExprKind::Unary { op, child, .. } => self.gen_unary(expr, op, child, dest, range),
            ExprKind::Cast { child, useless, .. } => {
                if useless {
                    // Identity casts evaluate to their child directly.
                    self.gen_expr(child, dest)
                } else {
                    self.gen_cast(expr, child, dest)
                }
            }
            ExprKind::Subscript { base, index } => {
                let builtin = if self.is_string_typed(base) {
                    BuiltinKind::GetChar
                } else {
                    BuiltinKind::ArrGet
                };
                self.emit_builtin_call(
                    builtin,
                    dest,
                    &[CallArg::Expr(base), CallArg::Expr(index)],
                    range,
                )
            }
            ExprKind::Call { callee, args, .. } => self.gen_call(expr, callee, &args, dest, range),
            ExprKind::DeclRef(decl) => self.gen_decl_ref(decl, dest),
            ExprKind::BuiltinMemberRef { .. } => {
                unreachable!("builtin member reference outside of a call past semantic analysis")
            }
            ExprKind::UnresolvedDeclRef(_) | ExprKind::UnresolvedMemberRef { .. } => {
                unreachable!("unresolved reference found past semantic analysis")
            }
            ExprKind::Error => unreachable!("error expression found past semantic analysis"),
        }
    }

    fn gen_decl_ref(
        &mut self,
        decl: DeclId,
        dest: Option<RegisterValue<'g>>,
    ) -> Option<RegisterValue<'g>> {
        match self.bc.ctx.decl(decl).kind.clone() {
            DeclKind::Func { .. } => {
                let dest = self.try_use(dest);
                let func = self.bc.fn_ids[&decl];
                self.emit(Instr::LoadFunc {
                    dst: dest.address(),
                    func,
                });
                Some(dest)
            }
            DeclKind::BuiltinFunc { kind } => {
                let dest = self.try_use(dest);
                self.emit(Instr::LoadBuiltinFunc {
                    dst: dest.address(),
                    builtin: kind,
                });
                Some(dest)
            }
            DeclKind::Var { global: true, .. } => {
                let dest = self.try_use(dest);
                let global = self.bc.global_ids[&decl];
                self.emit(Instr::GetGlobal {
                    global,
                    dst: dest.address(),
                });
                Some(dest)
            }
            DeclKind::Var { .. } | DeclKind::Param { .. } => {
                let regs = self.regs;
                let var_reg = regs.use_decl(decl);
                Some(self.copy_in_dest(dest, var_reg))
            }
            DeclKind::Unit { .. } => unreachable!("reference to a unit declaration"),
        }
    }

    fn gen_unary(
        &mut self,
        expr: ExprId,
        op: UnOp,
        child: ExprId,
        dest: Option<RegisterValue<'g>>,
        range: SourceRange,
    ) -> Option<RegisterValue<'g>> {
        // Unary plus is a no-op.
        if op == UnOp::Plus {
            return self.gen_expr(child, dest);
        }

        if op == UnOp::Minus {
            // Fold negation of literals into the literal emission.
            match self.bc.ctx.expr(child).kind {
                ExprKind::IntLit(value) => {
                    let dest = self.try_use(dest);
                    self.emit_store_int(dest.address(), value.wrapping_neg(), range);
                    return Some(dest);
                }
                ExprKind::DoubleLit(value) => {
                    let dest = self.try_use(dest);
                    let k = self.double_const(-value, range);
                    self.emit(Instr::LoadDoubleK {
                        dst: dest.address(),
                        k,
                    });
                    return Some(dest);
                }
                _ => {}
            }
        }

        let child_reg = self.gen_expr(child, None).expect("operand has no value");
        let src = child_reg.address();
        let dest = self.dest_or_recycle(dest, vec![child_reg]);
        let dst = dest.address();
        match op {
            UnOp::Not => {
                self.emit(Instr::LNot { dst, src });
            }
            UnOp::Minus => {
                if self.is_double_typed(expr) {
                    self.emit(Instr::NegDouble { dst, src });
                } else {
                    self.emit(Instr::NegInt { dst, src });
                }
            }
            UnOp::Plus => unreachable!("handled above"),
        }
        Some(dest)
    }

    fn gen_cast(
        &mut self,
        expr: ExprId,
        child: ExprId,
        dest: Option<RegisterValue<'g>>,
    ) -> Option<RegisterValue<'g>> {
        let to_double = self.is_int_domain(child) && self.is_double_typed(expr);
        let to_int = self.is_double_typed(child) && self.is_int_domain(expr);

        if to_double || to_int {
            let child_reg = self.gen_expr(child, None).expect("operand has no value");
            let src = child_reg.address();
            let dest = self.dest_or_recycle(dest, vec![child_reg]);
            let dst = dest.address();
            if to_double {
                self.emit(Instr::IntToDouble { dst, src });
            } else {
                self.emit(Instr::DoubleToInt { dst, src });
            }
            return Some(dest);
        }

        // Same representation at runtime (casts between int, bool and char,
        // and array casts resolved by unification): just move the value.
        let child_reg = self.gen_expr(child, None).expect("operand has no value");
        Some(self.copy_in_dest(dest, child_reg))
    }

    fn gen_numeric_or_bool_binary(
        &mut self,
        op: fox_ast::BinOp,
        lhs: ExprId,
        rhs: ExprId,
        dest: Option<RegisterValue<'g>>,
        range: SourceRange,
    ) -> Option<RegisterValue<'g>> {
        let int_domain = self.is_int_domain(lhs);

        let lhs_reg = self.gen_expr(lhs, None).expect("operand has no value");
        let rhs_reg = self.gen_expr(rhs, None).expect("operand has no value");
        let lhs_addr = lhs_reg.address();
        let rhs_addr = rhs_reg.address();
        let dest = self.dest_or_recycle(dest, vec![lhs_reg, rhs_reg]);
        let dst = dest.address();

        if int_domain {
            self.emit_int_binop(op, dst, lhs_addr, rhs_addr, range);
        } else {
            self.emit_double_binop(op, dst, lhs_addr, rhs_addr, range);
        }
        Some(dest)
    }

    fn emit_int_binop(&mut self, op: fox_ast::BinOp, dst: u8, lhs: u8, rhs: u8, range: SourceRange) {
        use fox_ast::BinOp;
        match op {
            BinOp::Add => {
                self.emit(Instr::AddInt { dst, lhs, rhs });
            }
            BinOp::Sub => {
                self.emit(Instr::SubInt { dst, lhs, rhs });
            }
            BinOp::Mul => {
                self.emit(Instr::MulInt { dst, lhs, rhs });
            }
            BinOp::Div => {
                self.emit_with_range(Instr::DivInt { dst, lhs, rhs }, range);
            }
            BinOp::Mod => {
                self.emit_with_range(Instr::ModInt { dst, lhs, rhs }, range);
            }
            BinOp::Pow => {
                self.emit(Instr::PowInt { dst, lhs, rhs });
            }
            BinOp::Le => {
                self.emit(Instr::LEInt { dst, lhs, rhs });
            }
            BinOp::Ge => {
                // a >= b  ==  b <= a
                self.emit(Instr::LEInt {
                    dst,
                    lhs: rhs,
                    rhs: lhs,
                });
            }
            BinOp::Lt => {
                self.emit(Instr::LTInt { dst, lhs, rhs });
            }
            BinOp::Gt => {
                // a > b  ==  !(a <= b)
                self.emit(Instr::LEInt { dst, lhs, rhs });
                self.emit(Instr::LNot { dst, src: dst });
            }
            BinOp::Eq => {
                self.emit(Instr::EqInt { dst, lhs, rhs });
            }
            BinOp::NEq => {
                // a != b  ==  !(a == b)
                self.emit(Instr::EqInt { dst, lhs, rhs });
                self.emit(Instr::LNot { dst, src: dst });
            }
            BinOp::LAnd => {
                self.emit(Instr::LAnd { dst, lhs, rhs });
            }
            BinOp::LOr => {
                self.emit(Instr::LOr { dst, lhs, rhs });
            }
            other => unreachable!("unexpected integer binary operator {other:?}"),
        }
    }

    fn emit_double_binop(
        &mut self,
        op: fox_ast::BinOp,
        dst: u8,
        lhs: u8,
        rhs: u8,
        range: SourceRange,
    ) {
        use fox_ast::BinOp;
        match op {
            BinOp::Add => {
                self.emit(Instr::AddDouble { dst, lhs, rhs });
            }
            BinOp::Sub => {
                self.emit(Instr::SubDouble { dst, lhs, rhs });
            }
            BinOp::Mul => {
                self.emit(Instr::MulDouble { dst, lhs, rhs });
            }
            BinOp::Div => {
                self.emit_with_range(Instr::DivDouble { dst, lhs, rhs }, range);
            }
            BinOp::Mod => {
                self.emit_with_range(Instr::ModDouble { dst, lhs, rhs }, range);
            }
            BinOp::Pow => {
                self.emit(Instr::PowDouble { dst, lhs, rhs });
            }
            BinOp::Le => {
                self.emit(Instr::LEDouble { dst, lhs, rhs });
            }
            BinOp::Ge => {
                self.emit(Instr::GEDouble { dst, lhs, rhs });
            }
            BinOp::Lt => {
                self.emit(Instr::LTDouble { dst, lhs, rhs });
            }
            BinOp::Gt => {
                self.emit(Instr::GTDouble { dst, lhs, rhs });
            }
            BinOp::Eq => {
                self.emit(Instr::EqDouble { dst, lhs, rhs });
            }
            BinOp::NEq => {
                self.emit(Instr::EqDouble { dst, lhs, rhs });
                self.emit(Instr::LNot { dst, src: dst });
            }
            other => unreachable!("unexpected double binary operator {other:?}"),
        }
    }

    fn gen_concat(
        &mut self,
        lhs: ExprId,
        rhs: ExprId,
        dest: Option<RegisterValue<'g>>,
        range: SourceRange,
    ) -> Option<RegisterValue<'g>> {
        let lhs_char = self.is_char_typed(lhs);
        let rhs_char = self.is_char_typed(rhs);

        if lhs_char && rhs_char {
            return self.emit_builtin_call(
                BuiltinKind::CharConcat,
                dest,
                &[CallArg::Expr(lhs), CallArg::Expr(rhs)],
                range,
            );
        }

        let lhs_arg = if lhs_char {
            CallArg::Promoted(lhs)
        } else {
            CallArg::Expr(lhs)
        };
        let rhs_arg = if rhs_char {
            CallArg::Promoted(rhs)
        } else {
            CallArg::Expr(rhs)
        };
        self.emit_builtin_call(BuiltinKind::StrConcat, dest, &[lhs_arg, rhs_arg], range)
    }

    fn gen_assignment(
        &mut self,
        lhs: ExprId,
        rhs: ExprId,
        dest: Option<RegisterValue<'g>>,
        range: SourceRange,
    ) -> Option<RegisterValue<'g>> {
        match self.bc.ctx.expr(lhs).kind.clone() {
            ExprKind::DeclRef(decl) => {
                if self.bc.ctx.decl(decl).is_global_var() {
                    let dest = self.try_use(dest);
                    let dest = self
                        .gen_expr(rhs, Some(dest))
                        .expect("assigned value missing");
                    let global = self.bc.global_ids[&decl];
                    let src = dest.address();
                    self.emit(Instr::SetGlobal { global, src });
                    Some(dest)
                } else {
                    // Store straight into the variable's register; copy out
                    // only when a different destination was requested.
                    let regs = self.regs;
                    let var_reg = regs.use_decl(decl);
                    let result = self
                        .gen_expr(rhs, Some(var_reg))
                        .expect("assigned value missing");
                    Some(self.copy_in_dest(dest, result))
                }
            }
            ExprKind::Subscript { base, index } => {
                // arrSet returns its third argument.
                self.emit_builtin_call(
                    BuiltinKind::ArrSet,
                    dest,
                    &[CallArg::Expr(base), CallArg::Expr(index), CallArg::Expr(rhs)],
                    range,
                )
            }
            other => unreachable!("unassignable expression {other:?} past semantic analysis"),
        }
    }

    fn gen_array_lit(
        &mut self,
        expr: ExprId,
        elems: &[ExprId],
        dest: Option<RegisterValue<'g>>,
        range: SourceRange,
    ) -> Option<RegisterValue<'g>> {
        let elem_ty = match self.bc.ctx.type_kind(self.expr_rvalue_ty(expr)) {
            TypeKind::Array(elem) => *elem,
            other => unreachable!("array literal of non-array type {other:?}"),
        };
        let dest = self.try_use(dest);
        let arr = dest.address();

        // Element count doubles as the initial capacity hint, capped at the
        // operand's 16-bit limit.
        let capacity = elems.len().min(0xFFFF) as u16;
        if self.bc.ctx.is_reference_type(elem_ty) {
            self.emit(Instr::NewRefArray { dst: arr, capacity });
        } else {
            self.emit(Instr::NewValueArray { dst: arr, capacity });
        }

        if elems.is_empty() {
            return Some(dest);
        }

        // One arrAppend call per element, reusing the same argument slot.
        let regs = self.regs;
        let mut slots: Vec<Option<RegisterValue<'g>>> = regs
            .allocate_call_registers(3)
            .into_iter()
            .map(Some)
            .collect();
        let base = slots[0].as_ref().expect("base slot").address();
        self.emit(Instr::LoadBuiltinFunc {
            dst: base,
            builtin: BuiltinKind::ArrAppend,
        });
        let arg0 = slots[1].as_ref().expect("array slot").address();
        self.emit(Instr::Copy { dst: arg0, src: arr });

        for &elem in elems {
            let slot = slots[2].take().expect("element slot");
            let filled = self.gen_expr(elem, Some(slot)).expect("element has no value");
            slots[2] = Some(filled);
            let idx = self.emit(Instr::CallVoid { base });
            self.bc.module.set_debug_range(idx, range);
        }

        Some(dest)
    }

    fn gen_call(
        &mut self,
        expr: ExprId,
        callee: ExprId,
        args: &[ExprId],
        dest: Option<RegisterValue<'g>>,
        range: SourceRange,
    ) -> Option<RegisterValue<'g>> {
        // Builtin member calls lower to the matching builtin with the member
        // base as first argument.
        if let ExprKind::BuiltinMemberRef { base, member } = &self.bc.ctx.expr(callee).kind {
            let (base, member) = (*base, *member);
            let mut call_args = vec![CallArg::Expr(base)];
            call_args.extend(args.iter().map(|&a| CallArg::Expr(a)));
            return self.emit_builtin_call(member.builtin_kind(), dest, &call_args, range);
        }

        let exprs: Vec<ExprId> = std::iter::once(callee)
            .chain(args.iter().copied())
            .collect();

        // The callee goes in the base register; arguments must follow it.
        let regs = self.regs;
        let mut slots: Vec<Option<RegisterValue<'g>>> = regs
            .allocate_call_registers(exprs.len())
            .into_iter()
            .map(Some)
            .collect();
        let base = slots[0].as_ref().expect("base slot").address();

        for (i, &arg) in exprs.iter().enumerate() {
            let slot = slots[i].take().expect("call slot");
            let filled = self.gen_expr(arg, Some(slot)).expect("argument has no value");
            slots[i] = Some(filled);
        }

        let returns_void = self.expr_rvalue_ty(expr) == self.bc.ctx.void_type();
        if returns_void {
            debug_assert!(dest.is_none(), "void call cannot produce a value");
            let idx = self.emit(Instr::CallVoid { base });
            self.bc.module.set_debug_range(idx, range);
            None
        } else {
            let hints: Vec<RegisterValue<'g>> = slots.into_iter().flatten().collect();
            let dest = self.dest_or_recycle(dest, hints);
            let idx = self.emit(Instr::Call {
                base,
                dst: dest.address(),
            });
            self.bc.module.set_debug_range(idx, range);
            Some(dest)
        }
    }

    /// Reserves call registers, loads the builtin into the base one,
    /// generates the arguments into the following slots and emits the call.
    fn emit_builtin_call(
        &mut self,
        builtin: BuiltinKind,
        dest: Option<RegisterValue<'g>>,
        args: &[CallArg],
        range: SourceRange,
    ) -> Option<RegisterValue<'g>> {
        let regs = self.regs;
        let mut slots: Vec<Option<RegisterValue<'g>>> = regs
            .allocate_call_registers(args.len() + 1)
            .into_iter()
            .map(Some)
            .collect();
        let base = slots[0].as_ref().expect("base slot").address();
        self.emit(Instr::LoadBuiltinFunc {
            dst: base,
            builtin,
        });

        for (i, &arg) in args.iter().enumerate() {
            let slot = slots[i + 1].take().expect("argument slot");
            let filled = match arg {
                CallArg::Expr(e) => self.gen_expr(e, Some(slot)).expect("argument has no value"),
                CallArg::Promoted(e) => self
                    .emit_builtin_call(
                        BuiltinKind::CharToString,
                        Some(slot),
                        &[CallArg::Expr(e)],
                        range,
                    )
                    .expect("charToString produces a value"),
            };
            slots[i + 1] = Some(filled);
        }

        if builtin.returns_void() {
            debug_assert!(dest.is_none(), "void builtin cannot produce a value");
            let idx = self.emit(Instr::CallVoid { base });
            self.bc.module.set_debug_range(idx, range);
            None
        } else {
            let hints: Vec<RegisterValue<'g>> = slots.into_iter().flatten().collect();
            let dest = self.dest_or_recycle(dest, hints);
            let idx = self.emit(Instr::Call {
                base,
                dst: dest.address(),
            });
            self.bc.module.set_debug_range(idx, range);
            Some(dest)
        }
    }

    // ---- register selection ----

    fn try_use(&mut self, dest: Option<RegisterValue<'g>>) -> RegisterValue<'g> {
        let regs = self.regs;
        dest.unwrap_or_else(|| regs.allocate_temporary())
    }

    /// `dest` when provided; otherwise the lowest-numbered recyclable hint,
    /// falling back to a fresh temporary. Dropped hints free themselves.
    fn dest_or_recycle(
        &mut self,
        dest: Option<RegisterValue<'g>>,
        hints: Vec<RegisterValue<'g>>,
    ) -> RegisterValue<'g> {
        if let Some(dest) = dest {
            return dest;
        }
        let regs = self.regs;
        let mut best = regs.allocate_temporary();
        for hint in hints {
            if hint.can_recycle() && hint.address() < best.address() {
                best = hint;
            }
        }
        best
    }

    fn copy_in_dest(
        &mut self,
        dest: Option<RegisterValue<'g>>,
        src: RegisterValue<'g>,
    ) -> RegisterValue<'g> {
        match dest {
            Some(dest) if dest.address() != src.address() => {
                self.emit(Instr::Copy {
                    dst: dest.address(),
                    src: src.address(),
                });
                dest
            }
            Some(dest) => dest,
            None => src,
        }
    }

    // ---- constants ----

    fn emit_store_int(&mut self, dst: u8, value: i64, range: SourceRange) {
        if let Ok(small) = i16::try_from(value) {
            self.emit(Instr::StoreSmallInt { dst, value: small });
        } else {
            let k = self.int_const(value, range);
            self.emit(Instr::LoadIntK { dst, k });
        }
    }

    fn int_const(&mut self, value: i64, range: SourceRange) -> u16 {
        match self.bc.module.constants.int_id(value) {
            Some(k) => k,
            None => {
                self.report_pool_overflow(range);
                0
            }
        }
    }

    fn double_const(&mut self, value: f64, range: SourceRange) -> u16 {
        match self.bc.module.constants.double_id(value) {
            Some(k) => k,
            None => {
                self.report_pool_overflow(range);
                0
            }
        }
    }

    fn string_const(&mut self, value: &str, range: SourceRange) -> u16 {
        match self.bc.module.constants.string_id(value) {
            Some(k) => k,
            None => {
                self.report_pool_overflow(range);
                0
            }
        }
    }

    fn report_pool_overflow(&mut self, range: SourceRange) {
        self.bc
            .diags
            .report(
                DiagId::TooManyConstants,
                range,
                "constant pool exceeds the 16-bit index space",
            )
            .emit();
    }

    // ---- type queries ----

    fn expr_rvalue_ty(&self, expr: ExprId) -> TypeId {
        let ty = self.bc.ctx.expr(expr).ty.expect("untyped expression in codegen");
        self.bc.ctx.rvalue(ty)
    }

    /// True for int, bool and char: all lowered through the integer ops.
    fn is_int_domain(&self, expr: ExprId) -> bool {
        matches!(
            self.bc.ctx.type_kind(self.expr_rvalue_ty(expr)),
            TypeKind::Int | TypeKind::Bool | TypeKind::Char
        )
    }

    fn is_double_typed(&self, expr: ExprId) -> bool {
        matches!(
            self.bc.ctx.type_kind(self.expr_rvalue_ty(expr)),
            TypeKind::Double
        )
    }

    fn is_char_typed(&self, expr: ExprId) -> bool {
        matches!(
            self.bc.ctx.type_kind(self.expr_rvalue_ty(expr)),
            TypeKind::Char
        )
    }

    fn is_string_typed(&self, expr: ExprId) -> bool {
        matches!(
            self.bc.ctx.type_kind(self.expr_rvalue_ty(expr)),
            TypeKind::String
        )
    }
}
