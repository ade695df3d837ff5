// ABOUTME: Lowering of Calc expression trees to LLVM IR via inkwell
// Every value is a 64-bit float. Mutable names (parameters and loop
// variables) live in entry-block stack slots that mem2reg later promotes.

use crate::ast::{BinaryOp, Expr, Function, Prototype};
use crate::error::CalcError;
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::passes::PassManager;
use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::{
    BasicMetadataValueEnum, FloatValue, FunctionValue, PointerValue,
};
use inkwell::FloatPredicate;
use std::collections::HashMap;

/// Compiles one function at a time into the driver's current module.
///
/// `named_values` maps Calc identifiers to their stack slots; it is
/// cleared on every function entry, so bindings never leak across bodies.
pub struct CodeGen<'a, 'ctx> {
    context: &'ctx Context,
    builder: &'a Builder<'ctx>,
    module: &'a Module<'ctx>,
    fpm: &'a PassManager<FunctionValue<'ctx>>,
    prototypes: &'a HashMap<String, Prototype>,
    named_values: HashMap<String, PointerValue<'ctx>>,
    current_function: Option<FunctionValue<'ctx>>,
}

impl<'a, 'ctx> CodeGen<'a, 'ctx> {
    pub fn new(
        context: &'ctx Context,
        builder: &'a Builder<'ctx>,
        module: &'a Module<'ctx>,
        fpm: &'a PassManager<FunctionValue<'ctx>>,
        prototypes: &'a HashMap<String, Prototype>,
    ) -> Self {
        CodeGen {
            context,
            builder,
            module,
            fpm,
            prototypes,
            named_values: HashMap::new(),
            current_function: None,
        }
    }

    /// Declares `prototype` in the module: external linkage, one f64 per
    /// parameter, f64 result, parameter names set from the prototype.
    pub fn compile_prototype(&self, prototype: &Prototype) -> FunctionValue<'ctx> {
        let f64_type = self.context.f64_type();
        let param_types: Vec<BasicMetadataTypeEnum> =
            vec![f64_type.into(); prototype.params.len()];
        let fn_type = f64_type.fn_type(&param_types, false);
        let function =
            self.module
                .add_function(&prototype.name, fn_type, Some(Linkage::External));
        for (param, name) in function.get_param_iter().zip(&prototype.params) {
            param.into_float_value().set_name(name);
        }
        function
    }

    /// Compiles a full function definition and runs the pass pipeline on
    /// it. On any failure inside the body the half-built function is
    /// erased from the module so the module stays consistent.
    pub fn compile_function(
        &mut self,
        function: &Function,
    ) -> Result<FunctionValue<'ctx>, CalcError> {
        let prototype = &function.prototype;
        // Reuse an existing declaration from a previous extern, if any.
        let fn_value = match self.module.get_function(&prototype.name) {
            Some(declared) => declared,
            None => self.compile_prototype(prototype),
        };
        if fn_value.count_basic_blocks() > 0 {
            return Err(CalcError::codegen(format!(
                "function '{}' cannot be redefined",
                prototype.name
            )));
        }
        if fn_value.count_params() as usize != prototype.params.len() {
            return Err(CalcError::arity(
                &prototype.name,
                fn_value.count_params() as usize,
                prototype.params.len(),
            ));
        }

        let entry = self.context.append_basic_block(fn_value, "entry");
        self.builder.position_at_end(entry);
        self.current_function = Some(fn_value);

        // Spill every parameter to a stack slot; mem2reg promotes them.
        self.named_values.clear();
        for (param, name) in fn_value.get_param_iter().zip(&prototype.params) {
            let slot = self.create_entry_block_alloca(fn_value, name)?;
            self.builder.build_store(slot, param);
            self.named_values.insert(name.clone(), slot);
        }

        match self.compile_expr(&function.body) {
            Ok(ret) => {
                self.builder.build_return(Some(&ret));
                if !fn_value.verify(true) {
                    unsafe { fn_value.delete() };
                    return Err(CalcError::codegen(format!(
                        "generated invalid IR for function '{}'",
                        prototype.name
                    )));
                }
                self.fpm.run_on(&fn_value);
                Ok(fn_value)
            }
            Err(err) => {
                unsafe { fn_value.delete() };
                Err(err)
            }
        }
    }

    /// Resolves a callee: first the current module, then a declaration
    /// generated on demand from the prototype table.
    fn function(&self, name: &str) -> Option<FunctionValue<'ctx>> {
        if let Some(function) = self.module.get_function(name) {
            return Some(function);
        }
        self.prototypes
            .get(name)
            .map(|prototype| self.compile_prototype(prototype))
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<FloatValue<'ctx>, CalcError> {
        match expr {
            Expr::Number(value) => Ok(self.context.f64_type().const_float(*value)),
            Expr::Variable(name) => {
                let slot = self
                    .named_values
                    .get(name)
                    .copied()
                    .ok_or_else(|| CalcError::UnknownVariable(name.clone()))?;
                Ok(self.builder.build_load(slot, name).into_float_value())
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.compile_expr(lhs)?;
                let rhs = self.compile_expr(rhs)?;
                self.compile_binary(*op, lhs, rhs)
            }
            Expr::Call { callee, args } => self.compile_call(callee, args),
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(cond, then_branch, else_branch),
            Expr::For {
                var,
                start,
                end,
                step,
                body,
            } => self.compile_for(var, start, end, step.as_deref(), body),
        }
    }

    fn compile_binary(
        &mut self,
        op: BinaryOp,
        lhs: FloatValue<'ctx>,
        rhs: FloatValue<'ctx>,
    ) -> Result<FloatValue<'ctx>, CalcError> {
        match op {
            BinaryOp::Add => Ok(self.builder.build_float_add(lhs, rhs, "addtmp")),
            BinaryOp::Sub => Ok(self.builder.build_float_sub(lhs, rhs, "subtmp")),
            BinaryOp::Mul => Ok(self.builder.build_float_mul(lhs, rhs, "multmp")),
            BinaryOp::Div => Ok(self.builder.build_float_div(lhs, rhs, "divtmp")),
            // '^' lowers to a call to the registered extern pow(x1, x2).
            BinaryOp::Pow => {
                let pow = self
                    .function("pow")
                    .ok_or_else(|| CalcError::UnknownFunction("pow".to_string()))?;
                if pow.count_params() != 2 {
                    return Err(CalcError::arity("pow", pow.count_params() as usize, 2));
                }
                let args: Vec<BasicMetadataValueEnum> = vec![lhs.into(), rhs.into()];
                self.float_call_result(pow, &args, "powtmp")
            }
            // The comparison result widens back to 0.0/1.0.
            BinaryOp::Less => {
                let cmp = self
                    .builder
                    .build_float_compare(FloatPredicate::OLT, lhs, rhs, "cmptmp");
                Ok(self.builder.build_unsigned_int_to_float(
                    cmp,
                    self.context.f64_type(),
                    "booltmp",
                ))
            }
        }
    }

    fn compile_call(
        &mut self,
        callee: &str,
        args: &[Expr],
    ) -> Result<FloatValue<'ctx>, CalcError> {
        let function = self
            .function(callee)
            .ok_or_else(|| CalcError::UnknownFunction(callee.to_string()))?;
        if function.count_params() as usize != args.len() {
            return Err(CalcError::arity(
                callee,
                function.count_params() as usize,
                args.len(),
            ));
        }
        let mut compiled: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
        for arg in args {
            compiled.push(self.compile_expr(arg)?.into());
        }
        self.float_call_result(function, &compiled, "calltmp")
    }

    fn float_call_result(
        &self,
        function: FunctionValue<'ctx>,
        args: &[BasicMetadataValueEnum<'ctx>],
        name: &str,
    ) -> Result<FloatValue<'ctx>, CalcError> {
        self.builder
            .build_call(function, args, name)
            .try_as_basic_value()
            .left()
            .map(|value| value.into_float_value())
            .ok_or_else(|| CalcError::codegen("call did not produce a value"))
    }

    /// Lowers `if` to a conditional branch into two value-producing
    /// blocks that meet at a phi node.
    fn compile_if(
        &mut self,
        cond: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
    ) -> Result<FloatValue<'ctx>, CalcError> {
        let f64_type = self.context.f64_type();
        let parent = self.current_fn()?;

        let cond_value = self.compile_expr(cond)?;
        let zero = f64_type.const_float(0.0);
        let cond_bool =
            self.builder
                .build_float_compare(FloatPredicate::ONE, cond_value, zero, "ifcond");

        let then_block = self.context.append_basic_block(parent, "then");
        let else_block = self.context.append_basic_block(parent, "else");
        let merge_block = self.context.append_basic_block(parent, "ifcont");
        self.builder
            .build_conditional_branch(cond_bool, then_block, else_block);

        self.builder.position_at_end(then_block);
        let then_value = self.compile_expr(then_branch)?;
        self.builder.build_unconditional_branch(merge_block);
        // Codegen of the branch can move the insertion point.
        let then_end = self.insert_block()?;

        self.builder.position_at_end(else_block);
        let else_value = self.compile_expr(else_branch)?;
        self.builder.build_unconditional_branch(merge_block);
        let else_end = self.insert_block()?;

        self.builder.position_at_end(merge_block);
        let phi = self.builder.build_phi(f64_type, "iftmp");
        phi.add_incoming(&[(&then_value, then_end), (&else_value, else_end)]);
        Ok(phi.as_basic_value().into_float_value())
    }

    /// Lowers `for` to a loop over a stack slot. The body runs before the
    /// end condition is evaluated, and the whole expression is 0.0.
    fn compile_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
    ) -> Result<FloatValue<'ctx>, CalcError> {
        let f64_type = self.context.f64_type();
        let parent = self.current_fn()?;

        let slot = self.create_entry_block_alloca(parent, var)?;
        let start_value = self.compile_expr(start)?;
        self.builder.build_store(slot, start_value);

        let loop_block = self.context.append_basic_block(parent, "loop");
        self.builder.build_unconditional_branch(loop_block);
        self.builder.position_at_end(loop_block);

        // The loop variable shadows any outer binding of the same name
        // for the duration of the loop.
        let shadowed = self.named_values.insert(var.to_string(), slot);

        let result = self.compile_for_body(var, end, step, body, slot, parent, loop_block);

        match shadowed {
            Some(previous) => self.named_values.insert(var.to_string(), previous),
            None => self.named_values.remove(var),
        };
        result?;
        Ok(f64_type.const_float(0.0))
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_for_body(
        &mut self,
        var: &str,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
        slot: PointerValue<'ctx>,
        parent: FunctionValue<'ctx>,
        loop_block: BasicBlock<'ctx>,
    ) -> Result<(), CalcError> {
        let f64_type = self.context.f64_type();

        self.compile_expr(body)?;

        let step_value = match step {
            Some(step) => self.compile_expr(step)?,
            None => f64_type.const_float(1.0),
        };
        let current = self.builder.build_load(slot, var).into_float_value();
        let next = self.builder.build_float_add(current, step_value, "nextvar");
        self.builder.build_store(slot, next);

        let end_value = self.compile_expr(end)?;
        let zero = f64_type.const_float(0.0);
        let continue_loop =
            self.builder
                .build_float_compare(FloatPredicate::ONE, end_value, zero, "loopcond");

        let after_block = self
            .context
            .append_basic_block(parent, "afterloop");
        self.builder
            .build_conditional_branch(continue_loop, loop_block, after_block);
        self.builder.position_at_end(after_block);
        Ok(())
    }

    /// Allocates a named f64 slot in the entry block of `function`, where
    /// the promotion pass expects allocas to live.
    fn create_entry_block_alloca(
        &self,
        function: FunctionValue<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, CalcError> {
        let builder = self.context.create_builder();
        let entry = function
            .get_first_basic_block()
            .ok_or_else(|| CalcError::codegen("function has no entry block"))?;
        match entry.get_first_instruction() {
            Some(first) => builder.position_before(&first),
            None => builder.position_at_end(entry),
        }
        Ok(builder.build_alloca(self.context.f64_type(), name))
    }

    fn current_fn(&self) -> Result<FunctionValue<'ctx>, CalcError> {
        self.current_function
            .ok_or_else(|| CalcError::codegen("expression outside of a function"))
    }

    fn insert_block(&self) -> Result<BasicBlock<'ctx>, CalcError> {
        self.builder
            .get_insert_block()
            .ok_or_else(|| CalcError::codegen("builder has no insertion block"))
    }
}
