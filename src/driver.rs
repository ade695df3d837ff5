// ABOUTME: The compilation driver: REPL dispatch, prototype and derivative
// registries, module lifecycle, and JIT invocation.

use crate::ast::{Function, Prototype, ANONYMOUS_FUNCTION_NAME};
use crate::calculus::Differentiator;
use crate::codegen::CodeGen;
use crate::error::CalcError;
use crate::jit::{self, Jit};
use crate::library;
use crate::parser::Parser;
use crate::token::Token;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::passes::PassManager;
use inkwell::values::FunctionValue;
use std::collections::HashMap;

/// What one handled statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A top-level expression was compiled, invoked, and unloaded.
    Value(f64),
    /// A function and its per-parameter derivatives were installed.
    Definition(String),
    /// An extern prototype was registered.
    Extern(String),
}

/// Formats a computed value the way the REPL prints it: integral values
/// drop the trailing `.0`.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Owns one compilation session.
///
/// The in-flight module and its pass pipeline are scoped to a single
/// compilation: after every successful installation into the JIT both are
/// recreated, so cross-module calls resolve through the JIT rather than
/// through stale IR. Prototypes and derivative ASTs outlive every module
/// because declarations are regenerated from them on demand.
pub struct Driver<'ctx> {
    context: &'ctx Context,
    builder: Builder<'ctx>,
    module: Module<'ctx>,
    fpm: PassManager<FunctionValue<'ctx>>,
    jit: Jit<'ctx>,
    function_prototypes: HashMap<String, Prototype>,
    derivative_functions: HashMap<String, Function>,
    dump_ir: bool,
}

impl<'ctx> Driver<'ctx> {
    /// Creates a driver with the standard math externs pre-registered.
    pub fn new(context: &'ctx Context) -> Result<Self, CalcError> {
        jit::initialize_native_target()?;
        let builder = context.create_builder();
        let (module, fpm) = Self::fresh_module(context);
        let mut function_prototypes = HashMap::new();
        for prototype in library::standard_library() {
            function_prototypes.insert(prototype.name.clone(), prototype);
        }
        Ok(Driver {
            context,
            builder,
            module,
            fpm,
            jit: Jit::new(),
            function_prototypes,
            derivative_functions: HashMap::new(),
            dump_ir: true,
        })
    }

    /// Controls whether handled definitions and externs dump their IR to
    /// stderr.
    pub fn set_dump_ir(&mut self, dump_ir: bool) {
        self.dump_ir = dump_ir;
    }

    /// A fresh module with the fixed function-pass pipeline attached:
    /// mem2reg, instruction combining, reassociation, GVN, CFG
    /// simplification.
    fn fresh_module(
        context: &'ctx Context,
    ) -> (Module<'ctx>, PassManager<FunctionValue<'ctx>>) {
        let module = context.create_module("calculator");
        let fpm: PassManager<FunctionValue> = PassManager::create(&module);
        fpm.add_promote_memory_to_register_pass();
        fpm.add_instruction_combining_pass();
        fpm.add_reassociate_pass();
        fpm.add_gvn_pass();
        fpm.add_cfg_simplification_pass();
        fpm.initialize();
        (module, fpm)
    }

    /// Swaps in a fresh module and pass manager, returning the old module
    /// for installation.
    fn reset_module(&mut self) -> Module<'ctx> {
        let (module, fpm) = Self::fresh_module(self.context);
        self.fpm = fpm;
        std::mem::replace(&mut self.module, module)
    }

    /// Handles every statement on `line`, returning one reply (or error)
    /// per statement in order.
    pub fn run_line(&mut self, line: &str) -> Vec<Result<Reply, CalcError>> {
        let mut parser = Parser::new(line);
        let mut replies = Vec::new();
        loop {
            let result = match parser.current() {
                Token::Eof => break,
                Token::Semicolon => {
                    parser.advance();
                    continue;
                }
                Token::Def => self.handle_definition(&mut parser),
                Token::Extern => self.handle_extern(&mut parser),
                _ => self.handle_top_level_expression(&mut parser),
            };
            // On a parse error the offending token is still current; skip
            // it so the loop makes progress.
            if matches!(result, Err(CalcError::Parse(_))) {
                parser.advance();
            }
            replies.push(result);
        }
        replies
    }

    /// Compiles `function` into the current module, dumping its IR under
    /// `banner` when enabled.
    fn compile(&mut self, function: &Function, banner: &str) -> Result<(), CalcError> {
        let compiled = {
            let mut codegen = CodeGen::new(
                self.context,
                &self.builder,
                &self.module,
                &self.fpm,
                &self.function_prototypes,
            );
            codegen.compile_function(function)?
        };
        if self.dump_ir {
            eprintln!("{}", banner);
            compiled.print_to_stderr();
        }
        Ok(())
    }

    /// Moves the current module into the JIT and starts a new one.
    fn install_current_module(&mut self) -> Result<jit::TrackerId, CalcError> {
        let module = self.reset_module();
        self.jit.install(module)
    }

    /// def: compile and install the function, then derive, compile, and
    /// install one derivative per formal parameter.
    fn handle_definition(&mut self, parser: &mut Parser) -> Result<Reply, CalcError> {
        let function = parser.parse_definition()?;
        let name = function.prototype.name.clone();

        let previous = self
            .function_prototypes
            .insert(name.clone(), function.prototype.clone());
        if let Err(err) = self
            .compile(&function, "Read function definition:")
            .and_then(|()| self.install_current_module().map(|_| ()))
        {
            // Keep the registry consistent with what is actually installed.
            match previous {
                Some(previous) => {
                    self.function_prototypes.insert(name, previous);
                }
                None => {
                    self.function_prototypes.remove(&name);
                }
            }
            return Err(err);
        }

        for param in function.prototype.params.clone() {
            self.install_derivative(&function, &param);
        }
        Ok(Reply::Definition(name))
    }

    /// Derives `function` with respect to `param` and installs the
    /// result. Failures are reported and skipped so the primary
    /// definition stays usable.
    fn install_derivative(&mut self, function: &Function, param: &str) {
        let mut differ =
            Differentiator::new(&self.function_prototypes, &self.derivative_functions);
        let derivative = differ.derive_function(function, param);
        for diagnostic in differ.take_diagnostics() {
            eprintln!("{}", diagnostic);
        }

        let name = derivative.prototype.name.clone();
        let banner = format!("Derivative function {} IR:", name);
        let previous = self
            .function_prototypes
            .insert(name.clone(), derivative.prototype.clone());
        let installed = self
            .compile(&derivative, &banner)
            .and_then(|()| self.install_current_module().map(|_| ()));
        match installed {
            Ok(()) => {
                self.derivative_functions.insert(name, derivative);
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                match previous {
                    Some(previous) => {
                        self.function_prototypes.insert(name, previous);
                    }
                    None => {
                        self.function_prototypes.remove(&name);
                    }
                }
            }
        }
    }

    /// extern: declare the prototype in the current module and register
    /// it for on-demand redeclaration in later modules.
    fn handle_extern(&mut self, parser: &mut Parser) -> Result<Reply, CalcError> {
        let prototype = parser.parse_extern()?;
        let declared = {
            let codegen = CodeGen::new(
                self.context,
                &self.builder,
                &self.module,
                &self.fpm,
                &self.function_prototypes,
            );
            match self.module.get_function(&prototype.name) {
                Some(existing) => existing,
                None => codegen.compile_prototype(&prototype),
            }
        };
        if self.dump_ir {
            eprintln!("Read extern:");
            declared.print_to_stderr();
        }
        let name = prototype.name.clone();
        self.function_prototypes.insert(name.clone(), prototype);
        Ok(Reply::Extern(name))
    }

    /// Top-level expression: compile the anonymous wrapper, install it,
    /// invoke it, and unload it again.
    fn handle_top_level_expression(
        &mut self,
        parser: &mut Parser,
    ) -> Result<Reply, CalcError> {
        let function = parser.parse_top_level_expr()?;
        self.compile(&function, "Read a top-level expr:")?;
        let tracker = self.install_current_module()?;
        let value = self.jit.invoke(tracker, ANONYMOUS_FUNCTION_NAME);
        // The anonymous expression is single-use; drop it either way.
        self.jit.release(tracker);
        Ok(Reply::Value(value?))
    }
}
