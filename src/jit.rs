// ABOUTME: JIT installation and symbol resolution for compiled modules
// Each installed module is tracked by its own execution engine; releasing
// the tracker unloads the module's symbols as a group.

use crate::error::CalcError;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::targets::{InitializationConfig, Target};
use inkwell::values::AsValueRef;
use inkwell::OptimizationLevel;
use std::ffi::CString;
use std::sync::OnceLock;

/// Identifies one installed module so it can be removed as a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerId(u64);

struct InstalledModule<'ctx> {
    tracker: TrackerId,
    module: Module<'ctx>,
    engine: ExecutionEngine<'ctx>,
}

/// The driver's JIT: an ordered collection of installed modules.
///
/// Symbol lookup searches newest-first, so redefining a function shadows
/// the earlier definition for all later input. Declarations inside an
/// incoming module are linked to previously installed definitions by
/// explicit global mappings; names neither defined nor installed resolve
/// against the host process (that is how the libm externs bind).
pub struct Jit<'ctx> {
    installed: Vec<InstalledModule<'ctx>>,
    next_tracker: u64,
}

impl<'ctx> Jit<'ctx> {
    pub fn new() -> Self {
        Jit {
            installed: Vec::new(),
            next_tracker: 0,
        }
    }

    /// Hands `module` to the JIT under a fresh resource tracker.
    ///
    /// Unresolvable declarations are diagnosed here rather than left to
    /// abort inside the engine: a used declaration with no known address
    /// fails the installation, an unused one is dropped from the module.
    pub fn install(&mut self, module: Module<'ctx>) -> Result<TrackerId, CalcError> {
        let mut mappings = Vec::new();
        let mut dead_declarations = Vec::new();
        for function in module.get_functions() {
            if function.count_basic_blocks() > 0 {
                continue;
            }
            let name = match function.get_name().to_str() {
                Ok(name) => name.to_string(),
                Err(_) => continue,
            };
            if let Some(address) = self.address_of(&name) {
                mappings.push((function, address));
            } else if host_symbol_address(&name).is_none() {
                let used =
                    unsafe { !llvm_sys::core::LLVMGetFirstUse(function.as_value_ref()).is_null() };
                if used {
                    return Err(CalcError::jit(format!(
                        "cannot resolve symbol '{}'",
                        name
                    )));
                }
                dead_declarations.push(function);
            }
        }
        for function in dead_declarations {
            unsafe { function.delete() };
        }

        let engine = module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|err| CalcError::jit(err.to_string()))?;
        for (function, address) in &mappings {
            engine.add_global_mapping(function, *address);
        }

        let tracker = TrackerId(self.next_tracker);
        self.next_tracker += 1;
        self.installed.push(InstalledModule {
            tracker,
            module,
            engine,
        });
        Ok(tracker)
    }

    /// The address of `name`, from the newest installed module that
    /// defines it.
    pub fn address_of(&self, name: &str) -> Option<usize> {
        for installed in self.installed.iter().rev() {
            let defines = installed
                .module
                .get_function(name)
                .map_or(false, |f| f.count_basic_blocks() > 0);
            if defines {
                if let Ok(address) = installed.engine.get_function_address(name) {
                    return Some(address);
                }
            }
        }
        None
    }

    /// Calls the nullary f64 function `name` inside the tracked module.
    pub fn invoke(&self, tracker: TrackerId, name: &str) -> Result<f64, CalcError> {
        let installed = self
            .installed
            .iter()
            .find(|m| m.tracker == tracker)
            .ok_or_else(|| CalcError::jit("unknown resource tracker"))?;
        let function = unsafe {
            installed
                .engine
                .get_function::<unsafe extern "C" fn() -> f64>(name)
        }
        .map_err(|err| CalcError::jit(format!("symbol lookup for '{}' failed: {}", name, err)))?;
        Ok(unsafe { function.call() })
    }

    /// Unloads the tracked module and everything it installed.
    pub fn release(&mut self, tracker: TrackerId) {
        self.installed.retain(|m| m.tracker != tracker);
    }
}

impl<'ctx> Default for Jit<'ctx> {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks `name` up in the host process's dynamic symbol table.
fn host_symbol_address(name: &str) -> Option<usize> {
    let symbol = CString::new(name).ok()?;
    let address = unsafe { llvm_sys::support::LLVMSearchForAddressOfSymbol(symbol.as_ptr()) };
    if address.is_null() {
        None
    } else {
        Some(address as usize)
    }
}

/// Prepares the native target and exposes the host process's symbols to
/// JIT resolution. Idempotent; every driver calls it on construction.
pub fn initialize_native_target() -> Result<(), CalcError> {
    static INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();
    INITIALIZED
        .get_or_init(|| {
            Target::initialize_native(&InitializationConfig::default())?;
            // Make the executable's own symbols (libm included) visible
            // to the JIT's dynamic lookup.
            unsafe {
                llvm_sys::support::LLVMLoadLibraryPermanently(std::ptr::null());
            }
            Ok(())
        })
        .clone()
        .map_err(CalcError::Jit)
}
