// ABOUTME: Prototypes of the standard math functions the driver pre-registers
// Their addresses resolve against the host process at JIT lookup time.

use crate::ast::Prototype;

/// The extern declarations loaded at startup.
///
/// `pow` must be present: the code generator lowers the `^` operator to a
/// call to it. The rest are the libm entry points useful in calculator
/// input and in generated derivatives (`log` appears in the general
/// exponent rule).
pub fn standard_library() -> Vec<Prototype> {
    let unary = ["log", "sin", "cos", "tan", "exp", "asin", "acos", "atan"];
    let mut prototypes = vec![
        Prototype::new("pow", vec!["x1".into(), "x2".into()]),
        Prototype::new("atan2", vec!["x1".into(), "x2".into()]),
    ];
    for name in unary {
        prototypes.push(Prototype::new(name, vec!["x1".into()]));
    }
    prototypes
}
