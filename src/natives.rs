//! Native (host-implemented) functions installed into the global table at
//! VM startup — natives are one of the three callable kinds alongside
//! closures and bound methods. Arity is enforced centrally by the caller
//! (`Vm::call_value`) against each `NativeFn`'s registered arity, so these
//! bodies only need to implement their behavior.

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

/// `clock()` — seconds elapsed since the VM was created, as a float.
pub fn clock(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(vm.started_at().elapsed().as_secs_f64()))
}
