//! Native (host-implemented) functions exposed to Lox programs.

use std::sync::OnceLock;
use std::time::Instant;

use crate::value::Value;

fn process_start() -> &'static Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now)
}

/// Seconds elapsed since the process started, monotonic.
pub fn clock(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(process_start().elapsed().as_secs_f64()))
}
