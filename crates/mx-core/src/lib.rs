//! Safe Rust bindings for the MX symbolic-graph engine.
//!
//! The engine owns graph construction, shape inference, memory planning and
//! execution; this crate is the binding adapter. It translates host-side
//! collections (ordered sequences and name-keyed maps of tensors) into the
//! positional, fixed-size arrays the engine's bind entry point requires, and
//! wraps the opaque handles it gets back ([`Symbol`], [`NDArray`],
//! [`Executor`]).
//!
//! Every operation is a direct, blocking call into the engine via `mx-sys`;
//! no state is shared across calls beyond the handles themselves.

pub mod bind;
pub mod context;
pub mod executor;
pub mod ndarray;
pub mod symbol;

pub use bind::{GradReq, GradReqSpec, Inputs};
pub use context::{Context, DeviceType};
pub use executor::Executor;
pub use ndarray::NDArray;
pub use symbol::{BindOptions, Symbol};

pub type Result<T> = std::result::Result<T, MxError>;

#[derive(thiserror::Error, Debug)]
pub enum MxError {
    #[error("length of `{role}` does not match the number of arguments (expected {expected}, got {got})")]
    ArgumentCount {
        role: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("key `{key}` is missing in `{role}`")]
    MissingKey { role: &'static str, key: String },

    #[error("grad_req must be one of {valid:?}, got `{got}`")]
    InvalidGradReq {
        got: String,
        valid: &'static [&'static str],
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("engine returned a null handle")]
    NullHandle,
}

/// Check an engine status code, converting a failure into the engine's
/// reported error message.
pub(crate) fn check_call(ret: std::ffi::c_int) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        let msg = unsafe { std::ffi::CStr::from_ptr(mx_sys::mxrs_last_error()) }
            .to_string_lossy()
            .into_owned();
        Err(MxError::Engine(msg))
    }
}

/// Convert a host string into a C string for an engine call.
pub(crate) fn cstring(s: &str) -> Result<std::ffi::CString> {
    std::ffi::CString::new(s)
        .map_err(|_| MxError::InvalidArgument(format!("`{s}` contains an interior NUL byte")))
}
