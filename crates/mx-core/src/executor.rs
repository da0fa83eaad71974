//! Executor — a symbolic graph bound to concrete tensors and a device.

use std::collections::HashMap;
use std::ptr::NonNull;

use mx_sys as sys;

use crate::{Context, GradReqSpec, MxError, NDArray, Result, Symbol};

/// An executable graph returned by [`Symbol::bind`].
///
/// The executor owns the engine's execution handle exclusively, and shares
/// ownership of everything the engine's plan still references: the source
/// symbol and the resolved argument, gradient, and auxiliary tensors. Those
/// tensors stay alive at least as long as the executor, independent of the
/// host references that supplied them.
#[derive(Debug)]
pub struct Executor {
    handle: NonNull<sys::mx_executor_t>,
    symbol: Symbol,
    context: Context,
    grad_req: GradReqSpec,
    group2ctx: Option<HashMap<String, Context>>,
    arg_arrays: Vec<NDArray>,
    grad_arrays: Vec<Option<NDArray>>,
    aux_arrays: Vec<NDArray>,
}

// SAFETY: all fields are Send + Sync except the engine handle, which the
// engine synchronizes internally; it is freed exactly once, on drop.
unsafe impl Send for Executor {}
unsafe impl Sync for Executor {}

impl Executor {
    pub(crate) fn new(
        raw: *mut sys::mx_executor_t,
        symbol: Symbol,
        context: Context,
        grad_req: GradReqSpec,
        group2ctx: Option<HashMap<String, Context>>,
    ) -> Result<Self> {
        let handle = NonNull::new(raw).ok_or(MxError::NullHandle)?;
        Ok(Self {
            handle,
            symbol,
            context,
            grad_req,
            group2ctx,
            arg_arrays: Vec::new(),
            grad_arrays: Vec::new(),
            aux_arrays: Vec::new(),
        })
    }

    pub(crate) fn handle(&self) -> *mut sys::mx_executor_t {
        self.handle.as_ptr()
    }

    pub(crate) fn set_arg_arrays(&mut self, arrays: Vec<NDArray>) {
        self.arg_arrays = arrays;
    }

    pub(crate) fn set_grad_arrays(&mut self, arrays: Vec<Option<NDArray>>) {
        self.grad_arrays = arrays;
    }

    pub(crate) fn set_aux_arrays(&mut self, arrays: Vec<NDArray>) {
        self.aux_arrays = arrays;
    }

    /// The symbol this executor was bound from.
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// The primary device context.
    pub fn context(&self) -> Context {
        self.context
    }

    pub fn grad_req(&self) -> &GradReqSpec {
        &self.grad_req
    }

    pub fn group2ctx(&self) -> Option<&HashMap<String, Context>> {
        self.group2ctx.as_ref()
    }

    /// Bound argument tensors, in argument-list order.
    pub fn arg_arrays(&self) -> &[NDArray] {
        &self.arg_arrays
    }

    /// Bound gradient buffers; `None` where no buffer was supplied.
    pub fn grad_arrays(&self) -> &[Option<NDArray>] {
        &self.grad_arrays
    }

    /// Bound auxiliary-state tensors, in auxiliary-state-list order.
    pub fn aux_arrays(&self) -> &[NDArray] {
        &self.aux_arrays
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        unsafe {
            sys::mxrs_executor_free(self.handle.as_ptr());
        }
    }
}
