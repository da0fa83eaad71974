//! Symbol — shared reference to an engine graph node, plus the bind
//! orchestration that turns one into an [`Executor`].

use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_int};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use mx_sys as sys;

use crate::bind::{self, Group2CtxArrays, NdHandles};
use crate::{Context, Executor, GradReqSpec, Inputs, MxError, NDArray, Result, check_call, cstring};

#[derive(Debug)]
struct SymbolInner {
    handle: NonNull<sys::mx_symbol_t>,
}

// SAFETY: symbol queries are read-only on the engine side and internally
// synchronized; the handle is freed exactly once, on last drop.
unsafe impl Send for SymbolInner {}
unsafe impl Sync for SymbolInner {}

impl Drop for SymbolInner {
    fn drop(&mut self) {
        unsafe {
            sys::mxrs_symbol_free(self.handle.as_ptr());
        }
    }
}

/// A reference to a symbolic-graph node (or group of nodes).
///
/// `Clone` shares the engine handle. [`Symbol::dup`] asks the engine for a
/// deep copy with no state shared with the original.
#[derive(Clone, Debug)]
pub struct Symbol {
    inner: Arc<SymbolInner>,
}

type ListFn =
    unsafe extern "C" fn(*mut sys::mx_symbol_t, *mut sys::mx_uint, *mut *const *const c_char) -> c_int;

impl Symbol {
    fn from_handle(raw: *mut sys::mx_symbol_t) -> Result<Self> {
        let handle = NonNull::new(raw).ok_or(MxError::NullHandle)?;
        Ok(Self {
            inner: Arc::new(SymbolInner { handle }),
        })
    }

    pub(crate) fn handle(&self) -> *mut sys::mx_symbol_t {
        self.inner.handle.as_ptr()
    }

    /// Create a named variable symbol.
    pub fn var(name: &str) -> Result<Self> {
        let name = cstring(name)?;
        let mut out = ptr::null_mut();
        check_call(unsafe { sys::mxrs_symbol_variable(name.as_ptr(), &mut out) })?;
        Self::from_handle(out)
    }

    /// Apply a named operator over input symbols.
    pub fn apply(op: &str, name: &str, inputs: &[&Symbol]) -> Result<Self> {
        let op = cstring(op)?;
        let name = cstring(name)?;
        let handles: SmallVec<[*mut sys::mx_symbol_t; 4]> =
            inputs.iter().map(|s| s.handle()).collect();
        let mut out = ptr::null_mut();
        check_call(unsafe {
            sys::mxrs_symbol_apply(
                op.as_ptr(),
                name.as_ptr(),
                handles.len() as sys::mx_uint,
                handles.as_ptr(),
                &mut out,
            )
        })?;
        Self::from_handle(out)
    }

    /// Group several symbols into one. Grouped symbols have no name.
    pub fn group(symbols: &[&Symbol]) -> Result<Self> {
        let handles: SmallVec<[*mut sys::mx_symbol_t; 4]> =
            symbols.iter().map(|s| s.handle()).collect();
        let mut out = ptr::null_mut();
        check_call(unsafe {
            sys::mxrs_symbol_group(handles.len() as sys::mx_uint, handles.as_ptr(), &mut out)
        })?;
        Self::from_handle(out)
    }

    /// The symbol's name, or `None` for grouped symbols.
    pub fn name(&self) -> Result<Option<String>> {
        let mut name = ptr::null();
        let mut has_name = 0;
        check_call(unsafe { sys::mxrs_symbol_name(self.handle(), &mut name, &mut has_name) })?;
        if has_name == 0 {
            return Ok(None);
        }
        Ok(Some(
            unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned(),
        ))
    }

    /// Names of the arguments required to compute this symbol, in binding
    /// order.
    pub fn list_arguments(&self) -> Result<Vec<String>> {
        self.list_strings(sys::mxrs_symbol_list_arguments)
    }

    /// Names of the auxiliary states (internal state not updated by
    /// gradients, such as running statistics).
    pub fn list_auxiliary_states(&self) -> Result<Vec<String>> {
        self.list_strings(sys::mxrs_symbol_list_aux_states)
    }

    /// Names of the symbol's outputs; one per grouped member for groups.
    pub fn list_outputs(&self) -> Result<Vec<String>> {
        self.list_strings(sys::mxrs_symbol_list_outputs)
    }

    // Read-through count + char** marshalling shared by the three listings.
    fn list_strings(&self, f: ListFn) -> Result<Vec<String>> {
        let mut size: sys::mx_uint = 0;
        let mut names: *const *const c_char = ptr::null();
        check_call(unsafe { f(self.handle(), &mut size, &mut names) })?;
        let mut out = Vec::with_capacity(size as usize);
        for i in 0..size as usize {
            let name = unsafe { CStr::from_ptr(*names.add(i)) };
            out.push(name.to_string_lossy().into_owned());
        }
        Ok(out)
    }

    /// Deep-copy the underlying graph. The returned symbol shares no state
    /// with `self`.
    pub fn dup(&self) -> Result<Symbol> {
        let mut out = ptr::null_mut();
        check_call(unsafe { sys::mxrs_symbol_copy(self.handle(), &mut out) })?;
        Self::from_handle(out)
    }

    /// Bind the symbol to concrete tensors and a device, producing an
    /// [`Executor`].
    ///
    /// Arguments must all be supplied (positionally or by name). Gradient
    /// buffers may be left out per name, or omitted entirely; auxiliary
    /// states must all be supplied when the symbol has any. Every resolution
    /// failure aborts before the engine is called.
    pub fn bind(
        &self,
        ctx: &Context,
        args: impl Into<Inputs>,
        opts: BindOptions<'_>,
    ) -> Result<Executor> {
        let BindOptions {
            args_grad,
            grad_req,
            aux_states,
            group2ctx,
            shared_exec,
        } = opts;
        let args = args.into();

        let listed_args = self.list_arguments()?;
        let (arg_arrays, arg_handles) = bind::resolve_required("args", &args, &listed_args)?;

        let (grad_arrays, grad_handles): (Vec<Option<NDArray>>, NdHandles) = match &args_grad {
            Some(grads) => bind::resolve_optional("args_grad", grads, &listed_args)?,
            // Gradients wholly omitted: null buffer for every argument.
            None => (
                vec![None; listed_args.len()],
                NdHandles::from_elem(ptr::null_mut(), listed_args.len()),
            ),
        };

        let listed_aux = self.list_auxiliary_states()?;
        let empty = Inputs::List(Vec::new());
        let (aux_arrays, aux_handles) =
            bind::resolve_required("aux_states", aux_states.as_ref().unwrap_or(&empty), &listed_aux)?;

        let reqs = bind::resolve_grad_req(&grad_req, &listed_args)?;
        let ctx_map = Group2CtxArrays::resolve(group2ctx.as_ref())?;
        let shared_handle = shared_exec.map_or(ptr::null_mut(), Executor::handle);

        debug!(
            ctx = %ctx,
            args = listed_args.len(),
            aux = listed_aux.len(),
            groups = ctx_map.len(),
            "binding executor"
        );

        let mut out = ptr::null_mut();
        check_call(unsafe {
            sys::mxrs_executor_bind(
                self.handle(),
                ctx.device_type_code(),
                ctx.device_id(),
                ctx_map.len() as sys::mx_uint,
                ctx_map.keys_ptr(),
                ctx_map.dev_types_ptr(),
                ctx_map.dev_ids_ptr(),
                arg_handles.len() as sys::mx_uint,
                arg_handles.as_ptr(),
                grad_handles.as_ptr(),
                reqs.as_ptr(),
                aux_handles.len() as sys::mx_uint,
                aux_handles.as_ptr(),
                shared_handle,
                &mut out,
            )
        })?;

        let mut exec = Executor::new(out, self.clone(), *ctx, grad_req, group2ctx)?;
        exec.set_arg_arrays(arg_arrays);
        exec.set_grad_arrays(grad_arrays);
        exec.set_aux_arrays(aux_arrays);
        Ok(exec)
    }
}

/// Optional parameters for [`Symbol::bind`].
#[derive(Default)]
pub struct BindOptions<'a> {
    /// Gradient buffers, resolvable with holes; `None` disables gradients.
    pub args_grad: Option<Inputs>,
    /// Gradient requirements; defaults to `write` for every argument.
    pub grad_req: GradReqSpec,
    /// Auxiliary-state tensors; required when the symbol has any.
    pub aux_states: Option<Inputs>,
    /// Device placement per group label.
    pub group2ctx: Option<HashMap<String, Context>>,
    /// Executor to share memory with, passed through to the engine.
    pub shared_exec: Option<&'a Executor>,
}
