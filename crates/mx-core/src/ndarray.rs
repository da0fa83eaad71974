//! NDArray — shared reference to an engine tensor.

use std::ptr::{self, NonNull};
use std::sync::Arc;

use mx_sys as sys;

use crate::{Context, MxError, Result, check_call};

#[derive(Debug)]
struct Inner {
    handle: NonNull<sys::mx_ndarray_t>,
    shape: Vec<u32>,
}

// SAFETY: the engine's tensor operations are internally synchronized; the
// handle is freed exactly once, when the last `NDArray` clone drops.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        unsafe {
            sys::mxrs_ndarray_free(self.handle.as_ptr());
        }
    }
}

/// A concrete tensor owned by the engine.
///
/// Cloning shares the underlying engine handle; the handle is released when
/// the last clone drops. An [`Executor`](crate::Executor) holds clones of the
/// tensors it was bound with, so they outlive the host references that
/// supplied them.
#[derive(Clone, Debug)]
pub struct NDArray {
    inner: Arc<Inner>,
}

impl NDArray {
    /// Create a zero-filled tensor on the given context.
    pub fn zeros(shape: &[u32], ctx: &Context) -> Result<Self> {
        let mut out = ptr::null_mut();
        check_call(unsafe {
            sys::mxrs_ndarray_create(
                shape.as_ptr(),
                shape.len() as sys::mx_uint,
                ctx.device_type_code(),
                ctx.device_id(),
                &mut out,
            )
        })?;
        let handle = NonNull::new(out).ok_or(MxError::NullHandle)?;
        Ok(Self {
            inner: Arc::new(Inner {
                handle,
                shape: shape.to_vec(),
            }),
        })
    }

    /// Create a one-filled tensor on the given context.
    pub fn ones(shape: &[u32], ctx: &Context) -> Result<Self> {
        let numel: usize = shape.iter().map(|&d| d as usize).product();
        Self::from_slice(&vec![1.0; numel], shape, ctx)
    }

    /// Create a tensor from f32 data.
    pub fn from_slice(data: &[f32], shape: &[u32], ctx: &Context) -> Result<Self> {
        let numel: usize = shape.iter().map(|&d| d as usize).product();
        if data.len() != numel {
            return Err(MxError::InvalidArgument(format!(
                "data length {} does not match shape {shape:?} (expected {numel})",
                data.len(),
            )));
        }
        let nd = Self::zeros(shape, ctx)?;
        check_call(unsafe {
            sys::mxrs_ndarray_sync_copy_from(nd.handle(), data.as_ptr(), data.len())
        })?;
        Ok(nd)
    }

    /// Copy the tensor contents back to the host.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; self.size()];
        check_call(unsafe {
            sys::mxrs_ndarray_sync_copy_to(self.handle(), out.as_mut_ptr(), out.len())
        })?;
        Ok(out)
    }

    pub fn shape(&self) -> &[u32] {
        &self.inner.shape
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.inner.shape.iter().map(|&d| d as usize).product()
    }

    pub(crate) fn handle(&self) -> *mut sys::mx_ndarray_t {
        self.inner.handle.as_ptr()
    }
}
