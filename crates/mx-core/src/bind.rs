//! Resolution of host-side collections into the engine's positional arrays.
//!
//! The engine's bind entry point takes fixed-size parallel arrays ordered by
//! the symbol's argument list. Callers supply tensors either positionally or
//! as a name-keyed map; the functions here reorder, validate, and flatten
//! those into handle arrays, failing before any engine call is made.

use std::collections::HashMap;
use std::ffi::{CString, c_char, c_int};
use std::fmt;
use std::ptr;
use std::str::FromStr;

use smallvec::SmallVec;

use mx_sys as sys;

use crate::{Context, MxError, NDArray, Result, cstring};

/// Scratch array of engine tensor handles for one bind call.
pub(crate) type NdHandles = SmallVec<[*mut sys::mx_ndarray_t; 8]>;

/// Tensors supplied for binding: positional, or keyed by argument name.
///
/// A positional list must match the argument list's length exactly; a named
/// map is reordered to match the argument list, whatever its iteration order.
#[derive(Clone)]
pub enum Inputs {
    List(Vec<NDArray>),
    Named(HashMap<String, NDArray>),
}

impl From<Vec<NDArray>> for Inputs {
    fn from(list: Vec<NDArray>) -> Self {
        Inputs::List(list)
    }
}

impl From<HashMap<String, NDArray>> for Inputs {
    fn from(map: HashMap<String, NDArray>) -> Self {
        Inputs::Named(map)
    }
}

/// Per-argument gradient accumulation policy, with the engine's codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum GradReq {
    /// No gradient is accumulated.
    Null = sys::GRAD_REQ_NULL,
    /// The gradient buffer is overwritten.
    Write = sys::GRAD_REQ_WRITE,
    /// The gradient is added into the buffer.
    Add = sys::GRAD_REQ_ADD,
}

impl GradReq {
    pub const LABELS: &'static [&'static str] = &["null", "write", "add"];

    pub(crate) fn code(self) -> sys::mx_uint {
        self as sys::mx_uint
    }
}

impl FromStr for GradReq {
    type Err = MxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "null" => Ok(GradReq::Null),
            "write" => Ok(GradReq::Write),
            "add" => Ok(GradReq::Add),
            _ => Err(MxError::InvalidGradReq {
                got: s.to_owned(),
                valid: Self::LABELS,
            }),
        }
    }
}

impl fmt::Display for GradReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradReq::Null => write!(f, "null"),
            GradReq::Write => write!(f, "write"),
            GradReq::Add => write!(f, "add"),
        }
    }
}

/// Gradient requirements for a bind call: one policy for every argument,
/// one per position, or keyed by argument name.
#[derive(Clone, Debug)]
pub enum GradReqSpec {
    Uniform(GradReq),
    PerArg(Vec<GradReq>),
    ByName(HashMap<String, GradReq>),
}

impl Default for GradReqSpec {
    fn default() -> Self {
        GradReqSpec::Uniform(GradReq::Write)
    }
}

impl From<GradReq> for GradReqSpec {
    fn from(req: GradReq) -> Self {
        GradReqSpec::Uniform(req)
    }
}

impl From<Vec<GradReq>> for GradReqSpec {
    fn from(reqs: Vec<GradReq>) -> Self {
        GradReqSpec::PerArg(reqs)
    }
}

impl From<HashMap<String, GradReq>> for GradReqSpec {
    fn from(map: HashMap<String, GradReq>) -> Self {
        GradReqSpec::ByName(map)
    }
}

/// Resolve inputs for a role where every name must be supplied.
///
/// Returns the tensor sequence in name-list order and the parallel handle
/// array, both of the name list's length.
pub(crate) fn resolve_required(
    role: &'static str,
    inputs: &Inputs,
    names: &[String],
) -> Result<(Vec<NDArray>, NdHandles)> {
    match inputs {
        Inputs::List(list) => {
            if list.len() != names.len() {
                return Err(MxError::ArgumentCount {
                    role,
                    expected: names.len(),
                    got: list.len(),
                });
            }
            let handles = list.iter().map(NDArray::handle).collect();
            Ok((list.clone(), handles))
        }
        Inputs::Named(map) => {
            let mut arrays = Vec::with_capacity(names.len());
            let mut handles = NdHandles::with_capacity(names.len());
            for name in names {
                let nd = map.get(name).ok_or_else(|| MxError::MissingKey {
                    role,
                    key: name.clone(),
                })?;
                arrays.push(nd.clone());
                handles.push(nd.handle());
            }
            Ok((arrays, handles))
        }
    }
}

/// Resolve inputs for a role where names may be left out; each absent name
/// yields a hole in the sequence and a null placeholder handle.
pub(crate) fn resolve_optional(
    role: &'static str,
    inputs: &Inputs,
    names: &[String],
) -> Result<(Vec<Option<NDArray>>, NdHandles)> {
    match inputs {
        Inputs::List(list) => {
            if list.len() != names.len() {
                return Err(MxError::ArgumentCount {
                    role,
                    expected: names.len(),
                    got: list.len(),
                });
            }
            let handles = list.iter().map(NDArray::handle).collect();
            Ok((list.iter().cloned().map(Some).collect(), handles))
        }
        Inputs::Named(map) => {
            let mut arrays = Vec::with_capacity(names.len());
            let mut handles = NdHandles::with_capacity(names.len());
            for name in names {
                match map.get(name) {
                    Some(nd) => {
                        arrays.push(Some(nd.clone()));
                        handles.push(nd.handle());
                    }
                    None => {
                        arrays.push(None);
                        handles.push(ptr::null_mut());
                    }
                }
            }
            Ok((arrays, handles))
        }
    }
}

/// Flatten a [`GradReqSpec`] into one engine code per argument.
///
/// A per-position list must match the argument list's length; a by-name map
/// defaults absent names to `null` (code 0) rather than erroring.
pub(crate) fn resolve_grad_req(
    spec: &GradReqSpec,
    arg_names: &[String],
) -> Result<Vec<sys::mx_uint>> {
    match spec {
        GradReqSpec::Uniform(req) => Ok(vec![req.code(); arg_names.len()]),
        GradReqSpec::PerArg(reqs) => {
            if reqs.len() != arg_names.len() {
                return Err(MxError::ArgumentCount {
                    role: "grad_req",
                    expected: arg_names.len(),
                    got: reqs.len(),
                });
            }
            Ok(reqs.iter().map(|r| r.code()).collect())
        }
        GradReqSpec::ByName(map) => Ok(arg_names
            .iter()
            .map(|name| map.get(name).map_or(sys::GRAD_REQ_NULL, |r| r.code()))
            .collect()),
    }
}

/// The three parallel group2ctx arrays for the bind call. Owns the C strings
/// and the pointer table so they stay valid for the call's duration.
pub(crate) struct Group2CtxArrays {
    keys: Vec<CString>,
    key_ptrs: Vec<*const c_char>,
    dev_types: Vec<c_int>,
    dev_ids: Vec<c_int>,
}

impl Group2CtxArrays {
    pub(crate) fn resolve(map: Option<&HashMap<String, Context>>) -> Result<Self> {
        let mut out = Self {
            keys: Vec::new(),
            key_ptrs: Vec::new(),
            dev_types: Vec::new(),
            dev_ids: Vec::new(),
        };
        if let Some(map) = map {
            for (group, ctx) in map {
                out.keys.push(cstring(group)?);
                out.dev_types.push(ctx.device_type_code());
                out.dev_ids.push(ctx.device_id());
            }
            out.key_ptrs = out.keys.iter().map(|k| k.as_ptr()).collect();
        }
        Ok(out)
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn keys_ptr(&self) -> *const *const c_char {
        if self.key_ptrs.is_empty() {
            ptr::null()
        } else {
            self.key_ptrs.as_ptr()
        }
    }

    pub(crate) fn dev_types_ptr(&self) -> *const c_int {
        if self.dev_types.is_empty() {
            ptr::null()
        } else {
            self.dev_types.as_ptr()
        }
    }

    pub(crate) fn dev_ids_ptr(&self) -> *const c_int {
        if self.dev_ids.is_empty() {
            ptr::null()
        } else {
            self.dev_ids.as_ptr()
        }
    }
}
