//! Pure-Rust implementation of the `mxrs_*` C ABI functions.
//!
//! A small stand-in engine backs the ABI: symbols are variable, operator
//! application, or group nodes; binding validates the marshalled arrays and
//! records the result. Handles are `Box`ed records cast through the
//! zero-sized marker types.
//!
//! # Safety
//!
//! All functions in this module follow C ABI conventions: callers must pass
//! valid, non-null pointers obtained from other `mxrs_*` functions. Handles
//! must be freed exactly once via the matching `mxrs_*_free` function.

#![allow(clippy::missing_safety_doc)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use libc::{c_char, c_int, size_t};
use parking_lot::Mutex;

use crate::{
    DEV_TYPE_CPU, DEV_TYPE_CPU_PINNED, GRAD_REQ_ADD, GRAD_REQ_NULL, GRAD_REQ_WRITE, mx_executor_t,
    mx_ndarray_t, mx_symbol_t, mx_uint,
};

// ── Last-error reporting ────────────────────────────────────────────────

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

fn fail(msg: String) -> c_int {
    let msg = CString::new(msg).unwrap_or_default();
    LAST_ERROR.with(|e| *e.borrow_mut() = msg);
    -1
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_last_error() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ptr())
}

// ── Symbol graph model ──────────────────────────────────────────────────

enum NodeKind {
    Variable,
    Apply { op: String, inputs: Vec<Arc<Node>> },
    Group { members: Vec<Arc<Node>> },
}

struct Node {
    name: Option<String>,
    kind: NodeKind,
}

/// String array handed across the ABI; owns both the C strings and the
/// pointer table, which stay put for the lifetime of the symbol record.
struct CStrArray {
    _strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

// SAFETY: the raw pointers point into the CStrings owned by the same struct.
unsafe impl Send for CStrArray {}

impl CStrArray {
    fn new(names: Vec<String>) -> Self {
        let strings: Vec<CString> = names
            .into_iter()
            .map(|n| CString::new(n).unwrap_or_default())
            .collect();
        let ptrs = strings.iter().map(|s| s.as_ptr()).collect();
        Self {
            _strings: strings,
            ptrs,
        }
    }
}

#[derive(Default)]
struct StringTables {
    name: Option<CString>,
    arguments: Option<Box<CStrArray>>,
    aux_states: Option<Box<CStrArray>>,
    outputs: Option<Box<CStrArray>>,
}

struct SymbolRec {
    node: Arc<Node>,
    strings: Mutex<StringTables>,
}

impl SymbolRec {
    fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            strings: Mutex::new(StringTables::default()),
        }
    }
}

fn box_symbol(rec: SymbolRec) -> *mut mx_symbol_t {
    Box::into_raw(Box::new(rec)) as *mut mx_symbol_t
}

unsafe fn ref_symbol<'a>(p: *mut mx_symbol_t) -> &'a SymbolRec {
    unsafe { &*(p as *const SymbolRec) }
}

// Arguments are listed in depth-first first-use order; a node reached twice
// is listed once.
fn walk_arguments(node: &Arc<Node>, seen: &mut HashSet<*const Node>, out: &mut Vec<String>) {
    if !seen.insert(Arc::as_ptr(node)) {
        return;
    }
    match &node.kind {
        NodeKind::Variable => {
            if let Some(name) = &node.name {
                out.push(name.clone());
            }
        }
        NodeKind::Apply { inputs, .. } => {
            for input in inputs {
                walk_arguments(input, seen, out);
            }
        }
        NodeKind::Group { members } => {
            for member in members {
                walk_arguments(member, seen, out);
            }
        }
    }
}

fn walk_aux_states(node: &Arc<Node>, seen: &mut HashSet<*const Node>, out: &mut Vec<String>) {
    if !seen.insert(Arc::as_ptr(node)) {
        return;
    }
    match &node.kind {
        NodeKind::Variable => {}
        NodeKind::Apply { op, inputs } => {
            for input in inputs {
                walk_aux_states(input, seen, out);
            }
            // BatchNorm carries running statistics as auxiliary state.
            if op == "BatchNorm"
                && let Some(name) = &node.name
            {
                out.push(format!("{name}_moving_mean"));
                out.push(format!("{name}_moving_var"));
            }
        }
        NodeKind::Group { members } => {
            for member in members {
                walk_aux_states(member, seen, out);
            }
        }
    }
}

fn walk_outputs(node: &Arc<Node>, out: &mut Vec<String>) {
    match &node.kind {
        NodeKind::Variable => {
            if let Some(name) = &node.name {
                out.push(name.clone());
            }
        }
        NodeKind::Apply { .. } => {
            if let Some(name) = &node.name {
                out.push(format!("{name}_output"));
            }
        }
        NodeKind::Group { members } => {
            for member in members {
                walk_outputs(member, out);
            }
        }
    }
}

fn arguments_of(node: &Arc<Node>) -> Vec<String> {
    let mut out = Vec::new();
    walk_arguments(node, &mut HashSet::new(), &mut out);
    out
}

fn aux_states_of(node: &Arc<Node>) -> Vec<String> {
    let mut out = Vec::new();
    walk_aux_states(node, &mut HashSet::new(), &mut out);
    out
}

unsafe fn read_name(name: *const c_char, what: &str) -> Result<String, c_int> {
    if name.is_null() {
        return Err(fail(format!("{what} must not be null")));
    }
    let name = unsafe { CStr::from_ptr(name) };
    match name.to_str() {
        Ok(s) if !s.is_empty() => Ok(s.to_owned()),
        Ok(_) => Err(fail(format!("{what} must not be empty"))),
        Err(_) => Err(fail(format!("{what} is not valid UTF-8"))),
    }
}

// ── Symbol construction ─────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_variable(
    name: *const c_char,
    out: *mut *mut mx_symbol_t,
) -> c_int {
    let name = match unsafe { read_name(name, "variable name") } {
        Ok(n) => n,
        Err(rc) => return rc,
    };
    let node = Arc::new(Node {
        name: Some(name),
        kind: NodeKind::Variable,
    });
    unsafe { *out = box_symbol(SymbolRec::new(node)) };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_apply(
    op: *const c_char,
    name: *const c_char,
    num_inputs: mx_uint,
    inputs: *const *mut mx_symbol_t,
    out: *mut *mut mx_symbol_t,
) -> c_int {
    let op = match unsafe { read_name(op, "operator name") } {
        Ok(n) => n,
        Err(rc) => return rc,
    };
    let name = match unsafe { read_name(name, "symbol name") } {
        Ok(n) => n,
        Err(rc) => return rc,
    };
    if num_inputs > 0 && inputs.is_null() {
        return fail("inputs must not be null".to_string());
    }
    let mut input_nodes = Vec::with_capacity(num_inputs as usize);
    for i in 0..num_inputs as usize {
        let p = unsafe { *inputs.add(i) };
        if p.is_null() {
            return fail(format!("inputs[{i}] is null"));
        }
        input_nodes.push(Arc::clone(&unsafe { ref_symbol(p) }.node));
    }
    let node = Arc::new(Node {
        name: Some(name),
        kind: NodeKind::Apply {
            op,
            inputs: input_nodes,
        },
    });
    unsafe { *out = box_symbol(SymbolRec::new(node)) };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_group(
    num_symbols: mx_uint,
    symbols: *const *mut mx_symbol_t,
    out: *mut *mut mx_symbol_t,
) -> c_int {
    if num_symbols > 0 && symbols.is_null() {
        return fail("symbols must not be null".to_string());
    }
    let mut members = Vec::with_capacity(num_symbols as usize);
    for i in 0..num_symbols as usize {
        let p = unsafe { *symbols.add(i) };
        if p.is_null() {
            return fail(format!("symbols[{i}] is null"));
        }
        members.push(Arc::clone(&unsafe { ref_symbol(p) }.node));
    }
    let node = Arc::new(Node {
        name: None,
        kind: NodeKind::Group { members },
    });
    unsafe { *out = box_symbol(SymbolRec::new(node)) };
    0
}

// ── Symbol queries ──────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_name(
    sym: *mut mx_symbol_t,
    out_name: *mut *const c_char,
    out_has_name: *mut c_int,
) -> c_int {
    if sym.is_null() {
        return fail("symbol handle is null".to_string());
    }
    let rec = unsafe { ref_symbol(sym) };
    let mut tables = rec.strings.lock();
    match &rec.node.name {
        Some(name) => {
            let cached = tables
                .name
                .get_or_insert_with(|| CString::new(name.clone()).unwrap_or_default());
            unsafe {
                *out_name = cached.as_ptr();
                *out_has_name = 1;
            }
        }
        None => unsafe {
            *out_name = std::ptr::null();
            *out_has_name = 0;
        },
    }
    0
}

unsafe fn list_strings(
    sym: *mut mx_symbol_t,
    out_size: *mut mx_uint,
    out_names: *mut *const *const c_char,
    select: fn(&mut StringTables) -> &mut Option<Box<CStrArray>>,
    compute: fn(&Arc<Node>) -> Vec<String>,
) -> c_int {
    if sym.is_null() {
        return fail("symbol handle is null".to_string());
    }
    let rec = unsafe { ref_symbol(sym) };
    let mut tables = rec.strings.lock();
    let table = select(&mut tables).get_or_insert_with(|| Box::new(CStrArray::new(compute(&rec.node))));
    unsafe {
        *out_size = table.ptrs.len() as mx_uint;
        *out_names = table.ptrs.as_ptr();
    }
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_list_arguments(
    sym: *mut mx_symbol_t,
    out_size: *mut mx_uint,
    out_names: *mut *const *const c_char,
) -> c_int {
    unsafe { list_strings(sym, out_size, out_names, |t| &mut t.arguments, arguments_of) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_list_aux_states(
    sym: *mut mx_symbol_t,
    out_size: *mut mx_uint,
    out_names: *mut *const *const c_char,
) -> c_int {
    unsafe { list_strings(sym, out_size, out_names, |t| &mut t.aux_states, aux_states_of) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_list_outputs(
    sym: *mut mx_symbol_t,
    out_size: *mut mx_uint,
    out_names: *mut *const *const c_char,
) -> c_int {
    unsafe {
        list_strings(sym, out_size, out_names, |t| &mut t.outputs, |node| {
            let mut out = Vec::new();
            walk_outputs(node, &mut out);
            out
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_copy(
    sym: *mut mx_symbol_t,
    out: *mut *mut mx_symbol_t,
) -> c_int {
    if sym.is_null() {
        return fail("symbol handle is null".to_string());
    }
    let rec = unsafe { ref_symbol(sym) };
    let copy = deep_copy(&rec.node);
    unsafe { *out = box_symbol(SymbolRec::new(copy)) };
    0
}

fn deep_copy(node: &Arc<Node>) -> Arc<Node> {
    let kind = match &node.kind {
        NodeKind::Variable => NodeKind::Variable,
        NodeKind::Apply { op, inputs } => NodeKind::Apply {
            op: op.clone(),
            inputs: inputs.iter().map(deep_copy).collect(),
        },
        NodeKind::Group { members } => NodeKind::Group {
            members: members.iter().map(deep_copy).collect(),
        },
    };
    Arc::new(Node {
        name: node.name.clone(),
        kind,
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_symbol_free(sym: *mut mx_symbol_t) -> c_int {
    if !sym.is_null() {
        unsafe {
            drop(Box::from_raw(sym as *mut SymbolRec));
        }
    }
    0
}

// ── NDArray ─────────────────────────────────────────────────────────────

struct NdArrayRec {
    shape: Vec<mx_uint>,
    #[allow(dead_code)]
    dev_type: c_int,
    #[allow(dead_code)]
    dev_id: c_int,
    data: Mutex<Vec<f32>>,
}

fn box_ndarray(rec: NdArrayRec) -> *mut mx_ndarray_t {
    Box::into_raw(Box::new(rec)) as *mut mx_ndarray_t
}

unsafe fn ref_ndarray<'a>(p: *mut mx_ndarray_t) -> &'a NdArrayRec {
    unsafe { &*(p as *const NdArrayRec) }
}

fn valid_dev_type(dev_type: c_int) -> bool {
    (DEV_TYPE_CPU..=DEV_TYPE_CPU_PINNED).contains(&dev_type)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_ndarray_create(
    shape: *const mx_uint,
    ndim: mx_uint,
    dev_type: c_int,
    dev_id: c_int,
    out: *mut *mut mx_ndarray_t,
) -> c_int {
    if ndim > 0 && shape.is_null() {
        return fail("shape must not be null".to_string());
    }
    if !valid_dev_type(dev_type) {
        return fail(format!("invalid device type {dev_type}"));
    }
    let dims = unsafe { std::slice::from_raw_parts(shape, ndim as usize) };
    let numel: usize = dims.iter().map(|&d| d as usize).product();
    let rec = NdArrayRec {
        shape: dims.to_vec(),
        dev_type,
        dev_id,
        data: Mutex::new(vec![0.0; numel]),
    };
    unsafe { *out = box_ndarray(rec) };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_ndarray_sync_copy_from(
    nd: *mut mx_ndarray_t,
    data: *const f32,
    size: size_t,
) -> c_int {
    if nd.is_null() {
        return fail("ndarray handle is null".to_string());
    }
    let rec = unsafe { ref_ndarray(nd) };
    let numel: usize = rec.shape.iter().map(|&d| d as usize).product();
    if size != numel {
        return fail(format!("copy size {size} does not match ndarray size {numel}"));
    }
    let src = unsafe { std::slice::from_raw_parts(data, size) };
    rec.data.lock().copy_from_slice(src);
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_ndarray_sync_copy_to(
    nd: *mut mx_ndarray_t,
    out: *mut f32,
    size: size_t,
) -> c_int {
    if nd.is_null() {
        return fail("ndarray handle is null".to_string());
    }
    let rec = unsafe { ref_ndarray(nd) };
    let data = rec.data.lock();
    if size != data.len() {
        return fail(format!(
            "copy size {size} does not match ndarray size {}",
            data.len()
        ));
    }
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), out, size);
    }
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_ndarray_free(nd: *mut mx_ndarray_t) -> c_int {
    if !nd.is_null() {
        unsafe {
            drop(Box::from_raw(nd as *mut NdArrayRec));
        }
    }
    0
}

// ── Executor ────────────────────────────────────────────────────────────

#[allow(dead_code)]
struct ExecutorRec {
    symbol: Arc<Node>,
    dev_type: c_int,
    dev_id: c_int,
    arg_handles: Vec<usize>,
    grad_handles: Vec<usize>,
    grad_reqs: Vec<mx_uint>,
    aux_handles: Vec<usize>,
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_executor_bind(
    sym: *mut mx_symbol_t,
    dev_type: c_int,
    dev_id: c_int,
    num_map_keys: mx_uint,
    map_keys: *const *const c_char,
    map_dev_types: *const c_int,
    map_dev_ids: *const c_int,
    num_args: mx_uint,
    in_args: *const *mut mx_ndarray_t,
    arg_grads: *const *mut mx_ndarray_t,
    grad_reqs: *const mx_uint,
    num_aux: mx_uint,
    aux_states: *const *mut mx_ndarray_t,
    _shared_exec: *mut mx_executor_t,
    out: *mut *mut mx_executor_t,
) -> c_int {
    if sym.is_null() {
        return fail("symbol handle is null".to_string());
    }
    if !valid_dev_type(dev_type) {
        return fail(format!("invalid device type {dev_type}"));
    }
    if num_map_keys > 0 {
        if map_keys.is_null() || map_dev_types.is_null() || map_dev_ids.is_null() {
            return fail("group2ctx arrays must not be null".to_string());
        }
        for i in 0..num_map_keys as usize {
            if unsafe { *map_keys.add(i) }.is_null() {
                return fail(format!("group2ctx key {i} is null"));
            }
            let map_dev_type = unsafe { *map_dev_types.add(i) };
            if !valid_dev_type(map_dev_type) {
                return fail(format!("invalid device type {map_dev_type} in group2ctx"));
            }
        }
    }

    let rec = unsafe { ref_symbol(sym) };
    let expected_args = arguments_of(&rec.node);
    if num_args as usize != expected_args.len() {
        return fail(format!(
            "symbol takes {} arguments, got {num_args}",
            expected_args.len()
        ));
    }
    let expected_aux = aux_states_of(&rec.node);
    if num_aux as usize != expected_aux.len() {
        return fail(format!(
            "symbol has {} auxiliary states, got {num_aux}",
            expected_aux.len()
        ));
    }

    if num_args > 0 && (in_args.is_null() || arg_grads.is_null() || grad_reqs.is_null()) {
        return fail("argument arrays must not be null".to_string());
    }
    let mut arg_handles = Vec::with_capacity(num_args as usize);
    let mut grad_handles = Vec::with_capacity(num_args as usize);
    let mut req_codes = Vec::with_capacity(num_args as usize);
    for i in 0..num_args as usize {
        let arg = unsafe { *in_args.add(i) };
        if arg.is_null() {
            return fail(format!("in_args[{i}] is null"));
        }
        arg_handles.push(arg as usize);
        // Gradient slots may be null (no gradient requested for that slot).
        grad_handles.push(unsafe { *arg_grads.add(i) } as usize);
        let code = unsafe { *grad_reqs.add(i) };
        if !matches!(code, GRAD_REQ_NULL | GRAD_REQ_WRITE | GRAD_REQ_ADD) {
            return fail(format!("invalid grad_req code {code} at position {i}"));
        }
        req_codes.push(code);
    }

    if num_aux > 0 && aux_states.is_null() {
        return fail("aux_states must not be null".to_string());
    }
    let mut aux_handles = Vec::with_capacity(num_aux as usize);
    for i in 0..num_aux as usize {
        let aux = unsafe { *aux_states.add(i) };
        if aux.is_null() {
            return fail(format!("aux_states[{i}] is null"));
        }
        aux_handles.push(aux as usize);
    }

    let exec = ExecutorRec {
        symbol: Arc::clone(&rec.node),
        dev_type,
        dev_id,
        arg_handles,
        grad_handles,
        grad_reqs: req_codes,
        aux_handles,
    };
    unsafe { *out = Box::into_raw(Box::new(exec)) as *mut mx_executor_t };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mxrs_executor_free(exec: *mut mx_executor_t) -> c_int {
    if !exec.is_null() {
        unsafe {
            drop(Box::from_raw(exec as *mut ExecutorRec));
        }
    }
    0
}
