//! C ABI surface of the MX symbolic-graph engine.
//!
//! With the default `native` feature, all `mxrs_*` functions are implemented
//! in pure Rust by a small stand-in engine, so the safe bindings and their
//! tests run without the external library. With the `cpp` feature, they link
//! against the engine glue library built via cmake.
//!
//! Calling convention: every function returns `0` on success and `-1` on
//! failure; the failure message is retrievable through [`mxrs_last_error`]
//! and stays valid until the next failing call on the same thread. String
//! arrays returned by the `list` functions are engine-owned and live as long
//! as the symbol handle they were queried from.

#![allow(non_camel_case_types)]

#[cfg(feature = "cpp")]
use libc::{c_char, c_int, size_t};

/// Unsigned count type used throughout the engine ABI.
pub type mx_uint = u32;

// ── Opaque handle types ─────────────────────────────────────────────────

/// Opaque handle to a symbolic-graph node (or group of nodes).
#[repr(C)]
pub struct mx_symbol_t {
    _private: [u8; 0],
}

/// Opaque handle to an engine tensor.
#[repr(C)]
pub struct mx_ndarray_t {
    _private: [u8; 0],
}

/// Opaque handle to a bound executor.
#[repr(C)]
pub struct mx_executor_t {
    _private: [u8; 0],
}

// ── Gradient-requirement codes ──────────────────────────────────────────

pub const GRAD_REQ_NULL: mx_uint = 0;
pub const GRAD_REQ_WRITE: mx_uint = 1;
pub const GRAD_REQ_ADD: mx_uint = 3;

// ── Device type codes ───────────────────────────────────────────────────

pub const DEV_TYPE_CPU: i32 = 1;
pub const DEV_TYPE_GPU: i32 = 2;
pub const DEV_TYPE_CPU_PINNED: i32 = 3;

// ── Engine FFI declarations (enabled with `cpp` feature) ────────────────

#[cfg(feature = "cpp")]
unsafe extern "C" {
    pub fn mxrs_last_error() -> *const c_char;

    pub fn mxrs_symbol_variable(name: *const c_char, out: *mut *mut mx_symbol_t) -> c_int;
    pub fn mxrs_symbol_apply(
        op: *const c_char,
        name: *const c_char,
        num_inputs: mx_uint,
        inputs: *const *mut mx_symbol_t,
        out: *mut *mut mx_symbol_t,
    ) -> c_int;
    pub fn mxrs_symbol_group(
        num_symbols: mx_uint,
        symbols: *const *mut mx_symbol_t,
        out: *mut *mut mx_symbol_t,
    ) -> c_int;
    pub fn mxrs_symbol_name(
        sym: *mut mx_symbol_t,
        out_name: *mut *const c_char,
        out_has_name: *mut c_int,
    ) -> c_int;
    pub fn mxrs_symbol_list_arguments(
        sym: *mut mx_symbol_t,
        out_size: *mut mx_uint,
        out_names: *mut *const *const c_char,
    ) -> c_int;
    pub fn mxrs_symbol_list_aux_states(
        sym: *mut mx_symbol_t,
        out_size: *mut mx_uint,
        out_names: *mut *const *const c_char,
    ) -> c_int;
    pub fn mxrs_symbol_list_outputs(
        sym: *mut mx_symbol_t,
        out_size: *mut mx_uint,
        out_names: *mut *const *const c_char,
    ) -> c_int;
    pub fn mxrs_symbol_copy(sym: *mut mx_symbol_t, out: *mut *mut mx_symbol_t) -> c_int;
    pub fn mxrs_symbol_free(sym: *mut mx_symbol_t) -> c_int;

    pub fn mxrs_ndarray_create(
        shape: *const mx_uint,
        ndim: mx_uint,
        dev_type: c_int,
        dev_id: c_int,
        out: *mut *mut mx_ndarray_t,
    ) -> c_int;
    pub fn mxrs_ndarray_sync_copy_from(
        nd: *mut mx_ndarray_t,
        data: *const f32,
        size: size_t,
    ) -> c_int;
    pub fn mxrs_ndarray_sync_copy_to(nd: *mut mx_ndarray_t, out: *mut f32, size: size_t) -> c_int;
    pub fn mxrs_ndarray_free(nd: *mut mx_ndarray_t) -> c_int;

    pub fn mxrs_executor_bind(
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
        shared_exec: *mut mx_executor_t,
        out: *mut *mut mx_executor_t,
    ) -> c_int;
    pub fn mxrs_executor_free(exec: *mut mx_executor_t) -> c_int;
}

// ── Pure-Rust stand-in engine (enabled with `native` feature) ───────────

#[cfg(feature = "native")]
mod native_impl;

#[cfg(feature = "native")]
pub use native_impl::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{CStr, CString};
    use std::ptr;

    // Helper: create a variable symbol via the C ABI.
    unsafe fn make_var(name: &str) -> *mut mx_symbol_t {
        let name = CString::new(name).unwrap();
        let mut out = ptr::null_mut();
        let rc = unsafe { mxrs_symbol_variable(name.as_ptr(), &mut out) };
        assert_eq!(rc, 0, "mxrs_symbol_variable failed");
        out
    }

    // Helper: apply an operator over input symbols via the C ABI.
    unsafe fn make_apply(op: &str, name: &str, inputs: &[*mut mx_symbol_t]) -> *mut mx_symbol_t {
        let op = CString::new(op).unwrap();
        let name = CString::new(name).unwrap();
        let mut out = ptr::null_mut();
        let rc = unsafe {
            mxrs_symbol_apply(
                op.as_ptr(),
                name.as_ptr(),
                inputs.len() as mx_uint,
                inputs.as_ptr(),
                &mut out,
            )
        };
        assert_eq!(rc, 0, "mxrs_symbol_apply failed");
        out
    }

    // Helper: read a count + char** listing into a Vec<String>.
    unsafe fn read_list(
        sym: *mut mx_symbol_t,
        f: unsafe extern "C" fn(
            *mut mx_symbol_t,
            *mut mx_uint,
            *mut *const *const libc::c_char,
        ) -> libc::c_int,
    ) -> Vec<String> {
        let mut size = 0;
        let mut names = ptr::null();
        let rc = unsafe { f(sym, &mut size, &mut names) };
        assert_eq!(rc, 0, "list call failed");
        (0..size as usize)
            .map(|i| unsafe { CStr::from_ptr(*names.add(i)) }.to_str().unwrap().to_owned())
            .collect()
    }

    unsafe fn last_error() -> String {
        unsafe { CStr::from_ptr(mxrs_last_error()) }
            .to_str()
            .unwrap()
            .to_owned()
    }

    #[test]
    fn test_variable_name() {
        unsafe {
            let a = make_var("a");
            let mut name = ptr::null();
            let mut has_name = 0;
            assert_eq!(mxrs_symbol_name(a, &mut name, &mut has_name), 0);
            assert_eq!(has_name, 1);
            assert_eq!(CStr::from_ptr(name).to_str().unwrap(), "a");
            mxrs_symbol_free(a);
        }
    }

    #[test]
    fn test_group_has_no_name() {
        unsafe {
            let a = make_var("a");
            let b = make_var("b");
            let members = [a, b];
            let mut group = ptr::null_mut();
            assert_eq!(mxrs_symbol_group(2, members.as_ptr(), &mut group), 0);

            let mut name = ptr::null();
            let mut has_name = 1;
            assert_eq!(mxrs_symbol_name(group, &mut name, &mut has_name), 0);
            assert_eq!(has_name, 0);

            mxrs_symbol_free(group);
            mxrs_symbol_free(b);
            mxrs_symbol_free(a);
        }
    }

    #[test]
    fn test_list_arguments_first_use_order() {
        unsafe {
            let a = make_var("a");
            let b = make_var("b");
            let c = make_apply("elemwise_add", "plus0", &[a, b]);

            let args = read_list(c, mxrs_symbol_list_arguments);
            assert_eq!(args, vec!["a", "b"]);

            // Same sequence across repeated calls.
            assert_eq!(read_list(c, mxrs_symbol_list_arguments), args);

            let outputs = read_list(c, mxrs_symbol_list_outputs);
            assert_eq!(outputs, vec!["plus0_output"]);

            mxrs_symbol_free(c);
            mxrs_symbol_free(b);
            mxrs_symbol_free(a);
        }
    }

    #[test]
    fn test_shared_input_listed_once() {
        unsafe {
            let a = make_var("a");
            let c = make_apply("elemwise_add", "plus0", &[a, a]);
            assert_eq!(read_list(c, mxrs_symbol_list_arguments), vec!["a"]);
            mxrs_symbol_free(c);
            mxrs_symbol_free(a);
        }
    }

    #[test]
    fn test_batchnorm_aux_states() {
        unsafe {
            let data = make_var("data");
            let bn = make_apply("BatchNorm", "bn0", &[data]);
            let aux = read_list(bn, mxrs_symbol_list_aux_states);
            assert_eq!(aux, vec!["bn0_moving_mean", "bn0_moving_var"]);
            mxrs_symbol_free(bn);
            mxrs_symbol_free(data);
        }
    }

    #[test]
    fn test_symbol_copy_is_independent_handle() {
        unsafe {
            let a = make_var("a");
            let b = make_var("b");
            let c = make_apply("elemwise_add", "plus0", &[a, b]);

            let mut copy = ptr::null_mut();
            assert_eq!(mxrs_symbol_copy(c, &mut copy), 0);
            assert_ne!(copy, c);
            assert_eq!(
                read_list(copy, mxrs_symbol_list_arguments),
                read_list(c, mxrs_symbol_list_arguments)
            );

            // Original stays usable after the copy is freed.
            mxrs_symbol_free(copy);
            assert_eq!(read_list(c, mxrs_symbol_list_arguments), vec!["a", "b"]);

            mxrs_symbol_free(c);
            mxrs_symbol_free(b);
            mxrs_symbol_free(a);
        }
    }

    #[test]
    fn test_empty_variable_name_fails() {
        unsafe {
            let name = CString::new("").unwrap();
            let mut out = ptr::null_mut();
            assert_eq!(mxrs_symbol_variable(name.as_ptr(), &mut out), -1);
            assert!(last_error().contains("name"));
        }
    }

    #[test]
    fn test_ndarray_roundtrip() {
        unsafe {
            let shape = [2u32, 3u32];
            let mut nd = ptr::null_mut();
            assert_eq!(mxrs_ndarray_create(shape.as_ptr(), 2, DEV_TYPE_CPU, 0, &mut nd), 0);

            let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
            assert_eq!(mxrs_ndarray_sync_copy_from(nd, data.as_ptr(), data.len()), 0);

            let mut out = [0.0f32; 6];
            assert_eq!(mxrs_ndarray_sync_copy_to(nd, out.as_mut_ptr(), out.len()), 0);
            assert_eq!(out, data);

            mxrs_ndarray_free(nd);
        }
    }

    #[test]
    fn test_ndarray_size_mismatch_fails() {
        unsafe {
            let shape = [4u32];
            let mut nd = ptr::null_mut();
            assert_eq!(mxrs_ndarray_create(shape.as_ptr(), 1, DEV_TYPE_CPU, 0, &mut nd), 0);
            let data = [1.0f32, 2.0];
            assert_eq!(mxrs_ndarray_sync_copy_from(nd, data.as_ptr(), data.len()), -1);
            mxrs_ndarray_free(nd);
        }
    }

    #[test]
    fn test_ndarray_invalid_device_type_fails() {
        unsafe {
            let shape = [1u32];
            let mut nd = ptr::null_mut();
            assert_eq!(mxrs_ndarray_create(shape.as_ptr(), 1, 99, 0, &mut nd), -1);
            assert!(last_error().contains("device"));
        }
    }

    unsafe fn make_nd(shape: &[u32]) -> *mut mx_ndarray_t {
        let mut nd = ptr::null_mut();
        let rc = unsafe {
            mxrs_ndarray_create(shape.as_ptr(), shape.len() as mx_uint, DEV_TYPE_CPU, 0, &mut nd)
        };
        assert_eq!(rc, 0, "mxrs_ndarray_create failed");
        nd
    }

    #[test]
    fn test_bind_and_free() {
        unsafe {
            let a = make_var("a");
            let b = make_var("b");
            let c = make_apply("elemwise_add", "plus0", &[a, b]);

            let args = [make_nd(&[2, 2]), make_nd(&[2, 2])];
            let grads = [ptr::null_mut(), ptr::null_mut()];
            let reqs = [GRAD_REQ_WRITE, GRAD_REQ_WRITE];

            let mut exec = ptr::null_mut();
            let rc = mxrs_executor_bind(
                c,
                DEV_TYPE_CPU,
                0,
                0,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                2,
                args.as_ptr(),
                grads.as_ptr(),
                reqs.as_ptr(),
                0,
                ptr::null(),
                ptr::null_mut(),
                &mut exec,
            );
            assert_eq!(rc, 0, "bind failed: {}", last_error());
            assert!(!exec.is_null());
            mxrs_executor_free(exec);

            for nd in args {
                mxrs_ndarray_free(nd);
            }
            mxrs_symbol_free(c);
            mxrs_symbol_free(b);
            mxrs_symbol_free(a);
        }
    }

    #[test]
    fn test_bind_arg_count_mismatch_fails() {
        unsafe {
            let a = make_var("a");
            let b = make_var("b");
            let c = make_apply("elemwise_add", "plus0", &[a, b]);

            let args = [make_nd(&[2])];
            let grads = [ptr::null_mut()];
            let reqs = [GRAD_REQ_WRITE];

            let mut exec = ptr::null_mut();
            let rc = mxrs_executor_bind(
                c,
                DEV_TYPE_CPU,
                0,
                0,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                1,
                args.as_ptr(),
                grads.as_ptr(),
                reqs.as_ptr(),
                0,
                ptr::null(),
                ptr::null_mut(),
                &mut exec,
            );
            assert_eq!(rc, -1);
            assert!(last_error().contains("2 argument"), "{}", last_error());

            mxrs_ndarray_free(args[0]);
            mxrs_symbol_free(c);
            mxrs_symbol_free(b);
            mxrs_symbol_free(a);
        }
    }

    #[test]
    fn test_bind_invalid_grad_req_code_fails() {
        unsafe {
            let a = make_var("a");
            let args = [make_nd(&[1])];
            let grads = [ptr::null_mut()];
            let reqs = [7u32];

            let mut exec = ptr::null_mut();
            let rc = mxrs_executor_bind(
                a,
                DEV_TYPE_CPU,
                0,
                0,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                1,
                args.as_ptr(),
                grads.as_ptr(),
                reqs.as_ptr(),
                0,
                ptr::null(),
                ptr::null_mut(),
                &mut exec,
            );
            assert_eq!(rc, -1);
            assert!(last_error().contains("grad_req"), "{}", last_error());

            mxrs_ndarray_free(args[0]);
            mxrs_symbol_free(a);
        }
    }
}
