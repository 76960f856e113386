//! Console allocation plugin: run the lock on a freshly allocated
//! virtual terminal and restore the previous one afterwards.

// The exported dependency symbols are the plugin ABI; their lowercase
// names are fixed.
#![allow(non_upper_case_globals)]

use std::ffi::c_void;
use std::ptr;

use vlock_core::new_vt::NewVtSession;
use vlock_core::plugin_abi::DependencyList;

#[no_mangle]
pub static preceeds: DependencyList<2> = DependencyList::new([c"all".as_ptr(), ptr::null()]);

#[no_mangle]
pub static requires: DependencyList<2> = DependencyList::new([c"all".as_ptr(), ptr::null()]);

#[no_mangle]
pub extern "C" fn vlock_start(ctx_ptr: *mut *mut c_void) -> bool {
    match NewVtSession::start() {
        Ok(session) => {
            unsafe { *ctx_ptr = Box::into_raw(Box::new(session)).cast() };
            true
        }
        Err(error) => {
            eprintln!("vlock-new: {error}");
            false
        }
    }
}

#[no_mangle]
pub extern "C" fn vlock_end(ctx_ptr: *mut *mut c_void) -> bool {
    let raw = unsafe { std::mem::replace(&mut *ctx_ptr, ptr::null_mut()) };
    if raw.is_null() {
        return true;
    }

    let session = unsafe { Box::from_raw(raw.cast::<NewVtSession>()) };
    session.end();
    true
}
