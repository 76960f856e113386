//! Console grabbing plugin: disable virtual console switching for the
//! duration of the lock.

use std::ffi::c_void;
use std::ptr;

use vlock_core::console_switch::{self, ConsoleSwitchLock};

#[no_mangle]
pub extern "C" fn vlock_start(ctx_ptr: *mut *mut c_void) -> bool {
    match console_switch::lock() {
        Ok(lock) => {
            unsafe { *ctx_ptr = Box::into_raw(Box::new(lock)).cast() };
            true
        }
        Err(error) => {
            eprintln!("vlock-all: {error}");
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

    let lock = unsafe { Box::from_raw(raw.cast::<ConsoleSwitchLock>()) };
    match lock.unlock() {
        Ok(()) => true,
        Err(error) => {
            eprintln!("vlock-all: {error}");
            false
        }
    }
}
