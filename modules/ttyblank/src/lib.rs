//! Console blanking plugin: blank the screen while the screensaver hooks
//! run, unblank when the user comes back.

// The exported dependency symbols are the plugin ABI; their lowercase
// names are fixed.
#![allow(non_upper_case_globals)]

use std::ffi::c_void;
use std::ptr;

use vlock_core::plugin_abi::DependencyList;

const TIOCL_BLANKSCREEN: libc::c_char = 14;
const TIOCL_UNBLANKSCREEN: libc::c_char = 4;

#[no_mangle]
pub static depends: DependencyList<2> = DependencyList::new([c"all".as_ptr(), ptr::null()]);

fn console_blanking(subcode: libc::c_char) -> bool {
    let mut arg = [subcode, 0];
    unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCLINUX as _, arg.as_mut_ptr()) == 0 }
}

#[no_mangle]
pub extern "C" fn vlock_save(_ctx_ptr: *mut *mut c_void) -> bool {
    console_blanking(TIOCL_BLANKSCREEN)
}

#[no_mangle]
pub extern "C" fn vlock_save_abort(_ctx_ptr: *mut *mut c_void) -> bool {
    console_blanking(TIOCL_UNBLANKSCREEN)
}
