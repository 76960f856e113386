//! SysRq protection plugin.
//!
//! While the lock is held the magic SysRq key could still be used to kill
//! the locking process or drop into a debugger. Disable it through the
//! sysctl file and restore the previous value, byte for byte, on the way
//! out.

// The exported dependency symbols are the plugin ABI; their lowercase
// names are fixed.
#![allow(non_upper_case_globals)]

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::ptr;

use vlock_core::plugin_abi::DependencyList;

const SYSRQ_PATH: &str = "/proc/sys/kernel/sysrq";
const DISABLE_VALUE: &str = "0\n";

#[no_mangle]
pub static preceeds: DependencyList<3> =
    DependencyList::new([c"new".as_ptr(), c"all".as_ptr(), ptr::null()]);

#[no_mangle]
pub static depends: DependencyList<2> = DependencyList::new([c"all".as_ptr(), ptr::null()]);

struct SysrqGuard {
    file: File,
    value: String,
}

fn write_value(file: &mut File, value: &str) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(value.as_bytes())?;
    file.flush()
}

#[no_mangle]
pub extern "C" fn vlock_start(ctx_ptr: *mut *mut c_void) -> bool {
    let mut file = match OpenOptions::new().read(true).write(true).open(SYSRQ_PATH) {
        Ok(file) => file,
        // No SysRq support in this kernel, nothing to do.
        Err(error) if error.kind() == ErrorKind::NotFound => return true,
        Err(error) => {
            eprintln!("vlock-nosysrq: could not open '{SYSRQ_PATH}': {error}");
            return false;
        }
    };

    let mut value = String::new();
    if let Err(error) = file.read_to_string(&mut value) {
        eprintln!("vlock-nosysrq: could not read from '{SYSRQ_PATH}': {error}");
        return false;
    }

    // Already disabled, nothing to restore later.
    if value == DISABLE_VALUE {
        return true;
    }

    if let Err(error) = write_value(&mut file, DISABLE_VALUE) {
        eprintln!("vlock-nosysrq: could not write disable value to '{SYSRQ_PATH}': {error}");
        return false;
    }

    let guard = Box::new(SysrqGuard { file, value });
    unsafe { *ctx_ptr = Box::into_raw(guard).cast() };
    true
}

#[no_mangle]
pub extern "C" fn vlock_end(ctx_ptr: *mut *mut c_void) -> bool {
    let raw = unsafe { std::mem::replace(&mut *ctx_ptr, ptr::null_mut()) };
    if raw.is_null() {
        return true;
    }

    let mut guard = unsafe { Box::from_raw(raw.cast::<SysrqGuard>()) };
    let value = std::mem::take(&mut guard.value);
    if let Err(error) = write_value(&mut guard.file, &value) {
        eprintln!("vlock-nosysrq: could not write old value to '{SYSRQ_PATH}': {error}");
    }
    true
}
