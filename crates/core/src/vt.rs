//! Virtual terminal ioctl bindings.
//!
//! The libc crate does not expose the VT ioctls, so the request values
//! and struct layouts live here. Everything that differs between Linux
//! and FreeBSD is confined to the per-OS `sys` module.

use std::os::fd::RawFd;
use std::path::PathBuf;

use nix::errno::Errno;

use crate::errors::ConsoleError;

#[cfg(target_os = "linux")]
#[allow(non_camel_case_types)]
pub(crate) mod sys {
    use std::ffi::{c_char, c_short, c_ushort};

    pub const VT_OPENQRY: libc::c_ulong = 0x5600;
    pub const VT_GETMODE: libc::c_ulong = 0x5601;
    pub const VT_SETMODE: libc::c_ulong = 0x5602;
    pub const VT_GETSTATE: libc::c_ulong = 0x5603;
    pub const VT_RELDISP: libc::c_ulong = 0x5605;
    pub const VT_ACTIVATE: libc::c_ulong = 0x5606;
    pub const VT_WAITACTIVE: libc::c_ulong = 0x5607;
    pub const VT_DISALLOCATE: libc::c_ulong = 0x5608;

    pub const VT_PROCESS: c_char = 0x01;
    pub const VT_ACKACQ: libc::c_int = 0x02;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct vt_mode {
        pub mode: c_char,
        pub waitv: c_char,
        pub relsig: c_short,
        pub acqsig: c_short,
        pub frsig: c_short,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct vt_stat {
        pub v_active: c_ushort,
        pub v_signal: c_ushort,
        pub v_state: c_ushort,
    }

    /// The system console device.
    pub const CONSOLE_DEVICE: &str = "/dev/tty0";

    pub fn console_name(number: libc::c_int) -> String {
        format!("/dev/tty{number}")
    }
}

#[cfg(target_os = "freebsd")]
#[allow(non_camel_case_types)]
pub(crate) mod sys {
    use std::ffi::{c_char, c_short};

    // Request values per sys/consio.h ('v' group).
    pub const VT_OPENQRY: libc::c_ulong = 0x4004_7601;
    pub const VT_SETMODE: libc::c_ulong = 0x8008_7602;
    pub const VT_GETMODE: libc::c_ulong = 0x4008_7603;
    pub const VT_RELDISP: libc::c_ulong = 0x2004_7604;
    pub const VT_ACTIVATE: libc::c_ulong = 0x2004_7605;
    pub const VT_WAITACTIVE: libc::c_ulong = 0x2004_7606;
    pub const VT_GETACTIVE: libc::c_ulong = 0x4004_7607;

    pub const VT_PROCESS: c_char = 0x01;
    pub const VT_ACKACQ: libc::c_int = 0x02;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct vt_mode {
        pub mode: c_char,
        pub waitv: c_char,
        pub relsig: c_short,
        pub acqsig: c_short,
        pub frsig: c_short,
    }

    /// The system console device.
    pub const CONSOLE_DEVICE: &str = "/dev/ttyv0";

    pub fn console_name(number: libc::c_int) -> String {
        format!("/dev/ttyv{:x}", number - 1)
    }
}

fn check(rc: libc::c_int) -> Result<(), Errno> {
    if rc < 0 {
        Err(Errno::last())
    } else {
        Ok(())
    }
}

/// Get the console mode of the terminal behind `fd`.
pub(crate) fn get_mode(fd: RawFd) -> Result<sys::vt_mode, Errno> {
    let mut mode = sys::vt_mode::default();
    check(unsafe { libc::ioctl(fd, sys::VT_GETMODE as _, &mut mode) })?;
    Ok(mode)
}

/// Set the console mode of the terminal behind `fd`.
pub(crate) fn set_mode(fd: RawFd, mode: &sys::vt_mode) -> Result<(), Errno> {
    check(unsafe { libc::ioctl(fd, sys::VT_SETMODE as _, mode) })
}

/// Number of the currently active console, counted from 1.
#[cfg(target_os = "linux")]
pub(crate) fn active_console(fd: RawFd) -> Result<libc::c_int, Errno> {
    let mut state = sys::vt_stat::default();
    check(unsafe { libc::ioctl(fd, sys::VT_GETSTATE as _, &mut state) })?;
    Ok(libc::c_int::from(state.v_active))
}

/// Number of the currently active console, counted from 1.
#[cfg(target_os = "freebsd")]
pub(crate) fn active_console(fd: RawFd) -> Result<libc::c_int, Errno> {
    let mut active: libc::c_int = 0;
    check(unsafe { libc::ioctl(fd, sys::VT_GETACTIVE as _, &mut active) })?;
    Ok(active)
}

/// Ask the kernel for a free virtual terminal.
pub(crate) fn open_query(fd: RawFd) -> Result<libc::c_int, Errno> {
    let mut number: libc::c_int = 0;
    check(unsafe { libc::ioctl(fd, sys::VT_OPENQRY as _, &mut number) })?;
    Ok(number)
}

/// Device path for the given console number.
pub(crate) fn console_device(number: libc::c_int) -> Result<PathBuf, ConsoleError> {
    if number <= 0 {
        return Err(ConsoleError::BadVtNumber(number));
    }
    Ok(PathBuf::from(sys::console_name(number)))
}

/// Switch to the given console and wait until it is active.
pub(crate) fn activate_console(fd: RawFd, number: libc::c_int) -> Result<(), Errno> {
    check(unsafe { libc::ioctl(fd, sys::VT_ACTIVATE as _, number) })?;
    check(unsafe { libc::ioctl(fd, sys::VT_WAITACTIVE as _, number) })
}

/// Release the backing store of an unused virtual terminal.
#[cfg(target_os = "linux")]
pub(crate) fn disallocate_console(fd: RawFd, number: libc::c_int) -> Result<(), Errno> {
    check(unsafe { libc::ioctl(fd, sys::VT_DISALLOCATE as _, number) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_device_formats_the_per_os_template() {
        #[cfg(target_os = "linux")]
        assert_eq!(console_device(7).unwrap().to_str(), Some("/dev/tty7"));
        #[cfg(target_os = "freebsd")]
        assert_eq!(console_device(11).unwrap().to_str(), Some("/dev/ttyva"));
    }

    #[test]
    fn nonpositive_console_numbers_are_rejected() {
        assert!(console_device(0).is_err());
        assert!(console_device(-1).is_err());
    }
}
