//! Authentication.
//!
//! The locking flow only depends on the [`Authenticator`] seam. The
//! shadow implementation below checks the entered password against the
//! system's shadow database; a PAM back-end would slot in behind the same
//! trait.

use std::time::Duration;

use crate::errors::AuthError;

/// Asks the user to prove they are `username`.
pub trait Authenticator {
    /// Prompt for and verify credentials.
    ///
    /// `Ok(false)` means the attempt failed (wrong password, timeout);
    /// errors mean authentication cannot proceed at all. The timeout
    /// bounds the password prompt.
    fn authenticate(&self, username: &str, timeout: Option<Duration>) -> Result<bool, AuthError>;
}

pub use shadow::ShadowAuth;

#[cfg(target_os = "linux")]
mod shadow {
    use std::ffi::{CStr, CString};
    use std::thread;
    use std::time::Duration;

    use nix::errno::Errno;

    use super::Authenticator;
    use crate::errors::AuthError;
    use crate::prompt;

    // glibc moved crypt(3) into libcrypt.
    #[link(name = "crypt")]
    extern "C" {
        fn crypt(key: *const libc::c_char, salt: *const libc::c_char) -> *mut libc::c_char;
    }

    /// Authentication against the shadow password database.
    ///
    /// Reading `/etc/shadow` requires the process to keep its root
    /// privileges. `getspnam(3)` and `crypt(3)` return pointers to static
    /// storage; this implementation must stay on the single main thread.
    pub struct ShadowAuth;

    impl Authenticator for ShadowAuth {
        fn authenticate(
            &self,
            username: &str,
            timeout: Option<Duration>,
        ) -> Result<bool, AuthError> {
            let Some(password) =
                prompt::prompt_echo_off(&format!("{username}'s Password: "), timeout)
            else {
                return Ok(false);
            };

            let user = CString::new(username).map_err(|_| AuthError::UnknownUser)?;

            let result = (|| {
                let entry = unsafe { libc::getspnam(user.as_ptr()) };
                if entry.is_null() {
                    return Err(AuthError::NoShadowEntry);
                }
                let stored = unsafe { CStr::from_ptr((*entry).sp_pwdp) };

                let Ok(typed) = CString::new(password.as_bytes()) else {
                    return Ok(false);
                };
                let hashed = unsafe { crypt(typed.as_ptr(), stored.as_ptr()) };
                if hashed.is_null() {
                    return Err(AuthError::Crypt(Errno::last()));
                }

                Ok(unsafe { CStr::from_ptr(hashed) } == stored)
            })();

            unsafe { libc::endspent() };

            match result {
                Ok(true) => Ok(true),
                Ok(false) => {
                    thread::sleep(Duration::from_secs(1));
                    eprintln!("vlock: Authentication error");
                    Ok(false)
                }
                Err(error) => Err(error),
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod shadow {
    use std::time::Duration;

    use super::Authenticator;
    use crate::errors::AuthError;

    /// Placeholder on systems without a shadow password database; a PAM
    /// back-end belongs here instead.
    pub struct ShadowAuth;

    impl Authenticator for ShadowAuth {
        fn authenticate(&self, _: &str, _: Option<Duration>) -> Result<bool, AuthError> {
            Err(AuthError::NoShadowEntry)
        }
    }
}
