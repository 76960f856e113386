//! The module backend.
//!
//! Modules are shared objects loaded into the locking process. They may
//! define hook functions that are called through the plugin mechanism and
//! dependency arrays naming the plugins they relate to.

use std::ffi::{c_char, c_void, CStr};
use std::path::Path;

use libloading::Library;
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use tracing::debug;

use crate::errors::PluginError;
use crate::plugin::{Backend, Dependencies, DependencyKind, Hook};

/// A hook function as defined by a module.
type HookFn = unsafe extern "C" fn(*mut *mut c_void) -> bool;

pub(crate) struct ModuleBackend {
    /// Resolved hook entry points; unimplemented hooks stay `None` and
    /// dispatch as no-ops.
    hooks: [Option<HookFn>; 4],
    /// Pointer slot handed to every hook by address. Starts out null; a
    /// hook may park its private state here for later hooks to find.
    context: *mut c_void,
    /// The shared object must stay mapped for as long as the hook
    /// pointers may be called.
    _library: Library,
}

impl ModuleBackend {
    /// Load `<module_dir>/<name>.so` and resolve its symbols.
    pub(crate) fn open(
        name: &str,
        module_dir: &Path,
    ) -> Result<(Self, Dependencies), PluginError> {
        let path = module_dir.join(format!("{name}.so"));

        // Test read access with the real IDs first: the binary typically
        // runs setuid and the dynamic loader would bypass DAC. dlopen
        // also reports no errno worth relaying.
        if let Err(errno) = access(&path, AccessFlags::R_OK) {
            return Err(if errno == Errno::ENOENT {
                PluginError::NotFound {
                    name: name.to_string(),
                }
            } else {
                PluginError::Access {
                    path,
                    source: errno,
                }
            });
        }

        // Library::new resolves eagerly and keeps symbols local, the
        // equivalent of RTLD_NOW | RTLD_LOCAL.
        let library = unsafe { Library::new(&path) }.map_err(|error| PluginError::Load {
            path: path.clone(),
            message: error.to_string(),
        })?;

        let mut hooks: [Option<HookFn>; 4] = [None; 4];
        for hook in Hook::ALL {
            // An absent symbol simply means the hook is not implemented.
            hooks[hook.index()] = unsafe { library.get::<HookFn>(hook.name().as_bytes()) }
                .ok()
                .map(|symbol| *symbol);
        }

        let mut dependencies = Dependencies::new();
        for kind in DependencyKind::ALL {
            let Ok(symbol) =
                (unsafe { library.get::<*const *const c_char>(kind.name().as_bytes()) })
            else {
                continue;
            };

            // The symbol is a null-terminated array of C strings; copy
            // every entry, the module may be unloaded before the names
            // are last used.
            let mut entry = *symbol;
            unsafe {
                while !entry.is_null() && !(*entry).is_null() {
                    let name = CStr::from_ptr(*entry).to_string_lossy().into_owned();
                    dependencies.push(kind, name);
                    entry = entry.add(1);
                }
            }
        }

        debug!(module = %path.display(), "loaded module");

        Ok((
            Self {
                hooks,
                context: std::ptr::null_mut(),
                _library: library,
            },
            dependencies,
        ))
    }
}

impl Backend for ModuleBackend {
    fn call_hook(&mut self, hook: Hook) -> bool {
        match self.hooks[hook.index()] {
            Some(entry) => unsafe { entry(&mut self.context) },
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_module_files_are_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        match ModuleBackend::open("absent", dir.path()) {
            Err(PluginError::NotFound { name }) => assert_eq!(name, "absent"),
            other => panic!("expected NotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn unreadable_module_files_fail_terminally() {
        use std::os::unix::fs::PermissionsExt;

        if nix::unistd::getuid().is_root() {
            // Root passes every access check; nothing to verify here.
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.so");
        std::fs::write(&path, b"not really a module").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        match ModuleBackend::open("secret", dir.path()) {
            Err(PluginError::Access { source, .. }) => assert_eq!(source, Errno::EACCES),
            other => panic!("expected Access, got {:?}", other.err()),
        }
    }

    #[test]
    fn garbage_module_files_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"\x7fELF but not really").unwrap();

        match ModuleBackend::open("garbage", dir.path()) {
            Err(PluginError::Load { .. }) => {}
            other => panic!("expected Load, got {:?}", other.err()),
        }
    }
}
