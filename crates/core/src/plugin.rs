//! Plugin handles.
//!
//! A plugin is identified by a short name and realized by one of two
//! backends: an in-process module (a shared object) or an external script
//! driven over pipes. The registry only ever sees the [`Plugin`] handle:
//! its name, its six dependency lists, the save-disabled latch and hook
//! dispatch.

use std::fmt;
use std::path::PathBuf;

use crate::errors::PluginError;
use crate::module::ModuleBackend;
use crate::script::ScriptBackend;

/// Default location of module shared objects.
pub const DEFAULT_MODULE_DIR: &str = "/usr/lib/vlock/modules";
/// Default location of plugin scripts.
pub const DEFAULT_SCRIPT_DIR: &str = "/usr/lib/vlock/scripts";

/// The four lifecycle events a plugin may handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Start,
    End,
    Save,
    SaveAbort,
}

impl Hook {
    pub const ALL: [Hook; 4] = [Hook::Start, Hook::End, Hook::Save, Hook::SaveAbort];

    /// The hook's name, as exported by modules and as written to scripts.
    pub fn name(self) -> &'static str {
        match self {
            Hook::Start => "vlock_start",
            Hook::End => "vlock_end",
            Hook::Save => "vlock_save",
            Hook::SaveAbort => "vlock_save_abort",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The six relations a plugin may declare toward other plugins.
///
/// The order and the historical `preceeds` spelling are part of the
/// plugin ABI: modules export dependency arrays under these names and
/// scripts are queried with them. Neither may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Succeeds,
    Preceeds,
    Requires,
    Needs,
    Depends,
    Conflicts,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 6] = [
        DependencyKind::Succeeds,
        DependencyKind::Preceeds,
        DependencyKind::Requires,
        DependencyKind::Needs,
        DependencyKind::Depends,
        DependencyKind::Conflicts,
    ];

    /// The relation's name as it appears on the wire.
    pub fn name(self) -> &'static str {
        match self {
            DependencyKind::Succeeds => "succeeds",
            DependencyKind::Preceeds => "preceeds",
            DependencyKind::Requires => "requires",
            DependencyKind::Needs => "needs",
            DependencyKind::Depends => "depends",
            DependencyKind::Conflicts => "conflicts",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The dependency declarations of one plugin, one name list per kind.
///
/// Duplicates are tolerated and order carries no meaning.
#[derive(Debug, Default, Clone)]
pub struct Dependencies([Vec<String>; 6]);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: DependencyKind) -> &[String] {
        &self.0[kind.index()]
    }

    pub fn push(&mut self, kind: DependencyKind, name: String) {
        self.0[kind.index()].push(name);
    }
}

/// Directories the backends search for plugin implementations.
#[derive(Debug, Clone)]
pub struct PluginDirs {
    pub module_dir: PathBuf,
    pub script_dir: PathBuf,
}

impl Default for PluginDirs {
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from(DEFAULT_MODULE_DIR),
            script_dir: PathBuf::from(DEFAULT_SCRIPT_DIR),
        }
    }
}

/// A loaded plugin implementation.
///
/// Implementors release their resources on drop.
pub(crate) trait Backend {
    /// Run the named hook. False means the hook reported failure.
    fn call_hook(&mut self, hook: Hook) -> bool;
}

/// A single loaded plugin.
pub struct Plugin {
    name: String,
    dependencies: Dependencies,
    save_disabled: bool,
    backend: Box<dyn Backend>,
}

impl Plugin {
    /// Load the named plugin, trying the module backend first and falling
    /// back to the script backend when no module file exists. Any failure
    /// other than not-found is final.
    pub fn load(name: &str, dirs: &PluginDirs) -> Result<Self, PluginError> {
        let name = strip_path(name).to_string();

        let (backend, dependencies): (Box<dyn Backend>, Dependencies) =
            match ModuleBackend::open(&name, &dirs.module_dir) {
                Ok((backend, dependencies)) => (Box::new(backend), dependencies),
                Err(PluginError::NotFound { .. }) => {
                    let (backend, dependencies) = ScriptBackend::open(&name, &dirs.script_dir)?;
                    (Box::new(backend), dependencies)
                }
                Err(error) => return Err(error),
            };

        Ok(Self {
            name,
            dependencies,
            save_disabled: false,
            backend,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self, kind: DependencyKind) -> &[String] {
        self.dependencies.get(kind)
    }

    /// Did one of the save hooks fail?
    pub fn save_disabled(&self) -> bool {
        self.save_disabled
    }

    pub(crate) fn disable_save(&mut self) {
        self.save_disabled = true;
    }

    /// Run one of the plugin's hooks.
    pub fn call_hook(&mut self, hook: Hook) -> bool {
        self.backend.call_hook(hook)
    }

    #[cfg(test)]
    pub(crate) fn with_backend(
        name: &str,
        dependencies: Dependencies,
        backend: Box<dyn Backend>,
    ) -> Self {
        Self {
            name: name.to_string(),
            dependencies,
            save_disabled: false,
            backend,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("save_disabled", &self.save_disabled)
            .finish()
    }
}

/// Plugin names must not carry a path; only the trailing component is
/// kept.
pub(crate) fn strip_path(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
