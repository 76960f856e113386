//! The plugin registry, dependency resolver and lifecycle driver.
//!
//! The registry owns the ordered list of loaded plugins. [`resolve`]
//! completes the set (loading everything `requires` pulls in), validates
//! `needs` and `conflicts`, prunes plugins with unmet `depends` and
//! finally orders the list along the `preceeds`/`succeeds` constraints.
//! After that, hook delivery walks the frozen order with per-hook failure
//! policies.
//!
//! [`resolve`]: PluginRegistry::resolve

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::errors::{PluginError, ResolveError};
use crate::plugin::{strip_path, DependencyKind, Hook, Plugin, PluginDirs};
use crate::tsort::{tsort, Edge};

/// The ordered set of loaded plugins.
pub struct PluginRegistry {
    dirs: PluginDirs,
    plugins: Vec<Plugin>,
}

impl PluginRegistry {
    pub fn new(dirs: PluginDirs) -> Self {
        Self {
            dirs,
            plugins: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in their current order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(Plugin::name).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|p| p.name() == name)
    }

    fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Load the named plugin and append it to the list. Loading an
    /// already-present name is a no-op.
    pub fn load(&mut self, name: &str) -> Result<(), PluginError> {
        let name = strip_path(name);
        if self.contains(name) {
            return Ok(());
        }

        let plugin = Plugin::load(name, &self.dirs)?;
        debug!(plugin = name, "loaded plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Complete and order the plugin set.
    ///
    /// Must be called after all command-line plugins were loaded and
    /// before any hook is delivered; running it again on an already
    /// resolved registry is a no-op.
    pub fn resolve(&mut self) -> Result<(), ResolveError> {
        // Plugins loaded along the way because some plugin requires them.
        // Their own unmet `depends` are fatal instead of a silent unload.
        let mut required: HashSet<String> = HashSet::new();

        // Load whatever `requires` pulls in. Transitive requirements are
        // appended to the end of the list and picked up by the same
        // forward walk; the walk terminates because every appended name
        // is new.
        let mut index = 0;
        while index < self.plugins.len() {
            let plugin = self.plugins[index].name().to_string();
            let requires = self.plugins[index]
                .dependencies(DependencyKind::Requires)
                .to_vec();

            for dependency in requires {
                if let Err(source) = self.load(&dependency) {
                    return Err(ResolveError::RequiresFailed {
                        plugin,
                        dependency,
                        source: Box::new(source),
                    });
                }
                required.insert(dependency);
            }

            index += 1;
        }

        // A needed plugin must already be there; it is never auto-loaded.
        for plugin in &self.plugins {
            for dependency in plugin.dependencies(DependencyKind::Needs) {
                if !self.contains(dependency) {
                    return Err(ResolveError::NeedsMissing {
                        plugin: plugin.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
                required.insert(dependency.clone());
            }
        }

        // Unload plugins whose optional prerequisites are absent. That is
        // only an error when the plugin itself is in the required set.
        let mut index = 0;
        while index < self.plugins.len() {
            let unmet = self.plugins[index]
                .dependencies(DependencyKind::Depends)
                .iter()
                .find(|dependency| !self.contains(dependency))
                .cloned();

            match unmet {
                None => index += 1,
                Some(dependency) => {
                    let plugin = self.plugins[index].name().to_string();
                    if required.contains(&plugin) {
                        return Err(ResolveError::DependsMissing { plugin, dependency });
                    }
                    debug!(
                        plugin = %plugin,
                        dependency = %dependency,
                        "unloading plugin with unmet prerequisite"
                    );
                    self.plugins.remove(index);
                }
            }
        }

        // Conflicting plugins must not be loaded at the same time.
        for plugin in &self.plugins {
            for conflict in plugin.dependencies(DependencyKind::Conflicts) {
                if self.contains(conflict) {
                    return Err(ResolveError::Conflict {
                        plugin: plugin.name().to_string(),
                        conflict: conflict.clone(),
                    });
                }
            }
        }

        self.sort()
    }

    /// Order the list along the `preceeds`/`succeeds` constraints. Edges
    /// naming plugins that are not loaded are silently dropped.
    fn sort(&mut self) -> Result<(), ResolveError> {
        let names: Vec<String> = self.plugins.iter().map(|p| p.name().to_string()).collect();

        let mut edges = Vec::new();
        for plugin in &self.plugins {
            // The plugin must come after these.
            for predecessor in plugin.dependencies(DependencyKind::Succeeds) {
                if self.contains(predecessor) {
                    edges.push(Edge::new(predecessor.clone(), plugin.name().to_string()));
                }
            }
            // The plugin must come before these.
            for successor in plugin.dependencies(DependencyKind::Preceeds) {
                if self.contains(successor) {
                    edges.push(Edge::new(plugin.name().to_string(), successor.clone()));
                }
            }
        }

        let order = tsort(&names, edges).map_err(|surviving| ResolveError::Cycle {
            edges: surviving
                .into_iter()
                .map(|edge| (edge.predecessor, edge.successor))
                .collect(),
        })?;

        let mut unsorted = std::mem::take(&mut self.plugins);
        for name in &order {
            if let Some(position) = unsorted.iter().position(|p| p.name() == name) {
                self.plugins.push(unsorted.swap_remove(position));
            }
        }

        Ok(())
    }

    /// Deliver a lifecycle hook to every plugin, applying the per-hook
    /// ordering and failure policy.
    pub fn call_hook(&mut self, hook: Hook) -> Result<(), PluginError> {
        match hook {
            Hook::Start => self.start(),
            Hook::End => {
                self.end();
                Ok(())
            }
            Hook::Save => {
                self.save();
                Ok(())
            }
            Hook::SaveAbort => {
                self.save_abort();
                Ok(())
            }
        }
    }

    /// `vlock_start` runs forward. The first failure rolls back by firing
    /// `vlock_end` on every plugin before the failing one, in reverse
    /// order, and is fatal to the caller.
    fn start(&mut self) -> Result<(), PluginError> {
        for index in 0..self.plugins.len() {
            if self.plugins[index].call_hook(Hook::Start) {
                continue;
            }

            let failed = self.plugins[index].name().to_string();
            warn!(plugin = %failed, "vlock_start failed, rolling back");
            for plugin in self.plugins[..index].iter_mut().rev() {
                let _ = plugin.call_hook(Hook::End);
            }

            return Err(PluginError::HookFailed {
                plugin: failed,
                hook: Hook::Start.name(),
            });
        }

        Ok(())
    }

    /// `vlock_end` runs in reverse order; failures are ignored.
    fn end(&mut self) {
        for plugin in self.plugins.iter_mut().rev() {
            let _ = plugin.call_hook(Hook::End);
        }
    }

    /// `vlock_save` runs forward. A failing plugin gets its
    /// `vlock_save_abort` fired immediately and is latched out of all
    /// further save dispatch.
    fn save(&mut self) {
        for plugin in self.plugins.iter_mut() {
            if plugin.save_disabled() {
                continue;
            }
            if !plugin.call_hook(Hook::Save) {
                plugin.disable_save();
                let _ = plugin.call_hook(Hook::SaveAbort);
            }
        }
    }

    /// `vlock_save_abort` runs in reverse order; a failing plugin is
    /// latched but nothing cascades.
    fn save_abort(&mut self) {
        for plugin in self.plugins.iter_mut().rev() {
            if plugin.save_disabled() {
                continue;
            }
            if !plugin.call_hook(Hook::SaveAbort) {
                plugin.disable_save();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_for_tests(&mut self, plugin: Plugin) {
        self.plugins.push(plugin);
    }
}
