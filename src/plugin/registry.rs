//! Plugin registry
//!
//! Provides a global catalog for registering plugins before an engine is
//! built. Each engine works from an immutable [`PluginRegistry`] snapshot so
//! later registrations never change the meaning of a constructed document.
//! Identifiers are matched case-insensitively.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{DelayCommand, DummyPlugin, LogCommand};
use super::{CommandPlugin, EndpointPlugin};

type EndpointTable = HashMap<String, Arc<dyn EndpointPlugin>>;
type CommandTable = HashMap<String, Arc<dyn CommandPlugin>>;

fn key(identifier: &str) -> String {
    identifier.to_ascii_lowercase()
}

/// Global catalog of plugin definitions.
pub struct PluginCatalog {
    endpoints: RwLock<EndpointTable>,
    commands: RwLock<CommandTable>,
}

static CATALOG: Lazy<PluginCatalog> = Lazy::new(PluginCatalog::with_builtins);

impl PluginCatalog {
    fn with_builtins() -> Self {
        let registry = PluginRegistry::with_builtins();
        Self {
            endpoints: RwLock::new((*registry.endpoints).clone()),
            commands: RwLock::new((*registry.commands).clone()),
        }
    }

    /// Access the global catalog singleton, pre-populated with the built-in plugins.
    pub fn global() -> &'static Self {
        &CATALOG
    }

    /// Register an endpoint plugin under its own identifier, replacing any previous one.
    pub fn register_endpoint<P>(&self, plugin: P)
    where
        P: EndpointPlugin + 'static,
    {
        let mut endpoints = self.endpoints.write();
        endpoints.insert(key(plugin.identifier()), Arc::new(plugin));
    }

    /// Register a command plugin under its own identifier, replacing any previous one.
    pub fn register_command<C>(&self, command: C)
    where
        C: CommandPlugin + 'static,
    {
        let mut commands = self.commands.write();
        commands.insert(key(command.identifier()), Arc::new(command));
    }

    /// Register a command type that implements `Default`.
    pub fn register_default_command<C>(&self)
    where
        C: CommandPlugin + Default + 'static,
    {
        self.register_command(C::default());
    }

    /// Produce an immutable snapshot for an engine instance.
    pub fn snapshot(&self) -> PluginRegistry {
        PluginRegistry {
            endpoints: Arc::new(self.endpoints.read().clone()),
            commands: Arc::new(self.commands.read().clone()),
        }
    }
}

/// Immutable view of the available plugins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    endpoints: Arc<EndpointTable>,
    commands: Arc<CommandTable>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `Dummy` endpoint and the `Delay` and `Log`
    /// commands. Every call creates a fresh `Dummy` wire.
    pub fn with_builtins() -> Self {
        Self::new()
            .with_endpoint(DummyPlugin::new())
            .with_command(DelayCommand)
            .with_command(LogCommand)
    }

    /// Add or replace an endpoint plugin.
    pub fn with_endpoint<P>(mut self, plugin: P) -> Self
    where
        P: EndpointPlugin + 'static,
    {
        Arc::make_mut(&mut self.endpoints).insert(key(plugin.identifier()), Arc::new(plugin));
        self
    }

    /// Add or replace a command plugin.
    pub fn with_command<C>(mut self, command: C) -> Self
    where
        C: CommandPlugin + 'static,
    {
        Arc::make_mut(&mut self.commands).insert(key(command.identifier()), Arc::new(command));
        self
    }

    /// Look up an endpoint plugin.
    pub fn endpoint(&self, identifier: &str) -> Option<Arc<dyn EndpointPlugin>> {
        self.endpoints.get(&key(identifier)).cloned()
    }

    /// Look up a command plugin.
    pub fn command(&self, identifier: &str) -> Option<Arc<dyn CommandPlugin>> {
        self.commands.get(&key(identifier)).cloned()
    }

    /// Check whether an endpoint plugin is registered.
    pub fn has_endpoint(&self, identifier: &str) -> bool {
        self.endpoints.contains_key(&key(identifier))
    }

    /// Check whether a command plugin is registered.
    pub fn has_command(&self, identifier: &str) -> bool {
        self.commands.contains_key(&key(identifier))
    }

    /// Sorted identifiers of every registered plugin.
    pub fn catalogue(&self) -> Catalogue {
        let mut endpoints: Vec<String> = self
            .endpoints
            .values()
            .map(|plugin| plugin.identifier().to_string())
            .collect();
        let mut commands: Vec<String> = self
            .commands
            .values()
            .map(|command| command.identifier().to_string())
            .collect();
        endpoints.sort();
        commands.sort();
        Catalogue {
            endpoints,
            commands,
        }
    }
}

/// Plugin identifiers known to a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogue {
    /// Endpoint plugin identifiers.
    pub endpoints: Vec<String>,
    /// Command plugin identifiers.
    pub commands: Vec<String>,
}
