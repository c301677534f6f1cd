//! Module catalogs.
//!
//! A [`Catalog`] is the fixed, immutable set of namespace to module bindings
//! that every execution context receives. It is produced by a
//! [`CatalogBuilder`], which accepts either ready-made modules or factories
//! that construct a module from a shared dependency set. Factories run exactly
//! once, inside [`CatalogBuilder::build`]; nothing is resolved lazily or by
//! reflection afterwards.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::capability::{CapabilityModule, Namespace, SharedModule};
use crate::error::{CapabilityError, CapabilityResult};

/// One resolved catalog binding.
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    /// Namespace the guest uses with `require`.
    pub namespace: Namespace,
    /// The bound module.
    pub module: SharedModule,
}

/// An immutable, ordered set of capability bindings.
///
/// Namespaces are unique. Cloning a catalog is cheap: modules are shared.
#[derive(Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no bindings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a namespace is bound.
    pub fn contains(&self, namespace: &str) -> bool {
        self.get(namespace).is_some()
    }

    /// Look up the module bound under a namespace.
    pub fn get(&self, namespace: &str) -> Option<&SharedModule> {
        self.entries
            .iter()
            .find(|e| e.namespace.as_str() == namespace)
            .map(|e| &e.module)
    }

    /// All bound namespaces, in binding order.
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.entries.iter().map(|e| e.namespace.clone()).collect()
    }

    /// Iterate over the bindings in order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    /// Merge another catalog into this one.
    ///
    /// Bindings of `other` replace bindings with the same namespace in place;
    /// new namespaces are appended. The result is deterministic: last write
    /// wins.
    pub fn merge(mut self, other: Catalog) -> Self {
        for entry in other.entries {
            match self
                .entries
                .iter_mut()
                .find(|e| e.namespace == entry.namespace)
            {
                Some(existing) => {
                    debug!(namespace = %entry.namespace, "Catalog binding replaced");
                    *existing = entry;
                }
                None => self.entries.push(entry),
            }
        }
        self
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

type Factory<D> = Box<dyn Fn(&D) -> CapabilityResult<SharedModule> + Send + Sync>;

/// Where a catalog binding comes from.
pub enum ModuleSource<D> {
    /// A module that already exists.
    Ready(SharedModule),
    /// A constructor run once against the shared dependency set.
    Factory(Factory<D>),
}

impl<D> fmt::Debug for ModuleSource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSource::Ready(module) => f.debug_tuple("Ready").field(module).finish(),
            ModuleSource::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Builder for catalogs.
///
/// `D` is the dependency set handed to factories (for the standard host it
/// carries the network driver and the confined filesystem).
///
/// # Example
///
/// ```ignore
/// let catalog = CatalogBuilder::<Deps>::new()
///     .module("time", TimeModule::new())
///     .factory("net.tcp", |deps: &Deps| Ok(TcpModule::new(deps.driver.clone())))
///     .build(&deps)?;
/// ```
pub struct CatalogBuilder<D> {
    entries: Vec<(Cow<'static, str>, ModuleSource<D>)>,
}

impl<D> Default for CatalogBuilder<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D> CatalogBuilder<D> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a ready-made module.
    pub fn module<M: CapabilityModule + 'static>(
        self,
        namespace: impl Into<Cow<'static, str>>,
        module: M,
    ) -> Self {
        self.shared(namespace, Arc::new(module))
    }

    /// Bind an already shared module.
    pub fn shared(mut self, namespace: impl Into<Cow<'static, str>>, module: SharedModule) -> Self {
        self.entries
            .push((namespace.into(), ModuleSource::Ready(module)));
        self
    }

    /// Bind a module produced by a factory.
    pub fn factory<M, F>(mut self, namespace: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        M: CapabilityModule + 'static,
        F: Fn(&D) -> CapabilityResult<M> + Send + Sync + 'static,
    {
        let factory: Factory<D> =
            Box::new(move |deps| factory(deps).map(|m| Arc::new(m) as SharedModule));
        self.entries
            .push((namespace.into(), ModuleSource::Factory(factory)));
        self
    }

    /// Number of pending bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been bound yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every binding against `deps` and freeze the result.
    ///
    /// # Errors
    ///
    /// Fails on a malformed or duplicated namespace, or when a factory fails.
    pub fn build(self, deps: &D) -> CapabilityResult<Catalog> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        let mut entries = Vec::with_capacity(self.entries.len());

        for (raw, source) in self.entries {
            let namespace = Namespace::parse(raw)?;
            if !seen.insert(namespace.clone()) {
                return Err(CapabilityError::DuplicateNamespace(namespace));
            }

            let module = match source {
                ModuleSource::Ready(module) => module,
                ModuleSource::Factory(factory) => {
                    factory(deps).map_err(|e| match e {
                        CapabilityError::FactoryFailed { .. } => e,
                        other => CapabilityError::FactoryFailed {
                            namespace: namespace.clone(),
                            reason: other.to_string(),
                        },
                    })?
                }
            };

            debug!(namespace = %namespace, module = module.name(), "Catalog binding resolved");
            entries.push(CatalogEntry { namespace, module });
        }

        info!(modules = entries.len(), "Catalog built");
        Ok(Catalog { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::{Lua, Table};

    #[derive(Debug)]
    struct Named(&'static str);

    impl CapabilityModule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn install(&self, lua: &Lua) -> mlua::Result<Table> {
            let table = lua.create_table()?;
            table.set("name", self.0)?;
            Ok(table)
        }
    }

    #[test]
    fn test_build_ready_and_factory() {
        let catalog = CatalogBuilder::<&'static str>::new()
            .module("a", Named("first"))
            .factory("b.c", |deps: &&'static str| Ok(Named(*deps)))
            .build(&"from-deps")
            .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a").unwrap().name(), "first");
        assert_eq!(catalog.get("b.c").unwrap().name(), "from-deps");
        assert!(!catalog.contains("missing"));
    }

    #[test]
    fn test_duplicate_namespace_rejected() {
        let result = CatalogBuilder::<()>::new()
            .module("dup", Named("one"))
            .module("dup", Named("two"))
            .build(&());

        assert!(matches!(result, Err(CapabilityError::DuplicateNamespace(_))));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let result = CatalogBuilder::<()>::new()
            .module("Bad Name", Named("x"))
            .build(&());

        assert!(matches!(result, Err(CapabilityError::InvalidNamespace { .. })));
    }

    #[test]
    fn test_factory_failure_names_namespace() {
        let result = CatalogBuilder::<()>::new()
            .factory("broken", |_: &()| -> CapabilityResult<Named> {
                Err(CapabilityError::InvalidNamespace {
                    namespace: "inner".into(),
                    reason: "boom",
                })
            })
            .build(&());

        match result {
            Err(CapabilityError::FactoryFailed { namespace, .. }) => {
                assert_eq!(namespace.as_str(), "broken")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_merge_last_write_wins() {
        let first = CatalogBuilder::<()>::new()
            .module("a", Named("old"))
            .module("b", Named("kept"))
            .build(&())
            .unwrap();
        let second = CatalogBuilder::<()>::new()
            .module("a", Named("new"))
            .module("c", Named("added"))
            .build(&())
            .unwrap();

        let merged = first.merge(second);
        let names: Vec<_> = merged.namespaces().iter().map(|n| n.to_string()).collect();

        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(merged.get("a").unwrap().name(), "new");
        assert_eq!(merged.get("b").unwrap().name(), "kept");
    }
}
