//! Schema Registry
//!
//! A named registry owns the accepted schema (its reference domain), the
//! resource bindings and a store. `verify` runs the validation pipeline
//! against the current reference; `submit` does the same and, when the
//! report is free of errors, makes the candidate the new reference.
//!
//! The reference lives behind `RwLock<Arc<ProtoDomain>>`: readers clone the
//! `Arc` and validate without holding the lock. Writers serialize on the
//! store mutex, which doubles as the commit lock.
//!
//! [`Registries`] groups named registries and propagates accepted changes to
//! shadow registries.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use prost_types::FileDescriptorSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::binding::{BindingResolver, BindingTarget, Bindings, ResourceBinding};
use crate::config::{RegistryConfig, RegistryDefinition, StorageKind};
use crate::domain::{ProtoDomain, TypeRef};
use crate::error::{RegistryError, Result};
use crate::lint::LintConfig;
use crate::profile::{ProfileOptions, Profiles};
use crate::report::Report;
use crate::scope::{self, Scope};
use crate::store::{Comment, GitStore, MemoryStore, SchemaStore};
use crate::validate::Pipeline;

/// Validation policy of one registry
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySettings {
    /// Profile used when a request names none
    pub profile: String,
    pub profile_options: ProfileOptions,
    pub lint: LintConfig,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            profile: Profiles::DEFAULT.to_string(),
            profile_options: ProfileOptions::default(),
            lint: LintConfig::default(),
        }
    }
}

/// How much schema to return alongside a binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaContext {
    /// The binding only
    #[default]
    None,
    /// The file declaring the bound type
    InFile,
    /// The declaring file and everything it imports
    InScope,
    /// Every file of the registry
    FullDomain,
}

/// A single named registry
pub struct SchemaRegistry {
    name: String,
    settings: RegistrySettings,
    schema: RwLock<Arc<ProtoDomain>>,
    bindings: RwLock<Bindings>,
    /// Commit lock: every state change goes through here
    store: Mutex<Box<dyn SchemaStore>>,
}

impl SchemaRegistry {
    /// Load the registry state from `store`
    pub fn open(
        name: impl Into<String>,
        store: Box<dyn SchemaStore>,
        settings: RegistrySettings,
    ) -> Result<Self> {
        let name = name.into();
        // Fail early on a misconfigured default profile.
        Profiles::new(settings.profile_options).get(&settings.profile)?;

        let schema = match store.read_schema()? {
            Some(bytes) => ProtoDomain::from_bytes(&bytes)?,
            None => {
                debug!(registry = name.as_str(), "no stored schema, starting empty");
                ProtoDomain::empty()
            }
        };
        let bindings = store.read_bindings()?;
        info!(
            registry = name.as_str(),
            files = schema.file_count(),
            bindings = bindings.len(),
            "registry opened"
        );

        Ok(Self {
            name,
            settings,
            schema: RwLock::new(Arc::new(schema)),
            bindings: RwLock::new(bindings),
            store: Mutex::new(store),
        })
    }

    /// A registry backed by a [`MemoryStore`]
    pub fn in_memory(name: impl Into<String>, settings: RegistrySettings) -> Result<Self> {
        Self::open(name, Box::new(MemoryStore::new()), settings)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Snapshot of the current reference domain
    pub fn schema(&self) -> Result<Arc<ProtoDomain>> {
        Ok(Arc::clone(&*self.schema.read()?))
    }

    /// Validate `candidate` against the current reference without storing it
    pub fn verify(&self, candidate: &ProtoDomain, scope: &Scope, profile: Option<&str>) -> Result<Report> {
        let reference = self.schema()?;
        self.validate(&reference, candidate, scope, profile)
    }

    /// Validate `candidate` and, if it has no diff or lint errors, make it
    /// the new reference. An incompatible candidate is rejected with the
    /// report attached and nothing is stored.
    pub fn submit(
        &self,
        candidate: ProtoDomain,
        scope: &Scope,
        profile: Option<&str>,
        comment: &Comment,
    ) -> Result<Report> {
        self.submit_checked(candidate, scope, profile, comment, |_| Ok(()))
    }

    /// Like [`submit`](Self::submit), with `check` run on the accepted
    /// candidate under the commit lock. An error from `check` aborts the
    /// submission before anything is stored.
    pub(crate) fn submit_checked<F>(
        &self,
        candidate: ProtoDomain,
        scope: &Scope,
        profile: Option<&str>,
        comment: &Comment,
        check: F,
    ) -> Result<Report>
    where
        F: FnOnce(&ProtoDomain) -> Result<()>,
    {
        let mut store = self.store.lock()?;
        let reference = self.schema()?;
        let report = self.validate(&reference, &candidate, scope, profile)?;

        if report.has_errors() {
            warn!(
                registry = self.name.as_str(),
                diff_errors = report.result_count.diff_errors,
                lint_errors = report.result_count.lint_errors,
                "submission rejected"
            );
            return Err(RegistryError::Incompatible {
                report: Box::new(report),
            });
        }
        check(&candidate)?;

        let bindings = self.bindings.read()?.clone();
        let committed = store.write(&candidate.to_bytes(), &bindings, comment)?;
        *self.schema.write()? = Arc::new(candidate);
        info!(registry = self.name.as_str(), committed, "schema accepted");
        Ok(report)
    }

    fn validate(
        &self,
        reference: &ProtoDomain,
        candidate: &ProtoDomain,
        scope: &Scope,
        profile: Option<&str>,
    ) -> Result<Report> {
        let profiles = Profiles::new(self.settings.profile_options);
        let profile = profiles.get(profile.unwrap_or(&self.settings.profile))?;
        let bindings = self.bindings.read()?;
        Pipeline::new(profile.as_ref(), &self.settings.lint)
            .with_bindings(&*bindings)
            .run(reference, candidate, scope)
    }

    /// Files matching `scope`, optionally with their transitive imports.
    ///
    /// Type scopes return the declaring file. An empty result is NotFound.
    pub fn get_schema(&self, scope: &Scope, transitive: bool) -> Result<FileDescriptorSet> {
        let domain = self.schema()?;
        let bindings = self.bindings.read()?;
        let files = files_in_scope(&domain, scope, &*bindings)?;
        if files.is_empty() {
            return Err(RegistryError::not_found(
                "descriptors",
                format!("matching {}", scope),
            ));
        }
        Ok(collect_files(&domain, &files, transitive))
    }

    // -------------------------------------------------------------------------
    // Resource bindings
    // -------------------------------------------------------------------------

    pub fn get_binding(&self, linked_resource: &str) -> Result<ResourceBinding> {
        self.bindings
            .read()?
            .get(linked_resource)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("resource binding", linked_resource))
    }

    /// A binding plus the schema around its target
    pub fn get_binding_with_schema(
        &self,
        linked_resource: &str,
        context: SchemaContext,
    ) -> Result<(ResourceBinding, FileDescriptorSet)> {
        let binding = self.get_binding(linked_resource)?;
        let domain = self.schema()?;

        let declaring_file = || -> Result<String> {
            let found = match &binding.target {
                BindingTarget::Message(name) => domain.message(name).map(|m| m.file.clone()),
                BindingTarget::Service(name) => domain.service(name).map(|s| s.file.clone()),
            };
            found.ok_or_else(|| RegistryError::not_found("bound type", binding.target.name()))
        };

        let set = match context {
            SchemaContext::None => FileDescriptorSet::default(),
            SchemaContext::InFile => collect_files(&domain, &[declaring_file()?], false),
            SchemaContext::InScope => collect_files(&domain, &[declaring_file()?], true),
            SchemaContext::FullDomain => domain.file_descriptor_set(),
        };
        Ok((binding, set))
    }

    pub fn list_bindings(&self) -> Result<Vec<ResourceBinding>> {
        Ok(self.bindings.read()?.iter().cloned().collect())
    }

    pub fn create_binding(&self, binding: ResourceBinding, comment: &Comment) -> Result<()> {
        self.change_bindings(comment, |bindings| bindings.create(binding))
    }

    pub fn update_binding(&self, binding: ResourceBinding, comment: &Comment) -> Result<()> {
        self.change_bindings(comment, |bindings| bindings.update(binding))
    }

    pub fn delete_binding(&self, linked_resource: &str, comment: &Comment) -> Result<ResourceBinding> {
        let mut removed = None;
        self.change_bindings(comment, |bindings| {
            removed = Some(bindings.delete(linked_resource)?);
            Ok(())
        })?;
        removed.ok_or_else(|| RegistryError::not_found("resource binding", linked_resource))
    }

    fn change_bindings<F>(&self, comment: &Comment, change: F) -> Result<()>
    where
        F: FnOnce(&mut Bindings) -> Result<()>,
    {
        let mut store = self.store.lock()?;
        let mut next = self.bindings.read()?.clone();
        change(&mut next)?;

        let schema = self.schema()?;
        store.write(&schema.to_bytes(), &next, comment)?;
        *self.bindings.write()? = next;
        Ok(())
    }

    /// This registry's schema rebased on `upstream`: upstream files replace
    /// ours, files only this registry declares are kept. Nothing is stored.
    pub(crate) fn rebase_on(&self, upstream: &ProtoDomain) -> Result<ProtoDomain> {
        let current = self.schema()?;
        let mut builder = ProtoDomain::builder().add_set(upstream.file_descriptor_set());
        for file in current.files() {
            if upstream.file_by_name(file.name()).is_none() {
                builder = builder.add(file.clone());
            }
        }
        builder.build().map_err(|source| RegistryError::ShadowConflict {
            shadow: self.name.clone(),
            source,
        })
    }

    /// Rebase on `upstream` and store the result
    pub(crate) fn sync_from_upstream(&self, upstream: &ProtoDomain, comment: &Comment) -> Result<bool> {
        let mut store = self.store.lock()?;
        let rebased = self.rebase_on(upstream)?;

        let bindings = self.bindings.read()?.clone();
        let committed = store.write(&rebased.to_bytes(), &bindings, comment)?;
        *self.schema.write()? = Arc::new(rebased);
        debug!(registry = self.name.as_str(), committed, "shadow synced");
        Ok(committed)
    }
}

fn files_in_scope(domain: &ProtoDomain, scope: &Scope, bindings: &dyn BindingResolver) -> Result<Vec<String>> {
    let declared: Vec<&str> = match scope {
        Scope::Domain => domain.files().iter().map(|f| f.name()).collect(),
        Scope::PackagePrefix(prefix) => domain
            .files_by_package_prefix(prefix)
            .into_iter()
            .map(|f| f.name())
            .collect(),
        Scope::PackageName(package) => domain
            .files_by_package_name(package)
            .into_iter()
            .map(|f| f.name())
            .collect(),
        Scope::File(name) => domain.file_by_name(name).map(|f| f.name()).into_iter().collect(),
        Scope::Message(_) | Scope::Service(_) | Scope::Enum(_) | Scope::LinkedResource(_) => {
            let selection = scope::select(scope, &[domain], bindings)?;
            selection
                .messages
                .iter()
                .chain(&selection.enums)
                .chain(&selection.services)
                .filter_map(|name| domain.type_by_qualified_name(name))
                .map(|ty| match ty {
                    TypeRef::Message(m) => m.file.as_str(),
                    TypeRef::Enum(e) => e.file.as_str(),
                    TypeRef::Service(s) => s.file.as_str(),
                })
                .collect()
        }
    };

    let mut seen = HashSet::new();
    Ok(declared
        .into_iter()
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect())
}

fn collect_files(domain: &ProtoDomain, files: &[String], transitive: bool) -> FileDescriptorSet {
    let file = if transitive {
        domain
            .dependency_closure(files.iter().map(String::as_str))
            .into_iter()
            .cloned()
            .collect()
    } else {
        files
            .iter()
            .filter_map(|name| domain.file_by_name(name))
            .cloned()
            .collect()
    };
    FileDescriptorSet { file }
}

// =============================================================================
// Registries
// =============================================================================

/// Named registries with shadow propagation
#[derive(Default)]
pub struct Registries {
    registries: BTreeMap<String, Arc<SchemaRegistry>>,
    /// upstream name -> shadow names
    shadows: BTreeMap<String, Vec<String>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every registry the config defines, upstreams before shadows
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let mut registries = Self::new();
        let mut pending: Vec<&RegistryDefinition> = config.registries.iter().collect();

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for definition in pending {
                match &definition.shadow_of {
                    Some(upstream) if !registries.registries.contains_key(upstream) => {
                        deferred.push(definition);
                    }
                    _ => registries.insert_definition(config, definition)?,
                }
            }
            if deferred.len() == before {
                let missing = deferred[0].shadow_of.clone().unwrap_or_default();
                return Err(RegistryError::UnknownRegistry(missing));
            }
            pending = deferred;
        }

        Ok(registries)
    }

    fn insert_definition(&mut self, config: &RegistryConfig, definition: &RegistryDefinition) -> Result<()> {
        let store: Box<dyn SchemaStore> = match definition.storage {
            StorageKind::Git => Box::new(GitStore::open_with_remote(
                config.registry_path(definition),
                definition.remote.as_deref(),
            )?),
            StorageKind::Memory => Box::new(MemoryStore::new()),
        };
        let registry = SchemaRegistry::open(&definition.name, store, config.settings_for(definition))?;
        self.insert(registry, definition.shadow_of.as_deref())
    }

    /// Add a registry; a shadow with an empty schema is seeded from its upstream
    pub fn insert(&mut self, registry: SchemaRegistry, shadow_of: Option<&str>) -> Result<()> {
        let name = registry.name().to_string();
        if let Some(upstream_name) = shadow_of {
            let upstream = self.get(upstream_name)?;
            if registry.schema()?.is_empty() {
                let seed = Comment::new(format!("Seed shadow of {}", upstream_name));
                let upstream_schema = upstream.schema()?;
                registry.sync_from_upstream(&upstream_schema, &seed)?;
            }
            self.shadows
                .entry(upstream_name.to_string())
                .or_default()
                .push(name.clone());
        }
        self.registries.insert(name, Arc::new(registry));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<SchemaRegistry>> {
        self.registries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRegistry(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registries.keys().map(String::as_str)
    }

    pub fn shadows_of(&self, name: &str) -> &[String] {
        self.shadows.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Submit to `name`, then rebase its shadows on the accepted schema.
    ///
    /// Every shadow below `name` must be able to follow the candidate; a
    /// shadow whose own files would clash with it fails the submission with
    /// `ShadowConflict` and the upstream stays untouched.
    pub fn submit(
        &self,
        name: &str,
        candidate: ProtoDomain,
        scope: &Scope,
        profile: Option<&str>,
        comment: &Comment,
    ) -> Result<Report> {
        let registry = self.get(name)?;
        let report = registry.submit_checked(candidate, scope, profile, comment, |accepted| {
            self.check_shadows(name, accepted)
        })?;
        self.notify_shadows(name, comment);
        Ok(report)
    }

    /// Dry-run rebase of every shadow below `name` onto `upstream`
    fn check_shadows(&self, name: &str, upstream: &ProtoDomain) -> Result<()> {
        for shadow_name in self.shadows_of(name) {
            let rebased = self.get(shadow_name)?.rebase_on(upstream)?;
            self.check_shadows(shadow_name, &rebased)?;
        }
        Ok(())
    }

    /// The upstream commit already happened, so a shadow that fails to sync
    /// here is logged and keeps its previous schema.
    fn notify_shadows(&self, name: &str, comment: &Comment) {
        let upstream = match self.get(name).and_then(|registry| registry.schema()) {
            Ok(schema) => schema,
            Err(e) => {
                warn!(upstream = name, error = %e, "cannot read upstream for shadow sync");
                return;
            }
        };
        for shadow_name in self.shadows_of(name) {
            let synced = self
                .get(shadow_name)
                .and_then(|shadow| shadow.sync_from_upstream(&upstream, comment));
            match synced {
                Ok(committed) => {
                    if committed {
                        info!(upstream = name, shadow = shadow_name.as_str(), "shadow updated");
                    }
                    self.notify_shadows(shadow_name, comment);
                }
                Err(e) => warn!(
                    upstream = name,
                    shadow = shadow_name.as_str(),
                    error = %e,
                    "shadow sync failed"
                ),
            }
        }
    }
}
