//! Scope selection
//!
//! A [`Scope`] names which part of a domain a diff, lint or schema fetch
//! looks at. [`select`] resolves it against one or more domains into the
//! concrete top-level qualified names to visit, per kind. Nested types are
//! reached from their parents by the differ and linter, never listed here.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binding::{BindingResolver, BindingTarget};
use crate::domain::{FileTypes, ProtoDomain};
use crate::error::{RegistryError, Result};

const SUGGESTION_LIMIT: usize = 3;

/// Request scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Scope {
    /// Every file of the domain
    #[default]
    Domain,
    /// Files whose package equals the prefix or is nested under it
    PackagePrefix(String),
    /// Files declaring exactly this package
    PackageName(String),
    File(String),
    Message(String),
    Service(String),
    Enum(String),
    /// A resource identifier resolved through the binding table
    LinkedResource(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Domain => write!(f, "all"),
            Scope::PackagePrefix(p) => write!(f, "prefix:{}", p),
            Scope::PackageName(p) => write!(f, "package:{}", p),
            Scope::File(name) => write!(f, "file:{}", name),
            Scope::Message(name) => write!(f, "message:{}", name),
            Scope::Service(name) => write!(f, "service:{}", name),
            Scope::Enum(name) => write!(f, "enum:{}", name),
            Scope::LinkedResource(id) => write!(f, "resource:{}", id),
        }
    }
}

/// Parses `all`, `prefix:<p>`, `package:<p>`, `file:<f>`, `message:<m>`,
/// `service:<s>`, `enum:<e>` and `resource:<id>`.
impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() || s == "all" {
            return Ok(Scope::Domain);
        }
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| format!("scope '{}' must look like <kind>:<name> or 'all'", s))?;
        let value = value.to_string();
        match kind {
            "prefix" => Ok(Scope::PackagePrefix(value)),
            "package" => Ok(Scope::PackageName(value)),
            "file" => Ok(Scope::File(value)),
            "message" => Ok(Scope::Message(value)),
            "service" => Ok(Scope::Service(value)),
            "enum" => Ok(Scope::Enum(value)),
            "resource" => Ok(Scope::LinkedResource(value)),
            other => Err(format!(
                "unknown scope kind '{}' (expected prefix, package, file, message, service, enum or resource)",
                other
            )),
        }
    }
}

/// Resolved scope: top-level qualified names per kind, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub messages: Vec<String>,
    pub enums: Vec<String>,
    pub services: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.enums.is_empty() && self.services.is_empty()
    }

    /// Append unseen names; dedup is per kind so a name that changed kind
    /// shows up under both.
    fn extend_from(&mut self, types: &FileTypes, seen: &mut [HashSet<String>; 3]) {
        let [seen_messages, seen_enums, seen_services] = seen;
        for (target, names, seen) in [
            (&mut self.messages, &types.messages, seen_messages),
            (&mut self.enums, &types.enums, seen_enums),
            (&mut self.services, &types.services, seen_services),
        ] {
            for name in names {
                if seen.insert(name.clone()) {
                    target.push(name.clone());
                }
            }
        }
    }
}

/// Resolve `scope` against `domains`.
///
/// Names are collected from the domains in the order given, so passing the
/// candidate first yields candidate declaration order followed by names that
/// only the later domains declare. A named file or type missing from every
/// domain is NotFound; prefix, package and whole-domain scopes never fail.
pub fn select(
    scope: &Scope,
    domains: &[&ProtoDomain],
    bindings: &dyn BindingResolver,
) -> Result<Selection> {
    let mut selection = Selection::default();
    let mut seen: [HashSet<String>; 3] = Default::default();

    match scope {
        Scope::Domain => {
            for domain in domains {
                for file in domain.files() {
                    if let Some(types) = domain.file_types(file.name()) {
                        selection.extend_from(types, &mut seen);
                    }
                }
            }
        }
        Scope::PackagePrefix(prefix) => {
            for domain in domains {
                for file in domain.files_by_package_prefix(prefix) {
                    if let Some(types) = domain.file_types(file.name()) {
                        selection.extend_from(types, &mut seen);
                    }
                }
            }
        }
        Scope::PackageName(package) => {
            for domain in domains {
                for file in domain.files_by_package_name(package) {
                    if let Some(types) = domain.file_types(file.name()) {
                        selection.extend_from(types, &mut seen);
                    }
                }
            }
        }
        Scope::File(name) => {
            let mut found = false;
            for domain in domains {
                if let Some(types) = domain.file_types(name) {
                    found = true;
                    selection.extend_from(types, &mut seen);
                }
            }
            if !found {
                return Err(not_found("file", name, domains));
            }
        }
        Scope::Message(name) => {
            let name = normalize(name);
            if !domains.iter().any(|d| d.message(name).is_some()) {
                return Err(not_found("message", name, domains));
            }
            selection.messages.push(name.to_string());
        }
        Scope::Enum(name) => {
            let name = normalize(name);
            if !domains.iter().any(|d| d.enum_type(name).is_some()) {
                return Err(not_found("enum", name, domains));
            }
            selection.enums.push(name.to_string());
        }
        Scope::Service(name) => {
            let name = normalize(name);
            if !domains.iter().any(|d| d.service(name).is_some()) {
                return Err(not_found("service", name, domains));
            }
            selection.services.push(name.to_string());
        }
        Scope::LinkedResource(id) => {
            let binding = bindings
                .resolve_binding(id)
                .ok_or_else(|| RegistryError::not_found("resource binding", id.as_str()))?;
            debug!(resource = id.as_str(), target = binding.target.name(), "resolved binding");
            let bound = match binding.target {
                BindingTarget::Message(name) => Scope::Message(name),
                BindingTarget::Service(name) => Scope::Service(name),
            };
            return select(&bound, domains, bindings);
        }
    }

    Ok(selection)
}

fn normalize(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

fn not_found(kind: &'static str, name: &str, domains: &[&ProtoDomain]) -> RegistryError {
    let mut suggestions: Vec<String> = Vec::new();
    for domain in domains {
        for candidate in domain.suggest(name, SUGGESTION_LIMIT) {
            if !suggestions.contains(&candidate) {
                suggestions.push(candidate);
            }
        }
    }
    suggestions.truncate(SUGGESTION_LIMIT);
    RegistryError::NotFound {
        kind,
        name: name.to_string(),
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Bindings, NoBindings, ResourceBinding};
    use prost_types::{DescriptorProto, FileDescriptorProto, ServiceDescriptorProto};

    fn file(name: &str, package: &str, messages: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: Some(package.to_string()),
            message_type: messages
                .iter()
                .map(|m| DescriptorProto {
                    name: Some(m.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn domain(files: Vec<FileDescriptorProto>) -> ProtoDomain {
        files
            .into_iter()
            .fold(ProtoDomain::builder(), |b, f| b.add(f))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!("all".parse::<Scope>().unwrap(), Scope::Domain);
        assert_eq!(
            "prefix:shop.v1".parse::<Scope>().unwrap(),
            Scope::PackagePrefix("shop.v1".into())
        );
        assert_eq!(
            "resource:orders".parse::<Scope>().unwrap(),
            Scope::LinkedResource("orders".into())
        );
        assert!("bogus:x".parse::<Scope>().is_err());
        assert!("noseparator".parse::<Scope>().is_err());
        let scope = Scope::Message("a.B".into());
        assert_eq!(scope.to_string().parse::<Scope>().unwrap(), scope);
    }

    #[test]
    fn test_union_keeps_first_domain_order() {
        let candidate = domain(vec![file("a.proto", "a", &["New", "Kept"])]);
        let reference = domain(vec![file("a.proto", "a", &["Kept", "Old"])]);

        let selection = select(&Scope::Domain, &[&candidate, &reference], &NoBindings).unwrap();
        assert_eq!(selection.messages, vec!["a.New", "a.Kept", "a.Old"]);
    }

    #[test]
    fn test_prefix_scope_never_fails() {
        let d = domain(vec![file("a.proto", "a", &["M"])]);
        let selection = select(&Scope::PackagePrefix("zzz".into()), &[&d], &NoBindings).unwrap();
        assert!(selection.is_empty());
    }

    #[test]
    fn test_named_entity_missing_everywhere() {
        let d = domain(vec![file("a.proto", "shop", &["Customer"])]);
        let err = select(&Scope::Message("shop.Custmer".into()), &[&d], &NoBindings).unwrap_err();
        match err {
            RegistryError::NotFound { kind, suggestions, .. } => {
                assert_eq!(kind, "message");
                assert!(suggestions.contains(&"shop.Customer".to_string()));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }

        let err = select(&Scope::File("missing.proto".into()), &[&d], &NoBindings).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_named_entity_present_in_one_domain() {
        let reference = domain(vec![file("a.proto", "a", &["Gone"])]);
        let candidate = domain(vec![file("a.proto", "a", &[])]);
        let selection = select(
            &Scope::Message(".a.Gone".into()),
            &[&candidate, &reference],
            &NoBindings,
        )
        .unwrap();
        assert_eq!(selection.messages, vec!["a.Gone"]);
    }

    #[test]
    fn test_linked_resource() {
        let mut f = file("a.proto", "a", &[]);
        f.service.push(ServiceDescriptorProto {
            name: Some("Api".to_string()),
            ..Default::default()
        });
        let d = domain(vec![f]);

        let mut bindings = Bindings::new();
        bindings
            .create(ResourceBinding::new("api-endpoint", BindingTarget::Service("a.Api".into())))
            .unwrap();

        let selection =
            select(&Scope::LinkedResource("api-endpoint".into()), &[&d], &bindings).unwrap();
        assert_eq!(selection.services, vec!["a.Api"]);

        let err = select(&Scope::LinkedResource("unbound".into()), &[&d], &bindings).unwrap_err();
        assert!(err.is_not_found());
    }
}
