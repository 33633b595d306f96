//! Structural Linting
//!
//! Style rules evaluated over the candidate domain for the same scopes the
//! differ uses. Each rule has a stable code and a default severity; both
//! can be tuned per registry through [`LintConfig`].
//!
//! ## Rules
//! 1. **Naming**: PascalCase messages, enums, services and methods;
//!    lower_snake_case fields; UPPER_SNAKE_CASE enum values
//! 2. **Enum hygiene**: values prefixed with the enum name, zero value named
//!    `*_UNSPECIFIED` (or another configured suffix)
//! 3. **Wire safety**: no field numbers in the 19000-19999 range reserved by
//!    the protobuf implementation, no proto2 `required` fields
//! 4. **File layout**: a package is declared and matches the file's directory
//! 5. **Documentation**: messages carry a leading comment (only checked when
//!    the descriptor kept its source info)

use std::collections::{BTreeMap, BTreeSet, HashMap};

use prost_types::field_descriptor_proto::Label;
use prost_types::FileDescriptorProto;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::binding::{BindingResolver, NoBindings};
use crate::domain::{EnumDef, MessageDef, ProtoDomain, ServiceDef};
use crate::error::Result;
use crate::report::{LintFinding, Report, Severity, ValidationResults};
use crate::scope::{self, Scope, Selection};

/// Field numbers 19000 through 19999 are reserved for the protobuf implementation
const IMPLEMENTATION_RESERVED: std::ops::RangeInclusive<i32> = 19000..=19999;

/// A lint rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LintRule {
    MessagePascalCase,
    FieldLowerSnakeCase,
    EnumPascalCase,
    EnumValueUpperSnakeCase,
    EnumValuePrefix,
    EnumZeroValueSuffix,
    ServicePascalCase,
    MethodPascalCase,
    FieldNumberReservedRange,
    RequiredField,
    PackageDefined,
    PackageDirectoryMatch,
    MessageDocumented,
}

impl LintRule {
    pub const ALL: [LintRule; 13] = [
        LintRule::MessagePascalCase,
        LintRule::FieldLowerSnakeCase,
        LintRule::EnumPascalCase,
        LintRule::EnumValueUpperSnakeCase,
        LintRule::EnumValuePrefix,
        LintRule::EnumZeroValueSuffix,
        LintRule::ServicePascalCase,
        LintRule::MethodPascalCase,
        LintRule::FieldNumberReservedRange,
        LintRule::RequiredField,
        LintRule::PackageDefined,
        LintRule::PackageDirectoryMatch,
        LintRule::MessageDocumented,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            LintRule::MessagePascalCase => "MESSAGE_PASCAL_CASE",
            LintRule::FieldLowerSnakeCase => "FIELD_LOWER_SNAKE_CASE",
            LintRule::EnumPascalCase => "ENUM_PASCAL_CASE",
            LintRule::EnumValueUpperSnakeCase => "ENUM_VALUE_UPPER_SNAKE_CASE",
            LintRule::EnumValuePrefix => "ENUM_VALUE_PREFIX",
            LintRule::EnumZeroValueSuffix => "ENUM_ZERO_VALUE_SUFFIX",
            LintRule::ServicePascalCase => "SERVICE_PASCAL_CASE",
            LintRule::MethodPascalCase => "METHOD_PASCAL_CASE",
            LintRule::FieldNumberReservedRange => "FIELD_NUMBER_RESERVED_RANGE",
            LintRule::RequiredField => "REQUIRED_FIELD",
            LintRule::PackageDefined => "PACKAGE_DEFINED",
            LintRule::PackageDirectoryMatch => "PACKAGE_DIRECTORY_MATCH",
            LintRule::MessageDocumented => "MESSAGE_DOCUMENTED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|rule| rule.code() == code)
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            LintRule::EnumValuePrefix
            | LintRule::EnumZeroValueSuffix
            | LintRule::RequiredField
            | LintRule::PackageDefined => Severity::Warning,
            LintRule::PackageDirectoryMatch | LintRule::MessageDocumented => Severity::Info,
            _ => Severity::Error,
        }
    }
}

/// Lint tuning for one registry (the `[lint]` config section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintConfig {
    /// Rule codes that are not evaluated
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Severity overrides by rule code
    #[serde(default)]
    pub severity: BTreeMap<String, Severity>,

    /// Accepted suffixes for an enum's zero value
    #[serde(default = "default_zero_value_suffixes")]
    pub zero_value_suffixes: Vec<String>,
}

fn default_zero_value_suffixes() -> Vec<String> {
    vec!["_UNSPECIFIED".to_string(), "_UNSET".to_string()]
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            severity: BTreeMap::new(),
            zero_value_suffixes: default_zero_value_suffixes(),
        }
    }
}

/// The protobuf style linter
pub struct ProtoLinter {
    pascal_case: Regex,
    lower_snake_case: Regex,
    upper_snake_case: Regex,
    /// Effective severity of every enabled rule
    severities: HashMap<LintRule, Severity>,
    zero_value_suffixes: Vec<String>,
}

impl ProtoLinter {
    pub fn new(config: &LintConfig) -> Result<Self> {
        let mut severities: HashMap<LintRule, Severity> = LintRule::ALL
            .into_iter()
            .map(|rule| (rule, rule.default_severity()))
            .collect();

        for (code, severity) in &config.severity {
            match LintRule::from_code(code) {
                Some(rule) => {
                    severities.insert(rule, *severity);
                }
                None => warn!(code = code.as_str(), "severity override for unknown lint rule"),
            }
        }
        for code in &config.disabled {
            match LintRule::from_code(code) {
                Some(rule) => {
                    severities.remove(&rule);
                }
                None => warn!(code = code.as_str(), "cannot disable unknown lint rule"),
            }
        }

        Ok(Self {
            pascal_case: Regex::new(r"^[A-Z][A-Za-z0-9]*$")?,
            lower_snake_case: Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)*$")?,
            upper_snake_case: Regex::new(r"^[A-Z][A-Z0-9]*(_[A-Z0-9]+)*$")?,
            severities,
            zero_value_suffixes: config.zero_value_suffixes.clone(),
        })
    }

    /// Effective severity, or None when the rule is disabled
    pub fn severity(&self, rule: LintRule) -> Option<Severity> {
        self.severities.get(&rule).copied()
    }

    /// Lint every selected entity of `domain` plus the files declaring them
    pub fn run(&self, domain: &ProtoDomain, selection: &Selection) -> Report {
        let mut pass = LintPass {
            linter: self,
            results: ValidationResults::new(),
        };
        let mut files = BTreeSet::new();

        for name in &selection.messages {
            if let Some(message) = domain.message(name) {
                files.insert(message.file.as_str());
                pass.message(domain, message);
            }
        }
        for name in &selection.enums {
            if let Some(enum_def) = domain.enum_type(name) {
                files.insert(enum_def.file.as_str());
                pass.enum_type(enum_def);
            }
        }
        for name in &selection.services {
            if let Some(service) = domain.service(name) {
                files.insert(service.file.as_str());
                pass.service(service);
            }
        }
        for file in files.into_iter().filter_map(|f| domain.file_by_name(f)) {
            pass.file(file);
        }

        let report = pass.results.finish();
        debug!(
            findings = report.lint_findings.len(),
            errors = report.result_count.lint_errors,
            warnings = report.result_count.lint_warnings,
            "lint complete"
        );
        report
    }
}

struct LintPass<'l> {
    linter: &'l ProtoLinter,
    results: ValidationResults,
}

impl LintPass<'_> {
    fn report(&mut self, rule: LintRule, entity: impl Into<String>, message: String) {
        if let Some(severity) = self.linter.severity(rule) {
            self.results.add_lint_finding(LintFinding {
                rule: rule.code().to_string(),
                severity,
                entity: entity.into(),
                message,
            });
        }
    }

    fn message(&mut self, domain: &ProtoDomain, message: &MessageDef) {
        let name = message.proto.name();
        if !self.linter.pascal_case.is_match(name) {
            self.report(
                LintRule::MessagePascalCase,
                &message.qualified_name,
                format!("Message name '{}' should be PascalCase", name),
            );
        }

        for field in &message.proto.field {
            let entity = format!("{}.{}", message.qualified_name, field.name());
            if !self.linter.lower_snake_case.is_match(field.name()) {
                self.report(
                    LintRule::FieldLowerSnakeCase,
                    entity.clone(),
                    format!("Field name '{}' should be lower_snake_case", field.name()),
                );
            }
            if IMPLEMENTATION_RESERVED.contains(&field.number()) {
                self.report(
                    LintRule::FieldNumberReservedRange,
                    entity.clone(),
                    format!(
                        "Field number {} is in the range reserved for the protobuf implementation",
                        field.number()
                    ),
                );
            }
            if field.label() == Label::Required {
                self.report(
                    LintRule::RequiredField,
                    entity,
                    "Required fields can never be removed safely; use optional".to_string(),
                );
            }
        }

        if let Some(file) = domain.file_by_name(&message.file) {
            if file.source_code_info.is_some() && !has_leading_comment(file, &message.source_path) {
                self.report(
                    LintRule::MessageDocumented,
                    &message.qualified_name,
                    format!("Message '{}' has no leading comment", name),
                );
            }
        }

        for nested in &message.nested_messages {
            if let Some(nested) = domain.message(nested) {
                self.message(domain, nested);
            }
        }
        for nested in &message.nested_enums {
            if let Some(nested) = domain.enum_type(nested) {
                self.enum_type(nested);
            }
        }
    }

    fn enum_type(&mut self, enum_def: &EnumDef) {
        let name = enum_def.proto.name();
        if !self.linter.pascal_case.is_match(name) {
            self.report(
                LintRule::EnumPascalCase,
                &enum_def.qualified_name,
                format!("Enum name '{}' should be PascalCase", name),
            );
        }

        let prefix = format!("{}_", to_upper_snake_case(name));
        for value in &enum_def.proto.value {
            let entity = format!("{}.{}", enum_def.qualified_name, value.name());
            if !self.linter.upper_snake_case.is_match(value.name()) {
                self.report(
                    LintRule::EnumValueUpperSnakeCase,
                    entity.clone(),
                    format!("Enum value '{}' should be UPPER_SNAKE_CASE", value.name()),
                );
            }
            if !value.name().starts_with(&prefix) {
                self.report(
                    LintRule::EnumValuePrefix,
                    entity.clone(),
                    format!("Enum value '{}' should be prefixed with '{}'", value.name(), prefix),
                );
            }
            if value.number() == 0
                && !self
                    .linter
                    .zero_value_suffixes
                    .iter()
                    .any(|suffix| value.name().ends_with(suffix.as_str()))
            {
                self.report(
                    LintRule::EnumZeroValueSuffix,
                    entity,
                    format!(
                        "Zero value '{}' should end with one of {:?}",
                        value.name(),
                        self.linter.zero_value_suffixes
                    ),
                );
            }
        }
    }

    fn service(&mut self, service: &ServiceDef) {
        let name = service.proto.name();
        if !self.linter.pascal_case.is_match(name) {
            self.report(
                LintRule::ServicePascalCase,
                &service.qualified_name,
                format!("Service name '{}' should be PascalCase", name),
            );
        }
        for method in &service.proto.method {
            if !self.linter.pascal_case.is_match(method.name()) {
                self.report(
                    LintRule::MethodPascalCase,
                    format!("{}.{}", service.qualified_name, method.name()),
                    format!("Method name '{}' should be PascalCase", method.name()),
                );
            }
        }
    }

    fn file(&mut self, file: &FileDescriptorProto) {
        let name = file.name();
        if file.package().is_empty() {
            self.report(
                LintRule::PackageDefined,
                name,
                "File does not declare a package".to_string(),
            );
            return;
        }

        let directory = name.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let expected = file.package().replace('.', "/");
        if directory != expected {
            self.report(
                LintRule::PackageDirectoryMatch,
                name,
                format!(
                    "Package '{}' suggests directory '{}', file lives in '{}'",
                    file.package(),
                    expected,
                    directory
                ),
            );
        }
    }
}

fn has_leading_comment(file: &FileDescriptorProto, path: &[i32]) -> bool {
    file.source_code_info
        .as_ref()
        .map(|info| {
            info.location.iter().any(|loc| {
                loc.path == path && loc.leading_comments.as_deref().is_some_and(|c| !c.trim().is_empty())
            })
        })
        .unwrap_or(false)
}

/// `PhoneType` -> `PHONE_TYPE`, `HTTPStatus` -> `HTTP_STATUS`
fn to_upper_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase() || prev.is_ascii_digit() || (prev.is_ascii_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

/// Lint `candidate` over `scope`
pub fn lint(candidate: &ProtoDomain, scope: &Scope, config: &LintConfig) -> Result<Report> {
    lint_with_bindings(candidate, scope, config, &NoBindings)
}

/// Like [`lint`], resolving linked-resource scopes through `bindings`
pub fn lint_with_bindings(
    candidate: &ProtoDomain,
    scope: &Scope,
    config: &LintConfig,
    bindings: &dyn BindingResolver,
) -> Result<Report> {
    let linter = ProtoLinter::new(config)?;
    let selection = scope::select(scope, &[candidate], bindings)?;
    Ok(linter.run(candidate, &selection))
}
