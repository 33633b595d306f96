//! Compatibility profiles
//!
//! A profile is a named, pure policy that reads a diff/lint [`Report`] and
//! recomputes its four counters. Entity results and findings pass through
//! untouched; only the verdict changes. Lint counters are always rederived
//! from the findings' severities, so profiles only decide diff severities.
//!
//! | profile        | additions | removals | renames | type changes          |
//! |----------------|-----------|----------|---------|-----------------------|
//! | `avro-evolve`  | warning   | error    | warning | widening warns        |
//! | `proto-evolve` | allowed   | error    | warning | wire-compatible warns |
//! | `allow-add`    | allowed   | error    | error   | error                 |
//! | `allow-none`   | error     | error    | error   | error                 |
//! | `allow-all`    | allowed   | error    | warning | warning               |

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::report::{
    ChangeType, EntityResult, FieldKind, FieldLabel, FieldResult, MethodResult, Report,
    ResultCount, Severity,
};

/// One classified delta, as a profile sees it
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    EntityAdded,
    EntityRemoved,
    FieldAdded(&'a FieldResult),
    FieldRemoved(&'a FieldResult),
    FieldChanged(&'a FieldResult),
    EnumValueAdded,
    EnumValueRemoved,
    EnumValueRenamed,
    MethodAdded,
    MethodRemoved,
    MethodChanged(&'a MethodResult),
}

/// A named compatibility policy
pub trait ValidationProfile: Send + Sync {
    fn name(&self) -> &'static str;

    /// Severity of one delta; `None` means the change is allowed silently
    fn classify(&self, change: Change<'_>) -> Option<Severity>;

    /// Recompute the counters of `report` under this policy
    fn validate(&self, report: &Report) -> Report {
        let mut count = ResultCount::default();
        let mut tally = |severity: Option<Severity>| match severity {
            Some(Severity::Error) => count.diff_errors += 1,
            Some(Severity::Warning) => count.diff_warnings += 1,
            Some(Severity::Info) | None => {}
        };

        for result in report.message_results.values() {
            if let Some(change) = entity_change(result) {
                tally(self.classify(change));
            }
            for field in &result.children {
                let change = match field.change.change_type {
                    ChangeType::Addition => Change::FieldAdded(field),
                    ChangeType::Removal => Change::FieldRemoved(field),
                    ChangeType::Changed => Change::FieldChanged(field),
                    ChangeType::Unchanged => continue,
                };
                tally(self.classify(change));
            }
        }
        for result in report.enum_results.values() {
            if let Some(change) = entity_change(result) {
                tally(self.classify(change));
            }
            for value in &result.children {
                let change = match value.change.change_type {
                    ChangeType::Addition => Change::EnumValueAdded,
                    ChangeType::Removal => Change::EnumValueRemoved,
                    ChangeType::Changed => Change::EnumValueRenamed,
                    ChangeType::Unchanged => continue,
                };
                tally(self.classify(change));
            }
        }
        for result in report.service_results.values() {
            if let Some(change) = entity_change(result) {
                tally(self.classify(change));
            }
            for method in &result.children {
                let change = match method.change.change_type {
                    ChangeType::Addition => Change::MethodAdded,
                    ChangeType::Removal => Change::MethodRemoved,
                    ChangeType::Changed => Change::MethodChanged(method),
                    ChangeType::Unchanged => continue,
                };
                tally(self.classify(change));
            }
        }

        let (lint_errors, lint_warnings) = report.lint_counts();
        count.lint_errors = lint_errors;
        count.lint_warnings = lint_warnings;

        Report {
            result_count: count,
            ..report.clone()
        }
    }
}

/// Entity-level additions and removals; CHANGED entities are judged by
/// their children.
fn entity_change<C>(result: &EntityResult<C>) -> Option<Change<'static>> {
    match result.change.change_type {
        ChangeType::Addition => Some(Change::EntityAdded),
        ChangeType::Removal => Some(Change::EntityRemoved),
        ChangeType::Changed | ChangeType::Unchanged => None,
    }
}

/// Profile parameters controlling field-removal leniency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileOptions {
    /// Removing a field marked `deprecated` is a warning instead of an error
    #[serde(default)]
    pub allow_deprecated_removal: bool,

    /// Removing a field whose number the candidate reserves is a warning
    #[serde(default)]
    pub allow_reserved_removal: bool,
}

impl ProfileOptions {
    fn field_removal(&self, field: &FieldResult) -> Severity {
        let deprecated = field.from.as_ref().is_some_and(|f| f.deprecated);
        if (self.allow_deprecated_removal && deprecated) || (self.allow_reserved_removal && field.reserved) {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

// =============================================================================
// Type compatibility
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AvroPrimitive {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
}

fn avro_primitive(kind: FieldKind) -> Option<AvroPrimitive> {
    use FieldKind::*;
    match kind {
        Bool => Some(AvroPrimitive::Boolean),
        Int32 | Sint32 | Sfixed32 | Uint32 | Fixed32 => Some(AvroPrimitive::Int),
        Int64 | Sint64 | Sfixed64 | Uint64 | Fixed64 => Some(AvroPrimitive::Long),
        Float => Some(AvroPrimitive::Float),
        Double => Some(AvroPrimitive::Double),
        String => Some(AvroPrimitive::String),
        Bytes => Some(AvroPrimitive::Bytes),
        Message | Enum | Group => None,
    }
}

/// Reader can promote `from` to `to` under Avro schema resolution
fn avro_promotable(from: FieldKind, to: FieldKind) -> bool {
    use AvroPrimitive::*;
    match (avro_primitive(from), avro_primitive(to)) {
        (Some(a), Some(b)) if a == b => true,
        (Some(Int), Some(Long | Float | Double)) => true,
        (Some(Long), Some(Float | Double)) => true,
        (Some(Float), Some(Double)) => true,
        (Some(String), Some(Bytes)) | (Some(Bytes), Some(String)) => true,
        _ => false,
    }
}

/// Groups of kinds sharing a wire encoding
fn wire_group(kind: FieldKind) -> Option<u8> {
    use FieldKind::*;
    match kind {
        Int32 | Uint32 | Int64 | Uint64 | Bool | Enum => Some(0),
        Sint32 | Sint64 => Some(1),
        Fixed32 | Sfixed32 => Some(2),
        Fixed64 | Sfixed64 => Some(3),
        String | Bytes => Some(4),
        _ => None,
    }
}

fn wire_compatible(from: FieldKind, to: FieldKind) -> bool {
    matches!((wire_group(from), wire_group(to)), (Some(a), Some(b)) if a == b)
}

/// Split a field change into "name only" and "type compatible under `compat`"
fn field_change_severity(field: &FieldResult, compat: fn(FieldKind, FieldKind) -> bool) -> Severity {
    let (Some(from), Some(to)) = (&field.from, &field.to) else {
        return Severity::Error;
    };
    if from.same_type(to) {
        return Severity::Warning;
    }
    if from.label != to.label {
        return Severity::Error;
    }
    // A changed message reference is never compatible; enum references may
    // change kind into an integer of the same wire group.
    if from.kind == to.kind && from.kind.is_reference() {
        return Severity::Error;
    }
    if compat(from.kind, to.kind) {
        Severity::Warning
    } else {
        Severity::Error
    }
}

// =============================================================================
// Profiles
// =============================================================================

/// Avro-style evolution, the default profile
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroEvolve {
    pub options: ProfileOptions,
}

impl ValidationProfile for AvroEvolve {
    fn name(&self) -> &'static str {
        "avro-evolve"
    }

    fn classify(&self, change: Change<'_>) -> Option<Severity> {
        match change {
            Change::EntityAdded | Change::MethodAdded => None,
            Change::EntityRemoved | Change::EnumValueRemoved | Change::MethodRemoved => {
                Some(Severity::Error)
            }
            Change::FieldAdded(field) => {
                let required = field.to.as_ref().is_some_and(|f| f.label == FieldLabel::Required);
                Some(if required { Severity::Error } else { Severity::Warning })
            }
            Change::FieldRemoved(field) => Some(self.options.field_removal(field)),
            Change::FieldChanged(field) => Some(field_change_severity(field, avro_promotable)),
            Change::EnumValueAdded | Change::EnumValueRenamed => Some(Severity::Warning),
            Change::MethodChanged(_) => Some(Severity::Error),
        }
    }
}

/// Protobuf wire-compatibility rules
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoEvolve {
    pub options: ProfileOptions,
}

impl ValidationProfile for ProtoEvolve {
    fn name(&self) -> &'static str {
        "proto-evolve"
    }

    fn classify(&self, change: Change<'_>) -> Option<Severity> {
        match change {
            Change::EntityAdded
            | Change::FieldAdded(_)
            | Change::EnumValueAdded
            | Change::MethodAdded => None,
            Change::EntityRemoved | Change::EnumValueRemoved | Change::MethodRemoved => {
                Some(Severity::Error)
            }
            Change::FieldRemoved(field) => Some(self.options.field_removal(field)),
            Change::FieldChanged(field) => Some(field_change_severity(field, wire_compatible)),
            Change::EnumValueRenamed => Some(Severity::Warning),
            Change::MethodChanged(_) => Some(Severity::Error),
        }
    }
}

/// Only additions pass
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAdd;

impl ValidationProfile for AllowAdd {
    fn name(&self) -> &'static str {
        "allow-add"
    }

    fn classify(&self, change: Change<'_>) -> Option<Severity> {
        match change {
            Change::EntityAdded
            | Change::FieldAdded(_)
            | Change::EnumValueAdded
            | Change::MethodAdded => None,
            _ => Some(Severity::Error),
        }
    }
}

/// Frozen schema: any change is an error
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowNone;

impl ValidationProfile for AllowNone {
    fn name(&self) -> &'static str {
        "allow-none"
    }

    fn classify(&self, _change: Change<'_>) -> Option<Severity> {
        Some(Severity::Error)
    }
}

/// Loosest profile: additions pass and in-place changes only warn.
/// Removals still error; the deprecated/reserved field escapes apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll {
    pub options: ProfileOptions,
}

impl ValidationProfile for AllowAll {
    fn name(&self) -> &'static str {
        "allow-all"
    }

    fn classify(&self, change: Change<'_>) -> Option<Severity> {
        match change {
            Change::EntityAdded
            | Change::FieldAdded(_)
            | Change::EnumValueAdded
            | Change::MethodAdded => None,
            Change::EntityRemoved | Change::EnumValueRemoved | Change::MethodRemoved => {
                Some(Severity::Error)
            }
            Change::FieldRemoved(field) => Some(self.options.field_removal(field)),
            Change::FieldChanged(_) | Change::EnumValueRenamed | Change::MethodChanged(_) => {
                Some(Severity::Warning)
            }
        }
    }
}

/// Profile lookup by name
#[derive(Debug, Clone, Copy, Default)]
pub struct Profiles {
    options: ProfileOptions,
}

impl Profiles {
    pub const DEFAULT: &'static str = "avro-evolve";

    pub const NAMES: [&'static str; 5] =
        ["avro-evolve", "proto-evolve", "allow-add", "allow-none", "allow-all"];

    pub fn new(options: ProfileOptions) -> Self {
        Self { options }
    }

    /// Resolve a profile name. Matching ignores case, `-`/`_` separators and
    /// a leading `Profile`, so `ProfileAvroEvolve` names `avro-evolve`.
    pub fn get(&self, name: &str) -> Result<Box<dyn ValidationProfile>> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        let normalized = normalized.strip_prefix("profile").unwrap_or(&normalized);

        let profile: Box<dyn ValidationProfile> = match normalized {
            "avroevolve" => Box::new(AvroEvolve { options: self.options }),
            "protoevolve" => Box::new(ProtoEvolve { options: self.options }),
            "allowadd" => Box::new(AllowAdd),
            "allownone" => Box::new(AllowNone),
            "allowall" => Box::new(AllowAll { options: self.options }),
            _ => return Err(RegistryError::UnknownProfile(name.to_string())),
        };
        Ok(profile)
    }

    pub fn default_profile(&self) -> Box<dyn ValidationProfile> {
        Box::new(AvroEvolve { options: self.options })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        ChangeRecord, EnumResult, EnumValueResult, FieldShape, LintFinding, MessageResult,
        ValidationResults,
    };

    fn shape(name: &str, kind: FieldKind, label: FieldLabel) -> FieldShape {
        FieldShape {
            name: name.to_string(),
            kind,
            label,
            type_name: None,
            deprecated: false,
        }
    }

    fn changed_field(from: FieldShape, to: FieldShape) -> FieldResult {
        FieldResult {
            number: 1,
            name: to.name.clone(),
            change: ChangeRecord::changed(&from.name, &to.name),
            from: Some(from),
            to: Some(to),
            reserved: false,
        }
    }

    fn report_with_fields(fields: Vec<FieldResult>) -> Report {
        let mut results = ValidationResults::new();
        let mut message = MessageResult::new(ChangeRecord::changed("p.M", "p.M"));
        message.children = fields;
        results.set_message_result("p.M", message);
        results.finish()
    }

    #[test]
    fn test_lookup_by_name_and_alias() {
        let profiles = Profiles::default();
        assert_eq!(profiles.get("avro-evolve").unwrap().name(), "avro-evolve");
        assert_eq!(profiles.get("ProfileAvroEvolve").unwrap().name(), "avro-evolve");
        assert_eq!(profiles.get("ALLOW_NONE").unwrap().name(), "allow-none");
        for name in Profiles::NAMES {
            assert_eq!(profiles.get(name).unwrap().name(), name);
        }
        assert!(matches!(profiles.get("strict"), Err(RegistryError::UnknownProfile(_))));
        assert_eq!(profiles.default_profile().name(), Profiles::DEFAULT);
    }

    #[test]
    fn test_avro_widening_and_narrowing() {
        let widening = changed_field(
            shape("n", FieldKind::Int32, FieldLabel::Optional),
            shape("n", FieldKind::Int64, FieldLabel::Optional),
        );
        let narrowing = changed_field(
            shape("m", FieldKind::Double, FieldLabel::Optional),
            shape("m", FieldKind::Float, FieldLabel::Optional),
        );
        let report = AvroEvolve::default().validate(&report_with_fields(vec![widening, narrowing]));
        assert_eq!(report.result_count.diff_warnings, 1);
        assert_eq!(report.result_count.diff_errors, 1);
    }

    #[test]
    fn test_rename_is_a_warning() {
        let rename = changed_field(
            shape("id", FieldKind::String, FieldLabel::Optional),
            shape("ident", FieldKind::String, FieldLabel::Optional),
        );
        let raw = report_with_fields(vec![rename]);
        assert_eq!(raw.result_count.diff_errors, 0);

        for profile in [&AvroEvolve::default() as &dyn ValidationProfile, &ProtoEvolve::default()] {
            let report = profile.validate(&raw);
            assert_eq!(report.result_count.diff_errors, 0, "{}", profile.name());
            assert_eq!(report.result_count.diff_warnings, 1, "{}", profile.name());
        }
        assert_eq!(AllowNone.validate(&raw).result_count.diff_errors, 1);
    }

    #[test]
    fn test_proto_wire_groups() {
        let compatible = changed_field(
            shape("a", FieldKind::Int32, FieldLabel::Optional),
            shape("a", FieldKind::Uint64, FieldLabel::Optional),
        );
        let incompatible = changed_field(
            shape("b", FieldKind::Int32, FieldLabel::Optional),
            shape("b", FieldKind::Sint32, FieldLabel::Optional),
        );
        let report = ProtoEvolve::default().validate(&report_with_fields(vec![compatible, incompatible]));
        assert_eq!(report.result_count.diff_warnings, 1);
        assert_eq!(report.result_count.diff_errors, 1);
    }

    #[test]
    fn test_required_addition_is_an_error() {
        let added = FieldResult {
            number: 2,
            name: "must".to_string(),
            change: ChangeRecord::addition("must"),
            from: None,
            to: Some(shape("must", FieldKind::String, FieldLabel::Required)),
            reserved: false,
        };
        let report = AvroEvolve::default().validate(&report_with_fields(vec![added.clone()]));
        assert_eq!(report.result_count.diff_errors, 1);
        let report = ProtoEvolve::default().validate(&report_with_fields(vec![added]));
        assert_eq!(report.result_count.diff_errors, 0);
    }

    #[test]
    fn test_removal_parameters() {
        let mut deprecated = shape("old", FieldKind::String, FieldLabel::Optional);
        deprecated.deprecated = true;
        let removed_deprecated = FieldResult {
            number: 3,
            name: "old".to_string(),
            change: ChangeRecord::removal("old"),
            from: Some(deprecated),
            to: None,
            reserved: false,
        };
        let removed_reserved = FieldResult {
            number: 4,
            name: "gone".to_string(),
            change: ChangeRecord::removal("gone"),
            from: Some(shape("gone", FieldKind::Int32, FieldLabel::Optional)),
            to: None,
            reserved: true,
        };
        let raw = report_with_fields(vec![removed_deprecated, removed_reserved]);
        assert_eq!(raw.result_count.diff_errors, 2);

        let strict = AvroEvolve::default().validate(&raw);
        assert_eq!(strict.result_count.diff_errors, 2);

        let lenient = Profiles::new(ProfileOptions {
            allow_deprecated_removal: true,
            allow_reserved_removal: true,
        })
        .get("avro-evolve")
        .unwrap()
        .validate(&raw);
        assert_eq!(lenient.result_count.diff_errors, 0);
        assert_eq!(lenient.result_count.diff_warnings, 2);
    }

    #[test]
    fn test_allow_all_rejects_removals_and_keeps_lint() {
        let mut results = ValidationResults::new();
        results.set_message_result("p.Gone", MessageResult::new(ChangeRecord::removal("p.Gone")));
        let mut enum_result = EnumResult::new(ChangeRecord::unchanged("p.E"));
        enum_result.children.push(EnumValueResult {
            number: 1,
            name: "E_ONE".to_string(),
            change: ChangeRecord::removal("E_ONE"),
        });
        enum_result.children.push(EnumValueResult {
            number: 2,
            name: "E_TWO".to_string(),
            change: ChangeRecord::changed("E_DUO", "E_TWO"),
        });
        results.set_enum_result("p.E", enum_result);
        results.add_lint_finding(LintFinding {
            rule: "MESSAGE_PASCAL_CASE".to_string(),
            severity: Severity::Error,
            entity: "p.bad".to_string(),
            message: String::new(),
        });
        let raw = results.finish();

        let report = AllowAll::default().validate(&raw);
        assert_eq!(report.result_count.diff_errors, 2);
        assert_eq!(report.result_count.diff_warnings, 1);
        assert_eq!(report.result_count.lint_errors, 1);
        assert_eq!(report.message_results, raw.message_results);
    }

    #[test]
    fn test_allow_all_field_changes() {
        let rename = changed_field(
            shape("id", FieldKind::String, FieldLabel::Optional),
            shape("ident", FieldKind::String, FieldLabel::Optional),
        );
        let retyped = changed_field(
            shape("n", FieldKind::Int32, FieldLabel::Optional),
            shape("n", FieldKind::Sint32, FieldLabel::Optional),
        );
        let mut deprecated = shape("old", FieldKind::String, FieldLabel::Optional);
        deprecated.deprecated = true;
        let removed = FieldResult {
            number: 3,
            name: "old".to_string(),
            change: ChangeRecord::removal("old"),
            from: Some(deprecated),
            to: None,
            reserved: false,
        };
        let raw = report_with_fields(vec![rename, retyped, removed]);

        let report = Profiles::default().get("allow-all").unwrap().validate(&raw);
        assert_eq!(report.result_count.diff_errors, 1);
        assert_eq!(report.result_count.diff_warnings, 2);

        let lenient = Profiles::new(ProfileOptions {
            allow_deprecated_removal: true,
            allow_reserved_removal: false,
        })
        .get("allow-all")
        .unwrap()
        .validate(&raw);
        assert_eq!(lenient.result_count.diff_errors, 0);
        assert_eq!(lenient.result_count.diff_warnings, 3);
    }
}
