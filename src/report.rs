//! Change report model
//!
//! A [`Report`] maps qualified names to per-entity results for messages,
//! enums and services, carries the lint findings of the same pass, and rolls
//! everything up into four counters. Child result lists (fields, enum values,
//! methods) only hold entries that are not UNCHANGED, so a report grows with
//! the delta rather than with the schema.
//!
//! [`ValidationResults`] is the aggregator one diff or lint pass writes into.
//! Independent passes produce independent reports which are combined with
//! [`Report::merge`].

use std::collections::BTreeMap;
use std::fmt;

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{FieldDescriptorProto, MethodDescriptorProto};
use serde::{Deserialize, Serialize};

// =============================================================================
// Change Record
// =============================================================================

/// Classification of one entity across the reference and candidate domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Unchanged,
    Addition,
    Removal,
    Changed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Unchanged => "UNCHANGED",
            ChangeType::Addition => "ADDITION",
            ChangeType::Removal => "REMOVAL",
            ChangeType::Changed => "CHANGED",
        };
        f.write_str(s)
    }
}

/// Change classification plus before/after names.
///
/// `from_name` is empty when the entity is absent from the reference,
/// `to_name` when it is absent from the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_type: ChangeType,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub to_name: String,
}

impl ChangeRecord {
    pub fn addition(to_name: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Addition,
            from_name: String::new(),
            to_name: to_name.into(),
        }
    }

    pub fn removal(from_name: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Removal,
            from_name: from_name.into(),
            to_name: String::new(),
        }
    }

    pub fn changed(from_name: impl Into<String>, to_name: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Changed,
            from_name: from_name.into(),
            to_name: to_name.into(),
        }
    }

    pub fn unchanged(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            change_type: ChangeType::Unchanged,
            from_name: name.clone(),
            to_name: name,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.change_type == ChangeType::Unchanged
    }

    /// CHANGED with differing names
    pub fn is_rename(&self) -> bool {
        self.change_type == ChangeType::Changed && self.from_name != self.to_name
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Finding severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Field / Method shapes
// =============================================================================

/// Wire type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    Uint32,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl From<Type> for FieldKind {
    fn from(ty: Type) -> Self {
        match ty {
            Type::Double => FieldKind::Double,
            Type::Float => FieldKind::Float,
            Type::Int64 => FieldKind::Int64,
            Type::Uint64 => FieldKind::Uint64,
            Type::Int32 => FieldKind::Int32,
            Type::Fixed64 => FieldKind::Fixed64,
            Type::Fixed32 => FieldKind::Fixed32,
            Type::Bool => FieldKind::Bool,
            Type::String => FieldKind::String,
            Type::Group => FieldKind::Group,
            Type::Message => FieldKind::Message,
            Type::Bytes => FieldKind::Bytes,
            Type::Uint32 => FieldKind::Uint32,
            Type::Enum => FieldKind::Enum,
            Type::Sfixed32 => FieldKind::Sfixed32,
            Type::Sfixed64 => FieldKind::Sfixed64,
            Type::Sint32 => FieldKind::Sint32,
            Type::Sint64 => FieldKind::Sint64,
        }
    }
}

impl FieldKind {
    /// Kinds that reference another declaration through `type_name`
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldKind::Message | FieldKind::Enum | FieldKind::Group)
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldLabel {
    Optional,
    Required,
    Repeated,
}

impl From<Label> for FieldLabel {
    fn from(label: Label) -> Self {
        match label {
            Label::Optional => FieldLabel::Optional,
            Label::Required => FieldLabel::Required,
            Label::Repeated => FieldLabel::Repeated,
        }
    }
}

/// The compatibility-relevant shape of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: String,
    pub kind: FieldKind,
    pub label: FieldLabel,
    /// Referenced message/enum, without the leading dot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

impl FieldShape {
    pub fn from_proto(field: &FieldDescriptorProto) -> Self {
        let type_name = field
            .type_name
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| t.strip_prefix('.').unwrap_or(t).to_string());
        Self {
            name: field.name().to_string(),
            kind: field.r#type().into(),
            label: field.label().into(),
            type_name,
            deprecated: field.options.as_ref().map(|o| o.deprecated()).unwrap_or(false),
        }
    }

    /// Same wire identity apart from the name
    pub fn same_type(&self, other: &FieldShape) -> bool {
        self.kind == other.kind && self.label == other.label && self.type_name == other.type_name
    }
}

/// Signature of one RPC method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodShape {
    pub input_type: String,
    pub output_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub client_streaming: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub server_streaming: bool,
}

impl MethodShape {
    pub fn from_proto(method: &MethodDescriptorProto) -> Self {
        let strip = |t: &str| t.strip_prefix('.').unwrap_or(t).to_string();
        Self {
            input_type: strip(method.input_type()),
            output_type: strip(method.output_type()),
            client_streaming: method.client_streaming(),
            server_streaming: method.server_streaming(),
        }
    }
}

// =============================================================================
// Child results
// =============================================================================

/// Anything carrying a change record
pub trait ChildResult {
    fn change(&self) -> &ChangeRecord;
}

/// One field of a message, matched by number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResult {
    pub number: i32,
    /// Candidate name when present, else reference name
    pub name: String,
    pub change: ChangeRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<FieldShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<FieldShape>,
    /// A removed field whose number the candidate message reserves
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reserved: bool,
}

impl ChildResult for FieldResult {
    fn change(&self) -> &ChangeRecord {
        &self.change
    }
}

/// One value of an enum, matched by number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValueResult {
    pub number: i32,
    pub name: String,
    pub change: ChangeRecord,
}

impl ChildResult for EnumValueResult {
    fn change(&self) -> &ChangeRecord {
        &self.change
    }
}

/// One method of a service, matched by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResult {
    pub name: String,
    pub change: ChangeRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<MethodShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<MethodShape>,
}

impl ChildResult for MethodResult {
    fn change(&self) -> &ChangeRecord {
        &self.change
    }
}

// =============================================================================
// Entity results
// =============================================================================

/// Result for one message, enum or service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResult<C> {
    pub change: ChangeRecord,
    /// Non-UNCHANGED children in discovery order
    #[serde(default = "Vec::new")]
    pub children: Vec<C>,
}

impl<C: ChildResult> EntityResult<C> {
    pub fn new(change: ChangeRecord) -> Self {
        Self {
            change,
            children: Vec::new(),
        }
    }

    /// True if the entity or any of its children differs
    pub fn has_changes(&self) -> bool {
        !self.change.is_unchanged() || !self.children.is_empty()
    }

    fn removals(&self) -> u32 {
        let own = u32::from(self.change.change_type == ChangeType::Removal);
        own + self
            .children
            .iter()
            .filter(|c| c.change().change_type == ChangeType::Removal)
            .count() as u32
    }
}

pub type MessageResult = EntityResult<FieldResult>;
pub type EnumResult = EntityResult<EnumValueResult>;
pub type ServiceResult = EntityResult<MethodResult>;

// =============================================================================
// Lint findings
// =============================================================================

/// One lint rule violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintFinding {
    /// Rule code, e.g. "FIELD_LOWER_SNAKE_CASE"
    pub rule: String,
    pub severity: Severity,
    /// Qualified name of the offending declaration (fields as `Message.field`)
    pub entity: String,
    pub message: String,
}

// =============================================================================
// Report
// =============================================================================

/// Rolled-up finding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCount {
    pub diff_errors: u32,
    pub diff_warnings: u32,
    pub lint_errors: u32,
    pub lint_warnings: u32,
}

impl ResultCount {
    fn sum(self, other: ResultCount) -> ResultCount {
        ResultCount {
            diff_errors: self.diff_errors + other.diff_errors,
            diff_warnings: self.diff_warnings + other.diff_warnings,
            lint_errors: self.lint_errors + other.lint_errors,
            lint_warnings: self.lint_warnings + other.lint_warnings,
        }
    }
}

/// Result of a diff and/or lint pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub message_results: BTreeMap<String, MessageResult>,
    #[serde(default)]
    pub enum_results: BTreeMap<String, EnumResult>,
    #[serde(default)]
    pub service_results: BTreeMap<String, ServiceResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lint_findings: Vec<LintFinding>,
    #[serde(default)]
    pub result_count: ResultCount,
}

impl Report {
    /// Nonzero diff or lint errors; a schema with errors must not be accepted
    pub fn has_errors(&self) -> bool {
        self.result_count.diff_errors > 0 || self.result_count.lint_errors > 0
    }

    pub fn is_empty(&self) -> bool {
        self.message_results.is_empty()
            && self.enum_results.is_empty()
            && self.service_results.is_empty()
            && self.lint_findings.is_empty()
    }

    /// Any entity differs between reference and candidate
    pub fn has_changes(&self) -> bool {
        self.message_results.values().any(EntityResult::has_changes)
            || self.enum_results.values().any(EntityResult::has_changes)
            || self.service_results.values().any(EntityResult::has_changes)
    }

    /// Combine two independent passes: maps are unioned by key (entries of
    /// `other` win) and counters are summed.
    pub fn merge(mut self, other: Report) -> Report {
        self.message_results.extend(other.message_results);
        self.enum_results.extend(other.enum_results);
        self.service_results.extend(other.service_results);
        self.lint_findings.extend(other.lint_findings);
        self.result_count = self.result_count.sum(other.result_count);
        self
    }

    /// Lint counters derived from the findings list
    pub fn lint_counts(&self) -> (u32, u32) {
        self.lint_findings.iter().fold((0, 0), |(e, w), f| match f.severity {
            Severity::Error => (e + 1, w),
            Severity::Warning => (e, w + 1),
            Severity::Info => (e, w),
        })
    }

    fn raw_diff_errors(&self) -> u32 {
        self.message_results.values().map(EntityResult::removals).sum::<u32>()
            + self.enum_results.values().map(EntityResult::removals).sum::<u32>()
            + self.service_results.values().map(EntityResult::removals).sum::<u32>()
    }
}

fn change_marker(change_type: ChangeType) -> char {
    match change_type {
        ChangeType::Addition => '+',
        ChangeType::Removal => '-',
        ChangeType::Changed => '~',
        ChangeType::Unchanged => ' ',
    }
}

fn entity_name(change: &ChangeRecord) -> &str {
    if change.to_name.is_empty() {
        &change.from_name
    } else {
        &change.to_name
    }
}

fn child_names(change: &ChangeRecord) -> String {
    if change.is_rename() {
        format!("{} -> {}", change.from_name, change.to_name)
    } else {
        entity_name(change).to_string()
    }
}

/// Human-readable change log
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, result) in &self.message_results {
            if !result.has_changes() {
                continue;
            }
            writeln!(f, "{} message {}", change_marker(result.change.change_type), name)?;
            for field in &result.children {
                writeln!(
                    f,
                    "    {} field {} {}",
                    change_marker(field.change.change_type),
                    field.number,
                    child_names(&field.change)
                )?;
            }
        }
        for (name, result) in &self.enum_results {
            if !result.has_changes() {
                continue;
            }
            writeln!(f, "{} enum {}", change_marker(result.change.change_type), name)?;
            for value in &result.children {
                writeln!(
                    f,
                    "    {} value {} {}",
                    change_marker(value.change.change_type),
                    value.number,
                    child_names(&value.change)
                )?;
            }
        }
        for (name, result) in &self.service_results {
            if !result.has_changes() {
                continue;
            }
            writeln!(f, "{} service {}", change_marker(result.change.change_type), name)?;
            for method in &result.children {
                writeln!(
                    f,
                    "    {} rpc {}",
                    change_marker(method.change.change_type),
                    method.name
                )?;
            }
        }
        for finding in &self.lint_findings {
            writeln!(
                f,
                "{} [{}] {}: {}",
                finding.severity, finding.rule, finding.entity, finding.message
            )?;
        }
        let c = &self.result_count;
        write!(
            f,
            "diff: {} error(s), {} warning(s); lint: {} error(s), {} warning(s)",
            c.diff_errors, c.diff_warnings, c.lint_errors, c.lint_warnings
        )
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// In-progress report of a single diff or lint pass
#[derive(Debug, Default)]
pub struct ValidationResults {
    report: Report,
}

impl ValidationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_message_result(&mut self, name: impl Into<String>, result: MessageResult) {
        self.report.message_results.insert(name.into(), result);
    }

    pub fn set_enum_result(&mut self, name: impl Into<String>, result: EnumResult) {
        self.report.enum_results.insert(name.into(), result);
    }

    pub fn set_service_result(&mut self, name: impl Into<String>, result: ServiceResult) {
        self.report.service_results.insert(name.into(), result);
    }

    pub fn add_lint_finding(&mut self, finding: LintFinding) {
        self.report.lint_findings.push(finding);
    }

    /// Roll up the raw counters.
    ///
    /// Every REMOVAL, of an entity or of a child, counts as one diff error.
    /// Additions and changes stay zero-severity until a profile classifies
    /// them. Lint findings count by severity; info is not counted.
    pub fn finish(self) -> Report {
        let mut report = self.report;
        let (lint_errors, lint_warnings) = report.lint_counts();
        report.result_count = ResultCount {
            diff_errors: report.raw_diff_errors(),
            diff_warnings: 0,
            lint_errors,
            lint_warnings,
        };
        report
    }
}
