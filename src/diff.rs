//! Structural Differ
//!
//! Compares two independently loaded domains and records, per in-scope
//! message, enum and service, what happened to it and to its children.
//!
//! Two identity rules drive the comparison:
//! - messages, enums and services are matched by qualified name, so a rename
//!   is a removal plus an addition;
//! - fields and enum values are matched by number, methods by name, so a
//!   rename at a fixed number is CHANGED.
//!
//! Added and removed entities are reported without descending into them.
//! Structural differences are data, never errors: the only failure is a
//! scope naming something neither domain has.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use prost_types::DescriptorProto;
use tracing::{debug, info};

use crate::binding::{BindingResolver, NoBindings};
use crate::domain::{EnumDef, MessageDef, ProtoDomain, ServiceDef};
use crate::error::Result;
use crate::report::{
    ChangeRecord, ChildResult, EntityResult, EnumValueResult, FieldResult, FieldShape,
    MethodResult, MethodShape, Report, ValidationResults,
};
use crate::scope::{self, Scope, Selection};

/// One side or both sides of an identity match
#[derive(Debug, Clone, Copy)]
pub(crate) enum Matched<'a, T> {
    Added(&'a T),
    Removed(&'a T),
    Both(&'a T, &'a T),
}

/// Pair up `reference` and `candidate` items by `key`.
///
/// Output is candidate order (added or matched) followed by reference-only
/// items in reference order. When a key repeats on one side only its first
/// declaration takes part.
pub(crate) fn match_by<'a, T, K, F>(reference: &'a [T], candidate: &'a [T], key: F) -> Vec<Matched<'a, T>>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> K,
{
    let mut by_key: HashMap<K, &'a T> = HashMap::with_capacity(reference.len());
    for item in reference {
        by_key.entry(key(item)).or_insert(item);
    }

    let mut matched = Vec::with_capacity(reference.len().max(candidate.len()));
    let mut seen: HashSet<K> = HashSet::with_capacity(candidate.len());
    for item in candidate {
        let k = key(item);
        if seen.contains(&k) {
            continue;
        }
        matched.push(match by_key.get(&k) {
            Some(old) => Matched::Both(*old, item),
            None => Matched::Added(item),
        });
        seen.insert(k);
    }

    let mut emitted: HashSet<K> = HashSet::new();
    for item in reference {
        let k = key(item);
        if !seen.contains(&k) && emitted.insert(k) {
            matched.push(Matched::Removed(item));
        }
    }

    matched
}

/// An entity kind the differ visits by qualified name
trait Declaration: Sized {
    type Child: ChildResult;

    const KIND: &'static str;

    /// Whether a child difference marks the entity itself CHANGED
    const ROLLS_UP_CHILD_CHANGES: bool;

    fn lookup<'a>(domain: &'a ProtoDomain, name: &str) -> Option<&'a Self>;

    fn diff_children(reference: &Self, candidate: &Self) -> Vec<Self::Child>;
}

impl Declaration for MessageDef {
    type Child = FieldResult;
    const KIND: &'static str = "message";
    const ROLLS_UP_CHILD_CHANGES: bool = true;

    fn lookup<'a>(domain: &'a ProtoDomain, name: &str) -> Option<&'a Self> {
        domain.message(name)
    }

    fn diff_children(reference: &Self, candidate: &Self) -> Vec<FieldResult> {
        diff_fields(&reference.proto, &candidate.proto)
    }
}

// Enum records stay UNCHANGED when only their values differ; the value
// results carry the delta.
impl Declaration for EnumDef {
    type Child = EnumValueResult;
    const KIND: &'static str = "enum";
    const ROLLS_UP_CHILD_CHANGES: bool = false;

    fn lookup<'a>(domain: &'a ProtoDomain, name: &str) -> Option<&'a Self> {
        domain.enum_type(name)
    }

    fn diff_children(reference: &Self, candidate: &Self) -> Vec<EnumValueResult> {
        match_by(&reference.proto.value, &candidate.proto.value, |v| v.number())
            .into_iter()
            .filter_map(|m| match m {
                Matched::Added(v) => Some(EnumValueResult {
                    number: v.number(),
                    name: v.name().to_string(),
                    change: ChangeRecord::addition(v.name()),
                }),
                Matched::Removed(v) => Some(EnumValueResult {
                    number: v.number(),
                    name: v.name().to_string(),
                    change: ChangeRecord::removal(v.name()),
                }),
                Matched::Both(old, new) if old.name() != new.name() => Some(EnumValueResult {
                    number: new.number(),
                    name: new.name().to_string(),
                    change: ChangeRecord::changed(old.name(), new.name()),
                }),
                Matched::Both(..) => None,
            })
            .collect()
    }
}

impl Declaration for ServiceDef {
    type Child = MethodResult;
    const KIND: &'static str = "service";
    const ROLLS_UP_CHILD_CHANGES: bool = true;

    fn lookup<'a>(domain: &'a ProtoDomain, name: &str) -> Option<&'a Self> {
        domain.service(name)
    }

    fn diff_children(reference: &Self, candidate: &Self) -> Vec<MethodResult> {
        match_by(&reference.proto.method, &candidate.proto.method, |m| m.name())
            .into_iter()
            .filter_map(|m| match m {
                Matched::Added(method) => Some(MethodResult {
                    name: method.name().to_string(),
                    change: ChangeRecord::addition(method.name()),
                    from: None,
                    to: Some(MethodShape::from_proto(method)),
                }),
                Matched::Removed(method) => Some(MethodResult {
                    name: method.name().to_string(),
                    change: ChangeRecord::removal(method.name()),
                    from: Some(MethodShape::from_proto(method)),
                    to: None,
                }),
                Matched::Both(old, new) => {
                    let from = MethodShape::from_proto(old);
                    let to = MethodShape::from_proto(new);
                    (from != to).then(|| MethodResult {
                        name: new.name().to_string(),
                        change: ChangeRecord::changed(old.name(), new.name()),
                        from: Some(from),
                        to: Some(to),
                    })
                }
            })
            .collect()
    }
}

fn is_reserved(message: &DescriptorProto, number: i32, name: &str) -> bool {
    message
        .reserved_range
        .iter()
        .any(|r| r.start() <= number && number < r.end())
        || message.reserved_name.iter().any(|n| n == name)
}

fn diff_fields(reference: &DescriptorProto, candidate: &DescriptorProto) -> Vec<FieldResult> {
    match_by(&reference.field, &candidate.field, |f| f.number())
        .into_iter()
        .filter_map(|m| match m {
            Matched::Added(field) => Some(FieldResult {
                number: field.number(),
                name: field.name().to_string(),
                change: ChangeRecord::addition(field.name()),
                from: None,
                to: Some(FieldShape::from_proto(field)),
                reserved: false,
            }),
            Matched::Removed(field) => Some(FieldResult {
                number: field.number(),
                name: field.name().to_string(),
                change: ChangeRecord::removal(field.name()),
                from: Some(FieldShape::from_proto(field)),
                to: None,
                reserved: is_reserved(candidate, field.number(), field.name()),
            }),
            Matched::Both(old, new) => {
                let from = FieldShape::from_proto(old);
                let to = FieldShape::from_proto(new);
                if from.name == to.name && from.same_type(&to) {
                    return None;
                }
                Some(FieldResult {
                    number: new.number(),
                    name: to.name.clone(),
                    change: ChangeRecord::changed(&from.name, &to.name),
                    from: Some(from),
                    to: Some(to),
                    reserved: false,
                })
            }
        })
        .collect()
}

/// A diff pass over one reference/candidate pair
pub struct ProtoDiff<'a> {
    reference: &'a ProtoDomain,
    candidate: &'a ProtoDomain,
    results: ValidationResults,
}

impl<'a> ProtoDiff<'a> {
    pub fn new(reference: &'a ProtoDomain, candidate: &'a ProtoDomain) -> Self {
        Self {
            reference,
            candidate,
            results: ValidationResults::new(),
        }
    }

    /// Resolve `scope` against both domains, candidate first
    pub fn select(&self, scope: &Scope, bindings: &dyn BindingResolver) -> Result<Selection> {
        scope::select(scope, &[self.candidate, self.reference], bindings)
    }

    /// Diff every entity in `selection` and roll up the report
    pub fn run(mut self, selection: &Selection) -> Report {
        for name in &selection.messages {
            self.visit_message(name);
        }
        for name in &selection.enums {
            self.visit_enum(name);
        }
        for name in &selection.services {
            self.visit_service(name);
        }

        let report = self.results.finish();
        info!(
            messages = report.message_results.len(),
            enums = report.enum_results.len(),
            services = report.service_results.len(),
            removals = report.result_count.diff_errors,
            "diff complete"
        );
        report
    }

    fn visit_message(&mut self, name: &str) {
        let Some(result) = self.compare::<MessageDef>(name) else {
            return;
        };
        self.results.set_message_result(name, result);

        let (reference, candidate) = (self.reference, self.candidate);
        let (Some(old), Some(new)) = (reference.message(name), candidate.message(name)) else {
            return;
        };
        let nested_messages: Vec<&str> = match_by(&old.nested_messages, &new.nested_messages, |n| n.as_str())
            .into_iter()
            .map(matched_name)
            .collect();
        let nested_enums: Vec<&str> = match_by(&old.nested_enums, &new.nested_enums, |n| n.as_str())
            .into_iter()
            .map(matched_name)
            .collect();

        for nested in nested_messages {
            self.visit_message(nested);
        }
        for nested in nested_enums {
            self.visit_enum(nested);
        }
    }

    fn visit_enum(&mut self, name: &str) {
        if let Some(result) = self.compare::<EnumDef>(name) {
            self.results.set_enum_result(name, result);
        }
    }

    fn visit_service(&mut self, name: &str) {
        if let Some(result) = self.compare::<ServiceDef>(name) {
            self.results.set_service_result(name, result);
        }
    }

    fn compare<D: Declaration>(&self, name: &str) -> Option<EntityResult<D::Child>> {
        let result = match (D::lookup(self.reference, name), D::lookup(self.candidate, name)) {
            (None, None) => return None,
            (None, Some(_)) => EntityResult::new(ChangeRecord::addition(name)),
            (Some(_), None) => EntityResult::new(ChangeRecord::removal(name)),
            (Some(old), Some(new)) => {
                let children = D::diff_children(old, new);
                let change = if D::ROLLS_UP_CHILD_CHANGES && !children.is_empty() {
                    ChangeRecord::changed(name, name)
                } else {
                    ChangeRecord::unchanged(name)
                };
                EntityResult { change, children }
            }
        };
        debug!(
            kind = D::KIND,
            name,
            change = %result.change.change_type,
            children = result.children.len(),
            "compared"
        );
        Some(result)
    }
}

fn matched_name<'a>(m: Matched<'a, String>) -> &'a str {
    match m {
        Matched::Added(n) | Matched::Removed(n) | Matched::Both(_, n) => n.as_str(),
    }
}

/// Diff `candidate` against `reference` over `scope`
pub fn diff(reference: &ProtoDomain, candidate: &ProtoDomain, scope: &Scope) -> Result<Report> {
    diff_with_bindings(reference, candidate, scope, &NoBindings)
}

/// Like [`diff`], resolving linked-resource scopes through `bindings`
pub fn diff_with_bindings(
    reference: &ProtoDomain,
    candidate: &ProtoDomain,
    scope: &Scope,
    bindings: &dyn BindingResolver,
) -> Result<Report> {
    let differ = ProtoDiff::new(reference, candidate);
    let selection = differ.select(scope, bindings)?;
    debug!(%scope, "diffing");
    Ok(differ.run(&selection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ChangeType, FieldKind};
    use prost_types::descriptor_proto::ReservedRange;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{
        EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    };

    fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
        DescriptorProto {
            name: Some(name.to_string()),
            field: fields,
            ..Default::default()
        }
    }

    fn domain_of(messages: Vec<DescriptorProto>) -> ProtoDomain {
        let file = FileDescriptorProto {
            name: Some("test.proto".to_string()),
            package: Some("test".to_string()),
            message_type: messages,
            ..Default::default()
        };
        ProtoDomain::builder().add(file).build().unwrap()
    }

    #[test]
    fn test_match_by_order() {
        let reference = [1, 2, 3];
        let candidate = [4, 2, 1];
        let order: Vec<String> = match_by(&reference, &candidate, |n| *n)
            .into_iter()
            .map(|m| match m {
                Matched::Added(n) => format!("+{}", n),
                Matched::Removed(n) => format!("-{}", n),
                Matched::Both(_, n) => format!("={}", n),
            })
            .collect();
        assert_eq!(order, vec!["+4", "=2", "=1", "-3"]);
    }

    #[test]
    fn test_match_by_duplicate_keys_use_first() {
        let reference = [(1, "a"), (1, "alias")];
        let candidate = [(1, "b"), (1, "alias")];
        let matched = match_by(&reference, &candidate, |(n, _)| *n);
        assert_eq!(matched.len(), 1);
        assert!(matches!(matched[0], Matched::Both((_, "a"), (_, "b"))));
    }

    #[test]
    fn test_field_type_change_is_changed() {
        let reference = domain_of(vec![message("M", vec![field("id", 1, Type::Int32)])]);
        let candidate = domain_of(vec![message("M", vec![field("id", 1, Type::Int64)])]);

        let report = diff(&reference, &candidate, &Scope::Domain).unwrap();
        let result = &report.message_results["test.M"];
        assert_eq!(result.change.change_type, ChangeType::Changed);
        assert_eq!(result.children.len(), 1);
        let child = &result.children[0];
        assert_eq!(child.change, ChangeRecord::changed("id", "id"));
        assert_eq!(child.from.as_ref().unwrap().kind, FieldKind::Int32);
        assert_eq!(child.to.as_ref().unwrap().kind, FieldKind::Int64);
        assert_eq!(report.result_count.diff_errors, 0);
    }

    #[test]
    fn test_removed_field_records_reservation() {
        let reference = domain_of(vec![message(
            "M",
            vec![field("id", 1, Type::Int32), field("gone", 2, Type::String)],
        )]);
        let mut reserved = message("M", vec![field("id", 1, Type::Int32)]);
        reserved.reserved_range.push(ReservedRange {
            start: Some(2),
            end: Some(3),
        });
        let candidate = domain_of(vec![reserved]);

        let report = diff(&reference, &candidate, &Scope::Domain).unwrap();
        let child = &report.message_results["test.M"].children[0];
        assert_eq!(child.change.change_type, ChangeType::Removal);
        assert!(child.reserved);
        assert_eq!(report.result_count.diff_errors, 1);
    }

    #[test]
    fn test_nested_types_get_their_own_entries() {
        let mut old_outer = message("Outer", vec![]);
        old_outer.nested_type.push(message("Inner", vec![field("a", 1, Type::Bool)]));
        let mut new_outer = message("Outer", vec![]);
        new_outer.nested_type.push(message("Inner", vec![]));
        new_outer.enum_type.push(EnumDescriptorProto {
            name: Some("Kind".to_string()),
            value: vec![EnumValueDescriptorProto {
                name: Some("KIND_UNSPECIFIED".to_string()),
                number: Some(0),
                ..Default::default()
            }],
            ..Default::default()
        });

        let report = diff(&domain_of(vec![old_outer]), &domain_of(vec![new_outer]), &Scope::Domain).unwrap();
        assert!(report.message_results["test.Outer"].change.is_unchanged());
        let inner = &report.message_results["test.Outer.Inner"];
        assert_eq!(inner.change.change_type, ChangeType::Changed);
        assert_eq!(inner.children[0].change.change_type, ChangeType::Removal);
        assert_eq!(report.enum_results["test.Outer.Kind"].change.change_type, ChangeType::Addition);
    }

    #[test]
    fn test_kind_change_is_removal_plus_addition() {
        let reference = domain_of(vec![message("Thing", vec![])]);
        let candidate = ProtoDomain::builder()
            .add(FileDescriptorProto {
                name: Some("test.proto".to_string()),
                package: Some("test".to_string()),
                enum_type: vec![EnumDescriptorProto {
                    name: Some("Thing".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .build()
            .unwrap();

        let report = diff(&reference, &candidate, &Scope::Domain).unwrap();
        assert_eq!(report.message_results["test.Thing"].change.change_type, ChangeType::Removal);
        assert_eq!(report.enum_results["test.Thing"].change.change_type, ChangeType::Addition);
    }

    #[test]
    fn test_unknown_file_scope_is_not_found() {
        let d = domain_of(vec![]);
        let err = diff(&d, &d, &Scope::File("nope.proto".into())).unwrap_err();
        assert!(err.is_not_found());
    }
}
