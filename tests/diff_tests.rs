//! Diff Tests
//!
//! Entity- and child-level change classification over a small fixture file,
//! plus the profile verdicts that build on it.

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto,
};
use proto_registry::{
    diff, validate, ChangeType, LintConfig, ProfileOptions, Profiles, ProtoDomain, Report, Scope,
};

const FILE_NAME: &str = "package/file1.proto";

fn enum_value(name: &str, number: i32) -> EnumValueDescriptorProto {
    EnumValueDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        ..Default::default()
    }
}

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        r#type: Some(ty as i32),
        label: Some(Label::Optional as i32),
        ..Default::default()
    }
}

fn message(name: &str) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn service(name: &str) -> ServiceDescriptorProto {
    ServiceDescriptorProto {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn base_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(FILE_NAME.to_string()),
        package: Some("package".to_string()),
        message_type: vec![message("Message1")],
        service: vec![service("Service1")],
        enum_type: vec![EnumDescriptorProto {
            name: Some("Enum1".to_string()),
            value: vec![
                enum_value("ENUM_VALUE1_UNSET", 0),
                enum_value("ENUM_VALUE1_VALUE1", 1),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn domain(file: FileDescriptorProto) -> ProtoDomain {
    ProtoDomain::builder().add(file).build().unwrap()
}

fn diff_file(reference: FileDescriptorProto, candidate: FileDescriptorProto) -> Report {
    diff(
        &domain(reference),
        &domain(candidate),
        &Scope::File(FILE_NAME.to_string()),
    )
    .unwrap()
}

// =============================================================================
// Entity level
// =============================================================================

#[test]
fn test_no_diff() {
    let report = diff_file(base_file(), base_file());
    assert!(!report.has_changes());
    assert_eq!(
        report.message_results["package.Message1"].change.change_type,
        ChangeType::Unchanged
    );
    assert_eq!(report.result_count.diff_errors, 0);
}

#[test]
fn test_add_service() {
    let mut candidate = base_file();
    candidate.service.push(service("Service2"));

    let report = diff_file(base_file(), candidate);
    let result = &report.service_results["package.Service2"];
    assert_eq!(result.change.to_name, "package.Service2");
    assert_eq!(result.change.change_type, ChangeType::Addition);
}

#[test]
fn test_remove_service() {
    let mut candidate = base_file();
    candidate.service.clear();

    let report = diff_file(base_file(), candidate);
    let result = &report.service_results["package.Service1"];
    assert_eq!(result.change.from_name, "package.Service1");
    assert_eq!(result.change.change_type, ChangeType::Removal);
    assert_eq!(report.result_count.diff_errors, 1);
}

#[test]
fn test_add_enum() {
    let mut candidate = base_file();
    candidate.enum_type.push(EnumDescriptorProto {
        name: Some("Enum2".to_string()),
        value: vec![enum_value("ENUM_VALUE2_UNSET", 0)],
        ..Default::default()
    });

    let report = diff_file(base_file(), candidate);
    let result = &report.enum_results["package.Enum2"];
    assert_eq!(result.change.to_name, "package.Enum2");
    assert_eq!(result.change.change_type, ChangeType::Addition);
}

#[test]
fn test_remove_enum() {
    let mut candidate = base_file();
    candidate.enum_type.clear();

    let report = diff_file(base_file(), candidate);
    let result = &report.enum_results["package.Enum1"];
    assert_eq!(result.change.from_name, "package.Enum1");
    assert_eq!(result.change.change_type, ChangeType::Removal);
}

#[test]
fn test_add_message() {
    let mut candidate = base_file();
    candidate.message_type.push(message("Message2"));

    let report = diff_file(base_file(), candidate);
    let result = &report.message_results["package.Message2"];
    assert_eq!(result.change.to_name, "package.Message2");
    assert_eq!(result.change.change_type, ChangeType::Addition);
}

#[test]
fn test_remove_message() {
    let mut candidate = base_file();
    candidate.message_type.clear();

    let report = diff_file(base_file(), candidate);
    let result = &report.message_results["package.Message1"];
    assert_eq!(result.change.from_name, "package.Message1");
    assert_eq!(result.change.change_type, ChangeType::Removal);
}

// =============================================================================
// Enum values
// =============================================================================

#[test]
fn test_add_enum_value() {
    let mut candidate = base_file();
    candidate.enum_type[0]
        .value
        .push(enum_value("ENUM_VALUE1_VALUE2", 2));

    let report = diff_file(base_file(), candidate);
    let result = &report.enum_results["package.Enum1"];
    assert_eq!(result.change.change_type, ChangeType::Unchanged);

    let value = &result.children[0];
    assert_eq!(value.change.change_type, ChangeType::Addition);
    assert_eq!(value.number, 2);
    assert_eq!(value.name, "ENUM_VALUE1_VALUE2");
    assert_eq!(value.change.from_name, "");
    assert_eq!(value.change.to_name, "ENUM_VALUE1_VALUE2");
}

#[test]
fn test_remove_enum_value() {
    let mut candidate = base_file();
    candidate.enum_type[0].value.remove(1);

    let report = diff_file(base_file(), candidate);
    let result = &report.enum_results["package.Enum1"];
    assert_eq!(result.change.change_type, ChangeType::Unchanged);

    let value = &result.children[0];
    assert_eq!(value.change.change_type, ChangeType::Removal);
    assert_eq!(value.number, 1);
    assert_eq!(value.name, "ENUM_VALUE1_VALUE1");
    assert_eq!(value.change.from_name, "ENUM_VALUE1_VALUE1");
    assert_eq!(value.change.to_name, "");
    assert_eq!(report.result_count.diff_errors, 1);
}

#[test]
fn test_change_enum_value() {
    let mut candidate = base_file();
    candidate.enum_type[0].value[1].name = Some("FOO".to_string());

    let report = diff_file(base_file(), candidate);
    let result = &report.enum_results["package.Enum1"];
    assert_eq!(result.change.change_type, ChangeType::Unchanged);

    let value = &result.children[0];
    assert_eq!(value.change.change_type, ChangeType::Changed);
    assert_eq!(value.number, 1);
    assert_eq!(value.name, "FOO");
    assert_eq!(value.change.from_name, "ENUM_VALUE1_VALUE1");
    assert_eq!(value.change.to_name, "FOO");
}

// =============================================================================
// Fields and methods
// =============================================================================

#[test]
fn test_field_rename_rolls_up_to_message() {
    let mut reference = base_file();
    reference.message_type[0].field = vec![field("user_id", 1, Type::String)];
    let mut candidate = base_file();
    candidate.message_type[0].field = vec![field("account_id", 1, Type::String)];

    let report = diff_file(reference, candidate);
    let result = &report.message_results["package.Message1"];
    assert_eq!(result.change.change_type, ChangeType::Changed);
    assert_eq!(result.children.len(), 1);
    assert!(result.children[0].change.is_rename());
    assert_eq!(result.children[0].change.from_name, "user_id");
}

#[test]
fn test_method_signature_change() {
    let method = |input: &str| MethodDescriptorProto {
        name: Some("Get".to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(".package.Message1".to_string()),
        ..Default::default()
    };
    let mut reference = base_file();
    reference.service[0].method = vec![method(".package.Message1")];
    let mut candidate = base_file();
    candidate.message_type.push(message("Request"));
    candidate.service[0].method = vec![method(".package.Request")];

    let report = diff_file(reference, candidate);
    let result = &report.service_results["package.Service1"];
    assert_eq!(result.change.change_type, ChangeType::Changed);
    assert_eq!(result.children[0].change.change_type, ChangeType::Changed);
    assert_eq!(
        result.children[0].to.as_ref().map(|m| m.input_type.as_str()),
        Some("package.Request")
    );
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_swapping_sides_swaps_additions_and_removals() {
    let mut candidate = base_file();
    candidate.message_type.push(message("Message2"));
    candidate.enum_type[0].value.remove(1);

    let forward = diff_file(base_file(), candidate.clone());
    let backward = diff_file(candidate, base_file());

    assert_eq!(
        forward.message_results["package.Message2"].change.change_type,
        ChangeType::Addition
    );
    assert_eq!(
        backward.message_results["package.Message2"].change.change_type,
        ChangeType::Removal
    );
    assert_eq!(
        forward.enum_results["package.Enum1"].children[0].change.change_type,
        ChangeType::Removal
    );
    assert_eq!(
        backward.enum_results["package.Enum1"].children[0].change.change_type,
        ChangeType::Addition
    );
}

#[test]
fn test_swapping_sides_reverses_a_rename() {
    let mut reference = base_file();
    reference.message_type[0].field = vec![field("user_id", 1, Type::String)];
    let mut candidate = base_file();
    candidate.message_type[0].field = vec![field("account_id", 1, Type::String)];

    let forward = diff_file(reference.clone(), candidate.clone());
    let backward = diff_file(candidate, reference);

    let there = &forward.message_results["package.Message1"].children[0].change;
    let back = &backward.message_results["package.Message1"].children[0].change;
    assert_eq!(there.change_type, ChangeType::Changed);
    assert_eq!(back.change_type, ChangeType::Changed);
    assert_eq!((there.from_name.as_str(), there.to_name.as_str()), ("user_id", "account_id"));
    assert_eq!((back.from_name.as_str(), back.to_name.as_str()), ("account_id", "user_id"));
}

#[test]
fn test_unknown_file_scope_is_not_found() {
    let err = diff(
        &domain(base_file()),
        &domain(base_file()),
        &Scope::File("package/file2.proto".to_string()),
    )
    .unwrap_err();
    assert!(err.is_not_found());
}

// =============================================================================
// Profiles
// =============================================================================

fn verdict(profile: &str, reference: FileDescriptorProto, candidate: FileDescriptorProto) -> Report {
    let profile = Profiles::new(ProfileOptions::default()).get(profile).unwrap();
    validate(
        &domain(reference),
        &domain(candidate),
        &Scope::Domain,
        profile.as_ref(),
        &LintConfig::default(),
    )
    .unwrap()
}

#[test]
fn test_profiles_disagree_on_int_widening() {
    let mut reference = base_file();
    reference.message_type[0].field = vec![field("count", 1, Type::Int32)];
    let mut candidate = base_file();
    candidate.message_type[0].field = vec![field("count", 1, Type::Int64)];

    let avro = verdict("avro-evolve", reference.clone(), candidate.clone());
    assert!(!avro.has_errors());
    assert_eq!(avro.result_count.diff_warnings, 1);

    let strict = verdict("allow-none", reference, candidate);
    assert!(strict.has_errors());
}

#[test]
fn test_additions_pass_every_lenient_profile() {
    let mut candidate = base_file();
    candidate.message_type.push(message("Message2"));

    for name in ["avro-evolve", "proto-evolve", "allow-add", "allow-all"] {
        let report = verdict(name, base_file(), candidate.clone());
        assert!(!report.has_errors(), "{} rejected an addition", name);
    }
    assert!(verdict("allow-none", base_file(), candidate).has_errors());
}

#[test]
fn test_optional_field_addition_warns_under_avro() {
    let mut candidate = base_file();
    candidate.message_type[0].field = vec![field("note", 1, Type::String)];

    let avro = verdict("avro-evolve", base_file(), candidate.clone());
    assert_eq!(avro.result_count.diff_errors, 0);
    assert_eq!(avro.result_count.diff_warnings, 1);

    let proto = verdict("proto-evolve", base_file(), candidate);
    assert_eq!(proto.result_count.diff_errors, 0);
    assert_eq!(proto.result_count.diff_warnings, 0);
}

#[test]
fn test_field_removal_fails_every_profile() {
    let mut reference = base_file();
    reference.message_type[0].field = vec![field("count", 1, Type::Int32), field("note", 2, Type::String)];
    let mut candidate = base_file();
    candidate.message_type[0].field = vec![field("count", 1, Type::Int32)];

    for name in Profiles::NAMES {
        let report = verdict(name, reference.clone(), candidate.clone());
        assert!(report.result_count.diff_errors >= 1, "{} accepted a field removal", name);
        assert!(report.has_errors(), "{}", name);
    }
}
