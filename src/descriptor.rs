use std::str::FromStr;

use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::classfile::signature;
use crate::error::MalformedInput;

/// Internal names of the class types used by a JVM method descriptor.
pub fn method_type_names(descriptor: &str) -> Result<Vec<String>, MalformedInput> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .map_err(|_| MalformedInput::InvalidDescriptor(descriptor.to_string()))?;
    let mut names = Vec::new();
    for parameter in parsed.parameter_types() {
        push_object_type(parameter, &mut names);
    }
    push_object_type(parsed.return_type(), &mut names);
    Ok(names)
}

/// Internal names of the class types used by a field descriptor.
pub fn field_type_names(descriptor: &str) -> Result<Vec<String>, MalformedInput> {
    signature::referenced_types(descriptor)
}

fn push_object_type(ty: &TypeDescriptor, names: &mut Vec<String>) {
    match ty {
        TypeDescriptor::Object(class) => names.push(class.to_string()),
        TypeDescriptor::Array(inner, _) => push_object_type(inner.as_ref(), names),
        _ => {}
    }
}

/// Element class of a `Class` constant, which may name an array type.
pub fn class_constant_name(raw: &str) -> Option<&str> {
    if !raw.starts_with('[') {
        return Some(raw);
    }
    raw.trim_start_matches('[')
        .strip_prefix('L')
        .and_then(|name| name.strip_suffix(';'))
}

/// Convert an internal (slash separated) class name into its dotted form.
pub fn to_binary_name(internal: &str) -> String {
    internal.replace('/', ".")
}
