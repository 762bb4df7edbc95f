use std::collections::BTreeSet;

use crate::classfile::{
    AttributeInfo, ConstantPoolEntry, MemberInfo, RawClass, parse_class, signature,
};
use crate::descriptor::{class_constant_name, field_type_names, method_type_names, to_binary_name};
use crate::error::{MalformedInput, Result};
use crate::model::{ClassDefinition, ClassId, Model};

/// Parse `data` and insert the class into `model`.
///
/// The class is fully decoded before the model is touched, so a malformed
/// stream leaves the model unchanged.
pub fn import_class(model: &mut Model, data: &[u8], location: &str) -> Result<ClassId> {
    let raw = parse_class(data).map_err(|err| err.at(location))?;
    let definition = class_definition(&raw).map_err(|err| err.at(location))?;
    model.define_class(&definition)
}

/// Collect every class name a decoded class refers to.
pub fn class_definition(raw: &RawClass) -> Result<ClassDefinition, MalformedInput> {
    let mut collector = UseCollector::default();

    for (index, entry) in raw.constant_pool.iter() {
        if matches!(entry, ConstantPoolEntry::Class { .. }) {
            collector.class_constant(raw.constant_pool.class_name(index)?);
        }
    }
    if let Some(super_name) = &raw.super_name {
        collector.class_constant(super_name);
    }
    for interface in &raw.interfaces {
        collector.class_constant(interface);
    }
    for field in &raw.fields {
        collector.extend(field_type_names(&field.descriptor)?);
        collector.member_attributes(field)?;
    }
    for method in &raw.methods {
        collector.extend(method_type_names(&method.descriptor)?);
        collector.member_attributes(method)?;
    }
    let mut annotations = BTreeSet::new();
    for attribute in &raw.attributes {
        if let AttributeInfo::Annotations {
            annotations: declared,
            ..
        } = attribute
        {
            annotations.extend(declared.iter().map(|annotation| to_binary_name(&annotation.type_name)));
        }
        collector.attribute(attribute)?;
    }

    let name = to_binary_name(&raw.name);
    let mut uses: BTreeSet<String> = collector
        .names
        .iter()
        .map(|internal| to_binary_name(internal))
        .collect();
    uses.remove(&name);

    Ok(ClassDefinition {
        outer: outer_class(raw).map(|outer| to_binary_name(&outer)),
        name,
        size: raw.size,
        code_size: raw.methods.iter().map(|method| method.code_size() as u64).sum(),
        annotations,
        uses,
    })
}

fn outer_class(raw: &RawClass) -> Option<String> {
    let declared = raw.attributes.iter().find_map(|attribute| match attribute {
        AttributeInfo::InnerClasses(classes) => classes
            .iter()
            .find(|inner| inner.inner == raw.name)
            .and_then(|inner| inner.outer.clone()),
        _ => None,
    });
    declared.or_else(|| {
        raw.attributes.iter().find_map(|attribute| match attribute {
            AttributeInfo::EnclosingMethod { class, .. } => Some(class.clone()),
            _ => None,
        })
    })
}

#[derive(Default)]
struct UseCollector {
    names: BTreeSet<String>,
}

impl UseCollector {
    fn class_constant(&mut self, raw: &str) {
        if let Some(name) = class_constant_name(raw) {
            self.names.insert(name.to_string());
        }
    }

    fn extend(&mut self, names: impl IntoIterator<Item = String>) {
        self.names.extend(names);
    }

    fn member_attributes(&mut self, member: &MemberInfo) -> Result<(), MalformedInput> {
        for attribute in &member.attributes {
            self.attribute(attribute)?;
        }
        Ok(())
    }

    fn attribute(&mut self, attribute: &AttributeInfo) -> Result<(), MalformedInput> {
        match attribute {
            AttributeInfo::Annotations { annotations, .. } => {
                for annotation in annotations {
                    self.names.insert(annotation.type_name.clone());
                    self.extend(annotation.referenced_classes.iter().cloned());
                }
            }
            AttributeInfo::Signature(value) => self.extend(signature::referenced_types(value)?),
            AttributeInfo::InnerClasses(classes) => {
                for inner in classes {
                    self.class_constant(&inner.inner);
                    if let Some(outer) = &inner.outer {
                        self.class_constant(outer);
                    }
                }
            }
            AttributeInfo::EnclosingMethod { class, method } => {
                self.class_constant(class);
                if let Some((_, descriptor)) = method {
                    self.extend(method_type_names(descriptor)?);
                }
            }
            AttributeInfo::Code(code) => self.extend(code.referenced_classes.iter().cloned()),
            AttributeInfo::Exceptions(names) => self.extend(names.iter().cloned()),
            AttributeInfo::Other { .. } => {}
        }
        Ok(())
    }
}
