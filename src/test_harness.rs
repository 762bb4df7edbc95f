use std::fs;
use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;

use crate::dependency::Policy;
use crate::engine::{Engine, EngineOutput, build_context};
use crate::model::{ClassDefinition, Model};
use crate::scan::ScanFailure;

const MAX_STACK: u16 = 4;
const MAX_LOCALS: u16 = 4;

/// Minimal class file writer for tests.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    next_index: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<MemberSpec>,
    methods: Vec<MemberSpec>,
    annotations: Vec<AnnotationSpec>,
    attributes: Vec<(u16, Vec<u8>)>,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self::root(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    /// Class without a superclass, like `java/lang/Object`.
    pub(crate) fn root(class_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            next_index: 1,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
            attributes: Vec::new(),
        };
        builder.this_class = builder.add_class(class_name);
        builder
    }

    fn push(&mut self, entry: CpEntry) -> u16 {
        let index = self.next_index;
        self.next_index += entry.width();
        self.cp.push(entry);
        index
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.push(CpEntry::Utf8(value.to_string()))
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.push(CpEntry::Class(name_index))
    }

    pub(crate) fn add_long(&mut self, value: i64) -> u16 {
        self.push(CpEntry::Long(value))
    }

    pub(crate) fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::NameAndType(name_index, descriptor_index))
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::MethodRef(class_index, name_and_type))
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::FieldRef(class_index, name_and_type))
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.add_class(name);
        self.interfaces.push(index);
    }

    pub(crate) fn add_field(&mut self, name: &str, descriptor: &str) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(MemberSpec {
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
    }

    pub(crate) fn add_method(&mut self, name: &str, descriptor: &str, code: Vec<u8>) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let code_index = self.add_utf8("Code");
        let mut body = Vec::new();
        write_u16(&mut body, MAX_STACK);
        write_u16(&mut body, MAX_LOCALS);
        write_u32(&mut body, code.len() as u32);
        body.extend_from_slice(&code);
        write_u16(&mut body, 0);
        write_u16(&mut body, 0);
        self.methods.push(MemberSpec {
            name_index,
            descriptor_index,
            attributes: vec![(code_index, body)],
        });
    }

    /// Abstract method declaring checked exceptions.
    pub(crate) fn add_abstract_method(&mut self, name: &str, descriptor: &str, throws: &[&str]) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let exceptions_index = self.add_utf8("Exceptions");
        let mut body = Vec::new();
        write_u16(&mut body, throws.len() as u16);
        for exception in throws {
            let index = self.add_class(exception);
            write_u16(&mut body, index);
        }
        self.methods.push(MemberSpec {
            name_index,
            descriptor_index,
            attributes: vec![(exceptions_index, body)],
        });
    }

    pub(crate) fn add_class_annotation(&mut self, descriptor: &str) {
        let type_index = self.add_utf8(descriptor);
        self.annotations.push(AnnotationSpec {
            type_index,
            class_values: Vec::new(),
        });
    }

    /// Annotation with a single `Class<?>` valued element.
    pub(crate) fn add_class_annotation_with_class_value(
        &mut self,
        descriptor: &str,
        element: &str,
        class_descriptor: &str,
    ) {
        let type_index = self.add_utf8(descriptor);
        let element_index = self.add_utf8(element);
        let value_index = self.add_utf8(class_descriptor);
        self.annotations.push(AnnotationSpec {
            type_index,
            class_values: vec![(element_index, value_index)],
        });
    }

    pub(crate) fn add_signature(&mut self, signature: &str) {
        let name_index = self.add_utf8("Signature");
        let value_index = self.add_utf8(signature);
        self.attributes
            .push((name_index, value_index.to_be_bytes().to_vec()));
    }

    pub(crate) fn add_inner_class(&mut self, inner: &str, outer: &str, simple_name: &str) {
        let name_index = self.add_utf8("InnerClasses");
        let inner_index = self.add_class(inner);
        let outer_index = self.add_class(outer);
        let simple_index = self.add_utf8(simple_name);
        let mut body = Vec::new();
        write_u16(&mut body, 1);
        write_u16(&mut body, inner_index);
        write_u16(&mut body, outer_index);
        write_u16(&mut body, simple_index);
        write_u16(&mut body, 0x0009);
        self.attributes.push((name_index, body));
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if !self.annotations.is_empty() {
            let name_index = self.add_utf8("RuntimeVisibleAnnotations");
            let mut body = Vec::new();
            write_u16(&mut body, self.annotations.len() as u16);
            for annotation in &self.annotations {
                write_u16(&mut body, annotation.type_index);
                write_u16(&mut body, annotation.class_values.len() as u16);
                for (element_index, value_index) in &annotation.class_values {
                    write_u16(&mut body, *element_index);
                    body.push(b'c');
                    write_u16(&mut body, *value_index);
                }
            }
            self.attributes.push((name_index, body));
        }

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, self.next_index);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, 0x0021);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        write_members(&mut bytes, &self.fields);
        write_members(&mut bytes, &self.methods);
        write_attributes(&mut bytes, &self.attributes);
        bytes
    }
}

/// Class that references `targets` from a single method body.
pub(crate) fn class_using(name: &str, targets: &[&str]) -> Vec<u8> {
    let mut builder = ClassFileBuilder::new(name, "java/lang/Object");
    let mut code = Vec::new();
    for target in targets {
        let index = builder.add_class(target);
        code.extend_from_slice(&[0xbb, high(index), low(index), 0x57]);
    }
    code.push(0xb1);
    builder.add_method("run", "()V", code);
    builder.finish()
}

/// Write `(entry name, bytes)` pairs into a stored zip archive.
pub(crate) fn write_archive(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let file = fs::File::create(path).expect("create archive");
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(data).expect("write entry");
    }
    writer.finish().expect("finish archive");
}

/// Build an in-memory zip archive, e.g. for nesting inside another archive.
pub(crate) fn archive_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(data).expect("write entry");
    }
    writer.finish().expect("finish archive").into_inner()
}

/// Model of defined classes given as `(binary name, used class names)`.
pub(crate) fn model_of(classes: &[(&str, &[&str])]) -> Model {
    let mut model = Model::new();
    for (name, uses) in classes {
        model
            .define_class(&ClassDefinition {
                name: name.to_string(),
                size: 1,
                uses: uses.iter().map(|target| target.to_string()).collect(),
                ..ClassDefinition::default()
            })
            .expect("define class");
    }
    model
}

/// Run every check over `model` under `policy`.
pub(crate) fn analyze(model: Model, policy: &Policy, failures: Vec<ScanFailure>) -> EngineOutput {
    let context = build_context(&model, policy, failures, None).expect("evaluate policy");
    Engine::new().analyze(&context).expect("run checks")
}

/// Messages of the results reported by `check_id`.
pub(crate) fn messages(output: &EngineOutput, check_id: &str) -> Vec<String> {
    output
        .results
        .iter()
        .filter(|result| result.rule_id.as_deref() == Some(check_id))
        .filter_map(|result| result.message.text.clone())
        .collect()
}

struct MemberSpec {
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<(u16, Vec<u8>)>,
}

struct AnnotationSpec {
    type_index: u16,
    class_values: Vec<(u16, u16)>,
}

enum CpEntry {
    Utf8(String),
    Long(i64),
    Class(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
}

impl CpEntry {
    fn width(&self) -> u16 {
        match self {
            CpEntry::Long(_) => 2,
            _ => 1,
        }
    }

    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Long(value) => {
                bytes.push(5);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_members(bytes: &mut Vec<u8>, members: &[MemberSpec]) {
    write_u16(bytes, members.len() as u16);
    for member in members {
        write_u16(bytes, 0x0001);
        write_u16(bytes, member.name_index);
        write_u16(bytes, member.descriptor_index);
        write_attributes(bytes, &member.attributes);
    }
}

fn write_attributes(bytes: &mut Vec<u8>, attributes: &[(u16, Vec<u8>)]) {
    write_u16(bytes, attributes.len() as u16);
    for (name_index, body) in attributes {
        write_u16(bytes, *name_index);
        write_u32(bytes, body.len() as u32);
        bytes.extend_from_slice(body);
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}
