use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt};

use crate::classfile::constant_pool::{ConstantPool, ConstantPoolEntry};
use crate::classfile::opcodes;
use crate::descriptor::field_type_names;
use crate::error::MalformedInput;

type Result<T, E = MalformedInput> = std::result::Result<T, E>;

const JAVA_MAGIC: u32 = 0xCAFEBABE;

/// Decoded class file, before its names are inserted into a model.
#[derive(Clone, Debug)]
pub struct RawClass {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    /// Internal (slash separated) name of the class.
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
    /// Length of the class file in bytes.
    pub size: usize,
}

/// Field or method record.
#[derive(Clone, Debug)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    pub fn code(&self) -> Option<&CodeInfo> {
        self.attributes.iter().find_map(|attribute| match attribute {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn code_size(&self) -> u32 {
        self.code().map(|code| code.code_length).unwrap_or(0)
    }

    /// Checked exceptions declared by a method.
    pub fn exceptions(&self) -> &[String] {
        self.attributes
            .iter()
            .find_map(|attribute| match attribute {
                AttributeInfo::Exceptions(names) => Some(names.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

/// Method body summary: its length and the classes its instructions reference.
#[derive(Clone, Debug, Default)]
pub struct CodeInfo {
    pub code_length: u32,
    pub referenced_classes: Vec<String>,
}

/// Annotation type plus the class types found in its element values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Annotation {
    pub type_name: String,
    pub referenced_classes: Vec<String>,
}

/// Entry of the `InnerClasses` attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InnerClass {
    pub inner: String,
    pub outer: Option<String>,
    pub simple_name: Option<String>,
    pub access_flags: u16,
}

/// Attributes the importer understands; everything else is kept as `Other`.
#[derive(Clone, Debug)]
pub enum AttributeInfo {
    Annotations {
        visible: bool,
        annotations: Vec<Annotation>,
    },
    Signature(String),
    InnerClasses(Vec<InnerClass>),
    EnclosingMethod {
        class: String,
        method: Option<(String, String)>,
    },
    Code(CodeInfo),
    Exceptions(Vec<String>),
    Other {
        name: String,
        length: u32,
    },
}

/// Decode one compiled class.
pub fn parse_class(data: &[u8]) -> Result<RawClass> {
    let mut reader = ByteReader::new(data);
    let magic = reader.read_u32()?;
    if magic != JAVA_MAGIC {
        return Err(MalformedInput::BadMagic(magic));
    }
    let minor_version = reader.read_u16()?;
    let major_version = reader.read_u16()?;
    let constant_pool = parse_constant_pool(&mut reader)?;
    let access_flags = reader.read_u16()?;

    let name = constant_pool.class_name(reader.read_u16()?)?.to_string();
    let super_index = reader.read_u16()?;
    let super_name = if super_index == 0 {
        None
    } else {
        Some(constant_pool.class_name(super_index)?.to_string())
    };

    let interface_count = reader.read_u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(constant_pool.class_name(reader.read_u16()?)?.to_string());
    }

    let fields = parse_members(&mut reader, &constant_pool)?;
    let methods = parse_members(&mut reader, &constant_pool)?;
    let attributes = parse_attributes(&mut reader, &constant_pool)?;

    Ok(RawClass {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        name,
        super_name,
        interfaces,
        fields,
        methods,
        attributes,
        size: data.len(),
    })
}

fn parse_constant_pool(reader: &mut ByteReader<'_>) -> Result<ConstantPool> {
    let count = reader.read_u16()?;
    let mut entries = Vec::with_capacity(count as usize);
    let mut index = 1u16;
    while index < count {
        let entry = parse_constant(reader)?;
        let width = entry.width();
        entries.push(entry);
        if width == 2 {
            entries.push(ConstantPoolEntry::Unusable);
        }
        index = index.saturating_add(width);
    }
    Ok(ConstantPool::new(entries))
}

fn parse_constant(reader: &mut ByteReader<'_>) -> Result<ConstantPoolEntry> {
    let tag = reader.read_u8()?;
    let entry = match tag {
        1 => {
            let length = reader.read_u16()? as usize;
            let bytes = reader.read_bytes(length)?;
            ConstantPoolEntry::Utf8(decode_modified_utf8(bytes)?)
        }
        3 => ConstantPoolEntry::Integer(reader.cursor.read_i32::<BigEndian>()?),
        4 => ConstantPoolEntry::Float(reader.cursor.read_f32::<BigEndian>()?),
        5 => ConstantPoolEntry::Long(reader.cursor.read_i64::<BigEndian>()?),
        6 => ConstantPoolEntry::Double(reader.cursor.read_f64::<BigEndian>()?),
        7 => ConstantPoolEntry::Class {
            name_index: reader.read_u16()?,
        },
        8 => ConstantPoolEntry::String {
            utf8_index: reader.read_u16()?,
        },
        9 => ConstantPoolEntry::FieldRef {
            class_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        10 => ConstantPoolEntry::MethodRef {
            class_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        11 => ConstantPoolEntry::InterfaceMethodRef {
            class_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        12 => ConstantPoolEntry::NameAndType {
            name_index: reader.read_u16()?,
            descriptor_index: reader.read_u16()?,
        },
        15 => ConstantPoolEntry::MethodHandle {
            reference_kind: reader.read_u8()?,
            reference_index: reader.read_u16()?,
        },
        16 => ConstantPoolEntry::MethodType {
            descriptor_index: reader.read_u16()?,
        },
        17 => ConstantPoolEntry::Dynamic {
            bootstrap_method_attr_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        18 => ConstantPoolEntry::InvokeDynamic {
            bootstrap_method_attr_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        19 => ConstantPoolEntry::Module {
            name_index: reader.read_u16()?,
        },
        20 => ConstantPoolEntry::Package {
            name_index: reader.read_u16()?,
        },
        _ => return Err(MalformedInput::UnknownTag(tag)),
    };
    Ok(entry)
}

fn parse_members(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<MemberInfo>> {
    let count = reader.read_u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = reader.read_u16()?;
        let name = pool.utf8(reader.read_u16()?)?.to_string();
        let descriptor = pool.utf8(reader.read_u16()?)?.to_string();
        let attributes = parse_attributes(reader, pool)?;
        members.push(MemberInfo {
            access_flags,
            name,
            descriptor,
            attributes,
        });
    }
    Ok(members)
}

fn parse_attributes(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<AttributeInfo>> {
    let count = reader.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = pool.utf8(reader.read_u16()?)?;
        let length = reader.read_u32()?;
        let mut body = ByteReader::new(reader.read_bytes(length as usize)?);
        let attribute = match name {
            "RuntimeVisibleAnnotations" => AttributeInfo::Annotations {
                visible: true,
                annotations: parse_annotations(&mut body, pool)?,
            },
            "RuntimeInvisibleAnnotations" => AttributeInfo::Annotations {
                visible: false,
                annotations: parse_annotations(&mut body, pool)?,
            },
            "RuntimeVisibleParameterAnnotations" => AttributeInfo::Annotations {
                visible: true,
                annotations: parse_parameter_annotations(&mut body, pool)?,
            },
            "RuntimeInvisibleParameterAnnotations" => AttributeInfo::Annotations {
                visible: false,
                annotations: parse_parameter_annotations(&mut body, pool)?,
            },
            "Signature" => AttributeInfo::Signature(pool.utf8(body.read_u16()?)?.to_string()),
            "InnerClasses" => AttributeInfo::InnerClasses(parse_inner_classes(&mut body, pool)?),
            "EnclosingMethod" => {
                let class = pool.class_name(body.read_u16()?)?.to_string();
                let method_index = body.read_u16()?;
                let method = if method_index == 0 {
                    None
                } else {
                    let (name, descriptor) = pool.name_and_type(method_index)?;
                    Some((name.to_string(), descriptor.to_string()))
                };
                AttributeInfo::EnclosingMethod { class, method }
            }
            "Code" => AttributeInfo::Code(parse_code(&mut body, pool)?),
            "Exceptions" => {
                let count = body.read_u16()?;
                let mut names = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    names.push(pool.class_name(body.read_u16()?)?.to_string());
                }
                AttributeInfo::Exceptions(names)
            }
            _ => AttributeInfo::Other {
                name: name.to_string(),
                length,
            },
        };
        attributes.push(attribute);
    }
    Ok(attributes)
}

fn parse_code(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<CodeInfo> {
    let _max_stack = reader.read_u16()?;
    let _max_locals = reader.read_u16()?;
    let code_length = reader.read_u32()?;
    let code = reader.read_bytes(code_length as usize)?;
    let mut referenced_classes = opcodes::referenced_classes(code, pool)?;

    let handler_count = reader.read_u16()?;
    for _ in 0..handler_count {
        reader.read_bytes(6)?;
        let catch_type = reader.read_u16()?;
        if catch_type != 0 {
            referenced_classes.push(pool.class_name(catch_type)?.to_string());
        }
    }
    // Nested attributes (line numbers, local variables, stack maps) carry no
    // dependencies beyond what the constant pool already lists.
    parse_attributes(reader, pool)?;

    Ok(CodeInfo {
        code_length,
        referenced_classes,
    })
}

fn parse_parameter_annotations(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Annotation>> {
    let parameters = reader.read_u8()?;
    let mut annotations = Vec::new();
    for _ in 0..parameters {
        annotations.extend(parse_annotations(reader, pool)?);
    }
    Ok(annotations)
}

fn parse_annotations(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<Annotation>> {
    let count = reader.read_u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(parse_annotation(reader, pool)?);
    }
    Ok(annotations)
}

fn parse_annotation(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Annotation> {
    let descriptor = pool.utf8(reader.read_u16()?)?;
    let type_name = field_type_names(descriptor)?
        .into_iter()
        .next()
        .ok_or_else(|| MalformedInput::InvalidDescriptor(descriptor.to_string()))?;
    let mut referenced_classes = Vec::new();
    let pairs = reader.read_u16()?;
    for _ in 0..pairs {
        let _element_name = reader.read_u16()?;
        parse_element_value(reader, pool, &mut referenced_classes)?;
    }
    Ok(Annotation {
        type_name,
        referenced_classes,
    })
}

fn parse_element_value(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
    referenced: &mut Vec<String>,
) -> Result<()> {
    let tag = reader.read_u8()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => {
            reader.read_u16()?;
        }
        b'e' => {
            let type_descriptor = pool.utf8(reader.read_u16()?)?;
            referenced.extend(field_type_names(type_descriptor)?);
            reader.read_u16()?;
        }
        b'c' => {
            let class_descriptor = pool.utf8(reader.read_u16()?)?;
            referenced.extend(field_type_names(class_descriptor)?);
        }
        b'@' => {
            let nested = parse_annotation(reader, pool)?;
            referenced.push(nested.type_name);
            referenced.extend(nested.referenced_classes);
        }
        b'[' => {
            let count = reader.read_u16()?;
            for _ in 0..count {
                parse_element_value(reader, pool, referenced)?;
            }
        }
        _ => {
            return Err(MalformedInput::InvalidAttribute {
                attribute: "annotation",
                reason: format!("unknown element value tag {tag}"),
            });
        }
    }
    Ok(())
}

fn parse_inner_classes(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<InnerClass>> {
    let count = reader.read_u16()?;
    let mut classes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let inner = pool.class_name(reader.read_u16()?)?.to_string();
        let outer_index = reader.read_u16()?;
        let outer = if outer_index == 0 {
            None
        } else {
            Some(pool.class_name(outer_index)?.to_string())
        };
        let name_index = reader.read_u16()?;
        let simple_name = if name_index == 0 {
            None
        } else {
            Some(pool.utf8(name_index)?.to_string())
        };
        let access_flags = reader.read_u16()?;
        classes.push(InnerClass {
            inner,
            outer,
            simple_name,
            access_flags,
        });
    }
    Ok(classes)
}

/// Big-endian reader over a borrowed byte slice.
struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

/// Decode the JVM's modified UTF-8: `C0 80` for NUL and surrogate pairs
/// instead of four-byte sequences.
fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    if bytes.is_ascii() && !bytes.contains(&0) {
        return Ok(bytes.iter().map(|byte| *byte as char).collect());
    }
    let invalid = || MalformedInput::InvalidUtf8(bytes.to_vec());
    let continuation = |index: usize| match bytes.get(index) {
        Some(byte) if byte & 0xc0 == 0x80 => Ok((byte & 0x3f) as u16),
        _ => Err(invalid()),
    };
    let mut units = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let lead = bytes[index];
        match lead {
            0x01..=0x7f => {
                units.push(lead as u16);
                index += 1;
            }
            0xc0..=0xdf => {
                units.push(((lead & 0x1f) as u16) << 6 | continuation(index + 1)?);
                index += 2;
            }
            0xe0..=0xef => {
                units.push(
                    ((lead & 0x0f) as u16) << 12
                        | continuation(index + 1)? << 6
                        | continuation(index + 2)?,
                );
                index += 3;
            }
            _ => return Err(invalid()),
        }
    }
    String::from_utf16(&units).map_err(|_| invalid())
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.cursor.read_u8()?)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }
}
