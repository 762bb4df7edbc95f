use crate::classfile::constant_pool::{ConstantPool, ConstantPoolEntry};
use crate::descriptor::{class_constant_name, field_type_names, method_type_names};
use crate::error::MalformedInput;

type Result<T, E = MalformedInput> = std::result::Result<T, E>;

pub(crate) const LDC: u8 = 0x12;
pub(crate) const LDC_W: u8 = 0x13;
pub(crate) const LDC2_W: u8 = 0x14;
pub(crate) const IINC: u8 = 0x84;
pub(crate) const GOTO: u8 = 0xa7;
pub(crate) const JSR: u8 = 0xa8;
pub(crate) const TABLESWITCH: u8 = 0xaa;
pub(crate) const LOOKUPSWITCH: u8 = 0xab;
pub(crate) const GETSTATIC: u8 = 0xb2;
pub(crate) const PUTSTATIC: u8 = 0xb3;
pub(crate) const GETFIELD: u8 = 0xb4;
pub(crate) const PUTFIELD: u8 = 0xb5;
pub(crate) const INVOKEVIRTUAL: u8 = 0xb6;
pub(crate) const INVOKESPECIAL: u8 = 0xb7;
pub(crate) const INVOKESTATIC: u8 = 0xb8;
pub(crate) const INVOKEINTERFACE: u8 = 0xb9;
pub(crate) const INVOKEDYNAMIC: u8 = 0xba;
pub(crate) const NEW: u8 = 0xbb;
pub(crate) const ANEWARRAY: u8 = 0xbd;
pub(crate) const CHECKCAST: u8 = 0xc0;
pub(crate) const INSTANCEOF: u8 = 0xc1;
pub(crate) const WIDE: u8 = 0xc4;
pub(crate) const MULTIANEWARRAY: u8 = 0xc5;
pub(crate) const GOTO_W: u8 = 0xc8;
pub(crate) const JSR_W: u8 = 0xc9;

/// Walk a method body and collect the internal names of every class its
/// constant-pool operands refer to.
pub(crate) fn referenced_classes(code: &[u8], pool: &ConstantPool) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            return Err(MalformedInput::InvalidBytecode(format!(
                "invalid instruction length at offset {offset}"
            )));
        }
        match opcode {
            LDC => {
                let index = code[offset + 1] as u16;
                push_loadable(pool, index, &mut names)?;
            }
            LDC_W | LDC2_W => push_loadable(pool, read_u16(code, offset + 1)?, &mut names)?,
            GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
                let member = pool.member_ref(read_u16(code, offset + 1)?)?;
                push_class(member.owner, &mut names);
                names.extend(field_type_names(member.descriptor)?);
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                let member = pool.member_ref(read_u16(code, offset + 1)?)?;
                push_class(member.owner, &mut names);
                names.extend(method_type_names(member.descriptor)?);
            }
            INVOKEDYNAMIC => {
                let index = read_u16(code, offset + 1)?;
                match pool.get(index)? {
                    ConstantPoolEntry::InvokeDynamic {
                        name_and_type_index,
                        ..
                    } => {
                        let (_, descriptor) = pool.name_and_type(*name_and_type_index)?;
                        names.extend(method_type_names(descriptor)?);
                    }
                    _ => {
                        return Err(MalformedInput::UnexpectedEntry {
                            index,
                            expected: "InvokeDynamic",
                        });
                    }
                }
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF | MULTIANEWARRAY => {
                let name = pool.class_name(read_u16(code, offset + 1)?)?;
                push_class(name, &mut names);
            }
            _ => {}
        }
        offset += length;
    }
    Ok(names)
}

fn push_class(raw: &str, names: &mut Vec<String>) {
    if let Some(name) = class_constant_name(raw) {
        names.push(name.to_string());
    }
}

fn push_loadable(pool: &ConstantPool, index: u16, names: &mut Vec<String>) -> Result<()> {
    match pool.get(index)? {
        ConstantPoolEntry::Class { .. } => push_class(pool.class_name(index)?, names),
        ConstantPoolEntry::MethodType { descriptor_index } => {
            names.extend(method_type_names(pool.utf8(*descriptor_index)?)?);
        }
        ConstantPoolEntry::MethodHandle {
            reference_index, ..
        } => {
            let member = pool.member_ref(*reference_index)?;
            push_class(member.owner, names);
        }
        ConstantPoolEntry::Dynamic {
            name_and_type_index,
            ..
        } => {
            let (_, descriptor) = pool.name_and_type(*name_and_type_index)?;
            names.extend(field_type_names(descriptor)?);
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        LDC => 2,
        LDC_W | LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        GOTO | JSR => 3,
        0xa9 => 2,
        TABLESWITCH => tableswitch_length(code, offset)?,
        LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        GETSTATIC..=PUTFIELD => 3,
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        NEW => 3,
        0xbc => 2,
        ANEWARRAY => 3,
        0xbe | 0xbf => 1,
        CHECKCAST | INSTANCEOF => 3,
        0xc2 | 0xc3 => 1,
        WIDE => wide_length(code, offset)?,
        MULTIANEWARRAY => 4,
        0xc6 | 0xc7 => 3,
        GOTO_W | JSR_W => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => {
            return Err(MalformedInput::InvalidBytecode(format!(
                "unsupported opcode 0x{opcode:02x}"
            )));
        }
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .filter(|count| *count >= 0)
        .ok_or_else(|| MalformedInput::InvalidBytecode("invalid tableswitch range".to_string()))?;
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        return Err(MalformedInput::InvalidBytecode(
            "invalid lookupswitch pairs".to_string(),
        ));
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .ok_or_else(|| MalformedInput::InvalidBytecode("missing wide opcode".to_string()))?;
    if opcode == IINC { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .ok_or_else(|| MalformedInput::InvalidBytecode("operand out of bounds".to_string()))?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .ok_or_else(|| MalformedInput::InvalidBytecode("operand out of bounds".to_string()))?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
