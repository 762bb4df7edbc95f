//! Binary class file decoding.

pub mod constant_pool;
pub(crate) mod opcodes;
pub mod reader;
pub mod signature;

pub use constant_pool::{ConstantPool, ConstantPoolEntry, MemberRef};
pub use reader::{parse_class, Annotation, AttributeInfo, CodeInfo, InnerClass, MemberInfo, RawClass};
