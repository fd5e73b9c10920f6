/* The "cpc" class-pool container: a flat binary encoding of an ordered   */
/* list of class definitions plus the opcode profile they were built for. */

use crate::container::error::ContainerError;
use crate::container::opcodes::OpcodeProfile;
use crate::container::{
    read_u1, read_u2, read_u4, read_u8v, read_uleb128, read_x, write_u1, write_u2, write_u4,
    write_u8v, write_uleb128, write_x,
};
use crate::types::{ClassDef, Instruction, MethodDef, MethodSignature, ObjectIdentifier, PatcherError};
use cesu8::{from_java_cesu8, to_java_cesu8};
use log::{debug, warn};
use std::fs;
use std::path::Path;

/* Constants */
pub const CONTAINER_MAGIC: [u8; 8] = [0x63, 0x70, 0x63, 0x0a, 0x30, 0x30, 0x31, 0x00]; // "cpc\n001\0"
pub const ENDIAN_CONSTANT: u32 = 0x12345678;

/* Instruction operand presence flags */
const INSN_HAS_LITERAL: u8 = 0x1;
const INSN_HAS_STRING: u8 = 0x2;
const INSN_HAS_TYPE: u8 = 0x4;

fn demote(e: PatcherError) -> ContainerError {
    match e {
        PatcherError::Container(c) => c,
        other => ContainerError::new(&other.to_string()),
    }
}

/* Strings are stored as MUTF-8 (java cesu8), null-terminated, with a */
/* leading uleb128 byte length as a skip hint.                        */
fn read_string(bytes: &[u8], ix: &mut usize) -> Result<String, ContainerError> {
    let byte_len = read_uleb128(bytes, ix)? as usize;
    let v = read_x(bytes, ix, byte_len)?;
    let terminator = read_u1(bytes, ix)?;
    if terminator != 0 {
        fail!("missing string terminator at index {}", *ix);
    }
    match from_java_cesu8(v.as_slice()) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => Err(ContainerError::new("string failed MUTF-8 conversion")),
    }
}

fn write_string(buffer: &mut Vec<u8>, s: &str) -> usize {
    let encoded = to_java_cesu8(s).to_vec();
    let mut c = 0;
    c += write_uleb128(buffer, encoded.len() as u32);
    c += write_x(buffer, encoded.as_slice());
    c += write_u1(buffer, 0);
    c
}

/// A decoded container: the ordered class list and the opcode profile it
/// was serialized against.
///
/// # Examples
///
/// ```
/// use dexpatch::container::codec::ClassContainer;
/// use dexpatch::types::{ClassDef, ObjectIdentifier, ACC_PUBLIC};
///
/// let mut container = ClassContainer::new(30);
/// container.classes.push(ClassDef::new(ObjectIdentifier::from_java_type("com.a.A"), ACC_PUBLIC));
/// let bytes = container.to_bytes().unwrap();
/// let reloaded = ClassContainer::from_bytes(&bytes).unwrap();
/// assert_eq!(reloaded.classes.len(), 1);
/// ```
#[derive(Debug)]
pub struct ClassContainer {
    pub profile: OpcodeProfile,
    pub classes: Vec<ClassDef>,
}

impl ClassContainer {
    pub fn new(api_level: i32) -> ClassContainer {
        ClassContainer {
            profile: OpcodeProfile::new(api_level),
            classes: vec![],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ClassContainer, ContainerError> {
        let mut ix = 0;
        let magic = read_x(bytes, &mut ix, 8)?;
        if magic != CONTAINER_MAGIC {
            fail!("bad container magic: {:02x?}", magic);
        }
        let endian = read_u4(bytes, &mut ix)?;
        if endian != ENDIAN_CONSTANT {
            fail!("unsupported endian tag: {:#x}", endian);
        }
        let api_level = read_u4(bytes, &mut ix)? as i32;
        let profile = OpcodeProfile::new(api_level);

        let class_count = read_uleb128(bytes, &mut ix)?;
        let mut classes = Vec::with_capacity(class_count as usize);
        for _ in 0..class_count {
            classes.push(Self::read_class(bytes, &mut ix, &profile)?);
        }

        debug!("loaded container: {} classes, api {}", classes.len(), api_level);
        Ok(ClassContainer { profile, classes })
    }

    pub fn from_file(path: &Path) -> Result<ClassContainer, ContainerError> {
        match fs::read(path) {
            Ok(bytes) => ClassContainer::from_bytes(&bytes),
            Err(e) => Err(ContainerError::new(&format!(
                "error loading container {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ContainerError> {
        let mut buffer = vec![];
        write_x(&mut buffer, &CONTAINER_MAGIC);
        write_u4(&mut buffer, ENDIAN_CONSTANT);
        write_u4(&mut buffer, self.profile.api_level as u32);
        write_uleb128(&mut buffer, self.classes.len() as u32);
        for class in &self.classes {
            Self::write_class(&mut buffer, class, &self.profile)?;
        }
        Ok(buffer)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), ContainerError> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)
            .map_err(|e| ContainerError::new(&format!("error writing {}: {}", path.display(), e)))
    }

    fn read_class(
        bytes: &[u8],
        ix: &mut usize,
        profile: &OpcodeProfile,
    ) -> Result<ClassDef, ContainerError> {
        let name_desc = read_string(bytes, ix)?;
        let name = ObjectIdentifier::from_jni_type(&name_desc).map_err(demote)?;
        let access_flags = read_u4(bytes, ix)?;
        let super_desc = read_string(bytes, ix)?;
        let super_class = ObjectIdentifier::from_jni_type(&super_desc).map_err(demote)?;

        let iface_count = read_uleb128(bytes, ix)?;
        let mut interfaces = Vec::with_capacity(iface_count as usize);
        for _ in 0..iface_count {
            let desc = read_string(bytes, ix)?;
            interfaces.push(ObjectIdentifier::from_jni_type(&desc).map_err(demote)?);
        }

        let method_count = read_uleb128(bytes, ix)?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Self::read_method(bytes, ix, profile, &name_desc)?);
        }

        Ok(ClassDef { name, access_flags, super_class, interfaces, methods })
    }

    fn read_method(
        bytes: &[u8],
        ix: &mut usize,
        profile: &OpcodeProfile,
        class_desc: &str,
    ) -> Result<MethodDef, ContainerError> {
        let name = read_string(bytes, ix)?;
        let descriptor = read_string(bytes, ix)?;
        let signature = MethodSignature::from_jni(&descriptor).map_err(demote)?;
        let access_flags = read_u4(bytes, ix)?;
        let registers = read_u2(bytes, ix)?;

        let insn_count = read_uleb128(bytes, ix)?;
        let mut code = Vec::with_capacity(insn_count as usize);
        for _ in 0..insn_count {
            let insn = Self::read_instruction(bytes, ix)?;
            if !profile.supports(insn.opcode) {
                // Tolerated on read so newer containers still load; writes are strict.
                warn!(
                    "unknown opcode {:#04x} in {}->{} under api {}",
                    insn.opcode, class_desc, name, profile.api_level
                );
            }
            code.push(insn);
        }

        Ok(MethodDef { name, signature, access_flags, registers, code })
    }

    fn read_instruction(bytes: &[u8], ix: &mut usize) -> Result<Instruction, ContainerError> {
        let opcode = read_u2(bytes, ix)?;
        let reg_count = read_u1(bytes, ix)?;
        let mut registers = Vec::with_capacity(reg_count as usize);
        for _ in 0..reg_count {
            registers.push(read_u2(bytes, ix)?);
        }
        let presence = read_u1(bytes, ix)?;
        let literal = if presence & INSN_HAS_LITERAL != 0 {
            Some(read_u8v(bytes, ix)? as i64)
        } else {
            None
        };
        let string_ref = if presence & INSN_HAS_STRING != 0 {
            Some(read_string(bytes, ix)?)
        } else {
            None
        };
        let type_ref = if presence & INSN_HAS_TYPE != 0 {
            Some(read_string(bytes, ix)?)
        } else {
            None
        };
        Ok(Instruction { opcode, registers, literal, string_ref, type_ref })
    }

    fn write_class(
        buffer: &mut Vec<u8>,
        class: &ClassDef,
        profile: &OpcodeProfile,
    ) -> Result<usize, ContainerError> {
        let mut c = 0;
        c += write_string(buffer, &class.name.as_jni_type());
        c += write_u4(buffer, class.access_flags);
        c += write_string(buffer, &class.super_class.as_jni_type());
        c += write_uleb128(buffer, class.interfaces.len() as u32);
        for iface in &class.interfaces {
            c += write_string(buffer, &iface.as_jni_type());
        }
        c += write_uleb128(buffer, class.methods.len() as u32);
        for method in &class.methods {
            c += Self::write_method(buffer, method, profile, &class.name.as_jni_type())?;
        }
        Ok(c)
    }

    fn write_method(
        buffer: &mut Vec<u8>,
        method: &MethodDef,
        profile: &OpcodeProfile,
        class_desc: &str,
    ) -> Result<usize, ContainerError> {
        let mut c = 0;
        c += write_string(buffer, &method.name);
        c += write_string(buffer, &method.signature.to_jni());
        c += write_u4(buffer, method.access_flags);
        c += write_u2(buffer, method.registers);
        c += write_uleb128(buffer, method.code.len() as u32);
        for insn in &method.code {
            if !profile.supports(insn.opcode) {
                fail!(
                    ("opcode {:#04x} not valid under api {}", insn.opcode, profile.api_level),
                    ("method {}->{}", class_desc, method.name)
                );
            }
            c += Self::write_instruction(buffer, insn, class_desc, &method.name)?;
        }
        Ok(c)
    }

    fn write_instruction(
        buffer: &mut Vec<u8>,
        insn: &Instruction,
        class_desc: &str,
        method_name: &str,
    ) -> Result<usize, ContainerError> {
        if insn.registers.len() > u8::MAX as usize {
            fail!(
                ("instruction {:#04x} uses {} registers, limit is {}", insn.opcode, insn.registers.len(), u8::MAX),
                ("method {}->{}", class_desc, method_name)
            );
        }
        let mut c = 0;
        c += write_u2(buffer, insn.opcode);
        c += write_u1(buffer, insn.registers.len() as u8);
        for r in &insn.registers {
            c += write_u2(buffer, *r);
        }
        let mut presence = 0u8;
        if insn.literal.is_some() { presence |= INSN_HAS_LITERAL; }
        if insn.string_ref.is_some() { presence |= INSN_HAS_STRING; }
        if insn.type_ref.is_some() { presence |= INSN_HAS_TYPE; }
        c += write_u1(buffer, presence);
        if let Some(l) = insn.literal {
            c += write_u8v(buffer, l as u64);
        }
        if let Some(s) = &insn.string_ref {
            c += write_string(buffer, s);
        }
        if let Some(t) = &insn.type_ref {
            c += write_string(buffer, t);
        }
        Ok(c)
    }
}

/// Output file name for the n-th container produced at save time, following
/// the multidex convention: classes.cpc, classes2.cpc, classes3.cpc, ...
pub fn output_name(index: usize) -> String {
    if index == 0 {
        "classes.cpc".to_string()
    } else {
        format!("classes{}.cpc", index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::opcodes::{OP_CONST_STRING, OP_INVOKE_STATIC, OP_RETURN_VOID};
    use crate::types::{ACC_PUBLIC, ACC_STATIC};

    fn sample_class(java_name: &str) -> ClassDef {
        let mut c = ClassDef::new(ObjectIdentifier::from_java_type(java_name), ACC_PUBLIC);
        c.methods.push(MethodDef {
            name: "greet".to_string(),
            signature: MethodSignature::from_jni("()V").unwrap(),
            access_flags: ACC_PUBLIC | ACC_STATIC,
            registers: 2,
            code: vec![
                Instruction::with_string(OP_CONST_STRING, vec![0], "héllo \u{1F600}"),
                Instruction::plain(OP_INVOKE_STATIC, vec![0]),
                Instruction::plain(OP_RETURN_VOID, vec![]),
            ],
        });
        c
    }

    #[test]
    fn container_roundtrip() {
        let mut container = ClassContainer::new(30);
        container.classes.push(sample_class("com.a.First"));
        container.classes.push(sample_class("com.a.Second"));

        let bytes = container.to_bytes().unwrap();
        let reloaded = ClassContainer::from_bytes(&bytes).unwrap();

        assert_eq!(reloaded.profile.api_level, 30);
        assert_eq!(reloaded.classes.len(), 2);
        assert_eq!(reloaded.classes[0], container.classes[0]);
        assert_eq!(reloaded.classes[1], container.classes[1]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut container = ClassContainer::new(30);
        container.classes.push(sample_class("com.a.First"));
        let mut bytes = container.to_bytes().unwrap();
        bytes[0] = 0xff;
        assert!(ClassContainer::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let mut container = ClassContainer::new(30);
        container.classes.push(sample_class("com.a.First"));
        let bytes = container.to_bytes().unwrap();
        assert!(ClassContainer::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn write_is_strict_about_profile() {
        let mut container = ClassContainer::new(21);
        let mut class = sample_class("com.a.First");
        // const-method-handle only exists from api 28
        class.methods[0].code.push(Instruction::plain(0xfe, vec![0]));
        container.classes.push(class);
        assert!(container.to_bytes().is_err());
    }

    #[test]
    fn write_rejects_oversized_register_lists() {
        let mut container = ClassContainer::new(30);
        let mut class = sample_class("com.a.First");
        // register count is serialized as a single byte
        let registers: Vec<u16> = (0..=256).collect();
        class.methods[0]
            .code
            .push(Instruction::plain(OP_INVOKE_STATIC, registers));
        container.classes.push(class);
        assert!(container.to_bytes().is_err());
    }

    #[test]
    fn output_names_follow_multidex_convention() {
        assert_eq!(output_name(0), "classes.cpc");
        assert_eq!(output_name(1), "classes2.cpc");
        assert_eq!(output_name(2), "classes3.cpc");
    }
}
