/* Structural model of a loaded class pool: type identifiers, descriptors, */
/* class / method / instruction records, and the crate-level error type.   */

use crate::container::error::ContainerError;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::char;
use nom::multi::many0;
use nom::{IResult, Parser};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/* Access flags, as carried in the container */
pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_PRIVATE: u32 = 0x2;
pub const ACC_PROTECTED: u32 = 0x4;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_FINAL: u32 = 0x10;
pub const ACC_SYNCHRONIZED: u32 = 0x20;
pub const ACC_BRIDGE: u32 = 0x40;
pub const ACC_VARARGS: u32 = 0x80;
pub const ACC_NATIVE: u32 = 0x100;
pub const ACC_INTERFACE: u32 = 0x200;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;

/// Errors raised by the patcher pipeline. Invalid-state errors are usage
/// errors (resolving twice, applying before resolving); duplicate-class
/// errors only occur during a merge that requested them.
#[derive(Debug)]
pub enum PatcherError {
    InvalidState(String),
    DuplicateClass(String),
    Container(ContainerError),
}

impl PatcherError {
    pub fn invalid_state(msg: &str) -> PatcherError {
        PatcherError::InvalidState(msg.to_string())
    }

    pub fn duplicate_class(type_id: &str) -> PatcherError {
        PatcherError::DuplicateClass(type_id.to_string())
    }
}

impl fmt::Display for PatcherError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatcherError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            PatcherError::DuplicateClass(t) => write!(f, "duplicate class: {t}"),
            PatcherError::Container(e) => write!(f, "container error: {e}"),
        }
    }
}

impl Error for PatcherError {}

impl From<ContainerError> for PatcherError {
    fn from(e: ContainerError) -> Self {
        PatcherError::Container(e)
    }
}

/// Represents a Java object identifier in JNI form
///
/// # Examples
///
/// ```
/// use dexpatch::types::ObjectIdentifier;
///
/// let o = ObjectIdentifier::from_java_type("com.basic.Test");
/// assert_eq!(o.as_java_type(), "com.basic.Test");
/// assert_eq!(o.as_jni_type(), "Lcom/basic/Test;");
/// ```
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub(crate) class_name: String,
}

impl PartialEq<Self> for ObjectIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name
    }
}

impl Hash for ObjectIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_name.hash(state);
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_jni_type())
    }
}

impl ObjectIdentifier {
    pub fn from_jni_type(t: &str) -> Result<ObjectIdentifier, PatcherError> {
        match parse_typesignature(t) {
            Ok((rest, TypeSignature::Object(o))) if rest.is_empty() => Ok(o),
            _ => Err(PatcherError::Container(ContainerError::new(&format!(
                "not an object descriptor: {t}"
            )))),
        }
    }

    pub fn from_java_type(t: &str) -> ObjectIdentifier {
        let class_name = t.replace('.', "/");
        ObjectIdentifier { class_name }
    }

    pub fn as_jni_type(&self) -> String {
        format!("L{};", self.class_name)
    }

    pub fn as_java_type(&self) -> String {
        self.class_name.replace('/', ".")
    }
}

/// Represents a Java type: array, object or primitive type
///
/// # Examples
///
/// ```
/// use dexpatch::types::TypeSignature;
///
/// let t = TypeSignature::Bool;
/// assert_eq!(t.to_jni(), "Z");
/// ```
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub enum TypeSignature {
    Array(Box<TypeSignature>),
    Object(ObjectIdentifier),
    Int,
    Bool,
    Byte,
    Char,
    Short,
    Long,
    Float,
    Double,
    Void,
}

impl PartialEq<Self> for TypeSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_jni() == other.to_jni()
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_jni())
    }
}

impl TypeSignature {
    pub fn from_jni(s: &str) -> Result<TypeSignature, PatcherError> {
        match parse_typesignature(s) {
            Ok((rest, ts)) if rest.is_empty() => Ok(ts),
            _ => Err(PatcherError::Container(ContainerError::new(&format!(
                "could not parse type descriptor: {s}"
            )))),
        }
    }

    pub fn to_jni(&self) -> String {
        match self {
            TypeSignature::Array(a) => "[".to_string() + &a.to_jni(),
            TypeSignature::Bool => "Z".to_string(),
            TypeSignature::Byte => "B".to_string(),
            TypeSignature::Char => "C".to_string(),
            TypeSignature::Short => "S".to_string(),
            TypeSignature::Int => "I".to_string(),
            TypeSignature::Long => "J".to_string(),
            TypeSignature::Float => "F".to_string(),
            TypeSignature::Double => "D".to_string(),
            TypeSignature::Object(o) => o.as_jni_type(),
            TypeSignature::Void => "V".to_string(),
        }
    }

    pub fn to_java(&self) -> String {
        match self {
            TypeSignature::Array(a) => format!("{}[]", a.to_java()),
            TypeSignature::Bool => "boolean".to_string(),
            TypeSignature::Byte => "byte".to_string(),
            TypeSignature::Char => "char".to_string(),
            TypeSignature::Short => "short".to_string(),
            TypeSignature::Int => "int".to_string(),
            TypeSignature::Long => "long".to_string(),
            TypeSignature::Float => "float".to_string(),
            TypeSignature::Double => "double".to_string(),
            TypeSignature::Object(o) => o.as_java_type(),
            TypeSignature::Void => "void".to_string(),
        }
    }
}

/// Represents a Java method signature consisting of arguments and a return type
///
/// # Examples
///
/// ```
/// use dexpatch::types::{MethodSignature, TypeSignature};
///
/// let m = MethodSignature::from_jni("([I)V").unwrap();
/// assert_eq!(m.result, TypeSignature::Void);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub args: Vec<TypeSignature>,
    pub result: TypeSignature,
}

impl MethodSignature {
    pub fn from_jni(s: &str) -> Result<MethodSignature, PatcherError> {
        match parse_methodsignature(s) {
            Ok((rest, m)) if rest.is_empty() => Ok(m),
            _ => Err(PatcherError::Container(ContainerError::new(&format!(
                "could not parse method descriptor: {s}"
            )))),
        }
    }

    pub fn to_jni(&self) -> String {
        let mut s = String::new();
        s.push('(');
        for t in &self.args {
            s.push_str(&t.to_jni());
        }
        s.push(')');
        s.push_str(&self.result.to_jni());
        s
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_jni())
    }
}

pub(crate) fn parse_typesignature(desc: &str) -> IResult<&str, TypeSignature> {
    // Object
    let l: IResult<&str, &str> = tag("L").parse(desc);
    if let Ok((o, _)) = l {
        let (o, t) = take_while(|x| x != ';')(o)?;
        let (o, _) = char(';')(o)?;
        let object = ObjectIdentifier {
            class_name: t.to_string(),
        };
        return Ok((o, TypeSignature::Object(object)));
    }

    // Array
    let b: IResult<&str, &str> = tag("[").parse(desc);
    if let Ok((o, _)) = b {
        let (o, t) = parse_typesignature(o)?;
        return Ok((o, TypeSignature::Array(Box::new(t))));
    }

    // Primitive type
    let p: IResult<&str, &str> = alt((
        tag("Z"),
        tag("B"),
        tag("C"),
        tag("S"),
        tag("I"),
        tag("J"),
        tag("F"),
        tag("D"),
        tag("V"),
    ))
    .parse(desc);
    if let Ok((o, t)) = p {
        let ts = match t {
            "Z" => TypeSignature::Bool,
            "B" => TypeSignature::Byte,
            "C" => TypeSignature::Char,
            "S" => TypeSignature::Short,
            "I" => TypeSignature::Int,
            "J" => TypeSignature::Long,
            "F" => TypeSignature::Float,
            "D" => TypeSignature::Double,
            _ => TypeSignature::Void,
        };
        return Ok((o, ts));
    }

    Err(nom::Err::Error(nom::error::Error {
        input: desc,
        code: nom::error::ErrorKind::Complete,
    }))
}

pub(crate) fn parse_methodsignature(desc: &str) -> IResult<&str, MethodSignature> {
    let (o, _) = tag("(")(desc)?;
    let (o, a) = many0(parse_typesignature).parse(o)?;
    let (o, _) = tag(")")(o)?;
    let (o, r) = parse_typesignature(o)?;
    Ok((o, MethodSignature { args: a, result: r }))
}

/// Simple enum to represent method and class modifiers
///
#[derive(Debug, PartialEq)]
pub enum Modifier {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Synchronized,
    Bridge,
    Varargs,
    Native,
    Interface,
    Abstract,
    Synthetic,
    Enum,
    Constructor,
}

impl FromStr for Modifier {
    type Err = PatcherError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "public" => Self::Public,
            "protected" => Self::Protected,
            "private" => Self::Private,
            "static" => Self::Static,
            "final" => Self::Final,
            "abstract" => Self::Abstract,
            "interface" => Self::Interface,
            "synthetic" => Self::Synthetic,
            "synchronized" => Self::Synchronized,
            "native" => Self::Native,
            "varargs" => Self::Varargs,
            "enum" => Self::Enum,
            "bridge" => Self::Bridge,
            "constructor" => Self::Constructor,
            _ => {
                return Err(PatcherError::InvalidState(format!("unknown modifier: {s}")));
            }
        })
    }
}

impl Modifier {
    pub fn to_str(&self) -> &str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
            Self::Static => "static",
            Self::Final => "final",
            Self::Abstract => "abstract",
            Self::Interface => "interface",
            Self::Synthetic => "synthetic",
            Self::Synchronized => "synchronized",
            Self::Native => "native",
            Self::Varargs => "varargs",
            Self::Enum => "enum",
            Self::Bridge => "bridge",
            Self::Constructor => "constructor",
        }
    }
}

pub struct Modifiers;

impl Modifiers
{
    pub fn from_u32(u: u32) -> Vec<Modifier>
    {
        let mut m = vec![];
        if u & ACC_PUBLIC > 0 { m.push(Modifier::Public)};
        if u & ACC_PRIVATE > 0 { m.push(Modifier::Private)};
        if u & ACC_PROTECTED > 0 { m.push(Modifier::Protected)};
        if u & ACC_STATIC > 0 { m.push(Modifier::Static)};
        if u & ACC_FINAL > 0 { m.push(Modifier::Final)};
        if u & ACC_SYNCHRONIZED > 0 { m.push(Modifier::Synchronized)};
        if u & ACC_BRIDGE > 0 { m.push(Modifier::Bridge)};
        if u & ACC_VARARGS > 0 { m.push(Modifier::Varargs)};
        if u & ACC_NATIVE > 0 { m.push(Modifier::Native)};
        if u & ACC_INTERFACE > 0 { m.push(Modifier::Interface)};
        if u & ACC_ABSTRACT > 0 { m.push(Modifier::Abstract)};
        if u & ACC_SYNTHETIC > 0 { m.push(Modifier::Synthetic)};
        if u & ACC_ENUM > 0 { m.push(Modifier::Enum)};
        if u & ACC_CONSTRUCTOR > 0 { m.push(Modifier::Constructor)};
        m
    }
}

/// One bytecode operation inside a method body. The core treats these as
/// opaque beyond opcode identity and pool references: signatures match on
/// opcode subsequences and referenced strings, patches rewrite whole
/// sequences through a class proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Opcode value, interpreted against the session's opcode profile
    pub opcode: u16,
    /// Register operands (vN)
    pub registers: Vec<u16>,
    /// Inline literal, where the op carries one
    pub literal: Option<i64>,
    /// Referenced string constant, where the op carries one
    pub string_ref: Option<String>,
    /// Referenced type descriptor, where the op carries one
    pub type_ref: Option<String>,
}

impl Instruction {
    pub fn plain(opcode: u16, registers: Vec<u16>) -> Instruction {
        Instruction { opcode, registers, literal: None, string_ref: None, type_ref: None }
    }

    pub fn with_literal(opcode: u16, registers: Vec<u16>, literal: i64) -> Instruction {
        Instruction { opcode, registers, literal: Some(literal), string_ref: None, type_ref: None }
    }

    pub fn with_string(opcode: u16, registers: Vec<u16>, s: &str) -> Instruction {
        Instruction {
            opcode,
            registers,
            literal: None,
            string_ref: Some(s.to_string()),
            type_ref: None,
        }
    }

    pub fn with_type(opcode: u16, registers: Vec<u16>, t: &str) -> Instruction {
        Instruction {
            opcode,
            registers,
            literal: None,
            string_ref: None,
            type_ref: Some(t.to_string()),
        }
    }
}

/// Struct representing a method inside a loaded class
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Method signature
    pub signature: MethodSignature,
    /// Access flags (ACC_*)
    pub access_flags: u32,
    /// Number of registers the body requires
    pub registers: u16,
    /// Method body
    pub code: Vec<Instruction>,
}

impl MethodDef {
    pub fn modifiers(&self) -> Vec<Modifier> {
        Modifiers::from_u32(self.access_flags)
    }

    /// All string constants referenced by the body, in order of appearance.
    pub fn referenced_strings(&self) -> Vec<&str> {
        self.code
            .iter()
            .filter_map(|i| i.string_ref.as_deref())
            .collect()
    }
}

/// Represents one class definition in the pool
///
/// # Examples
///
/// ```
/// use dexpatch::types::{ClassDef, ObjectIdentifier, ACC_PUBLIC};
///
/// let c = ClassDef::new(ObjectIdentifier::from_java_type("com.cool.Class"), ACC_PUBLIC);
/// assert_eq!(c.name.as_jni_type(), "Lcom/cool/Class;");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    /// The name of this class
    pub name: ObjectIdentifier,
    /// Access flags (ACC_*)
    pub access_flags: u32,
    /// The class' superclass
    pub super_class: ObjectIdentifier,
    /// List of all the interfaces the class implements
    pub interfaces: Vec<ObjectIdentifier>,
    /// All the methods defined by the class
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(name: ObjectIdentifier, access_flags: u32) -> ClassDef {
        ClassDef {
            name,
            access_flags,
            super_class: ObjectIdentifier::from_java_type("java.lang.Object"),
            interfaces: vec![],
            methods: vec![],
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_mut(&mut self, name: &str) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|m| m.name == name)
    }
}
