use bitflags::bitflags;
use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;
use std::ops::RangeInclusive;

// Defines various flags that can be associated with an opcode.
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u32 {
        const CAN_THROW = 0x1;
        const CAN_CONTINUE = 0x2;
        const SETS_REGISTER = 0x4;
        const SETS_WIDE_REGISTER = 0x8;
        const SETS_RESULT = 0x10;
        const RETURNS = 0x20;
        const BRANCHES = 0x40;
        const INVOKES = 0x80;
        const REFERENCES_STRING = 0x100;
        const REFERENCES_TYPE = 0x200;
    }
}

/* Opcode values used throughout the crate and by callers building patches */
pub const OP_NOP: u16 = 0x00;
pub const OP_MOVE: u16 = 0x01;
pub const OP_MOVE_RESULT: u16 = 0x0a;
pub const OP_MOVE_EXCEPTION: u16 = 0x0d;
pub const OP_RETURN_VOID: u16 = 0x0e;
pub const OP_RETURN: u16 = 0x0f;
pub const OP_RETURN_OBJECT: u16 = 0x11;
pub const OP_CONST_4: u16 = 0x12;
pub const OP_CONST_16: u16 = 0x13;
pub const OP_CONST: u16 = 0x14;
pub const OP_CONST_WIDE: u16 = 0x16;
pub const OP_CONST_STRING: u16 = 0x1a;
pub const OP_CONST_CLASS: u16 = 0x1c;
pub const OP_CHECK_CAST: u16 = 0x1f;
pub const OP_INSTANCE_OF: u16 = 0x20;
pub const OP_NEW_INSTANCE: u16 = 0x22;
pub const OP_THROW: u16 = 0x27;
pub const OP_GOTO: u16 = 0x28;
pub const OP_IF_EQ: u16 = 0x32;
pub const OP_IF_EQZ: u16 = 0x38;
pub const OP_IF_NEZ: u16 = 0x39;
pub const OP_IGET: u16 = 0x52;
pub const OP_IPUT: u16 = 0x59;
pub const OP_SGET: u16 = 0x60;
pub const OP_SPUT: u16 = 0x67;
pub const OP_INVOKE_VIRTUAL: u16 = 0x6e;
pub const OP_INVOKE_SUPER: u16 = 0x6f;
pub const OP_INVOKE_DIRECT: u16 = 0x70;
pub const OP_INVOKE_STATIC: u16 = 0x71;
pub const OP_INVOKE_INTERFACE: u16 = 0x72;
pub const OP_ADD_INT: u16 = 0x90;
pub const OP_INVOKE_POLYMORPHIC: u16 = 0xfa;
pub const OP_CONST_METHOD_HANDLE: u16 = 0xfe;
pub const OP_CONST_METHOD_TYPE: u16 = 0xff;

/// An opcode with its properties and the API ranges in which it is valid.
pub struct OpcodeInfo {
    pub name: &'static str,
    pub flags: OpFlags,
    pub api_to_value_map: RangeInclusiveMap<i32, u16>,
}

/// An API version range along with the opcode value it maps to.
pub struct VersionConstraint {
    pub api_range: Option<RangeInclusive<i32>>,
    pub opcode_value: u16,
}

pub const MIN_API: i32 = 1;
pub const MAX_API: i32 = 36;

impl OpcodeInfo {
    pub(crate) fn new(
        version_constraints: Vec<VersionConstraint>,
        name: &'static str,
        flags: OpFlags,
    ) -> Self {
        let mut api_to_value_map = RangeInclusiveMap::new();
        for vc in version_constraints {
            let range = vc.api_range.unwrap_or(MIN_API..=MAX_API);
            api_to_value_map.insert(range, vc.opcode_value);
        }
        OpcodeInfo { name, flags, api_to_value_map }
    }

    pub(crate) fn all_versions(value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint { api_range: None, opcode_value: value }]
    }

    pub(crate) fn from_api(api: i32, value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint { api_range: Some(api..=MAX_API), opcode_value: value }]
    }

    /// The opcode value under the given API level, if the op exists there.
    pub fn value_for_api(&self, api: i32) -> Option<u16> {
        self.api_to_value_map.get(&api).copied()
    }
}

static OPCODES: Lazy<Vec<OpcodeInfo>> = Lazy::new(|| {
    vec![
        OpcodeInfo::new(OpcodeInfo::all_versions(OP_NOP), "nop", OpFlags::CAN_CONTINUE),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_MOVE),
            "move",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_MOVE_RESULT),
            "move-result",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_MOVE_EXCEPTION),
            "move-exception",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_RETURN_VOID),
            "return-void",
            OpFlags::RETURNS,
        ),
        OpcodeInfo::new(OpcodeInfo::all_versions(OP_RETURN), "return", OpFlags::RETURNS),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_RETURN_OBJECT),
            "return-object",
            OpFlags::RETURNS,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_CONST_4),
            "const/4",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_CONST_16),
            "const/16",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_CONST),
            "const",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_CONST_WIDE),
            "const-wide",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER | OpFlags::SETS_WIDE_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_CONST_STRING),
            "const-string",
            OpFlags::CAN_THROW
                | OpFlags::CAN_CONTINUE
                | OpFlags::SETS_REGISTER
                | OpFlags::REFERENCES_STRING,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_CONST_CLASS),
            "const-class",
            OpFlags::CAN_THROW
                | OpFlags::CAN_CONTINUE
                | OpFlags::SETS_REGISTER
                | OpFlags::REFERENCES_TYPE,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_CHECK_CAST),
            "check-cast",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::REFERENCES_TYPE,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_INSTANCE_OF),
            "instance-of",
            OpFlags::CAN_THROW
                | OpFlags::CAN_CONTINUE
                | OpFlags::SETS_REGISTER
                | OpFlags::REFERENCES_TYPE,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_NEW_INSTANCE),
            "new-instance",
            OpFlags::CAN_THROW
                | OpFlags::CAN_CONTINUE
                | OpFlags::SETS_REGISTER
                | OpFlags::REFERENCES_TYPE,
        ),
        OpcodeInfo::new(OpcodeInfo::all_versions(OP_THROW), "throw", OpFlags::CAN_THROW),
        OpcodeInfo::new(OpcodeInfo::all_versions(OP_GOTO), "goto", OpFlags::BRANCHES),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_IF_EQ),
            "if-eq",
            OpFlags::CAN_CONTINUE | OpFlags::BRANCHES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_IF_EQZ),
            "if-eqz",
            OpFlags::CAN_CONTINUE | OpFlags::BRANCHES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_IF_NEZ),
            "if-nez",
            OpFlags::CAN_CONTINUE | OpFlags::BRANCHES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_IGET),
            "iget",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_IPUT),
            "iput",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_SGET),
            "sget",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_SPUT),
            "sput",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_INVOKE_VIRTUAL),
            "invoke-virtual",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_RESULT | OpFlags::INVOKES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_INVOKE_SUPER),
            "invoke-super",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_RESULT | OpFlags::INVOKES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_INVOKE_DIRECT),
            "invoke-direct",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_RESULT | OpFlags::INVOKES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_INVOKE_STATIC),
            "invoke-static",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_RESULT | OpFlags::INVOKES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_INVOKE_INTERFACE),
            "invoke-interface",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_RESULT | OpFlags::INVOKES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::all_versions(OP_ADD_INT),
            "add-int",
            OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::from_api(26, OP_INVOKE_POLYMORPHIC),
            "invoke-polymorphic",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_RESULT | OpFlags::INVOKES,
        ),
        OpcodeInfo::new(
            OpcodeInfo::from_api(28, OP_CONST_METHOD_HANDLE),
            "const-method-handle",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
        OpcodeInfo::new(
            OpcodeInfo::from_api(28, OP_CONST_METHOD_TYPE),
            "const-method-type",
            OpFlags::CAN_THROW | OpFlags::CAN_CONTINUE | OpFlags::SETS_REGISTER,
        ),
    ]
});

/// The instruction-set profile of a loaded container: fixes the API level
/// for the whole session and resolves opcode values against it.
///
/// # Examples
///
/// ```
/// use dexpatch::container::opcodes::{OpcodeProfile, OP_CONST_STRING};
///
/// let profile = OpcodeProfile::new(30);
/// assert_eq!(profile.name(OP_CONST_STRING), Some("const-string"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeProfile {
    pub api_level: i32,
}

impl OpcodeProfile {
    pub fn new(api_level: i32) -> OpcodeProfile {
        OpcodeProfile { api_level }
    }

    pub fn info(&self, value: u16) -> Option<&'static OpcodeInfo> {
        OPCODES
            .iter()
            .find(|o| o.value_for_api(self.api_level) == Some(value))
    }

    pub fn name(&self, value: u16) -> Option<&'static str> {
        self.info(value).map(|o| o.name)
    }

    pub fn value(&self, name: &str) -> Option<u16> {
        OPCODES
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value_for_api(self.api_level))
    }

    pub fn flags(&self, value: u16) -> Option<OpFlags> {
        self.info(value).map(|o| o.flags)
    }

    pub fn supports(&self, value: u16) -> bool {
        self.info(value).is_some()
    }
}
