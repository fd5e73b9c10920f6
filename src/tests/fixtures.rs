/* Shared builders for the scenario tests: a miniature "app" with a root */
/* check worth stubbing out, containers built in memory, and a few       */
/* canned Patch implementations.                                         */

use crate::container::codec::ClassContainer;
use crate::container::opcodes::{
    OP_CONST_4, OP_CONST_16, OP_CONST_STRING, OP_INVOKE_STATIC, OP_RETURN, OP_RETURN_VOID,
    OP_SGET,
};
use crate::patch::{Patch, PatchContext, PatchError, PatchResult};
use crate::signatures::{MethodFingerprint, Signature};
use crate::types::{
    ClassDef, Instruction, MethodDef, MethodSignature, ObjectIdentifier, TypeSignature,
    ACC_PUBLIC, ACC_STATIC,
};
use std::rc::Rc;

pub const TEST_API: i32 = 30;

pub fn method(name: &str, desc: &str, code: Vec<Instruction>) -> MethodDef {
    MethodDef {
        name: name.to_string(),
        signature: MethodSignature::from_jni(desc).unwrap(),
        access_flags: ACC_PUBLIC | ACC_STATIC,
        registers: 4,
        code,
    }
}

/// A class holding one marker method, used to tell merge versions apart.
pub fn plain_class(java_name: &str, marker: i64) -> ClassDef {
    let mut c = ClassDef::new(ObjectIdentifier::from_java_type(java_name), ACC_PUBLIC);
    c.methods.push(method(
        "id",
        "()I",
        vec![
            Instruction::with_literal(OP_CONST_16, vec![0], marker),
            Instruction::plain(OP_RETURN, vec![0]),
        ],
    ));
    c
}

/// The patch target: an (obfuscated) root check returning a boolean after
/// probing for the su binary.
pub fn su_check_class(java_name: &str, method_name: &str) -> ClassDef {
    let mut c = ClassDef::new(ObjectIdentifier::from_java_type(java_name), ACC_PUBLIC);
    c.methods.push(method(
        method_name,
        "()Z",
        vec![
            Instruction::with_string(OP_CONST_STRING, vec![0], "/system/bin/su"),
            Instruction::plain(OP_INVOKE_STATIC, vec![0]),
            Instruction::plain(OP_SGET, vec![1]),
            Instruction::plain(OP_RETURN, vec![1]),
        ],
    ));
    c
}

/// An uninteresting class the resolver has to scan past.
pub fn bystander_class(java_name: &str) -> ClassDef {
    let mut c = ClassDef::new(ObjectIdentifier::from_java_type(java_name), ACC_PUBLIC);
    c.methods.push(method(
        "run",
        "()V",
        vec![Instruction::plain(OP_RETURN_VOID, vec![])],
    ));
    c
}

pub fn container_bytes(classes: Vec<ClassDef>) -> Vec<u8> {
    let mut container = ClassContainer::new(TEST_API);
    container.classes = classes;
    container.to_bytes().unwrap()
}

/// The fingerprint the su check above resolves under, regardless of what
/// the class or method got renamed to.
pub fn su_check_signature(name: &str) -> Rc<Signature> {
    Signature::new(
        name,
        MethodFingerprint {
            return_type: Some(TypeSignature::Bool),
            parameters: Some(vec![]),
            strings: Some(vec!["bin/su".to_string()]),
            ..MethodFingerprint::default()
        },
    )
    .unwrap()
}

/// Replaces the matched method's body with "return false".
pub struct StubPatch {
    name: String,
    signature: Rc<Signature>,
}

impl StubPatch {
    pub fn new(name: &str, signature: Rc<Signature>) -> StubPatch {
        StubPatch {
            name: name.to_string(),
            signature,
        }
    }
}

impl Patch for StubPatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "stubs the matched method to return false"
    }

    fn signatures(&self) -> Vec<Rc<Signature>> {
        vec![self.signature.clone()]
    }

    fn apply(&self, _ctx: &mut PatchContext) -> PatchResult {
        let result = self
            .signature
            .result()
            .ok_or_else(|| PatchError::unresolved(self.signature.name()))?;
        let mut proxy = result.proxy.borrow_mut();
        let class = proxy.for_mutation();
        let target = &mut class.methods[result.method_index];
        target.code = vec![
            Instruction::with_literal(OP_CONST_4, vec![0], 0),
            Instruction::plain(OP_RETURN, vec![0]),
        ];
        Ok(Some(format!("stubbed {}", target.name)))
    }
}

/// Reads the matched class through its proxy without mutating anything.
pub struct ReadOnlyPatch {
    name: String,
    signature: Rc<Signature>,
}

impl ReadOnlyPatch {
    pub fn new(name: &str, signature: Rc<Signature>) -> ReadOnlyPatch {
        ReadOnlyPatch {
            name: name.to_string(),
            signature,
        }
    }
}

impl Patch for ReadOnlyPatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Rc<Signature>> {
        vec![self.signature.clone()]
    }

    fn apply(&self, _ctx: &mut PatchContext) -> PatchResult {
        let result = self
            .signature
            .result()
            .ok_or_else(|| PatchError::unresolved(self.signature.name()))?;
        let proxy = result.proxy.borrow();
        let method_count = proxy.view().methods.len();
        Ok(Some(format!("inspected {method_count} methods")))
    }
}

/// Mutates a class located by descriptor through the session context
/// rather than through a signature.
pub struct RenameSuperPatch {
    name: String,
    signature: Rc<Signature>,
    target_type: String,
    new_super: String,
}

impl RenameSuperPatch {
    pub fn new(name: &str, signature: Rc<Signature>, target_type: &str, new_super: &str) -> RenameSuperPatch {
        RenameSuperPatch {
            name: name.to_string(),
            signature,
            target_type: target_type.to_string(),
            new_super: new_super.to_string(),
        }
    }
}

impl Patch for RenameSuperPatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Rc<Signature>> {
        vec![self.signature.clone()]
    }

    fn apply(&self, ctx: &mut PatchContext) -> PatchResult {
        let index = ctx
            .find_class(&self.target_type)
            .ok_or_else(|| PatchError::new(&format!("no class {}", self.target_type)))?;
        let proxy = ctx.proxy(index)?;
        proxy.borrow_mut().for_mutation().super_class =
            ObjectIdentifier::from_jni_type(&self.new_super).map_err(|e| PatchError::new(&e.to_string()))?;
        Ok(None)
    }
}

/// Always fails with a descriptive error.
pub struct FailingPatch {
    name: String,
}

impl FailingPatch {
    pub fn new(name: &str) -> FailingPatch {
        FailingPatch { name: name.to_string() }
    }
}

impl Patch for FailingPatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Rc<Signature>> {
        vec![]
    }

    fn apply(&self, _ctx: &mut PatchContext) -> PatchResult {
        Err(PatchError::new("deliberate failure"))
    }
}

/// Panics instead of returning, exercising the orchestrator boundary.
pub struct PanickingPatch {
    name: String,
}

impl PanickingPatch {
    pub fn new(name: &str) -> PanickingPatch {
        PanickingPatch { name: name.to_string() }
    }
}

impl Patch for PanickingPatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Rc<Signature>> {
        vec![]
    }

    fn apply(&self, _ctx: &mut PatchContext) -> PatchResult {
        panic!("unexpected fault inside patch");
    }
}
