/* Structural method signatures and the resolver that matches them        */
/* against the class pool. A signature never names its target directly:   */
/* it describes the method's shape, so renamed or relocated targets are   */
/* still found.                                                           */

use crate::patcher::ClassPool;
use crate::proxy::{ProxyRegistry, SharedProxy};
use crate::types::{ClassDef, MethodDef, PatcherError, TypeSignature};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::rc::Rc;

/// Structural fingerprint of a method. All criteria are optional, but a
/// fingerprint with no criteria at all is rejected at [`Signature::new`].
///
/// # Examples
///
/// ```
/// use dexpatch::signatures::MethodFingerprint;
/// use dexpatch::types::TypeSignature;
///
/// let fp = MethodFingerprint {
///     return_type: Some(TypeSignature::Bool),
///     strings: Some(vec!["su".to_string()]),
///     ..MethodFingerprint::default()
/// };
/// assert!(!fp.is_vacuous());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MethodFingerprint {
    /// Required return type
    pub return_type: Option<TypeSignature>,
    /// Required parameter list, matched exactly and in order
    pub parameters: Option<Vec<TypeSignature>>,
    /// Access flags that must all be present on the method
    pub access_flags: Option<u32>,
    /// Opcode values that must appear in the body as an ordered
    /// subsequence (other ops may sit between them)
    pub opcodes: Option<Vec<u16>>,
    /// Strings the body must reference; each entry matches if it is a
    /// substring of a referenced string constant
    pub strings: Option<Vec<String>>,
    /// Substring of the enclosing class' JNI descriptor
    pub class_hint: Option<String>,
}

impl MethodFingerprint {
    /// True when no criterion is set. Such a fingerprint would match the
    /// first method of the first class, which is never what a caller meant.
    pub fn is_vacuous(&self) -> bool {
        self.return_type.is_none()
            && self.parameters.is_none()
            && self.access_flags.is_none()
            && self.opcodes.is_none()
            && self.strings.is_none()
            && self.class_hint.is_none()
    }

    /// Structural match of one candidate method.
    pub fn matches(&self, class: &ClassDef, method: &MethodDef) -> bool {
        if let Some(hint) = &self.class_hint {
            if !class.name.as_jni_type().contains(hint.as_str()) {
                return false;
            }
        }
        if let Some(flags) = self.access_flags {
            if method.access_flags & flags != flags {
                return false;
            }
        }
        if let Some(rt) = &self.return_type {
            if &method.signature.result != rt {
                return false;
            }
        }
        if let Some(params) = &self.parameters {
            if &method.signature.args != params {
                return false;
            }
        }
        if let Some(pattern) = &self.opcodes {
            if !is_opcode_subsequence(pattern, &method.code.iter().map(|i| i.opcode).collect::<Vec<_>>()) {
                return false;
            }
        }
        if let Some(needles) = &self.strings {
            let referenced = method.referenced_strings();
            for needle in needles {
                if !referenced.iter().any(|s| s.contains(needle.as_str())) {
                    return false;
                }
            }
        }
        true
    }
}

fn is_opcode_subsequence(pattern: &[u16], body: &[u16]) -> bool {
    let mut it = body.iter();
    pattern.iter().all(|p| it.any(|b| b == p))
}

/// Where a signature resolved to: the pool location of the matched method
/// and the shared proxy of its class.
#[derive(Debug, Clone)]
pub struct SignatureResult {
    pub class_index: usize,
    pub method_index: usize,
    pub proxy: SharedProxy,
}

/// A named fingerprint plus its resolution slot. The slot is written at
/// most once, by the resolver; it stays `None` for targets that were not
/// found, which is not an error by itself — a patch that required the
/// match turns the absence into its own failure.
#[derive(Debug)]
pub struct Signature {
    name: String,
    fingerprint: MethodFingerprint,
    result: RefCell<Option<SignatureResult>>,
}

impl Signature {
    /// Rejects vacuous fingerprints; see [`MethodFingerprint::is_vacuous`].
    pub fn new(name: &str, fingerprint: MethodFingerprint) -> Result<Rc<Signature>, PatcherError> {
        if fingerprint.is_vacuous() {
            return Err(PatcherError::invalid_state(&format!(
                "signature '{name}' has no matching criteria"
            )));
        }
        Ok(Rc::new(Signature {
            name: name.to_string(),
            fingerprint,
            result: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> &MethodFingerprint {
        &self.fingerprint
    }

    pub fn result(&self) -> Option<SignatureResult> {
        self.result.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.result.borrow().is_some()
    }

    fn set_result(&self, result: SignatureResult) {
        *self.result.borrow_mut() = Some(result);
    }
}

/// Matches every pending signature against the pool in one deterministic
/// pass: classes in pool order, methods in declaration order, first
/// structural match wins. Matched classes get their proxy from the
/// registry, so several signatures landing in the same class share one
/// proxy.
pub(crate) fn resolve_all(
    pool: &ClassPool,
    registry: &mut ProxyRegistry,
    signatures: &[Rc<Signature>],
) -> Result<(), PatcherError> {
    if signatures.is_empty() {
        return Err(PatcherError::invalid_state("no signatures to resolve"));
    }
    if signatures.iter().any(|s| s.is_resolved()) {
        return Err(PatcherError::invalid_state("signatures already resolved"));
    }

    let mut matched = 0usize;
    for signature in signatures {
        let mut found = None;
        'scan: for (class_index, class) in pool.iter().enumerate() {
            for (method_index, method) in class.methods.iter().enumerate() {
                if signature.fingerprint.matches(class, method) {
                    found = Some((class_index, method_index));
                    break 'scan;
                }
            }
        }

        match found {
            Some((class_index, method_index)) => {
                let proxy = registry.obtain(class_index, pool.entry(class_index));
                debug!(
                    "signature '{}' resolved to {}->{} (class {}, method {})",
                    signature.name(),
                    pool.entry(class_index).name.as_jni_type(),
                    pool.entry(class_index).methods[method_index].name,
                    class_index,
                    method_index
                );
                signature.set_result(SignatureResult { class_index, method_index, proxy });
                matched += 1;
            }
            None => {
                warn!("signature '{}' did not match any method", signature.name());
            }
        }
    }

    info!("resolved {}/{} signatures", matched, signatures.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::opcodes::{OP_CONST_STRING, OP_RETURN, OP_RETURN_VOID};
    use crate::types::{Instruction, MethodSignature, ObjectIdentifier, ACC_PUBLIC, ACC_STATIC};

    fn method(name: &str, desc: &str, code: Vec<Instruction>) -> MethodDef {
        MethodDef {
            name: name.to_string(),
            signature: MethodSignature::from_jni(desc).unwrap(),
            access_flags: ACC_PUBLIC | ACC_STATIC,
            registers: 2,
            code,
        }
    }

    fn class_with(name: &str, methods: Vec<MethodDef>) -> ClassDef {
        let mut c = ClassDef::new(ObjectIdentifier::from_java_type(name), ACC_PUBLIC);
        c.methods = methods;
        c
    }

    #[test]
    fn vacuous_fingerprint_rejected() {
        assert!(Signature::new("anything", MethodFingerprint::default()).is_err());
    }

    #[test]
    fn matches_on_shape_not_names() {
        // the method name is obfuscated, the shape is not
        let m = method(
            "a",
            "()Z",
            vec![
                Instruction::with_string(OP_CONST_STRING, vec![0], "/system/bin/su"),
                Instruction::plain(OP_RETURN, vec![0]),
            ],
        );
        let c = class_with("a.b.c", vec![m]);

        let fp = MethodFingerprint {
            return_type: Some(TypeSignature::Bool),
            strings: Some(vec!["bin/su".to_string()]),
            ..MethodFingerprint::default()
        };
        assert!(fp.matches(&c, &c.methods[0]));

        let wrong_return = MethodFingerprint {
            return_type: Some(TypeSignature::Int),
            strings: Some(vec!["bin/su".to_string()]),
            ..MethodFingerprint::default()
        };
        assert!(!wrong_return.matches(&c, &c.methods[0]));
    }

    #[test]
    fn opcode_pattern_is_an_ordered_subsequence() {
        let m = method(
            "a",
            "()V",
            vec![
                Instruction::with_string(OP_CONST_STRING, vec![0], "x"),
                Instruction::plain(OP_RETURN_VOID, vec![]),
            ],
        );
        let c = class_with("a.b.c", vec![m]);

        let in_order = MethodFingerprint {
            opcodes: Some(vec![OP_CONST_STRING, OP_RETURN_VOID]),
            ..MethodFingerprint::default()
        };
        assert!(in_order.matches(&c, &c.methods[0]));

        let out_of_order = MethodFingerprint {
            opcodes: Some(vec![OP_RETURN_VOID, OP_CONST_STRING]),
            ..MethodFingerprint::default()
        };
        assert!(!out_of_order.matches(&c, &c.methods[0]));
    }

    #[test]
    fn class_hint_narrows_the_scan() {
        let m = method("a", "()V", vec![Instruction::plain(OP_RETURN_VOID, vec![])]);
        let c = class_with("com.scottyab.rootbeer.RootBeer", vec![m]);
        let fp = MethodFingerprint {
            class_hint: Some("rootbeer".to_string()),
            return_type: Some(TypeSignature::Void),
            ..MethodFingerprint::default()
        };
        assert!(fp.matches(&c, &c.methods[0]));

        let elsewhere = class_with("com.other.Thing", c.methods.clone());
        assert!(!fp.matches(&elsewhere, &elsewhere.methods[0]));
    }
}
