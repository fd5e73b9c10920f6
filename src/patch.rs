/* A patch is a registered unit of transformation: it declares the method */
/* signatures it needs up front and is executed exactly once against the  */
/* resolved locations, through a shared session context.                  */

use crate::container::opcodes::OpcodeProfile;
use crate::patcher::ClassPool;
use crate::proxy::{ProxyRegistry, SharedProxy};
use crate::signatures::Signature;
use crate::types::ClassDef;
use std::error::Error;
use std::fmt;
use std::rc::Rc;

/// Error produced by a failing patch. The orchestrator records it in the
/// outcome map; it never escapes `apply_patches`.
#[derive(Debug)]
pub struct PatchError {
    pub details: String,
}

impl PatchError {
    pub fn new(msg: &str) -> PatchError {
        PatchError {
            details: msg.to_string(),
        }
    }

    /// For patches whose target was mandatory but whose signature did not
    /// resolve.
    pub fn unresolved(signature_name: &str) -> PatchError {
        PatchError {
            details: format!("required signature '{signature_name}' did not resolve"),
        }
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for PatchError {}

/// Outcome of one patch execution: an optional success note, or a failure.
pub type PatchResult = Result<Option<String>, PatchError>;

/// Session handle passed into every patch execution: read access to the
/// class pool and opcode profile, and proxy access through the shared
/// registry, so every patch touching the same class sees the same
/// copy-on-write clone.
pub struct PatchContext<'a> {
    pool: &'a ClassPool,
    registry: &'a mut ProxyRegistry,
    profile: OpcodeProfile,
}

impl<'a> PatchContext<'a> {
    pub(crate) fn new(
        pool: &'a ClassPool,
        registry: &'a mut ProxyRegistry,
        profile: OpcodeProfile,
    ) -> PatchContext<'a> {
        PatchContext { pool, registry, profile }
    }

    pub fn profile(&self) -> OpcodeProfile {
        self.profile
    }

    pub fn class_count(&self) -> usize {
        self.pool.len()
    }

    /// Read-only view of a pool entry.
    pub fn class(&self, index: usize) -> Option<&ClassDef> {
        self.pool.get(index)
    }

    /// Pool index of a class by JNI descriptor.
    pub fn find_class(&self, jni_type: &str) -> Option<usize> {
        self.pool.index_of(jni_type)
    }

    /// The shared proxy for a pool entry, for patches that mutate classes
    /// beyond their declared signatures.
    pub fn proxy(&mut self, index: usize) -> Result<SharedProxy, PatchError> {
        if index >= self.pool.len() {
            return Err(PatchError::new(&format!(
                "class index {index} out of range (pool has {} classes)",
                self.pool.len()
            )));
        }
        Ok(self.registry.obtain(index, self.pool.entry(index)))
    }
}

/// A unit of transformation. Implementations declare their signatures at
/// registration time (before resolution) and are applied exactly once,
/// after all signatures across all registered patches have been resolved
/// together.
pub trait Patch {
    /// Short identifier, used as the key in the outcome map.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// The signatures this patch depends on. Collected once at resolution
    /// time; returning a signature not included here means the patch will
    /// see it unresolved.
    fn signatures(&self) -> Vec<Rc<Signature>>;

    /// The execution step. Runs after resolution, exactly once.
    fn apply(&self, ctx: &mut PatchContext) -> PatchResult;
}

/// One entry of the ordered outcome map returned by `apply_patches`.
#[derive(Debug)]
pub struct PatchReport {
    pub name: String,
    pub outcome: PatchResult,
}

impl PatchReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}
