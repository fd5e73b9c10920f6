/* The patcher orchestrator: owns the class pool and the proxy registry,  */
/* sequences load → resolve → apply → save, and folds proxy mutations     */
/* back into the pool at save time.                                       */

use crate::container::codec::{output_name, ClassContainer};
use crate::container::opcodes::OpcodeProfile;
use crate::patch::{Patch, PatchContext, PatchError, PatchReport};
use crate::proxy::ProxyRegistry;
use crate::signatures::{resolve_all, Signature};
use crate::types::{ClassDef, PatcherError};
use log::{debug, info, warn};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// Upper bound of classes per output container, after which `save` starts
/// a new numbered output (classes.cpc, classes2.cpc, ...).
pub const MAX_CLASSES_PER_CONTAINER: usize = 65536;

/// The ordered class pool of one patcher session. Entries are reference
/// counted so proxies can read them without deep-cloning; indexes are
/// stable from load until the session ends.
#[derive(Debug, Default)]
pub struct ClassPool {
    entries: Vec<Rc<ClassDef>>,
}

impl ClassPool {
    fn from_classes(classes: Vec<ClassDef>) -> ClassPool {
        ClassPool {
            entries: classes.into_iter().map(Rc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassDef> {
        self.entries.iter().map(|rc| rc.as_ref())
    }

    pub fn get(&self, index: usize) -> Option<&ClassDef> {
        self.entries.get(index).map(|rc| rc.as_ref())
    }

    /// Pool index of the class with the given JNI descriptor.
    pub fn index_of(&self, jni_type: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|c| c.name.as_jni_type() == jni_type)
    }

    /// Shared handle to a pool entry for proxy construction.
    pub(crate) fn entry(&self, index: usize) -> Rc<ClassDef> {
        self.entries[index].clone()
    }

    fn push(&mut self, class: ClassDef) {
        self.entries.push(Rc::new(class));
    }

    fn replace(&mut self, index: usize, class: ClassDef) {
        self.entries[index] = Rc::new(class);
    }
}

#[derive(Debug, PartialEq)]
enum SessionState {
    Loaded,
    Resolved,
    Applied,
}

/// Orchestrates one patching session over a loaded class pool.
///
/// # Examples
///
/// ```no_run
/// use dexpatch::patcher::Patcher;
/// use std::fs;
///
/// let bytes = fs::read("classes.cpc").unwrap();
/// let mut patcher = Patcher::from_bytes(&bytes).unwrap();
/// patcher.resolve_signatures().unwrap();
/// let reports = patcher.apply_patches(false, |name| println!("applying {name}")).unwrap();
/// for r in &reports {
///     println!("{}: {}", r.name, if r.succeeded() { "ok" } else { "failed" });
/// }
/// let outputs = patcher.save().unwrap();
/// for (name, bytes) in outputs {
///     fs::write(&name, bytes).unwrap();
/// }
/// ```
pub struct Patcher {
    pool: ClassPool,
    profile: OpcodeProfile,
    registry: ProxyRegistry,
    patches: Vec<Box<dyn Patch>>,
    signatures: Vec<Rc<Signature>>,
    state: SessionState,
}

impl Patcher {
    /// Starts a session from one input container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Patcher, PatcherError> {
        let container = ClassContainer::from_bytes(bytes)?;
        Ok(Patcher::from_container(container))
    }

    pub fn from_container(container: ClassContainer) -> Patcher {
        info!(
            "session loaded: {} classes, api {}",
            container.classes.len(),
            container.profile.api_level
        );
        Patcher {
            pool: ClassPool::from_classes(container.classes),
            profile: container.profile,
            registry: ProxyRegistry::new(),
            patches: vec![],
            signatures: vec![],
            state: SessionState::Loaded,
        }
    }

    pub fn pool(&self) -> &ClassPool {
        &self.pool
    }

    pub fn profile(&self) -> OpcodeProfile {
        self.profile
    }

    /// Merges additional containers into the pool, one container at a
    /// time, preserving per-container class order. For an incoming class
    /// whose type already exists: overwrite in place when its descriptor
    /// is in `allowed_overwrites`, raise a duplicate-class error when
    /// `throw_on_duplicates` is set, and silently keep the original
    /// otherwise. A container that raises leaves the pool untouched by
    /// that container; containers merged before it stay merged.
    pub fn add_files(
        &mut self,
        containers: &[Vec<u8>],
        allowed_overwrites: &HashSet<String>,
        throw_on_duplicates: bool,
    ) -> Result<(), PatcherError> {
        if self.state != SessionState::Loaded {
            return Err(PatcherError::invalid_state(
                "containers can only be merged before signature resolution",
            ));
        }

        for bytes in containers {
            let container = ClassContainer::from_bytes(bytes)?;
            if container.profile != self.profile {
                warn!(
                    "merging container with api {} into session with api {}",
                    container.profile.api_level, self.profile.api_level
                );
            }

            // Stage against a copy so a duplicate-class error leaves the
            // pool untouched by this container.
            let mut staged = ClassPool {
                entries: self.pool.entries.clone(),
            };
            for class in container.classes {
                let desc = class.name.as_jni_type();
                match staged.index_of(&desc) {
                    Some(index) => {
                        if allowed_overwrites.contains(&desc) {
                            debug!("merge: overwriting {desc} at index {index}");
                            staged.replace(index, class);
                        } else if throw_on_duplicates {
                            return Err(PatcherError::duplicate_class(&desc));
                        } else {
                            debug!("merge: keeping existing {desc}, incoming copy skipped");
                        }
                    }
                    None => {
                        debug!("merge: appending {desc}");
                        staged.push(class);
                    }
                }
            }
            self.pool = staged;
        }

        info!("pool now holds {} classes", self.pool.len());
        Ok(())
    }

    /// Registers patches. Their signatures are collected at resolution
    /// time; each patch is executed exactly once, in registration order.
    /// Registration closes once signatures are resolved, so every patch
    /// that runs had its signatures included in the resolution pass.
    pub fn add_patches(&mut self, patches: Vec<Box<dyn Patch>>) -> Result<(), PatcherError> {
        if self.state != SessionState::Loaded {
            return Err(PatcherError::invalid_state(
                "patches can only be registered before signature resolution",
            ));
        }
        self.patches.extend(patches);
        Ok(())
    }

    /// Resolves the signatures of every registered patch against the pool
    /// in one pass. Valid once per session, and only before patches run.
    pub fn resolve_signatures(&mut self) -> Result<Vec<Rc<Signature>>, PatcherError> {
        if self.state != SessionState::Loaded {
            return Err(PatcherError::invalid_state("signatures already resolved"));
        }

        let mut signatures: Vec<Rc<Signature>> = vec![];
        for patch in &self.patches {
            for signature in patch.signatures() {
                // the same Rc may be shared between patches
                if !signatures.iter().any(|s| Rc::ptr_eq(s, &signature)) {
                    signatures.push(signature);
                }
            }
        }

        resolve_all(&self.pool, &mut self.registry, &signatures)?;
        self.signatures = signatures.clone();
        self.state = SessionState::Resolved;
        Ok(signatures)
    }

    /// Runs every registered patch in registration order. Each execution
    /// is reported through `progress` first, then run with its outcome
    /// captured — a failing or panicking patch never aborts the pipeline
    /// unless `stop_on_error` is set, in which case iteration halts after
    /// recording the first failure and later patches do not appear in the
    /// result at all.
    pub fn apply_patches(
        &mut self,
        stop_on_error: bool,
        mut progress: impl FnMut(&str),
    ) -> Result<Vec<PatchReport>, PatcherError> {
        if self.state != SessionState::Resolved {
            return Err(PatcherError::invalid_state(
                "patches can only be applied once, after signature resolution",
            ));
        }

        let mut reports = Vec::with_capacity(self.patches.len());
        for patch in &self.patches {
            progress(patch.name());
            debug!("applying patch '{}'", patch.name());

            let mut ctx = PatchContext::new(&self.pool, &mut self.registry, self.profile);
            let outcome = match catch_unwind(AssertUnwindSafe(|| patch.apply(&mut ctx))) {
                Ok(outcome) => outcome,
                Err(panic) => Err(PatchError::new(&panic_message(panic))),
            };

            let failed = outcome.is_err();
            if let Err(e) = &outcome {
                warn!("patch '{}' failed: {}", patch.name(), e);
            }
            reports.push(PatchReport {
                name: patch.name().to_string(),
                outcome,
            });

            if failed && stop_on_error {
                warn!("stopping after first failure as requested");
                break;
            }
        }

        self.state = SessionState::Applied;
        info!(
            "applied {}/{} patches successfully",
            reports.iter().filter(|r| r.succeeded()).count(),
            reports.len()
        );
        Ok(reports)
    }

    /// Reconciles every mutated proxy back into the pool and serializes
    /// the result, splitting over numbered outputs when the pool exceeds
    /// [`MAX_CLASSES_PER_CONTAINER`].
    pub fn save(&mut self) -> Result<BTreeMap<String, Vec<u8>>, PatcherError> {
        self.save_with_limit(MAX_CLASSES_PER_CONTAINER)
    }

    pub fn save_with_limit(
        &mut self,
        classes_per_container: usize,
    ) -> Result<BTreeMap<String, Vec<u8>>, PatcherError> {
        if classes_per_container == 0 {
            return Err(PatcherError::invalid_state(
                "classes_per_container must be at least 1",
            ));
        }

        // Fold mutated proxies back into the pool. The registry holds at
        // most one proxy per index, visited in index order.
        let mut replacements: Vec<(usize, ClassDef)> = vec![];
        for proxy in self.registry.iter() {
            let p = proxy.borrow();
            if let Some(mutated) = p.mutated() {
                replacements.push((p.index(), mutated.clone()));
            }
        }
        // Second pass over per-signature proxies. Idempotent: a resolved
        // signature's proxy is the registry's proxy for that index.
        for signature in &self.signatures {
            if let Some(result) = signature.result() {
                let p = result.proxy.borrow();
                if let Some(mutated) = p.mutated() {
                    if !replacements.iter().any(|(i, _)| *i == p.index()) {
                        replacements.push((p.index(), mutated.clone()));
                    }
                }
            }
        }
        let mutated_count = replacements.len();
        for (index, class) in replacements {
            debug!(
                "reconciling {} at index {}",
                class.name.as_jni_type(),
                index
            );
            self.pool.replace(index, class);
        }

        let mut outputs = BTreeMap::new();
        let classes: Vec<ClassDef> = self.pool.iter().cloned().collect();
        for (i, chunk) in classes.chunks(classes_per_container).enumerate() {
            let container = ClassContainer {
                profile: self.profile,
                classes: chunk.to_vec(),
            };
            outputs.insert(output_name(i), container.to_bytes()?);
        }

        info!(
            "saved {} classes ({} mutated) into {} container(s)",
            self.pool.len(),
            mutated_count,
            outputs.len()
        );
        Ok(outputs)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("patch panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("patch panicked: {s}")
    } else {
        "patch panicked".to_string()
    }
}
