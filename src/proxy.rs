/* Copy-on-write handles over class-pool entries. A proxy is bound to one  */
/* pool index for the whole session; the first mutable-access request      */
/* clones the original exactly once, and every holder of the same proxy    */
/* observes that clone afterwards.                                         */

use crate::types::ClassDef;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A proxy as shared between signatures, patches and the orchestrator.
pub type SharedProxy = Rc<RefCell<ClassProxy>>;

/// Copy-on-write handle over one class-pool entry.
///
/// Reads through [`ClassProxy::original`] never clone. The mutated clone
/// only exists after the first [`ClassProxy::for_mutation`] call; a proxy
/// that was never asked for mutable access contributes nothing at save
/// time.
#[derive(Debug)]
pub struct ClassProxy {
    index: usize,
    original: Rc<ClassDef>,
    mutated: Option<ClassDef>,
}

impl ClassProxy {
    pub(crate) fn new(index: usize, original: Rc<ClassDef>) -> ClassProxy {
        ClassProxy { index, original, mutated: None }
    }

    /// The pool index this proxy is bound to. Fixed at construction.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The unmodified class as loaded. Never clones.
    pub fn original(&self) -> &ClassDef {
        &self.original
    }

    /// True once a consumer has requested mutable access at least once.
    pub fn used(&self) -> bool {
        self.mutated.is_some()
    }

    /// The class as currently visible: the working clone if one exists,
    /// the original otherwise.
    pub fn view(&self) -> &ClassDef {
        match &self.mutated {
            Some(m) => m,
            None => &self.original,
        }
    }

    /// Mutable access to the working clone. The clone is created from the
    /// original on the first call and reused on every later call, so edits
    /// made by earlier patches stay visible to later ones.
    pub fn for_mutation(&mut self) -> &mut ClassDef {
        self.mutated
            .get_or_insert_with(|| (*self.original).clone())
    }

    pub(crate) fn mutated(&self) -> Option<&ClassDef> {
        self.mutated.as_ref()
    }
}

/// The session-wide proxy registry. Keyed by pool index, so any two
/// requests for "the proxy of class N" return the same object and at most
/// one proxy can ever exist per index. Iteration order is index order,
/// which keeps save-time reconciliation deterministic.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: BTreeMap<usize, SharedProxy>,
}

impl ProxyRegistry {
    pub fn new() -> ProxyRegistry {
        ProxyRegistry { proxies: BTreeMap::new() }
    }

    /// The proxy for the given pool index, creating it on first request.
    pub fn obtain(&mut self, index: usize, original: Rc<ClassDef>) -> SharedProxy {
        self.proxies
            .entry(index)
            .or_insert_with(|| Rc::new(RefCell::new(ClassProxy::new(index, original))))
            .clone()
    }

    pub fn get(&self, index: usize) -> Option<SharedProxy> {
        self.proxies.get(&index).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedProxy> {
        self.proxies.values()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
