//! Scopes: variable tables and translation maps keyed by an integer id.
//!
//! A [`Scope`] links to its parent (the defining scope for function calls),
//! so variable lookup walks the parent chain.  The [`ScopeTable`] maps ids to
//! weak handles; this is how a [`VarPointer`](super::value::VarPointer)
//! finds its slot again, and how it notices the slot's scope is gone.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use super::value::DataObject;

pub type ScopeId = usize;
pub type ScopeRef = Rc<RefCell<Scope>>;

/// Id of the module-level scope, which lives as long as the interpreter.
pub const MODULE_SCOPE: ScopeId = 0;

#[derive(Debug)]
pub struct Scope {
    id: ScopeId,
    parent: Option<ScopeRef>,
    vars: HashMap<String, DataObject>,
    translations: BTreeMap<String, String>,
    errno: i32,
}

impl Scope {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn parent(&self) -> Option<&ScopeRef> {
        self.parent.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&DataObject> {
        self.vars.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DataObject> {
        self.vars.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Bind `name` unconditionally (no final or constraint checks).
    pub fn insert(&mut self, name: impl Into<String>, data: DataObject) {
        self.vars.insert(name.into(), data);
    }

    pub fn remove(&mut self, name: &str) -> Option<DataObject> {
        self.vars.remove(name)
    }

    pub fn var_names(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    pub fn vars(&self) -> impl Iterator<Item = (&String, &DataObject)> {
        self.vars.iter()
    }

    pub fn translations(&self) -> &BTreeMap<String, String> {
        &self.translations
    }

    pub fn translations_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.translations
    }

    pub fn errno(&self) -> i32 {
        self.errno
    }

    pub fn set_errno(&mut self, code: i32) {
        self.errno = code;
    }

    /// Read and clear, as `$LANG_ERRNO` does.
    pub fn take_errno(&mut self) -> i32 {
        std::mem::take(&mut self.errno)
    }
}

/// Walk `scope` and its ancestors; return the first scope that binds `name`.
pub fn find_defining(scope: &ScopeRef, name: &str) -> Option<ScopeRef> {
    let mut cur = Some(scope.clone());
    while let Some(s) = cur {
        if s.borrow().contains(name) {
            return Some(s);
        }
        cur = s.borrow().parent.clone();
    }
    None
}

/// Look `name` up through the parent chain, cloning the slot.
pub fn lookup(scope: &ScopeRef, name: &str) -> Option<DataObject> {
    find_defining(scope, name).and_then(|s| s.borrow().get(name).cloned())
}

// ── Scope table ───────────────────────────────────────────────────────────────

/// Allocates scope ids and resolves them back to live scopes.
#[derive(Debug, Default)]
pub struct ScopeTable {
    next_id: ScopeId,
    scopes: HashMap<ScopeId, Weak<RefCell<Scope>>>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, parent: Option<ScopeRef>) -> ScopeRef {
        let id = self.next_id;
        self.next_id += 1;
        if self.scopes.len() >= 256 && self.scopes.len().is_power_of_two() {
            self.scopes.retain(|_, w| w.strong_count() > 0);
        }
        let scope = Rc::new(RefCell::new(Scope {
            id,
            parent,
            vars: HashMap::new(),
            translations: BTreeMap::new(),
            errno: 0,
        }));
        self.scopes.insert(id, Rc::downgrade(&scope));
        scope
    }

    /// The live scope with `id`, or `None` once it has been torn down.
    pub fn get(&self, id: ScopeId) -> Option<ScopeRef> {
        self.scopes.get(&id).and_then(Weak::upgrade)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_from_module_scope() {
        let mut table = ScopeTable::new();
        let root = table.create(None);
        let child = table.create(Some(root.clone()));
        assert_eq!(root.borrow().id(), MODULE_SCOPE);
        assert_eq!(child.borrow().id(), 1);
    }

    #[test]
    fn lookup_walks_parents() {
        let mut table = ScopeTable::new();
        let root = table.create(None);
        root.borrow_mut().insert("$x", DataObject::int(1));
        let child = table.create(Some(root.clone()));
        assert_eq!(lookup(&child, "$x").unwrap().int(), 1);
        assert!(lookup(&child, "$y").is_none());

        child.borrow_mut().insert("$x", DataObject::int(2));
        assert_eq!(lookup(&child, "$x").unwrap().int(), 2);
        assert_eq!(lookup(&root, "$x").unwrap().int(), 1);
    }

    #[test]
    fn dropped_scope_is_unreachable() {
        let mut table = ScopeTable::new();
        let root = table.create(None);
        let child = table.create(Some(root));
        let id = child.borrow().id();
        assert!(table.get(id).is_some());
        drop(child);
        assert!(table.get(id).is_none());
    }

    #[test]
    fn errno_is_read_and_clear() {
        let mut table = ScopeTable::new();
        let s = table.create(None);
        s.borrow_mut().set_errno(13);
        assert_eq!(s.borrow_mut().take_errno(), 13);
        assert_eq!(s.borrow().errno(), 0);
    }
}
