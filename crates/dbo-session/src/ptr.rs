//! Object handles and the per-object state machine.
//!
//! Every mapped object lives in a [`MetaDbo`], which holds the object itself
//! (or nothing, until a lazy object is loaded), its id and version, and the
//! state flags the flush and transaction logic drive. [`Ptr`] is the shared
//! handle applications use; [`WeakPtr`] is the one-to-one counterpart of a
//! `belongs_to` held by another class.

use crate::collection::Collection;
use crate::db_action;
use crate::mapping;
use crate::persist::{Dbo, DboId};
use crate::{Session, SessionImpl};
use dbo_core::{Error, Result, SqlValue, Value};
use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

/// State flags of a [`MetaDbo`].
pub(crate) mod flags {
    /// A row for the object exists in a committed transaction.
    pub const PERSISTED: u16 = 0x001;
    pub const NEEDS_DELETE: u16 = 0x002;
    pub const NEEDS_SAVE: u16 = 0x004;
    /// The object is being flushed; breaks `belongs_to` cycles.
    pub const SAVING: u16 = 0x008;
    pub const DELETED_IN_TX: u16 = 0x010;
    pub const SAVED_IN_TX: u16 = 0x020;
    /// Deleted and committed, or removed before it was ever saved.
    pub const DELETED: u16 = 0x040;
    /// Listed in the active transaction's object list.
    pub const IN_TX: u16 = 0x080;
}

/// Lifecycle state of a mapped object as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Not associated with a session.
    Transient,
    /// Added to a session but not yet saved.
    New,
    /// In sync with the database as far as the session knows.
    Clean,
    /// Modified since it was loaded or saved.
    Dirty,
    /// Removed, or scheduled for removal.
    Deleted,
}

/// The type-erased interface the session uses to drive objects.
pub(crate) trait MetaDboBase {
    fn flush(&self) -> Result<()>;
    fn needs_insert(&self) -> bool;
    fn is_saving(&self) -> bool;
    /// Saved in a committed transaction or in the current one.
    fn is_persisted(&self) -> bool;
    fn set_dirty(&self);
    fn transaction_done(&self, success: bool);
    /// Forget unflushed changes and any loaded state.
    fn discard_changes(&self);
    fn id_value(&self) -> Value;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

pub(crate) struct MetaDbo<C: Dbo> {
    /// `None` while transient; a dead reference once the session is gone.
    session: RefCell<Option<Weak<SessionImpl>>>,
    state: Cell<u16>,
    id: RefCell<C::Id>,
    version: Cell<i32>,
    pub(crate) obj: RefCell<Option<C>>,
    this: Weak<MetaDbo<C>>,
}

impl<C: Dbo> MetaDbo<C> {
    pub(crate) fn new_transient(obj: C) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            session: RefCell::new(None),
            state: Cell::new(0),
            id: RefCell::new(C::Id::invalid()),
            version: Cell::new(-1),
            obj: RefCell::new(Some(obj)),
            this: this.clone(),
        })
    }

    /// A resident object known to exist in the database, not yet loaded.
    pub(crate) fn new_persisted(session: Weak<SessionImpl>, id: C::Id) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            session: RefCell::new(Some(session)),
            state: Cell::new(flags::PERSISTED),
            id: RefCell::new(id),
            version: Cell::new(-1),
            obj: RefCell::new(None),
            this: this.clone(),
        })
    }

    pub(crate) fn rc(&self) -> Option<Rc<Self>> {
        self.this.upgrade()
    }

    pub(crate) fn has_flag(&self, flag: u16) -> bool {
        self.state.get() & flag != 0
    }

    pub(crate) fn set_flag(&self, flag: u16) {
        self.state.set(self.state.get() | flag);
    }

    pub(crate) fn clear_flag(&self, flag: u16) {
        self.state.set(self.state.get() & !flag);
    }

    pub(crate) fn attach(&self, session: Weak<SessionImpl>) {
        *self.session.borrow_mut() = Some(session);
    }

    fn detach(&self) {
        *self.session.borrow_mut() = None;
    }

    pub(crate) fn session_impl_opt(&self) -> Option<Rc<SessionImpl>> {
        self.session.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// The owning session; fails for transient and orphaned objects.
    pub(crate) fn session_impl(&self) -> Result<Rc<SessionImpl>> {
        match self.session.borrow().as_ref() {
            None => Err(Error::usage("object is not associated with a session")),
            Some(weak) => weak
                .upgrade()
                .ok_or_else(|| Error::usage("object's session no longer exists")),
        }
    }

    pub(crate) fn id(&self) -> C::Id {
        self.id.borrow().clone()
    }

    pub(crate) fn set_id(&self, id: C::Id) {
        *self.id.borrow_mut() = id;
    }

    pub(crate) fn version(&self) -> i32 {
        self.version.get()
    }

    pub(crate) fn set_version(&self, version: i32) {
        self.version.set(version);
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.obj.try_borrow().map(|o| o.is_some()).unwrap_or(true)
    }

    pub(crate) fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let session = self.session_impl()?;
        mapping::load_into(&session, self)
    }

    pub(crate) fn state(&self) -> ObjectState {
        let state = self.state.get();
        if state & (flags::NEEDS_DELETE | flags::DELETED_IN_TX | flags::DELETED) != 0 {
            ObjectState::Deleted
        } else if self.session.borrow().is_none() {
            ObjectState::Transient
        } else if state & (flags::PERSISTED | flags::SAVED_IN_TX) == 0 {
            ObjectState::New
        } else if state & flags::NEEDS_SAVE != 0 {
            ObjectState::Dirty
        } else {
            ObjectState::Clean
        }
    }

    fn as_base(&self) -> Option<Rc<dyn MetaDboBase>> {
        self.rc().map(|rc| rc as Rc<dyn MetaDboBase>)
    }

    pub(crate) fn register(&self, session: &SessionImpl) {
        if let (Ok(mapping), Some(rc)) = (session.mapping::<C>(), self.rc()) {
            mapping.registry().insert(self.id(), &rc);
        }
    }

    pub(crate) fn unregister(&self, session: &SessionImpl) {
        if let Ok(mapping) = session.mapping::<C>() {
            mapping.registry().remove(&self.id(), self);
        }
    }
}

impl<C: Dbo> MetaDboBase for MetaDbo<C> {
    fn flush(&self) -> Result<()> {
        db_action::flush_object(self)
    }

    fn needs_insert(&self) -> bool {
        self.has_flag(flags::NEEDS_SAVE)
            && (self.has_flag(flags::DELETED_IN_TX)
                || !self.has_flag(flags::PERSISTED | flags::SAVED_IN_TX))
    }

    fn is_saving(&self) -> bool {
        self.has_flag(flags::SAVING)
    }

    fn is_persisted(&self) -> bool {
        self.has_flag(flags::PERSISTED | flags::SAVED_IN_TX) && !self.has_flag(flags::DELETED_IN_TX)
    }

    fn set_dirty(&self) {
        if self.has_flag(
            flags::NEEDS_SAVE | flags::NEEDS_DELETE | flags::DELETED_IN_TX | flags::DELETED,
        ) {
            return;
        }
        self.set_flag(flags::NEEDS_SAVE);
        if let (Some(session), Some(me)) = (self.session_impl_opt(), self.as_base()) {
            session.needs_flush(me);
        }
    }

    fn transaction_done(&self, success: bool) {
        let state = self.state.get();
        self.clear_flag(flags::IN_TX);
        let session = self.session_impl_opt();

        if success {
            if state & flags::DELETED_IN_TX != 0 {
                self.clear_flag(flags::DELETED_IN_TX | flags::SAVED_IN_TX | flags::PERSISTED);
                self.set_flag(flags::DELETED);
                self.set_id(C::Id::invalid());
                self.set_version(-1);
                self.detach();
            } else if state & flags::SAVED_IN_TX != 0 {
                self.clear_flag(flags::SAVED_IN_TX);
                self.set_flag(flags::PERSISTED);
                self.set_version(self.version() + 1);
            }
        } else {
            let persisted = state & flags::PERSISTED != 0;
            if state & flags::DELETED_IN_TX != 0 {
                self.clear_flag(flags::DELETED_IN_TX | flags::SAVED_IN_TX);
                if persisted {
                    self.set_flag(flags::NEEDS_DELETE);
                    if let Some(session) = &session {
                        self.register(session);
                        if let Some(me) = self.as_base() {
                            session.needs_flush(me);
                        }
                    }
                } else {
                    self.set_flag(flags::DELETED);
                    if C::SURROGATE_ID_FIELD.is_some() {
                        self.set_id(C::Id::invalid());
                    }
                }
            } else if state & flags::SAVED_IN_TX != 0 {
                self.clear_flag(flags::SAVED_IN_TX);
                self.set_flag(flags::NEEDS_SAVE);
                if let Some(session) = &session {
                    if !persisted {
                        self.unregister(session);
                        if C::SURROGATE_ID_FIELD.is_some() {
                            self.set_id(C::Id::invalid());
                        }
                    }
                    if let Some(me) = self.as_base() {
                        session.needs_flush(me);
                    }
                }
            }
        }

        if let Ok(mut obj) = self.obj.try_borrow_mut() {
            if let Some(obj) = obj.as_mut() {
                db_action::relations_transaction_done(obj, success);
            }
        }
    }

    fn discard_changes(&self) {
        if let (Some(session), Some(me)) = (self.session_impl_opt(), self.as_base()) {
            session.remove_dirty(&me);
        }
        if self.has_flag(flags::PERSISTED | flags::SAVED_IN_TX) {
            self.clear_flag(flags::NEEDS_SAVE | flags::NEEDS_DELETE);
            if let Ok(mut obj) = self.obj.try_borrow_mut() {
                *obj = None;
            }
        } else if self.has_flag(flags::NEEDS_SAVE) {
            // never saved: back to transient
            self.clear_flag(flags::NEEDS_SAVE);
            self.detach();
        }
    }

    fn id_value(&self) -> Value {
        self.id.borrow().to_value()
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<C: Dbo> Drop for MetaDbo<C> {
    fn drop(&mut self) {
        let Some(session) = self.session_impl_opt() else {
            return;
        };
        if let Ok(mapping) = session.mapping::<C>() {
            if let Ok(id) = self.id.try_borrow() {
                mapping.registry().remove(&id, self);
            }
        }
    }
}

// ============================================================================
// Ptr
// ============================================================================

/// A shared handle to a mapped object.
///
/// Clones refer to the same object; two pointers compare equal when they
/// refer to the same object (or are both null).
pub struct Ptr<C: Dbo> {
    meta: Option<Rc<MetaDbo<C>>>,
}

impl<C: Dbo> Ptr<C> {
    /// A transient object, not yet added to a session.
    pub fn new(obj: C) -> Self {
        Self {
            meta: Some(MetaDbo::new_transient(obj)),
        }
    }

    pub fn null() -> Self {
        Self { meta: None }
    }

    pub(crate) fn from_meta(meta: Rc<MetaDbo<C>>) -> Self {
        Self { meta: Some(meta) }
    }

    pub(crate) fn meta(&self) -> Option<&Rc<MetaDbo<C>>> {
        self.meta.as_ref()
    }

    fn require(&self) -> Result<&Rc<MetaDbo<C>>> {
        self.meta
            .as_ref()
            .ok_or_else(|| Error::usage("dereferencing a null pointer"))
    }

    pub fn is_null(&self) -> bool {
        self.meta.is_none()
    }

    /// Read access, loading the object first if needed.
    pub fn get(&self) -> Result<Ref<'_, C>> {
        let meta = self.require()?;
        meta.ensure_loaded()?;
        let obj = meta
            .obj
            .try_borrow()
            .map_err(|_| Error::usage("object is mutably borrowed"))?;
        Ref::filter_map(obj, Option::as_ref).map_err(|_| Error::usage("object is not loaded"))
    }

    /// Write access; marks the object dirty.
    pub fn modify(&self) -> Result<RefMut<'_, C>> {
        let meta = self.require()?;
        match meta.state() {
            ObjectState::Transient => {
                return Err(Error::usage("cannot modify a transient object"));
            }
            ObjectState::Deleted => return Err(Error::usage("cannot modify a deleted object")),
            _ => {}
        }
        meta.ensure_loaded()?;
        meta.set_dirty();
        let obj = meta
            .obj
            .try_borrow_mut()
            .map_err(|_| Error::usage("object is already borrowed"))?;
        RefMut::filter_map(obj, Option::as_mut).map_err(|_| Error::usage("object is not loaded"))
    }

    /// Run `f` on the loaded object without marking it dirty.
    pub(crate) fn with_obj_mut<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R> {
        let meta = self.require()?;
        meta.ensure_loaded()?;
        let mut obj = meta
            .obj
            .try_borrow_mut()
            .map_err(|_| Error::usage("object is already borrowed"))?;
        obj.as_mut()
            .map(f)
            .ok_or_else(|| Error::usage("object is not loaded"))
    }

    /// Schedule the object for deletion. A new object that was never saved
    /// is simply dropped from the session.
    pub fn remove(&self) -> Result<()> {
        let meta = self.require()?;
        if meta.state() == ObjectState::Deleted {
            return Ok(());
        }
        let session = meta.session_impl_opt();
        let base: Rc<dyn MetaDboBase> = meta.clone();
        if meta.has_flag(flags::PERSISTED | flags::SAVED_IN_TX) {
            meta.clear_flag(flags::NEEDS_SAVE);
            meta.set_flag(flags::NEEDS_DELETE);
            if let Some(session) = session {
                session.needs_flush(base);
            }
        } else {
            meta.clear_flag(flags::NEEDS_SAVE);
            meta.set_flag(flags::DELETED);
            if let Some(session) = session {
                session.remove_dirty(&base);
            }
        }
        Ok(())
    }

    /// Discard the loaded state; the next access reloads from the database.
    pub fn reread(&self) {
        if let Some(meta) = &self.meta {
            if meta.has_flag(flags::PERSISTED | flags::SAVED_IN_TX) {
                meta.discard_changes();
            }
        }
    }

    /// Flush the owning session. Does nothing for null and transient
    /// pointers.
    pub fn flush(&self) -> Result<()> {
        match self.meta.as_ref().and_then(|meta| meta.session_impl_opt()) {
            Some(session) => session.flush(),
            None => Ok(()),
        }
    }

    /// Save this object and its `belongs_to` targets now.
    pub(crate) fn flush_object(&self) -> Result<()> {
        match &self.meta {
            Some(meta) => meta.flush(),
            None => Ok(()),
        }
    }

    /// The object's id; the invalid id for null and unsaved objects.
    pub fn id(&self) -> C::Id {
        self.meta
            .as_ref()
            .map_or_else(C::Id::invalid, |meta| meta.id())
    }

    /// The version last committed to the database, or -1.
    pub fn version(&self) -> i32 {
        self.meta.as_ref().map_or(-1, |meta| meta.version())
    }

    pub fn state(&self) -> ObjectState {
        self.meta
            .as_ref()
            .map_or(ObjectState::Transient, |meta| meta.state())
    }

    pub fn is_loaded(&self) -> bool {
        self.meta.as_ref().is_some_and(|meta| meta.is_loaded())
    }

    pub fn session(&self) -> Option<Session> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.session_impl_opt())
            .map(Session::from_impl)
    }

    pub fn reset(&mut self) {
        self.meta = None;
    }
}

impl<C: Dbo> Clone for Ptr<C> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
        }
    }
}

impl<C: Dbo> Default for Ptr<C> {
    fn default() -> Self {
        Self::null()
    }
}

impl<C: Dbo> PartialEq for Ptr<C> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.meta, &other.meta) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<C: Dbo> Eq for Ptr<C> {}

impl<C: Dbo> Hash for Ptr<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.meta
            .as_ref()
            .map_or(std::ptr::null(), Rc::as_ptr)
            .hash(state);
    }
}

impl<C: Dbo> fmt::Debug for Ptr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.meta {
            None => write!(f, "Ptr(null)"),
            Some(meta) => f
                .debug_struct("Ptr")
                .field("id", &meta.id())
                .field("version", &meta.version())
                .field("state", &meta.state())
                .finish(),
        }
    }
}

// ============================================================================
// WeakPtr
// ============================================================================

/// The one side of a one-to-one relation: the single object of `C` whose
/// `belongs_to` refers to the owner.
pub struct WeakPtr<C: Dbo> {
    pub(crate) relation: Collection<Ptr<C>>,
}

impl<C: Dbo> WeakPtr<C> {
    pub fn new() -> Self {
        Self {
            relation: Collection::new(),
        }
    }

    /// The referencing object, if any.
    pub fn get(&self) -> Result<Option<Ptr<C>>> {
        let mut iter = self.relation.iter()?;
        let first = iter.next().transpose()?;
        if iter.next().transpose()?.is_some() {
            return Err(Error::NoUniqueResult {
                sql: self.relation.sql().unwrap_or_default(),
            });
        }
        Ok(first)
    }

    /// Point the relation at `value`: the previous object's `belongs_to` is
    /// cleared and `value`'s is set to the owner.
    pub fn set(&self, value: Option<Ptr<C>>) -> Result<()> {
        let current = self.get()?;
        if current == value {
            return Ok(());
        }
        if let Some(current) = current {
            self.relation.erase(&current)?;
        }
        if let Some(value) = value {
            self.relation.insert(value)?;
        }
        Ok(())
    }
}

impl<C: Dbo> Clone for WeakPtr<C> {
    fn clone(&self) -> Self {
        Self {
            relation: self.relation.clone(),
        }
    }
}

impl<C: Dbo> Default for WeakPtr<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Dbo> fmt::Debug for WeakPtr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPtr").finish_non_exhaustive()
    }
}
