//! Value locations.
//!
//! A [`Storage`] names where a value currently lives: a register, a slot in
//! the stack frame, or an immediate constant. An owned storage holds its
//! register or slot until it is handed back to the expression tree with
//! `ExpressionTree::release`, which consumes it so a released storage cannot
//! be read again. Storages handed out from a shared node's cache are
//! borrowed: releasing them is a no-op, the tree keeps the location alive
//! until the compilation ends.

use std::fmt;
use std::marker::PhantomData;

use super::register_file::AsmReg;
use super::types::{NativeType, ValueKind};

/// Where a value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Held in a machine register.
    Register(AsmReg),
    /// Held in the stack frame at this offset from the frame pointer.
    Stack(i32),
    /// Known constant bit pattern.
    Immediate(u64),
}

impl Location {
    pub fn register(&self) -> Option<AsmReg> {
        match *self {
            Location::Register(reg) => Some(reg),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(reg) => write!(f, "{reg}"),
            Location::Stack(offset) => write!(f, "[rbp{offset:+}]"),
            Location::Immediate(bits) => write!(f, "imm {bits:#x}"),
        }
    }
}

/// Untyped storage used inside code generation, where node result types are
/// only known as [`ValueKind`]s.
#[derive(Debug, PartialEq, Eq)]
pub struct RawStorage {
    location: Location,
    kind: ValueKind,
    owned: bool,
}

impl RawStorage {
    /// Storage that owns its register or slot.
    pub(crate) fn owned(location: Location, kind: ValueKind) -> Self {
        Self { location, kind, owned: true }
    }

    /// Storage that refers to a location owned elsewhere.
    pub(crate) fn borrowed(location: Location, kind: ValueKind) -> Self {
        Self { location, kind, owned: false }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Whether releasing this storage returns a register or slot to the pool.
    pub fn is_owned(&self) -> bool {
        self.owned
            && matches!(self.location, Location::Register(_) | Location::Stack(_))
    }

    pub fn register(&self) -> Option<AsmReg> {
        self.location.register()
    }

    /// A borrowed view of the same location.
    pub(crate) fn share(&self) -> RawStorage {
        RawStorage::borrowed(self.location, self.kind)
    }

    pub(crate) fn relocate(&mut self, location: Location, owned: bool) {
        self.location = location;
        self.owned = owned;
    }

    pub(crate) fn typed<T: NativeType>(self) -> Storage<T> {
        debug_assert_eq!(self.kind, T::KIND, "storage kind does not match its type");
        Storage { raw: self, _type: PhantomData }
    }
}

/// Typed location of a value of Rust type `T`.
#[derive(Debug, PartialEq, Eq)]
pub struct Storage<T> {
    raw: RawStorage,
    _type: PhantomData<fn() -> T>,
}

impl<T> Storage<T> {
    pub fn location(&self) -> Location {
        self.raw.location
    }

    pub fn kind(&self) -> ValueKind {
        self.raw.kind
    }

    pub fn is_owned(&self) -> bool {
        self.raw.is_owned()
    }

    pub fn register(&self) -> Option<AsmReg> {
        self.raw.register()
    }

    pub(crate) fn into_raw(self) -> RawStorage {
        self.raw
    }
}
