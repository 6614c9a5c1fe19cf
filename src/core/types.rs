//! Native value kinds and function signatures.
//!
//! Every node in an expression tree produces a value of one [`ValueKind`].
//! Rust types are mapped onto kinds through [`NativeType`], and native
//! function pointer types through [`NativeFunction`], which lets call nodes
//! check their arguments against the callee's signature when they are built.

use std::fmt;

use super::register_file::RegBank;

/// Stable identity of a node, assigned in construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Machine-level kind of a value produced by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Data or code pointer.
    Ptr,
}

impl ValueKind {
    /// Register bank values of this kind live in.
    pub fn bank(self) -> RegBank {
        match self {
            ValueKind::F32 | ValueKind::F64 => RegBank::Xmm,
            _ => RegBank::GeneralPurpose,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::I32 => "i32",
            ValueKind::U32 => "u32",
            ValueKind::I64 => "i64",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// A Rust type that can be produced by a node and passed across the native
/// calling convention.
pub trait NativeType: Copy + 'static {
    const KIND: ValueKind;

    /// Raw bit pattern used when the value is embedded as an immediate.
    fn to_bits(self) -> u64;
}

/// Integer types usable with the arithmetic nodes.
pub trait IntegerType: NativeType {}

macro_rules! int_native_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl NativeType for $ty {
                const KIND: ValueKind = ValueKind::$kind;

                fn to_bits(self) -> u64 {
                    // Sign-extends signed values so 64-bit moves stay correct.
                    self as i64 as u64
                }
            }

            impl IntegerType for $ty {}
        )*
    };
}

int_native_type! {
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    isize => I64,
    usize => U64,
}

impl NativeType for f32 {
    const KIND: ValueKind = ValueKind::F32;

    fn to_bits(self) -> u64 {
        f32::to_bits(self) as u64
    }
}

impl NativeType for f64 {
    const KIND: ValueKind = ValueKind::F64;

    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }
}

impl<T: 'static> NativeType for *const T {
    const KIND: ValueKind = ValueKind::Ptr;

    fn to_bits(self) -> u64 {
        self as usize as u64
    }
}

impl<T: 'static> NativeType for *mut T {
    const KIND: ValueKind = ValueKind::Ptr;

    fn to_bits(self) -> u64 {
        self as usize as u64
    }
}

/// A native function pointer type with the System V C calling convention.
///
/// Implemented for `extern "C" fn(A0, ..) -> R` with up to eight parameters.
pub trait NativeFunction: NativeType {
    type Return: NativeType;

    /// Kinds of the declared parameters, in order.
    fn param_kinds() -> Vec<ValueKind>;

    /// Address of the function's code.
    fn address(self) -> u64;

    /// Reinterpret a code pointer as this function type.
    ///
    /// # Safety
    /// `code` must point to executable code that follows this signature and
    /// must stay mapped for as long as the returned pointer is called.
    unsafe fn from_code(code: *const u8) -> Self;
}

/// Most parameters a [`NativeFunction`] signature can declare.
pub const MAX_ARITY: usize = 8;

macro_rules! native_function {
    ($($param:ident),*) => {
        impl<R: NativeType, $($param: NativeType),*> NativeType for extern "C" fn($($param),*) -> R {
            const KIND: ValueKind = ValueKind::Ptr;

            fn to_bits(self) -> u64 {
                self as usize as u64
            }
        }

        impl<R: NativeType, $($param: NativeType),*> NativeFunction for extern "C" fn($($param),*) -> R {
            type Return = R;

            fn param_kinds() -> Vec<ValueKind> {
                vec![$($param::KIND),*]
            }

            fn address(self) -> u64 {
                self as usize as u64
            }

            unsafe fn from_code(code: *const u8) -> Self {
                std::mem::transmute_copy::<*const u8, Self>(&code)
            }
        }
    };
}

native_function!();
native_function!(A0);
native_function!(A0, A1);
native_function!(A0, A1, A2);
native_function!(A0, A1, A2, A3);
native_function!(A0, A1, A2, A3, A4);
native_function!(A0, A1, A2, A3, A4, A5);
native_function!(A0, A1, A2, A3, A4, A5, A6);
native_function!(A0, A1, A2, A3, A4, A5, A6, A7);
