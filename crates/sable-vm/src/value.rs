use crate::heap::Handle;

/// A runtime value.
///
/// Scalars are carried inline; everything else is a non-owning [`Handle`]
/// into the heap. The derived `PartialEq` compares object references by
/// identity; the language's structural equality lives in
/// [`Heap::values_equal`](crate::heap::Heap::values_equal) because it needs
/// to chase handles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Obj(Handle),
}

impl Value {
    /// Returns `true` if the value is [`Null`].
    ///
    /// [`Null`]: Value::Null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if the value is [`Int`].
    ///
    /// [`Int`]: Value::Int
    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(..))
    }

    pub fn as_int(&self) -> Option<i64> {
        if let Self::Int(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// Returns `true` if the value is [`Real`].
    ///
    /// [`Real`]: Value::Real
    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real(..))
    }

    /// Numeric view of the value, promoting integers.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns `true` if the value is [`Bool`].
    ///
    /// [`Bool`]: Value::Bool
    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(..))
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_obj(&self) -> Option<Handle> {
        if let Self::Obj(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// The only falsey values are `null` and `false`.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }
}
