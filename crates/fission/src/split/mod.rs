//! The split-type contract: how values are partitioned into index ranges and
//! how partial results are recombined.
//!
//! Built-in strategies are a closed set of variants on [`SplitType`];
//! libraries plug in their own strategies through the [`SplitApi`] capability
//! interface. Generic placeholders unify with concrete types during graph
//! inference via [`SplitType::sync`].

mod generic;

pub use generic::GenericType;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// Errors raised by split-type operations and unification.
#[derive(Debug, Error)]
pub enum SplitTypeError {
    /// Two concrete split types failed to unify at a dependency boundary.
    #[error("could not sync split types {left} and {right}")]
    Mismatch { left: String, right: String },
    /// A generic placeholder survived inference without a concrete type.
    #[error("generic split type {name} was never assigned a concrete type")]
    Unresolved { name: String },
    /// An operation was requested on a type that does not support it.
    #[error("{op} is not supported by split type {ty}")]
    Unsupported { op: &'static str, ty: String },
    /// A splitter or combiner failed while processing data.
    #[error("split execution failure: {message}")]
    Execution { message: String },
}

impl SplitTypeError {
    pub fn mismatch(left: &SplitType, right: impl fmt::Display) -> Self {
        SplitTypeError::Mismatch {
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    pub fn unsupported(op: &'static str, ty: &SplitType) -> Self {
        SplitTypeError::Unsupported {
            op,
            ty: ty.to_string(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        SplitTypeError::Execution {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by split-type routines.
pub type SplitResult<T> = Result<T, SplitTypeError>;

/// Number of elements a splitter will emit for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elements {
    /// The value partitions into exactly this many elements.
    Count(usize),
    /// The value re-emits whole for any requested range (broadcast and
    /// friends). Compatible with any finite count.
    Unbounded,
}

/// Result of applying a splitter to one index range.
pub enum SplitChunk {
    /// The piece covering the requested range.
    Piece(Value),
    /// The source is exhausted before this range; the worker loop stops.
    Stop,
    /// An incremental cursor that yields one piece per batch.
    Stream(Box<dyn SplitStream>),
}

/// Explicit cursor for splitters that produce pieces incrementally.
///
/// The driver advances the cursor once per batch. Within one worker the
/// ranges passed to `next_piece` are strictly increasing, so cursors may keep
/// incremental state.
pub trait SplitStream: Send {
    /// Produces the piece covering `[start, end)`, or `None` when the source
    /// is exhausted.
    fn next_piece(&mut self, start: usize, end: usize) -> SplitResult<Option<Value>>;
}

/// Capability interface implemented by library-provided split strategies.
///
/// Identity is structural: two extension types are the same strategy when
/// they report the same `name` and `fingerprint`.
pub trait SplitApi: Send + Sync + fmt::Debug {
    /// Declared name of the strategy; its type identity.
    fn name(&self) -> &'static str;

    /// Hash of the configuration fields that participate in type equality.
    fn fingerprint(&self) -> u64 {
        0
    }

    /// Materializes the piece of `value` covering `[start, end)`.
    fn split(&self, start: usize, end: usize, value: &Value) -> SplitResult<SplitChunk>;

    /// Merges partial pieces back into a single value.
    ///
    /// Must be associative and insensitive to how pieces were grouped across
    /// workers. Returning `None` signals that the value needs no merge (for
    /// example a buffer mutated in place through shared views).
    fn combine(&self, pieces: Vec<Value>) -> SplitResult<Option<Value>>;

    /// Element count driving partitioning, or [`Elements::Unbounded`] when
    /// any range is acceptable.
    fn elements(&self, value: &Value) -> SplitResult<Elements>;
}

/// A value-partitioning strategy attached to one argument or return slot.
#[derive(Debug, Clone)]
pub enum SplitType {
    /// Unsplittable: every worker receives the whole value.
    Broadcast,
    /// Placeholder unified to a concrete type during inference.
    Generic(GenericType),
    /// Library-provided strategy implementing [`SplitApi`].
    Extension(Arc<dyn SplitApi>),
}

impl SplitType {
    /// A fresh generic placeholder with the given annotation-local name.
    pub fn generic(name: impl Into<String>) -> Self {
        SplitType::Generic(GenericType::new(name))
    }

    /// Wraps a [`SplitApi`] implementation.
    pub fn extension(api: impl SplitApi + 'static) -> Self {
        SplitType::Extension(Arc::new(api))
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, SplitType::Generic(_))
    }

    /// Materializes the piece of `value` covering `[start, end)`.
    pub fn split(&self, start: usize, end: usize, value: &Value) -> SplitResult<SplitChunk> {
        match self {
            SplitType::Broadcast => Ok(SplitChunk::Piece(value.clone())),
            SplitType::Generic(_) => Err(SplitTypeError::unsupported("split", self)),
            SplitType::Extension(api) => api.split(start, end, value),
        }
    }

    /// Merges partial pieces back into a single value.
    pub fn combine(&self, pieces: Vec<Value>) -> SplitResult<Option<Value>> {
        match self {
            SplitType::Broadcast => Ok(pieces.into_iter().next()),
            SplitType::Generic(_) => Err(SplitTypeError::unsupported("combine", self)),
            SplitType::Extension(api) => api.combine(pieces),
        }
    }

    /// Element count this value contributes to partitioning.
    pub fn elements(&self, value: &Value) -> SplitResult<Elements> {
        match self {
            SplitType::Broadcast => Ok(Elements::Unbounded),
            SplitType::Generic(_) => Err(SplitTypeError::unsupported("elements", self)),
            SplitType::Extension(api) => api.elements(value),
        }
    }

    /// Enforces that two types agree, resolving generic placeholders, and
    /// reports whether either side changed.
    ///
    /// Both sides may be rewritten: an unresolved generic adopts a clone of
    /// the other side's concrete type. Resolution happens at most once per
    /// placeholder; a later disagreement is a [`SplitTypeError::Mismatch`].
    pub(crate) fn sync(&mut self, other: &mut SplitType) -> SplitResult<bool> {
        match (&mut *self, &mut *other) {
            (SplitType::Generic(left), SplitType::Generic(right)) => {
                match (left.resolved().cloned(), right.resolved().cloned()) {
                    (Some(lc), Some(rc)) => lc.check_equal(&rc),
                    (Some(lc), None) => {
                        right.resolve(lc);
                        Ok(true)
                    }
                    (None, Some(rc)) => {
                        left.resolve(rc);
                        Ok(true)
                    }
                    (None, None) => Ok(false),
                }
            }
            (SplitType::Generic(left), concrete) => match left.resolved().cloned() {
                Some(lc) => lc.check_equal(concrete),
                None => {
                    left.resolve(concrete.clone());
                    Ok(true)
                }
            },
            (concrete, SplitType::Generic(right)) => match right.resolved().cloned() {
                Some(rc) => concrete.check_equal(&rc),
                None => {
                    right.resolve(concrete.clone());
                    Ok(true)
                }
            },
            (left, right) => left.check_equal(right),
        }
    }

    /// Checks structural equality of two concrete types; a disagreement is a
    /// unification failure.
    fn check_equal(&self, other: &SplitType) -> SplitResult<bool> {
        if self == other {
            Ok(false)
        } else {
            Err(SplitTypeError::mismatch(self, other))
        }
    }

    /// The concrete type this slot settles on after inference.
    pub(crate) fn finalized(&self) -> SplitResult<SplitType> {
        match self {
            SplitType::Generic(generic) => match generic.resolved() {
                Some(ty) => Ok(ty.clone()),
                None => Err(SplitTypeError::Unresolved {
                    name: generic.name().to_string(),
                }),
            },
            other => Ok(other.clone()),
        }
    }
}

impl PartialEq for SplitType {
    /// Structural equality of concrete types. Generic placeholders never
    /// compare equal; they are reconciled through [`SplitType::sync`].
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SplitType::Broadcast, SplitType::Broadcast) => true,
            (SplitType::Extension(left), SplitType::Extension(right)) => {
                left.name() == right.name() && left.fingerprint() == right.fingerprint()
            }
            _ => false,
        }
    }
}

impl fmt::Display for SplitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitType::Broadcast => write!(f, "broadcast"),
            SplitType::Generic(generic) => write!(f, "{generic}"),
            SplitType::Extension(api) => write!(f, "{}", api.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Stub {
        name: &'static str,
        fields: u64,
    }

    impl SplitApi for Stub {
        fn name(&self) -> &'static str {
            self.name
        }

        fn fingerprint(&self) -> u64 {
            self.fields
        }

        fn split(&self, _start: usize, _end: usize, value: &Value) -> SplitResult<SplitChunk> {
            Ok(SplitChunk::Piece(value.clone()))
        }

        fn combine(&self, pieces: Vec<Value>) -> SplitResult<Option<Value>> {
            Ok(pieces.into_iter().next())
        }

        fn elements(&self, _value: &Value) -> SplitResult<Elements> {
            Ok(Elements::Count(0))
        }
    }

    fn stub(name: &'static str, fields: u64) -> SplitType {
        SplitType::extension(Stub { name, fields })
    }

    #[test]
    fn extension_equality_is_structural() {
        assert_eq!(stub("rows", 1), stub("rows", 1));
        assert_ne!(stub("rows", 1), stub("rows", 2));
        assert_ne!(stub("rows", 1), stub("cols", 1));
        assert_ne!(stub("rows", 1), SplitType::Broadcast);
    }

    #[test]
    fn concrete_sync_requires_equality() {
        let mut left = stub("rows", 1);
        let mut right = stub("rows", 1);
        assert!(!left.sync(&mut right).unwrap());

        let mut other = stub("cols", 1);
        assert!(matches!(
            left.sync(&mut other),
            Err(SplitTypeError::Mismatch { .. })
        ));
    }

    #[test]
    fn unresolved_generic_adopts_concrete() {
        let mut generic = SplitType::generic("A");
        let mut concrete = stub("rows", 7);
        assert!(generic.sync(&mut concrete).unwrap());
        assert_eq!(generic.finalized().unwrap(), stub("rows", 7));
        // A second sync against the same concrete type is a no-op.
        assert!(!generic.sync(&mut concrete).unwrap());
    }

    #[test]
    fn resolved_generic_rejects_conflicting_concrete() {
        let mut generic = SplitType::generic("A");
        let mut rows = stub("rows", 0);
        generic.sync(&mut rows).unwrap();

        let mut cols = stub("cols", 0);
        assert!(matches!(
            generic.sync(&mut cols),
            Err(SplitTypeError::Mismatch { .. })
        ));
    }

    #[test]
    fn generic_pair_propagates_resolution_both_ways() {
        let mut resolved = SplitType::generic("A");
        let mut rows = stub("rows", 0);
        resolved.sync(&mut rows).unwrap();

        let mut blank = SplitType::generic("A");
        assert!(resolved.sync(&mut blank).unwrap());
        assert_eq!(blank.finalized().unwrap(), stub("rows", 0));

        let mut blank_left = SplitType::generic("B");
        assert!(blank_left.sync(&mut resolved).unwrap());
        assert_eq!(blank_left.finalized().unwrap(), stub("rows", 0));
    }

    #[test]
    fn two_unresolved_generics_do_nothing() {
        let mut left = SplitType::generic("A");
        let mut right = SplitType::generic("A");
        assert!(!left.sync(&mut right).unwrap());
        assert!(matches!(
            left.finalized(),
            Err(SplitTypeError::Unresolved { .. })
        ));
    }

    #[test]
    fn broadcast_reemits_whole_values() {
        let payload = crate::value(41_u64);
        let ty = SplitType::Broadcast;
        match ty.split(10, 20, &payload).unwrap() {
            SplitChunk::Piece(piece) => {
                assert!(crate::value::same_value(&piece, &payload));
            }
            _ => panic!("broadcast must re-emit the whole value"),
        }
        assert_eq!(ty.elements(&payload).unwrap(), Elements::Unbounded);
        assert!(ty.combine(Vec::new()).unwrap().is_none());
    }
}
