//! Annotation templates binding wrapped functions to split types.
//!
//! An [`Annotation`] declares, once per function, how each positional and
//! keyword argument and the return value can be partitioned, and which
//! arguments the function mutates in place. [`Annotated`] pairs a kernel with
//! its template; calling it registers a lazy node instead of executing.

use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::graph::{ArgValue, LazyHandle, TaskGraph};
use crate::split::{SplitResult, SplitType};
use crate::value::Kernel;

/// A positional or keyword split type in an annotation, optionally marked
/// mutable.
#[derive(Debug, Clone)]
pub enum ArgType {
    Plain(SplitType),
    Mut(SplitType),
}

impl From<SplitType> for ArgType {
    fn from(ty: SplitType) -> Self {
        ArgType::Plain(ty)
    }
}

/// Marks an annotated argument as mutated in place by the function.
///
/// Mutation participates in dependency wiring: a later call whose arguments
/// alias a mutated value is ordered after the mutating call even without a
/// direct data edge.
pub fn mutated(ty: SplitType) -> ArgType {
    ArgType::Mut(ty)
}

/// Addresses one split-type slot within an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeSlot {
    Arg(usize),
    Kwarg(usize),
    Return,
}

/// Split-type annotation for one wrapped function.
///
/// Templates are immutable from the caller's point of view; every
/// registration clones the template so generic resolution never leaks across
/// unrelated calls to the same function.
#[derive(Debug, Clone)]
pub struct Annotation {
    arg_types: Vec<SplitType>,
    kwarg_types: Vec<(String, SplitType)>,
    return_type: Option<SplitType>,
    mutable_args: Vec<usize>,
    mutable_kwargs: Vec<String>,
}

impl Annotation {
    /// Builds an annotation from per-argument split types.
    ///
    /// Keyword arguments omitted here but passed at call time default to
    /// [`SplitType::Broadcast`].
    pub fn new(
        args: Vec<ArgType>,
        kwargs: Vec<(&str, ArgType)>,
        return_type: Option<SplitType>,
    ) -> Self {
        let mut mutable_args = Vec::new();
        let arg_types = args
            .into_iter()
            .enumerate()
            .map(|(index, arg)| match arg {
                ArgType::Plain(ty) => ty,
                ArgType::Mut(ty) => {
                    mutable_args.push(index);
                    ty
                }
            })
            .collect();

        let mut mutable_kwargs = Vec::new();
        let kwarg_types = kwargs
            .into_iter()
            .map(|(name, arg)| match arg {
                ArgType::Plain(ty) => (name.to_string(), ty),
                ArgType::Mut(ty) => {
                    mutable_kwargs.push(name.to_string());
                    (name.to_string(), ty)
                }
            })
            .collect();

        Annotation {
            arg_types,
            kwarg_types,
            return_type,
            mutable_args,
            mutable_kwargs,
        }
    }

    pub fn arg_count(&self) -> usize {
        self.arg_types.len()
    }

    pub fn arg_type(&self, index: usize) -> &SplitType {
        &self.arg_types[index]
    }

    pub fn kwarg_type(&self, name: &str) -> Option<&SplitType> {
        self.kwarg_types
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, ty)| ty)
    }

    pub fn return_type(&self) -> Option<&SplitType> {
        self.return_type.as_ref()
    }

    pub fn is_mutable_arg(&self, index: usize) -> bool {
        self.mutable_args.contains(&index)
    }

    pub fn is_mutable_kwarg(&self, name: &str) -> bool {
        self.mutable_kwargs.iter().any(|key| key == name)
    }

    pub(crate) fn kwarg_index(&self, name: &str) -> Option<usize> {
        self.kwarg_types.iter().position(|(key, _)| key == name)
    }

    pub(crate) fn arg_type_mut(&mut self, index: usize) -> &mut SplitType {
        &mut self.arg_types[index]
    }

    pub(crate) fn return_type_mut(&mut self) -> Option<&mut SplitType> {
        self.return_type.as_mut()
    }

    /// Registers Broadcast defaults for kwargs the template does not name.
    pub(crate) fn fill_default_kwargs<'a>(&mut self, names: impl Iterator<Item = &'a str>) {
        for name in names {
            if self.kwarg_index(name).is_none() {
                self.kwarg_types
                    .push((name.to_string(), SplitType::Broadcast));
            }
        }
    }

    /// All type slots in a fixed order: positionals, kwargs, then return.
    pub(crate) fn type_slots(&self) -> Vec<TypeSlot> {
        let mut slots: Vec<TypeSlot> = (0..self.arg_types.len()).map(TypeSlot::Arg).collect();
        slots.extend((0..self.kwarg_types.len()).map(TypeSlot::Kwarg));
        if self.return_type.is_some() {
            slots.push(TypeSlot::Return);
        }
        slots
    }

    pub(crate) fn slot(&self, slot: TypeSlot) -> Option<&SplitType> {
        match slot {
            TypeSlot::Arg(index) => self.arg_types.get(index),
            TypeSlot::Kwarg(index) => self.kwarg_types.get(index).map(|(_, ty)| ty),
            TypeSlot::Return => self.return_type.as_ref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, slot: TypeSlot) -> Option<&mut SplitType> {
        match slot {
            TypeSlot::Arg(index) => self.arg_types.get_mut(index),
            TypeSlot::Kwarg(index) => self.kwarg_types.get_mut(index).map(|(_, ty)| ty),
            TypeSlot::Return => self.return_type.as_mut(),
        }
    }

    /// Syncs two distinct slots of this annotation against each other.
    pub(crate) fn sync_slot_pair(&mut self, a: TypeSlot, b: TypeSlot) -> SplitResult<bool> {
        debug_assert_ne!(a, b, "cannot sync a slot with itself");
        // Temporarily lift slot `a` out so both sides can be borrowed mutably.
        let Some(slot_a) = self.slot_mut(a) else {
            return Ok(false);
        };
        let mut lifted = mem::replace(slot_a, SplitType::Broadcast);
        let result = match self.slot_mut(b) {
            Some(slot_b) => lifted.sync(slot_b),
            None => Ok(false),
        };
        if let Some(slot_a) = self.slot_mut(a) {
            *slot_a = lifted;
        }
        result
    }

    /// Mutable iteration over every split type in the annotation.
    pub(crate) fn types_mut(&mut self) -> impl Iterator<Item = &mut SplitType> {
        self.arg_types
            .iter_mut()
            .chain(self.kwarg_types.iter_mut().map(|(_, ty)| ty))
            .chain(self.return_type.iter_mut())
    }

    /// Replaces every generic placeholder with its resolved concrete type.
    pub(crate) fn finalize_types(&mut self) -> SplitResult<()> {
        for ty in self.types_mut() {
            *ty = ty.finalized()?;
        }
        Ok(())
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        for ty in &self.arg_types {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{ty}")?;
        }
        for (name, ty) in &self.kwarg_types {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name}={ty}")?;
        }
        match &self.return_type {
            Some(ty) => write!(f, ") -> {ty}"),
            None => write!(f, ") -> none"),
        }
    }
}

/// A wrapped library function: the kernel to call plus the annotation
/// template cloned into every registration.
#[derive(Clone)]
pub struct Annotated {
    name: &'static str,
    kernel: Kernel,
    annotation: Annotation,
}

impl Annotated {
    pub fn new(name: &'static str, kernel: Kernel, annotation: Annotation) -> Self {
        Annotated {
            name,
            kernel,
            annotation,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn annotation(&self) -> &Annotation {
        &self.annotation
    }

    /// Registers one deferred call on `graph` and returns its lazy handle.
    pub fn call(&self, graph: &Arc<TaskGraph>, args: Vec<ArgValue>) -> LazyHandle {
        self.call_with_kwargs(graph, args, Vec::new())
    }

    /// Registers a deferred call with keyword arguments.
    pub fn call_with_kwargs(
        &self,
        graph: &Arc<TaskGraph>,
        args: Vec<ArgValue>,
        kwargs: Vec<(String, ArgValue)>,
    ) -> LazyHandle {
        graph.register(
            self.name,
            self.kernel.clone(),
            args,
            kwargs,
            &self.annotation,
        )
    }
}
