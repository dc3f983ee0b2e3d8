//! Generic split-type placeholders resolved during inference.

use std::fmt;

use super::SplitType;

/// A placeholder split type unified to a concrete type by inference.
///
/// Names are local to a single annotation: two generics named `A` inside one
/// annotation always resolve to the same concrete type, while `A` in another
/// annotation is unrelated. The identity id distinguishes same-named generics
/// from different annotation instances during one inference run.
#[derive(Debug, Clone)]
pub struct GenericType {
    name: String,
    id: Option<u32>,
    concrete: Option<Box<SplitType>>,
}

impl GenericType {
    pub fn new(name: impl Into<String>) -> Self {
        GenericType {
            name: name.into(),
            id: None,
            concrete: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Annotation-local identity assigned at the start of inference.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    /// Whether this placeholder names the same generic as `other` within one
    /// inference run.
    pub(crate) fn same_placeholder(&self, other: &GenericType) -> bool {
        self.name == other.name && self.id.is_some() && self.id == other.id
    }

    /// The concrete type adopted so far, if any.
    pub fn resolved(&self) -> Option<&SplitType> {
        self.concrete.as_deref()
    }

    /// Adopts a concrete type. Callers guarantee `ty` is not itself generic.
    pub(crate) fn resolve(&mut self, ty: SplitType) {
        debug_assert!(!ty.is_generic(), "generics must resolve to concrete types");
        self.concrete = Some(Box::new(ty));
    }
}

impl fmt::Display for GenericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(id) = self.id {
            write!(f, "<{id}>")?;
        }
        if let Some(concrete) = &self.concrete {
            write!(f, "({concrete})")?;
        }
        Ok(())
    }
}
