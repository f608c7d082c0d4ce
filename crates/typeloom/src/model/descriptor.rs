//! Source type descriptors
//!
//! A [`TypeDescriptor`] is the abstract class or interface a caller wants a
//! concrete implementation of. Descriptors are assembled with a consuming
//! builder ([`TypeDefinition`]) and frozen into a [`TypeRef`]; after that they
//! never change, so their [`DescriptorId`] is a stable identity for cache keys.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashSet;

use super::member::{ConstructorDescriptor, FieldDescriptor, MemberDescriptor, MemberFingerprint};
use super::marker::Marker;

/// Global counter for descriptor IDs
static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

fn generate_descriptor_id() -> DescriptorId {
    DescriptorId(NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed))
}

/// Process-unique identity of a frozen descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub u64);

/// Kind of source type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Concrete class
    Class,
    /// Abstract class
    AbstractClass,
    /// Interface (no fields, no constructors)
    Interface,
}

/// Immutable description of an abstract class or interface
pub struct TypeDescriptor {
    id: DescriptorId,
    name: Arc<str>,
    kind: TypeKind,
    base: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    members: Vec<Arc<MemberDescriptor>>,
    fields: Vec<FieldDescriptor>,
    constructors: Vec<ConstructorDescriptor>,
    markers: Vec<Marker>,
}

impl TypeDescriptor {
    /// Start a concrete class definition
    pub fn class(name: &str) -> TypeDefinition {
        TypeDefinition::new(name, TypeKind::Class)
    }

    /// Start an abstract class definition
    pub fn abstract_class(name: &str) -> TypeDefinition {
        TypeDefinition::new(name, TypeKind::AbstractClass)
    }

    /// Start an interface definition
    pub fn interface(name: &str) -> TypeDefinition {
        TypeDefinition::new(name, TypeKind::Interface)
    }

    /// Descriptor identity
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type kind
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Check if this is an interface
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Base class, if any
    pub fn base(&self) -> Option<&TypeRef> {
        self.base.as_ref()
    }

    /// Directly declared interfaces
    pub fn interfaces(&self) -> &[TypeRef] {
        &self.interfaces
    }

    /// Members declared on this type (not inherited)
    pub fn members(&self) -> &[Arc<MemberDescriptor>] {
        &self.members
    }

    /// Fields declared on this type (not inherited)
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Declared constructors
    pub fn constructors(&self) -> &[ConstructorDescriptor] {
        &self.constructors
    }

    /// Type-level markers
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Find a declared member by fingerprint
    pub fn find_member(&self, fingerprint: &MemberFingerprint) -> Option<&Arc<MemberDescriptor>> {
        self.members.iter().find(|m| &m.fingerprint() == fingerprint)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("members", &self.members.len())
            .finish()
    }
}

/// Shared handle to a frozen descriptor
///
/// Equality and hashing use the descriptor identity.
#[derive(Clone)]
pub struct TypeRef(Arc<TypeDescriptor>);

impl TypeRef {
    /// Check whether `self` is `other` or inherits from / implements it
    pub fn derives_from(&self, other: &TypeRef) -> bool {
        self.hierarchy().iter().any(|t| t == other)
    }

    /// This type followed by every ancestor, breadth-first
    ///
    /// The order is the lookup order for inherited markers: the type itself,
    /// then its base class and directly declared interfaces in declaration
    /// order, then their ancestors.
    pub fn hierarchy(&self) -> Vec<TypeRef> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::new();
        queue.push_back(self.clone());
        while let Some(ty) = queue.pop_front() {
            if !seen.insert(ty.id()) {
                continue;
            }
            if let Some(base) = ty.base() {
                queue.push_back(base.clone());
            }
            for iface in ty.interfaces() {
                queue.push_back(iface.clone());
            }
            out.push(ty);
        }
        out
    }

    /// Every interface in the hierarchy (closest first)
    pub fn all_interfaces(&self) -> Vec<TypeRef> {
        self.hierarchy()
            .into_iter()
            .filter(|t| t.is_interface())
            .collect()
    }

    /// Class chain from this type up to the root class
    pub fn class_chain(&self) -> Vec<TypeRef> {
        let mut out = vec![self.clone()];
        let mut current = self.base().cloned();
        while let Some(ty) = current {
            current = ty.base().cloned();
            out.push(ty);
        }
        out
    }

    /// Pointer identity
    pub fn ptr_eq(&self, other: &TypeRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for TypeRef {
    type Target = TypeDescriptor;

    fn deref(&self) -> &TypeDescriptor {
        &self.0
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TypeRef {}

impl std::hash::Hash for TypeRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.name, self.0.id.0)
    }
}

/// Builder for a [`TypeDescriptor`]
pub struct TypeDefinition {
    name: Arc<str>,
    kind: TypeKind,
    base: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    members: Vec<Arc<MemberDescriptor>>,
    fields: Vec<FieldDescriptor>,
    constructors: Vec<ConstructorDescriptor>,
    markers: Vec<Marker>,
    implicit_constructor: bool,
}

impl TypeDefinition {
    fn new(name: &str, kind: TypeKind) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            base: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            fields: Vec::new(),
            constructors: Vec::new(),
            markers: Vec::new(),
            implicit_constructor: kind != TypeKind::Interface,
        }
    }

    /// Set the base class
    pub fn extends(mut self, base: &TypeRef) -> Self {
        self.base = Some(base.clone());
        self
    }

    /// Add an implemented (or, for interfaces, inherited) interface
    pub fn implements(mut self, interface: &TypeRef) -> Self {
        if !self.interfaces.contains(interface) {
            self.interfaces.push(interface.clone());
        }
        self
    }

    /// Add a member
    pub fn member(mut self, member: MemberDescriptor) -> Self {
        self.members.push(Arc::new(member));
        self
    }

    /// Add a field
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a constructor
    pub fn constructor(mut self, ctor: ConstructorDescriptor) -> Self {
        self.constructors.push(ctor);
        self
    }

    /// Do not add the implicit parameterless constructor
    pub fn no_default_constructor(mut self) -> Self {
        self.implicit_constructor = false;
        self
    }

    /// Add a type-level marker
    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Freeze the definition
    pub fn build(mut self) -> TypeRef {
        if self.constructors.is_empty() && self.implicit_constructor {
            self.constructors.push(ConstructorDescriptor::default_ctor());
        }
        if self.kind == TypeKind::Interface {
            self.constructors.clear();
            self.fields.clear();
        }
        TypeRef(Arc::new(TypeDescriptor {
            id: generate_descriptor_id(),
            name: self.name,
            kind: self.kind,
            base: self.base,
            interfaces: self.interfaces,
            members: self.members,
            fields: self.fields,
            constructors: self.constructors,
            markers: self.markers,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    #[test]
    fn test_ids_are_unique() {
        let a = TypeDescriptor::interface("IA").build();
        let b = TypeDescriptor::interface("IA").build();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_implicit_constructor() {
        let c = TypeDescriptor::abstract_class("C").build();
        assert_eq!(c.constructors().len(), 1);

        let d = TypeDescriptor::abstract_class("D").no_default_constructor().build();
        assert!(d.constructors().is_empty());

        let i = TypeDescriptor::interface("I").build();
        assert!(i.constructors().is_empty());
    }

    #[test]
    fn test_hierarchy_order() {
        let ibase = TypeDescriptor::interface("IBase").build();
        let ia = TypeDescriptor::interface("IA").implements(&ibase).build();
        let ib = TypeDescriptor::interface("IB").build();
        let base = TypeDescriptor::abstract_class("Base").build();
        let c = TypeDescriptor::abstract_class("C")
            .extends(&base)
            .implements(&ia)
            .implements(&ib)
            .build();

        let names: Vec<_> = c.hierarchy().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["C", "Base", "IA", "IB", "IBase"]);
        assert!(c.derives_from(&ibase));
        assert!(!ia.derives_from(&ib));
        assert_eq!(c.all_interfaces().len(), 3);
    }

    #[test]
    fn test_find_member() {
        let t = TypeDescriptor::interface("I")
            .member(MemberDescriptor::method("Run").returns(ValueType::Int))
            .build();
        let fp = MemberDescriptor::method("Run").fingerprint();
        assert!(t.find_member(&fp).is_some());
    }
}
