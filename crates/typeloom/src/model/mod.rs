//! Source type model
//!
//! Describes the abstract classes and interfaces handed to the factory:
//! descriptors, members, parameters, constructors and the marker vocabulary.

mod descriptor;
mod marker;
mod member;

pub use descriptor::{DescriptorId, TypeDefinition, TypeDescriptor, TypeKind, TypeRef};
pub use marker::{
    AsyncTarget, ClearCacheTarget, Marker, MarkerGroup, MarkerKind, MixinSpec, MustImplement,
    MustImplementPolicy,
};
pub use member::{
    AccessorKind, ConstructorBody, ConstructorDescriptor, ConstructorKind, FieldDescriptor,
    FingerprintKind, MemberDescriptor, MemberFingerprint, MemberKind, MethodBody, ParamDescriptor,
    ParamMode,
};
