//! Build plan: what the synthesizer generates, member by member

use std::fmt;
use std::sync::Arc;

use crate::builder::TypeBuilder;
use crate::factory::ObjectFactory;
use crate::model::{
    ConstructorDescriptor, FieldDescriptor, Marker, MarkerKind, MemberDescriptor, MemberFingerprint,
    MixinSpec, MustImplementPolicy, TypeRef,
};
use crate::synth::GeneratedType;

/// Where a planned member comes from
#[derive(Debug, Clone)]
pub enum MemberOrigin {
    /// Declared on the source type
    Declared,
    /// Declared on a base class
    Inherited,
    /// Interface member with no class implementation
    Interface(TypeRef),
    /// Interface member implemented by delegation to a held object
    Mixin(MixinSpec),
    /// Interface member forwarded to a duck-typed object
    Duck,
}

/// Duck-typing target of a member
#[derive(Debug, Clone)]
pub enum Delegation {
    /// Forward to a member of one of the backing objects
    Target {
        /// Index into the backing objects
        backing: usize,
        /// Fingerprint of the matched member on the backing type
        fingerprint: MemberFingerprint,
    },
    /// No backing object provides the member
    Missing,
}

/// Plan of one member
#[derive(Clone)]
pub struct MemberPlan {
    /// Member descriptor
    pub member: Arc<MemberDescriptor>,
    /// Type that declares the member
    pub declaring: TypeRef,
    /// Where the member comes from
    pub origin: MemberOrigin,
    /// Merged markers in precedence order
    pub markers: Vec<Marker>,
    /// Builders derived from the markers, in declaration order
    pub builders: Vec<Arc<dyn TypeBuilder>>,
    /// Interface this entry is reachable through only (explicit implementation)
    pub qualifier: Option<TypeRef>,
    /// Duck-typing target
    pub delegation: Option<Delegation>,
    /// Policy applied when nothing implements the member
    pub policy: MustImplementPolicy,
    /// Message for the policy error
    pub policy_message: Option<Arc<str>>,
}

impl MemberPlan {
    /// Whether a marker of `kind` is in effect
    pub fn has_marker(&self, kind: MarkerKind) -> bool {
        self.markers.iter().any(|m| m.kind() == kind)
    }
}

impl fmt::Debug for MemberPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberPlan")
            .field("member", &self.member.fingerprint().to_string())
            .field("declaring", &self.declaring)
            .field("origin", &self.origin)
            .field("markers", &self.markers)
            .field("builders", &self.builders.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("qualifier", &self.qualifier)
            .finish()
    }
}

/// An interface member served by a class member
#[derive(Debug, Clone)]
pub struct InterfaceAlias {
    /// Interface
    pub interface: TypeRef,
    /// Interface member fingerprint
    pub fingerprint: MemberFingerprint,
    /// Index of the serving member plan
    pub plan_index: usize,
}

/// Plan flavor
#[derive(Clone)]
pub enum PlanKind {
    /// Implementation of an abstract class or interface
    Standard,
    /// Interface forwarding to existing objects
    Duck(Vec<Arc<GeneratedType>>),
}

/// Everything the synthesizer needs to generate one type
#[derive(Clone)]
pub struct BuildPlan {
    /// Source type
    pub source: TypeRef,
    /// Plan flavor
    pub kind: PlanKind,
    /// Interfaces the generated type implements
    pub interfaces: Vec<TypeRef>,
    /// Merged type-level markers
    pub type_markers: Vec<Marker>,
    /// Member plans
    pub members: Vec<MemberPlan>,
    /// Instance fields, base class first
    pub fields: Vec<FieldDescriptor>,
    /// Source constructors
    pub constructors: Vec<ConstructorDescriptor>,
    /// Type-level builders from markers
    pub type_builders: Vec<Arc<dyn TypeBuilder>>,
    /// Interface members served by class members
    pub aliases: Vec<InterfaceAlias>,
}

impl BuildPlan {
    /// Whether this is a duck-typing plan
    pub fn is_duck(&self) -> bool {
        matches!(self.kind, PlanKind::Duck(_))
    }

    /// Backing types of a duck-typing plan
    pub fn backing(&self) -> &[Arc<GeneratedType>] {
        match &self.kind {
            PlanKind::Duck(b) => b,
            PlanKind::Standard => &[],
        }
    }

    /// Whether a type-level marker of `kind` is in effect
    pub fn has_type_marker(&self, kind: MarkerKind) -> bool {
        self.type_markers.iter().any(|m| m.kind() == kind)
    }

    /// Object factory declared by marker
    pub fn object_factory(&self) -> Option<Arc<dyn ObjectFactory>> {
        self.type_markers.iter().find_map(|m| match m {
            Marker::ObjectFactory(f) => Some(f.clone()),
            _ => None,
        })
    }
}

impl fmt::Debug for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildPlan")
            .field("source", &self.source)
            .field("duck", &self.is_duck())
            .field("interfaces", &self.interfaces)
            .field("type_markers", &self.type_markers)
            .field("members", &self.members)
            .finish()
    }
}
