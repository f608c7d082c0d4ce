//! Member metadata resolution
//!
//! Turns a source type into a [`BuildPlan`]. For every member the resolver
//! collects the markers that apply to it, walking the declaring member, its
//! overridden declarations, the implemented interface declarations and
//! finally the type-level markers.
//!
//! Precedence is per marker group (kind plus discriminator): the first
//! source in lookup order that carries a group wins it, and every marker of
//! that group on that one source is kept, in declaration order. Lookup
//! order is the type hierarchy order ([`TypeRef::hierarchy`]).

mod plan;

pub use plan::{BuildPlan, Delegation, InterfaceAlias, MemberOrigin, MemberPlan, PlanKind};

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::aspects;
use crate::config::FactoryConfig;
use crate::error::{BuildError, BuildResult};
use crate::model::{
    FieldDescriptor, Marker, MarkerGroup, MarkerKind, MemberDescriptor, MemberFingerprint,
    MemberKind, MixinSpec, MustImplementPolicy, TypeRef,
};
use crate::synth::GeneratedType;
use crate::value::ValueType;

/// Merge marker sources in precedence order
pub fn merge_markers<'m>(sources: impl IntoIterator<Item = &'m [Marker]>) -> Vec<Marker> {
    let mut taken: FxHashSet<MarkerGroup> = FxHashSet::default();
    let mut out = Vec::new();
    for source in sources {
        let mut here = FxHashSet::default();
        for marker in source {
            let group = marker.group();
            if taken.contains(&group) {
                continue;
            }
            here.insert(group);
            out.push(marker.clone());
        }
        taken.extend(here);
    }
    out
}

/// Resolves source types into build plans
pub struct MemberMetadataResolver<'a> {
    config: &'a FactoryConfig,
}

impl<'a> MemberMetadataResolver<'a> {
    /// Resolver using `config` for defaults
    pub fn new(config: &'a FactoryConfig) -> Self {
        Self { config }
    }

    /// Plan for implementing `source`
    pub fn resolve(&self, source: &TypeRef) -> BuildResult<BuildPlan> {
        let hierarchy = source.hierarchy();
        let chain: Vec<TypeRef> = if source.is_interface() {
            Vec::new()
        } else {
            source.class_chain()
        };

        // Type-level markers come from the class chain (or the interface
        // hierarchy for interface sources)
        let type_sources: Vec<&[Marker]> = if source.is_interface() {
            hierarchy.iter().map(|t| t.markers()).collect()
        } else {
            chain.iter().map(|t| t.markers()).collect()
        };
        let type_markers = merge_markers(type_sources);

        let mixins: Vec<MixinSpec> = type_markers
            .iter()
            .filter_map(|m| match m {
                Marker::Mixin(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect();

        let mut interfaces: Vec<TypeRef> = if source.is_interface() {
            hierarchy.clone()
        } else {
            source.all_interfaces()
        };
        for marker in &type_markers {
            let extra = match marker {
                Marker::ImplementInterface(t) => t,
                Marker::Mixin(spec) => &spec.interface,
                _ => continue,
            };
            for t in extra.hierarchy() {
                if t.is_interface() && !interfaces.contains(&t) {
                    interfaces.push(t);
                }
            }
        }

        let mut members = Vec::new();
        let mut aliases = Vec::new();
        let mut seen: Vec<MemberFingerprint> = Vec::new();

        for (depth, ty) in chain.iter().enumerate() {
            for member in ty.members() {
                let fp = member.fingerprint();
                if seen.contains(&fp) {
                    continue;
                }
                seen.push(fp);
                let origin = if depth == 0 {
                    MemberOrigin::Declared
                } else {
                    MemberOrigin::Inherited
                };
                members.push(self.plan_member(
                    source,
                    &hierarchy,
                    &type_markers,
                    member,
                    ty,
                    origin,
                    None,
                )?);
            }
        }
        let class_members = members.len();

        for iface in &interfaces {
            let mixin = mixins.iter().find(|m| m.interface.derives_from(iface)).cloned();
            for member in iface.members() {
                let fp = member.fingerprint();
                let served = members[..class_members]
                    .iter()
                    .position(|p: &MemberPlan| p.member.fingerprint().matches(&fp));

                match (served, &mixin) {
                    (Some(index), Some(spec)) => {
                        let overridden = members[index].markers.iter().any(|m| match m {
                            Marker::MixinOverride(t) => t == &spec.interface || t == iface,
                            _ => false,
                        });
                        if overridden {
                            aliases.push(InterfaceAlias {
                                interface: iface.clone(),
                                fingerprint: fp,
                                plan_index: index,
                            });
                        } else {
                            let origin = MemberOrigin::Mixin(spec.clone());
                            members.push(self.plan_member(
                                source,
                                &hierarchy,
                                &type_markers,
                                member,
                                iface,
                                origin,
                                Some(iface.clone()),
                            )?);
                        }
                    }
                    (Some(_), None) => {}
                    (None, _) => {
                        if members[class_members..]
                            .iter()
                            .any(|p| p.qualifier.is_none() && p.member.fingerprint().matches(&fp))
                        {
                            continue;
                        }
                        let origin = match &mixin {
                            Some(spec) => MemberOrigin::Mixin(spec.clone()),
                            None => MemberOrigin::Interface(iface.clone()),
                        };
                        members.push(self.plan_member(
                            source,
                            &hierarchy,
                            &type_markers,
                            member,
                            iface,
                            origin,
                            None,
                        )?);
                    }
                }
            }
        }

        let fields: Vec<FieldDescriptor> = chain
            .iter()
            .rev()
            .flat_map(|t| t.fields().iter().cloned())
            .collect();

        let type_builders = type_markers
            .iter()
            .filter(|m| m.kind() == MarkerKind::Builder)
            .filter_map(aspects::marker_builder)
            .collect();

        debug!(
            source = source.name(),
            members = members.len(),
            interfaces = interfaces.len(),
            "build plan resolved"
        );

        Ok(BuildPlan {
            source: source.clone(),
            kind: PlanKind::Standard,
            interfaces,
            type_markers,
            members,
            fields,
            constructors: source.constructors().to_vec(),
            type_builders,
            aliases,
        })
    }

    /// Plan for an interface forwarding to `backing` objects' types
    ///
    /// Members are matched loosely by fingerprint against the backing types in
    /// order; the first match wins.
    pub fn resolve_duck(
        &self,
        interface: &TypeRef,
        backing: Vec<Arc<GeneratedType>>,
    ) -> BuildResult<BuildPlan> {
        if !interface.is_interface() {
            return Err(BuildError::DuckTyping {
                interface: interface.name().to_string(),
                reason: "target type is not an interface".to_string(),
            });
        }

        let hierarchy = interface.hierarchy();
        let type_markers = merge_markers(hierarchy.iter().map(|t| t.markers()));
        let mut members = Vec::new();
        let mut seen: Vec<MemberFingerprint> = Vec::new();

        for iface in &hierarchy {
            for member in iface.members() {
                let fp = member.fingerprint();
                if seen.iter().any(|s| s.matches(&fp)) {
                    continue;
                }
                seen.push(fp.clone());

                let mut plan = self.plan_member(
                    interface,
                    &hierarchy,
                    &type_markers,
                    member,
                    iface,
                    MemberOrigin::Duck,
                    None,
                )?;

                let target = backing.iter().enumerate().find_map(|(i, ty)| {
                    ty.find_compatible(&fp, &member.accessors())
                        .map(|fingerprint| Delegation::Target { backing: i, fingerprint })
                });
                let delegation = match target {
                    Some(t) => t,
                    None if plan.policy == MustImplementPolicy::Required => {
                        let names: Vec<&str> = backing.iter().map(|t| t.source().name()).collect();
                        let reason = match plan.policy_message.as_deref() {
                            Some(message) => message.to_string(),
                            None => format!(
                                "member '{}' is not provided by [{}]",
                                fp,
                                names.join(", ")
                            ),
                        };
                        return Err(BuildError::DuckTyping {
                            interface: interface.name().to_string(),
                            reason,
                        });
                    }
                    None => Delegation::Missing,
                };
                plan.delegation = Some(delegation);
                members.push(plan);
            }
        }

        let fields = (0..backing.len())
            .map(|i| FieldDescriptor::new(&duck_target_field(i), ValueType::Any))
            .collect();

        Ok(BuildPlan {
            source: interface.clone(),
            kind: PlanKind::Duck(backing),
            interfaces: hierarchy,
            type_markers,
            members,
            fields,
            constructors: Vec::new(),
            type_builders: Vec::new(),
            aliases: Vec::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_member(
        &self,
        source: &TypeRef,
        hierarchy: &[TypeRef],
        type_markers: &[Marker],
        member: &Arc<MemberDescriptor>,
        declaring: &TypeRef,
        origin: MemberOrigin,
        qualifier: Option<TypeRef>,
    ) -> BuildResult<MemberPlan> {
        let fp = member.fingerprint();

        // Declarations first: the member itself, then every other
        // declaration of the same fingerprint up the hierarchy
        let mut sources: Vec<&[Marker]> = vec![&member.markers];
        for ty in hierarchy {
            if ty == declaring {
                continue;
            }
            if let Some(other) = ty.members().iter().find(|m| m.fingerprint().matches(&fp)) {
                sources.push(&other.markers);
            }
        }

        // Then type-level markers that apply to members: the source chain,
        // then the declaring interface hierarchy
        let member_level = |markers: &[Marker]| -> Vec<Marker> {
            markers
                .iter()
                .filter(|m| m.kind().applies_to_members())
                .cloned()
                .collect()
        };
        let inherited_type = member_level(type_markers);
        let declaring_type = if declaring.is_interface() && declaring != source {
            member_level(&merge_markers(declaring.hierarchy().iter().map(|t| t.markers())))
        } else {
            Vec::new()
        };
        sources.push(&inherited_type);
        sources.push(&declaring_type);

        let markers = merge_markers(sources);
        validate(source, member, &markers)?;

        let (policy, policy_message) = markers
            .iter()
            .find_map(|m| match m {
                Marker::MustImplement(mi) => Some((mi.policy(), mi.message.clone())),
                _ => None,
            })
            .unwrap_or((self.config.default_must_implement, None));

        let builders = markers.iter().filter_map(aspects::marker_builder).collect();

        Ok(MemberPlan {
            member: member.clone(),
            declaring: declaring.clone(),
            origin,
            markers,
            builders,
            qualifier,
            delegation: None,
            policy,
            policy_message,
        })
    }
}

/// Field holding the n-th duck-typed object
pub(crate) fn duck_target_field(index: usize) -> String {
    format!("$target{}", index)
}

fn validate(source: &TypeRef, member: &MemberDescriptor, markers: &[Marker]) -> BuildResult<()> {
    let label = || format!("{}.{}", source.name(), member.name);
    let has = |kind: MarkerKind| markers.iter().any(|m| m.kind() == kind);

    // Merging keeps one declaration per group, so a repeat here was stacked
    // on a single declaration
    let mut seen = FxHashSet::default();
    for marker in markers {
        let group = marker.group();
        if !seen.insert(group) && !group.kind.composes() {
            return Err(BuildError::ConflictingMarkers {
                member: label(),
                detail: format!("{:?} may appear only once on a declaration", group.kind),
            });
        }
    }

    if has(MarkerKind::LazyInstance) && has(MarkerKind::NoInstance) {
        return Err(BuildError::ConflictingMarkers {
            member: label(),
            detail: "lazy_instance and no_instance cannot be combined".to_string(),
        });
    }

    if has(MarkerKind::Async) && member.kind != MemberKind::Method {
        return Err(BuildError::InvalidMarker {
            member: label(),
            detail: "async_call applies to methods only".to_string(),
        });
    }

    for param in &member.params {
        let on = |kind: MarkerKind| param.markers.iter().any(|m| m.kind() == kind);
        if on(MarkerKind::ReturnIfTrue) && on(MarkerKind::ReturnIfFalse) {
            return Err(BuildError::ConflictingMarkers {
                member: label(),
                detail: format!(
                    "parameter '{}' has both return_if_true and return_if_false",
                    param.name
                ),
            });
        }
        if (on(MarkerKind::ReturnIfTrue) || on(MarkerKind::ReturnIfFalse))
            && !param.ty.is_compatible_with(&ValueType::Bool)
        {
            return Err(BuildError::InvalidMarker {
                member: label(),
                detail: format!("parameter '{}' is not boolean", param.name),
            });
        }
    }
    Ok(())
}
