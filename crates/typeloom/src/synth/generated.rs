//! Compiled type records

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::instance::{InitContext, Instance};
use crate::aspects::MethodCallCounter;
use crate::builder::{CtorHook, FieldSlot};
use crate::cache::GeneratedTypeKey;
use crate::error::{CallError, CallResult};
use crate::factory::ObjectFactory;
use crate::intercept::{CallMethodInfo, InterceptorChain};
use crate::model::{
    AccessorKind, ConstructorDescriptor, ConstructorKind, DescriptorId, MemberFingerprint, TypeRef,
};
use crate::value::Value;

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

/// One entry point of a generated type
pub struct CompiledMember {
    /// Call identity
    pub method: Arc<CallMethodInfo>,
    /// Interface the entry is reachable through only
    pub qualifier: Option<TypeRef>,
    /// Builders that contributed, in order
    pub applied: Vec<String>,
    pub(crate) chain: InterceptorChain,
}

impl fmt::Debug for CompiledMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMember")
            .field("method", &self.method.full_name())
            .field("qualifier", &self.qualifier)
            .field("applied", &self.applied)
            .field("chain", &self.chain)
            .finish()
    }
}

pub(crate) struct GeneratedTypeParts {
    pub name: Arc<str>,
    pub source: TypeRef,
    pub key: GeneratedTypeKey,
    pub interfaces: Vec<TypeRef>,
    pub members: Vec<CompiledMember>,
    pub aliases: Vec<(TypeRef, Arc<str>, usize)>,
    pub fields: Vec<FieldSlot>,
    pub constructors: Vec<ConstructorDescriptor>,
    pub ctor_hooks: Vec<CtorHook>,
    pub object_factory: Option<Arc<dyn ObjectFactory>>,
    pub counters: Vec<(Arc<CallMethodInfo>, Arc<dyn MethodCallCounter>)>,
    pub requires_constructor: bool,
}

/// A synthesized type: dispatch tables plus builder-attached static state
pub struct GeneratedType {
    id: u64,
    name: Arc<str>,
    source: TypeRef,
    key: GeneratedTypeKey,
    interfaces: Vec<TypeRef>,
    members: Vec<CompiledMember>,
    by_name: FxHashMap<Arc<str>, Vec<usize>>,
    qualified: FxHashMap<(DescriptorId, Arc<str>), Vec<usize>>,
    fields: Vec<FieldSlot>,
    field_index: FxHashMap<Arc<str>, usize>,
    constructors: Vec<ConstructorDescriptor>,
    ctor_hooks: Vec<CtorHook>,
    object_factory: Option<Arc<dyn ObjectFactory>>,
    counters: Vec<(Arc<CallMethodInfo>, Arc<dyn MethodCallCounter>)>,
    requires_constructor: bool,
}

impl GeneratedType {
    pub(crate) fn new(parts: GeneratedTypeParts) -> Self {
        let mut by_name: FxHashMap<Arc<str>, Vec<usize>> = FxHashMap::default();
        let mut qualified: FxHashMap<(DescriptorId, Arc<str>), Vec<usize>> = FxHashMap::default();
        for (slot, member) in parts.members.iter().enumerate() {
            let name = member.method.member.name.clone();
            match &member.qualifier {
                Some(iface) => qualified.entry((iface.id(), name)).or_default().push(slot),
                None => by_name.entry(name).or_default().push(slot),
            }
        }
        for (iface, name, slot) in parts.aliases {
            qualified.entry((iface.id(), name)).or_default().push(slot);
        }
        let field_index = parts
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        Self {
            id: NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed),
            name: parts.name,
            source: parts.source,
            key: parts.key,
            interfaces: parts.interfaces,
            members: parts.members,
            by_name,
            qualified,
            fields: parts.fields,
            field_index,
            constructors: parts.constructors,
            ctor_hooks: parts.ctor_hooks,
            object_factory: parts.object_factory,
            counters: parts.counters,
            requires_constructor: parts.requires_constructor,
        }
    }

    /// Process-unique type id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Generated type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source type
    pub fn source(&self) -> &TypeRef {
        &self.source
    }

    /// Cache key the type was built for
    pub fn key(&self) -> &GeneratedTypeKey {
        &self.key
    }

    /// Implemented interfaces
    pub fn interfaces(&self) -> &[TypeRef] {
        &self.interfaces
    }

    /// Entry points, by slot
    pub fn members(&self) -> &[CompiledMember] {
        &self.members
    }

    /// Entry point at `slot`
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range; slots come from this type's own
    /// lookup functions.
    pub fn member(&self, slot: usize) -> &CompiledMember {
        &self.members[slot]
    }

    /// Instance field layout
    pub fn fields(&self) -> &[FieldSlot] {
        &self.fields
    }

    /// Index of a field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    /// Object factory declared by marker
    pub fn object_factory(&self) -> Option<&Arc<dyn ObjectFactory>> {
        self.object_factory.as_ref()
    }

    /// Call counters attached by the counter plugin
    pub fn counters(&self) -> impl Iterator<Item = &Arc<dyn MethodCallCounter>> {
        self.counters.iter().map(|(_, c)| c)
    }

    /// Counter of the first entry point named `name`
    pub fn counter(&self, name: &str) -> Option<&Arc<dyn MethodCallCounter>> {
        self.counters
            .iter()
            .find(|(m, _)| m.name() == name)
            .map(|(_, c)| c)
    }

    /// Check if the type is, derives from, or implements `ty`
    pub fn implements(&self, ty: &TypeRef) -> bool {
        self.source.derives_from(ty) || self.interfaces.iter().any(|i| i.derives_from(ty))
    }

    /// Slot of an unqualified entry point; exact fingerprint first, then a
    /// loose match
    pub fn find_slot(
        &self,
        fingerprint: &MemberFingerprint,
        accessor: AccessorKind,
    ) -> Option<usize> {
        let candidates = self.by_name.get(&fingerprint.name)?;
        let entry = |pred: &dyn Fn(&MemberFingerprint) -> bool| {
            candidates.iter().copied().find(|&slot| {
                let m = &self.members[slot].method;
                m.accessor == accessor && pred(&m.fingerprint)
            })
        };
        entry(&|fp: &MemberFingerprint| fp == fingerprint)
            .or_else(|| entry(&|fp: &MemberFingerprint| fp.matches(fingerprint)))
    }

    /// Fingerprint of an unqualified member matching `fingerprint` loosely
    /// and exposing every accessor in `accessors`
    pub fn find_compatible(
        &self,
        fingerprint: &MemberFingerprint,
        accessors: &[AccessorKind],
    ) -> Option<MemberFingerprint> {
        let candidates = self.by_name.get(&fingerprint.name)?;
        candidates.iter().find_map(|&slot| {
            let fp = &self.members[slot].method.fingerprint;
            if !fp.matches(fingerprint) {
                return None;
            }
            accessors
                .iter()
                .all(|&a| self.find_slot(fp, a).is_some())
                .then(|| fp.clone())
        })
    }

    /// Pick the entry point a call by name dispatches to
    ///
    /// With an interface, explicit implementations of that interface (or of
    /// an interface it derives from) are preferred. Overloads are told apart
    /// by arity and then by argument types.
    pub fn resolve_call(
        &self,
        name: &str,
        accessor: AccessorKind,
        args: &[Value],
        interface: Option<&TypeRef>,
    ) -> CallResult<usize> {
        if let Some(iface) = interface {
            if !self.implements(iface) {
                return Err(CallError::invalid_operation(format!(
                    "'{}' does not implement '{}'",
                    self.name,
                    iface.name()
                )));
            }
            for ty in iface.hierarchy() {
                if let Some(slots) = self.qualified.get(&(ty.id(), Arc::from(name))) {
                    if let Some(slot) = self.pick(slots, accessor, args) {
                        return Ok(slot);
                    }
                }
            }
        }

        let slots = self.by_name.get(name).ok_or_else(|| {
            CallError::invalid_operation(format!("'{}' has no member '{}'", self.name, name))
        })?;
        self.pick(slots, accessor, args).ok_or_else(|| {
            let what = match accessor {
                AccessorKind::Invoke => "method",
                AccessorKind::Get => "getter",
                AccessorKind::Set => "setter",
            };
            CallError::invalid_operation(format!(
                "'{}.{}' has no {} accepting {} argument(s)",
                self.name,
                name,
                what,
                args.len()
            ))
        })
    }

    fn pick(&self, slots: &[usize], accessor: AccessorKind, args: &[Value]) -> Option<usize> {
        let mut by_arity = slots.iter().copied().filter(|&slot| {
            let m = &self.members[slot].method;
            m.accessor == accessor && m.params.len() == args.len()
        });
        let first = by_arity.next()?;
        let accepts = |slot: usize| {
            self.members[slot]
                .method
                .params
                .iter()
                .zip(args)
                .all(|(p, v)| p.is_by_ref() || p.ty.accepts(v))
        };
        if accepts(first) {
            return Some(first);
        }
        by_arity.find(|&slot| accepts(slot)).or(Some(first))
    }

    /// Create an instance: field initializers, constructor hooks, then the
    /// source constructor chosen for `ctx`
    pub fn construct(self: &Arc<Self>, ctx: Option<&InitContext>) -> CallResult<Instance> {
        let instance = Instance::allocate(self.clone());
        for hook in &self.ctor_hooks {
            hook(&instance, ctx)?;
        }

        if let Some((ctor, payload)) = self.select_constructor(ctx)? {
            if let Some(body) = &ctor.body {
                body(&instance, &payload)?;
            }
        }
        Ok(instance)
    }

    /// Choose a constructor and build the payload it receives
    ///
    /// With a context: context-aware, then positional (missing trailing
    /// arguments take their defaults), then parameterless. Without one:
    /// parameterless, then positional with defaults, then context-aware with
    /// an empty payload.
    fn select_constructor(
        &self,
        ctx: Option<&InitContext>,
    ) -> CallResult<Option<(&ConstructorDescriptor, InitContext)>> {
        let find = |pred: &dyn Fn(&ConstructorKind) -> bool| {
            self.constructors.iter().find(|c| pred(&c.kind))
        };
        let positional = |given: &[Value]| {
            let mut candidates: Vec<&ConstructorDescriptor> = self
                .constructors
                .iter()
                .filter(|c| matches!(&c.kind, ConstructorKind::Params(p) if p.len() >= given.len()))
                .collect();
            candidates.sort_by_key(|c| match &c.kind {
                ConstructorKind::Params(p) => p.len(),
                _ => usize::MAX,
            });
            candidates.into_iter().next()
        };

        let chosen = match ctx {
            Some(c) => find(&|k: &ConstructorKind| matches!(k, ConstructorKind::Context))
                .or_else(|| positional(&c.parameters))
                .or_else(|| find(&|k: &ConstructorKind| matches!(k, ConstructorKind::Default))),
            None => find(&|k: &ConstructorKind| matches!(k, ConstructorKind::Default))
                .or_else(|| positional(&[]))
                .or_else(|| find(&|k: &ConstructorKind| matches!(k, ConstructorKind::Context))),
        };

        let Some(ctor) = chosen else {
            if self.requires_constructor {
                return Err(CallError::invalid_operation(format!(
                    "'{}' has no constructor accepting the supplied context",
                    self.name
                )));
            }
            return Ok(None);
        };

        let mut payload = ctx.cloned().unwrap_or_default();
        if let ConstructorKind::Params(params) = &ctor.kind {
            let mut values = Vec::with_capacity(params.len());
            for (i, param) in params.iter().enumerate() {
                let value = payload
                    .parameters
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| param.default_value());
                if !param.ty.accepts(&value) {
                    return Err(CallError::Argument {
                        param: param.name.to_string(),
                        message: format!(
                            "Argument '{}' expects {}, got {}",
                            param.name,
                            param.ty.name(),
                            value.kind_name()
                        ),
                    });
                }
                values.push(value);
            }
            payload.parameters = values;
        }
        Ok(Some((ctor, payload)))
    }
}

impl fmt::Debug for GeneratedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("members", &self.members.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}
