//! Build context handed to plugins

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::BuildStep;
use crate::aspects::{AsyncWorkerPool, CacheRegistry, CounterFactory, MethodCallCounter};
use crate::config::FactoryConfig;
use crate::error::{BuildError, BuildResult, CallResult};
use crate::factory::FactoryHandle;
use crate::intercept::{BodyStage, CallMethodInfo, InterceptorChain, Stage};
use crate::model::{
    AccessorKind, Marker, MarkerKind, MemberDescriptor, MemberFingerprint, MethodBody, TypeRef,
};
use crate::resolve::{BuildPlan, MemberPlan};
use crate::synth::{InitContext, Instance};
use crate::value::{Value, ValueType};

/// Hook run on every new instance, after field initialization and before
/// the source constructor
pub type CtorHook = Arc<dyn Fn(&Instance, Option<&InitContext>) -> CallResult<()> + Send + Sync>;

/// Initial content of an instance field
#[derive(Debug, Clone)]
pub enum FieldInit {
    /// Fixed value
    Value(Value),
    /// Type default
    Default,
}

/// Field of a generated type
#[derive(Debug, Clone)]
pub struct FieldSlot {
    /// Field name
    pub name: Arc<str>,
    /// Declared type
    pub ty: ValueType,
    /// Initial content
    pub init: FieldInit,
}

impl FieldSlot {
    /// Value a new instance starts with
    pub fn initial_value(&self) -> Value {
        match &self.init {
            FieldInit::Value(v) => v.clone(),
            FieldInit::Default => self.ty.default_value(),
        }
    }
}

/// Factory-wide services available to plugins
#[derive(Clone)]
pub struct BuildServices {
    pub(crate) factory: FactoryHandle,
    pub(crate) caches: Arc<CacheRegistry>,
    pub(crate) workers: Arc<AsyncWorkerPool>,
    pub(crate) counter_factory: Option<Arc<dyn CounterFactory>>,
    pub(crate) config: Arc<FactoryConfig>,
}

impl BuildServices {
    /// Handle back to the owning factory
    pub fn factory(&self) -> &FactoryHandle {
        &self.factory
    }

    /// Memoization storage
    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    /// Worker pool for asynchronous members
    pub fn workers(&self) -> &Arc<AsyncWorkerPool> {
        &self.workers
    }

    /// Caller-supplied counter factory
    pub fn counter_factory(&self) -> Option<&Arc<dyn CounterFactory>> {
        self.counter_factory.as_ref()
    }

    /// Factory configuration
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }
}

impl fmt::Debug for BuildServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildServices")
            .field("config", &self.config)
            .field("counter_factory", &self.counter_factory.is_some())
            .finish()
    }
}

/// One entry point of one member (a property has up to two)
#[derive(Debug, Clone)]
pub struct MemberUnit {
    /// Slot in the generated type
    pub slot: usize,
    /// Index into [`BuildPlan::members`]
    pub plan_index: usize,
    /// Entry point
    pub accessor: AccessorKind,
    /// Call identity
    pub method: Arc<CallMethodInfo>,
}

/// Stages collected for one entry point
#[derive(Default)]
pub struct MemberEmitter {
    pub(crate) chain: InterceptorChain,
    pub(crate) applied: Vec<String>,
    scratch: FxHashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl MemberEmitter {
    /// Names of the builders that contributed, in order
    pub fn applied(&self) -> &[String] {
        &self.applied
    }
}

/// Type-wide state accumulated during synthesis
#[derive(Default)]
pub struct TypeState {
    pub(crate) fields: Vec<FieldSlot>,
    pub(crate) field_index: FxHashMap<Arc<str>, usize>,
    pub(crate) ctor_hooks: Vec<CtorHook>,
    pub(crate) counters: Vec<(Arc<CallMethodInfo>, Arc<dyn MethodCallCounter>)>,
    scratch: FxHashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl TypeState {
    /// Add a field unless one with the same name exists; returns its index
    pub(crate) fn define_field(&mut self, name: &str, ty: ValueType, init: FieldInit) -> usize {
        if let Some(&index) = self.field_index.get(name) {
            return index;
        }
        let index = self.fields.len();
        let name: Arc<str> = Arc::from(name);
        self.field_index.insert(name.clone(), index);
        self.fields.push(FieldSlot { name, ty, init });
        index
    }
}

/// What a plugin sees while it builds
pub struct BuildContext<'a> {
    pub(crate) step: BuildStep,
    pub(crate) type_name: &'a Arc<str>,
    pub(crate) plan: &'a BuildPlan,
    pub(crate) units: &'a [MemberUnit],
    pub(crate) unit: Option<&'a MemberUnit>,
    pub(crate) emitter: Option<&'a mut MemberEmitter>,
    pub(crate) state: &'a mut TypeState,
    pub(crate) services: &'a BuildServices,
}

impl<'a> BuildContext<'a> {
    /// Current step
    pub fn step(&self) -> BuildStep {
        self.step
    }

    /// Name of the type being generated
    pub fn type_name(&self) -> &Arc<str> {
        self.type_name
    }

    /// Resolved plan
    pub fn plan(&self) -> &BuildPlan {
        self.plan
    }

    /// Source type
    pub fn source(&self) -> &TypeRef {
        &self.plan.source
    }

    /// Factory services
    pub fn services(&self) -> &BuildServices {
        self.services
    }

    /// Every entry point of the type
    pub fn units(&self) -> &[MemberUnit] {
        self.units
    }

    /// Current entry point (member steps only)
    pub fn unit(&self) -> Option<&MemberUnit> {
        self.unit
    }

    /// Plan of the current member
    pub fn member_plan(&self) -> Option<&MemberPlan> {
        self.unit.map(|u| &self.plan.members[u.plan_index])
    }

    /// Current member
    pub fn member(&self) -> Option<&Arc<MemberDescriptor>> {
        self.member_plan().map(|p| &p.member)
    }

    /// Current entry point kind
    pub fn accessor(&self) -> Option<AccessorKind> {
        self.unit.map(|u| u.accessor)
    }

    /// Call identity of the current entry point
    pub fn method(&self) -> Option<&Arc<CallMethodInfo>> {
        self.unit.map(|u| &u.method)
    }

    /// `Type.Member` for diagnostics
    pub fn member_label(&self) -> String {
        match self.member() {
            Some(m) => format!("{}.{}", self.plan.source.name(), m.name),
            None => self.plan.source.name().to_string(),
        }
    }

    /// Effective markers: the member's merged markers, or the type markers
    /// at type-level steps
    pub fn markers(&self) -> &[Marker] {
        match self.member_plan() {
            Some(p) => &p.markers,
            None => &self.plan.type_markers,
        }
    }

    /// Whether a marker of `kind` is in effect
    pub fn has_marker(&self, kind: MarkerKind) -> bool {
        self.markers().iter().any(|m| m.kind() == kind)
    }

    /// First marker of `kind` in effect
    pub fn find_marker(&self, kind: MarkerKind) -> Option<&Marker> {
        self.markers().iter().find(|m| m.kind() == kind)
    }

    /// Concrete body of the current entry point, if the source has one
    pub fn concrete_body(&self) -> Option<MethodBody> {
        let plan = self.member_plan()?;
        plan.member.body_for(self.accessor()?).cloned()
    }

    /// Slot of an entry point of this type by fingerprint
    pub fn slot_of(
        &self,
        fingerprint: &MemberFingerprint,
        accessor: AccessorKind,
    ) -> Option<usize> {
        self.units
            .iter()
            .find(|u| u.accessor == accessor && &u.method.fingerprint == fingerprint)
            .map(|u| u.slot)
    }

    fn emitter(&mut self, expected: BuildStep, what: &str) -> BuildResult<&mut MemberEmitter> {
        if self.step != expected {
            return Err(BuildError::InvalidState(format!(
                "{} stage emitted at {:?} for '{}'",
                what,
                self.step,
                self.member_label()
            )));
        }
        let label = self.member_label();
        self.emitter
            .as_deref_mut()
            .ok_or_else(|| BuildError::InvalidState(format!("no member in scope for '{}'", label)))
    }

    /// Add a before stage
    pub fn emit_before(&mut self, stage: Stage) -> BuildResult<()> {
        self.emitter(BuildStep::BeforeMember, "before")?.chain.push_before(stage);
        Ok(())
    }

    /// Set the member body
    pub fn emit_body(&mut self, body: BodyStage) -> BuildResult<()> {
        let emitter = self.emitter(BuildStep::BuildMember, "body")?;
        if emitter.chain.has_body() {
            return Err(BuildError::InvalidState("member body emitted twice".to_string()));
        }
        emitter.chain.set_body(body);
        Ok(())
    }

    /// Add an after stage
    pub fn emit_after(&mut self, stage: Stage) -> BuildResult<()> {
        self.emitter(BuildStep::AfterMember, "after")?.chain.push_after(stage);
        Ok(())
    }

    /// Add a catch stage
    pub fn emit_catch(&mut self, stage: Stage) -> BuildResult<()> {
        self.emitter(BuildStep::AfterMember, "catch")?.chain.push_catch(stage);
        Ok(())
    }

    /// Add a finally stage
    pub fn emit_finally(&mut self, stage: Stage) -> BuildResult<()> {
        self.emitter(BuildStep::AfterMember, "finally")?.chain.push_finally(stage);
        Ok(())
    }

    /// Per-entry-point scratch value shared between steps
    pub fn scratch<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let item = match &self.emitter {
            Some(e) => e.scratch.get(key),
            None => self.state.scratch.get(key),
        }?;
        item.clone().downcast::<T>().ok()
    }

    /// Store a scratch value for the current entry point (or the type)
    pub fn set_scratch<T: Any + Send + Sync>(&mut self, key: &str, value: Arc<T>) {
        match self.emitter.as_deref_mut() {
            Some(e) => e.scratch.insert(key.to_string(), value),
            None => self.state.scratch.insert(key.to_string(), value),
        };
    }

    /// Add an instance field (existing name returns the existing index)
    pub fn define_field(&mut self, name: &str, ty: ValueType, init: FieldInit) -> usize {
        self.state.define_field(name, ty, init)
    }

    /// Index of a field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.state.field_index.get(name).copied()
    }

    /// Run `hook` on every new instance
    pub fn add_constructor_hook(&mut self, hook: CtorHook) {
        self.state.ctor_hooks.push(hook);
    }

    /// Attach a call counter to the current entry point
    pub fn register_counter(&mut self, counter: Arc<dyn MethodCallCounter>) -> BuildResult<()> {
        let method = self
            .method()
            .cloned()
            .ok_or_else(|| {
                BuildError::InvalidState("counter registered outside a member".to_string())
            })?;
        self.state.counters.push((method, counter));
        Ok(())
    }
}
