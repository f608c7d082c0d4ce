//! Type synthesis
//!
//! [`TypeSynthesizer`] drives a [`BuildPlan`] through the build steps and
//! assembles the result into a [`GeneratedType`]. A synthesis either ends in
//! [`SynthesisState::Completed`] with a type, or in
//! [`SynthesisState::Failed`] with the first error; a failed synthesis
//! leaves nothing behind.

mod generated;
mod instance;

pub use generated::{CompiledMember, GeneratedType};
pub use instance::{InitContext, Instance};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::builder::{
    BuildContext, BuildServices, BuildStep, BuilderRegistry, FieldInit, MemberEmitter, MemberUnit,
    TypeBuilder, TypeState,
};
use crate::cache::GeneratedTypeKey;
use crate::error::{BuildError, BuildResult, CallError};
use crate::intercept::{body_stage, BodyStage, CallMethodInfo};
use crate::model::MustImplementPolicy;
use crate::resolve::{BuildPlan, MemberOrigin, PlanKind};
use generated::GeneratedTypeParts;

/// Progress of one synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisState {
    /// Inside a build step
    Step(BuildStep),
    /// Finished with a type
    Completed,
    /// Finished with an error
    Failed,
}

/// Step sequencer; steps may only be entered in order
#[derive(Debug)]
struct StateMachine {
    state: SynthesisState,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: SynthesisState::Step(BuildStep::Begin),
        }
    }

    fn advance(&mut self, to: BuildStep) -> BuildResult<()> {
        match self.state {
            SynthesisState::Step(current) if current.next() == Some(to) => {
                self.state = SynthesisState::Step(to);
                Ok(())
            }
            other => Err(BuildError::InvalidState(format!(
                "cannot enter {:?} from {:?}",
                to, other
            ))),
        }
    }

    fn complete(&mut self) -> BuildResult<()> {
        match self.state {
            SynthesisState::Step(BuildStep::End) => {
                self.state = SynthesisState::Completed;
                Ok(())
            }
            other => Err(BuildError::InvalidState(format!("cannot complete from {:?}", other))),
        }
    }

    fn fail(&mut self) {
        self.state = SynthesisState::Failed;
    }
}

/// Runs builders over a plan
pub struct TypeSynthesizer<'a> {
    registry: &'a BuilderRegistry,
    services: &'a BuildServices,
}

struct Work<'p> {
    name: Arc<str>,
    plan: &'p BuildPlan,
    units: Vec<MemberUnit>,
    emitters: Vec<MemberEmitter>,
    state: TypeState,
}

impl<'a> TypeSynthesizer<'a> {
    /// Synthesizer over `registry`'s global builders
    pub fn new(registry: &'a BuilderRegistry, services: &'a BuildServices) -> Self {
        Self { registry, services }
    }

    /// Generate a type from `plan`
    pub fn synthesize(
        &self,
        plan: &BuildPlan,
        key: GeneratedTypeKey,
    ) -> BuildResult<Arc<GeneratedType>> {
        let mut machine = StateMachine::new();
        match self.run(&mut machine, plan, key) {
            Ok(ty) => {
                machine.complete()?;
                debug!(
                    name = ty.name(),
                    members = ty.members().len(),
                    fields = ty.fields().len(),
                    "type synthesized"
                );
                Ok(ty)
            }
            Err(e) => {
                machine.fail();
                warn!(source = plan.source.name(), error = %e, "type synthesis failed");
                Err(e)
            }
        }
    }

    fn run(
        &self,
        machine: &mut StateMachine,
        plan: &BuildPlan,
        key: GeneratedTypeKey,
    ) -> BuildResult<Arc<GeneratedType>> {
        let config = self.services.config();
        let name: Arc<str> = match &plan.kind {
            PlanKind::Standard => {
                Arc::from(format!("{}{}", plan.source.name(), config.type_name_suffix))
            }
            PlanKind::Duck(backing) => {
                let names: Vec<&str> = backing.iter().map(|t| t.source().name()).collect();
                Arc::from(format!("{}$Duck<{}>", plan.source.name(), names.join(",")))
            }
        };

        let requires_constructor = !plan.is_duck() && !plan.source.is_interface();
        if requires_constructor
            && plan.constructors.is_empty()
            && plan.object_factory().is_none()
            && !self.services.factory().has_object_factory(&plan.source)
        {
            return Err(BuildError::NoConstructor {
                type_name: plan.source.name().to_string(),
            });
        }

        let mut units = Vec::new();
        for (plan_index, member_plan) in plan.members.iter().enumerate() {
            let member = &member_plan.member;
            for accessor in member.accessors() {
                let slot = units.len();
                units.push(MemberUnit {
                    slot,
                    plan_index,
                    accessor,
                    method: Arc::new(CallMethodInfo {
                        type_name: name.clone(),
                        member: member.clone(),
                        accessor,
                        params: member.params_for(accessor),
                        return_type: member.return_type_for(accessor),
                        fingerprint: member.fingerprint(),
                        slot,
                    }),
                });
            }
        }

        let mut work = Work {
            name,
            plan,
            emitters: units.iter().map(|_| MemberEmitter::default()).collect(),
            units,
            state: TypeState::default(),
        };
        for field in &plan.fields {
            let init = match &field.initial {
                Some(v) => FieldInit::Value(v.clone()),
                None => FieldInit::Default,
            };
            work.state.define_field(&field.name, field.ty.clone(), init);
        }

        machine.advance(BuildStep::BeforeType)?;
        self.type_step(&mut work, BuildStep::BeforeType)?;
        machine.advance(BuildStep::BeforeMember)?;
        self.member_step(&mut work, BuildStep::BeforeMember)?;
        machine.advance(BuildStep::BuildMember)?;
        self.member_step(&mut work, BuildStep::BuildMember)?;
        machine.advance(BuildStep::AfterMember)?;
        self.member_step(&mut work, BuildStep::AfterMember)?;
        machine.advance(BuildStep::AfterType)?;
        self.type_step(&mut work, BuildStep::AfterType)?;
        machine.advance(BuildStep::End)?;
        self.assemble(work, key, requires_constructor)
    }

    fn type_step(&self, work: &mut Work<'_>, step: BuildStep) -> BuildResult<()> {
        let mut ctx = BuildContext {
            step,
            type_name: &work.name,
            plan: work.plan,
            units: &work.units,
            unit: None,
            emitter: None,
            state: &mut work.state,
            services: self.services,
        };
        for builder in self.registry.resolve(&ctx, &work.plan.type_builders)? {
            builder.build(&mut ctx)?;
        }
        Ok(())
    }

    fn member_step(&self, work: &mut Work<'_>, step: BuildStep) -> BuildResult<()> {
        for (i, unit) in work.units.iter().enumerate() {
            let member_plan = &work.plan.members[unit.plan_index];
            let local: Vec<Arc<dyn TypeBuilder>> = member_plan
                .builders
                .iter()
                .chain(work.plan.type_builders.iter())
                .cloned()
                .collect();

            let mut ctx = BuildContext {
                step,
                type_name: &work.name,
                plan: work.plan,
                units: &work.units,
                unit: Some(unit),
                emitter: Some(&mut work.emitters[i]),
                state: &mut work.state,
                services: self.services,
            };
            let builders = self.registry.resolve(&ctx, &local)?;
            for builder in &builders {
                builder.build(&mut ctx)?;
            }

            let mut fallback = None;
            if step == BuildStep::BuildMember && !builders.iter().any(|b| b.owns_body()) {
                fallback = Some(self.fallback_body(&ctx)?);
            }
            drop(ctx);

            let emitter = &mut work.emitters[i];
            emitter.applied.extend(builders.iter().map(|b| b.name().to_string()));
            if let Some(body) = fallback {
                emitter.chain.set_body(body);
            }
        }
        Ok(())
    }

    /// Body used when no body owner applies: the source body when there is
    /// one, otherwise the must-implement policy of an interface member
    fn fallback_body(&self, ctx: &BuildContext<'_>) -> BuildResult<BodyStage> {
        if let Some(body) = ctx.concrete_body() {
            return Ok(body_stage(move |info| {
                let this = info.object().clone();
                body(&this, &mut info.parameter_values)
            }));
        }

        let (Some(plan), Some(method)) = (ctx.member_plan(), ctx.method()) else {
            return Err(BuildError::InvalidState("no member in scope".to_string()));
        };
        let MemberOrigin::Interface(iface) = &plan.origin else {
            return Err(BuildError::UnresolvableMember {
                type_name: ctx.source().name().to_string(),
                member: plan.member.name.to_string(),
                reason: "abstract member and no builder supplies a body".to_string(),
            });
        };

        let message = plan.policy_message.as_deref().map(str::to_string).unwrap_or_else(|| {
            format!(
                "Interface member '{}.{}' is not implemented by '{}'",
                iface.name(),
                plan.member.name,
                ctx.source().name()
            )
        });
        match plan.policy {
            MustImplementPolicy::Required => Err(BuildError::MustImplement(message)),
            MustImplementPolicy::OptionalThrow => {
                Ok(body_stage(move |_| Err(CallError::invalid_operation(message.clone()))))
            }
            MustImplementPolicy::OptionalDefault => {
                let ty = method.return_type.clone();
                Ok(body_stage(move |info| Ok(ty.default_with(info.type_arguments()))))
            }
        }
    }

    fn assemble(
        &self,
        work: Work<'_>,
        key: GeneratedTypeKey,
        requires_constructor: bool,
    ) -> BuildResult<Arc<GeneratedType>> {
        let plan = work.plan;
        let mut members = Vec::with_capacity(work.units.len());
        for (unit, emitter) in work.units.iter().zip(work.emitters) {
            if !emitter.chain.has_body() {
                return Err(BuildError::InvalidState(format!(
                    "'{}' has no body after synthesis",
                    unit.method.full_name()
                )));
            }
            members.push(CompiledMember {
                method: unit.method.clone(),
                qualifier: plan.members[unit.plan_index].qualifier.clone(),
                applied: emitter.applied,
                chain: emitter.chain,
            });
        }

        let aliases = plan
            .aliases
            .iter()
            .flat_map(|alias| {
                work.units
                    .iter()
                    .filter(move |u| u.plan_index == alias.plan_index)
                    .map(move |u| (alias.interface.clone(), alias.fingerprint.name.clone(), u.slot))
            })
            .collect();

        let object_factory = plan.object_factory();
        let requires_constructor = requires_constructor && object_factory.is_none();
        Ok(Arc::new(GeneratedType::new(GeneratedTypeParts {
            name: work.name,
            source: plan.source.clone(),
            key,
            interfaces: plan.interfaces.clone(),
            members,
            aliases,
            fields: work.state.fields,
            constructors: plan.constructors.clone(),
            ctor_hooks: work.state.ctor_hooks,
            object_factory,
            counters: work.state.counters,
            requires_constructor,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_order() {
        let mut m = StateMachine::new();
        assert!(m.advance(BuildStep::BuildMember).is_err());
        m.advance(BuildStep::BeforeType).unwrap();
        m.advance(BuildStep::BeforeMember).unwrap();
        assert!(m.complete().is_err());
        m.fail();
        assert_eq!(m.state, SynthesisState::Failed);
        assert!(m.advance(BuildStep::BuildMember).is_err());
    }
}
