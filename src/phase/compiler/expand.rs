use std::collections::BTreeSet;

use crate::error::DefinitionError;

use super::super::definition::{PhaseDefinition, PhaseDraft, StartWithDelay};
use super::super::model::{ClosedModel, ConstantRateModel, Model, RampRateModel, SequentiallyModel};
use super::template::{ForkTemplate, ModelTemplate, PhaseReference, PhaseTemplate, RelativeIteration};

const MIN_RATE: f64 = 0.0001;

/// Dense id source shared by every template of one benchmark.
pub(super) struct IdCounter(u32);

impl IdCounter {
    pub(super) const fn new() -> Self {
        Self(0)
    }

    fn next(&mut self) -> u32 {
        let id = self.0;
        self.0 = self.0.saturating_add(1);
        id
    }
}

pub(super) fn format_iteration(name: &str, iteration: u32) -> String {
    format!("{}/{:03}", name, iteration)
}

/// Expands one template into its work phases followed by its barriers.
pub(super) fn expand_template(
    template: &PhaseTemplate,
    ids: &mut IdCounter,
) -> Result<Vec<PhaseDefinition>, DefinitionError> {
    if template.max_iterations == 0 {
        return Err(DefinitionError::NoIterations {
            phase: template.name.clone(),
        });
    }
    if matches!(template.model, ModelTemplate::Noop) {
        return expand_noop(template, ids);
    }
    match template.forks.as_slice() {
        [] => {
            return Err(DefinitionError::MissingScenario {
                phase: template.name.clone(),
            });
        }
        [only] if only.name.is_some() => {
            return Err(DefinitionError::SingleNamedFork {
                phase: template.name.clone(),
            });
        }
        _ => {}
    }
    let has_forks = template.forks.len() > 1;
    let forks = normalize_forks(template)?;

    let mut phases = Vec::new();
    for iteration in 0..template.max_iterations {
        for (fork, weight) in &forks {
            phases.push(build_phase(template, ids.next(), iteration, fork, *weight)?);
        }
    }

    if template.is_iterated() {
        if has_forks {
            for iteration in 0..template.max_iterations {
                let iteration_name = format_iteration(&template.name, iteration);
                let members = fork_names(&iteration_name, &forks);
                phases.push(PhaseDefinition::barrier(
                    ids.next(),
                    iteration,
                    iteration_name,
                    0,
                    BTreeSet::new(),
                    members.clone(),
                    members,
                ));
            }
        }
        phases.push(final_barrier(template, ids, 0));
    } else if has_forks {
        let members = fork_names(&template.name, &forks);
        phases.push(PhaseDefinition::barrier(
            ids.next(),
            0,
            template.name.clone(),
            0,
            BTreeSet::new(),
            members.clone(),
            members,
        ));
    }
    Ok(phases)
}

fn expand_noop(
    template: &PhaseTemplate,
    ids: &mut IdCounter,
) -> Result<Vec<PhaseDefinition>, DefinitionError> {
    let duration = template.duration_ms.unwrap_or(0);
    let mut phases = Vec::new();
    for iteration in 0..template.max_iterations {
        phases.push(PhaseDefinition::barrier(
            ids.next(),
            iteration,
            iteration_name(template, iteration, None),
            duration,
            iteration_references(template, &template.start_after, iteration, false)?,
            iteration_references(template, &template.start_after_strict, iteration, true)?,
            iteration_references(template, &template.terminate_after_strict, iteration, false)?,
        ));
    }
    if template.is_iterated() {
        phases.push(final_barrier(template, ids, duration));
    }
    Ok(phases)
}

/// Joins the last iteration so that plain references to the template wait
/// for every iteration.
fn final_barrier(template: &PhaseTemplate, ids: &mut IdCounter, duration: u64) -> PhaseDefinition {
    let last = format_iteration(&template.name, template.max_iterations.saturating_sub(1));
    let members: BTreeSet<String> = std::iter::once(last).collect();
    PhaseDefinition::barrier(
        ids.next(),
        0,
        template.name.clone(),
        duration,
        BTreeSet::new(),
        members.clone(),
        members,
    )
}

fn fork_names(prefix: &str, forks: &[(&ForkTemplate, f64)]) -> BTreeSet<String> {
    forks
        .iter()
        .filter_map(|(fork, _)| fork.name.as_deref())
        .map(|name| format!("{}/{}", prefix, name))
        .collect()
}

/// Drops non-positive weights and scales the rest to sum to one.
#[expect(
    clippy::float_arithmetic,
    reason = "Fork weights are fractional by nature"
)]
fn normalize_forks(
    template: &PhaseTemplate,
) -> Result<Vec<(&ForkTemplate, f64)>, DefinitionError> {
    let surviving: Vec<&ForkTemplate> = template
        .forks
        .iter()
        .filter(|fork| fork.weight > 0.0)
        .collect();
    let sum: f64 = surviving.iter().map(|fork| fork.weight).sum();
    if surviving.is_empty() || sum <= 0.0 {
        return Err(DefinitionError::NotPositive {
            phase: template.name.clone(),
            field: "fork weight",
        });
    }
    Ok(surviving
        .into_iter()
        .map(|fork| (fork, fork.weight / sum))
        .collect())
}

fn iteration_name(template: &PhaseTemplate, iteration: u32, fork: Option<&str>) -> String {
    let base = if template.is_iterated() {
        format_iteration(&template.name, iteration)
    } else {
        template.name.clone()
    };
    match fork {
        Some(fork) => format!("{}/{}", base, fork),
        None => base,
    }
}

fn shared_resources(template: &PhaseTemplate, fork: Option<&str>) -> String {
    match fork {
        Some(fork) => format!("{}/{}", template.name, fork),
        None => template.name.clone(),
    }
}

fn build_phase(
    template: &PhaseTemplate,
    id: u32,
    iteration: u32,
    fork: &ForkTemplate,
    weight: f64,
) -> Result<PhaseDefinition, DefinitionError> {
    let fork_name = fork.name.as_deref();
    let start_with_delay = match &template.start_with {
        Some(delay) => resolve_reference(template, &delay.reference, iteration)?.map(|phase| {
            StartWithDelay {
                phase,
                delay_ms: delay.delay_ms,
            }
        }),
        None => None,
    };
    PhaseDefinition::try_new(PhaseDraft {
        id,
        iteration,
        name: iteration_name(template, iteration, fork_name),
        scenario: Some(fork.scenario.clone()),
        start_time_ms: if iteration == 0 {
            template.start_time_ms
        } else {
            None
        },
        start_after: iteration_references(template, &template.start_after, iteration, false)?,
        start_after_strict: iteration_references(
            template,
            &template.start_after_strict,
            iteration,
            true,
        )?,
        terminate_after_strict: iteration_references(
            template,
            &template.terminate_after_strict,
            iteration,
            false,
        )?,
        start_with_delay,
        duration_ms: template.duration_ms,
        max_duration_ms: template.max_duration_ms,
        shared_resources: shared_resources(template, fork_name),
        model: instantiate_model(template, iteration, weight)?,
        slas: template.slas.clone(),
    })
}

/// Resolves references for one iteration. With `add_self_previous` every
/// iteration after the first also waits for the previous one to terminate.
fn iteration_references(
    template: &PhaseTemplate,
    references: &[PhaseReference],
    iteration: u32,
    add_self_previous: bool,
) -> Result<BTreeSet<String>, DefinitionError> {
    let mut names = BTreeSet::new();
    for reference in references {
        if let Some(name) = resolve_reference(template, reference, iteration)? {
            names.insert(name);
        }
    }
    if add_self_previous && iteration > 0 {
        names.insert(format_iteration(&template.name, iteration.saturating_sub(1)));
    }
    Ok(names)
}

fn resolve_reference(
    template: &PhaseTemplate,
    reference: &PhaseReference,
    iteration: u32,
) -> Result<Option<String>, DefinitionError> {
    if reference.iteration != RelativeIteration::None && !template.is_iterated() {
        return Err(DefinitionError::RelativeIterationWithoutIterations {
            phase: template.name.clone(),
            reference: reference.to_string(),
        });
    }
    let base = match reference.iteration {
        RelativeIteration::None => reference.phase.clone(),
        RelativeIteration::Previous => match iteration.checked_sub(1) {
            Some(previous) => format_iteration(&reference.phase, previous),
            None => return Ok(None),
        },
        RelativeIteration::Same => format_iteration(&reference.phase, iteration),
    };
    Ok(Some(match &reference.fork {
        Some(fork) => format!("{}/{}", base, fork),
        None => base,
    }))
}

#[expect(
    clippy::float_arithmetic,
    reason = "Per-iteration rates and fork weights are fractional"
)]
fn instantiate_model(
    template: &PhaseTemplate,
    iteration: u32,
    weight: f64,
) -> Result<Model, DefinitionError> {
    let phase = template.name.as_str();
    let scale = |value: f64| -> u32 { value.max(0.0).min(f64::from(u32::MAX)) as u32 };
    let last_iteration = f64::from(template.max_iterations.saturating_sub(1));
    let at = f64::from(iteration);
    match template.model {
        ModelTemplate::AtOnce {
            users,
            users_increment,
        }
        | ModelTemplate::Always {
            users,
            users_increment,
        } => {
            if users == 0 {
                return Err(DefinitionError::NotPositive {
                    phase: phase.to_owned(),
                    field: "users",
                });
            }
            let base = f64::from(users) + f64::from(users_increment) * at;
            let closed = ClosedModel {
                users: scale((base * weight).round()),
            };
            Ok(if matches!(template.model, ModelTemplate::AtOnce { .. }) {
                Model::AtOnce(closed)
            } else {
                Model::Always(closed)
            })
        }
        ModelTemplate::RampRate {
            initial_users_per_sec,
            initial_users_per_sec_increment,
            target_users_per_sec,
            target_users_per_sec_increment,
            max_sessions,
            variance,
            session_limit_policy,
        } => {
            if initial_users_per_sec < 0.0 {
                return Err(DefinitionError::Negative {
                    phase: phase.to_owned(),
                    field: "initial_users_per_sec",
                });
            }
            if target_users_per_sec < 0.0 {
                return Err(DefinitionError::Negative {
                    phase: phase.to_owned(),
                    field: "target_users_per_sec",
                });
            }
            if initial_users_per_sec < MIN_RATE && target_users_per_sec < MIN_RATE {
                return Err(DefinitionError::ZeroRampRates {
                    phase: phase.to_owned(),
                });
            }
            let max_sessions = match max_sessions.filter(|cap| *cap > 0) {
                Some(cap) => scale((f64::from(cap) * weight).round()),
                None => {
                    let max_initial =
                        initial_users_per_sec + initial_users_per_sec_increment * last_iteration;
                    let max_target =
                        target_users_per_sec + target_users_per_sec_increment * last_iteration;
                    scale((max_initial.max(max_target) * weight).ceil())
                }
            };
            Ok(Model::RampRate(RampRateModel {
                initial_users_per_sec: (initial_users_per_sec
                    + initial_users_per_sec_increment * at)
                    * weight,
                target_users_per_sec: (target_users_per_sec
                    + target_users_per_sec_increment * at)
                    * weight,
                variance,
                max_sessions,
                session_limit_policy,
            }))
        }
        ModelTemplate::ConstantRate {
            users_per_sec,
            users_per_sec_increment,
            max_sessions,
            variance,
            session_limit_policy,
        } => {
            if users_per_sec <= 0.0 {
                return Err(DefinitionError::NotPositive {
                    phase: phase.to_owned(),
                    field: "users_per_sec",
                });
            }
            let max_sessions = match max_sessions.filter(|cap| *cap > 0) {
                Some(cap) => scale((f64::from(cap) * weight).round()),
                None => scale(
                    (weight * (users_per_sec + users_per_sec_increment * last_iteration)).ceil(),
                ),
            };
            Ok(Model::ConstantRate(ConstantRateModel {
                users_per_sec: (users_per_sec + users_per_sec_increment * at) * weight,
                variance,
                max_sessions,
                session_limit_policy,
            }))
        }
        ModelTemplate::Sequentially { repeats } => {
            if repeats == 0 {
                return Err(DefinitionError::NotPositive {
                    phase: phase.to_owned(),
                    field: "repeats",
                });
            }
            Ok(Model::Sequentially(SequentiallyModel { repeats }))
        }
        ModelTemplate::Noop => Ok(Model::Noop),
    }
}
