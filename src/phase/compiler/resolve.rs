use std::collections::{BTreeMap, BTreeSet};

use crate::error::DefinitionError;

use super::super::definition::PhaseDefinition;

/// Checks that compiled phases have unique names, reference only defined
/// phases and contain no start dependency cycle.
pub(super) fn check_graph(phases: &[PhaseDefinition]) -> Result<(), DefinitionError> {
    let mut by_name: BTreeMap<&str, &PhaseDefinition> = BTreeMap::new();
    for phase in phases {
        if by_name.insert(phase.name.as_str(), phase).is_some() {
            return Err(DefinitionError::DuplicatePhase {
                phase: phase.name.clone(),
            });
        }
    }
    for phase in phases {
        for reference in phase.references() {
            if !by_name.contains_key(reference) {
                return Err(DefinitionError::UnknownPhase {
                    phase: phase.name.clone(),
                    reference: reference.to_owned(),
                    suggestion: suggest(by_name.keys().copied(), reference),
                });
            }
        }
    }
    check_cycles(&by_name)
}

fn suggest<'name, I>(names: I, reference: &str) -> String
where
    I: Iterator<Item = &'name str>,
{
    let needle = reference.to_lowercase();
    let candidates: Vec<&str> = names
        .filter(|name| name.to_lowercase().starts_with(needle.as_str()))
        .collect();
    if candidates.is_empty() {
        String::new()
    } else {
        format!(" Did you mean {}?", candidates.join(" or "))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

fn start_dependencies<'graph>(phase: &'graph PhaseDefinition) -> impl Iterator<Item = &'graph str> {
    phase
        .start_after
        .iter()
        .chain(phase.start_after_strict.iter())
        .map(String::as_str)
}

type Frame<'graph> = (&'graph str, std::vec::IntoIter<&'graph str>);

fn enter<'graph>(
    name: &'graph str,
    by_name: &BTreeMap<&'graph str, &'graph PhaseDefinition>,
    visits: &mut BTreeMap<&'graph str, Visit>,
    stack: &mut Vec<Frame<'graph>>,
) {
    let Some(phase) = by_name.get(name).copied() else {
        return;
    };
    visits.insert(name, Visit::InProgress);
    let dependencies: BTreeSet<&str> = start_dependencies(phase).collect();
    let dependencies: Vec<&str> = dependencies.into_iter().collect();
    stack.push((name, dependencies.into_iter()));
}

/// Depth-first search over start dependencies with an explicit stack, so
/// long iteration chains do not grow the call stack.
fn check_cycles(by_name: &BTreeMap<&str, &PhaseDefinition>) -> Result<(), DefinitionError> {
    let mut visits: BTreeMap<&str, Visit> = BTreeMap::new();
    let mut stack: Vec<Frame<'_>> = Vec::new();
    for root in by_name.keys().copied() {
        if visits.contains_key(root) {
            continue;
        }
        enter(root, by_name, &mut visits, &mut stack);
        while let Some((name, dependencies)) = stack.last_mut() {
            let current = *name;
            let Some(dependency) = dependencies.next() else {
                stack.pop();
                visits.insert(current, Visit::Done);
                continue;
            };
            match visits.get(dependency) {
                Some(Visit::Done) => {}
                Some(Visit::InProgress) => {
                    let start = stack
                        .iter()
                        .position(|(entry, _)| *entry == dependency)
                        .unwrap_or_default();
                    let cycle: Vec<&str> = stack
                        .iter()
                        .skip(start)
                        .map(|(entry, _)| *entry)
                        .chain(std::iter::once(dependency))
                        .collect();
                    return Err(DefinitionError::DependencyCycle {
                        path: cycle.join(" > "),
                    });
                }
                None => enter(dependency, by_name, &mut visits, &mut stack),
            }
        }
    }
    Ok(())
}
