//! Expands phase templates (iterations x weighted forks) into concrete phase
//! definitions joined by barrier phases.
mod expand;
mod resolve;
mod template;

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::DefinitionError;

use super::definition::PhaseDefinition;

pub use template::{
    ForkTemplate, ModelTemplate, PhaseReference, PhaseReferenceDelay, PhaseTemplate,
    RelativeIteration,
};

/// Compiles every template of a benchmark into a flat list of phases with
/// dense ids, in template order.
///
/// # Errors
///
/// Returns a [`DefinitionError`] when a template is malformed or the
/// resulting graph references an undefined phase, repeats a name or
/// contains a start dependency cycle.
pub fn compile(templates: &[PhaseTemplate]) -> Result<Vec<PhaseDefinition>, DefinitionError> {
    let mut seen = BTreeSet::new();
    for template in templates {
        if !seen.insert(template.name()) {
            return Err(DefinitionError::DuplicatePhase {
                phase: template.name().to_owned(),
            });
        }
    }

    let mut ids = expand::IdCounter::new();
    let mut phases = Vec::new();
    for template in templates {
        let expanded = expand::expand_template(template, &mut ids)?;
        debug!(
            "Template {} expanded into {} phases",
            template.name(),
            expanded.len()
        );
        phases.extend(expanded);
    }
    resolve::check_graph(&phases)?;
    Ok(phases)
}
