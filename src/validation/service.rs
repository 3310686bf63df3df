//! Checks, in order, that the loaded artifact is a pipeline, that it has every
//! reference step, and that each shared step has the reference kind. Fitted
//! parameters never take part in the comparison.

use std::collections::HashMap;

use crate::common::error::{ServeError, ServeResult};
use crate::pipeline::{Artifact, Pipeline, Step};

/// Validate `loaded` against `reference`, returning the loaded pipeline on success.
pub fn validate<'a>(loaded: &'a Artifact, reference: &Pipeline) -> ServeResult<&'a Pipeline> {
    let pipeline = check_is_pipeline(loaded)?;
    let steps: HashMap<&str, &Step> = pipeline
        .steps()
        .iter()
        .map(|s| (s.name.as_str(), &s.step))
        .collect();
    check_step_names(&steps, reference)?;
    check_step_kinds(&steps, reference)?;
    Ok(pipeline)
}

fn check_is_pipeline(loaded: &Artifact) -> ServeResult<&Pipeline> {
    loaded.as_pipeline().ok_or_else(|| {
        tracing::error!(actual = %loaded.type_name(), "loaded artifact is not a pipeline");
        ServeError::TypeMismatch {
            expected: "Pipeline",
            actual: loaded.type_name(),
        }
    })
}

fn check_step_names(steps: &HashMap<&str, &Step>, reference: &Pipeline) -> ServeResult<()> {
    let missing: Vec<String> = reference
        .step_names()
        .into_iter()
        .filter(|name| !steps.contains_key(name))
        .map(String::from)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    tracing::error!(missing = ?missing, "loaded pipeline is missing steps");
    Err(ServeError::MissingSteps(missing))
}

fn check_step_kinds(steps: &HashMap<&str, &Step>, reference: &Pipeline) -> ServeResult<()> {
    for expected in reference.steps() {
        let Some(actual) = steps.get(expected.name.as_str()) else {
            continue;
        };
        if actual.kind() != expected.step.kind() {
            tracing::error!(
                step = %expected.name,
                expected = %expected.step.kind(),
                actual = %actual.kind(),
                "pipeline step kind mismatch"
            );
            return Err(ServeError::StepTypeMismatch {
                step: expected.name.clone(),
                expected: expected.step.kind().to_string(),
                actual: actual.kind().to_string(),
            });
        }
    }
    Ok(())
}
