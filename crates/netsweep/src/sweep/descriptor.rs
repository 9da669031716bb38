//! Job descriptors and combination expansion.
//!
//! One descriptor per (solver, model) pair, created once when the combination
//! list is expanded and never mutated afterwards. The expansion order is
//! canonical: it is the tie-break key of the aggregation pass and the index
//! space of every later lookup, so it must never be re-sorted.

use std::path::PathBuf;
use std::time::Duration;

use crate::sweep::config::RunConfig;
use crate::sweep::solver::SolverFamily;

/// Model catalog; CLI model numbers index into this list.
pub const MODEL_CATALOG: &[(u32, &str)] = &[
    (1, "m1_basic.R"),
    (2, "m2_basic2_v2.R"),
    (3, "m3_descrete_segment.R"),
    (4, "m4_parallel_links.R"),
];

pub fn model_file_name(id: u32) -> Option<&'static str> {
    MODEL_CATALOG
        .iter()
        .find(|(model_id, _)| *model_id == id)
        .map(|(_, name)| *name)
}

/// Models m1/m3 use a single flow variable `q`; m2/m4 use a `q1`/`q2` pair.
/// The generated AMPL display block differs accordingly.
pub fn model_uses_single_flow_variable(short_model_name: &str) -> bool {
    matches!(short_model_name, "m1" | "m3")
}

/// Immutable description of one (solver, model, data) combination plus all
/// identifiers and paths derived from it.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Position in the canonical expansion order.
    pub index: usize,
    pub solver: SolverFamily,
    pub model_name: String,
    /// Model name truncated at its first underscore, e.g. `m1`.
    pub short_model_name: String,
    /// `<solver>_<short-model>_<data-hash>`, unique within one run.
    pub combination: String,
    /// Session name: the run's unique prefix followed by the combination.
    /// The prefix carries the orchestrator pid, so simultaneous invocations
    /// against the same data file never collide.
    pub session_name: String,
    pub output_dir: PathBuf,
    pub transcript_path: PathBuf,
    /// Liveness-token file the backend's session writes its pid into.
    pub pid_file_path: PathBuf,
    pub data_file: PathBuf,
    pub data_file_hash: String,
    pub time_limit: Duration,
    pub threads: u32,
}

impl JobDescriptor {
    pub fn new(config: &RunConfig, index: usize, solver: SolverFamily, model_name: &str) -> Self {
        let short_model_name = model_name
            .split('_')
            .next()
            .unwrap_or(model_name)
            .to_string();
        let combination = format!(
            "{}_{}_{}",
            solver.name(),
            short_model_name,
            config.data_file_hash
        );
        let session_name = format!("{}{}", config.session_prefix, combination);
        let output_dir = config.run_dir.join(&combination);
        let transcript_path = output_dir.join("std_out_err.txt");
        let pid_file_path = PathBuf::from(format!("/tmp/pid_{session_name}.txt"));
        JobDescriptor {
            index,
            solver,
            model_name: model_name.to_string(),
            short_model_name,
            combination,
            session_name,
            output_dir,
            transcript_path,
            pid_file_path,
            data_file: config.data_file.clone(),
            data_file_hash: config.data_file_hash.clone(),
            time_limit: config.time_limit,
            threads: config.threads_per_solver,
        }
    }
}

/// Flattens the configured `(solver, [models...])` entries into the canonical
/// job list.
pub fn expand_combinations(config: &RunConfig) -> Vec<JobDescriptor> {
    config
        .combinations
        .iter()
        .enumerate()
        .map(|(index, (solver, model_name))| JobDescriptor::new(config, index, *solver, model_name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::config::test_util::test_config;

    #[test]
    fn expansion_keeps_canonical_order() {
        let config = test_config(
            vec![
                (SolverFamily::Baron, "m1_basic.R".to_string()),
                (SolverFamily::Baron, "m2_basic2_v2.R".to_string()),
                (SolverFamily::Octeract, "m1_basic.R".to_string()),
            ],
            2,
        );
        let jobs = expand_combinations(&config);
        assert_eq!(jobs.len(), 3);
        assert_eq!(
            jobs.iter().map(|j| j.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(jobs[0].short_model_name, "m1");
        assert_eq!(jobs[1].short_model_name, "m2");
        assert_eq!(jobs[2].solver, SolverFamily::Octeract);
    }

    #[test]
    fn derived_identifiers() {
        let config = test_config(vec![(SolverFamily::Baron, "m1_basic.R".to_string())], 1);
        let job = &expand_combinations(&config)[0];
        assert_eq!(job.combination, format!("baron_m1_{}", config.data_file_hash));
        assert!(job.session_name.starts_with(&config.session_prefix));
        assert!(job.session_name.ends_with(&job.combination));
        assert_eq!(job.transcript_path, job.output_dir.join("std_out_err.txt"));
        // The pid file carries the session prefix, so two simultaneous runs
        // against the same data file cannot collide in /tmp.
        assert!(
            job.pid_file_path
                .to_str()
                .unwrap()
                .contains(&config.session_prefix)
        );
    }

    #[test]
    fn model_catalog_lookup() {
        assert_eq!(model_file_name(1), Some("m1_basic.R"));
        assert_eq!(model_file_name(9), None);
        assert!(model_uses_single_flow_variable("m1"));
        assert!(!model_uses_single_flow_variable("m2"));
    }
}
