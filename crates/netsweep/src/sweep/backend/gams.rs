//! Batch GAMS submission backend for AlphaECP.
//!
//! Unlike the AMPL flavor there is no interactive driver: GAMS is handed a
//! pre-generated `.gms` job file derived from the data file name and runs it
//! to completion on its own, bounded by `reslim`.

use std::path::PathBuf;

use crate::sweep::backend::{
    ExecutionBackend, LaunchFuture, prepare_output_dir, spawn_tmux_session, wait_for_liveness,
};
use crate::sweep::config::{Intervals, RunConfig};
use crate::sweep::descriptor::JobDescriptor;

pub struct GamsBatchBackend {
    intervals: Intervals,
}

impl GamsBatchBackend {
    pub fn new(config: &RunConfig) -> Self {
        GamsBatchBackend {
            intervals: config.intervals.clone(),
        }
    }
}

impl ExecutionBackend for GamsBatchBackend {
    fn launch<'a>(&'a self, job: &'a JobDescriptor) -> LaunchFuture<'a> {
        Box::pin(async move {
            prepare_output_dir(job)?;
            let script = gams_submit_script(job);
            spawn_tmux_session(&job.session_name, &script).await?;
            wait_for_liveness(job, &self.intervals).await
        })
    }
}

/// Path of the GAMS job file that belongs to this job's data file and model,
/// e.g. `network.R` plus model `m1` becomes `networkm1.gms`.
pub(crate) fn gams_job_file(job: &JobDescriptor) -> PathBuf {
    let data = job.data_file.to_string_lossy();
    let base = data.strip_suffix(".R").unwrap_or(&data);
    PathBuf::from(format!("{base}{}.gms", job.short_model_name))
}

pub(crate) fn gams_submit_script(job: &JobDescriptor) -> String {
    format!(
        r#"echo $$ > "{pid_file}"
"{gams}" "{job_file}" {engine_options} > "{transcript}" 2>&1
"#,
        pid_file = job.pid_file_path.display(),
        gams = job.solver.engine_path(),
        job_file = gams_job_file(job).display(),
        engine_options = job.solver.engine_options(job.threads, job.time_limit),
        transcript = job.transcript_path.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::config::test_util::test_config;
    use crate::sweep::descriptor::expand_combinations;
    use crate::sweep::solver::SolverFamily;

    #[test]
    fn job_file_derived_from_data_file_and_model() {
        let mut config = test_config(
            vec![(SolverFamily::AlphaEcp, "m1_basic.R".to_string())],
            1,
        );
        config.data_file = PathBuf::from("/data/network.R");
        let job = &expand_combinations(&config)[0];
        assert_eq!(gams_job_file(job), PathBuf::from("/data/networkm1.gms"));
    }

    #[test]
    fn submit_script_bounds_the_solver_with_reslim() {
        let config = test_config(
            vec![(SolverFamily::AlphaEcp, "m2_basic2_v2.R".to_string())],
            1,
        );
        let job = &expand_combinations(&config)[0];
        let script = gams_submit_script(job);
        // 300 s limit minus the 30 s solver margin.
        assert!(script.contains("reslim=270"));
        assert!(script.starts_with(&format!(
            "echo $$ > \"{}\"",
            job.pid_file_path.display()
        )));
    }
}
