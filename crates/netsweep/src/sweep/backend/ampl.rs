//! Interactive AMPL session backend for Baron and Octeract.
//!
//! The session writes its shell pid as the liveness token, then feeds AMPL a
//! here-document that loads the model and data, solves, and displays the
//! solution. The final `display total_cost` at display precision 0 is the line
//! the aggregation pass scrapes.

use std::path::{Path, PathBuf};

use crate::sweep::backend::{
    ExecutionBackend, LaunchFuture, prepare_output_dir, spawn_tmux_session, wait_for_liveness,
};
use crate::sweep::config::{Intervals, RunConfig};
use crate::sweep::descriptor::{JobDescriptor, model_uses_single_flow_variable};

/// Path of the AMPL driver binary, relative to the working directory.
pub const AMPL_PATH: &str = "./ampl.linux-intel64/ampl";

pub struct AmplSessionBackend {
    models_dir: PathBuf,
    intervals: Intervals,
}

impl AmplSessionBackend {
    pub fn new(config: &RunConfig) -> Self {
        AmplSessionBackend {
            models_dir: config.models_dir.clone(),
            intervals: config.intervals.clone(),
        }
    }
}

impl ExecutionBackend for AmplSessionBackend {
    fn launch<'a>(&'a self, job: &'a JobDescriptor) -> LaunchFuture<'a> {
        Box::pin(async move {
            prepare_output_dir(job)?;
            let script = ampl_driver_script(job, &self.models_dir);
            spawn_tmux_session(&job.session_name, &script).await?;
            wait_for_liveness(job, &self.intervals).await
        })
    }
}

/// Builds the shell script one AMPL session runs. The trailing
/// `echo > /dev/null` keeps the shell alive long enough for the here-document
/// to reach AMPL reliably.
pub(crate) fn ampl_driver_script(job: &JobDescriptor, models_dir: &Path) -> String {
    let flow_display = if model_uses_single_flow_variable(&job.short_model_name) {
        "q[i,j]"
    } else {
        "(q1[i,j], q2[i,j])"
    };
    format!(
        r#"echo $$ > "{pid_file}"
{ampl} > "{transcript}" 2>&1 <<EOF
    reset;
    model "{model}";
    data "{data}";
    option solver "{engine}";
    option presolve_eps 1e-9;
    {engine_options}
    solve;
    display _total_solve_time;
    option display_1col 9223372036854775807;
    option display_precision 6;
    display {{i in nodes}} h[i];
    display {{(i,j) in arcs}} {flow_display};
    option display_eps 1e-4;
    option omit_zero_rows 1;
    display {{(i,j) in arcs, k in pipes}} l[i,j,k];
    display _total_solve_time;
    option display_precision 0;
    display total_cost;
EOF
echo > /dev/null
"#,
        pid_file = job.pid_file_path.display(),
        ampl = AMPL_PATH,
        transcript = job.transcript_path.display(),
        model = models_dir.join(&job.model_name).display(),
        data = job.data_file.display(),
        engine = job.solver.engine_path(),
        engine_options = job.solver.engine_options(job.threads, job.time_limit),
    )
}
