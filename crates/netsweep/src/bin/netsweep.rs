use anyhow::Context;
use clap::Parser;

use netsweep::common::cli::RootOptions;
use netsweep::common::error::NetError;
use netsweep::common::setup::setup_logging;
use netsweep::sweep::backend::ampl::AmplSessionBackend;
use netsweep::sweep::backend::gams::GamsBatchBackend;
use netsweep::sweep::config::RunConfig;
use netsweep::sweep::scheduler::SweepRun;
use netsweep::sweep::session::TmuxSessionQuery;

/// The session and process-tree plumbing shells out to these.
fn check_required_tools() -> anyhow::Result<()> {
    for tool in ["tmux", "bash"] {
        which::which(tool).with_context(|| format!("'{tool}' was not found in PATH"))?;
    }
    Ok(())
}

async fn run(opts: RootOptions) -> anyhow::Result<()> {
    check_required_tools()?;
    let config = RunConfig::from_options(&opts)?;
    log::info!(
        "netsweep {} on {}, time limit {}, session prefix '{}'",
        netsweep::NETSWEEP_VERSION,
        gethostname::gethostname().to_string_lossy(),
        humantime::format_duration(config.time_limit),
        config.session_prefix
    );

    let sessions = TmuxSessionQuery;
    let interactive = AmplSessionBackend::new(&config);
    let batch = GamsBatchBackend::new(&config);
    let verdict = SweepRun::new(&config, &interactive, &batch, &sessions)
        .execute()
        .await?;

    match verdict.best {
        Some(best) => log::info!(
            "Best cost {} found by solver={}, model={}",
            best.objective,
            best.solver.name(),
            best.short_model_name
        ),
        None => log::warn!("No feasible solution was found by any combination"),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = RootOptions::parse();
    setup_logging(opts.debug);

    let exit_code = match run(opts).await {
        Ok(()) => 0,
        Err(error)
            if matches!(
                error.downcast_ref::<NetError>(),
                Some(NetError::AllLaunchesFailed)
            ) =>
        {
            log::error!("{error}");
            3
        }
        Err(error) => {
            log::error!("{error:?}");
            1
        }
    };
    std::process::exit(exit_code);
}
