use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::common::timeutils::parse_hms_time;
use crate::sweep::descriptor::model_file_name;
use crate::sweep::solver::SolverFamily;

/// One `--solver-models` entry: a solver name followed by the model numbers it
/// should run, e.g. `baron 1 2 4`.
#[derive(Debug, Clone)]
pub struct SolverModels {
    pub solver: SolverFamily,
    pub models: Vec<u32>,
}

fn parse_solver_models(value: &str) -> Result<SolverModels, String> {
    let mut tokens = value.split_whitespace();
    let solver_name = tokens.next().ok_or("expected a solver name")?;
    let solver = SolverFamily::from_name(solver_name)
        .ok_or_else(|| format!("unknown solver '{solver_name}'"))?;
    let mut models = Vec::new();
    for token in tokens {
        let id: u32 = token
            .parse()
            .map_err(|_| format!("invalid model number '{token}'"))?;
        if model_file_name(id).is_none() {
            return Err(format!("unknown model number {id}"));
        }
        models.push(id);
    }
    if models.is_empty() {
        return Err(format!("no model numbers given for solver '{solver_name}'"));
    }
    Ok(SolverModels { solver, models })
}

fn parse_time_limit(value: &str) -> Result<Duration, String> {
    let duration = parse_hms_time(value).map_err(|e| e.to_string())?;
    // The solver-side margin is 30 s, shorter nonzero limits make no sense.
    if !duration.is_zero() && duration < Duration::from_secs(30) {
        return Err("time limit must be zero or at least 30 seconds".to_string());
    }
    Ok(duration)
}

/// Finds the minimum cost of one network by sweeping (solver, model)
/// combinations against its data file in parallel background sessions.
#[derive(Parser, Debug)]
#[command(author, version = crate::NETSWEEP_VERSION, about)]
pub struct RootOptions {
    /// Path to the network data file.
    #[arg(short = 'p', long)]
    pub path: PathBuf,

    /// Solver name followed by model numbers, e.g. "baron 1 2".
    /// Repeat the flag once per solver.
    #[arg(long = "solver-models", required = true, value_parser = parse_solver_models)]
    pub solver_models: Vec<SolverModels>,

    /// Wall-clock limit per combination as [[hh:]mm:]ss.
    /// Zero disables timeout enforcement.
    #[arg(long, default_value = "00:05:00", value_parser = parse_time_limit)]
    pub time: Duration,

    /// Tag appended to the run directory name.
    #[arg(long, default_value = "5min")]
    pub prefix: String,

    /// CPU cores each solver instance may use.
    #[arg(
        long = "threads-per-solver-instance",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub threads_per_solver_instance: u32,

    /// Combinations allowed to run at once: 0 runs all of them in parallel,
    /// -1 uses the number of CPU cores.
    #[arg(
        short = 'j',
        long = "jobs",
        default_value_t = 0,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(-1..)
    )]
    pub jobs: i64,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<RootOptions, clap::Error> {
        RootOptions::try_parse_from(std::iter::once("netsweep").chain(args.iter().copied()))
    }

    #[test]
    fn solver_models_entry() {
        let entry = parse_solver_models("baron 1 2 4").unwrap();
        assert_eq!(entry.solver, SolverFamily::Baron);
        assert_eq!(entry.models, vec![1, 2, 4]);

        assert!(parse_solver_models("cplex 1").is_err());
        assert!(parse_solver_models("baron").is_err());
        assert!(parse_solver_models("baron 9").is_err());
        assert!(parse_solver_models("baron x").is_err());
    }

    #[test]
    fn time_limit_bounds() {
        assert_eq!(parse_time_limit("00:05:00").unwrap().as_secs(), 300);
        assert_eq!(parse_time_limit("0").unwrap(), Duration::ZERO);
        assert!(parse_time_limit("29").is_err());
        assert_eq!(parse_time_limit("30").unwrap().as_secs(), 30);
    }

    #[test]
    fn full_command_line() {
        let opts = parse(&[
            "-p",
            "network.R",
            "--solver-models",
            "baron 1 2",
            "--solver-models",
            "octeract 1",
            "--time",
            "01:00:00",
            "-j",
            "3",
        ])
        .unwrap();
        assert_eq!(opts.path, PathBuf::from("network.R"));
        assert_eq!(opts.solver_models.len(), 2);
        assert_eq!(opts.time.as_secs(), 3600);
        assert_eq!(opts.prefix, "5min");
        assert_eq!(opts.jobs, 3);
        assert!(!opts.debug);
    }

    #[test]
    fn solver_models_is_required() {
        assert!(parse(&["-p", "network.R"]).is_err());
    }

    #[test]
    fn negative_jobs_only_allows_minus_one() {
        assert_eq!(parse(&["-p", "n.R", "--solver-models", "baron 1", "-j", "-1"])
            .unwrap()
            .jobs, -1);
        assert!(parse(&["-p", "n.R", "--solver-models", "baron 1", "-j", "-2"]).is_err());
    }
}
