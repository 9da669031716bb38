//! Solver families and their transcript contracts.
//!
//! Each family knows which worker process must receive the graceful interrupt,
//! which engine options to pass through the driver script, and how to scrape an
//! error status and a best objective value out of its transcript. Families are
//! a closed set, so per-family behavior is dispatched through a tagged enum
//! rather than trait objects.

use std::time::Duration;

use crate::sweep::descriptor::JobDescriptor;

/// Objective values of exactly zero or with a magnitude above this threshold
/// are placeholders written by an infeasible or aborted solve, not real optima.
pub const INFEASIBLE_OBJECTIVE_CEILING: f64 = 1e40;

/// Seconds subtracted from the configured limit when passed to the solver
/// itself (`maxtime`/`reslim`), so the solver gives up slightly before the
/// monitor would interrupt it.
pub const SOLVER_TIME_MARGIN_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverFamily {
    Baron,
    Octeract,
    AlphaEcp,
}

impl SolverFamily {
    pub const ALL: [SolverFamily; 3] = [
        SolverFamily::Baron,
        SolverFamily::Octeract,
        SolverFamily::AlphaEcp,
    ];

    pub fn from_name(name: &str) -> Option<SolverFamily> {
        match name {
            "baron" => Some(SolverFamily::Baron),
            "octeract" => Some(SolverFamily::Octeract),
            "alphaecp" => Some(SolverFamily::AlphaEcp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SolverFamily::Baron => "baron",
            SolverFamily::Octeract => "octeract",
            SolverFamily::AlphaEcp => "alphaecp",
        }
    }

    /// Name of the process that must receive SIGINT so the solver flushes its
    /// best-found solution before exiting. A multi-core Octeract run is driven
    /// by an `mpirun` coordinator instead of the engine binary itself.
    pub fn worker_process_name(&self, threads: u32) -> &'static str {
        match self {
            SolverFamily::Baron => "baron",
            SolverFamily::Octeract => {
                if threads > 1 {
                    "mpirun"
                } else {
                    "octeract-engine"
                }
            }
            SolverFamily::AlphaEcp => "alphaecp",
        }
    }

    pub fn engine_path(&self) -> &'static str {
        match self {
            SolverFamily::Baron => "./ampl.linux-intel64/baron",
            SolverFamily::Octeract => "./octeract-engine-4.0.0/bin/octeract-engine",
            SolverFamily::AlphaEcp => "/opt/gams/gams42.3_linux_x64_64_sfx/gams",
        }
    }

    /// Solver-specific options for the driver script.
    pub fn engine_options(&self, threads: u32, time_limit: Duration) -> String {
        let maxtime = time_limit
            .as_secs()
            .saturating_sub(SOLVER_TIME_MARGIN_SECS);
        match self {
            SolverFamily::Baron => format!(
                "option baron_options \"threads={threads} barstats keepsol lsolmsg outlev=1 \
                 prfreq=100 prtime=2 maxtime={maxtime} problem \";"
            ),
            SolverFamily::Octeract => {
                format!("options octeract_options \"num_cores={threads}\";")
            }
            SolverFamily::AlphaEcp => format!("reslim={maxtime}"),
        }
    }

    /// Whether jobs of this family go through the batch-submission backend
    /// instead of the interactive session backend.
    pub fn uses_batch_submission(&self) -> bool {
        matches!(self, SolverFamily::AlphaEcp)
    }

    /// Scans the transcript for diagnosable error conditions.
    /// `ok == true` means no error marker was found, not that a solution exists.
    pub fn check_errors(&self, transcript: &str) -> (bool, String) {
        match self {
            SolverFamily::Baron => check_errors_baron(transcript),
            SolverFamily::Octeract => check_errors_octeract(transcript),
            SolverFamily::AlphaEcp => check_errors_alphaecp(transcript),
        }
    }

    /// Extracts the best objective value located in the transcript.
    /// `found == false` when no admissible value is present.
    pub fn extract_best_solution(&self, transcript: &str) -> (bool, f64) {
        match self {
            SolverFamily::AlphaEcp => extract_gams_objective(transcript),
            SolverFamily::Baron => extract_total_cost(transcript),
            SolverFamily::Octeract => {
                let (found, objective) = extract_total_cost(transcript);
                if found {
                    return (found, objective);
                }
                // The engine reports a preprocessing-phase solution outside the
                // usual display block.
                extract_octeract_preprocessing_solution(transcript)
            }
        }
    }

    pub fn solution_found(&self, transcript: &str) -> bool {
        self.extract_best_solution(transcript).0
    }
}

/// Reads the job's transcript and runs the family error check on it.
/// An unreadable transcript is itself a diagnosable failure.
pub fn check_errors_for(job: &JobDescriptor) -> (bool, String) {
    match std::fs::read_to_string(&job.transcript_path) {
        Ok(text) => job.solver.check_errors(&text),
        Err(e) => (
            false,
            format!(
                "Cannot read transcript {}: {e}",
                job.transcript_path.display()
            ),
        ),
    }
}

pub fn extract_best_solution_for(job: &JobDescriptor) -> (bool, f64) {
    match std::fs::read_to_string(&job.transcript_path) {
        Ok(text) => job.solver.extract_best_solution(&text),
        Err(_) => (false, f64::NAN),
    }
}

pub fn solution_found_for(job: &JobDescriptor) -> bool {
    extract_best_solution_for(job).0
}

fn admissible(objective: f64) -> bool {
    objective.is_finite()
        && objective != 0.0
        && objective.abs() <= INFEASIBLE_OBJECTIVE_CEILING
}

/// Looks for the `total_cost = <value>` line written by the driver script at
/// display precision 0.
fn extract_total_cost(transcript: &str) -> (bool, f64) {
    for line in transcript.lines() {
        let Some(rest) = line.trim().strip_prefix("total_cost") else {
            continue;
        };
        let Some(value) = rest.trim_start().strip_prefix('=') else {
            continue;
        };
        let Ok(objective) = value.trim().parse::<f64>() else {
            continue;
        };
        if !admissible(objective) {
            log::warn!("Probably an infeasible solution: '{objective}'");
            return (false, objective);
        }
        return (true, objective);
    }
    (false, f64::NAN)
}

fn extract_octeract_preprocessing_solution(transcript: &str) -> (bool, f64) {
    if !transcript.contains("Found solution during preprocessing") {
        return (false, f64::NAN);
    }
    for line in transcript.lines() {
        let Some(value) = line
            .trim()
            .strip_prefix("Objective value at global solution:")
        else {
            continue;
        };
        if let Ok(objective) = value.trim().parse::<f64>() {
            log::debug!("Solver found the solution during preprocessing: {objective}");
            return (admissible(objective), objective);
        }
    }
    log::warn!("Preprocessing solution reported but its objective value is missing");
    (false, f64::NAN)
}

fn extract_gams_objective(transcript: &str) -> (bool, f64) {
    for line in transcript.lines() {
        let Some(value) = line.trim().strip_prefix("**** OBJECTIVE VALUE") else {
            continue;
        };
        if let Ok(objective) = value.trim().parse::<f64>() {
            if !admissible(objective) {
                log::warn!("Probably an infeasible solution: '{objective}'");
                return (false, objective);
            }
            return (true, objective);
        }
    }
    (false, f64::NAN)
}

/// Returns the slice of `text` between `start` (inclusive) and the following
/// occurrence of `end`, with newlines flattened. Falls back to the rest of the
/// text when `end` is absent.
fn slice_between(text: &str, start: &str, end: &str) -> Option<String> {
    let from = text.find(start)?;
    let tail = &text[from..];
    let message = match tail.find(end) {
        Some(to) if to > 0 => &tail[..to],
        _ => tail,
    };
    Some(message.replace('\n', " ").trim().to_string())
}

/// Error conditions raised by the AMPL driver itself, shared by every family
/// that runs through it.
fn ampl_check_errors(transcript: &str) -> Option<String> {
    if transcript.contains("no such file or directory: ./ampl.linux-intel64/ampl")
        || transcript.contains("permission denied: ./ampl.linux-intel64/ampl")
    {
        return Some(transcript.trim().to_string());
    }
    if transcript.contains("Cannot invoke") && transcript.contains("Permission denied") {
        let to = transcript.find("Permission denied").unwrap() + "Permission denied".len();
        return Some(transcript[..to].trim().to_string());
    }
    if let Some(message) =
        slice_between(transcript, "Sorry, a demo license for AMPL is limited to", "ampl:")
    {
        return Some(message);
    }
    if let Some(message) = slice_between(transcript, "Error executing \"solve\" command:", "<BREAK>")
    {
        return Some(message);
    }
    // The solve never started, e.g. the presolve proved the model infeasible.
    if transcript.contains("_total_solve_time = 0") {
        if let Some(message) = slice_between(transcript, "presolve:", "_total_solve_time") {
            return Some(message);
        }
    }
    None
}

fn check_errors_baron(transcript: &str) -> (bool, String) {
    if let Some(message) = ampl_check_errors(transcript) {
        return (false, message);
    }
    if let Some(message) =
        slice_between(transcript, "Sorry, a demo license is limited to 10 variables", "exit value 1")
    {
        return (false, message);
    }
    if let Some(from) = transcript.find("Can't find file") {
        return (false, transcript[from..].trim().to_string());
    }
    if transcript.contains("No feasible solution was found") {
        return (false, "No feasible solution was found".to_string());
    }
    (true, "No Errors".to_string())
}

fn check_errors_octeract(transcript: &str) -> (bool, String) {
    if transcript.contains("Found solution during preprocessing") {
        return (true, "Solution found during preprocessing".to_string());
    }
    // The engine printed its iteration table, so it got past startup.
    if transcript.contains(
        "Iteration            GAP               LLB          BUB            Pool       Time       Mem",
    ) {
        return (true, "Probably No Errors".to_string());
    }
    if let Some(message) = ampl_check_errors(transcript) {
        return (false, message);
    }
    if let Some(from) = transcript.find("Can't find file") {
        return (false, transcript[from..].trim().to_string());
    }
    if let Some(message) = slice_between(transcript, "Request_Error", "exit value 1") {
        return (false, message);
    }
    if let Some(message) = slice_between(
        transcript,
        "Error: Failed to establish connection to server.",
        "ampl:",
    ) {
        return (false, message);
    }
    if let Some(from) = transcript.find("presolve messages suppressed") {
        let to = transcript
            .find("_total_solve_time")
            .unwrap_or(from + "presolve messages suppressed".len());
        return (false, transcript[..to].trim().to_string());
    }
    if transcript.contains("all variables eliminated, but lower bound") {
        let to = transcript.find("_total_solve_time").unwrap_or(transcript.len());
        return (false, transcript[..to].trim().to_string());
    }
    (true, "No Errors".to_string())
}

fn check_errors_alphaecp(transcript: &str) -> (bool, String) {
    if transcript.contains("**** OBJECTIVE VALUE") {
        return (true, "No Errors".to_string());
    }
    if transcript.contains("EXECUTION TIME") {
        return (true, "Probably No Errors".to_string());
    }
    (false, "GAMS transcript is missing an objective report".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn worker_process_names() {
        assert_eq!(SolverFamily::Baron.worker_process_name(1), "baron");
        assert_eq!(SolverFamily::Baron.worker_process_name(8), "baron");
        assert_eq!(
            SolverFamily::Octeract.worker_process_name(1),
            "octeract-engine"
        );
        assert_eq!(SolverFamily::Octeract.worker_process_name(4), "mpirun");
        assert_eq!(SolverFamily::AlphaEcp.worker_process_name(2), "alphaecp");
    }

    #[test]
    fn engine_options_carry_time_margin() {
        let options = SolverFamily::Baron.engine_options(2, Duration::from_secs(300));
        assert!(options.contains("threads=2"));
        assert!(options.contains("maxtime=270"));

        let options = SolverFamily::AlphaEcp.engine_options(1, Duration::from_secs(300));
        assert_eq!(options, "reslim=270");
    }

    #[test]
    fn total_cost_extraction() {
        let transcript = "_total_solve_time = 12\ntotal_cost = 1834.5\n";
        assert_eq!(
            SolverFamily::Baron.extract_best_solution(transcript),
            (true, 1834.5)
        );
    }

    #[test]
    fn zero_and_huge_objectives_are_placeholders() {
        let (found, objective) = SolverFamily::Baron.extract_best_solution("total_cost = 0\n");
        assert!(!found);
        assert_eq!(objective, 0.0);

        let (found, _) = SolverFamily::Octeract.extract_best_solution("total_cost = 1e45\n");
        assert!(!found);
    }

    #[test]
    fn missing_total_cost_is_not_found() {
        let (found, objective) = SolverFamily::Baron.extract_best_solution("solver crashed\n");
        assert!(!found);
        assert!(objective.is_nan());
    }

    #[test]
    fn octeract_preprocessing_fallback() {
        let transcript = "Found solution during preprocessing\n\
                          Objective value at global solution: 421.25\n";
        assert_eq!(
            SolverFamily::Octeract.extract_best_solution(transcript),
            (true, 421.25)
        );
        let (ok, message) = SolverFamily::Octeract.check_errors(transcript);
        assert!(ok);
        assert_eq!(message, "Solution found during preprocessing");
    }

    #[test]
    fn baron_reports_infeasibility_as_error() {
        let (ok, message) =
            SolverFamily::Baron.check_errors("...\nNo feasible solution was found\n");
        assert!(!ok);
        assert_eq!(message, "No feasible solution was found");
    }

    #[test]
    fn ampl_demo_license_error() {
        let transcript = "Sorry, a demo license for AMPL is limited to 500 variables\nampl: quit";
        let (ok, message) = SolverFamily::Baron.check_errors(transcript);
        assert!(!ok);
        assert!(message.starts_with("Sorry, a demo license for AMPL"));
        assert!(!message.contains("ampl:"));
    }

    #[test]
    fn octeract_connection_error() {
        let transcript = "Error: Failed to establish connection to server.\nretrying\nampl: done";
        let (ok, message) = SolverFamily::Octeract.check_errors(transcript);
        assert!(!ok);
        assert!(message.starts_with("Error: Failed to establish connection"));
    }

    #[test]
    fn clean_transcript_has_no_errors() {
        let (ok, message) = SolverFamily::Baron.check_errors("total_cost = 15.5\n");
        assert!(ok);
        assert_eq!(message, "No Errors");
    }

    #[test]
    fn family_name_round_trip() {
        for family in SolverFamily::ALL {
            assert_eq!(SolverFamily::from_name(family.name()), Some(family));
        }
        assert_eq!(SolverFamily::from_name("cplex"), None);
    }
}
