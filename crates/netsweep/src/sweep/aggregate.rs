//! Outcome collection and best-result selection.
//!
//! Selection is deterministic: among records with an admissible objective the
//! strictly smallest value wins, and ties keep the record that comes first in
//! canonical combination order.

use std::path::PathBuf;

use crate::sweep::solver::{SolverFamily, check_errors_for, extract_best_solution_for};
use crate::sweep::state::CompletedJob;

/// Per-combination outcome scraped from its transcript.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub index: usize,
    pub solver: SolverFamily,
    pub short_model_name: String,
    pub transcript_path: PathBuf,
    /// Whether an admissible objective value was found.
    pub found: bool,
    pub objective: f64,
    /// Whether the error sweep found the transcript clean.
    pub ok: bool,
    pub error: String,
}

/// Scrapes one record per completed job. `completed` must already be in
/// canonical order.
pub fn collect_records(completed: &[&CompletedJob]) -> Vec<ResultRecord> {
    completed
        .iter()
        .map(|entry| {
            let (ok, error) = check_errors_for(&entry.job);
            let (found, objective) = extract_best_solution_for(&entry.job);
            ResultRecord {
                index: entry.job.index,
                solver: entry.job.solver,
                short_model_name: entry.job.short_model_name.clone(),
                transcript_path: entry.job.transcript_path.clone(),
                found,
                objective,
                ok,
                error,
            }
        })
        .collect()
}

/// The record with the strictly smallest admissible objective; first in
/// canonical order on ties. `None` when no combination found a solution.
pub fn select_best(records: &[ResultRecord]) -> Option<&ResultRecord> {
    let mut best: Option<&ResultRecord> = None;
    for record in records.iter().filter(|r| r.found) {
        match best {
            Some(current) if record.objective < current.objective => best = Some(record),
            None => best = Some(record),
            _ => {}
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, solver: SolverFamily, found: bool, objective: f64) -> ResultRecord {
        ResultRecord {
            index,
            solver,
            short_model_name: "m1".to_string(),
            transcript_path: PathBuf::from("/tmp/none"),
            found,
            objective,
            ok: found,
            error: "No Errors".to_string(),
        }
    }

    #[test]
    fn smallest_objective_wins() {
        let records = vec![
            record(0, SolverFamily::Baron, true, 120.0),
            record(1, SolverFamily::Octeract, true, 95.5),
            record(2, SolverFamily::AlphaEcp, false, f64::NAN),
        ];
        let best = select_best(&records).unwrap();
        assert_eq!(best.index, 1);
        assert_eq!(best.objective, 95.5);
    }

    #[test]
    fn ties_keep_canonical_order() {
        let records = vec![
            record(0, SolverFamily::Baron, true, 50.0),
            record(1, SolverFamily::Octeract, true, 50.0),
        ];
        assert_eq!(select_best(&records).unwrap().index, 0);
    }

    #[test]
    fn no_solution_anywhere() {
        let records = vec![
            record(0, SolverFamily::Baron, false, f64::NAN),
            record(1, SolverFamily::Octeract, false, 0.0),
        ];
        assert!(select_best(&records).is_none());
    }
}
