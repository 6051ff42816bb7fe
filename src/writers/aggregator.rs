
use crate::data_types::phasing_result::PhasingResult;

use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::cmp::Reverse;
use thiserror::Error;

/// Column order for the run-level summary table.
pub const SUMMARY_HEADER: [&str; 16] = [
    "BarcodeName", "FastaName", "CoarseCluster", "Phase", "TotalCoverage", "SequenceLength",
    "PredictedAccuracy", "ConsensusConverged", "NoiseSequence", "IsDuplicate", "DuplicateOf",
    "IsChimera", "ChimeraScore", "ParentSequenceA", "ParentSequenceB", "CrossoverPosition"
];

#[derive(Error, Debug, Eq, PartialEq)]
pub enum AggregatorError {
    #[error("Barcode mismatch ({new} and {active})! Call finalize_barcode before changing samples")]
    BarcodeMismatch { new: String, active: String },
    #[error("Duplicate Result Id: {id}")]
    DuplicateResultId { id: String }
}

/// One row of the summary table. Field order matches `SUMMARY_HEADER`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryRow {
    pub barcode_name: String,
    pub fasta_name: String,
    pub coarse_cluster: String,
    pub phase: String,
    pub total_coverage: String,
    pub sequence_length: usize,
    pub predicted_accuracy: String,
    pub consensus_converged: String,
    pub noise_sequence: String,
    pub is_duplicate: String,
    pub duplicate_of: String,
    pub is_chimera: String,
    pub chimera_score: String,
    pub parent_sequence_a: String,
    pub parent_sequence_b: String,
    pub crossover_position: String
}

/// Accumulates phasing results for one barcode at a time: a summary row per result for
/// the run-level table, plus the barcode's subread weight matrix. The matrix has one
/// column per result and one row per supporting subread, stored sparsely over the
/// non-zero weights.
pub struct ResultAggregator {
    /// The barcode the in-flight matrix belongs to
    active_barcode: Option<String>,
    /// Result ids in arrival order, the matrix columns
    result_columns: Vec<String>,
    /// Subread ids in first-seen order, the matrix rows
    subread_order: Vec<String>,
    /// weight[subread id][result id], only non-zero entries are present
    subread_weights: HashMap<String, HashMap<String, f64>>
}

impl ResultAggregator {
    pub fn new() -> ResultAggregator {
        ResultAggregator {
            active_barcode: None,
            result_columns: vec![],
            subread_order: vec![],
            subread_weights: Default::default()
        }
    }

    /// Folds one result into the session and returns its summary row. The first result
    /// after a reset fixes the session's barcode; every later result must match it.
    /// # Errors
    /// * if the result's barcode differs from the active one
    /// * if the result id was already added this session
    pub fn add(&mut self, result: &PhasingResult) -> Result<SummaryRow, AggregatorError> {
        match &self.active_barcode {
            Some(active) if active != &result.barcode => {
                return Err(AggregatorError::BarcodeMismatch {
                    new: result.barcode.clone(),
                    active: active.clone()
                });
            }
            Some(_) => {}
            None => {
                self.active_barcode = Some(result.barcode.clone());
            }
        }

        let result_id = result.id().to_string();
        if self.result_columns.contains(&result_id) {
            return Err(AggregatorError::DuplicateResultId { id: result_id });
        }
        self.result_columns.push(result_id.clone());

        // sorted for a stable row order; a weight of zero is represented by absence
        let mut subread_ids: Vec<&String> = result.subreads.keys().collect();
        subread_ids.sort();
        for subread_id in subread_ids {
            let weight = result.subreads[subread_id];
            if weight > 0.0 {
                if !self.subread_weights.contains_key(subread_id) {
                    self.subread_order.push(subread_id.clone());
                }
                self.subread_weights.entry(subread_id.clone()).or_default().insert(result_id.clone(), weight);
            }
        }

        Ok(summary_row(result))
    }

    pub fn active_barcode(&self) -> Option<&str> {
        self.active_barcode.as_deref()
    }

    /// Matrix columns sorted by descending read count, parsed from each id's `NumReads`
    /// suffix. Equal counts keep arrival order.
    pub fn columns_by_read_count(&self) -> Vec<String> {
        let mut columns = self.result_columns.clone();
        columns.sort_by_key(|id| Reverse(num_reads_key(id)));
        columns
    }

    /// Matrix rows in first-seen order.
    pub fn subreads(&self) -> &[String] {
        &self.subread_order
    }

    /// The stored weight for a subread/result pair, 0.0 when absent.
    pub fn weight(&self, subread_id: &str, result_id: &str) -> f64 {
        self.subread_weights
            .get(subread_id)
            .and_then(|row| row.get(result_id))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn num_results(&self) -> usize {
        self.result_columns.len()
    }

    /// Clears all per-barcode state ahead of the next sample.
    pub fn reset(&mut self) {
        self.active_barcode = None;
        self.result_columns.clear();
        self.subread_order.clear();
        self.subread_weights.clear();
    }
}

impl Default for ResultAggregator {
    fn default() -> ResultAggregator {
        ResultAggregator::new()
    }
}

fn summary_row(result: &PhasingResult) -> SummaryRow {
    let summary = &result.summary;
    SummaryRow {
        barcode_name: result.barcode.clone(),
        fasta_name: result.id().to_string(),
        coarse_cluster: summary.cluster.clone(),
        phase: summary.phase.clone(),
        total_coverage: summary.coverage.clone(),
        sequence_length: result.sequence_len(),
        predicted_accuracy: summary.read_quality.clone(),
        consensus_converged: summary.did_converge.clone(),
        noise_sequence: summary.is_noise.clone(),
        is_duplicate: summary.is_dup.clone(),
        duplicate_of: summary.dup_of.clone(),
        is_chimera: summary.is_chimera.clone(),
        chimera_score: summary.chimera_score.clone(),
        parent_sequence_a: summary.parent_a.clone(),
        parent_sequence_b: summary.parent_b.clone(),
        crossover_position: summary.crossover.clone()
    }
}

/// Sort key for matrix columns: the numeric run of the id's `NumReads` suffix, or 0
/// when the id has none or the suffix is not a number.
fn num_reads_key(result_id: &str) -> u64 {
    match result_id.split_once("NumReads") {
        Some((_, digits)) => digits.parse().unwrap_or(0),
        None => 0
    }
}
