
use bio::io::fastq;
use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ResultError {
    #[error("Malformed result id: {id}")]
    MalformedId { id: String }
}

/// The thirteen phasing metrics reported for one consensus sequence, carried verbatim
/// from the phaser's summary table.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PhasingSummary {
    pub cluster: String,
    pub phase: String,
    pub coverage: String,
    pub read_quality: String,
    pub did_converge: String,
    pub is_noise: String,
    pub is_dup: String,
    pub dup_of: String,
    pub is_chimera: String,
    pub chimera_score: String,
    pub parent_a: String,
    pub parent_b: String,
    pub crossover: String
}

/// One phased consensus sequence with its provenance and metrics. Results are created
/// one per output record of a phasing invocation and handed straight to the aggregator.
#[derive(Clone, Debug)]
pub struct PhasingResult {
    /// Barcode label for the sample, "0" when the run is unbarcoded
    pub barcode: String,
    /// The locus this result was phased against
    pub locus: String,
    /// The consensus FASTQ record, re-identified with the locus label
    pub record: fastq::Record,
    /// Carried-through summary metrics
    pub summary: PhasingSummary,
    /// Per-subread support weights, sparse over the non-zero entries
    pub subreads: HashMap<String, f64>,
    /// True when the phaser classified this sequence as chimeric or noise
    pub is_junk: bool
}

impl PhasingResult {
    /// Builds a result from one phaser output record, splicing the locus label into the
    /// record id so results from different loci cannot collide downstream.
    /// # Arguments
    /// * `barcode` - the active barcode pair, if the run is barcoded
    /// * `locus` - the locus that was phased
    /// * `record` - the consensus record as emitted by the phaser
    /// * `summary` - the record's summary metrics
    /// * `subreads` - non-zero subread support weights for the record
    /// * `is_junk` - whether the record came from the chimera/noise output
    /// # Errors
    /// * if the record id has no `_` separator to splice the locus label into
    pub fn new(
        barcode: Option<&str>,
        locus: &str,
        record: &fastq::Record,
        summary: PhasingSummary,
        subreads: HashMap<String, f64>,
        is_junk: bool
    ) -> Result<PhasingResult, ResultError> {
        let record = relabel_record(record, locus)?;
        Ok(PhasingResult {
            barcode: barcode.unwrap_or("0").to_string(),
            locus: locus.to_string(),
            record,
            summary,
            subreads,
            is_junk
        })
    }

    /// The re-identified record id.
    pub fn id(&self) -> &str {
        self.record.id()
    }

    pub fn sequence_len(&self) -> usize {
        self.record.seq().len()
    }
}

/// Splices the locus label into a record id after its first `_`-delimited component:
/// `Barcode0--0_Cluster0_Phase0_NumReads120` becomes
/// `Barcode0--0_LocusA_Cluster0_Phase0_NumReads120`.
fn relabel_record(record: &fastq::Record, locus: &str) -> Result<fastq::Record, ResultError> {
    let (prefix, rest) = match record.id().split_once('_') {
        Some(parts) => parts,
        None => {
            return Err(ResultError::MalformedId { id: record.id().to_string() });
        }
    };
    let new_id = format!("{}_Locus{}_{}", prefix, locus, rest);
    Ok(fastq::Record::with_attrs(&new_id, record.desc(), record.seq(), record.qual()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phaser_record(id: &str) -> fastq::Record {
        fastq::Record::with_attrs(id, None, b"ACGT", b"IIII")
    }

    #[test]
    fn test_locus_label_is_spliced_into_id() {
        let record = phaser_record("Barcode0--0_Cluster0_Phase0_NumReads120");
        let result = PhasingResult::new(
            Some("0--0"), "A", &record, PhasingSummary::default(), HashMap::default(), false
        ).unwrap();
        assert_eq!(result.id(), "Barcode0--0_LocusA_Cluster0_Phase0_NumReads120");
        assert_eq!(result.barcode, "0--0");
        assert_eq!(result.sequence_len(), 4);
    }

    #[test]
    fn test_unbarcoded_results_use_zero_label() {
        let record = phaser_record("Barcode0_Cluster1_Phase0_NumReads40");
        let result = PhasingResult::new(
            None, "DRB1", &record, PhasingSummary::default(), HashMap::default(), true
        ).unwrap();
        assert_eq!(result.barcode, "0");
        assert!(result.is_junk);
    }

    #[test]
    fn test_id_without_separator_is_rejected()  {
        let record = phaser_record("NoSeparator");
        let error = PhasingResult::new(
            None, "A", &record, PhasingSummary::default(), HashMap::default(), false
        ).unwrap_err();
        assert_eq!(error, ResultError::MalformedId { id: "NoSeparator".to_string() });
    }
}
