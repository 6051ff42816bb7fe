
use crate::data_types::phasing_result::{PhasingResult, PhasingSummary};
use crate::external::{ExternalToolError, ToolRunner, ensure_success, find_executable};

use bio::io::fastq;
use log::{trace, warn};
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Index of the record-id column in the phaser's summary table
const RECORD_ID_FIELD: usize = 1;

/// Settings for one phasing invocation, already resolved for a single locus.
#[derive(Clone, Debug)]
pub struct PhaserSettings {
    /// The whitelist file restricting which subreads the phaser may use
    pub whitelist: PathBuf,
    /// Seed for the phaser's subsampling RNG
    pub rng_seed: u64,
    /// Minimum average barcode score to require of subreads
    pub min_barcode_score: usize,
    /// Minimum subread length
    pub min_length: usize,
    /// Maximum subread length, 0 disables the cap
    pub max_length: usize,
    /// Minimum read score of input subreads
    pub min_read_score: f64,
    /// Minimum SNR of input subreads
    pub min_snr: f64,
    /// Maximum number of subreads used for phasing
    pub max_reads: usize,
    /// Maximum number of subreads used for coarse clustering
    pub max_clustering_reads: usize,
    /// Fraction of high-scoring alignments to skip during clustering
    pub skip_rate: f64,
    /// Worker count passed through to the phaser
    pub nproc: usize
}

/// Locates the external phaser executable.
/// # Errors
/// * if `laa` is not on PATH
pub fn locate_phaser() -> Result<PathBuf, ExternalToolError> {
    find_executable("laa").ok_or_else(|| ExternalToolError::NotFound { name: "laa".to_string() })
}

/// Runs one phasing pass for a single locus (and barcode, if any) and collects the
/// phaser's outputs into `PhasingResult`s. The phaser runs inside a fresh temporary
/// directory that is removed when this call returns, success or failure, so partial
/// outputs from a failed pass can never leak into later state.
/// # Arguments
/// * `program` - the resolved phaser executable
/// * `barcode` - the barcode pair to restrict the pass to, if the run is barcoded
/// * `locus` - the locus being phased, spliced into every output record id
/// * `input_filename` - the input read collection handed to the phaser
/// * `settings` - resolved per-locus phaser settings
/// * `runner` - capability for the child process
/// # Errors
/// * if the child cannot be spawned or exits non-zero
/// * if an expected output file is missing or malformed
/// * if an output record is missing from the summary table
pub fn run_phaser(
    program: &Path,
    barcode: Option<&str>,
    locus: &str,
    input_filename: &Path,
    settings: &PhaserSettings,
    runner: &dyn ToolRunner
) -> Result<Vec<PhasingResult>, Box<dyn std::error::Error>> {
    let work_dir = TempDir::new()?;

    let mut args: Vec<String> = vec!["-n".to_string(), settings.nproc.to_string()];
    if let Some(barcode) = barcode {
        args.push("--doBc".to_string());
        args.push(barcode.to_string());
    }
    for (flag, value) in [
        ("--whitelist", settings.whitelist.display().to_string()),
        ("--rngSeed", settings.rng_seed.to_string()),
        ("--minBarcodeScore", settings.min_barcode_score.to_string()),
        ("--minLength", settings.min_length.to_string()),
        ("--maxLength", settings.max_length.to_string()),
        ("--minReadScore", settings.min_read_score.to_string()),
        ("--minSnr", settings.min_snr.to_string()),
        ("--maxReads", settings.max_reads.to_string()),
        ("--maxClusteringReads", settings.max_clustering_reads.to_string()),
        ("--skipRate", settings.skip_rate.to_string())
    ] {
        args.push(flag.to_string());
        args.push(value);
    }
    args.push(input_filename.display().to_string());

    let program_name = program.display().to_string();
    trace!("running `{} {}` in '{}'", program_name, args.join(" "), work_dir.path().display());
    let output = runner.run(&program_name, &args, Some(work_dir.path()))?;
    ensure_success(&format!("{} {}", program_name, args.join(" ")), &output)?;

    let sequences = parse_sequences(work_dir.path())?;
    let summaries = parse_summary_csv(work_dir.path())?;
    let subread_weights = parse_subread_csv(work_dir.path(), barcode);

    assemble_results(barcode, locus, &sequences, &summaries, &subread_weights)
}

/// Reads the phaser's two output FASTQs, tagging each record by whether it came from
/// the chimera/noise file.
fn parse_sequences(work_dir: &Path) -> Result<Vec<(fastq::Record, bool)>, Box<dyn std::error::Error>> {
    let mut sequences: Vec<(fastq::Record, bool)> = vec![];
    for (filename, is_junk) in [
        ("amplicon_analysis.fastq", false),
        ("amplicon_analysis_chimeras_noise.fastq", true)
    ] {
        let reader = fastq::Reader::from_file(work_dir.join(filename))?;
        for entry in reader.records() {
            sequences.push((entry?, is_junk));
        }
    }
    Ok(sequences)
}

/// Parses the phaser's summary table into per-record metric sets, indexed by the raw
/// record id. Metric columns are located by name so the phaser may reorder them.
fn parse_summary_csv(work_dir: &Path) -> Result<HashMap<String, PhasingSummary>, Box<dyn std::error::Error>> {
    let summary_csv = work_dir.join("amplicon_analysis_summary.csv");
    let mut reader = csv::Reader::from_path(&summary_csv)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| -> Result<usize, Box<dyn std::error::Error>> {
        match headers.iter().position(|h| h == name) {
            Some(index) => Ok(index),
            None => Err(format!("Phasing summary is missing a '{}' column", name).into())
        }
    };
    let cluster = column("CoarseCluster")?;
    let phase = column("Phase")?;
    let coverage = column("TotalCoverage")?;
    let read_quality = column("PredictedAccuracy")?;
    let did_converge = column("ConsensusConverged")?;
    let is_noise = column("NoiseSequence")?;
    let is_dup = column("IsDuplicate")?;
    let dup_of = column("DuplicateOf")?;
    let is_chimera = column("IsChimera")?;
    let chimera_score = column("ChimeraScore")?;
    let parent_a = column("ParentSequenceA")?;
    let parent_b = column("ParentSequenceB")?;
    let crossover = column("CrossoverPosition")?;

    let mut summaries: HashMap<String, PhasingSummary> = Default::default();
    for entry in reader.records() {
        let row = entry?;
        let field = |index: usize| row.get(index).unwrap_or("").to_string();
        summaries.insert(field(RECORD_ID_FIELD), PhasingSummary {
            cluster: field(cluster),
            phase: field(phase),
            coverage: field(coverage),
            read_quality: field(read_quality),
            did_converge: field(did_converge),
            is_noise: field(is_noise),
            is_dup: field(is_dup),
            dup_of: field(dup_of),
            is_chimera: field(is_chimera),
            chimera_score: field(chimera_score),
            parent_a: field(parent_a),
            parent_b: field(parent_b),
            crossover: field(crossover)
        });
    }
    Ok(summaries)
}

/// Parses the phaser's subread weight matrix into per-result weight maps, keeping only
/// non-zero weights. Any read or parse failure degrades to an empty map with a warning:
/// the weights are diagnostic data and must never fail a phasing pass.
fn parse_subread_csv(work_dir: &Path, barcode: Option<&str>) -> HashMap<String, HashMap<String, f64>> {
    let filename = match barcode {
        Some(barcode) => format!("amplicon_analysis_subreads.{}.csv", barcode),
        None => "amplicon_analysis_subreads.csv".to_string()
    };
    let subread_csv = work_dir.join(filename);
    match try_parse_subread_csv(&subread_csv) {
        Ok(weights) => weights,
        Err(e) => {
            warn!("Could not parse subread weights from '{}': {}", subread_csv.display(), e);
            Default::default()
        }
    }
}

fn try_parse_subread_csv(subread_csv: &Path) -> Result<HashMap<String, HashMap<String, f64>>, Box<dyn std::error::Error>> {
    let mut reader = csv::Reader::from_path(subread_csv)?;
    let headers = reader.headers()?.clone();

    // every result column gets an entry, even when all of its weights are zero
    let mut weights: HashMap<String, HashMap<String, f64>> = Default::default();
    for name in headers.iter().skip(1) {
        weights.insert(name.to_string(), Default::default());
    }

    for entry in reader.records() {
        let row = entry?;
        let subread_id = row.get(0).unwrap_or("").to_string();
        for (column, value) in headers.iter().zip(row.iter()).skip(1) {
            let weight: f64 = value.parse()?;
            if weight > 0.0 {
                weights.entry(column.to_string()).or_default().insert(subread_id.clone(), weight);
            }
        }
    }
    Ok(weights)
}

/// Joins the three parsed outputs into `PhasingResult`s, one per sequence record.
/// A record with no entry in the weight matrix gets an empty weight map; a record with
/// no entry in the summary table is fatal.
fn assemble_results(
    barcode: Option<&str>,
    locus: &str,
    sequences: &[(fastq::Record, bool)],
    summaries: &HashMap<String, PhasingSummary>,
    subread_weights: &HashMap<String, HashMap<String, f64>>
) -> Result<Vec<PhasingResult>, Box<dyn std::error::Error>> {
    let mut results: Vec<PhasingResult> = vec![];
    for (record, is_junk) in sequences.iter() {
        let summary = match summaries.get(record.id()) {
            Some(summary) => summary.clone(),
            None => bail!("Record '{}' is missing from the phasing summary table", record.id())
        };
        let weights = subread_weights.get(record.id()).cloned().unwrap_or_default();
        results.push(PhasingResult::new(barcode, locus, record, summary, weights, *is_junk)?);
    }
    Ok(results)
}
