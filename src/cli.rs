
use clap::Parser;
use chrono::Datelike;
use lazy_static::lazy_static;
use log::{error, info};
use std::path::{Path, PathBuf};

use crate::barcodes::parse_barcode_list;
use crate::classifier::LocusCombinations;
use crate::phaser::PhaserSettings;

lazy_static! {
    /// Stores the full version string we plan to use.
    /// # Examples
    /// * `0.1.0-6bb9635-dirty` - while on a dirty branch
    /// * `0.1.0-6bb9635` - with a fresh commit
    pub static ref FULL_VERSION: String = format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("VERGEN_GIT_DESCRIBE"));
}

/// Loci covered by each of the preset designs
const CLASS_I_LOCI: [&str; 3] = ["A", "B", "C"];
const FIVE_LOCI: [&str; 5] = ["A", "B", "C", "DQB1", "DRB1"];
const GENDX_LOCI: [&str; 9] = ["A", "B", "C", "DPA1", "DPB1", "DQA1", "DQB1", "DRB1", "DRB345"];

#[derive(Clone, Parser)]
#[clap(author,
    version = &**FULL_VERSION,
    about,
    after_help = format!("Copyright (C) 2015-{}     Pacific Biosciences of California, Inc.
This program comes with ABSOLUTELY NO WARRANTY; it is intended for
Research Use Only and not for use in diagnostic procedures.", chrono::Utc::now().year()))]
pub struct Settings {
    /// Input directory of per-locus reference sequences in FASTA format
    #[clap(required = true)]
    #[clap(value_name = "REFERENCE_DIR")]
    pub reference_directory: PathBuf,

    /// Input read collection in FASTQ format (optionally gzipped)
    #[clap(required = true)]
    #[clap(value_name = "READS")]
    pub input_filename: PathBuf,

    /// Output folder for the combined results
    #[clap(short = 'o')]
    #[clap(long = "output-directory")]
    #[clap(value_name = "DIR")]
    #[clap(default_value = "loci_analysis")]
    #[clap(help_heading = Some("Input/Output"))]
    pub output_directory: PathBuf,

    /// Also write the filtered per-locus FASTQ next to each whitelist
    #[clap(long = "emit-locus-fastq")]
    #[clap(help_heading = Some("Input/Output"))]
    pub emit_locus_fastq: bool,

    /// Enable verbose output
    #[clap(short = 'v')]
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Turn off all logging below errors, including warnings
    #[clap(long = "quiet")]
    pub quiet: bool,

    /// RNG seed, modulates which reads are chosen when they exceed the number needed
    #[clap(long = "rng-seed")]
    #[clap(value_name = "INT")]
    #[clap(default_value = "42")]
    pub rng_seed: u64,

    /// Number of processors to be used
    #[clap(short = 'n')]
    #[clap(long = "nproc")]
    #[clap(value_name = "INT")]
    #[clap(default_value = "1")]
    pub nproc: usize,

    /// Comma-separated list of barcode-index pairs to analyze, in the form '0--0' (default: all)
    #[clap(long = "do-bc")]
    #[clap(value_name = "LIST")]
    #[clap(help_heading = Some("Barcoding"))]
    pub do_bc: Option<String>,

    /// Minimum average barcode score to require of subreads
    #[clap(long = "min-barcode-score")]
    #[clap(value_name = "INT")]
    #[clap(default_value = "0")]
    #[clap(help_heading = Some("Barcoding"))]
    pub min_barcode_score: usize,

    /// Minimum length of input reads
    #[clap(short = 'l')]
    #[clap(long = "min-length")]
    #[clap(value_name = "INT")]
    #[clap(default_value = "3000")]
    #[clap(help_heading = Some("Data Filtering"))]
    pub min_length: usize,

    /// Maximum length of input reads, set to 0 to disable
    #[clap(short = 'L')]
    #[clap(long = "max-length")]
    #[clap(value_name = "INT")]
    #[clap(default_value = "0")]
    #[clap(help_heading = Some("Data Filtering"))]
    pub max_length: usize,

    /// Minimum read score of input reads
    #[clap(short = 's')]
    #[clap(long = "min-read-score")]
    #[clap(value_name = "FLOAT")]
    #[clap(default_value = "0.75")]
    #[clap(help_heading = Some("Data Filtering"))]
    pub min_read_score: f64,

    /// Minimum SNR of input reads
    #[clap(long = "min-snr")]
    #[clap(value_name = "FLOAT")]
    #[clap(default_value = "3.75")]
    #[clap(help_heading = Some("Data Filtering"))]
    pub min_snr: f64,

    /// Maximum number of reads used for phasing
    #[clap(short = 'r')]
    #[clap(long = "max-reads")]
    #[clap(value_name = "INT")]
    #[clap(default_value = "1000")]
    #[clap(help_heading = Some("Coarse Clustering"))]
    pub max_reads: usize,

    /// Maximum number of reads used for coarse clustering
    #[clap(short = 'c')]
    #[clap(long = "max-clustering-reads")]
    #[clap(value_name = "INT")]
    #[clap(default_value = "250")]
    #[clap(help_heading = Some("Coarse Clustering"))]
    pub max_clustering_reads: usize,

    /// Skip some high-scoring alignments to disperse the clusters more
    #[clap(long = "skip-rate")]
    #[clap(value_name = "FLOAT")]
    #[clap(default_value = "0.0")]
    #[clap(help_heading = Some("Coarse Clustering"))]
    pub skip_rate: f64,

    /// Comma-separated list of loci to analyze (default: all)
    #[clap(long = "do-loci")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(help_heading = Some("Locus Selection"))]
    pub do_loci: Vec<String>,

    /// Comma-separated list of loci to ignore
    #[clap(long = "ignore-loci")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(help_heading = Some("Locus Selection"))]
    pub ignore_loci: Vec<String>,

    /// Comma-separated list of loci to combine, each in the form 'NewName:LocusA:LocusB'; useful for capturing good reads associated with the wrong loci
    #[clap(long = "combine-loci")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(value_parser = parse_combination)]
    #[clap(help_heading = Some("Locus Selection"))]
    pub combine_loci: Vec<(String, Vec<String>)>,

    /// Per-locus minimum read length, as comma-separated 'Locus:Value' entries, e.g. A:3000,B:3200
    #[clap(long = "min-length-by-locus")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(value_parser = parse_locus_count)]
    #[clap(help_heading = Some("Per-Locus Overrides"))]
    pub min_length_by_locus: Vec<(String, usize)>,

    /// Per-locus maximum read length, as comma-separated 'Locus:Value' entries
    #[clap(long = "max-length-by-locus")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(value_parser = parse_locus_count)]
    #[clap(help_heading = Some("Per-Locus Overrides"))]
    pub max_length_by_locus: Vec<(String, usize)>,

    /// Per-locus maximum number of phasing reads, as comma-separated 'Locus:Value' entries
    #[clap(long = "max-reads-by-locus")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(value_parser = parse_locus_count)]
    #[clap(help_heading = Some("Per-Locus Overrides"))]
    pub max_reads_by_locus: Vec<(String, usize)>,

    /// Per-locus maximum number of clustering reads, as comma-separated 'Locus:Value' entries
    #[clap(long = "max-clustering-reads-by-locus")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(value_parser = parse_locus_count)]
    #[clap(help_heading = Some("Per-Locus Overrides"))]
    pub max_clustering_reads_by_locus: Vec<(String, usize)>,

    /// Per-locus minimum read score, as comma-separated 'Locus:Value' entries
    #[clap(long = "min-read-score-by-locus")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(value_parser = parse_locus_score)]
    #[clap(help_heading = Some("Per-Locus Overrides"))]
    pub min_read_score_by_locus: Vec<(String, f64)>,

    /// Per-locus minimum SNR, as comma-separated 'Locus:Value' entries
    #[clap(long = "min-snr-by-locus")]
    #[clap(value_name = "LIST")]
    #[clap(value_delimiter = ',')]
    #[clap(value_parser = parse_locus_score)]
    #[clap(help_heading = Some("Per-Locus Overrides"))]
    pub min_snr_by_locus: Vec<(String, f64)>,

    /// Set defaults for full-length HLA A,B,C
    #[clap(long = "class-i")]
    #[clap(help_heading = Some("Preset Designs"))]
    pub class_i: bool,

    /// Set defaults for full-length HLA A,B,C and the active sites of DQB1,DRB1
    #[clap(long = "five-loci")]
    #[clap(help_heading = Some("Preset Designs"))]
    pub five_loci: bool,

    /// Set defaults for the GenDx NGSgo kit, containing A,B,C,DQA,DQB,DPA,DPB,DRB1 and DRB345
    #[clap(long = "gendx")]
    #[clap(help_heading = Some("Preset Designs"))]
    pub gendx: bool,
}

/// Parses one 'NewName:LocusA[:LocusB...]' combination entry.
fn parse_combination(text: &str) -> Result<(String, Vec<String>), String> {
    let mut parts = text.split(':');
    let name = parts.next().unwrap_or_default();
    let components: Vec<String> = parts.map(String::from).collect();
    if name.is_empty() || components.is_empty() || components.iter().any(|c| c.is_empty()) {
        return Err(format!("expected 'NewName:LocusA[:LocusB...]', got '{text}'"));
    }
    Ok((name.to_string(), components))
}

/// Parses one 'Locus:Value' entry with an integer value.
fn parse_locus_count(text: &str) -> Result<(String, usize), String> {
    let (locus, value) = split_locus_entry(text)?;
    let value: usize = value.parse()
        .map_err(|e| format!("invalid value for locus '{locus}': {e}"))?;
    Ok((locus.to_string(), value))
}

/// Parses one 'Locus:Value' entry with a fractional value.
fn parse_locus_score(text: &str) -> Result<(String, f64), String> {
    let (locus, value) = split_locus_entry(text)?;
    let value: f64 = value.parse()
        .map_err(|e| format!("invalid value for locus '{locus}': {e}"))?;
    Ok((locus.to_string(), value))
}

fn split_locus_entry(text: &str) -> Result<(&str, &str), String> {
    match text.split_once(':') {
        Some((locus, value)) if !locus.is_empty() => Ok((locus, value)),
        _ => Err(format!("expected 'Locus:Value', got '{text}'"))
    }
}

/// Looks up a per-locus override value, if one was given.
fn locus_override<T: Copy>(overrides: &[(String, T)], locus: &str) -> Option<T> {
    overrides.iter()
        .find(|(name, _)| name == locus)
        .map(|(_, value)| *value)
}

/// Checks if a file exists and will otherwise exit
/// # Arguments
/// * `filename` - the file path to check for
/// * `label` - the label to use for error messages
fn check_required_filename(filename: &Path, label: &str) {
    if !filename.is_file() {
        error!("{} does not exist: \"{}\"", label, filename.display());
        std::process::exit(exitcode::NOINPUT);
    } else {
        info!("{}: \"{}\"", label, filename.display());
    }
}

/// Checks if a directory exists and will otherwise exit
/// # Arguments
/// * `dirname` - the directory path to check for
/// * `label` - the label to use for error messages
fn check_required_directory(dirname: &Path, label: &str) {
    if !dirname.is_dir() {
        error!("{} does not exist: \"{}\"", label, dirname.display());
        std::process::exit(exitcode::NOINPUT);
    } else {
        info!("{}: \"{}\"", label, dirname.display());
    }
}

impl Settings {
    /// Wrapper function to build the settings for one phaser invocation from our CLI settings,
    /// applying any per-locus overrides on top of the global values.
    pub fn phaser_settings(&self, locus: &str, whitelist: &Path) -> PhaserSettings {
        PhaserSettings {
            whitelist: whitelist.to_path_buf(),
            rng_seed: self.rng_seed,
            min_barcode_score: self.min_barcode_score,
            min_length: locus_override(&self.min_length_by_locus, locus).unwrap_or(self.min_length),
            max_length: locus_override(&self.max_length_by_locus, locus).unwrap_or(self.max_length),
            min_read_score: locus_override(&self.min_read_score_by_locus, locus).unwrap_or(self.min_read_score),
            min_snr: locus_override(&self.min_snr_by_locus, locus).unwrap_or(self.min_snr),
            max_reads: locus_override(&self.max_reads_by_locus, locus).unwrap_or(self.max_reads),
            max_clustering_reads: locus_override(&self.max_clustering_reads_by_locus, locus).unwrap_or(self.max_clustering_reads),
            skip_rate: self.skip_rate,
            nproc: self.nproc
        }
    }

    /// Wrapper function to build the combination groups from our CLI settings
    pub fn locus_combinations(&self) -> LocusCombinations {
        LocusCombinations::new(self.combine_loci.clone())
    }

    /// The locus set implied by the active preset design, if any.
    fn preset_loci(&self) -> Option<Vec<String>> {
        let loci: &[&str] = if self.class_i {
            &CLASS_I_LOCI
        } else if self.five_loci {
            &FIVE_LOCI
        } else if self.gendx {
            &GENDX_LOCI
        } else {
            return None;
        };
        Some(loci.iter().map(|l| l.to_string()).collect())
    }
}

pub fn get_raw_settings() -> Settings {
    Settings::parse()
}

/// Do some additional checks here, we may increase these as we go.
/// Also can modify settings if needed since we're passing it around.
/// # Arguments
/// * `settings` - the raw settings, nothing has been checked other than what clap does for us.
pub fn check_settings(mut settings: Settings) -> Settings {
    //check for our required inputs
    check_required_directory(&settings.reference_directory, "Reference directory");
    check_required_filename(&settings.input_filename, "Input reads");

    // make sure we don't have multiple competing presets
    let presets = [
        (settings.class_i, "--class-i"),
        (settings.five_loci, "--five-loci"),
        (settings.gendx, "--gendx")
    ];
    for (i, &(first_active, first_name)) in presets.iter().enumerate() {
        for &(second_active, second_name) in presets[i+1..].iter() {
            if first_active && second_active {
                error!("Contradictory Options: {} and {} cannot both be True", first_name, second_name);
                std::process::exit(exitcode::USAGE);
            }
        }
    }

    // an explicit --do-loci always wins over the preset's locus set
    if settings.do_loci.is_empty() {
        if let Some(preset_loci) = settings.preset_loci() {
            settings.do_loci = preset_loci;
        }
    }

    // the output directory must exist and be writable before any phasing work starts
    if !settings.output_directory.is_dir() {
        if let Err(e) = std::fs::create_dir_all(&settings.output_directory) {
            error!("Could not create output directory \"{}\": {}", settings.output_directory.display(), e);
            std::process::exit(exitcode::IOERR);
        }
    }
    if tempfile::tempfile_in(&settings.output_directory).is_err() {
        error!("Output directory is not writable: \"{}\"", settings.output_directory.display());
        std::process::exit(exitcode::IOERR);
    }

    // fail fast on a malformed barcode list instead of midway through the run
    if let Some(do_bc) = settings.do_bc.as_deref() {
        if let Err(e) = parse_barcode_list(do_bc) {
            error!("{e}");
            std::process::exit(exitcode::USAGE);
        }
    }

    if !(0.0..=1.0).contains(&settings.min_read_score) {
        error!("--min-read-score must be in the range [0.0, 1.0]");
        std::process::exit(exitcode::USAGE);
    }
    if !(0.0..=1.0).contains(&settings.skip_rate) {
        error!("--skip-rate must be in the range [0.0, 1.0]");
        std::process::exit(exitcode::USAGE);
    }

    // dump stuff to the logger
    info!("Output directory: \"{}\"", settings.output_directory.display());

    info!("Data filtering:");
    info!("\tMinimum read length: {}", settings.min_length);
    if settings.max_length == 0 {
        info!("\tMaximum read length: DISABLED");
    } else {
        info!("\tMaximum read length: {}", settings.max_length);
    }
    info!("\tMinimum read score: {}", settings.min_read_score);
    info!("\tMinimum SNR: {}", settings.min_snr);
    if settings.min_barcode_score > 0 {
        info!("\tMinimum barcode score: {}", settings.min_barcode_score);
    }

    info!("Coarse clustering:");
    info!("\tMaximum phasing reads: {}", settings.max_reads);
    info!("\tMaximum clustering reads: {}", settings.max_clustering_reads);
    info!("\tSkip rate: {}", settings.skip_rate);
    info!("\tRNG seed: {}", settings.rng_seed);

    if !settings.do_loci.is_empty() {
        info!("Selected loci: {}", settings.do_loci.join(", "));
    }
    if !settings.ignore_loci.is_empty() {
        info!("Ignored loci: {}", settings.ignore_loci.join(", "));
    }
    for (name, components) in settings.combine_loci.iter() {
        info!("Combining loci {} into '{}'", components.join(" + "), name);
    }

    info!("Processing threads: {}", settings.nproc);

    //send the settings back
    settings
}
