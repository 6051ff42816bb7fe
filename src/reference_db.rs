
use crate::external::{ToolRunner, ensure_success};

use log::{debug, error, info, warn};
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One locus's reference files: the FASTA and its optional precomputed suffix array.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocusReference {
    /// The reference FASTA for the locus
    pub fasta: PathBuf,
    /// Suffix-array sidecar; alignment proceeds without it, just more slowly
    pub suffix_array: Option<PathBuf>
}

/// Per-locus reference database discovered from a directory of FASTA files.
#[derive(Debug)]
pub struct ReferenceDb {
    /// Locus names sorted for stable iteration
    locus_keys: Vec<String>,
    /// Reference files keyed by locus name
    references: HashMap<String, LocusReference>
}

impl ReferenceDb {
    /// Scans a directory for per-locus reference FASTAs (`.fa`, `.fna`, or `.fasta`).
    /// The locus name is the file stem up to the first `.`, with the common IMGT genomic
    /// suffix `_gen` stripped. A missing `<fasta>.sa` sidecar is either built with
    /// `sawriter` or logged and recorded as absent.
    /// # Arguments
    /// * `db_path` - the directory of per-locus reference sequences
    /// * `write_suffix_arrays` - if true, missing suffix arrays are built through `runner`
    /// * `runner` - capability for invoking `sawriter`
    /// # Errors
    /// * if the directory cannot be read
    /// * if two reference files resolve to the same locus name
    /// * if a `sawriter` invocation fails
    pub fn scan(db_path: &Path, write_suffix_arrays: bool, runner: &dyn ToolRunner) -> Result<ReferenceDb, Box<dyn std::error::Error>> {
        info!("Building reference database from path '{}'", db_path.display());
        let start_time = Instant::now();

        let mut fastas: Vec<PathBuf> = vec![];
        for entry in std::fs::read_dir(db_path)? {
            let path = entry?.path();
            let extension = path.extension().unwrap_or_default();
            if extension == "fa" || extension == "fna" || extension == "fasta" {
                fastas.push(path);
            }
        }
        fastas.sort();
        info!("Found {} reference fasta files", fastas.len());

        let mut locus_keys: Vec<String> = vec![];
        let mut references: HashMap<String, LocusReference> = Default::default();
        for fasta in fastas.iter() {
            let locus = locus_name(fasta);

            let mut sidecar = fasta.clone().into_os_string();
            sidecar.push(".sa");
            let sidecar = PathBuf::from(sidecar);
            let suffix_array: Option<PathBuf> = if sidecar.exists() {
                Some(sidecar)
            } else if write_suffix_arrays {
                build_suffix_array(fasta, runner)?;
                Some(sidecar)
            } else {
                warn!("missing suffix array for : '{}'", fasta.display());
                None
            };

            if references.contains_key(&locus) {
                bail!("duplicate references for locus '{}' found", locus);
            }
            locus_keys.push(locus.clone());
            references.insert(locus, LocusReference {
                fasta: fasta.clone(),
                suffix_array
            });
        }

        // path order is not locus order once suffixes are stripped
        locus_keys.sort();
        debug!("Found references for the following loci : {}", locus_keys.join(", "));

        info!("Finished building reference database in {:.3}s", start_time.elapsed().as_secs_f64());
        Ok(ReferenceDb {
            locus_keys,
            references
        })
    }

    /// Every known locus name, sorted.
    pub fn loci(&self) -> &[String] {
        &self.locus_keys
    }

    pub fn get(&self, locus: &str) -> Option<&LocusReference> {
        self.references.get(locus)
    }

    /// Iterates `(locus, reference)` pairs in sorted locus order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocusReference)> {
        self.locus_keys.iter().map(|locus| (locus, &self.references[locus]))
    }

    pub fn len(&self) -> usize {
        self.locus_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locus_keys.is_empty()
    }
}

/// Derives the locus name for a reference file: the basename up to the first `.`, minus
/// any trailing `_gen`.
fn locus_name(fasta: &Path) -> String {
    let basename = fasta.file_name().unwrap_or_default().to_string_lossy();
    let stem = basename.split('.').next().unwrap_or_default();
    stem.strip_suffix("_gen").unwrap_or(stem).to_string()
}

/// Invokes `sawriter` to build the suffix-array sidecar for one reference FASTA.
/// # Arguments
/// * `fasta` - the reference to index
/// * `runner` - capability for the child process
/// # Errors
/// * if the child cannot be spawned or exits non-zero
fn build_suffix_array(fasta: &Path, runner: &dyn ToolRunner) -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = vec![fasta.display().to_string()];
    debug!("Calling sawriter with command line 'sawriter {}'", args.join(" "));
    let output = runner.run("sawriter", &args, None)?;
    debug!("Finished running sawriter");

    if !output.success() {
        error!("sawriter failed. Stderr was {}", output.stderr_lossy());
    }
    ensure_success(&format!("sawriter {}", args.join(" ")), &output)?;
    Ok(())
}
