
use crate::alignment::truncated_read_id;
use crate::classifier::{LocusClassifier, LocusCombinations, LocusMembership};
use crate::external::{ToolRunner, ensure_success};
use crate::reference_db::{LocusReference, ReferenceDb};

use bio::io::fastq;
use flate2::bufread::MultiGzDecoder;
use log::{debug, error, info, trace};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use simple_error::bail;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Checks whether an on-disk artifact is already usable, meaning it exists with non-zero
/// size. Alignment-derived outputs are skipped when this holds, so deleting a stale file
/// is how a re-run is forced.
pub fn cached_artifact(path: &Path) -> bool {
    std::fs::metadata(path).map(|meta| meta.len() > 0).unwrap_or(false)
}

/// Per-locus whitelist files derived from aligning the query reads against each
/// reference. Built once per run, then iterated locus-by-locus during phasing.
#[derive(Debug)]
pub struct WhitelistDb {
    /// Locus names sorted for stable iteration
    locus_keys: Vec<String>,
    /// Whitelist file paths keyed by locus name
    whitelists: HashMap<String, PathBuf>
}

impl WhitelistDb {
    /// Aligns the query against every reference locus, classifies each read by its
    /// best-scoring loci, applies any user-defined locus combinations, and writes one
    /// whitelist file per locus. Every filesystem artifact is cached: an existing
    /// non-empty `.m1` or whitelist file short-circuits the corresponding work.
    /// # Arguments
    /// * `reference_db` - the per-locus reference database
    /// * `query` - the input read collection
    /// * `aln_dir` - where alignments and whitelists land; defaults to `<query>_aln`
    /// * `combinations` - user-defined locus groups, validated before any alignment
    /// * `emit_locus_fastq` - also write a filtered FASTQ subset per locus
    /// * `nproc` - worker count passed through to the aligner
    /// * `runner` - capability for invoking the aligner
    /// # Errors
    /// * if the query is not a file or the alignment directory cannot be created
    /// * if a combination names an unknown locus
    /// * if an aligner invocation fails or an artifact cannot be written
    pub fn build(
        reference_db: &ReferenceDb,
        query: &Path,
        aln_dir: Option<&Path>,
        combinations: &LocusCombinations,
        emit_locus_fastq: bool,
        nproc: usize,
        runner: &dyn ToolRunner
    ) -> Result<WhitelistDb, Box<dyn std::error::Error>> {
        info!("Building whitelist database for '{}'", query.display());
        let start_time = Instant::now();

        if !query.is_file() {
            bail!("Query must be a valid file!");
        }
        combinations.validate(reference_db.loci())?;

        let aln_dir: PathBuf = match aln_dir {
            Some(dir) => dir.to_path_buf(),
            None => {
                let mut default_dir = query.as_os_str().to_owned();
                default_dir.push("_aln");
                PathBuf::from(default_dir)
            }
        };
        if !aln_dir.is_dir() {
            if let Err(e) = std::fs::create_dir(&aln_dir) {
                bail!("Could not create output directory: {}: {}", aln_dir.display(), e);
            }
        }

        let mut classifier = LocusClassifier::new();
        for (locus, reference) in reference_db.iter() {
            let m1 = align_against_locus(query, reference, locus, &aln_dir, nproc, runner)?;
            let handle = File::open(&m1)?;
            classifier.fold_alignments(BufReader::new(handle), locus)?;
        }

        let mut membership = LocusMembership::from_classifier(&classifier);
        membership.apply_combinations(combinations);

        let mut locus_keys: Vec<String> = vec![];
        let mut whitelists: HashMap<String, PathBuf> = Default::default();
        for locus in membership.loci() {
            let members = membership.members(locus).unwrap_or(&[]);
            let whitelist = materialize_whitelist(&aln_dir, locus, members)?;
            if emit_locus_fastq {
                materialize_filtered_fastq(&aln_dir, locus, members, query)?;
            }
            locus_keys.push(locus.clone());
            whitelists.insert(locus.clone(), whitelist);
        }
        debug!("Materialized whitelists for {} loci", locus_keys.len());

        info!("Finished building whitelist database in {:.3}s", start_time.elapsed().as_secs_f64());
        Ok(WhitelistDb {
            locus_keys,
            whitelists
        })
    }

    /// Every whitelisted locus name, sorted.
    pub fn loci(&self) -> &[String] {
        &self.locus_keys
    }

    pub fn get(&self, locus: &str) -> Option<&PathBuf> {
        self.whitelists.get(locus)
    }

    /// Iterates `(locus, whitelist path)` pairs in sorted locus order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PathBuf)> {
        self.locus_keys.iter().map(|locus| (locus, &self.whitelists[locus]))
    }

    pub fn len(&self) -> usize {
        self.locus_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locus_keys.is_empty()
    }
}

/// Derives the `.m1` output filename for a query/locus pair. Known sequence-file
/// suffixes are replaced to keep the names short; anything else keeps the full
/// basename so unrelated inputs cannot collide.
fn m1_filename(query: &Path, locus: &str) -> String {
    let basename = query.file_name().unwrap_or_default().to_string_lossy();
    for suffix in ["subreadset.xml", "bam", "fastq.gz", "fq.gz", "fastq", "fq"] {
        if let Some(stem) = basename.strip_suffix(suffix) {
            if stem.ends_with('.') {
                return format!("{}{}.m1", stem, locus);
            }
        }
    }
    format!("{}.{}.m1", basename, locus)
}

/// Aligns the query against one locus's reference, producing a `.m1` tabular output
/// file. An existing non-empty `.m1` is returned as-is without invoking the aligner.
/// # Arguments
/// * `query` - the input read collection
/// * `reference` - the locus's reference FASTA plus optional suffix array
/// * `locus` - the locus name, used for the output filename
/// * `aln_dir` - directory receiving the `.m1` file
/// * `nproc` - worker count passed through to the aligner
/// * `runner` - capability for the child process
/// # Errors
/// * if the child cannot be spawned or exits non-zero
fn align_against_locus(
    query: &Path,
    reference: &LocusReference,
    locus: &str,
    aln_dir: &Path,
    nproc: usize,
    runner: &dyn ToolRunner
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let output_m1 = aln_dir.join(m1_filename(query, locus));
    if cached_artifact(&output_m1) {
        debug!("Existing output file for locus '{}', skipping alignment", locus);
        return Ok(output_m1);
    }

    let mut args: Vec<String> = vec![
        query.display().to_string(),
        reference.fasta.display().to_string(),
        "--bestn".to_string(), "1".to_string(),
        "--out".to_string(), output_m1.display().to_string(),
        "--fastSDP".to_string(),
        "--minSubreadLength".to_string(), "1000".to_string(),
        "--minAlnLength".to_string(), "1000".to_string(),
        "--nproc".to_string(), nproc.to_string()
    ];
    if let Some(suffix_array) = &reference.suffix_array {
        args.push("--sa".to_string());
        args.push(suffix_array.display().to_string());
    }

    trace!("Calling blasr with command line 'blasr {}'", args.join(" "));
    let output = runner.run("blasr", &args, None)?;
    trace!("Finished running blasr");

    if !output.success() {
        error!("Blasr alignment failed. Stderr was {}", output.stderr_lossy());
    }
    ensure_success(&format!("blasr {}", args.join(" ")), &output)?;
    Ok(output_m1)
}

/// Writes the flat whitelist for one locus, one read id per line in membership order.
/// An existing non-empty whitelist is returned unchanged.
fn materialize_whitelist(aln_dir: &Path, locus: &str, members: &[String]) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let output_txt = aln_dir.join(format!("{}.subreads.txt", locus));
    if cached_artifact(&output_txt) {
        debug!("Existing locus-specific whitelist file found for '{}', skipping filtering", locus);
        return Ok(output_txt);
    }

    let mut handle = File::create(&output_txt)?;
    for read_id in members.iter() {
        writeln!(handle, "{}", read_id)?;
    }
    Ok(output_txt)
}

/// Writes the filtered FASTQ subset for one locus: every query record whose truncated
/// read id is in the membership. Follows the same caching rule as the flat whitelist.
/// # Errors
/// * if the query cannot be parsed as (optionally gzipped) FASTQ
fn materialize_filtered_fastq(
    aln_dir: &Path,
    locus: &str,
    members: &[String],
    query: &Path
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let output_fastq = aln_dir.join(format!("{}.subreads.fastq", locus));
    if cached_artifact(&output_fastq) {
        debug!("Existing locus-specific subset file found for '{}', skipping filtering", locus);
        return Ok(output_fastq);
    }

    let member_set: HashSet<&str> = members.iter().map(|m| m.as_str()).collect();
    let file_reader = BufReader::new(File::open(query)?);
    let fastq_reader: fastq::Reader<Box<dyn BufRead>> = if query.extension().unwrap_or_default() == "gz" {
        debug!("Detected gzip extension, reading query with MultiGzDecoder...");
        let gz_decoder = MultiGzDecoder::new(file_reader);
        let bufreader = BufReader::new(gz_decoder);
        fastq::Reader::from_bufread(Box::new(bufreader))
    } else {
        fastq::Reader::from_bufread(Box::new(file_reader))
    };

    let mut writer = fastq::Writer::to_file(&output_fastq)?;
    let mut count: usize = 0;
    for entry in fastq_reader.records() {
        let record = entry?;
        if member_set.contains(truncated_read_id(record.id()).as_str()) {
            writer.write_record(&record)?;
            count += 1;
        }
    }
    writer.flush()?;
    debug!("Wrote a subset FASTQ with {} whitelisted subreads for locus '{}'", count, locus);
    Ok(output_fastq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::testing::FakeToolRunner;

    fn write_references(dir: &Path) {
        std::fs::write(dir.join("A_gen.fasta"), b">refA\nACGT\n").unwrap();
        std::fs::write(dir.join("B_gen.fasta"), b">refB\nTGCA\n").unwrap();
    }

    fn write_query(path: &Path) {
        let fastq_text = "@r1/1/0_10/0_5\nACGTACGT\n+\nIIIIIIII\n@r2/2/0_10/0_5\nTTTTCCCC\n+\nIIIIIIII\n";
        std::fs::write(path, fastq_text).unwrap();
    }

    /// Stages m1 content at the aligner's `--out` target: r1 ties both loci, r2 hits A only.
    fn staging_runner() -> FakeToolRunner {
        FakeToolRunner::new(|program, args, _| {
            assert_eq!(program, "blasr");
            let out_index = args.iter().position(|a| a == "--out").unwrap() + 1;
            let lines = if args[1].contains("A_gen") {
                "r1/1/0_10/0_5 refA 0 0 -100 90.0\nr2/2/0_10/0_5 refA 0 0 -250 88.5\n"
            } else {
                "r1/1/0_10/0_5 refB 0 0 -100 91.2\n"
            };
            std::fs::write(&args[out_index], lines).unwrap();
            Ok(FakeToolRunner::ok_output())
        })
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path).unwrap().lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_m1_filename() {
        assert_eq!(m1_filename(Path::new("/data/sample.fastq"), "A"), "sample.A.m1");
        assert_eq!(m1_filename(Path::new("sample.fastq.gz"), "A"), "sample.A.m1");
        assert_eq!(m1_filename(Path::new("sample.bam"), "B"), "sample.B.m1");
        assert_eq!(m1_filename(Path::new("sample.subreadset.xml"), "C"), "sample.C.m1");
        // unknown extensions keep the full basename
        assert_eq!(m1_filename(Path::new("weird.cram"), "A"), "weird.cram.A.m1");
    }

    #[test]
    fn test_cached_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.m1");
        let empty = dir.path().join("empty.m1");
        let full = dir.path().join("full.m1");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"data\n").unwrap();

        assert!(!cached_artifact(&missing));
        assert!(!cached_artifact(&empty));
        assert!(cached_artifact(&full));
    }

    #[test]
    fn test_build_whitelists() {
        let dir = tempfile::tempdir().unwrap();
        write_references(dir.path());
        let query = dir.path().join("sample.fastq");
        write_query(&query);

        let runner = staging_runner();
        let reference_db = ReferenceDb::scan(dir.path(), false, &runner).unwrap();
        let combinations = LocusCombinations::new(vec![]);
        let db = WhitelistDb::build(&reference_db, &query, None, &combinations, false, 1, &runner).unwrap();

        assert_eq!(db.loci(), &["A".to_string(), "B".to_string()]);
        // r1 tied A and B so it appears on both whitelists; r2 is A-only
        let aln_dir = dir.path().join("sample.fastq_aln");
        assert_eq!(db.get("A").unwrap(), &aln_dir.join("A.subreads.txt"));
        assert_eq!(read_lines(db.get("A").unwrap()), vec!["r1/1/0_10", "r2/2/0_10"]);
        assert_eq!(read_lines(db.get("B").unwrap()), vec!["r1/1/0_10"]);
        // one aligner call per locus
        assert_eq!(runner.calls.borrow().len(), 2);
    }

    #[test]
    fn test_build_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_references(dir.path());
        let query = dir.path().join("sample.fastq");
        write_query(&query);

        let runner = staging_runner();
        let reference_db = ReferenceDb::scan(dir.path(), false, &runner).unwrap();
        let combinations = LocusCombinations::new(vec![]);
        WhitelistDb::build(&reference_db, &query, None, &combinations, false, 1, &runner).unwrap();
        assert_eq!(runner.calls.borrow().len(), 2);

        // the second pass finds every artifact and never re-invokes the aligner
        let db = WhitelistDb::build(&reference_db, &query, None, &combinations, false, 1, &runner).unwrap();
        assert_eq!(runner.calls.borrow().len(), 2);
        assert_eq!(read_lines(db.get("B").unwrap()), vec!["r1/1/0_10"]);

        // deleting an artifact forces just that locus to be recomputed
        let aln_dir = dir.path().join("sample.fastq_aln");
        std::fs::remove_file(aln_dir.join("sample.A.m1")).unwrap();
        std::fs::remove_file(aln_dir.join("A.subreads.txt")).unwrap();
        let db = WhitelistDb::build(&reference_db, &query, None, &combinations, false, 1, &runner).unwrap();
        assert_eq!(runner.calls.borrow().len(), 3);
        assert_eq!(read_lines(db.get("A").unwrap()), vec!["r1/1/0_10", "r2/2/0_10"]);
    }

    #[test]
    fn test_build_with_combination() {
        let dir = tempfile::tempdir().unwrap();
        write_references(dir.path());
        let query = dir.path().join("sample.fastq");
        write_query(&query);

        let runner = staging_runner();
        let reference_db = ReferenceDb::scan(dir.path(), false, &runner).unwrap();
        let combinations = LocusCombinations::new(vec![
            ("AB".to_string(), vec!["A".to_string(), "B".to_string()])
        ]);
        let db = WhitelistDb::build(&reference_db, &query, None, &combinations, false, 1, &runner).unwrap();

        assert_eq!(db.loci(), &["A".to_string(), "AB".to_string(), "B".to_string()]);
        assert_eq!(read_lines(db.get("AB").unwrap()), vec!["r1/1/0_10", "r2/2/0_10"]);
    }

    #[test]
    fn test_combination_with_unknown_locus_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_references(dir.path());
        let query = dir.path().join("sample.fastq");
        write_query(&query);

        let runner = staging_runner();
        let reference_db = ReferenceDb::scan(dir.path(), false, &runner).unwrap();
        let combinations = LocusCombinations::new(vec![
            ("AB".to_string(), vec!["A".to_string(), "DRB1".to_string()])
        ]);
        let error = WhitelistDb::build(&reference_db, &query, None, &combinations, false, 1, &runner).unwrap_err();
        assert!(format!("{}", error).contains("DRB1"));
        // validation happens before any alignment work
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_emit_locus_fastq() {
        let dir = tempfile::tempdir().unwrap();
        write_references(dir.path());
        let query = dir.path().join("sample.fastq");
        write_query(&query);

        let runner = FakeToolRunner::new(|_, args, _| {
            let out_index = args.iter().position(|a| a == "--out").unwrap() + 1;
            // only r2 aligns, and only against locus A
            let lines = if args[1].contains("A_gen") {
                "r2/2/0_10/0_5 refA 0 0 -250 88.5\n"
            } else {
                ""
            };
            std::fs::write(&args[out_index], lines).unwrap();
            Ok(FakeToolRunner::ok_output())
        });
        let reference_db = ReferenceDb::scan(dir.path(), false, &runner).unwrap();
        let combinations = LocusCombinations::new(vec![]);
        let db = WhitelistDb::build(&reference_db, &query, None, &combinations, true, 1, &runner).unwrap();

        assert_eq!(db.loci(), &["A".to_string()]);
        let subset = dir.path().join("sample.fastq_aln").join("A.subreads.fastq");
        let records: Vec<fastq::Record> = fastq::Reader::from_file(&subset)
            .unwrap()
            .records()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), "r2/2/0_10/0_5");
    }
}
