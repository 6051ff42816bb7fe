
use crate::data_types::phasing_result::PhasingResult;
use crate::writers::aggregator::{ResultAggregator, SUMMARY_HEADER, SummaryRow};

use bio::io::fastq;
use log::debug;
use simple_error::bail;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writes the combined run outputs: the retained and chimera/noise FASTQs, the
/// run-level summary table, and one subread weight matrix per barcode.
pub struct ResultWriter {
    /// Filename root for the per-barcode matrix files; the barcode and `.csv` are appended
    subread_root: PathBuf,
    good_fastq: fastq::Writer<File>,
    junk_fastq: fastq::Writer<File>,
    summary_csv: csv::Writer<File>,
    aggregator: ResultAggregator
}

impl ResultWriter {
    /// Opens all run-level outputs under `directory`, creating the directory if needed.
    /// The summary header is written immediately so even a run with zero results leaves
    /// a well-formed table.
    /// # Arguments
    /// * `directory` - the output directory for combined results
    /// # Errors
    /// * if the directory cannot be created or any output cannot be opened
    pub fn new(directory: &Path) -> Result<ResultWriter, Box<dyn std::error::Error>> {
        if !directory.is_dir() {
            if let Err(e) = std::fs::create_dir_all(directory) {
                bail!("Could not create result directory: {}: {}", directory.display(), e);
            }
        }

        let good_fastq = open_fastq_writer(directory, "loci_analysis.fastq")?;
        let junk_fastq = open_fastq_writer(directory, "loci_analysis_chimeras_noise.fastq")?;

        let mut summary_csv: csv::Writer<File> = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(directory.join("loci_analysis_summary.csv"))?;
        summary_csv.write_record(SUMMARY_HEADER)?;
        summary_csv.flush()?;

        Ok(ResultWriter {
            subread_root: directory.join("loci_analysis_subreads."),
            good_fastq,
            junk_fastq,
            summary_csv,
            aggregator: ResultAggregator::new()
        })
    }

    /// Routes one phasing result to the run outputs: its record to the appropriate
    /// FASTQ, its row to the summary table, and its weights into the in-flight matrix.
    /// The aggregator is consulted first, so a rejected result writes nothing at all.
    /// # Errors
    /// * if the result belongs to a different barcode than the in-flight matrix
    /// * if the result id repeats within the current barcode
    /// * if any output cannot be written
    pub fn write_result(&mut self, result: &PhasingResult) -> Result<(), Box<dyn std::error::Error>> {
        let row: SummaryRow = self.aggregator.add(result)?;

        if result.is_junk {
            self.junk_fastq.write_record(&result.record)?;
            self.junk_fastq.flush()?;
        } else {
            self.good_fastq.write_record(&result.record)?;
            self.good_fastq.flush()?;
        }

        self.summary_csv.serialize(&row)?;
        self.summary_csv.flush()?;
        Ok(())
    }

    /// Writes the subread weight matrix for the active barcode, if any, then resets the
    /// aggregation session for the next sample. The matrix header is `SubreadId`
    /// followed by result ids in descending read-count order; each row carries one
    /// subread's weights with absent pairs written as zero.
    /// # Errors
    /// * if the matrix file cannot be written
    pub fn finalize_barcode(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(barcode) = self.aggregator.active_barcode() {
            let mut matrix_path = self.subread_root.clone().into_os_string();
            matrix_path.push(barcode);
            matrix_path.push(".csv");
            let matrix_path = PathBuf::from(matrix_path);

            let mut matrix_csv: csv::Writer<File> = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(&matrix_path)?;

            let columns = self.aggregator.columns_by_read_count();
            let mut header: Vec<&str> = vec!["SubreadId"];
            header.extend(columns.iter().map(|column| column.as_str()));
            matrix_csv.write_record(&header)?;

            for subread_id in self.aggregator.subreads() {
                let mut row: Vec<String> = vec![subread_id.clone()];
                for column in columns.iter() {
                    row.push(self.aggregator.weight(subread_id, column).to_string());
                }
                matrix_csv.write_record(&row)?;
            }
            matrix_csv.flush()?;
            debug!("Wrote subread weights for {} results to '{}'", columns.len(), matrix_path.display());
        }
        self.aggregator.reset();
        Ok(())
    }
}

fn open_fastq_writer(directory: &Path, filename: &str) -> Result<fastq::Writer<File>, Box<dyn std::error::Error>> {
    match fastq::Writer::to_file(directory.join(filename)) {
        Ok(writer) => Ok(writer),
        Err(e) => bail!("Could not open FASTQ output for writing: {}: {}", filename, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::phasing_result::PhasingSummary;
    use rustc_hash::FxHashMap as HashMap;

    fn test_result(barcode: &str, id: &str, weights: &[(&str, f64)], is_junk: bool) -> PhasingResult {
        let record = fastq::Record::with_attrs(id, None, b"ACGTACGT", b"IIIIIIII");
        let subreads: HashMap<String, f64> = weights.iter().map(|(s, w)| (s.to_string(), *w)).collect();
        PhasingResult::new(Some(barcode), "A", &record, PhasingSummary::default(), subreads, is_junk).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path).unwrap().lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_empty_run_leaves_summary_header() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("results");
        let _writer = ResultWriter::new(&out_dir).unwrap();

        let lines = read_lines(&out_dir.join("loci_analysis_summary.csv"));
        assert_eq!(lines, vec![SUMMARY_HEADER.join(",")]);
        assert!(out_dir.join("loci_analysis.fastq").exists());
        assert!(out_dir.join("loci_analysis_chimeras_noise.fastq").exists());
    }

    #[test]
    fn test_results_route_by_junk_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ResultWriter::new(dir.path()).unwrap();
        writer.write_result(&test_result("0--0", "Barcode0--0_Cluster0_Phase0_NumReads120", &[], false)).unwrap();
        writer.write_result(&test_result("0--0", "Barcode0--0_Cluster1_Phase0_NumReads5", &[], true)).unwrap();

        let good = std::fs::read_to_string(dir.path().join("loci_analysis.fastq")).unwrap();
        let junk = std::fs::read_to_string(dir.path().join("loci_analysis_chimeras_noise.fastq")).unwrap();
        assert!(good.contains("Barcode0--0_LocusA_Cluster0_Phase0_NumReads120"));
        assert!(!good.contains("Cluster1"));
        assert!(junk.contains("Barcode0--0_LocusA_Cluster1_Phase0_NumReads5"));

        // both results land in the summary regardless of routing
        let summary = read_lines(&dir.path().join("loci_analysis_summary.csv"));
        assert_eq!(summary.len(), 3);
        assert!(summary[1].starts_with("0--0,Barcode0--0_LocusA_Cluster0_Phase0_NumReads120,"));
        assert!(summary[2].starts_with("0--0,Barcode0--0_LocusA_Cluster1_Phase0_NumReads5,"));
    }

    #[test]
    fn test_finalize_writes_weight_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ResultWriter::new(dir.path()).unwrap();
        writer.write_result(&test_result(
            "1--1", "Barcode1--1_Cluster0_Phase0_NumReads120", &[("s1", 0.9), ("s2", 0.0)], false
        )).unwrap();
        writer.write_result(&test_result(
            "1--1", "Barcode1--1_Cluster0_Phase1_NumReads40", &[("s1", 0.2)], false
        )).unwrap();
        writer.finalize_barcode().unwrap();

        let matrix = read_lines(&dir.path().join("loci_analysis_subreads.1--1.csv"));
        assert_eq!(matrix, vec![
            "SubreadId,Barcode1--1_LocusA_Cluster0_Phase0_NumReads120,Barcode1--1_LocusA_Cluster0_Phase1_NumReads40",
            // s2 had only a zero weight so it never becomes a row
            "s1,0.9,0.2"
        ]);
    }

    #[test]
    fn test_finalize_without_results_writes_no_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ResultWriter::new(dir.path()).unwrap();
        writer.finalize_barcode().unwrap();

        let matrices: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("loci_analysis_subreads."))
            .collect();
        assert!(matrices.is_empty());
    }

    #[test]
    fn test_finalize_separates_barcodes() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ResultWriter::new(dir.path()).unwrap();
        writer.write_result(&test_result("0--0", "Barcode0--0_Cluster0_Phase0_NumReads64", &[("s1", 0.5)], false)).unwrap();
        writer.finalize_barcode().unwrap();
        writer.write_result(&test_result("1--1", "Barcode1--1_Cluster0_Phase0_NumReads32", &[("s2", 0.7)], false)).unwrap();
        writer.finalize_barcode().unwrap();

        let first = read_lines(&dir.path().join("loci_analysis_subreads.0--0.csv"));
        let second = read_lines(&dir.path().join("loci_analysis_subreads.1--1.csv"));
        assert_eq!(first[1], "s1,0.5");
        assert_eq!(second[1], "s2,0.7");

        // without the finalize in between, the second barcode would have been an error
        writer.write_result(&test_result("0--0", "Barcode0--0_Cluster0_Phase1_NumReads16", &[], false)).unwrap();
        let error = writer
            .write_result(&test_result("1--1", "Barcode1--1_Cluster0_Phase1_NumReads8", &[], false))
            .unwrap_err();
        assert!(format!("{}", error).contains("Barcode mismatch"));
    }
}
