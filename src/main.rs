
use lociphase::barcodes::parse_barcode_list;
use lociphase::cli::{Settings,check_settings,get_raw_settings};
use lociphase::external::{SystemToolRunner, ToolRunner};
use lociphase::phaser::{locate_phaser, run_phaser};
use lociphase::reference_db::ReferenceDb;
use lociphase::whitelist_db::WhitelistDb;
use lociphase::writers::result_writer::ResultWriter;

use log::{LevelFilter, debug, error, info};
use std::path::Path;
use std::time::Instant;

fn main() {
    // get the settings
    let settings: Settings = get_raw_settings();
    let filter_level: LevelFilter = if settings.quiet {
        LevelFilter::Error
    } else {
        match settings.verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace
        }
    };

    // immediately setup logging first
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();

    // okay, now we can check all the other settings
    let cli_settings: Settings = check_settings(settings);
    let start_time = Instant::now();

    // all external tools go through one runner
    let runner = SystemToolRunner;

    // make sure the phaser is available before doing any expensive alignment work
    let phaser_program = match locate_phaser() {
        Ok(p) => p,
        Err(e) => {
            error!("Error while locating the phaser: {}", e);
            std::process::exit(exitcode::UNAVAILABLE);
        }
    };
    debug!("Using phaser executable: \"{}\"", phaser_program.display());

    // load the per-locus references, building any missing suffix arrays
    let reference_db = match ReferenceDb::scan(&cli_settings.reference_directory, true, &runner) {
        Ok(db) => db,
        Err(e) => {
            error!("Error while building reference database: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    if reference_db.is_empty() {
        error!("No reference sequences found in \"{}\"", cli_settings.reference_directory.display());
        std::process::exit(exitcode::NOINPUT);
    }

    // build (or re-use) the per-locus whitelists
    let combinations = cli_settings.locus_combinations();
    let whitelist_db = match WhitelistDb::build(
        &reference_db,
        &cli_settings.input_filename,
        None,
        &combinations,
        cli_settings.emit_locus_fastq,
        cli_settings.nproc,
        &runner
    ) {
        Ok(db) => db,
        Err(e) => {
            error!("Error while building whitelist database: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };

    // set up all the output files
    let mut result_writer = match ResultWriter::new(&cli_settings.output_directory) {
        Ok(rw) => rw,
        Err(e) => {
            error!("Error while opening output files: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };

    // barcoded runs phase each sample separately, everything else goes through as one pool
    let barcodes: Vec<String> = match cli_settings.do_bc.as_deref() {
        Some(do_bc) => match parse_barcode_list(do_bc) {
            Ok(b) => b,
            Err(e) => {
                error!("{}", e);
                std::process::exit(exitcode::USAGE);
            }
        },
        None => vec![]
    };

    if barcodes.is_empty() {
        phase_sample(None, &cli_settings, &phaser_program, &whitelist_db, &mut result_writer, &runner);
    } else {
        for barcode in barcodes.iter() {
            phase_sample(Some(barcode.as_str()), &cli_settings, &phaser_program, &whitelist_db, &mut result_writer, &runner);
            finalize_barcode(&mut result_writer);
        }
    }
    // a no-op when the last pass already flushed its matrix
    finalize_barcode(&mut result_writer);

    info!("All loci finished successfully after {} seconds.", start_time.elapsed().as_secs_f64());
}

/// Runs the phaser across every selected locus for one sample and writes out the results.
/// # Arguments
/// * `barcode` - the barcode pair to restrict the phaser to, if the run is barcoded
/// * `settings` - the checked CLI settings
/// * `phaser_program` - full path to the phaser executable
/// * `whitelist_db` - the per-locus whitelists to phase
/// * `result_writer` - sink for all phaser output
/// * `runner` - capability for invoking the phaser
fn phase_sample(
    barcode: Option<&str>,
    settings: &Settings,
    phaser_program: &Path,
    whitelist_db: &WhitelistDb,
    result_writer: &mut ResultWriter,
    runner: &dyn ToolRunner
) {
    match barcode {
        Some(bc) => info!("Processing loci for barcode '{}'...", bc),
        None => info!("Processing loci for the full dataset...")
    };

    for (locus, whitelist) in whitelist_db.iter() {
        if !settings.do_loci.is_empty() && !settings.do_loci.iter().any(|l| l == locus) {
            debug!("Locus '{}' not specified by the user, skipping", locus);
            continue;
        }
        if settings.ignore_loci.iter().any(|l| l == locus) {
            debug!("User elected to ignore locus '{}', skipping", locus);
            continue;
        }

        info!("Phasing locus '{}'...", locus);
        let phaser_settings = settings.phaser_settings(locus, whitelist);
        let results = match run_phaser(phaser_program, barcode, locus, &settings.input_filename, &phaser_settings, runner) {
            Ok(r) => r,
            Err(e) => {
                error!("Error while phasing locus '{}': {}", locus, e);
                std::process::exit(exitcode::SOFTWARE);
            }
        };

        info!("Received {} phased sequences for locus '{}'", results.len(), locus);
        for result in results.iter() {
            match result_writer.write_result(result) {
                Ok(()) => {},
                Err(e) => {
                    error!("Error while writing result '{}': {}", result.id(), e);
                    std::process::exit(exitcode::IOERR);
                }
            };
        }
    }
}

/// Flushes the subread matrix for the active sample and resets the aggregation state.
fn finalize_barcode(result_writer: &mut ResultWriter) {
    match result_writer.finalize_barcode() {
        Ok(()) => {},
        Err(e) => {
            error!("Error while writing subread matrix: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
}
