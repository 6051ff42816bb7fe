
/// Parsing for the tabular alignment records produced by the aligner
pub mod alignment;
/// Parsing and validation of barcode-pair lists
pub mod barcodes;
/// Best-scoring locus assignment for aligned reads, plus locus membership and combination handling
pub mod classifier;
/// CLI functionality and checks
pub mod cli;
/// Contains multiple wrappers for useful data types in LociPhase
pub mod data_types;
/// Capability layer for invoking external tools
pub mod external;
/// Organizes primary workflow for phasing one locus including staging the working directory, running the phaser, and bundling the results
pub mod phaser;
/// Wrapper for the directory of per-locus reference sequences
pub mod reference_db;
/// Builds per-locus read whitelists from alignments of the input reads
pub mod whitelist_db;
/// Contains all the various output writer functionality
pub mod writers;
