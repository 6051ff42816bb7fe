
/// Collects phased results into summary rows and per-subread support weights
pub mod aggregator;
/// Contains the writer for the combined analysis outputs
pub mod result_writer;
