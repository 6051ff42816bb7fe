
/// Index of the alignment score column in the aligner's tabular (.m1) output
const SCORE_FIELD: usize = 4;

/// A single parsed alignment record from one line of aligner output.
/// These are transient: each record is folded into the locus classifier and discarded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AlignmentRecord {
    /// Truncated read identifier (movie/hole/range), the subread-identity key
    pub read_id: String,
    /// The locus whose reference this alignment was made against
    pub locus: String,
    /// Magnitude of the aligner's score; the sign is aligner-convention noise
    pub score: u64
}

/// Truncates a query name to its first three `/`-delimited components, which collapses
/// subread-window suffixes into a single subread-identity key.
pub fn truncated_read_id(query: &str) -> String {
    query.split('/').take(3).collect::<Vec<&str>>().join("/")
}

/// Parses one whitespace-delimited line of aligner output into an `AlignmentRecord`.
/// Returns `None` when the line is missing the score column or the score is non-numeric;
/// callers skip such lines rather than treating them as fatal.
/// # Arguments
/// * `line` - one line of aligner output
/// * `locus` - the locus whose reference the aligner was invoked against
pub fn parse_alignment_line(line: &str, locus: &str) -> Option<AlignmentRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let query: &str = fields.first()?;
    let read_id: String = truncated_read_id(query);
    let score: u64 = fields.get(SCORE_FIELD)?.parse::<i64>().ok()?.unsigned_abs();
    Some(AlignmentRecord {
        read_id,
        locus: locus.to_string(),
        score
    })
}
