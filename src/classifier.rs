
use crate::alignment::{AlignmentRecord, parse_alignment_line};

use log::debug;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::io::BufRead;

#[derive(thiserror::Error, Debug)]
pub enum ClassifierError {
    #[error("Locus not found ({locus})! Can only combine reads from known loci!")]
    UnknownComponentLocus { locus: String }
}

/// Per-read classification state: the best score seen so far and every locus tied at it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadAssignment {
    /// The best alignment score observed for this read so far
    pub best_score: u64,
    /// All loci tied at `best_score`, in observation order
    pub loci: Vec<String>
}

/// Folds a stream of alignment records, one locus at a time, into a best-locus assignment
/// per read. State is monotone per read: a strictly greater score replaces the tie set
/// outright, an equal score joins it, and a lower score is ignored.
#[derive(Default)]
pub struct LocusClassifier {
    /// Read ids in first-observation order, so downstream artifacts are deterministic
    read_order: Vec<String>,
    /// Assignment state keyed by truncated read id
    assignments: HashMap<String, ReadAssignment>
}

impl LocusClassifier {
    /// Creates an empty classifier for one whitelist-building pass.
    pub fn new() -> LocusClassifier {
        Self::default()
    }

    /// Folds a single alignment record into the classification state.
    /// # Arguments
    /// * `record` - the parsed alignment record, consumed by the fold
    pub fn observe(&mut self, record: AlignmentRecord) {
        match self.assignments.get_mut(&record.read_id) {
            Some(assignment) => {
                if record.score > assignment.best_score {
                    // a strictly better locus wins outright, prior ties are discarded
                    assignment.best_score = record.score;
                    assignment.loci.clear();
                    assignment.loci.push(record.locus);
                } else if record.score == assignment.best_score && !assignment.loci.contains(&record.locus) {
                    // ties are kept as multi-locus ambiguity, not broken by order
                    assignment.loci.push(record.locus);
                }
            },
            None => {
                self.read_order.push(record.read_id.clone());
                self.assignments.insert(record.read_id, ReadAssignment {
                    best_score: record.score,
                    loci: vec![record.locus]
                });
            }
        };
    }

    /// Folds every line of one locus's aligner output into the classification state.
    /// Unparsable lines are counted and skipped, never fatal.
    /// # Arguments
    /// * `reader` - the aligner's tabular output for this locus
    /// * `locus` - the locus the aligner was invoked against
    /// # Errors
    /// * if reading from the underlying stream fails
    pub fn fold_alignments<R: BufRead>(&mut self, reader: R, locus: &str) -> std::io::Result<()> {
        let mut skipped: u64 = 0;
        for line in reader.lines() {
            let line = line?;
            match parse_alignment_line(&line, locus) {
                Some(record) => self.observe(record),
                None => skipped += 1
            };
        }
        if skipped > 0 {
            debug!("Skipped {} unparsable alignment line(s) for locus '{}'", skipped, locus);
        }
        Ok(())
    }

    /// The number of reads with at least one scored alignment.
    pub fn num_reads(&self) -> usize {
        self.read_order.len()
    }

    /// Looks up the current assignment for a read, mostly useful for inspection and tests.
    pub fn assignment(&self, read_id: &str) -> Option<&ReadAssignment> {
        self.assignments.get(read_id)
    }
}

/// A requested merging of component loci into synthetic combined loci, e.g. capturing
/// good reads associated with the wrong member of a cross-reactive locus pair.
#[derive(Clone, Debug, Default)]
pub struct LocusCombinations {
    /// Combination groups as (combined name, component loci), in request order
    groups: Vec<(String, Vec<String>)>
}

impl LocusCombinations {
    /// Wraps parsed combination groups.
    /// # Arguments
    /// * `groups` - (combined name, component loci) pairs, typically from the CLI
    pub fn new(groups: Vec<(String, Vec<String>)>) -> LocusCombinations {
        LocusCombinations { groups }
    }

    /// Checks every component name against the known reference loci. This runs before any
    /// alignment work so that a bad combination request fails cheaply.
    /// # Arguments
    /// * `known_loci` - every locus name present in the reference set
    /// # Errors
    /// * if any component is not a known reference locus
    pub fn validate(&self, known_loci: &[String]) -> Result<(), ClassifierError> {
        for (_name, components) in self.groups.iter() {
            for component in components.iter() {
                if !known_loci.contains(component) {
                    return Err(ClassifierError::UnknownComponentLocus { locus: component.clone() });
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, Vec<String>)> {
        self.groups.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Mapping from locus name (including synthetic combined-locus names) to the ordered set
/// of read ids assigned to it. Built once per whitelist pass by inverting the classifier.
#[derive(Clone, Debug, Default)]
pub struct LocusMembership {
    /// Ordered read ids per locus; reads keep their first-observation order
    members: HashMap<String, Vec<String>>
}

impl LocusMembership {
    /// Inverts the classifier state: each read contributes its id to every locus in its tie
    /// set, so an ambiguous read lands in multiple whitelists simultaneously. That
    /// duplication is deliberate policy; downstream tools resolve the ambiguity.
    /// # Arguments
    /// * `classifier` - the fully folded classification state
    pub fn from_classifier(classifier: &LocusClassifier) -> LocusMembership {
        let mut members: HashMap<String, Vec<String>> = Default::default();
        for read_id in classifier.read_order.iter() {
            let assignment = &classifier.assignments[read_id];
            for locus in assignment.loci.iter() {
                members.entry(locus.clone()).or_default().push(read_id.clone());
            }
        }
        debug!("Found {} subreads with at least one good alignment", classifier.num_reads());
        LocusMembership { members }
    }

    /// Merges component memberships into their combined loci. The combined membership is the
    /// ordered union of any pre-existing membership under the combined name and every
    /// component's membership; shared reads appear once.
    /// # Arguments
    /// * `combinations` - validated combination groups
    pub fn apply_combinations(&mut self, combinations: &LocusCombinations) {
        for (name, components) in combinations.iter() {
            let mut pool: Vec<String> = self.members.remove(name).unwrap_or_default();
            let mut seen: HashSet<String> = pool.iter().cloned().collect();
            for component in components.iter() {
                for read_id in self.members.get(component).map(|m| m.as_slice()).unwrap_or_default() {
                    if seen.insert(read_id.clone()) {
                        pool.push(read_id.clone());
                    }
                }
            }
            self.members.insert(name.clone(), pool);
        }
    }

    /// Every locus with membership, sorted by name for stable iteration.
    pub fn loci(&self) -> Vec<&String> {
        let mut loci: Vec<&String> = self.members.keys().collect();
        loci.sort();
        loci
    }

    /// The ordered read ids assigned to one locus, if any.
    pub fn members(&self, locus: &str) -> Option<&[String]> {
        self.members.get(locus).map(|m| m.as_slice())
    }
}
