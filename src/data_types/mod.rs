
/// Contains the phased sequence result type and its summary metrics
pub mod phasing_result;
