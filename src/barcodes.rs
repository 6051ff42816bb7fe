
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum BarcodeError {
    #[error("Invalid barcode string: {text}")]
    InvalidPair { text: String },
    #[error("Invalid barcode index: {index}")]
    InvalidIndex { index: String }
}

/// Parses a comma-separated list of barcode pairs such as `0--0,1--1`.
/// Each pair must be two non-negative integer indices joined by `--`.
/// Order is preserved and duplicates are kept as given.
/// # Arguments
/// * `do_bc` - the raw user-provided barcode list
/// # Errors
/// * if an entry is not of the form `<index>--<index>`
/// * if an index is not all digits
pub fn parse_barcode_list(do_bc: &str) -> Result<Vec<String>, BarcodeError> {
    let mut barcodes: Vec<String> = vec![];
    for token in do_bc.split(',') {
        let indices: Vec<&str> = token.split("--").collect();
        if indices.len() != 2 {
            return Err(BarcodeError::InvalidPair { text: token.to_string() });
        }
        for index in indices.iter() {
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                return Err(BarcodeError::InvalidIndex { index: index.to_string() });
            }
        }
        barcodes.push(token.to_string());
    }
    debug!("Found {} valid barcode-pair(s) to analyze", barcodes.len());
    Ok(barcodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pair() {
        assert_eq!(parse_barcode_list("0--0").unwrap(), vec!["0--0".to_string()]);
    }

    #[test]
    fn test_multiple_pairs_keep_order() {
        let barcodes = parse_barcode_list("3--3,1--1,2--2").unwrap();
        assert_eq!(barcodes, vec!["3--3".to_string(), "1--1".to_string(), "2--2".to_string()]);
    }

    #[test]
    fn test_missing_separator() {
        assert_eq!(
            parse_barcode_list("0--0,5"),
            Err(BarcodeError::InvalidPair { text: "5".to_string() })
        );
    }

    #[test]
    fn test_triple_pair_rejected() {
        assert_eq!(
            parse_barcode_list("1--2--3"),
            Err(BarcodeError::InvalidPair { text: "1--2--3".to_string() })
        );
    }

    #[test]
    fn test_non_numeric_index() {
        assert_eq!(
            parse_barcode_list("lbc1--lbc1"),
            Err(BarcodeError::InvalidIndex { index: "lbc1".to_string() })
        );
    }

    #[test]
    fn test_empty_index() {
        assert_eq!(
            parse_barcode_list("--7"),
            Err(BarcodeError::InvalidIndex { index: "".to_string() })
        );
    }
}
