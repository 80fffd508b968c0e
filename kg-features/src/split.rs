//! Split and filter files
//!
//! Splits are pickled two-dimensional numpy integer arrays with one
//! `[head, relation, tail]` row per triple. Plain pickled lists of rows are
//! accepted as well. The filter file (`to_skip.pickle`) is kept as an opaque
//! pickle value.

use crate::array_pickle;
use crate::error::{FeatureError, Result};
use ndarray::Array2;
use serde_pickle::{DeOptions, Value};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

/// Number of columns in a triple array: head, relation, tail
pub const TRIPLE_WIDTH: usize = 3;

/// Column holding the head entity
pub const HEAD: usize = 0;
/// Column holding the relation
pub const RELATION: usize = 1;
/// Column holding the tail entity
pub const TAIL: usize = 2;

/// Name of the filter file inside a dataset directory
pub const FILTERS_FILE: &str = "to_skip.pickle";

/// Dataset partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Test, Split::Valid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }

    /// File name of this split inside a dataset directory
    pub fn file_name(&self) -> String {
        format!("{}.pickle", self.as_str())
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "valid" => Ok(Split::Valid),
            "test" => Ok(Split::Test),
            other => Err(FeatureError::invalid_argument(format!(
                "unknown split {:?}, expected train, valid or test",
                other
            ))),
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        FeatureError::data_load(format!("Failed to open {}: {}", path.display(), e))
    })?;
    Ok(BufReader::new(file))
}

fn in_file(path: &Path, err: FeatureError) -> FeatureError {
    match err {
        FeatureError::DataLoad(msg) => FeatureError::data_load(format!("{}: {}", path.display(), msg)),
        other => other,
    }
}

/// Load a pickled triple array into an `(n, 3)` matrix
pub fn load_triples(path: &Path) -> Result<Array2<i64>> {
    let bytes = std::fs::read(path).map_err(|e| {
        FeatureError::data_load(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let triples = match array_pickle::decode_int_matrix(&bytes).map_err(|e| in_file(path, e))? {
        Some(array) => {
            log::debug!("{} holds a numpy array of shape {:?}", path.display(), array.dim());
            check_triples(array)
        }
        None => {
            let rows: Vec<Vec<i64>> = serde_pickle::from_slice(&bytes, DeOptions::new()).map_err(|e| {
                FeatureError::data_load(format!("Failed to decode {}: {}", path.display(), e))
            })?;
            rows_to_array(&rows)
        }
    }
    .map_err(|e| in_file(path, e))?;

    log::debug!("Loaded {} triples from {}", triples.nrows(), path.display());
    Ok(triples)
}

/// Validate a decoded matrix as triples
pub fn check_triples(array: Array2<i64>) -> Result<Array2<i64>> {
    if array.nrows() == 0 {
        return Ok(Array2::zeros((0, TRIPLE_WIDTH)));
    }
    if array.ncols() != TRIPLE_WIDTH {
        return Err(FeatureError::data_load(format!(
            "expected {} columns, found {}",
            TRIPLE_WIDTH,
            array.ncols()
        )));
    }
    if let Some(((idx, _), value)) = array.indexed_iter().find(|(_, v)| **v < 0) {
        return Err(FeatureError::data_load(format!(
            "row {}: negative index {}",
            idx, value
        )));
    }
    Ok(array)
}

/// Pack rows into a triple matrix, rejecting ragged or negative rows
pub fn rows_to_array(rows: &[Vec<i64>]) -> Result<Array2<i64>> {
    let mut flat = Vec::with_capacity(rows.len() * TRIPLE_WIDTH);
    for (idx, row) in rows.iter().enumerate() {
        if row.len() != TRIPLE_WIDTH {
            return Err(FeatureError::data_load(format!(
                "row {}: expected {} columns, found {}",
                idx,
                TRIPLE_WIDTH,
                row.len()
            )));
        }
        if let Some(value) = row.iter().find(|v| **v < 0) {
            return Err(FeatureError::data_load(format!(
                "row {}: negative index {}",
                idx, value
            )));
        }
        flat.extend_from_slice(row);
    }

    Array2::from_shape_vec((rows.len(), TRIPLE_WIDTH), flat)
        .map_err(|e| FeatureError::shape(e.to_string()))
}

/// Load the filter structure without interpreting it
pub fn load_filters(path: &Path) -> Result<Value> {
    let value = serde_pickle::value_from_reader(open(path)?, DeOptions::new())
        .map_err(|e| FeatureError::data_load(format!("Failed to decode {}: {}", path.display(), e)))?;
    log::debug!("Loaded filters from {}", path.display());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_pickle::SerOptions;

    #[test]
    fn test_split_names() {
        assert_eq!(Split::Train.file_name(), "train.pickle");
        assert_eq!("valid".parse::<Split>().unwrap(), Split::Valid);
        assert!(matches!(
            "dev".parse::<Split>(),
            Err(FeatureError::InvalidArgument(_))
        ));
        assert_eq!(Split::Test.to_string(), "test");
    }

    #[test]
    fn test_rows_to_array() {
        let arr = rows_to_array(&[vec![0, 1, 2], vec![3, 0, 4]]).unwrap();
        assert_eq!(arr.dim(), (2, 3));
        assert_eq!(arr[[1, TAIL]], 4);
    }

    #[test]
    fn test_rows_to_array_empty() {
        let arr = rows_to_array(&[]).unwrap();
        assert_eq!(arr.dim(), (0, 3));
    }

    #[test]
    fn test_rows_to_array_rejects_bad_rows() {
        let err = rows_to_array(&[vec![0, 1, 2], vec![0, 1]]).unwrap_err();
        assert!(matches!(err, FeatureError::DataLoad(_)));

        let err = rows_to_array(&[vec![0, -1, 2]]).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_load_triples_from_pickle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.pickle");
        let rows: Vec<Vec<i64>> = vec![vec![0, 0, 1], vec![1, 0, 2]];
        let mut file = File::create(&path).unwrap();
        serde_pickle::to_writer(&mut file, &rows, SerOptions::new()).unwrap();

        let arr = load_triples(&path).unwrap();
        assert_eq!(arr.nrows(), 2);
        assert_eq!(arr[[1, HEAD]], 1);
    }

    #[test]
    fn test_load_triples_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.pickle");
        std::fs::write(&path, b"not a pickle").unwrap();
        assert!(matches!(load_triples(&path), Err(FeatureError::DataLoad(_))));
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_load_triples_from_numpy_pickles() {
        let expected = ndarray::array![[0, 0, 1], [2, 1, 0]];
        for name in [
            "train_i8_p2.pickle",
            "train_i8_p3.pickle",
            "train_i8_p4.pickle",
            "train_i8_p5.pickle",
            "train_i4_fortran_p4.pickle",
            "train_u2_big_p4.pickle",
        ] {
            let arr = load_triples(&fixture(name)).unwrap();
            assert_eq!(arr, expected, "{}", name);
        }
    }

    #[test]
    fn test_check_triples() {
        let ok = check_triples(ndarray::array![[0, 1, 2]]).unwrap();
        assert_eq!(ok.dim(), (1, 3));

        let empty = check_triples(Array2::zeros((0, 0))).unwrap();
        assert_eq!(empty.dim(), (0, 3));

        let err = check_triples(ndarray::array![[0, 1], [2, 3]]).unwrap_err();
        assert!(err.to_string().contains("expected 3 columns"));

        let err = check_triples(ndarray::array![[0, 1, 2], [3, -4, 5]]).unwrap_err();
        assert!(err.to_string().contains("row 1: negative index -4"));
    }

    #[test]
    fn test_truncated_numpy_pickle_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.pickle");
        let bytes = std::fs::read(fixture("train_i8_p4.pickle")).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 20]).unwrap();

        let err = load_triples(&path).unwrap_err();
        assert!(matches!(err, FeatureError::DataLoad(_)));
        assert!(err.to_string().contains("train.pickle"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_filters(&dir.path().join(FILTERS_FILE)).unwrap_err();
        assert!(matches!(err, FeatureError::DataLoad(_)));
    }
}
