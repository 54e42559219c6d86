//! Plain-text parsers for ground-truth and landmark files.

use std::fs;
use std::path::Path;

use crate::channel::LandmarkSet;
use crate::error::{LoaderError, Result};

/// Reads row `row` (0-based) of a whitespace-separated numeric text file.
pub fn read_text_row(path: &Path, row: usize) -> Result<Vec<f64>> {
    let content = fs::read_to_string(path)?;
    let line = content.lines().nth(row).ok_or_else(|| {
        LoaderError::DataConsistency(format!("{}: missing row {}", path.display(), row))
    })?;
    parse_float_row(line).map_err(|token| {
        LoaderError::Parse(format!(
            "{}: row {}: invalid number '{}'",
            path.display(),
            row,
            token
        ))
    })
}

fn parse_float_row(line: &str) -> std::result::Result<Vec<f64>, String> {
    line.split_whitespace()
        .map(|token| token.parse::<f64>().map_err(|_| token.to_string()))
        .collect()
}

/// Reads a landmark file: one line per frame, each line a flat list of
/// integer `x y` pairs. A trailing unpaired value is ignored.
pub fn read_landmark_rows(path: &Path) -> Result<Vec<LandmarkSet>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .map(|(row, line)| {
            let values = line
                .split_whitespace()
                .map(|token| token.parse::<i32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    LoaderError::Parse(format!("{}: row {}: {}", path.display(), row, e))
                })?;
            Ok(values.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_read_text_row() {
        let file = file_with("1.0 2.5e-1  -3\n  7.0e+01\t72\n0 0.033 0.066\n");
        assert_eq!(read_text_row(file.path(), 0).unwrap(), vec![1.0, 0.25, -3.0]);
        assert_eq!(read_text_row(file.path(), 1).unwrap(), vec![70.0, 72.0]);
        assert_eq!(read_text_row(file.path(), 2).unwrap().len(), 3);
    }

    #[test]
    fn test_read_text_row_errors() {
        let file = file_with("1.0 x\n");
        assert!(matches!(read_text_row(file.path(), 0), Err(LoaderError::Parse(_))));
        assert!(matches!(
            read_text_row(file.path(), 3),
            Err(LoaderError::DataConsistency(_))
        ));
        assert!(matches!(
            read_text_row(Path::new("/nonexistent/ground_truth.txt"), 0),
            Err(LoaderError::Io(_))
        ));
    }

    #[test]
    fn test_read_landmark_rows() {
        let file = file_with("10 20 30 40\n\n-1 5 7\n");
        let rows = read_landmark_rows(file.path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![(10, 20), (30, 40)]);
        assert!(rows[1].is_empty());
        assert_eq!(rows[2], vec![(-1, 5)]);
    }
}
