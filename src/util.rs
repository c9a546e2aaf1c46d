//! Utility functions used in all other narps_open modules.

use std::io::BufRead;
use std::path::Path;

use crate::error::Result;

/// Number of characters of a subject id, e.g. "001" in "sub-001".
pub const SUBJECT_ID_LENGTH: usize = 3;

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}


/// Return the trailing fixed-width subject id embedded in a label like "sub-001".
///
/// Labels shorter than the id width are returned whole.
pub fn trailing_subject_id(label: &str) -> &str {
    let start = label
        .char_indices()
        .rev()
        .nth(SUBJECT_ID_LENGTH - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &label[start..]
}


/// Subject id of a per-subject file, taken from the name of its parent directory.
///
/// For `.../_contrast_id_1_subject_id_042/cope1.nii.gz` this is "042".
pub fn parent_subject_id<P: AsRef<Path>>(path: P) -> Option<String> {
    path.as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| trailing_subject_id(&name.to_string_lossy()).to_string())
}


/// Find the subject id anywhere in a path, looking for "_subject_id_XXX" or "sub-XXX" components.
pub fn subject_id_from_path<P: AsRef<Path>>(path: P) -> Option<String> {
    for component in path.as_ref().components().rev() {
        let component = component.as_os_str().to_string_lossy();
        for marker in &["_subject_id_", "sub-"] {
            if let Some(pos) = component.find(marker) {
                let id: String = component[pos + marker.len()..]
                    .chars()
                    .take(SUBJECT_ID_LENGTH)
                    .collect();
                if id.chars().count() == SUBJECT_ID_LENGTH {
                    return Some(id);
                }
            }
        }
    }
    None
}


/// Data rows of a whitespace-delimited table, as `(line number, fields)`.
///
/// The first line is the header and is skipped, as are blank lines. Fields are separated by
/// any run of spaces or tabs. Line numbers are 1-based and count the header.
pub fn table_rows<S: BufRead>(input: S) -> Result<Vec<(u64, Vec<String>)>> {
    let mut rows = Vec::new();
    for (idx, line) in input.lines().enumerate().skip(1) {
        let line = line?;
        let fields: Vec<String> = line.split_whitespace().map(String::from).collect();
        if !fields.is_empty() {
            rows.push((idx as u64 + 1, fields));
        }
    }
    Ok(rows)
}
