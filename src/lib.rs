//! # Dexpatch
//!
//! A library for locating and patching methods inside dex-style class
//! containers. Targets are found through structural signatures rather than
//! names, so patches keep working when releases rename or relocate them.
//!
use crate::types::PatcherError;
use std::path::PathBuf;

pub mod container;
pub mod patch;
pub mod patcher;
pub mod proxy;
pub mod signatures;
mod tests;
pub mod types;

/// Recurses a base path returning all found class container files (.cpc)
///
/// # Examples
///
/// ```no_run
///  use dexpatch::find_container_files;
///  use std::path::PathBuf;
///  use std::str::FromStr;
///
///  let p = PathBuf::from_str("containers").unwrap();
///  let files = find_container_files(&p).unwrap();
///  println!("{:} containers found.", files.len());
/// ```
pub fn find_container_files(dir: &PathBuf) -> Result<Vec<PathBuf>, PatcherError> {
    let mut results = vec![];

    let entries = dir.read_dir().map_err(|e| {
        PatcherError::invalid_state(&format!("cannot read directory {}: {}", dir.display(), e))
    })?;
    for p in entries.flatten() {
        if let Ok(f) = p.file_type() {
            if f.is_dir() {
                let mut new_dir = dir.clone();
                new_dir.push(p.file_name());
                let nested = find_container_files(&new_dir)?;
                results.extend(nested);
            } else if p
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(".cpc"))
            {
                results.push(p.path());
            }
        }
    }

    Ok(results)
}
