//! Run configuration and input expansion

use crate::segment::SegmenterConfig;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};

/// Where flushed tables go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputKind {
    /// One `{entity}.csv` per table
    #[default]
    Csv,
    /// One table per entity in `db.sqlite`
    Sqlite,
    /// One `{entity}.jsonl` per table
    Jsonl,
}

#[derive(Debug, Clone)]
pub struct TabulateConfig {
    /// Files, directories or glob patterns
    pub inputs: Vec<String>,
    /// Search directories recursively for `*.xml`
    pub recurse: bool,
    pub schema_path: PathBuf,
    /// Local directory holding the DTDs documents refer to
    pub dtd_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub output_kind: OutputKind,
    pub validate: bool,
    pub continue_on_error: bool,
    pub segmenter: SegmenterConfig,
}

impl Default for TabulateConfig {
    fn default() -> Self {
        TabulateConfig {
            inputs: Vec::new(),
            recurse: false,
            schema_path: PathBuf::from("config.yaml"),
            dtd_dir: None,
            output_dir: PathBuf::from("."),
            output_kind: OutputKind::default(),
            validate: false,
            continue_on_error: false,
            segmenter: SegmenterConfig::default(),
        }
    }
}

/// Replace a leading `~` with the home directory
pub fn expand_home(input: &str) -> String {
    expand_home_in(input, dirs::home_dir().as_deref())
}

fn expand_home_in(input: &str, home: Option<&Path>) -> String {
    let Some(rest) = input.strip_prefix('~') else {
        return input.to_string();
    };
    if !(rest.is_empty() || rest.starts_with('/')) {
        return input.to_string();
    }
    match home {
        Some(home) => format!("{}{rest}", home.display()),
        None => input.to_string(),
    }
}

fn is_pattern(input: &str) -> bool {
    input.contains(&['*', '?', '['][..])
}

fn glob_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut paths = glob::glob(pattern)
        .with_context(|| format!("Invalid glob pattern: {pattern}"))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to expand {pattern}"))?;
    paths.sort();
    Ok(paths)
}

fn xml_files_in(dir: &Path, recurse: bool) -> Result<Vec<PathBuf>> {
    let dir = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = if recurse {
        format!("{dir}/**/*.[xX][mM][lL]")
    } else {
        format!("{dir}/*.[xX][mM][lL]")
    };
    Ok(glob_files(&pattern)?
        .into_iter()
        .filter(|p| p.is_file())
        .collect())
}

/// Turn the input arguments into the ordered list of files to process
///
/// A path that is neither a file nor a directory, or a pattern that matches
/// nothing, is an error.
pub fn expand_inputs(inputs: &[String], recurse: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let expanded = expand_home(input);
        let candidates = if is_pattern(&expanded) {
            let matched = glob_files(&expanded)?;
            if matched.is_empty() {
                bail!("Specified input matches no files: {input}");
            }
            matched
        } else {
            vec![PathBuf::from(&expanded)]
        };

        for path in candidates {
            if path.is_file() {
                files.push(path);
            } else if path.is_dir() {
                files.extend(xml_files_in(&path, recurse)?);
            } else {
                bail!("Specified input is invalid: {}", path.display());
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xml"), "").unwrap();
        fs::write(dir.path().join("B.XML"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c.xml"), "").unwrap();
        dir
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_directory_expansion() {
        let dir = tree();
        let input = vec![dir.path().to_string_lossy().into_owned()];
        assert_eq!(names(&expand_inputs(&input, false).unwrap()), ["B.XML", "a.xml"]);

        let mut recursive = names(&expand_inputs(&input, true).unwrap());
        recursive.sort();
        assert_eq!(recursive, ["B.XML", "a.xml", "c.xml"]);
    }

    #[test]
    fn test_files_and_patterns() {
        let dir = tree();
        let file = dir.path().join("notes.txt").to_string_lossy().into_owned();
        assert_eq!(names(&expand_inputs(&[file], false).unwrap()), ["notes.txt"]);

        let pattern = format!("{}/*.xml", dir.path().display());
        assert_eq!(names(&expand_inputs(&[pattern], false).unwrap()), ["a.xml"]);
    }

    #[test]
    fn test_invalid_inputs_are_errors() {
        let dir = tree();
        let missing = dir.path().join("missing.xml").to_string_lossy().into_owned();
        assert!(expand_inputs(&[missing], false).is_err());

        let empty = format!("{}/*.json", dir.path().display());
        assert!(expand_inputs(&[empty], false).is_err());
    }

    #[test]
    fn test_expand_home() {
        let home = Path::new("/home/ada");
        assert_eq!(expand_home_in("~/data/*.xml", Some(home)), "/home/ada/data/*.xml");
        assert_eq!(expand_home_in("~", Some(home)), "/home/ada");
        assert_eq!(expand_home_in("~other/x", Some(home)), "~other/x");
        assert_eq!(expand_home_in("/abs", Some(home)), "/abs");
        assert_eq!(expand_home_in("~/x", None), "~/x");
    }

    #[test]
    fn test_expand_home_uses_home_dir() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x"), format!("{}/x", home.display()));
        }
    }
}
