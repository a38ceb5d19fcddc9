use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};

/// File extensions treated as tabular exports worth pinning as context.
pub const CONTEXT_FILE_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

#[derive(Debug, Snafu)]
pub enum ContextError {
    #[snafu(display("failed to read data directory {path}"))]
    ReadDataDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to read data file {path}"))]
    ReadDataFile {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

pub type ContextResult<T> = Result<T, ContextError>;

/// Loads every tabular export under `data_dir` into one labelled context
/// string handed to the generation backend with each question.
///
/// A missing directory is not an error; the assistant simply answers without
/// listing data.
pub fn load_data_context(data_dir: &Path) -> ContextResult<String> {
    if !data_dir.is_dir() {
        tracing::warn!(
            data_dir = %data_dir.display(),
            "data directory missing; continuing with empty context"
        );
        return Ok(String::new());
    }

    let mut files: Vec<PathBuf> = data_dir
        .read_dir()
        .context(ReadDataDirectorySnafu {
            stage: "context-read-dir",
            path: data_dir.display().to_string(),
        })?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_context_file(path))
        .collect();

    // Directory iteration order is platform-dependent; sort for a stable prompt.
    files.sort();

    let mut sections = Vec::with_capacity(files.len());
    for path in files {
        let contents = std::fs::read_to_string(&path).context(ReadDataFileSnafu {
            stage: "context-read-file",
            path: path.display().to_string(),
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        sections.push(format!("Data from {file_name}:\n{contents}"));
    }

    tracing::info!(
        data_dir = %data_dir.display(),
        file_count = sections.len(),
        "loaded data context"
    );
    Ok(sections.join("\n\n"))
}

fn is_context_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| {
                CONTEXT_FILE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(extension))
            })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_are_labelled_and_joined_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b_news.csv"), "headline,city\n").expect("write b");
        std::fs::write(dir.path().join("a_homes.csv"), "price,beds\n").expect("write a");

        let context = load_data_context(dir.path()).expect("load context");
        assert_eq!(
            context,
            "Data from a_homes.csv:\nprice,beds\n\n\nData from b_news.csv:\nheadline,city\n"
        );
    }

    #[test]
    fn non_tabular_files_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("homes.csv"), "price\n").expect("write csv");
        std::fs::write(dir.path().join("chats.db"), "binary").expect("write db");
        std::fs::write(dir.path().join("notes.md"), "# notes").expect("write md");

        let context = load_data_context(dir.path()).expect("load context");
        assert_eq!(context, "Data from homes.csv:\nprice\n");
    }

    #[test]
    fn missing_directory_yields_empty_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = load_data_context(&dir.path().join("absent")).expect("load context");
        assert!(context.is_empty());
    }
}
