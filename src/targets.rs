//! Raw target list — from a comma-separated flag or a trigger file.
//!
//! Names are returned raw; normalization and de-duplication happen in the
//! watch set builder.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::info;

use crate::config::Settings;
use crate::error::TargetListError;

const COMMENT: char = '#';

pub const TEMPLATE: &str = "\
#trigger_list.txt
#format is 1 trigger region per line.
#lines can be commented out with hash marks.
";

/// Non-empty, non-comment lines.
pub fn parse_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT))
        .map(str::to_string)
        .collect()
}

pub fn parse_csv(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the trigger file, writing a template first if it does not exist.
pub fn load_file(path: &Path) -> Result<Vec<String>, TargetListError> {
    let io_err = |source| TargetListError::Io {
        path: path.display().to_string(),
        source,
    };

    info!(path = %path.display(), "Loading trigger regions");
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::write(path, TEMPLATE).map_err(io_err)?;
            return Err(TargetListError::TemplateCreated(path.display().to_string()));
        }
        Err(e) => return Err(io_err(e)),
    };

    let names = parse_list(&content);
    if names.is_empty() {
        return Err(TargetListError::Empty);
    }
    Ok(names)
}

/// The `--triggers` flag wins over the trigger file.
pub fn resolve(settings: &Settings) -> Result<Vec<String>, TargetListError> {
    match &settings.triggers {
        Some(list) => {
            let names = parse_csv(list);
            if names.is_empty() {
                return Err(TargetListError::Empty);
            }
            Ok(names)
        }
        None => load_file(&settings.trigger_file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_skips_comments_and_blanks() {
        let content = "# header\nThe Pacific\n\n  lazarus  \n#osiris\n";
        assert_eq!(parse_list(content), vec!["The Pacific", "lazarus"]);
    }

    #[test]
    fn test_parse_csv() {
        assert_eq!(parse_csv("alpha, beta ,,gamma"), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_missing_file_creates_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trigger_list.txt");

        let err = load_file(&path).unwrap_err();
        assert!(matches!(err, TargetListError::TemplateCreated(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), TEMPLATE);

        // The untouched template holds only comments.
        assert!(matches!(load_file(&path), Err(TargetListError::Empty)));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triggers.txt");
        fs::write(&path, "alpha\r\nbeta\n").unwrap();
        assert_eq!(load_file(&path).unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_flag_overrides_file() {
        let settings = Settings {
            triggers: Some("alpha,beta".into()),
            trigger_file: "does/not/exist.txt".into(),
            ..Default::default()
        };
        assert_eq!(resolve(&settings).unwrap(), vec!["alpha", "beta"]);

        let empty = Settings {
            triggers: Some(" , ".into()),
            ..Default::default()
        };
        assert!(matches!(resolve(&empty), Err(TargetListError::Empty)));
    }
}
