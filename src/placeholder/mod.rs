//! `{name}` placeholder substitution backed by one value file per name

mod rotation;

pub use rotation::{
    create_selector, PlaceholderRotation, RandomSelector, SequentialSelector, ValueSelector,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::{Captures, Regex};
use tracing::debug;

use crate::error::{RawsendError, Result};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.-]*)\}").expect("placeholder token pattern is valid")
});

struct ValueList {
    values: Vec<String>,
    selector: Box<dyn ValueSelector>,
}

/// Substitutes placeholders with values from `<folder>/<name>.txt` (or `<folder>/<name>`)
pub struct PlaceholderResolver {
    folder: PathBuf,
    rotation: PlaceholderRotation,
    lists: DashMap<String, Arc<ValueList>>,
}

impl PlaceholderResolver {
    pub fn new(folder: impl Into<PathBuf>, rotation: PlaceholderRotation) -> Self {
        Self {
            folder: folder.into(),
            rotation,
            lists: DashMap::new(),
        }
    }

    pub fn rotation(&self) -> PlaceholderRotation {
        self.rotation
    }

    /// Replace every `{name}` token in `text`.
    ///
    /// Each distinct name draws one value per call, so repeated tokens inside one
    /// template agree with each other.
    pub async fn replace(&self, text: &str) -> Result<String> {
        let names: Vec<String> = TOKEN
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect();

        let mut chosen: HashMap<String, String> = HashMap::new();
        for name in &names {
            if chosen.contains_key(name) {
                continue;
            }
            let list = self.values_for(name).await?;
            let value = list
                .selector
                .select(&list.values)
                .ok_or_else(|| RawsendError::PlaceholderEmpty {
                    name: name.to_string(),
                })?;
            chosen.insert(name.to_string(), value.to_string());
        }

        if chosen.is_empty() {
            return Ok(text.to_string());
        }

        Ok(TOKEN
            .replace_all(text, |caps: &Captures| chosen[&caps[1]].clone())
            .into_owned())
    }

    async fn values_for(&self, name: &str) -> Result<Arc<ValueList>> {
        if let Some(list) = self.lists.get(name).map(|entry| entry.value().clone()) {
            return Ok(list);
        }

        let values = load_values(&self.folder, name).await?;
        debug!("Loaded {} values for placeholder '{}'", values.len(), name);

        let list = Arc::new(ValueList {
            values,
            selector: create_selector(self.rotation),
        });
        // A concurrent loader may have won the race; keep whichever landed first
        Ok(self
            .lists
            .entry(name.to_string())
            .or_insert(list)
            .value()
            .clone())
    }
}

async fn load_values(folder: &Path, name: &str) -> Result<Vec<String>> {
    let mut found = None;
    for candidate in [folder.join(format!("{}.txt", name)), folder.join(name)] {
        if tokio::fs::metadata(&candidate)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            found = Some(candidate);
            break;
        }
    }
    let path = found.ok_or_else(|| RawsendError::PlaceholderNotFound {
        name: name.to_string(),
    })?;

    let values: Vec<String> = tokio::fs::read_to_string(&path)
        .await?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if values.is_empty() {
        return Err(RawsendError::PlaceholderEmpty {
            name: name.to_string(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn placeholder_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("name.txt"), "alice\nbob\n\ncharlie").unwrap();
        std::fs::write(dir.path().join("id"), "101\r\n102\r\n").unwrap();
        std::fs::write(dir.path().join("blank.txt"), "\n  \n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_resolver_sequential() {
        let dir = placeholder_dir();
        let resolver = PlaceholderResolver::new(dir.path(), PlaceholderRotation::Sequential);

        assert_eq!(resolver.replace("Hello {name}").await.unwrap(), "Hello alice");
        assert_eq!(resolver.replace("ID: {id}").await.unwrap(), "ID: 101");

        assert_eq!(resolver.replace("Hello {name}").await.unwrap(), "Hello bob");
        assert_eq!(resolver.replace("ID: {id}").await.unwrap(), "ID: 102");

        assert_eq!(resolver.replace("Hello {name}").await.unwrap(), "Hello charlie");
        assert_eq!(resolver.replace("ID: {id}").await.unwrap(), "ID: 101");

        assert_eq!(resolver.replace("Hello {name}").await.unwrap(), "Hello alice");
    }

    #[tokio::test]
    async fn test_resolver_random() {
        let dir = placeholder_dir();
        let resolver = PlaceholderResolver::new(dir.path(), PlaceholderRotation::Random);
        for _ in 0..20 {
            let res = resolver.replace("Hello {name}").await.unwrap();
            assert!(["Hello alice", "Hello bob", "Hello charlie"].contains(&res.as_str()));
        }
    }

    #[tokio::test]
    async fn test_repeated_token_gets_one_value_per_call() {
        let dir = placeholder_dir();
        let resolver = PlaceholderResolver::new(dir.path(), PlaceholderRotation::Sequential);
        assert_eq!(
            resolver.replace("{id}/{name}/{id}").await.unwrap(),
            "101/alice/101"
        );
        assert_eq!(
            resolver.replace("{id}/{name}/{id}").await.unwrap(),
            "102/bob/102"
        );
    }

    #[tokio::test]
    async fn test_missing_placeholder_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolver =
            PlaceholderResolver::new(dir.path().join("empty"), PlaceholderRotation::Sequential);
        let err = resolver.replace("Values {missing}").await.unwrap_err();
        assert_eq!(err.to_string(), "Placeholder 'missing' not found");
    }

    #[tokio::test]
    async fn test_empty_placeholder_file_fails_only_when_referenced() {
        let dir = placeholder_dir();
        let resolver = PlaceholderResolver::new(dir.path(), PlaceholderRotation::Sequential);
        assert!(resolver.replace("{name}").await.is_ok());
        assert!(matches!(
            resolver.replace("{blank}").await,
            Err(RawsendError::PlaceholderEmpty { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_placeholders_in_text() {
        // Folder does not exist: no file access may happen
        let resolver =
            PlaceholderResolver::new("/nonexistent/placeholders", PlaceholderRotation::Sequential);
        let text = "No variables here, {\"json\": true} and { spaced }";
        assert_eq!(resolver.replace(text).await.unwrap(), text);
    }
}
