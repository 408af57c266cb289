use std::{
    convert::TryFrom,
    fs::{read_dir, read_to_string},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

#[cfg(feature = "yaml")]
use serde_yaml::{Deserializer, Value as YamlValue};

use crate::server::{
    persistence::Error::{DeserializationError, FileReadError},
    state,
    state::StateManager,
    stub::{StubMapping, StubMappingDefinition},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read from stub file: {0}")]
    FileReadError(String),
    #[error("cannot modify state: {0}")]
    StateError(#[from] state::Error),
    #[error("cannot deserialize stub file {0}: {1}")]
    DeserializationError(String, String),
}

/// A stub file holds a single definition, a list of definitions, or a `{"mappings": [...]}`
/// document.
#[derive(Deserialize)]
#[serde(untagged)]
enum StubFile {
    Mappings { mappings: Vec<StubMappingDefinition> },
    Many(Vec<StubMappingDefinition>),
    Single(Box<StubMappingDefinition>),
}

impl StubFile {
    fn into_definitions(self) -> Vec<StubMappingDefinition> {
        match self {
            StubFile::Mappings { mappings } => mappings,
            StubFile::Many(definitions) => definitions,
            StubFile::Single(definition) => vec![*definition],
        }
    }
}

/// Loads every stub file in `dir` and registers its stubs as default stubs.
pub fn load_default_stubs<S>(dir: PathBuf, state: &S) -> Result<Vec<uuid::Uuid>, Error>
where
    S: StateManager + Send + Sync + 'static,
{
    let mut ids = Vec::new();

    for definition in read_stub_definitions(&dir)? {
        let stub = StubMapping::try_from(definition)?;
        ids.push(state.add_default_stub(stub)?.id);
    }

    tracing::info!("Loaded {} default stub(s) from '{}'", ids.len(), dir.display());
    Ok(ids)
}

/// Reads all definitions from a directory, in file name order. Files with unknown extensions
/// are skipped.
pub fn read_stub_definitions(dir: &Path) -> Result<Vec<StubMappingDefinition>, Error> {
    let entries = read_dir(dir).map_err(|err| FileReadError(err.to_string()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| FileReadError(err.to_string()))?;
        if entry.path().is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut definitions = Vec::new();
    for path in paths {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let parsed = match ext.as_str() {
            "json" => {
                tracing::debug!("Loading stub file '{}'", path.display());
                deserialize_stub_defs_from_json(&read_file(&path)?, &path)?
            }
            #[cfg(feature = "yaml")]
            "yaml" | "yml" => {
                tracing::debug!("Loading stub file '{}'", path.display());
                deserialize_stub_defs_from_yaml(&read_file(&path)?, &path)?
            }
            _ => {
                tracing::warn!("Skipping file with unsupported extension '{}'", path.display());
                continue;
            }
        };

        definitions.extend(parsed);
    }

    Ok(definitions)
}

fn read_file(path: &Path) -> Result<String, Error> {
    read_to_string(path).map_err(|err| FileReadError(format!("{}: {}", path.display(), err)))
}

pub fn deserialize_stub_defs_from_json(
    content: &str,
    origin: &Path,
) -> Result<Vec<StubMappingDefinition>, Error> {
    let file: StubFile = serde_json::from_str(content)
        .map_err(|err| DeserializationError(origin.display().to_string(), err.to_string()))?;
    Ok(file.into_definitions())
}

/// YAML files may hold several documents, each one a stub file on its own.
#[cfg(feature = "yaml")]
pub fn deserialize_stub_defs_from_yaml(
    content: &str,
    origin: &Path,
) -> Result<Vec<StubMappingDefinition>, Error> {
    let mut definitions = Vec::new();

    for document in Deserializer::from_str(content) {
        let value = YamlValue::deserialize(document)
            .map_err(|err| DeserializationError(origin.display().to_string(), err.to_string()))?;

        if value.is_null() {
            continue;
        }

        let file: StubFile = serde_yaml::from_value(value)
            .map_err(|err| DeserializationError(origin.display().to_string(), err.to_string()))?;
        definitions.extend(file.into_definitions());
    }

    Ok(definitions)
}
