//! TOML manifest loading with namespace layering.
//!
//! `relay start product.toml dev.toml` reads `product.toml`, then applies
//! `dev.toml` over it: later files replace the keys of earlier ones, and
//! tables present in both are merged key by key.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;
use toml::{Table, Value};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(#[source] toml::de::Error),
}

pub fn load_table(path: &Path) -> Result<Table, ManifestError> {
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `overlay` on top of `base`.
pub fn merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => merge(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// The manifest with every namespace file applied in order.
pub fn load_layers(manifest: &Path, namespaces: &[PathBuf]) -> Result<Table, ManifestError> {
    let mut table = load_table(manifest)?;
    for namespace in namespaces {
        merge(&mut table, load_table(namespace)?);
    }
    Ok(table)
}

/// Load and deserialize the layered manifest.
pub fn load<T: DeserializeOwned>(
    manifest: &Path,
    namespaces: &[PathBuf],
) -> Result<T, ManifestError> {
    Value::Table(load_layers(manifest, namespaces)?)
        .try_into()
        .map_err(ManifestError::Invalid)
}
