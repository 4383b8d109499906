//! Generic parameters functions
//!
//! Parameter files are TOML documents stored in the `params` directory of the
//! software root. Every parameter struct provides a default for each of its
//! fields, so a missing file or a missing key is not an error.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot find the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Cannot load the parmeter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the full path to a parameter file.
///
/// Relative paths are relative to the "params" directory of the software
/// root, absolute paths are returned unchanged.
pub fn params_path<P: AsRef<Path>>(param_file_path: P) -> Result<PathBuf, LoadError> {
    if param_file_path.as_ref().is_absolute() {
        return Ok(param_file_path.as_ref().to_path_buf())
    }

    let mut path = crate::host::get_sw_root()
        .map_err(LoadError::SwRootNotFound)?;
    path.push("params");
    path.push(param_file_path);

    Ok(path)
}

/// Load a parameter file, which must exist.
///
/// The file path is relative to the "params" directory
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    load_from_path(&params_path(param_file_path)?)
}

/// Load a parameter file, using the defaults if it does not exist.
///
/// If `persist` is set and the file does not exist the defaults are written
/// to it, so they can be edited for the next run.
pub fn load_or_default<P>(param_file_path: &str, persist: bool) -> Result<P, LoadError>
where
    P: DeserializeOwned + Serialize + Default
{
    load_or_default_from_path(&params_path(param_file_path)?, persist)
}

/// Load parameters from the given path.
pub fn load_from_path<P>(path: &Path) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    // Load the file into a string
    let params_str = fs::read_to_string(path)
        .map_err(LoadError::FileLoadError)?;

    // Parse the string into the parameter struct
    toml::from_str(params_str.as_str())
        .map_err(LoadError::DeserialiseError)
}

/// Load parameters from the given path, using the defaults if it does not
/// exist.
pub fn load_or_default_from_path<P>(path: &Path, persist: bool) -> Result<P, LoadError>
where
    P: DeserializeOwned + Serialize + Default
{
    match load_from_path(path) {
        Ok(p) => Ok(p),
        Err(LoadError::FileLoadError(e)) if e.kind() == ErrorKind::NotFound => {
            info!("No parameter file at {:?}, using defaults", path);

            let params = P::default();

            if persist {
                match save_to_path(path, &params) {
                    Ok(_) => info!("Default parameters written to {:?}", path),
                    Err(e) => warn!("Could not write default parameters to {:?}: {}", path, e)
                }
            }

            Ok(params)
        },
        Err(e) => Err(e)
    }
}

/// Write parameters to the given path, creating the directory if needed.
pub fn save_to_path<P>(path: &Path, params: &P) -> std::io::Result<()>
where
    P: Serialize
{
    let params_str = toml::to_string_pretty(params)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, params_str)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
