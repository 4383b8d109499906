//! Host platform (linux for example) utility functions

use std::{env, io, path::PathBuf};

/// Environment variable pointing at the software root, which holds the `params` and `sessions`
/// directories.
pub const SW_ROOT_ENV_VAR: &str = "TELEOP_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the software root directory.
///
/// This is the value of `TELEOP_ROOT` if it is set, otherwise the current working directory.
pub fn get_sw_root() -> io::Result<PathBuf> {
    match env::var_os(SW_ROOT_ENV_VAR) {
        Some(root) if !root.is_empty() => Ok(PathBuf::from(root)),
        _ => env::current_dir(),
    }
}
