use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use netgauge_summary_model::ToolFamily;

use crate::types::NetGaugeResult;

/// Environment variable to override the path to the NLMT binary.
pub const NG_NLMT_PATH_ENV: &str = "NG_NLMT_PATH";
/// Environment variable to override the path to the iPerf binary.
pub const NG_IPERF_PATH_ENV: &str = "NG_IPERF_PATH";

/// The name the binary is looked up by in the user's `PATH`.
pub fn default_binary_name(family: ToolFamily) -> &'static str {
    match family {
        ToolFamily::Nlmt => "nlmt",
        ToolFamily::Iperf => "iperf3",
    }
}

pub fn path_env_var(family: ToolFamily) -> &'static str {
    match family {
        ToolFamily::Nlmt => NG_NLMT_PATH_ENV,
        ToolFamily::Iperf => NG_IPERF_PATH_ENV,
    }
}

/// Get the path to the binary for a tool family.
///
/// If [`NG_NLMT_PATH_ENV`] or [`NG_IPERF_PATH_ENV`] is set, its value is used as the path.
/// Otherwise the default binary name is looked up in the user's `PATH`.
pub fn tool_path(family: ToolFamily) -> NetGaugeResult<PathBuf> {
    let cwd = env::current_dir().context("Failed to get the current directory")?;
    resolve_tool_path(
        family,
        env::var(path_env_var(family)).ok().as_deref(),
        env::var_os("PATH"),
        &cwd,
    )
}

fn resolve_tool_path(
    family: ToolFamily,
    override_path: Option<&str>,
    search_path: Option<OsString>,
    cwd: &Path,
) -> NetGaugeResult<PathBuf> {
    let env_var = path_env_var(family);
    let name = default_binary_name(family);

    match override_path {
        Some("") => {
            bail!("'{env_var}' set to empty string");
        }
        Some(path) if path != name => {
            let path = PathBuf::from(path);
            if !path.exists() {
                bail!(
                    "Path to {name} binary overridden with '{env_var}={}' but that path doesn't exist",
                    path.display()
                );
            }
            Ok(path)
        }
        _ => {
            log::debug!("'{env_var}' is not a path so looking for '{name}' in the user's 'PATH'");
            which::which_in(name, search_path, cwd).with_context(|| {
                format!("'{name}' binary not found in PATH. Please install it or set '{env_var}' to the correct path.")
            })
        }
    }
}
