//! ptykit-console-list: list the processes attached to a console
//!
//! Usage: `ptykit-console-list <pid>`. Writes one framed
//! `ConsoleListResponse` to stdout. Logs go to stderr only.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};

use ptykit::resolver::native_library_file;
use ptykit::{BinaryResolver, ConfigLoader, HostInfo, NativeCapability, NativeLoad, NativeSource};
use ptykit_protocol::{encode_frame, ConsoleListRequest, ConsoleListResponse};
use ptykit_utils::paths::BIN_DIR_ENV;
use ptykit_utils::{bin_root_of, debug_build_dir, init_logging_with_config, LogConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Process whose console is listed
    target_pid: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging_with_config(LogConfig::helper()).context("Failed to initialize logging")?;

    let request = ConsoleListRequest::from_args([&args.target_pid])?;
    let native = load_native()?;
    let response = list_console(&native, request.target_pid)?;

    let frame = encode_frame(&response).context("Failed to encode response")?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&frame).context("Failed to write response")?;
    stdout.flush()?;
    Ok(())
}

/// Prebuilt extension first, then a local debug build
///
/// When both fail the fallback's error is logged and the prebuilt
/// extension's error is returned.
fn load_native() -> Result<NativeCapability> {
    let host = HostInfo::detect().context("Unsupported platform")?;

    let primary = load_prebuilt(&host);
    let primary_err = match primary {
        Ok(native) => return Ok(native),
        Err(e) => e,
    };
    debug!(error = %primary_err, "Prebuilt native extension unavailable, trying debug build");

    let fallback = debug_build_dir().join(native_library_file(host.platform));
    match NativeCapability::load(&fallback) {
        Ok(native) => Ok(native),
        Err(reason) => {
            error!(path = %fallback.display(), %reason, "Debug native extension unavailable");
            Err(primary_err)
        }
    }
}

fn load_prebuilt(host: &HostInfo) -> Result<NativeCapability> {
    let config = ConfigLoader::load()?;
    let resolver = BinaryResolver::new(bin_root(config.bin_dir), config.abi);
    let descriptor = resolver.resolve(host)?;
    Ok(NativeLoad::from_descriptor(NativeSource::Prebuilt, &descriptor).into_result()?)
}

/// Root holding the per-target binary directories
///
/// The helper ships inside `<root>/<target>/`, so without an explicit
/// setting the root is the parent of its own directory.
fn bin_root(configured: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = configured {
        return dir;
    }
    if std::env::var_os(BIN_DIR_ENV).is_some() {
        return ptykit_utils::bin_root();
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(bin_root_of))
        .unwrap_or_else(ptykit_utils::bin_root)
}

#[cfg(windows)]
fn list_console(native: &NativeCapability, target_pid: u32) -> Result<ConsoleListResponse> {
    use ptykit_protocol::ProcessRecord;

    let pids = match native.console_process_list(target_pid) {
        Ok(pids) => pids,
        Err(e) => {
            return Ok(ConsoleListResponse::Failed {
                target_pid,
                reason: e.to_string(),
            })
        }
    };

    let processes = pids
        .into_iter()
        .map(|pid| {
            // Processes may exit while being listed
            let image_name = native.process_image_name(pid).unwrap_or_default();
            ProcessRecord::new(pid, image_name)
        })
        .collect();

    Ok(ConsoleListResponse::Processes {
        target_pid,
        processes,
    })
}

#[cfg(not(windows))]
fn list_console(_native: &NativeCapability, target_pid: u32) -> Result<ConsoleListResponse> {
    anyhow::bail!(
        "cannot list the console of {}: console process lists exist only on Windows",
        target_pid
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_pid() {
        let args = Args::try_parse_from(["ptykit-console-list", "1234"]).unwrap();
        let request = ConsoleListRequest::from_args([&args.target_pid]).unwrap();
        assert_eq!(request.target_pid, 1234);
    }

    #[test]
    fn test_args_require_pid() {
        assert!(Args::try_parse_from(["ptykit-console-list"]).is_err());
        assert!(Args::try_parse_from(["ptykit-console-list", "1", "2"]).is_err());
    }

    #[test]
    fn test_configured_bin_root_wins() {
        let dir = PathBuf::from("/opt/ptykit/bin");
        assert_eq!(bin_root(Some(dir.clone())), dir);
    }
}
