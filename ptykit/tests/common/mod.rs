//! Shared setup for integration tests

use std::time::Duration;

use tempfile::TempDir;

use ptykit::resolver::required_files;
use ptykit::{
    BinaryResolver, ExitStatus, HostInfo, NativeSource, Ptykit, PtykitConfig, Terminal,
    TerminalEvent,
};

/// Upper bound for anything a test waits on
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// A `Ptykit` on the bundled native table, with a placeholder install in a
/// temporary binary root
pub fn bundled() -> (TempDir, Ptykit) {
    let root = tempfile::tempdir().unwrap();
    let mut config = PtykitConfig::default();
    config.bin_dir = Some(root.path().to_path_buf());

    let host = HostInfo::detect().unwrap();
    let dir = BinaryResolver::new(root.path(), config.abi.clone()).directory_for(&host);
    std::fs::create_dir_all(&dir).unwrap();
    for file in required_files(host.platform) {
        std::fs::write(dir.join(file), b"").unwrap();
    }

    let ptykit = Ptykit::with_source(config, NativeSource::Bundled).unwrap();
    (root, ptykit)
}

/// All output until exit
pub async fn collect(term: &mut Terminal) -> (String, ExitStatus) {
    let (output, status) = tokio::time::timeout(TIMEOUT, term.output_until_exit())
        .await
        .expect("terminal did not exit");
    (String::from_utf8_lossy(&output).into_owned(), status)
}

/// Read output until it contains `needle`; returns everything read
pub async fn read_until(term: &mut Terminal, needle: &str) -> String {
    let mut output = Vec::new();
    let result = tokio::time::timeout(TIMEOUT, async {
        while let Some(event) = term.next_event().await {
            match event {
                TerminalEvent::Data(bytes) => {
                    output.extend_from_slice(&bytes);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        return true;
                    }
                }
                TerminalEvent::Exit(_) => return false,
            }
        }
        false
    })
    .await;

    let text = String::from_utf8_lossy(&output).into_owned();
    assert_eq!(result, Ok(true), "never saw {:?}, got {:?}", needle, text);
    text
}
