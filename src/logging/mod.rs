use std::fs::OpenOptions;
use std::path::Path;

use env_logger::{Builder, Env, Target};

use crate::config;

/// Initializes process logging from the gateway config. With a file sink
/// configured, lines append to `log.path`; without one they go to
/// stderr. A sink that cannot be opened falls back to stderr rather than
/// refusing to start the gateway.
pub fn init(log: Option<&config::Log>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if let Some(log) = log {
        match open_sink(&log.path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!(
                    "failed to open log file {}: {e}; logging to stderr",
                    log.path
                );
            }
        }
    }

    builder.init();
}

fn open_sink(path: &str) -> std::io::Result<std::fs::File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_sink_creates_missing_parent_directories() {
        let dir = std::env::temp_dir().join("mesh-gateway-log-test");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("gateway.log");
        let file = open_sink(path.to_str().unwrap()).unwrap();
        drop(file);
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
