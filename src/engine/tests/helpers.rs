use crate::engine::{Engine, EngineConfig};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config rooted in the temp dir with a `{default, m}` namespace set.
pub fn test_config(tmp: &TempDir) -> EngineConfig {
    init_tracing();
    let mut config = EngineConfig::new(tmp.path().join("data"), tmp.path().join("checkpoints"));
    config.namespaces.push("m".to_string());
    config
}

/// An opened and started engine over the temp dir.
pub fn started_engine(tmp: &TempDir) -> Engine {
    let engine = Engine::open(test_config(tmp)).unwrap();
    engine.start(&[]).unwrap();
    engine
}

/// Polls `cond` every 10 ms until it holds or `timeout` elapses.
pub fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
