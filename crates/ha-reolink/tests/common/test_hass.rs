//! Registry + flow manager harness

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use ha_config_entries::{ConfigEntries, ConfigEntry, FlowManager, Storage};
use ha_reolink::{register_flows, DOMAIN};
use tempfile::TempDir;

use super::{MockApiFactory, MockDevice};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("ha_reolink=debug,ha_config_entries=debug")
            .try_init();
    });
}

pub struct TestHass {
    pub flows: FlowManager,
    pub device: Arc<MockDevice>,
    /// Times the Reolink setup handler ran
    pub setups: Arc<AtomicUsize>,
    _config_dir: TempDir,
}

impl TestHass {
    pub fn new() -> Self {
        init_tracing();

        let config_dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(config_dir.path()))));

        let setups = Arc::new(AtomicUsize::new(0));
        let counter = setups.clone();
        entries.register_setup_handler(
            DOMAIN,
            Arc::new(move |_entry: &ConfigEntry| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let factory = MockApiFactory::default();
        let device = factory.device.clone();
        let flows = FlowManager::new(entries);
        register_flows(&flows, Arc::new(factory));

        Self {
            flows,
            device,
            setups,
            _config_dir: config_dir,
        }
    }

    pub fn entries(&self) -> &ConfigEntries {
        self.flows.entries()
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }
}
