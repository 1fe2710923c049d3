//! Mock Reolink device client
//!
//! Every client created by [`MockApiFactory`] shares one [`MockDevice`], so a
//! test can script the next handshake and inspect what the flow did.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ha_reolink::{
    ReolinkApi, ReolinkApiFactory, ReolinkConnectionConfig, ReolinkError, ReolinkResult,
};

pub const TEST_HOST: &str = "192.168.1.50";
pub const TEST_USERNAME: &str = "admin";
pub const TEST_PASSWORD: &str = "password";
pub const TEST_MAC: &str = "AA:BB:CC:DD:EE:FF";
pub const TEST_UNIQUE_ID: &str = "aa:bb:cc:dd:ee:ff";
pub const TEST_NVR_NAME: &str = "test_reolink_name";
pub const TEST_PORT: u16 = 1234;
pub const TEST_USE_HTTPS: bool = true;

/// How the next handshake ends
#[derive(Debug, Clone)]
pub enum Handshake {
    Succeed,
    Fail(ReolinkError),
    Panic(&'static str),
}

/// State shared by all mock clients
pub struct MockDevice {
    pub handshake: Mutex<Handshake>,
    pub user_level: Mutex<String>,
    pub mac_address: Mutex<Option<String>>,
    pub clients_created: AtomicUsize,
    pub logouts: AtomicUsize,
    pub last_config: Mutex<Option<ReolinkConnectionConfig>>,
}

impl MockDevice {
    pub fn set_handshake(&self, handshake: Handshake) {
        *self.handshake.lock().unwrap() = handshake;
    }

    pub fn set_user_level(&self, level: &str) {
        *self.user_level.lock().unwrap() = level.to_string();
    }

    pub fn clients_created(&self) -> usize {
        self.clients_created.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<ReolinkConnectionConfig> {
        self.last_config.lock().unwrap().clone()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            handshake: Mutex::new(Handshake::Succeed),
            user_level: Mutex::new("admin".to_string()),
            mac_address: Mutex::new(Some(TEST_MAC.to_string())),
            clients_created: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            last_config: Mutex::new(None),
        }
    }
}

pub struct MockApi {
    device: Arc<MockDevice>,
    username: String,
    user_level: String,
    mac_address: Option<String>,
}

#[async_trait]
impl ReolinkApi for MockApi {
    async fn get_host_data(&mut self) -> ReolinkResult<()> {
        self.user_level = self.device.user_level.lock().unwrap().clone();
        self.mac_address = self.device.mac_address.lock().unwrap().clone();

        let handshake = self.device.handshake.lock().unwrap().clone();
        match handshake {
            Handshake::Succeed => Ok(()),
            Handshake::Fail(err) => Err(err),
            Handshake::Panic(message) => panic!("{}", message),
        }
    }

    async fn logout(&mut self) -> ReolinkResult<()> {
        self.device.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn user_level(&self) -> &str {
        &self.user_level
    }

    fn is_admin(&self) -> bool {
        self.user_level == "admin"
    }

    fn mac_address(&self) -> Option<&str> {
        self.mac_address.as_deref()
    }

    fn port(&self) -> u16 {
        TEST_PORT
    }

    fn use_https(&self) -> bool {
        TEST_USE_HTTPS
    }

    fn nvr_name(&self) -> &str {
        TEST_NVR_NAME
    }
}

#[derive(Default)]
pub struct MockApiFactory {
    pub device: Arc<MockDevice>,
}

impl ReolinkApiFactory for MockApiFactory {
    fn create(&self, config: &ReolinkConnectionConfig) -> Box<dyn ReolinkApi> {
        self.device.clients_created.fetch_add(1, Ordering::SeqCst);
        *self.device.last_config.lock().unwrap() = Some(config.clone());

        Box::new(MockApi {
            device: self.device.clone(),
            username: config.username.clone(),
            user_level: String::new(),
            mac_address: None,
        })
    }
}
