use crate::prelude::*;

use serde::Deserialize;
use serde_yaml;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub serial: Serial,
    pub route_b: RouteB,
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_session")]
    pub session: Session,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Serial {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Serial {
    pub port: String,

    #[serde(default = "Config::default_baud")]
    pub baud: u32,
}

impl Serial {
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
} // }}}

// RouteB {{{
/// Route-B credentials issued by the utility. Treated as opaque strings.
#[derive(Clone, Debug, Deserialize)]
pub struct RouteB {
    pub id: String,
    pub password: String,
}

impl RouteB {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn password(&self) -> &str {
        &self.password
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,

    pub device_id: String,
    pub sensor_id: String,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }
} // }}}

// Session {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Session {
    #[serde(default = "Config::default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "Config::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "Config::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Session {
    pub fn command_timeout_secs(&self) -> u64 {
        self.command_timeout_secs
    }

    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self {
            config: Arc::new(Mutex::new(config)),
        })
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn serial(&self) -> Serial {
        self.config.lock().unwrap().serial.clone()
    }

    pub fn route_b(&self) -> RouteB {
        self.config.lock().unwrap().route_b.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.config.lock().unwrap().mqtt.clone()
    }

    pub fn session(&self) -> Session {
        self.config.lock().unwrap().session.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!("Configuration loaded:");
        info!("  Serial port: {} at {} baud", config.serial.port, config.serial.baud);
        // credentials never go to the log, only their length
        info!("  Route-B id: {} chars", config.route_b.id.len());
        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}", config.mqtt.host);
            info!("    Port: {}", config.mqtt.port);
            info!("    Namespace: {}", config.mqtt.namespace);
            info!("    Device id: {}", config.mqtt.device_id);
            info!("    Sensor id: {}", config.mqtt.sensor_id);
        }
        info!("  Session:");
        info!("    Command timeout: {}s", config.session.command_timeout_secs);
        info!("    Connect timeout: {}s", config.session.connect_timeout_secs);
        info!("    Max reconnect attempts: {}", config.session.max_reconnect_attempts);
        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            bail!("serial.port cannot be empty");
        }
        if self.serial.baud == 0 {
            bail!("serial.baud must be nonzero");
        }

        if self.route_b.id.is_empty() {
            bail!("route_b.id cannot be empty");
        }
        if self.route_b.password.is_empty() {
            bail!("route_b.password cannot be empty");
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
            if self.mqtt.device_id.is_empty() {
                bail!("mqtt.device_id cannot be empty");
            }
            if self.mqtt.sensor_id.is_empty() {
                bail!("mqtt.sensor_id cannot be empty");
            }
        }

        if self.session.command_timeout_secs == 0 {
            bail!("session.command_timeout_secs must be nonzero");
        }
        if self.session.connect_timeout_secs == 0 {
            bail!("session.connect_timeout_secs must be nonzero");
        }
        if self.session.max_reconnect_attempts == 0 {
            bail!("session.max_reconnect_attempts must be nonzero");
        }

        Ok(())
    }

    fn default_baud() -> u32 {
        115200
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "routeb".to_string()
    }

    fn default_session() -> Session {
        Session {
            command_timeout_secs: Self::default_command_timeout_secs(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
        }
    }

    fn default_command_timeout_secs() -> u64 {
        10
    }

    fn default_connect_timeout_secs() -> u64 {
        60
    }

    fn default_max_reconnect_attempts() -> u32 {
        10
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
