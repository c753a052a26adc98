// DNS-SD advertisement of the live listener

use crate::config::Config;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;

pub const SERVICE_TYPE: &str = "_porby._tcp.local.";

/// Owns the mDNS daemon and the registered service record. The record is
/// bound to an already-listening port; restartable alongside the listener.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

/// Instance name advertised on the LAN: explicit config wins, otherwise the
/// device name, blanked when anonymization is on.
pub fn instance_name(config: &Config) -> String {
    if let Some(name) = &config.transport.service_name {
        return name.clone();
    }
    if config.transport.anonymize_device_name {
        return "Porby Device".to_string();
    }
    config.device.name.clone()
}

/// TXT record contents. Pure so tests can pin the exact keys.
pub fn txt_properties(config: &Config, pairing_required: bool) -> HashMap<String, String> {
    let device_name = if config.transport.anonymize_device_name {
        "Porby Device".to_string()
    } else {
        config.device.name.clone()
    };

    let mut props = HashMap::new();
    props.insert("device_name".to_string(), device_name);
    props.insert(
        "sdk_version".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    props.insert("protocol".to_string(), "1".to_string());
    props.insert(
        "pairing_required".to_string(),
        if pairing_required { "true" } else { "false" }.to_string(),
    );
    if config.transport.advertise_app_name {
        props.insert("app_name".to_string(), config.app.name.clone());
        props.insert("app_version".to_string(), config.app.version.clone());
    }
    props
}

impl MdnsAdvertiser {
    pub fn publish(
        config: &Config,
        pairing_required: bool,
        port: u16,
    ) -> Result<Self, String> {
        let daemon = ServiceDaemon::new().map_err(|e| e.to_string())?;

        let instance = instance_name(config);
        let props = txt_properties(config, pairing_required);
        let host = format!("{}.local.", sanitize_host(&instance));

        let info = ServiceInfo::new(SERVICE_TYPE, &instance, &host, "", port, props)
            .map_err(|e| e.to_string())?
            .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        daemon.register(info).map_err(|e| e.to_string())?;
        tracing::info!("Advertising {} on port {}", fullname, port);

        Ok(MdnsAdvertiser { daemon, fullname })
    }

    /// Withdraw the record and stop the daemon.
    pub fn stop(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            tracing::debug!("mDNS unregister failed: {}", e);
        }
        let _ = self.daemon.shutdown();
    }
}

fn sanitize_host(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "porby".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> Config {
        let mut config = Config::default();
        config.device.name = "Ada's iPhone".to_string();
        config.app.name = "Demo".to_string();
        config.app.version = "2.1".to_string();
        config
    }

    #[test]
    fn test_txt_record_keys() {
        let props = txt_properties(&config(), true);
        assert_eq!(props["device_name"], "Ada's iPhone");
        assert_eq!(props["protocol"], "1");
        assert_eq!(props["pairing_required"], "true");
        assert_eq!(props["app_name"], "Demo");
        assert_eq!(props["app_version"], "2.1");
        assert!(props.contains_key("sdk_version"));
    }

    #[test]
    fn test_anonymization_and_advertise_flag() {
        let mut config = config();
        config.transport.anonymize_device_name = true;
        config.transport.advertise_app_name = false;
        let props = txt_properties(&config, false);
        assert_eq!(props["device_name"], "Porby Device");
        assert_eq!(props["pairing_required"], "false");
        assert!(!props.contains_key("app_name"));
        assert!(!props.contains_key("app_version"));
        assert_eq!(instance_name(&config), "Porby Device");

        config.transport.service_name = Some("qa-rig".to_string());
        assert_eq!(instance_name(&config), "qa-rig");
    }

    #[test]
    fn test_sanitize_host() {
        assert_eq!(sanitize_host("Ada's iPhone"), "Ada-s-iPhone");
        assert_eq!(sanitize_host(""), "porby");
    }
}
