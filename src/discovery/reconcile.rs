//! Turns a discovered peer into a device update

use std::net::SocketAddr;

use ipnetwork::IpNetwork;

use crate::wireguard::control::{ControlError, WgControl};
use crate::wireguard::key::Key;
use crate::wireguard::types::{Device, DeviceConfig, PeerConfig};

/// What DNS says one peer should look like
#[derive(Clone, Debug, PartialEq)]
pub struct PeerIntent {
    pub public_key: Key,
    pub endpoint: SocketAddr,
    pub allowed_ips: Vec<IpNetwork>,
    /// The peer is the local device itself
    pub is_self: bool,
    /// Leave the device alone unless it already has this peer
    pub update_only: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    SkippedSelf,
}

/// The single-peer update for `intent`
///
/// Other peers are left in place. The peer's allowed IPs are replaced
/// wholesale. The private key is resent as is, and the firewall mark only
/// when one is set, so the device keeps both.
pub fn device_config(device: &Device, intent: &PeerIntent) -> DeviceConfig {
    let mut peer = PeerConfig::new(intent.public_key);
    peer.update_only = intent.update_only;
    peer.endpoint = Some(intent.endpoint);
    peer.replace_allowed_ips = true;
    peer.allowed_ips = intent.allowed_ips.clone();

    DeviceConfig {
        private_key: device.private_key,
        listen_port: None,
        firewall_mark: if device.firewall_mark > 0 {
            Some(device.firewall_mark)
        } else {
            None
        },
        replace_peers: false,
        peers: vec![peer],
    }
}

/// Apply one intent; an intent naming the local device is never applied
pub fn apply(
    control: &dyn WgControl,
    device: &Device,
    intent: &PeerIntent,
) -> Result<Outcome, ControlError> {
    if intent.is_self {
        log::info!(
            "[{}] is the local device {}, skipping",
            intent.public_key,
            device.name
        );
        return Ok(Outcome::SkippedSelf);
    }

    control.configure_device(&device.name, &device_config(device, intent))?;

    log::info!(
        "[{}] configured endpoint {} on {}",
        intent.public_key,
        intent.endpoint,
        device.name
    );

    Ok(Outcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireguard::control::tests::MockControl;

    fn device(firewall_mark: u32) -> Device {
        let private = Key::new([1; 32]);
        Device {
            name: "wg0".to_string(),
            public_key: Some(private.public_key()),
            private_key: Some(private),
            listen_port: 51820,
            firewall_mark,
            peers: Vec::new(),
        }
    }

    fn intent(is_self: bool) -> PeerIntent {
        PeerIntent {
            public_key: Key::new([2; 32]),
            endpoint: "1.1.1.1:2".parse().unwrap(),
            allowed_ips: vec!["10.0.0.2/32".parse().unwrap()],
            is_self,
            update_only: false,
        }
    }

    #[test]
    fn test_device_config() {
        let wg = device(0);
        let config = device_config(&wg, &intent(false));

        assert_eq!(wg.private_key, config.private_key);
        assert_eq!(None, config.firewall_mark);
        assert!(!config.replace_peers);
        assert_eq!(1, config.peers.len());

        let peer = &config.peers[0];
        assert_eq!(Key::new([2; 32]), peer.public_key);
        assert!(peer.replace_allowed_ips);
        assert!(!peer.update_only);
        assert_eq!(intent(false).allowed_ips, peer.allowed_ips);

        let config = device_config(&device(7), &intent(false));
        assert_eq!(Some(7), config.firewall_mark);
    }

    #[test]
    fn test_apply() {
        let control = MockControl::new(Vec::new());
        let wg = device(0);

        assert_eq!(Outcome::Applied, apply(&control, &wg, &intent(false)).unwrap());
        assert_eq!(Outcome::SkippedSelf, apply(&control, &wg, &intent(true)).unwrap());

        let configured = control.configured.lock().unwrap();
        assert_eq!(1, configured.len());
        assert_eq!("wg0", configured[0].0);
    }
}
