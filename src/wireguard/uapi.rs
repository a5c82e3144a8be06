//! Client for the WireGuard cross-platform userspace API
//!
//! Each interface exposes a unix socket named `<interface>.sock`. A `get=1`
//! request returns the device state as `key=value` lines; a `set=1` request
//! applies changes. Both exchanges end with an empty line and report an
//! `errno`.

use std::fmt::Write as FmtWrite;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::wireguard::control::{ControlError, WgControl};
use crate::wireguard::key::Key;
use crate::wireguard::types::{Device, DeviceConfig, Peer};

pub const DEFAULT_SOCKET_DIR: &str = "/var/run/wireguard";

type Result<T> = std::result::Result<T, ControlError>;

pub struct UapiClient {
    socket_dir: PathBuf,
}

impl UapiClient {
    pub fn new<P: Into<PathBuf>>(socket_dir: P) -> UapiClient {
        UapiClient {
            socket_dir: socket_dir.into(),
        }
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", name))
    }

    #[cfg(unix)]
    fn exchange(&self, name: &str, request: &str) -> Result<String> {
        use std::os::unix::net::UnixStream;

        let path = self.socket_path(name);
        let mut stream = UnixStream::connect(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ControlError::NoSuchDevice {
                    name: name.to_string(),
                }
            } else {
                ControlError::Io(e)
            }
        })?;

        stream.write_all(request.as_bytes())?;
        stream.flush()?;

        let mut response = String::new();
        let mut reader = BufReader::new(stream);
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 || line == "\n" {
                break;
            }
            response.push_str(&line);
        }

        Ok(response)
    }

    #[cfg(not(unix))]
    fn exchange(&self, _name: &str, _request: &str) -> Result<String> {
        Err(ControlError::Unsupported)
    }
}

impl Default for UapiClient {
    fn default() -> Self {
        UapiClient::new(DEFAULT_SOCKET_DIR)
    }
}

impl WgControl for UapiClient {
    fn device(&self, name: &str) -> Result<Device> {
        let response = self.exchange(name, "get=1\n\n")?;
        parse_get_response(name, &response)
    }

    fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<()> {
        let request = format_set_request(config);
        log::debug!("Configuring {} with {} peer(s)", name, config.peers.len());

        let response = self.exchange(name, &request)?;
        check_errno(&response)
    }
}

fn split_line(line: &str) -> Result<(&str, &str)> {
    let mut parts = line.splitn(2, '=');
    match (parts.next(), parts.next()) {
        (Some(key), Some(value)) => Ok((key, value)),
        _ => Err(ControlError::Malformed {
            line: line.to_string(),
        }),
    }
}

fn parse_value<T: std::str::FromStr>(line: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| ControlError::Malformed {
        line: line.to_string(),
    })
}

fn check_errno(response: &str) -> Result<()> {
    for line in response.lines() {
        let (key, value) = split_line(line)?;
        if key == "errno" {
            let errno: i32 = parse_value(line, value)?;
            if errno != 0 {
                return Err(ControlError::Errno { errno });
            }
        }
    }

    Ok(())
}

/// Parse the body of a `get=1` response
///
/// Device attributes come first; every `public_key` line opens a new peer
/// and the attributes after it belong to that peer.
pub fn parse_get_response(name: &str, response: &str) -> Result<Device> {
    let mut device = Device {
        name: name.to_string(),
        ..Device::default()
    };
    let mut current: Option<Peer> = None;

    for line in response.lines().filter(|l| !l.is_empty()) {
        let (key, value) = split_line(line)?;

        if key == "public_key" {
            if let Some(peer) = current.take() {
                device.peers.push(peer);
            }
            current = Some(Peer::new(Key::from_hex(value)?));
            continue;
        }

        match (key, current.as_mut()) {
            ("errno", _) => {
                let errno: i32 = parse_value(line, value)?;
                if errno != 0 {
                    return Err(ControlError::Errno { errno });
                }
            }
            ("private_key", None) => {
                let key = Key::from_hex(value)?;
                if !key.is_zero() {
                    device.public_key = Some(key.public_key());
                    device.private_key = Some(key);
                }
            }
            ("listen_port", None) => device.listen_port = parse_value(line, value)?,
            ("fwmark", None) => device.firewall_mark = parse_value(line, value)?,
            ("endpoint", Some(peer)) => peer.endpoint = Some(parse_value(line, value)?),
            ("allowed_ip", Some(peer)) => peer.allowed_ips.push(parse_value(line, value)?),
            _ => {
                // handshake times, counters and keepalives are not tracked
            }
        }
    }

    if let Some(peer) = current.take() {
        device.peers.push(peer);
    }

    Ok(device)
}

/// Render a `set=1` request, terminating blank line included
pub fn format_set_request(config: &DeviceConfig) -> String {
    let mut out = String::from("set=1\n");

    // writing to a String never fails
    if let Some(ref key) = config.private_key {
        let _ = writeln!(out, "private_key={}", key.to_hex());
    }
    if let Some(port) = config.listen_port {
        let _ = writeln!(out, "listen_port={}", port);
    }
    if let Some(mark) = config.firewall_mark {
        let _ = writeln!(out, "fwmark={}", mark);
    }
    if config.replace_peers {
        out.push_str("replace_peers=true\n");
    }

    for peer in &config.peers {
        let _ = writeln!(out, "public_key={}", peer.public_key.to_hex());
        if peer.update_only {
            out.push_str("update_only=true\n");
        }
        if let Some(endpoint) = peer.endpoint {
            let _ = writeln!(out, "endpoint={}", endpoint);
        }
        if peer.replace_allowed_ips {
            out.push_str("replace_allowed_ips=true\n");
        }
        for ip in &peer.allowed_ips {
            let _ = writeln!(out, "allowed_ip={}", ip);
        }
    }

    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireguard::types::PeerConfig;

    const GET_RESPONSE: &str = "private_key=77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a
listen_port=51820
fwmark=0
public_key=de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f
endpoint=[2001:db8::1]:51820
last_handshake_time_sec=0
allowed_ip=10.0.0.2/32
allowed_ip=fd00::2/128
public_key=8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a
allowed_ip=10.0.0.3/32
errno=0
";

    #[test]
    fn test_parse_get_response() {
        let device = parse_get_response("wg0", GET_RESPONSE).unwrap();

        assert_eq!("wg0", device.name);
        assert_eq!(51820, device.listen_port);
        assert_eq!(0, device.firewall_mark);
        assert_eq!(
            "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a",
            device.public_key.unwrap().to_hex()
        );
        assert_eq!(2, device.peers.len());

        let first = &device.peers[0];
        let endpoint: std::net::SocketAddr = "[2001:db8::1]:51820".parse().unwrap();
        assert_eq!(Some(endpoint), first.endpoint);
        assert_eq!(2, first.allowed_ips.len());

        let second = &device.peers[1];
        assert_eq!(None, second.endpoint);
        let allowed: ipnetwork::IpNetwork = "10.0.0.3/32".parse().unwrap();
        assert_eq!(vec![allowed], second.allowed_ips);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_get_response("wg0", "errno=19\n").is_err());
        assert!(parse_get_response("wg0", "listen_port\n").is_err());
        assert!(parse_get_response("wg0", "public_key=zz\n").is_err());
    }

    #[test]
    fn test_format_set_request() {
        let key =
            Key::from_hex("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f")
                .unwrap();
        let mut peer = PeerConfig::new(key);
        peer.endpoint = "192.0.2.1:51820".parse().ok();
        peer.replace_allowed_ips = true;
        peer.allowed_ips = vec!["10.0.0.2/32".parse().unwrap()];

        let config = DeviceConfig {
            firewall_mark: Some(42),
            peers: vec![peer],
            ..DeviceConfig::default()
        };

        assert_eq!(
            "set=1\n\
             fwmark=42\n\
             public_key=de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f\n\
             endpoint=192.0.2.1:51820\n\
             replace_allowed_ips=true\n\
             allowed_ip=10.0.0.2/32\n\
             \n",
            format_set_request(&config)
        );
    }

    #[test]
    fn test_check_errno() {
        assert!(check_errno("errno=0\n").is_ok());
        match check_errno("errno=22\n") {
            Err(ControlError::Errno { errno: 22 }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_socket() {
        let client = UapiClient::new("/nonexistent-wgsd-test");
        match client.device("wg0") {
            Err(ControlError::NoSuchDevice { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
