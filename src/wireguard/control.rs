//! The seam between discovery and the kernel or userspace WireGuard implementation

use derive_more::{Display, Error, From};

use crate::wireguard::types::{Device, DeviceConfig};

#[derive(Debug, Display, From, Error)]
pub enum ControlError {
    Io(std::io::Error),
    Key(crate::wireguard::key::KeyError),
    #[display(fmt = "no such device: {}", name)]
    #[from(ignore)]
    NoSuchDevice {
        name: String,
    },
    #[display(fmt = "malformed control response: {}", line)]
    #[from(ignore)]
    Malformed {
        line: String,
    },
    #[display(fmt = "device returned errno {}", errno)]
    #[from(ignore)]
    Errno {
        errno: i32,
    },
    Unsupported,
}

/// Read and modify WireGuard interfaces
///
/// Implementations must be safe to share between the server's worker threads.
pub trait WgControl: Send + Sync {
    fn device(&self, name: &str) -> Result<Device, ControlError>;

    fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), ControlError>;
}

impl<T: WgControl + ?Sized> WgControl for std::sync::Arc<T> {
    fn device(&self, name: &str) -> Result<Device, ControlError> {
        (**self).device(name)
    }

    fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), ControlError> {
        (**self).configure_device(name, config)
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::Mutex;

    use super::*;

    /// In-memory control surface recording every configuration it receives
    pub struct MockControl {
        pub devices: Mutex<Vec<Device>>,
        pub configured: Mutex<Vec<(String, DeviceConfig)>>,
    }

    impl MockControl {
        pub fn new(devices: Vec<Device>) -> MockControl {
            MockControl {
                devices: Mutex::new(devices),
                configured: Mutex::new(Vec::new()),
            }
        }
    }

    impl WgControl for MockControl {
        fn device(&self, name: &str) -> Result<Device, ControlError> {
            self.devices
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.name == name)
                .cloned()
                .ok_or_else(|| ControlError::NoSuchDevice {
                    name: name.to_string(),
                })
        }

        fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), ControlError> {
            self.configured
                .lock()
                .unwrap()
                .push((name.to_string(), config.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_error_conversions() {
        let err: ControlError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ControlError::Io(_)));

        let err: ControlError = crate::wireguard::key::KeyError::InvalidLength { len: 3 }.into();
        assert!(matches!(err, ControlError::Key(_)));

        let err = ControlError::NoSuchDevice {
            name: "wg0".to_string(),
        };
        assert_eq!("no such device: wg0", err.to_string());
        let err = ControlError::Malformed {
            line: "bogus".to_string(),
        };
        assert_eq!("malformed control response: bogus", err.to_string());
        assert_eq!(
            "device returned errno 2",
            ControlError::Errno { errno: 2 }.to_string()
        );
    }

    #[test]
    fn test_mock_missing_device() {
        let control = MockControl::new(Vec::new());
        match control.device("wg0") {
            Err(ControlError::NoSuchDevice { name }) => assert_eq!("wg0", name),
            other => panic!("unexpected {:?}", other),
        }
    }
}
