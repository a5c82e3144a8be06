//! Client half: walk the DNS-SD namespace and reconcile the local device
//!
//! Targets are handled one at a time. A target that cannot be resolved or
//! applied is logged and skipped, and so is a failed enumeration; only
//! failing to read the local device stops the walk. The cancellation token is checked before every target and
//! raced against every query.

use std::net::{IpAddr, SocketAddr};

use derive_more::{Display, Error, From};
use tokio_util::sync::CancellationToken;

use crate::discovery::encoder::Encoder;
use crate::discovery::names::{
    enumeration_name, fqdn, instance_name, split_instance_name, SERVICE_SUB_PREFIX,
};
use crate::discovery::reconcile::{self, Outcome, PeerIntent};
use crate::discovery::txt::{self, TxtError};
use crate::dns::client::{ClientError, DnsClient};
use crate::dns::protocol::{DnsPacket, DnsRecord, QueryType, ResultCode};
use crate::wireguard::control::{ControlError, WgControl};
use crate::wireguard::key::Key;
use crate::wireguard::types::Device;

/// Why the walk as a whole stopped
#[derive(Debug, Display, From, Error)]
pub enum WalkError {
    Control(ControlError),
    #[display(fmt = "device {} has no private key", device)]
    #[from(ignore)]
    NoLocalKey {
        device: String,
    },
}

/// Why a single target was skipped
#[derive(Debug, Display, From, Error)]
pub enum PeerError {
    Query(ClientError),
    Txt(TxtError),
    Apply(ControlError),
    #[display(fmt = "not a peer name or key: {:?}", target)]
    #[from(ignore)]
    BadTarget {
        target: String,
    },
    #[display(fmt = "lookup answered with {:?}", rescode)]
    #[from(ignore)]
    Rcode {
        #[error(not(source))]
        rescode: ResultCode,
    },
    #[display(fmt = "no SRV records found")]
    NoSrv,
    #[display(fmt = "non-SRV answer in response to SRV query")]
    NotSrv,
    #[display(fmt = "SRV response missing extra records, got {}", count)]
    #[from(ignore)]
    MissingExtra {
        count: usize,
    },
    #[display(fmt = "no A/AAAA extra in SRV response")]
    NoHost,
    #[display(fmt = "no TXT extra in SRV response")]
    NoTxt,
    #[display(fmt = "TXT key {} does not match the queried name", key)]
    #[from(ignore)]
    KeyMismatch {
        #[error(not(source))]
        key: Key,
    },
    Cancelled,
}

type Result<T> = std::result::Result<T, WalkError>;

/// Which names to resolve
#[derive(Clone, Debug, PartialEq)]
pub enum WalkMode {
    /// Every instance listed under the zone's PTR record
    Enumerate,
    /// The given instance names or base64 public keys
    Direct(Vec<String>),
    /// The peers already configured on the device, updated in place
    KnownPeers,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub targets: usize,
    pub applied: usize,
    pub skipped_self: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct Walker<C, W> {
    client: C,
    control: W,
    device: String,
    zone: String,
    encoder: Encoder,
}

impl<C: DnsClient, W: WgControl> Walker<C, W> {
    pub fn new(client: C, control: W, device: &str, zone: &str) -> Walker<C, W> {
        Walker {
            client,
            control,
            device: device.to_string(),
            zone: fqdn(zone),
            encoder: Encoder::default(),
        }
    }

    pub fn with_encoder(mut self, encoder: Encoder) -> Walker<C, W> {
        self.encoder = encoder;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn query(
        &self,
        name: &str,
        qtype: QueryType,
        cancel: &CancellationToken,
    ) -> std::result::Result<DnsPacket, PeerError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(PeerError::Cancelled),
            res = self.client.send_query(name, qtype) => Ok(res?),
        }
    }

    /// List instance names through the zone's PTR record
    ///
    /// A zone without peers answers NXDOMAIN, which is an empty list.
    async fn enumerate(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<String>, PeerError> {
        let packet = self.query(name, QueryType::Ptr, cancel).await?;

        match packet.header.rescode {
            ResultCode::NOERROR => {}
            ResultCode::NXDOMAIN => return Ok(Vec::new()),
            rescode => return Err(PeerError::Rcode { rescode }),
        }

        let targets = packet
            .answers
            .into_iter()
            .filter_map(|rec| match rec {
                DnsRecord::Ptr { host, .. } => Some(fqdn(&host)),
                _ => None,
            })
            .collect();

        Ok(targets)
    }

    /// Expand a `--peer` style value into an instance name
    fn direct_target(&self, value: &str) -> std::result::Result<String, PeerError> {
        if value.to_ascii_lowercase().contains(SERVICE_SUB_PREFIX) {
            return Ok(fqdn(value));
        }

        match Key::from_base64(value) {
            Ok(key) => Ok(instance_name(&self.encoder.encode(&key), &self.zone)),
            Err(_) => Err(PeerError::BadTarget {
                target: value.to_string(),
            }),
        }
    }

    /// Look one instance up and turn the answer into an intent
    pub async fn resolve_peer(
        &self,
        target: &str,
        local_key: &Key,
        update_only: bool,
        cancel: &CancellationToken,
    ) -> std::result::Result<PeerIntent, PeerError> {
        let packet = self.query(target, QueryType::Srv, cancel).await?;

        if packet.header.rescode != ResultCode::NOERROR {
            return Err(PeerError::Rcode {
                rescode: packet.header.rescode,
            });
        }

        let port = match packet.answers.first() {
            None => return Err(PeerError::NoSrv),
            Some(DnsRecord::Srv { port, .. }) => *port,
            Some(_) => return Err(PeerError::NotSrv),
        };

        let extras: Vec<&DnsRecord> = packet
            .resources
            .iter()
            .filter(|rec| !matches!(rec, DnsRecord::Opt { .. }))
            .collect();
        if extras.len() < 2 {
            return Err(PeerError::MissingExtra {
                count: extras.len(),
            });
        }

        let ip = extras
            .iter()
            .find_map(|rec| match rec {
                DnsRecord::A { addr, .. } => Some(IpAddr::V4(*addr)),
                DnsRecord::Aaaa { addr, .. } => Some(IpAddr::V6(*addr)),
                _ => None,
            })
            .ok_or(PeerError::NoHost)?;

        let strings = extras
            .iter()
            .find_map(|rec| match rec {
                DnsRecord::Txt { data, .. } => Some(data),
                _ => None,
            })
            .ok_or(PeerError::NoTxt)?;
        let meta = txt::parse(strings)?;

        if let Some((label, _)) = split_instance_name(target) {
            if let Some(named) = self.encoder.decode(label) {
                if named != meta.public_key {
                    return Err(PeerError::KeyMismatch {
                        key: meta.public_key,
                    });
                }
            }
        }

        Ok(PeerIntent {
            public_key: meta.public_key,
            endpoint: SocketAddr::new(ip, port),
            allowed_ips: meta.allowed_ips,
            is_self: &meta.public_key == local_key,
            update_only,
        })
    }

    async fn reconcile_target(
        &self,
        device: &Device,
        target: &str,
        local_key: &Key,
        update_only: bool,
        cancel: &CancellationToken,
    ) -> std::result::Result<Outcome, PeerError> {
        let intent = self
            .resolve_peer(target, local_key, update_only, cancel)
            .await?;
        Ok(reconcile::apply(&self.control, device, &intent)?)
    }

    /// Resolve every target of `mode` and apply what comes back
    pub async fn run(&self, mode: &WalkMode, cancel: &CancellationToken) -> Result<WalkSummary> {
        let device = self.control.device(&self.device)?;
        let local_key = device.public_key.ok_or_else(|| WalkError::NoLocalKey {
            device: self.device.clone(),
        })?;

        let mut summary = WalkSummary::default();

        // each target is tagged with what it was derived from, for logging
        let targets: Vec<(String, std::result::Result<String, PeerError>)> = match mode {
            WalkMode::Enumerate => {
                let name = enumeration_name(&self.zone);
                match self.enumerate(&name, cancel).await {
                    Ok(names) => names.into_iter().map(|n| (n.clone(), Ok(n))).collect(),
                    Err(PeerError::Cancelled) => {
                        summary.cancelled = true;
                        return Ok(summary);
                    }
                    Err(e) => {
                        log::warn!("[{}] {}", name, e);
                        summary.failed += 1;
                        return Ok(summary);
                    }
                }
            }
            WalkMode::Direct(values) => values
                .iter()
                .map(|v| (v.clone(), self.direct_target(v)))
                .collect(),
            WalkMode::KnownPeers => device
                .peers
                .iter()
                .map(|peer| {
                    let name = instance_name(&self.encoder.encode(&peer.public_key), &self.zone);
                    (name.clone(), Ok(name))
                })
                .collect(),
        };
        let update_only = *mode == WalkMode::KnownPeers;

        summary.targets = targets.len();
        if targets.is_empty() {
            log::info!("no peers found");
        }

        for (name, target) in targets {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let result = match target {
                Ok(target) => {
                    self.reconcile_target(&device, &target, &local_key, update_only, cancel)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(Outcome::Applied) => summary.applied += 1,
                Ok(Outcome::SkippedSelf) => summary.skipped_self += 1,
                Err(PeerError::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    log::warn!("[{}] {}", name, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
