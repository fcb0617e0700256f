use std::net::IpAddr;

use shmbus_core::protocol::CodecKind;

/// Fixed at accept time; decides the codec and the `SEND` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Local,
    Remote,
}

impl Locality {
    pub fn is_local(self) -> bool {
        self == Locality::Local
    }

    pub fn codec_kind(self) -> CodecKind {
        CodecKind::for_locality(self.is_local())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Locality::Local => "local",
            Locality::Remote => "remote",
        }
    }
}

/// Loopback peers, and peers arriving from the configured host ip, are local.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalityClassifier {
    host_ip: Option<IpAddr>,
}

impl LocalityClassifier {
    pub fn new(host_ip: Option<IpAddr>) -> Self {
        Self { host_ip }
    }

    pub fn classify(&self, peer: IpAddr) -> Locality {
        let peer = peer.to_canonical();
        let is_host = self.host_ip.map(|h| h.to_canonical() == peer).unwrap_or(false);
        if peer.is_loopback() || is_host {
            Locality::Local
        } else {
            Locality::Remote
        }
    }
}
