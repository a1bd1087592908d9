use std::convert::{TryFrom, TryInto};
use std::net::Ipv4Addr;

pub const RIP_PORT: u16 = 520;
pub const RIP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);
pub const RIP_VERSION: u8 = 2;
pub const RIP_HEADER_LEN: usize = 4;
pub const RIP_ENTRY_LEN: usize = 20;
/// Most entries a single message carries, which is also the size of the route table.
pub const RIP_MAX_ENTRIES: usize = 25;
pub const RIP_METRIC_INFINITY: u32 = 16;
/// Address family identifier for IPv4 routes.
pub const AF_INET: u16 = 2;

/// Hop counts of 16 and above mean "unreachable".
pub fn is_infinite(metric: u32) -> bool {
    metric >= RIP_METRIC_INFINITY
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RipCommand {
    Request = 1,
    Response = 2,
}

impl TryFrom<u8> for RipCommand {
    type Error = &'static str;

    fn try_from(command: u8) -> Result<Self, Self::Error> {
        match command {
            1 => Ok(RipCommand::Request),
            2 => Ok(RipCommand::Response),
            _ => Err("Unknown RIP command"),
        }
    }
}

/// One route entry as it appears in a RIPv2 message (RFC 2453 section 4).
///
/// Fields hold host values; byte order is only dealt with in `write_to` and `try_from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RipEntry {
    pub family: u16,
    pub route_tag: u16,
    pub subnet: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

impl RipEntry {
    pub fn new(subnet: Ipv4Addr, mask: Ipv4Addr, next_hop: Ipv4Addr, metric: u32) -> RipEntry {
        RipEntry {
            family: AF_INET,
            route_tag: 0,
            subnet,
            mask,
            next_hop,
            metric,
        }
    }

    /// The lone entry of a request for the whole table: family 0, metric infinity.
    pub fn request_all() -> RipEntry {
        RipEntry {
            family: 0,
            route_tag: 0,
            subnet: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric: RIP_METRIC_INFINITY,
        }
    }

    pub fn is_request_all(&self) -> bool {
        self.family == 0 && is_infinite(self.metric)
    }

    pub fn is_infinite(&self) -> bool {
        is_infinite(self.metric)
    }

    /// Writes the entry into the first `RIP_ENTRY_LEN` bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.family.to_be_bytes());
        buf[2..4].copy_from_slice(&self.route_tag.to_be_bytes());
        buf[4..8].copy_from_slice(&self.subnet.octets());
        buf[8..12].copy_from_slice(&self.mask.octets());
        buf[12..16].copy_from_slice(&self.next_hop.octets());
        buf[16..20].copy_from_slice(&self.metric.to_be_bytes());
    }
}

impl TryFrom<&[u8]> for RipEntry {
    type Error = &'static str;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < RIP_ENTRY_LEN {
            return Err("Buffer is too short to hold a RIP entry");
        }
        let addr = |start: usize| {
            let octets: [u8; 4] = buf[start..start + 4].try_into().unwrap();
            Ipv4Addr::from(octets)
        };
        Ok(RipEntry {
            family: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            route_tag: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            subnet: addr(4),
            mask: addr(8),
            next_hop: addr(12),
            metric: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
        })
    }
}

/// A decoded RIPv2 message. The routing domain field is unused and always encoded as zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RipMessage {
    pub command: RipCommand,
    pub version: u8,
    pub entries: Vec<RipEntry>,
}

impl RipMessage {
    pub fn request(entries: Vec<RipEntry>) -> RipMessage {
        RipMessage {
            command: RipCommand::Request,
            version: RIP_VERSION,
            entries,
        }
    }

    pub fn request_all() -> RipMessage {
        RipMessage::request(vec![RipEntry::request_all()])
    }

    pub fn response(entries: Vec<RipEntry>) -> RipMessage {
        RipMessage {
            command: RipCommand::Response,
            version: RIP_VERSION,
            entries,
        }
    }

    /// True when this is a request for the sender's whole table.
    pub fn is_request_all(&self) -> bool {
        self.command == RipCommand::Request
            && self.entries.len() == 1
            && self.entries[0].is_request_all()
    }

    /// Length on the wire: the header plus only the entries present.
    pub fn wire_len(&self) -> usize {
        RIP_HEADER_LEN + RIP_ENTRY_LEN * self.entries.len().min(RIP_MAX_ENTRIES)
    }

    /// Encodes the message. Entries past `RIP_MAX_ENTRIES` are not sent.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0; self.wire_len()];
        data[0] = self.command as u8;
        data[1] = self.version;
        for (entry, chunk) in self
            .entries
            .iter()
            .zip(data[RIP_HEADER_LEN..].chunks_exact_mut(RIP_ENTRY_LEN))
        {
            entry.write_to(chunk);
        }
        data
    }
}

impl TryFrom<&[u8]> for RipMessage {
    type Error = &'static str;

    /// Decodes as many whole entries as the buffer holds, up to `RIP_MAX_ENTRIES`.
    /// A trailing partial entry is ignored.
    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < RIP_HEADER_LEN {
            return Err("Buffer is too short to hold a RIP header");
        }
        let command = RipCommand::try_from(buf[0])?;
        let entries = buf[RIP_HEADER_LEN..]
            .chunks_exact(RIP_ENTRY_LEN)
            .take(RIP_MAX_ENTRIES)
            .map(RipEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RipMessage {
            command,
            version: buf[1],
            entries,
        })
    }
}
