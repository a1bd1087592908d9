use crate::arp::ArpResolver;
use crate::config::InterfaceConfig;
use crate::error::{Error, Result};
use crate::link::Link;
use crate::route::{covers, RouteTable};
use crate::timer::time_until;
use netstack_packets::{
    IpProtocol, Ipv4Packet, MacAddr, ETHERNET_MTU, IPV4_ETHER_TYPE, IPV4_HEADER_LEN,
};
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const IPV4_DEFAULT_TTL: u8 = 32;
/// TTL of multicast datagrams, which never leave the local network.
pub const IPV4_MULTICAST_TTL: u8 = 1;
/// Largest payload that fits in one Ethernet frame.
pub const IPV4_MAX_PAYLOAD: usize = ETHERNET_MTU - IPV4_HEADER_LEN;
pub const IPV4_MULTICAST_SUBNET: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 0);
pub const IPV4_MULTICAST_MASK: Ipv4Addr = Ipv4Addr::new(240, 0, 0, 0);

pub fn is_multicast(addr: Ipv4Addr) -> bool {
    covers(IPV4_MULTICAST_SUBNET, IPV4_MULTICAST_MASK, addr)
}

/// What to do with inbound datagrams whose header checksum is wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Accept every datagram without looking at the checksum.
    Ignore,
    /// Drop datagrams whose header does not sum to zero.
    Validate,
}

impl Default for ChecksumPolicy {
    fn default() -> Self {
        ChecksumPolicy::Ignore
    }
}

/// One datagram taken off the link by [`Ipv4Layer::recv_datagram`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    pub src: Ipv4Addr,
    /// Payload length the header claims.
    pub len: usize,
    /// Payload bytes written to the buffer. Never more than actually arrived.
    pub copied: usize,
}

/// An IPv4 endpoint bound to one interface address, routing with a static table.
pub struct Ipv4Layer<L: Link> {
    link: L,
    addr: Ipv4Addr,
    netmask: Ipv4Addr,
    routes: RouteTable,
    arp: ArpResolver,
    checksum_policy: ChecksumPolicy,
}

impl<L: Link> Ipv4Layer<L> {
    pub fn new(link: L, addr: Ipv4Addr, netmask: Ipv4Addr, routes: RouteTable) -> Ipv4Layer<L> {
        Ipv4Layer {
            link,
            addr,
            netmask,
            routes,
            arp: ArpResolver::default(),
            checksum_policy: ChecksumPolicy::default(),
        }
    }

    /// Reads the interface configuration and the route file, then opens the link named by the
    /// configuration with `open_link`.
    pub fn open<F>(
        config_path: impl AsRef<Path>,
        routes_path: impl AsRef<Path>,
        open_link: F,
    ) -> Result<Ipv4Layer<L>>
    where
        F: FnOnce(&str) -> io::Result<L>,
    {
        let config = InterfaceConfig::read(config_path)?;
        let routes = RouteTable::read(routes_path)?;
        let link = open_link(&config.interface).map_err(Error::Link)?;
        debug!(
            interface = %config.interface,
            addr = %config.addr,
            netmask = %config.netmask,
            routes = routes.len(),
            "opened IPv4 layer"
        );
        Ok(Ipv4Layer::new(link, config.addr, config.netmask, routes))
    }

    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    pub fn with_arp_resolver(mut self, arp: ArpResolver) -> Self {
        self.arp = arp;
        self
    }

    pub fn local_addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.netmask
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Works out the hardware address and TTL for a datagram to `dest`.
    fn next_hop(&self, dest: Ipv4Addr) -> Result<(MacAddr, u8)> {
        if is_multicast(dest) {
            return Ok((MacAddr::ipv4_multicast(dest), IPV4_MULTICAST_TTL));
        }
        let route = self.routes.lookup(dest).ok_or(Error::NoRoute(dest))?;
        let next_hop = route.next_hop(dest);
        trace!(%dest, %next_hop, "routing datagram");
        let mac = self.arp.resolve(&self.link, self.addr, next_hop)?;
        Ok((mac, IPV4_DEFAULT_TTL))
    }

    /// Sends `payload` to `dest`. Returns the number of payload bytes transmitted.
    pub fn send(&self, dest: Ipv4Addr, protocol: IpProtocol, payload: &[u8]) -> Result<usize> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if payload.len() > IPV4_MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: IPV4_MAX_PAYLOAD,
            });
        }

        let (mac, ttl) = self.next_hop(dest)?;
        let packet = Ipv4Packet::new(self.addr, dest, protocol, ttl, payload);
        let sent = self
            .link
            .send(mac, IPV4_ETHER_TYPE, &packet.data)
            .map_err(Error::Link)?;
        debug!(%dest, %mac, ?protocol, len = payload.len(), "sent IPv4 datagram");
        Ok(sent.saturating_sub(IPV4_HEADER_LEN))
    }

    /// Waits up to `timeout` (`None` = forever) for a datagram of `protocol` addressed to us or
    /// to a multicast group.
    ///
    /// Copies as much of the payload as fits in `buf` and returns the full payload length with
    /// the sender's address, or `Ok(None)` on timeout.
    pub fn recv(
        &self,
        protocol: IpProtocol,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, Ipv4Addr)>> {
        Ok(self
            .recv_datagram(protocol, buf, timeout)?
            .map(|received| (received.len, received.src)))
    }

    /// Like `recv`, but also says how many bytes of `buf` hold payload from this datagram.
    pub fn recv_datagram(
        &self,
        protocol: IpProtocol,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<Received>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut frame = vec![0u8; ETHERNET_MTU];
        loop {
            let len = match self
                .link
                .recv(IPV4_ETHER_TYPE, &mut frame, time_until(deadline))
                .map_err(Error::Link)?
            {
                Some((len, _)) => len,
                None => return Ok(None),
            };

            let packet = match Ipv4Packet::from_buffer(frame[..len].to_vec()) {
                Ok(packet) => packet,
                Err(reason) => {
                    trace!(len, reason, "dropping IPv4 frame");
                    continue;
                }
            };
            if self.checksum_policy == ChecksumPolicy::Validate && !packet.validate_checksum() {
                trace!(src = %packet.src_addr(), "dropping datagram with bad checksum");
                continue;
            }
            let dest = packet.dest_addr();
            if packet.protocol() != protocol || (dest != self.addr && !is_multicast(dest)) {
                trace!(%dest, protocol = ?packet.protocol(), "datagram not for us");
                continue;
            }

            let payload = packet.payload();
            let copied = buf.len().min(payload.len());
            buf[..copied].copy_from_slice(&payload[..copied]);
            let received = Received {
                src: packet.src_addr(),
                len: packet.declared_payload_len(),
                copied,
            };
            trace!(src = %received.src, len = received.len, copied, "received IPv4 datagram");
            return Ok(Some(received));
        }
    }

    /// Shuts the layer down, releasing the link.
    pub fn close(self) {
        debug!(addr = %self.addr, "closed IPv4 layer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Route;
    use crate::utils::test::{ChannelLink, Frame};
    use netstack_packets::ARP_ETHER_TYPE;

    const OURS: MacAddr = MacAddr {
        bytes: [2, 0, 0, 0, 0, 1],
    };
    const NEIGHBOUR: MacAddr = MacAddr {
        bytes: [2, 0, 0, 0, 0, 2],
    };
    const GATEWAY: MacAddr = MacAddr {
        bytes: [2, 0, 0, 0, 0, 0xfe],
    };
    const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const NEIGHBOUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);

    fn routes() -> RouteTable {
        let mut routes = RouteTable::new();
        routes
            .add(Route::new(
                Ipv4Addr::new(10, 0, 0, 0),
                Ipv4Addr::new(255, 255, 255, 0),
                Ipv4Addr::UNSPECIFIED,
            ))
            .unwrap();
        routes
            .add(Route::new(
                Ipv4Addr::new(172, 16, 0, 0),
                Ipv4Addr::new(255, 255, 0, 0),
                GATEWAY_IP,
            ))
            .unwrap();
        routes
    }

    fn layer() -> Ipv4Layer<ChannelLink> {
        let link = ChannelLink::new(OURS);
        link.answer_arp(vec![(NEIGHBOUR_IP, NEIGHBOUR), (GATEWAY_IP, GATEWAY)]);
        Ipv4Layer::new(link, LOCAL, Ipv4Addr::new(255, 255, 255, 0), routes()).with_arp_resolver(
            ArpResolver::with_timeouts(Duration::from_millis(20), Duration::from_millis(20)),
        )
    }

    fn datagram(src: Ipv4Addr, dest: Ipv4Addr, protocol: IpProtocol, payload: &[u8]) -> Frame {
        Frame {
            src: NEIGHBOUR,
            dest: OURS,
            ether_type: IPV4_ETHER_TYPE,
            payload: Ipv4Packet::new(src, dest, protocol, 64, payload).data,
        }
    }

    fn sent_datagrams(link: &ChannelLink) -> Vec<(MacAddr, Ipv4Packet)> {
        link.sent()
            .into_iter()
            .filter(|frame| frame.ether_type == IPV4_ETHER_TYPE)
            .map(|frame| (frame.dest, Ipv4Packet::from_buffer(frame.payload).unwrap()))
            .collect()
    }

    #[test]
    fn send_to_directly_attached_host() {
        let layer = layer();
        assert_eq!(
            layer.send(NEIGHBOUR_IP, IpProtocol::UDP, &[1, 2, 3, 4]).unwrap(),
            4
        );

        let sent = sent_datagrams(layer.link());
        assert_eq!(sent.len(), 1);
        let (mac, packet) = &sent[0];
        assert_eq!(*mac, NEIGHBOUR);
        assert_eq!(packet.src_addr(), LOCAL);
        assert_eq!(packet.dest_addr(), NEIGHBOUR_IP);
        assert_eq!(packet.ttl(), IPV4_DEFAULT_TTL);
        assert_eq!(packet.identification(), 1);
        assert_eq!(packet.total_len(), 24);
        assert_eq!(packet.protocol(), IpProtocol::UDP);
        assert!(packet.validate_checksum());
        assert_eq!(&packet.payload()[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn send_through_gateway_resolves_gateway() {
        let layer = layer();
        layer
            .send(Ipv4Addr::new(172, 16, 4, 4), IpProtocol::Other(200), &[7; 10])
            .unwrap();

        let arp = layer
            .link()
            .sent()
            .into_iter()
            .find(|frame| frame.ether_type == ARP_ETHER_TYPE)
            .unwrap();
        assert_eq!(&arp.payload[24..28], &GATEWAY_IP.octets());

        let sent = sent_datagrams(layer.link());
        assert_eq!(sent[0].0, GATEWAY);
        assert_eq!(sent[0].1.dest_addr(), Ipv4Addr::new(172, 16, 4, 4));
    }

    #[test]
    fn multicast_skips_routing_and_arp() {
        let link = ChannelLink::new(OURS);
        let layer = Ipv4Layer::new(link, LOCAL, Ipv4Addr::new(255, 255, 255, 0), RouteTable::new());
        layer
            .send(Ipv4Addr::new(224, 0, 0, 9), IpProtocol::UDP, &[1])
            .unwrap();

        let sent = layer.link().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, MacAddr::new([0x01, 0x00, 0x5e, 0x00, 0x00, 0x09]));
        let packet = Ipv4Packet::from_buffer(sent[0].payload.clone()).unwrap();
        assert_eq!(packet.ttl(), IPV4_MULTICAST_TTL);
        assert!(packet.validate_checksum());
    }

    #[test]
    fn send_failures() {
        let layer = layer();
        match layer.send(Ipv4Addr::new(8, 8, 8, 8), IpProtocol::UDP, &[1]) {
            Err(Error::NoRoute(addr)) => assert_eq!(addr, Ipv4Addr::new(8, 8, 8, 8)),
            other => panic!("unexpected result {:?}", other),
        }
        match layer.send(NEIGHBOUR_IP, IpProtocol::UDP, &[]) {
            Err(Error::EmptyPayload) => {}
            other => panic!("unexpected result {:?}", other),
        }
        match layer.send(NEIGHBOUR_IP, IpProtocol::UDP, &[0; IPV4_MAX_PAYLOAD + 1]) {
            Err(Error::PayloadTooLarge { len, max }) => {
                assert_eq!(len, 1481);
                assert_eq!(max, 1480);
            }
            other => panic!("unexpected result {:?}", other),
        }
        match layer.send(Ipv4Addr::new(10, 0, 0, 77), IpProtocol::UDP, &[1]) {
            Err(Error::ArpTimeout(addr)) => assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 77)),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(sent_datagrams(layer.link()).is_empty());
    }

    #[test]
    fn recv_filters_protocol_and_destination() {
        let layer = layer();
        let link = layer.link();
        link.inject(Frame {
            src: NEIGHBOUR,
            dest: OURS,
            ether_type: IPV4_ETHER_TYPE,
            payload: vec![0x45; 12],
        });
        link.inject(datagram(NEIGHBOUR_IP, LOCAL, IpProtocol::TCP, &[1]));
        link.inject(datagram(NEIGHBOUR_IP, Ipv4Addr::new(10, 0, 0, 3), IpProtocol::UDP, &[2]));
        link.inject(datagram(NEIGHBOUR_IP, LOCAL, IpProtocol::UDP, &[3, 3]));
        link.inject(datagram(GATEWAY_IP, Ipv4Addr::new(224, 0, 0, 9), IpProtocol::UDP, &[4]));

        let mut buf = [0u8; 16];
        let timeout = Some(Duration::from_millis(50));
        assert_eq!(
            layer.recv(IpProtocol::UDP, &mut buf, timeout).unwrap(),
            Some((2, NEIGHBOUR_IP))
        );
        assert_eq!(&buf[..2], &[3, 3]);
        assert_eq!(
            layer.recv(IpProtocol::UDP, &mut buf, timeout).unwrap(),
            Some((1, GATEWAY_IP))
        );
        assert_eq!(buf[0], 4);
        assert_eq!(layer.recv(IpProtocol::UDP, &mut buf, timeout).unwrap(), None);
    }

    #[test]
    fn recv_truncates_into_small_buffer() {
        let layer = layer();
        let payload: Vec<u8> = (0..100).collect();
        layer
            .link()
            .inject(datagram(NEIGHBOUR_IP, LOCAL, IpProtocol::UDP, &payload));

        let mut buf = [0xffu8; 10];
        assert_eq!(
            layer.recv(IpProtocol::UDP, &mut buf, None).unwrap(),
            Some((100, NEIGHBOUR_IP))
        );
        assert_eq!(&buf[..], &payload[..10]);
    }

    #[test]
    fn copied_length_stops_at_received_bytes() {
        let layer = layer();
        let mut inflated = datagram(NEIGHBOUR_IP, LOCAL, IpProtocol::UDP, &[1, 2, 3, 4]);
        inflated.payload[2..4].copy_from_slice(&92u16.to_be_bytes());
        layer.link().inject(inflated);

        let mut buf = [0xaau8; 100];
        let received = layer
            .recv_datagram(IpProtocol::UDP, &mut buf, Some(Duration::from_millis(20)))
            .unwrap()
            .unwrap();
        assert_eq!(
            received,
            Received {
                src: NEIGHBOUR_IP,
                len: 72,
                copied: 4,
            }
        );
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 0xaa]);
    }

    #[test]
    fn link_failure_ends_recv() {
        let layer = layer();
        layer.link().close();
        let mut buf = [0u8; 4];
        match layer.recv(IpProtocol::UDP, &mut buf, None) {
            Err(Error::Link(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn checksum_policy() {
        let mut corrupt = datagram(NEIGHBOUR_IP, LOCAL, IpProtocol::UDP, &[5]);
        corrupt.payload[10] ^= 0xff;
        let timeout = Some(Duration::from_millis(20));
        let mut buf = [0u8; 4];

        let lenient = layer();
        lenient.link().inject(corrupt.clone());
        assert!(lenient.recv(IpProtocol::UDP, &mut buf, timeout).unwrap().is_some());

        let strict = layer().with_checksum_policy(ChecksumPolicy::Validate);
        strict.link().inject(corrupt);
        strict
            .link()
            .inject(datagram(NEIGHBOUR_IP, LOCAL, IpProtocol::UDP, &[6]));
        assert_eq!(
            strict.recv(IpProtocol::UDP, &mut buf, timeout).unwrap(),
            Some((1, NEIGHBOUR_IP))
        );
        assert_eq!(buf[0], 6);
    }

    #[test]
    fn opens_from_config_files() {
        use std::io::Write;

        let mut config = tempfile::NamedTempFile::new().unwrap();
        writeln!(config, "Interface test0").unwrap();
        writeln!(config, "IPv4Address 10.0.0.1").unwrap();
        writeln!(config, "SubnetMask 255.255.255.0").unwrap();
        let mut routes = tempfile::NamedTempFile::new().unwrap();
        writeln!(routes, "10.0.0.0 255.255.255.0 0.0.0.0").unwrap();

        let layer = Ipv4Layer::open(config.path(), routes.path(), |name| {
            assert_eq!(name, "test0");
            Ok(ChannelLink::new(OURS))
        })
        .unwrap();
        assert_eq!(layer.local_addr(), LOCAL);
        assert_eq!(layer.netmask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(layer.routes().len(), 1);
        layer.close();
    }

    #[test]
    fn multicast_range() {
        assert!(is_multicast(Ipv4Addr::new(224, 0, 0, 9)));
        assert!(is_multicast(Ipv4Addr::new(239, 255, 255, 255)));
        assert!(!is_multicast(Ipv4Addr::new(240, 0, 0, 1)));
        assert!(!is_multicast(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
