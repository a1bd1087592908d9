use crate::error::{Error, Result};
use crate::ipv4::{Ipv4Layer, IPV4_MAX_PAYLOAD};
use crate::link::Link;
use crate::timer::time_until;
use netstack_packets::{IpProtocol, UdpSegment, UDP_HEADER_LEN};
use std::io;
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Largest payload a single datagram carries.
pub const UDP_MAX_PAYLOAD: usize = IPV4_MAX_PAYLOAD - UDP_HEADER_LEN;

/// A UDP endpoint bound to one local port. Checksums are neither computed nor checked.
pub struct UdpSocket<L: Link> {
    ip: Ipv4Layer<L>,
    port: u16,
}

impl<L: Link> UdpSocket<L> {
    pub fn new(ip: Ipv4Layer<L>, port: u16) -> UdpSocket<L> {
        UdpSocket { ip, port }
    }

    /// Opens the IPv4 layer described by the two files and binds `port` on it.
    pub fn open<F>(
        port: u16,
        config_path: impl AsRef<Path>,
        routes_path: impl AsRef<Path>,
        open_link: F,
    ) -> Result<UdpSocket<L>>
    where
        F: FnOnce(&str) -> io::Result<L>,
    {
        let ip = Ipv4Layer::open(config_path, routes_path, open_link)?;
        Ok(UdpSocket::new(ip, port))
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip.local_addr(), self.port)
    }

    pub fn ipv4(&self) -> &Ipv4Layer<L> {
        &self.ip
    }

    /// Sends `payload` from the bound port to `dest`. Returns the payload bytes sent.
    pub fn send(&self, dest: SocketAddrV4, payload: &[u8]) -> Result<usize> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if payload.len() > UDP_MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: UDP_MAX_PAYLOAD,
            });
        }
        let segment = UdpSegment::new(self.port, dest.port(), payload);
        let sent = self.ip.send(*dest.ip(), IpProtocol::UDP, &segment.data)?;
        trace!(%dest, len = payload.len(), "sent UDP datagram");
        Ok(sent.saturating_sub(UDP_HEADER_LEN))
    }

    /// Waits for a datagram addressed to the bound port, discarding any other.
    ///
    /// Copies as much of the payload as fits in `buf` and returns the full payload length and the
    /// sender, or `Ok(None)` once `timeout` runs out.
    pub fn recv(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, SocketAddrV4)>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut datagram = vec![0u8; IPV4_MAX_PAYLOAD];
        loop {
            let timeout = time_until(deadline);
            let received = match self.ip.recv_datagram(IpProtocol::UDP, &mut datagram, timeout)? {
                Some(received) => received,
                None => return Ok(None),
            };
            let src = received.src;
            let segment = match UdpSegment::from_buffer(datagram[..received.copied].to_vec()) {
                Ok(segment) => segment,
                Err(reason) => {
                    trace!(%src, reason, "dropping UDP datagram");
                    continue;
                }
            };
            if segment.dest_port() != self.port {
                trace!(%src, port = segment.dest_port(), "datagram for another port");
                continue;
            }

            let payload = &datagram[UDP_HEADER_LEN..received.copied];
            let copied = buf.len().min(payload.len());
            buf[..copied].copy_from_slice(&payload[..copied]);
            let peer = SocketAddrV4::new(src, segment.src_port());
            trace!(%peer, copied, "received UDP datagram");
            return Ok(Some((payload.len(), peer)));
        }
    }

    pub fn close(self) {
        debug!(port = self.port, "closed UDP socket");
        self.ip.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp::ArpResolver;
    use crate::route::{Route, RouteTable};
    use crate::utils::test::{ChannelLink, Frame};
    use netstack_packets::{Ipv4Packet, MacAddr, IPV4_ETHER_TYPE};
    use std::net::Ipv4Addr;

    const OURS: MacAddr = MacAddr {
        bytes: [2, 0, 0, 0, 0, 1],
    };
    const PEER: MacAddr = MacAddr {
        bytes: [2, 0, 0, 0, 0, 2],
    };
    const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn socket(port: u16) -> UdpSocket<ChannelLink> {
        let link = ChannelLink::new(OURS);
        link.answer_arp(vec![(PEER_IP, PEER)]);
        let mut routes = RouteTable::new();
        routes
            .add(Route::new(
                Ipv4Addr::new(10, 0, 0, 0),
                Ipv4Addr::new(255, 255, 255, 0),
                Ipv4Addr::UNSPECIFIED,
            ))
            .unwrap();
        let ip = Ipv4Layer::new(link, LOCAL, Ipv4Addr::new(255, 255, 255, 0), routes)
            .with_arp_resolver(ArpResolver::with_timeouts(
                Duration::from_millis(20),
                Duration::from_millis(20),
            ));
        UdpSocket::new(ip, port)
    }

    fn datagram(src_port: u16, dest_port: u16, payload: &[u8]) -> Frame {
        let segment = UdpSegment::new(src_port, dest_port, payload);
        Frame {
            src: PEER,
            dest: OURS,
            ether_type: IPV4_ETHER_TYPE,
            payload: Ipv4Packet::new(PEER_IP, LOCAL, IpProtocol::UDP, 64, &segment.data).data,
        }
    }

    #[test]
    fn send_prepends_header() {
        let socket = socket(5000);
        assert_eq!(
            socket.send(SocketAddrV4::new(PEER_IP, 7), &[1, 2, 3]).unwrap(),
            3
        );

        let frame = socket
            .ipv4()
            .link()
            .sent()
            .into_iter()
            .find(|frame| frame.ether_type == IPV4_ETHER_TYPE)
            .unwrap();
        let packet = Ipv4Packet::from_buffer(frame.payload).unwrap();
        assert_eq!(packet.protocol(), IpProtocol::UDP);
        assert_eq!(
            &packet.payload()[..],
            &[0x13, 0x88, 0x00, 0x07, 0x00, 0x0b, 0x00, 0x00, 1, 2, 3]
        );
    }

    #[test]
    fn send_rejects_bad_payloads() {
        let socket = socket(5000);
        match socket.send(SocketAddrV4::new(PEER_IP, 7), &[]) {
            Err(Error::EmptyPayload) => {}
            other => panic!("unexpected result {:?}", other),
        }
        match socket.send(SocketAddrV4::new(PEER_IP, 7), &[0; UDP_MAX_PAYLOAD + 1]) {
            Err(Error::PayloadTooLarge { max, .. }) => assert_eq!(max, 1472),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn recv_only_sees_bound_port() {
        let socket = socket(520);
        let link = socket.ipv4().link();
        link.inject(datagram(9, 521, &[1]));
        link.inject(datagram(9, 520, &[2, 2]));

        let mut buf = [0u8; 8];
        let timeout = Some(Duration::from_millis(30));
        assert_eq!(
            socket.recv(&mut buf, timeout).unwrap(),
            Some((2, SocketAddrV4::new(PEER_IP, 9)))
        );
        assert_eq!(&buf[..2], &[2, 2]);
        assert_eq!(socket.recv(&mut buf, timeout).unwrap(), None);
    }

    #[test]
    fn recv_truncates_and_reports_full_length() {
        let socket = socket(520);
        let payload: Vec<u8> = (0..200).map(|i| i as u8).collect();
        socket.ipv4().link().inject(datagram(520, 520, &payload));

        let mut buf = [0u8; 16];
        let (len, peer) = socket.recv(&mut buf, None).unwrap().unwrap();
        assert_eq!(len, 200);
        assert_eq!(peer, SocketAddrV4::new(PEER_IP, 520));
        assert_eq!(&buf[..], &payload[..16]);
    }

    #[test]
    fn inflated_length_never_exposes_earlier_datagrams() {
        let socket = socket(520);
        let link = socket.ipv4().link();
        link.inject(datagram(9, 999, &[0xaa; 64]));
        let mut inflated = datagram(520, 520, &[1, 2, 3, 4]);
        inflated.payload[2..4].copy_from_slice(&92u16.to_be_bytes());
        link.inject(inflated);

        let mut buf = [0u8; 100];
        let (len, peer) = socket
            .recv(&mut buf, Some(Duration::from_millis(30)))
            .unwrap()
            .unwrap();
        assert_eq!(peer, SocketAddrV4::new(PEER_IP, 520));
        assert_eq!(len, 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert!(buf[4..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn runt_datagrams_are_skipped() {
        let socket = socket(520);
        let link = socket.ipv4().link();
        link.inject(Frame {
            src: PEER,
            dest: OURS,
            ether_type: IPV4_ETHER_TYPE,
            payload: Ipv4Packet::new(PEER_IP, LOCAL, IpProtocol::UDP, 64, &[0, 1, 2]).data,
        });
        let mut buf = [0u8; 8];
        assert_eq!(
            socket.recv(&mut buf, Some(Duration::from_millis(20))).unwrap(),
            None
        );
    }
}
