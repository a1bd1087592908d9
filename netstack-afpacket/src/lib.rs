//! This crate connects the `netstack` layers to a real interface through the `afpacket` crate.
#![cfg(target_os = "linux")]
#![deny(missing_docs)]

use afpacket::BoundSocket;
use netstack::Link;
use netstack_packets::{EthernetFrame, MacAddr, ETHERNET_HEADER_LEN, ETHERNET_MTU};
use std::ffi::CString;
use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// An Ethernet link over an `AF_PACKET` socket bound to one interface.
///
/// Frames this host transmits are looped back to packet sockets by the kernel; those are
/// dropped on receive.
pub struct AfPacketLink {
    socket: BoundSocket,
    mac: MacAddr,
    name: String,
}

impl AfPacketLink {
    /// Opens the interface called `interface`. Requires `CAP_NET_RAW`.
    pub fn open(interface: &str) -> io::Result<AfPacketLink> {
        let iface = CString::new(interface).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface name contains a NUL byte",
            )
        })?;
        let socket = BoundSocket::from_interface(&iface)?;
        let mac = MacAddr::new(socket.hardware_addr());
        debug!(interface, %mac, "opened AF_PACKET link");
        Ok(AfPacketLink {
            socket,
            mac,
            name: interface.to_string(),
        })
    }

    /// The interface name this link was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts receiving frames sent to the Ethernet group of the IPv4 multicast `group`.
    pub fn join_multicast(&self, group: Ipv4Addr) -> io::Result<()> {
        let mac = MacAddr::ipv4_multicast(group);
        self.socket.add_multicast(mac.bytes)?;
        debug!(interface = %self.name, %group, %mac, "joined multicast group");
        Ok(())
    }

    fn accepts(&self, dest: MacAddr) -> bool {
        dest == self.mac || dest.is_broadcast() || dest.is_multicast()
    }
}

impl Link for AfPacketLink {
    fn local_addr(&self) -> MacAddr {
        self.mac
    }

    fn send(&self, dest: MacAddr, ether_type: u16, payload: &[u8]) -> io::Result<usize> {
        if payload.len() > ETHERNET_MTU {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload does not fit in one frame",
            ));
        }
        let frame = EthernetFrame::new(dest, self.mac, ether_type, payload);
        let sent = self.socket.send(&frame.data)?;
        trace!(%dest, ether_type, len = payload.len(), "sent frame");
        Ok(sent.saturating_sub(ETHERNET_HEADER_LEN))
    }

    fn recv(
        &self,
        ether_type: u16,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, MacAddr)>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut data = [0u8; ETHERNET_HEADER_LEN + ETHERNET_MTU];
        loop {
            let remaining =
                deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            let (len, addr) = match self.socket.recv_timeout(&mut data, remaining)? {
                Some(received) => received,
                None => {
                    if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                        return Ok(None);
                    }
                    continue;
                }
            };
            if addr.is_outgoing() || addr.protocol() != ether_type {
                continue;
            }
            let frame = match EthernetFrame::from_buffer(data[..len].to_vec()) {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            if frame.ether_type() != ether_type || !self.accepts(frame.dest_mac()) {
                continue;
            }

            let payload = frame.payload();
            let copied = buf.len().min(payload.len());
            buf[..copied].copy_from_slice(&payload[..copied]);
            trace!(src = %frame.src_mac(), ether_type, len = copied, "received frame");
            return Ok(Some((copied, frame.src_mac())));
        }
    }
}
