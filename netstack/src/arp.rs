use crate::error::{Error, Result};
use crate::link::Link;
use crate::timer::Timer;
use netstack_packets::{ArpFrame, MacAddr, ARP_ETHER_TYPE, ETHERNET_MTU};
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, trace};

/// How long to wait for a reply to the first request.
pub const ARP_TIMEOUT: Duration = Duration::from_millis(2000);
/// How long to wait after repeating the request once.
pub const ARP_ECHO_TIMEOUT: Duration = Duration::from_millis(3000);

/// Resolves IPv4 addresses to hardware addresses with broadcast ARP requests.
///
/// A request is broadcast and, if no reply arrives within `timeout`, repeated exactly once
/// before giving up after `echo_timeout`. Nothing is cached between calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpResolver {
    pub timeout: Duration,
    pub echo_timeout: Duration,
}

impl Default for ArpResolver {
    fn default() -> Self {
        ArpResolver {
            timeout: ARP_TIMEOUT,
            echo_timeout: ARP_ECHO_TIMEOUT,
        }
    }
}

impl ArpResolver {
    pub fn new() -> ArpResolver {
        ArpResolver::default()
    }

    pub fn with_timeouts(timeout: Duration, echo_timeout: Duration) -> ArpResolver {
        ArpResolver {
            timeout,
            echo_timeout,
        }
    }

    /// Asks who owns `target`, announcing ourselves as `src`.
    ///
    /// Only a reply whose sender address is `target` ends the wait; other ARP traffic and
    /// truncated messages are skipped.
    pub fn resolve<L: Link + ?Sized>(
        &self,
        link: &L,
        src: Ipv4Addr,
        target: Ipv4Addr,
    ) -> Result<MacAddr> {
        let request = ArpFrame::request(link.local_addr(), src, target);
        link.send(MacAddr::BROADCAST, ARP_ETHER_TYPE, request.as_bytes())
            .map_err(Error::Link)?;
        debug!(%src, %target, "sent ARP request");

        let mut timer = Timer::started(self.timeout);
        let mut echoed = false;
        let mut buf = [0u8; ETHERNET_MTU];
        loop {
            if timer.is_expired() {
                if echoed {
                    debug!(%target, "ARP request timed out");
                    return Err(Error::ArpTimeout(target));
                }
                link.send(MacAddr::BROADCAST, ARP_ETHER_TYPE, request.as_bytes())
                    .map_err(Error::Link)?;
                debug!(%target, "sent ARP echo request");
                echoed = true;
                timer.reset(self.echo_timeout);
            }

            let len = match link
                .recv(ARP_ETHER_TYPE, &mut buf, Some(timer.remaining()))
                .map_err(Error::Link)?
            {
                Some((len, _)) => len,
                None => continue,
            };
            let reply = match ArpFrame::try_from(&buf[..len]) {
                Ok(reply) => reply,
                Err(reason) => {
                    trace!(len, reason, "skipping ARP frame");
                    continue;
                }
            };
            if reply.is_reply() && reply.sender_ipv4_addr() == target {
                let mac = reply.sender_mac_addr();
                debug!(%target, %mac, "ARP reply received");
                return Ok(mac);
            }
        }
    }
}

/// Resolves `target` with the default timeouts.
pub fn resolve<L: Link + ?Sized>(link: &L, src: Ipv4Addr, target: Ipv4Addr) -> Result<MacAddr> {
    ArpResolver::default().resolve(link, src, target)
}
