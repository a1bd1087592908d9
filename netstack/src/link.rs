use netstack_packets::MacAddr;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A link-layer port: sends and receives frame payloads tagged with an EtherType.
///
/// Implementations add and strip the link header themselves. All methods take `&self` so a single
/// link can be shared between a thread blocked in `recv` and another thread sending.
pub trait Link: Send + Sync {
    /// Hardware address of the local interface.
    fn local_addr(&self) -> MacAddr;

    /// Sends `payload` to `dest`. Returns the number of payload bytes handed to the wire.
    fn send(&self, dest: MacAddr, ether_type: u16, payload: &[u8]) -> io::Result<usize>;

    /// Waits for a frame carrying `ether_type` and copies its payload into `buf`.
    ///
    /// A `timeout` of `None` waits forever and `Some(Duration::from_secs(0))` only polls. Frames
    /// of other EtherTypes are consumed and skipped. Returns the number of bytes copied and the
    /// sender's hardware address, or `Ok(None)` once the timeout runs out.
    fn recv(
        &self,
        ether_type: u16,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, MacAddr)>>;
}

impl<L: Link + ?Sized> Link for Arc<L> {
    fn local_addr(&self) -> MacAddr {
        (**self).local_addr()
    }

    fn send(&self, dest: MacAddr, ether_type: u16, payload: &[u8]) -> io::Result<usize> {
        (**self).send(dest, ether_type, payload)
    }

    fn recv(
        &self,
        ether_type: u16,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, MacAddr)>> {
        (**self).recv(ether_type, buf, timeout)
    }
}
