#![deny(missing_docs)]

use crate::linux;
use libc;
use std::{
    convert::TryFrom,
    ffi::CStr,
    io,
    mem::{self, MaybeUninit},
    ptr,
    time::Duration,
};

/// Represents the link-level address a frame was received from.
pub struct Addr {
    inner: libc::sockaddr_storage,
    _len: libc::socklen_t,
}

impl Addr {
    fn link(&self) -> &libc::sockaddr_ll {
        // sockaddr_storage is large and aligned enough for any sockaddr, and recvfrom on an
        // AF_PACKET socket always fills in a sockaddr_ll.
        unsafe { &*(&self.inner as *const libc::sockaddr_storage as *const libc::sockaddr_ll) }
    }

    /// Returns true if the frame was sent by this host and looped back to the socket.
    pub fn is_outgoing(&self) -> bool {
        self.link().sll_pkttype == linux::PACKET_OUTGOING
    }

    /// The EtherType of the frame, in host byte order.
    pub fn protocol(&self) -> u16 {
        u16::from_be(self.link().sll_protocol)
    }
}

/// Represents an unbound `AF_PACKET` socket.  At this phase of a socket's lifecycle, it can be
/// configured.
pub struct Socket {
    fd: libc::c_int,
}

/// Represents a bound `AF_PACKET` socket. At this phase of a socket's lifecycle, it can be read
/// to/written from.
///
/// All I/O takes `&self`: the kernel serialises concurrent `sendto`/`recvfrom` calls on one
/// descriptor, so a bound socket may be shared between a receiving and a sending thread.
pub struct BoundSocket {
    fd: libc::c_int,
    send_addr: libc::sockaddr_ll,
    hardware_addr: [u8; 6],
}

impl Socket {
    /// Creates a new unbound socket that sees frames of every protocol.
    pub fn new() -> io::Result<Self> {
        // This block must be marked as unsafe because it uses FFI with C code. We believe the code
        // in this block to be safe because it does not interact with any memory owned by Rust
        // code, nor does it violate the invariant of the Socket type -- namely, that it return an
        // Err if it fails to initialize.
        let fd = unsafe {
            // Resources:
            // https://beej.us/guide/bgnet/html/multi/syscalls.html#socket
            // man 7 packet
            let fd = libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                i32::from((libc::ETH_P_ALL as u16).to_be()),
            );
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            fd
        };
        Ok(Self { fd })
    }

    /// Binds the socket to a network interface. This function consumes the `Socket` instance, as
    /// no more configuration options may be safely changed.
    pub fn bind(self, iface: impl AsRef<CStr>) -> io::Result<BoundSocket> {
        let name = iface.as_ref().to_bytes();
        if name.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface name is too long",
            ));
        }

        // This block is marked as unsafe because it uses FFI, however, we believe it to be safe
        // because 1) it handles FFI failures in accordance with the bound API's conventions, and
        // 2) it copies no more than the borrowed name's length into the zeroed ifreq.
        let (send_addr, hardware_addr) = unsafe {
            let mut ifr: linux::ifreq = MaybeUninit::zeroed().assume_init();
            ptr::copy_nonoverlapping(
                name.as_ptr() as *const libc::c_char,
                ifr.ifr_ifrn.ifrn_name.as_mut_ptr(),
                name.len(),
            );

            // ioctl(SIOCGIFHWADDR) fills in the hardware address of the interface
            // Resources:
            // man 7 netdevice
            let err = libc::ioctl(self.fd, linux::SIOCGIFHWADDR, &mut ifr);
            if err < 0 {
                return Err(io::Error::last_os_error());
            }
            let mut hardware_addr = [0u8; 6];
            for (byte, value) in hardware_addr
                .iter_mut()
                .zip(ifr.ifr_ifru.ifru_hwaddr.sa_data.iter())
            {
                *byte = *value as u8;
            }

            // ioctl(SIOCGIFINDEX) overwrites the same union with the index of the interface
            let err = libc::ioctl(self.fd, linux::SIOCGIFINDEX, &mut ifr);
            if err < 0 {
                return Err(io::Error::last_os_error());
            }

            // bind the socket
            // Resources:
            // https://beej.us/guide/bgnet/html/multi/syscalls.html#bind
            // man 7 packet regarding sockaddr_ll
            let mut ll: libc::sockaddr_ll = MaybeUninit::zeroed().assume_init();
            ll.sll_family = libc::AF_PACKET as libc::c_ushort;
            ll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
            // expanded from `ifr_ifindex` in kernel headers
            ll.sll_ifindex = ifr.ifr_ifru.ifru_ivalue;
            let err = libc::bind(
                self.fd,
                &ll as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if err < 0 {
                return Err(io::Error::last_os_error());
            }
            (ll, hardware_addr)
        };
        let fd = self.fd;
        // This ensures that `self` does not attempt to close the file descriptor, as the file
        // descriptor is transferred to the BoundSocket we're returning.
        mem::forget(self);
        Ok(BoundSocket {
            fd,
            send_addr,
            hardware_addr,
        })
    }
}

impl BoundSocket {
    /// Creates a socket and binds it to the named interface.
    pub fn from_interface(iface: impl AsRef<CStr>) -> io::Result<Self> {
        Socket::new()?.bind(iface)
    }

    /// The hardware address of the bound interface.
    pub fn hardware_addr(&self) -> [u8; 6] {
        self.hardware_addr
    }

    /// Subscribes the interface to a link-layer multicast group, so frames sent to `group` are
    /// delivered to this socket.
    pub fn add_multicast(&self, group: [u8; 6]) -> io::Result<()> {
        let mut mreq = linux::packet_mreq {
            mr_ifindex: self.send_addr.sll_ifindex,
            mr_type: linux::PACKET_MR_MULTICAST,
            mr_alen: group.len() as libc::c_ushort,
            mr_address: [0; 8],
        };
        mreq.mr_address[..group.len()].copy_from_slice(&group);
        // Safe for the same reasons as `send`: the request is owned by this frame and its size is
        // passed along with it.
        let err = unsafe {
            libc::setsockopt(
                self.fd,
                linux::SOL_PACKET,
                linux::PACKET_ADD_MEMBERSHIP,
                &mreq as *const _ as *const libc::c_void,
                mem::size_of::<linux::packet_mreq>() as libc::socklen_t,
            )
        };
        if err < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Sends a frame to the NIC.
    pub fn send(&self, frame: &[u8]) -> io::Result<usize> {
        // This block is marked as unsafe because it uses FFI. We believe this code to be safe,
        // because it safely borrows the Rust-owned frame and passes the length of the frame to the
        // libc function, so it should not exhibit any C-side undefined behaviour.
        unsafe {
            let bytes = libc::sendto(
                self.fd,
                frame.as_ptr() as *const _,
                frame.len(),
                0,
                &self.send_addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if bytes < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(bytes as usize)
            }
        }
    }

    /// Receives a frame from the NIC, blocking until one arrives.
    pub fn recv(&self, frame: &mut [u8]) -> io::Result<(usize, Addr)> {
        // Note comment in `send` call.
        unsafe {
            let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
            let mut addrlen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

            let bytes = libc::recvfrom(
                self.fd,
                frame.as_mut_ptr() as *mut _,
                frame.len(),
                0,
                storage.as_mut_ptr() as *mut _,
                &mut addrlen,
            );
            if bytes < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok((
                    bytes as usize,
                    Addr {
                        inner: storage.assume_init(),
                        _len: addrlen,
                    },
                ))
            }
        }
    }

    /// Waits until a frame can be read. `None` waits forever, a zero duration only polls.
    /// Returns `Ok(false)` if the wait ended without a frame, including on a signal.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms = poll_timeout_ms(timeout);
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // Safe for the same reasons as `send`: the pollfd is owned by this frame and outlives
        // the call.
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(ready > 0 && pfd.revents & libc::POLLIN != 0)
    }

    /// Receives a frame, giving up after `timeout`. `Ok(None)` means nothing arrived in time.
    pub fn recv_timeout(
        &self,
        frame: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, Addr)>> {
        if self.wait_readable(timeout)? {
            self.recv(frame).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Milliseconds for `poll`, rounded up so a sub-millisecond wait still blocks.
fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(timeout) => {
            let mut ms = timeout.as_millis();
            if timeout.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    }
}
