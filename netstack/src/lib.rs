/// Errors shared by every layer, and the `Result` alias they are returned through.
pub mod error;
pub use self::error::{Error, Result};

/// The boundary to the network device. Every layer above sends and receives whole frame
/// payloads through a `Link`, which knows nothing about IP.
pub mod link;
pub use self::link::Link;

/// One-shot countdowns, used for ARP waits and route lifetimes.
pub mod timer;

/// Interface and route file parsing.
pub mod config;

/// Address resolution: finds the hardware address of a neighbour by broadcasting a request and
/// waiting for its reply.
pub mod arp;

/// The static route table consulted by the IPv4 layer to pick a next hop.
pub mod route;

/// IPv4 over a link: routing, ARP resolution and header handling for one local address.
pub mod ipv4;

/// UDP sockets on top of the IPv4 layer.
pub mod udp;

/// RIPv2: a timed route table plus the server and client that keep it up to date.
pub mod rip;

/// Utility module
pub mod utils;

pub use netstack_packets as packets;
