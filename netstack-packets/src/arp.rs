use crate::*;
use std::convert::{TryFrom, TryInto};
use std::net::Ipv4Addr;

pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

pub enum ArpHardwareType {
    Ethernet = 1,
}

/// Size of an ARP message resolving IPv4 over Ethernet: 2+2+1+1+2+6+4+6+4.
pub const ARP_MESSAGE_LEN: usize = 28;

const HARDWARE_TYPE_RANGE: (usize, usize) = (0, 2);
const PROTOCOL_TYPE_RANGE: (usize, usize) = (2, 4);
const HARDWARE_ADDR_LEN_RANGE: (usize, usize) = (4, 5);
const PROTOCOL_ADDR_LEN_RANGE: (usize, usize) = (5, 6);
const OPCODE_RANGE: (usize, usize) = (6, 8);
const SENDER_HARDWARE_ADDR_RANGE: (usize, usize) = (8, 14);
const SENDER_PROTOCOL_ADDR_RANGE: (usize, usize) = (14, 18);
const TARGET_HARDWARE_ADDR_RANGE: (usize, usize) = (18, 24);
const TARGET_PROTOCOL_ADDR_RANGE: (usize, usize) = (24, 28);

///
/// Getters/setters for the packet structure described in RFC 826
/// https://tools.ietf.org/html/rfc826
///
/// Only the Ethernet/IPv4 shape is supported, so every address field sits at a fixed offset.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArpFrame {
    data: PacketData,
}

impl ArpFrame {
    ///
    /// Constructs an Ethernet/IPv4 message with the type and length fields filled in and
    /// everything else zeroed.
    ///
    pub fn new() -> Self {
        let mut arp_frame = ArpFrame {
            data: vec![0; ARP_MESSAGE_LEN],
        };
        arp_frame.set_hardware_type(ArpHardwareType::Ethernet as u16);
        arp_frame.set_protocol_type(IPV4_ETHER_TYPE);
        arp_frame.set_hardware_addr_len(6);
        arp_frame.set_protocol_addr_len(4);
        arp_frame
    }

    /// Builds a request asking who owns `target_ip`.
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        let mut arp_frame = ArpFrame::new();
        arp_frame.set_opcode(ArpOp::Request as u16);
        arp_frame.set_sender_hardware_addr(sender_mac);
        arp_frame.set_sender_protocol_addr(sender_ip);
        arp_frame.set_target_hardware_addr(MacAddr::UNKNOWN);
        arp_frame.set_target_protocol_addr(target_ip);
        arp_frame
    }

    /// Builds the reply to `request`, announcing `own_mac` as the owner of its target address.
    pub fn reply_to(request: &ArpFrame, own_mac: MacAddr) -> Self {
        let mut arp_frame = ArpFrame::new();
        arp_frame.set_opcode(ArpOp::Reply as u16);
        arp_frame.set_sender_hardware_addr(own_mac);
        arp_frame.set_sender_protocol_addr(request.target_ipv4_addr());
        arp_frame.set_target_hardware_addr(request.sender_mac_addr());
        arp_frame.set_target_protocol_addr(request.sender_ipv4_addr());
        arp_frame
    }

    pub fn hardware_type(&self) -> u16 {
        let (start, end) = HARDWARE_TYPE_RANGE;
        u16::from_be_bytes(self.data[start..end].try_into().unwrap())
    }

    pub fn protocol_type(&self) -> u16 {
        let (start, end) = PROTOCOL_TYPE_RANGE;
        u16::from_be_bytes(self.data[start..end].try_into().unwrap())
    }

    pub fn hardware_addr_len(&self) -> u8 {
        self.data[HARDWARE_ADDR_LEN_RANGE.0]
    }

    pub fn protocol_addr_len(&self) -> u8 {
        self.data[PROTOCOL_ADDR_LEN_RANGE.0]
    }

    pub fn opcode(&self) -> u16 {
        let (start, end) = OPCODE_RANGE;
        u16::from_be_bytes(self.data[start..end].try_into().unwrap())
    }

    pub fn sender_mac_addr(&self) -> MacAddr {
        let (start, end) = SENDER_HARDWARE_ADDR_RANGE;
        MacAddr::new(self.data[start..end].try_into().unwrap())
    }

    pub fn sender_ipv4_addr(&self) -> Ipv4Addr {
        let (start, end) = SENDER_PROTOCOL_ADDR_RANGE;
        let octets: [u8; 4] = self.data[start..end].try_into().unwrap();
        Ipv4Addr::from(octets)
    }

    pub fn target_mac_addr(&self) -> MacAddr {
        let (start, end) = TARGET_HARDWARE_ADDR_RANGE;
        MacAddr::new(self.data[start..end].try_into().unwrap())
    }

    pub fn target_ipv4_addr(&self) -> Ipv4Addr {
        let (start, end) = TARGET_PROTOCOL_ADDR_RANGE;
        let octets: [u8; 4] = self.data[start..end].try_into().unwrap();
        Ipv4Addr::from(octets)
    }

    pub fn set_hardware_type(&mut self, htype: u16) {
        self.set_arp_data(&htype.to_be_bytes(), HARDWARE_TYPE_RANGE);
    }

    pub fn set_protocol_type(&mut self, ptype: u16) {
        self.set_arp_data(&ptype.to_be_bytes(), PROTOCOL_TYPE_RANGE);
    }

    pub fn set_hardware_addr_len(&mut self, len: u8) {
        self.set_arp_data(&[len], HARDWARE_ADDR_LEN_RANGE);
    }

    pub fn set_protocol_addr_len(&mut self, len: u8) {
        self.set_arp_data(&[len], PROTOCOL_ADDR_LEN_RANGE);
    }

    pub fn set_opcode(&mut self, code: u16) {
        self.set_arp_data(&code.to_be_bytes(), OPCODE_RANGE);
    }

    pub fn set_sender_hardware_addr(&mut self, addr: MacAddr) {
        self.set_arp_data(&addr.bytes, SENDER_HARDWARE_ADDR_RANGE);
    }

    pub fn set_sender_protocol_addr(&mut self, addr: Ipv4Addr) {
        self.set_arp_data(&addr.octets(), SENDER_PROTOCOL_ADDR_RANGE);
    }

    pub fn set_target_hardware_addr(&mut self, addr: MacAddr) {
        self.set_arp_data(&addr.bytes, TARGET_HARDWARE_ADDR_RANGE);
    }

    pub fn set_target_protocol_addr(&mut self, addr: Ipv4Addr) {
        self.set_arp_data(&addr.octets(), TARGET_PROTOCOL_ADDR_RANGE);
    }

    pub fn is_reply(&self) -> bool {
        self.opcode() == ArpOp::Reply as u16
    }

    pub fn is_request(&self) -> bool {
        self.opcode() == ArpOp::Request as u16
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    // Move ownership of the data back to the caller
    pub fn into_data(self) -> PacketData {
        self.data
    }

    fn set_arp_data(&mut self, bytes: &[u8], (start, end): (usize, usize)) {
        self.data[start..end].copy_from_slice(bytes);
    }
}

impl Default for ArpFrame {
    fn default() -> Self {
        ArpFrame::new()
    }
}

impl TryFrom<&[u8]> for ArpFrame {
    type Error = &'static str;

    ///
    /// Reads an ARP message out of a link-layer payload.
    /// Validates
    /// - The payload holds at least a full Ethernet/IPv4 message (trailing padding is dropped)
    /// - The address length fields describe Ethernet/IPv4
    ///
    fn try_from(payload: &[u8]) -> Result<Self, Self::Error> {
        if payload.len() < ARP_MESSAGE_LEN {
            return Err("Frame payload is too small");
        }

        let arp_frame = ArpFrame {
            data: payload[..ARP_MESSAGE_LEN].to_vec(),
        };

        if arp_frame.hardware_addr_len() != 6 || arp_frame.protocol_addr_len() != 4 {
            return Err("Frame payload doesn't match address length fields");
        }

        Ok(arp_frame)
    }
}
