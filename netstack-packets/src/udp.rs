use crate::*;
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto};

pub const UDP_HEADER_LEN: usize = 8;

/// Checksum value meaning "not computed" (RFC 768).
pub const UDP_NO_CHECKSUM: u16 = 0;

#[derive(Clone, Debug)]
pub struct UdpSegment {
    pub data: PacketData,
}

impl UdpSegment {
    /// Builds a datagram. The checksum is left as `UDP_NO_CHECKSUM`.
    pub fn new(src_port: u16, dest_port: u16, payload: &[u8]) -> UdpSegment {
        let mut segment = UdpSegment::empty();
        segment
            .set_src_port(src_port)
            .set_dest_port(dest_port)
            .set_payload(payload);
        segment
    }

    pub fn from_buffer(data: PacketData) -> Result<UdpSegment, &'static str> {
        if data.len() < UDP_HEADER_LEN {
            return Err("Segment to short to contain valid UDP Header");
        }
        Ok(UdpSegment { data })
    }

    /// Make an empty UDPSegment, with no payload.
    pub fn empty() -> UdpSegment {
        let mut data = vec![0; UDP_HEADER_LEN];
        data[5] = UDP_HEADER_LEN as u8; //Set length field.
        UdpSegment { data }
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.data[0..=1].try_into().unwrap())
    }

    pub fn set_src_port(&mut self, port: u16) -> &mut Self {
        self.data[0..=1].copy_from_slice(&port.to_be_bytes());
        self
    }

    pub fn dest_port(&self) -> u16 {
        u16::from_be_bytes(self.data[2..=3].try_into().unwrap())
    }

    pub fn set_dest_port(&mut self, port: u16) -> &mut Self {
        self.data[2..=3].copy_from_slice(&port.to_be_bytes());
        self
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes(self.data[4..=5].try_into().unwrap())
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.data[6..=7].try_into().unwrap())
    }

    /// Manually set the checksum of UDP packet. Nothing in the stack computes one.
    pub fn set_checksum(&mut self, checksum: u16) -> &mut Self {
        self.data[6..=7].copy_from_slice(&checksum.to_be_bytes());
        self
    }

    /// Payload length announced by the length field.
    pub fn declared_payload_len(&self) -> usize {
        (self.length() as usize).saturating_sub(UDP_HEADER_LEN)
    }

    /// Payload bytes present in the buffer. Bytes past the length field are not payload.
    pub fn payload(&self) -> Cow<[u8]> {
        let end = (self.length() as usize)
            .min(self.data.len())
            .max(UDP_HEADER_LEN);
        Cow::from(&self.data[UDP_HEADER_LEN..end])
    }

    /// Set payload of UDP packet and its length field, does not change checksum.
    pub fn set_payload(&mut self, payload: &[u8]) -> &mut Self {
        self.data.truncate(UDP_HEADER_LEN);
        let length = (UDP_HEADER_LEN + payload.len()) as u16;
        self.data[4..=5].copy_from_slice(&length.to_be_bytes());
        self.data.reserve_exact(payload.len());
        self.data.extend(payload);
        self
    }
}

/// UdpSegments are considered the same if they carry the same bytes.
impl PartialEq for UdpSegment {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for UdpSegment {}

impl TryFrom<Ipv4Packet> for UdpSegment {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        if packet.protocol() != IpProtocol::UDP {
            return Err("Protocol is incorrect, since it isn't UDP");
        }
        UdpSegment::from_buffer(packet.payload().into_owned())
    }
}
