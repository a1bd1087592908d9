use crate::*;
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto};
use std::net::Ipv4Addr;

pub const IPV4_HEADER_LEN: usize = 20;

/// Version 4, five 32-bit words of header.
const VERSION_IHL: u8 = 0x45;

/// Internet checksum (RFC 1071): the one's complement of the one's complement sum of the
/// 16-bit big-endian words of `data`. An odd trailing byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum = chunks.by_ref().fold(0u32, |acc, x| {
        acc + u32::from(u16::from_be_bytes([x[0], x[1]]))
    });
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[derive(Clone, Debug)]
pub struct Ipv4Packet {
    pub data: PacketData,
    pub payload_offset: usize,
}

impl Ipv4Packet {
    /// Builds a datagram with an options-free header and a valid checksum.
    /// Identifier is fixed at 1 and fragmentation flags are left clear.
    pub fn new(
        src: Ipv4Addr,
        dest: Ipv4Addr,
        protocol: IpProtocol,
        ttl: u8,
        payload: &[u8],
    ) -> Ipv4Packet {
        let mut data = vec![0; IPV4_HEADER_LEN];
        data[0] = VERSION_IHL;
        data[4..6].copy_from_slice(&1u16.to_be_bytes());
        data[8] = ttl;
        data[9] = u8::from(protocol);
        data[12..16].copy_from_slice(&src.octets());
        data[16..20].copy_from_slice(&dest.octets());

        let mut packet = Ipv4Packet {
            data,
            payload_offset: IPV4_HEADER_LEN,
        };
        packet.set_payload(payload);
        packet.set_checksum();
        packet
    }

    /// Interprets a link-layer payload as a datagram. Only the fixed header is validated here;
    /// the total length field is trusted as declared and clamped when the payload is read.
    pub fn from_buffer(data: PacketData) -> Result<Ipv4Packet, &'static str> {
        if data.len() < IPV4_HEADER_LEN {
            return Err("Data is too short to be an IPv4 Packet");
        }

        let version: u8 = (data[0] & 0xF0) >> 4;
        if version != 4 {
            return Err("Packet has incorrect version, is not Ipv4Packet");
        }

        // This is the header length in 32bit words
        let ihl = (data[0] & 0x0F) as usize;
        if ihl < 5 || data.len() < ihl * 4 {
            return Err("Packet has invalid header length field");
        }

        Ok(Ipv4Packet {
            data,
            payload_offset: ihl * 4,
        })
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        let data: [u8; 4] = self.data[12..16].try_into().unwrap();
        Ipv4Addr::from(data)
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.data[12..16].copy_from_slice(&addr.octets());
    }

    pub fn dest_addr(&self) -> Ipv4Addr {
        let data: [u8; 4] = self.data[16..20].try_into().unwrap();
        Ipv4Addr::from(data)
    }

    pub fn set_dest_addr(&mut self, addr: Ipv4Addr) {
        self.data[16..20].copy_from_slice(&addr.octets());
    }

    pub fn ihl(&self) -> u8 {
        self.data[0] & 0x0F
    }

    pub fn tos(&self) -> u8 {
        self.data[1]
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.data[2..=3].try_into().unwrap())
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes(self.data[4..=5].try_into().unwrap())
    }

    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.data[6] & 0x1F, self.data[7]])
    }

    /// Returns tuple of (Don't Fragment, More Fragments)
    pub fn flags(&self) -> (bool, bool) {
        let df = (self.data[6] & 0x40) != 0;
        let mf = (self.data[6] & 0x20) != 0;
        (df, mf)
    }

    pub fn ttl(&self) -> u8 {
        self.data[8]
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.data[8] = ttl;
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.data[9])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.data[10..=11].try_into().unwrap())
    }

    /// Payload length announced by the header, which may differ from what was received.
    pub fn declared_payload_len(&self) -> usize {
        (self.total_len() as usize).saturating_sub(self.payload_offset)
    }

    /// Payload bytes actually present, never reaching past the received data.
    pub fn payload(&self) -> Cow<[u8]> {
        let end = (self.total_len() as usize)
            .min(self.data.len())
            .max(self.payload_offset);
        Cow::from(&self.data[self.payload_offset..end])
    }

    /// Replaces the payload and rewrites the total length field. The checksum is left stale.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.data.truncate(self.payload_offset);
        let total_len = (self.payload_offset + payload.len()) as u16;
        self.data[2..=3].copy_from_slice(&total_len.to_be_bytes());
        self.data.reserve_exact(payload.len());
        self.data.extend(payload);
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..self.payload_offset]
    }

    /// Verifies the IP header checksum: summing the header with its checksum in place
    /// must give zero.
    pub fn validate_checksum(&self) -> bool {
        checksum(self.header()) == 0
    }

    /// Calculates what the checksum should be set to given the current header
    pub fn calculate_checksum(&self) -> u16 {
        let mut header = self.header().to_vec();
        header[10] = 0;
        header[11] = 0;
        checksum(&header)
    }

    /// Sets checksum field to valid value
    pub fn set_checksum(&mut self) {
        let new_checksum = self.calculate_checksum();
        self.data[10..=11].copy_from_slice(&new_checksum.to_be_bytes());
    }
}

/// Ipv4Packets are considered the same if they carry the same bytes.
impl PartialEq for Ipv4Packet {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Ipv4Packet {}

impl TryFrom<PacketData> for Ipv4Packet {
    type Error = &'static str;

    fn try_from(data: PacketData) -> Result<Self, Self::Error> {
        Ipv4Packet::from_buffer(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn ipv4_packet() {
        let ip_data: Vec<u8> = vec![
            0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];

        let packet = Ipv4Packet::from_buffer(ip_data).unwrap();

        assert_eq!(packet.src_addr(), Ipv4Addr::new(192, 178, 128, 0));
        assert_eq!(packet.dest_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(packet.ihl(), 5);
        assert_eq!(packet.payload().len(), 0);
        assert_eq!(packet.protocol(), IpProtocol::UDP);
        assert_eq!(packet.total_len(), 20);
        assert_eq!(packet.ttl(), 64);
        assert_eq!(packet.checksum(), 0);
        assert_eq!(packet.tos(), 0);
        assert_eq!(packet.identification(), 0);
        assert_eq!(packet.fragment_offset(), 0);
        assert_eq!(packet.flags(), (false, false));
    }

    #[test]
    fn validate_checksum() {
        let invalid_checksum_data: Vec<u8> = vec![
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let packet = Ipv4Packet::from_buffer(invalid_checksum_data).unwrap();
        assert!(!packet.validate_checksum());

        let valid_checksum_data: Vec<u8> = vec![
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0xc0, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let packet = Ipv4Packet::from_buffer(valid_checksum_data).unwrap();
        assert!(packet.validate_checksum());
        assert_eq!(packet.calculate_checksum(), 0xb8c0);
    }

    #[test]
    fn set_checksum() {
        let ip_data: Vec<u8> = vec![
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let mut packet = Ipv4Packet::from_buffer(ip_data).unwrap();
        assert!(!packet.validate_checksum());
        packet.set_checksum();
        assert!(packet.validate_checksum());
        assert_eq!(packet.checksum(), 0xb8c0);
    }

    #[test]
    fn checksum_sums_to_zero_once_inserted() {
        let headers: Vec<[u8; 20]> = vec![
            [0; 20],
            [0xff; 20],
            [
                0x45, 0x00, 0x05, 0xdc, 0x12, 0x34, 0x40, 0x00, 0x01, 0x11, 0x00, 0x00, 10, 0, 0,
                1, 224, 0, 0, 9,
            ],
            [
                0x45, 0x10, 0x00, 0x30, 0xab, 0xcd, 0x00, 0x00, 0x20, 0x06, 0x00, 0x00, 172, 16,
                254, 3, 8, 8, 8, 8,
            ],
        ];
        for mut header in headers {
            header[10] = 0;
            header[11] = 0;
            let sum = checksum(&header);
            header[10..12].copy_from_slice(&sum.to_be_bytes());
            assert_eq!(checksum(&header), 0, "header {:?}", header);
        }
    }

    #[test]
    fn odd_length_checksum() {
        assert_eq!(checksum(&[0x01]), !0x0100);
        assert_eq!(checksum(&[0x00, 0x01, 0xf2]), !(0x0001 + 0xf200));
    }

    #[test]
    fn new_packet() {
        let packet = Ipv4Packet::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            IpProtocol::UDP,
            32,
            &[1, 2, 3, 4, 5],
        );
        assert_eq!(packet.data[0], 0x45);
        assert_eq!(packet.total_len(), 25);
        assert_eq!(packet.identification(), 1);
        assert_eq!(packet.ttl(), 32);
        assert_eq!(packet.protocol(), IpProtocol::UDP);
        assert_eq!(packet.payload(), vec![1, 2, 3, 4, 5]);
        assert!(packet.validate_checksum());
    }

    #[test]
    fn payload_is_clamped_to_received_data() {
        let mut packet = Ipv4Packet::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            IpProtocol::UDP,
            32,
            &[9; 10],
        );
        // Ethernet padding past the declared length is not payload
        packet.data.extend(&[0; 6]);
        let padded = Ipv4Packet::from_buffer(packet.data.clone()).unwrap();
        assert_eq!(padded.payload().len(), 10);
        assert_eq!(padded.declared_payload_len(), 10);

        // A header that promises more than arrived yields what arrived
        packet.data.truncate(24);
        let short = Ipv4Packet::from_buffer(packet.data).unwrap();
        assert_eq!(short.payload().len(), 4);
        assert_eq!(short.declared_payload_len(), 10);
    }

    #[test]
    fn short_or_foreign_data_is_rejected() {
        assert!(Ipv4Packet::from_buffer(vec![0x45; 19]).is_err());
        let mut ipv6ish = vec![0; 20];
        ipv6ish[0] = 0x60;
        assert!(Ipv4Packet::from_buffer(ipv6ish).is_err());
    }
}
