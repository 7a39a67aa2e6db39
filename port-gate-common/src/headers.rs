// Wire layouts of the headers the packet gate walks.
//
// Every field is a byte array so the structs have alignment 1 and a view can
// be formed at any packet offset once its range is proven in bounds.

use core::mem;

use crate::policy::network_to_host_port;

pub const ETH_P_IPV4: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const IPPROTO_TCP: u8 = 6;

const IPV4_FRAG_OFFSET_MASK: u16 = 0x1fff;

/// A fixed-size header that can be viewed in place.
///
/// # Safety
///
/// Implementors must be `repr(C)`, have alignment 1, and be valid for any bit
/// pattern (byte-array fields only).
pub unsafe trait Header: Sized {
    const LEN: usize = mem::size_of::<Self>();
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct EthHdr {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ether_type: [u8; 2],
}

unsafe impl Header for EthHdr {}

impl EthHdr {
    #[inline(always)]
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

/// Fixed 20-byte portion of an IPv4 header. Options, if any, follow it.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Ipv4Hdr {
    pub version_ihl: u8,
    pub tos: u8,
    pub total_len: [u8; 2],
    pub id: [u8; 2],
    pub frag_off: [u8; 2],
    pub ttl: u8,
    pub protocol: u8,
    pub check: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

unsafe impl Header for Ipv4Hdr {}

impl Ipv4Hdr {
    #[inline(always)]
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Declared header length in bytes (`ihl * 4`), at most 60.
    #[inline(always)]
    pub fn header_len(&self) -> usize {
        ((self.version_ihl & 0x0f) as usize) * 4
    }

    #[inline(always)]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    #[inline(always)]
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes(self.frag_off) & IPV4_FRAG_OFFSET_MASK
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct TcpHdr {
    pub source: [u8; 2],
    pub dest: [u8; 2],
    pub seq: [u8; 4],
    pub ack_seq: [u8; 4],
    pub off_flags: [u8; 2],
    pub window: [u8; 2],
    pub check: [u8; 2],
    pub urg_ptr: [u8; 2],
}

unsafe impl Header for TcpHdr {}

impl TcpHdr {
    #[inline(always)]
    pub fn source_port(&self) -> u16 {
        network_to_host_port(u16::from_ne_bytes(self.source))
    }

    #[inline(always)]
    pub fn dest_port(&self) -> u16 {
        network_to_host_port(u16::from_ne_bytes(self.dest))
    }
}

pub const ETH_HDR_LEN: usize = EthHdr::LEN;
pub const IPV4_MIN_HDR_LEN: usize = Ipv4Hdr::LEN;
pub const TCP_HDR_LEN: usize = TcpHdr::LEN;

/// Shortest frame that can carry a classifiable TCP/IPv4 segment.
pub const MIN_CLASSIFIABLE_LEN: usize = ETH_HDR_LEN + IPV4_MIN_HDR_LEN + TCP_HDR_LEN;

const _: () = assert!(ETH_HDR_LEN == 14);
const _: () = assert!(IPV4_MIN_HDR_LEN == 20);
const _: () = assert!(TCP_HDR_LEN == 20);
const _: () = assert!(mem::align_of::<EthHdr>() == 1);
const _: () = assert!(mem::align_of::<Ipv4Hdr>() == 1);
const _: () = assert!(mem::align_of::<TcpHdr>() == 1);
