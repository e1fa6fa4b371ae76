//! Destination addresses as carried in SOCKS5 requests and tunnel headers.
//!
//! The address capsule is `ATYP(1) + [len(1) if domain] + address`, with the
//! port kept separate as 2 big-endian bytes.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};

/// SOCKS5 address type tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// 4-byte IPv4 address
    Ipv4 = 0x01,
    /// Length-prefixed host name
    Domain = 0x03,
    /// 16-byte IPv6 address
    Ipv6 = 0x04,
}

impl TryFrom<u8> for AddressType {
    type Error = ProtocolError;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::Ipv4),
            0x03 => Ok(Self::Domain),
            0x04 => Ok(Self::Ipv6),
            other => Err(ProtocolError::UnsupportedAddressType(other)),
        }
    }
}

/// Destination host as requested by the local client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 literal
    Ipv4(Ipv4Addr),
    /// Host name bytes exactly as received (not required to be UTF-8)
    Domain(Vec<u8>),
    /// IPv6 literal
    Ipv6(Ipv6Addr),
}

impl Address {
    /// Type tag of this address.
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Ipv4(_) => AddressType::Ipv4,
            Address::Domain(_) => AddressType::Domain,
            Address::Ipv6(_) => AddressType::Ipv6,
        }
    }

    /// Read the type-specific address payload that follows an ATYP byte.
    pub async fn read_from<R>(reader: &mut R, atyp: AddressType) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        match atyp {
            AddressType::Ipv4 => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await?;
                Ok(Address::Ipv4(Ipv4Addr::from(octets)))
            }
            AddressType::Domain => {
                let len = reader.read_u8().await? as usize;
                let mut name = vec![0u8; len];
                reader.read_exact(&mut name).await?;
                Ok(Address::Domain(name))
            }
            AddressType::Ipv6 => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await?;
                Ok(Address::Ipv6(Ipv6Addr::from(octets)))
            }
        }
    }

    /// Encode as `ATYP + [len] + address`.
    pub fn capsule(&self) -> Vec<u8> {
        match self {
            Address::Ipv4(ip) => {
                let mut buf = Vec::with_capacity(5);
                buf.push(AddressType::Ipv4 as u8);
                buf.extend_from_slice(&ip.octets());
                buf
            }
            Address::Domain(name) => {
                let mut buf = Vec::with_capacity(2 + name.len());
                buf.push(AddressType::Domain as u8);
                // Names are read with a 1-byte length, so they always fit
                buf.push(name.len() as u8);
                buf.extend_from_slice(name);
                buf
            }
            Address::Ipv6(ip) => {
                let mut buf = Vec::with_capacity(17);
                buf.push(AddressType::Ipv6 as u8);
                buf.extend_from_slice(&ip.octets());
                buf
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{}", ip),
            Address::Domain(name) => write!(f, "{}", String::from_utf8_lossy(name)),
            Address::Ipv6(ip) => write!(f, "[{}]", ip),
        }
    }
}

/// Address plus port requested by a CONNECT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Destination host
    pub address: Address,
    /// Destination port
    pub port: u16,
}

impl Destination {
    /// Create a destination.
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    /// Address capsule sent ahead of the port in the tunnel header.
    pub fn address_capsule(&self) -> Vec<u8> {
        self.address.capsule()
    }

    /// Port in network byte order.
    pub fn port_bytes(&self) -> [u8; 2] {
        self.port.to_be_bytes()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
