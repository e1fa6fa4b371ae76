//! Client-side SOCKS5 negotiation.
//!
//! Accepts the SOCKS5 greeting and CONNECT request from a local
//! application, dials the relay server, and sends it the encrypted
//! destination header. Only "no authentication" and CONNECT are supported.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{ClientConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::crypto::{CipherPair, SharedSecret};
use crate::error::{Error, ProtocolError, Result};
use crate::proxy::address::{Address, AddressType, Destination};
use crate::proxy::relay::ConnectionPair;

/// SOCKS protocol version spoken on the local side.
pub const SOCKS_VERSION: u8 = 0x05;

/// CONNECT command code.
pub const CMD_CONNECT: u8 = 0x01;

/// "No authentication required" method.
const METHOD_NO_AUTH: u8 = 0x00;

/// SOCKS5 reply codes we emit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Tunnel established
    Succeeded = 0x00,
    /// Relay server unreachable or header write failed
    GeneralFailure = 0x01,
    /// CMD other than CONNECT
    CommandNotSupported = 0x07,
    /// Unknown or disabled ATYP
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    /// Map a protocol violation onto the reply that reports it.
    pub fn for_protocol_error(err: &ProtocolError) -> Option<Self> {
        match err.reply_code()? {
            0x07 => Some(Reply::CommandNotSupported),
            0x08 => Some(Reply::AddressTypeNotSupported),
            _ => Some(Reply::GeneralFailure),
        }
    }

    /// Fixed-form reply `{VER, REP, RSV, ATYP=1, 0.0.0.0, port 257}`.
    ///
    /// The bound address is a placeholder; local clients do not use it.
    pub fn to_bytes(self) -> [u8; 10] {
        [SOCKS_VERSION, self as u8, 0x00, 0x01, 0, 0, 0, 0, 1, 1]
    }
}

/// Outcome of a successful negotiation.
pub struct Negotiated<S> {
    /// Sockets and cipher states, ready for relaying
    pub pair: ConnectionPair<S, TcpStream>,
    /// What the local client asked to reach
    pub destination: Destination,
}

/// Runs the SOCKS5 handshake for freshly accepted local connections.
#[derive(Clone)]
pub struct Negotiator {
    remote: String,
    secret: Arc<SharedSecret>,
    allow_ipv6: bool,
    connect_timeout: Duration,
}

impl Negotiator {
    /// Negotiator that tunnels every request to `remote` (`host:port`).
    pub fn new(remote: impl Into<String>, secret: Arc<SharedSecret>) -> Self {
        Self {
            remote: remote.into(),
            secret,
            allow_ipv6: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Negotiator configured from the client configuration.
    pub fn from_config(config: &ClientConfig, secret: Arc<SharedSecret>) -> Self {
        Self::new(config.server_endpoint(), secret)
            .with_ipv6(config.allow_ipv6)
            .with_connect_timeout(config.connect_timeout)
    }

    /// Accept or reject IPv6 destinations.
    pub fn with_ipv6(mut self, allow: bool) -> Self {
        self.allow_ipv6 = allow;
        self
    }

    /// Bound the time spent dialing the relay server.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Relay server endpoint every request is tunnelled to.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Run the handshake on `local`.
    ///
    /// On failure the appropriate SOCKS5 error reply (if any) has already
    /// been written and `local` is dropped, closing it.
    pub async fn negotiate<S>(&self, mut local: S) -> Result<Negotiated<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // === Method selection ===
        let version = local.read_u8().await?;
        if version != SOCKS_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }

        let n_methods = local.read_u8().await? as usize;
        let mut methods = vec![0u8; n_methods];
        local.read_exact(&mut methods).await?;

        local.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;

        // === Request ===
        let mut req = [0u8; 4];
        local.read_exact(&mut req).await?;

        if req[0] != SOCKS_VERSION {
            return Err(ProtocolError::UnsupportedVersion(req[0]).into());
        }
        if req[1] != CMD_CONNECT {
            return Err(reject(&mut local, ProtocolError::UnsupportedCommand(req[1])).await);
        }

        let atyp = match AddressType::try_from(req[3]) {
            Ok(AddressType::Ipv6) if !self.allow_ipv6 => {
                return Err(reject(&mut local, ProtocolError::UnsupportedAddressType(req[3])).await);
            }
            Ok(atyp) => atyp,
            Err(e) => return Err(reject(&mut local, e).await),
        };

        let address = Address::read_from(&mut local, atyp).await?;
        let port = local.read_u16().await?;
        let destination = Destination::new(address, port);

        tracing::debug!("CONNECT {} via {}", destination, self.remote);

        // === Tunnel setup ===
        let mut remote = match self.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = local.write_all(&Reply::GeneralFailure.to_bytes()).await;
                return Err(e);
            }
        };

        let mut cipher = CipherPair::client(&self.secret);
        if let Err(e) = send_header(&mut remote, &mut cipher, &destination).await {
            let _ = local.write_all(&Reply::GeneralFailure.to_bytes()).await;
            return Err(e);
        }

        local.write_all(&Reply::Succeeded.to_bytes()).await?;

        Ok(Negotiated {
            pair: ConnectionPair::new(local, remote, cipher),
            destination,
        })
    }

    async fn dial(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect(self.remote.as_str());
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(Error::Connect {
                    addr: self.remote.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    addr: self.remote.clone(),
                    millis: self.connect_timeout.as_millis() as u64,
                })
            }
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Write the error reply for `err` (best effort) and hand the error back.
async fn reject<S>(local: &mut S, err: ProtocolError) -> Error
where
    S: AsyncWrite + Unpin,
{
    if let Some(reply) = Reply::for_protocol_error(&err) {
        let _ = local.write_all(&reply.to_bytes()).await;
    }
    err.into()
}

/// Encrypted `capsule ++ port`, continuing the outbound keystream.
async fn send_header<W>(remote: &mut W, cipher: &mut CipherPair, destination: &Destination) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut capsule = destination.address_capsule();
    cipher.outbound.apply_in_place(&mut capsule)?;

    let mut port = destination.port_bytes();
    cipher.outbound.apply_in_place(&mut port)?;

    remote.write_all(&capsule).await?;
    remote.write_all(&port).await?;
    remote.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::DuplexStream;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const PASSWORD: &str = "hahaha";

    fn secret() -> Arc<SharedSecret> {
        Arc::new(SharedSecret::from_password(PASSWORD).unwrap())
    }

    async fn mock_remote() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    /// Spawn the negotiator on one end of a duplex pipe; return the client end.
    fn start(negotiator: Negotiator) -> (DuplexStream, JoinHandle<Result<Negotiated<DuplexStream>>>) {
        let (client, server) = tokio::io::duplex(1024);
        let handle = tokio::spawn(async move { negotiator.negotiate(server).await });
        (client, handle)
    }

    async fn greet(client: &mut DuplexStream) {
        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);
    }

    async fn read_reply(client: &mut DuplexStream) -> [u8; 10] {
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        reply
    }

    /// Read `n` header bytes on the remote side and decrypt them.
    async fn read_header(remote: &mut TcpStream, peer: &mut CipherPair, n: usize) -> Vec<u8> {
        let mut header = vec![0u8; n];
        remote.read_exact(&mut header).await.unwrap();
        peer.inbound.decrypt(&header).unwrap()
    }

    async fn assert_closed(client: &mut DuplexStream) {
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    async fn assert_not_dialed(listener: &TcpListener) {
        let accept = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accept.is_err(), "relay server must not be dialed");
    }

    #[test]
    fn test_reply_bytes() {
        assert_eq!(Reply::Succeeded.to_bytes(), [5, 0, 0, 1, 0, 0, 0, 0, 1, 1]);
        assert_eq!(Reply::GeneralFailure.to_bytes()[1], 0x01);
        assert_eq!(
            Reply::for_protocol_error(&ProtocolError::UnsupportedCommand(2)),
            Some(Reply::CommandNotSupported)
        );
        assert_eq!(
            Reply::for_protocol_error(&ProtocolError::UnsupportedVersion(4)),
            None
        );
    }

    #[tokio::test]
    async fn test_ipv4_connect() {
        let (listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        greet(&mut client).await;
        client
            .write_all(&[5, 1, 0, 1, 93, 184, 216, 34, 0, 80])
            .await
            .unwrap();

        let (mut remote, _) = listener.accept().await.unwrap();
        let mut peer = CipherPair::peer(&secret());
        assert_eq!(read_header(&mut remote, &mut peer, 5).await, [1, 93, 184, 216, 34]);
        assert_eq!(read_header(&mut remote, &mut peer, 2).await, [0, 80]);

        assert_eq!(read_reply(&mut client).await, [5, 0, 0, 1, 0, 0, 0, 0, 1, 1]);

        let negotiated = handle.await.unwrap().unwrap();
        assert_eq!(negotiated.destination.to_string(), "93.184.216.34:80");
        assert_eq!(negotiated.pair.cipher.outbound.position(), 7);
        assert_eq!(negotiated.pair.cipher.inbound.position(), 0);
    }

    #[tokio::test]
    async fn test_domain_connect() {
        let (listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        greet(&mut client).await;
        let mut request = vec![5, 1, 0, 3, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&[0, 80]);
        client.write_all(&request).await.unwrap();

        let (mut remote, _) = listener.accept().await.unwrap();
        let mut peer = CipherPair::peer(&secret());
        let mut expected = vec![3, 11];
        expected.extend_from_slice(b"example.com");
        assert_eq!(read_header(&mut remote, &mut peer, 13).await, expected);
        assert_eq!(read_header(&mut remote, &mut peer, 2).await, [0, 80]);

        assert_eq!(read_reply(&mut client).await, Reply::Succeeded.to_bytes());
        let negotiated = handle.await.unwrap().unwrap();
        assert_eq!(negotiated.destination.to_string(), "example.com:80");
    }

    #[tokio::test]
    async fn test_method_list_is_skipped() {
        let (listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        // Three methods offered, including username/password; all ignored
        client.write_all(&[5, 3, 0, 1, 2]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);

        client.write_all(&[5, 1, 0, 1, 10, 0, 0, 1, 1, 187]).await.unwrap();
        let (_remote, _) = listener.accept().await.unwrap();
        assert_eq!(read_reply(&mut client).await, Reply::Succeeded.to_bytes());

        let negotiated = handle.await.unwrap().unwrap();
        assert_eq!(negotiated.destination.port, 443);
    }

    #[tokio::test]
    async fn test_ipv6_connect_when_allowed() {
        let (listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        greet(&mut client).await;
        let ip: std::net::Ipv6Addr = "2001:db8::7".parse().unwrap();
        let mut request = vec![5, 1, 0, 4];
        request.extend_from_slice(&ip.octets());
        request.extend_from_slice(&[0x1f, 0x90]);
        client.write_all(&request).await.unwrap();

        let (mut remote, _) = listener.accept().await.unwrap();
        let mut peer = CipherPair::peer(&secret());
        let header = read_header(&mut remote, &mut peer, 17).await;
        assert_eq!(header[0], 4);
        assert_eq!(&header[1..], &ip.octets());
        assert_eq!(read_header(&mut remote, &mut peer, 2).await, [0x1f, 0x90]);

        assert_eq!(read_reply(&mut client).await, Reply::Succeeded.to_bytes());
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_ipv6_rejected_when_disabled() {
        let (listener, addr) = mock_remote().await;
        let negotiator = Negotiator::new(addr.to_string(), secret()).with_ipv6(false);
        let (mut client, handle) = start(negotiator);

        greet(&mut client).await;
        let mut request = vec![5, 1, 0, 4];
        request.extend_from_slice(&[0u8; 16]);
        request.extend_from_slice(&[0, 80]);
        client.write_all(&request).await.unwrap();

        assert_eq!(read_reply(&mut client).await, Reply::AddressTypeNotSupported.to_bytes());
        let err = handle.await.unwrap().err().unwrap();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnsupportedAddressType(4))
        ));
        assert_closed(&mut client).await;
        assert_not_dialed(&listener).await;
    }

    #[tokio::test]
    async fn test_wrong_version_aborts_without_dial() {
        let (listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        client.write_all(&[4, 1, 0]).await.unwrap();

        let err = handle.await.unwrap().err().unwrap();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnsupportedVersion(4))
        ));
        assert_closed(&mut client).await;
        assert_not_dialed(&listener).await;
    }

    #[tokio::test]
    async fn test_unsupported_command_aborts() {
        let (listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        greet(&mut client).await;
        // BIND, followed by an address that must never be parsed
        client.write_all(&[5, 2, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap();

        assert_eq!(read_reply(&mut client).await, [5, 7, 0, 1, 0, 0, 0, 0, 1, 1]);
        let err = handle.await.unwrap().err().unwrap();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnsupportedCommand(2))
        ));
        assert_closed(&mut client).await;
        assert_not_dialed(&listener).await;
    }

    #[tokio::test]
    async fn test_unknown_address_type() {
        let (listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        greet(&mut client).await;
        client.write_all(&[5, 1, 0, 9]).await.unwrap();

        assert_eq!(read_reply(&mut client).await, Reply::AddressTypeNotSupported.to_bytes());
        assert!(handle.await.unwrap().err().unwrap().is_protocol());
        assert_not_dialed(&listener).await;
    }

    #[tokio::test]
    async fn test_dial_failure_reports_general_failure() {
        // Grab a free port, then release it so the dial is refused
        let (listener, addr) = mock_remote().await;
        drop(listener);

        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));
        greet(&mut client).await;
        client.write_all(&[5, 1, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap();

        assert_eq!(read_reply(&mut client).await, Reply::GeneralFailure.to_bytes());
        let err = handle.await.unwrap().err().unwrap();
        assert!(err.is_connection());
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_truncated_request_is_connection_error() {
        let (_listener, addr) = mock_remote().await;
        let (mut client, handle) = start(Negotiator::new(addr.to_string(), secret()));

        greet(&mut client).await;
        client.write_all(&[5, 1, 0, 3, 20, b'a']).await.unwrap();
        drop(client);

        assert!(handle.await.unwrap().err().unwrap().is_connection());
    }

    #[test]
    fn test_from_config() {
        let mut config = ClientConfig::new("relay.example.com", 8499, PASSWORD);
        config.allow_ipv6 = false;
        config.connect_timeout = Duration::from_secs(3);

        let negotiator = Negotiator::from_config(&config, secret());
        assert_eq!(negotiator.remote(), "relay.example.com:8499");
        assert!(!negotiator.allow_ipv6);
        assert_eq!(negotiator.connect_timeout, Duration::from_secs(3));
    }
}
