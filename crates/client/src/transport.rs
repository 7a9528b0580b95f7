//! Transport abstraction for the reliable stream and the datagram channel.

use crate::config::{MulticastConfig, TransportProfile};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};

/// One open duplex byte channel to a server.
pub struct Channel {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

/// Opens a [`Channel`] for a given transport profile.
///
/// The session layer treats the profile's credential material as opaque;
/// a TLS-capable connector interprets [`TransportProfile::tls`] itself.
/// Connect attempts are bounded externally: when the session's attempt
/// timeout fires, the in-flight future is dropped, which releases any
/// partially opened resources.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        profile: &TransportProfile,
    ) -> impl Future<Output = io::Result<Channel>> + Send;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(
        &self,
        profile: &TransportProfile,
    ) -> impl Future<Output = io::Result<Channel>> + Send {
        let addr = format!("{}:{}", profile.host, profile.port);
        async move {
            let stream = TcpStream::connect(&addr).await?;
            stream.set_nodelay(true)?;
            let (reader, writer) = stream.into_split();
            Ok(Channel {
                reader: Box::new(reader),
                writer: Box::new(writer),
            })
        }
    }
}

/// Bind the shared datagram socket and join the configured group. The
/// same socket both receives peer traffic and sends local broadcasts.
pub async fn open_multicast(cfg: &MulticastConfig) -> io::Result<(Arc<UdpSocket>, SocketAddr)> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, cfg.port)).await?;
    sock.join_multicast_v4(cfg.group, Ipv4Addr::UNSPECIFIED)?;
    sock.set_multicast_loop_v4(false)?;
    let addr = SocketAddr::V4(SocketAddrV4::new(cfg.group, cfg.port));
    Ok((Arc::new(sock), addr))
}
