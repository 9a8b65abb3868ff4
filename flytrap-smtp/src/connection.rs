use std::{fmt::Write, fs::File, io::BufReader, sync::Arc};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{
    rustls::{
        pki_types::{CertificateDer, PrivateKeyDer},
        ServerConfig,
    },
    server::TlsStream,
    TlsAcceptor,
};

use crate::error::{ConnectionError, ConnectionResult, TlsError, TlsResult};
use crate::session::TlsContext;

/// Longest request line accepted before the connection is dropped.
const MAX_LINE: usize = 8192;

/// Bytes not yet consumed as lines. Replaced wholesale on TLS upgrade so
/// that nothing a client pipelined past STARTTLS survives the handshake.
#[derive(Default)]
pub struct ReadBuffer {
    pending: Vec<u8>,
}

impl ReadBuffer {
    /// Pop one line (terminator included) off the front of the buffer.
    fn take_line(&mut self) -> ConnectionResult<Option<Vec<u8>>> {
        if let Some(idx) = self.pending.iter().position(|&b| b == b'\n') {
            let line = self.pending.drain(..=idx).collect();
            return Ok(Some(line));
        }

        if self.pending.len() > MAX_LINE {
            return Err(ConnectionError::LineTooLong(MAX_LINE));
        }

        Ok(None)
    }
}

pub enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    Plain {
        stream: Stream,
        buffer: ReadBuffer,
    },
    Tls {
        stream: Box<TlsStream<Stream>>,
        buffer: ReadBuffer,
    },
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Connection<Stream> {
    pub fn plain(stream: Stream) -> Self {
        Self::Plain {
            stream,
            buffer: ReadBuffer::default(),
        }
    }

    pub fn tls(stream: TlsStream<Stream>) -> Self {
        Self::Tls {
            stream: Box::new(stream),
            buffer: ReadBuffer::default(),
        }
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// Write one reply line, appending the CRLF the wire expects.
    pub async fn send<S: core::fmt::Display + Send + Sync>(
        &mut self,
        reply: &S,
    ) -> ConnectionResult<usize> {
        // Format the reply to a stack-allocated buffer; SMTP reply lines are
        // bounded well below this.
        let mut buffer = arrayvec::ArrayString::<512>::new();
        write!(&mut buffer, "{reply}\r\n")?;

        Ok(match self {
            Self::Plain { stream, .. } => stream
                .write_all(buffer.as_bytes())
                .await
                .map(|()| buffer.len())?,
            Self::Tls { stream, .. } => stream
                .write_all(buffer.as_bytes())
                .await
                .map(|()| buffer.len())?,
        })
    }

    /// Read one raw line, terminator included.
    ///
    /// Returns `None` at end of stream. A partial line at EOF is discarded:
    /// a client that hangs up mid-command has nothing left to say.
    pub async fn read_line(&mut self) -> ConnectionResult<Option<Vec<u8>>> {
        let mut chunk = [0u8; 4096];

        loop {
            if let Some(line) = self.buffer_mut().take_line()? {
                return Ok(Some(line));
            }

            let read = match self {
                Self::Plain { stream, .. } => stream.read(&mut chunk).await?,
                Self::Tls { stream, .. } => stream.read(&mut chunk).await?,
            };

            if read == 0 {
                return Ok(None);
            }

            self.buffer_mut().pending.extend_from_slice(&chunk[..read]);
        }
    }

    fn buffer_mut(&mut self) -> &mut ReadBuffer {
        match self {
            Self::Plain { buffer, .. } | Self::Tls { buffer, .. } => buffer,
        }
    }

    fn load_certs<P: AsRef<std::path::Path>>(
        path: &P,
    ) -> std::io::Result<Vec<CertificateDer<'static>>> {
        rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).collect()
    }

    fn load_keys<P: AsRef<std::path::Path>>(path: &P) -> TlsResult<PrivateKeyDer<'static>> {
        let path_str = path.as_ref().display().to_string();
        let mut reader = BufReader::new(File::open(path).map_err(|e| TlsError::KeyLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })?);

        match rustls_pemfile::read_one(&mut reader).map_err(|e| TlsError::KeyLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
            _ => Err(TlsError::KeyLoad {
                path: path_str,
                reason: "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)"
                    .to_string(),
            }),
        }
    }

    /// Build a server-side acceptor from the configured key material.
    pub fn acceptor(tls_context: &TlsContext) -> TlsResult<TlsAcceptor> {
        let certs =
            Self::load_certs(&tls_context.certificate).map_err(|e| TlsError::CertificateLoad {
                path: tls_context.certificate.display().to_string(),
                source: e,
            })?;
        let key = Self::load_keys(&tls_context.key)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    /// Perform the STARTTLS server handshake and rebuild the connection on
    /// top of the encrypted stream. Whatever the old buffer still held is
    /// dropped with it.
    pub async fn upgrade(self, tls_context: &TlsContext) -> TlsResult<Self> {
        let acceptor = Self::acceptor(tls_context)?;

        match self {
            Self::Plain { stream, .. } => {
                let stream = acceptor.accept(stream).await?;
                Ok(Self::tls(stream))
            }
            Self::Tls { .. } => Err(TlsError::AlreadyTls),
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::Connection;

    #[tokio::test]
    async fn reads_buffered_lines_one_at_a_time() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut connection = Connection::plain(server);

        client.write_all(b"HELO a\r\nNOOP\r\n").await.unwrap();

        assert_eq!(
            connection.read_line().await.unwrap().unwrap(),
            b"HELO a\r\n"
        );
        assert_eq!(connection.read_line().await.unwrap().unwrap(), b"NOOP\r\n");

        drop(client);
        assert!(connection.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_line_at_eof_is_discarded() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut connection = Connection::plain(server);

        client.write_all(b"QUIT").await.unwrap();
        drop(client);

        assert!(connection.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlong_line_is_a_transport_error() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let mut connection = Connection::plain(server);

        client.write_all(&vec![b'a'; 10_000]).await.unwrap();

        assert!(connection.read_line().await.is_err());
    }

    #[tokio::test]
    async fn send_appends_crlf() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut connection = Connection::plain(server);

        connection.send(&"220 localhost ESMTP").await.unwrap();

        let mut buf = [0u8; 64];
        let read = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..read], b"220 localhost ESMTP\r\n");
    }
}
