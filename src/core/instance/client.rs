// src/core/instance/client.rs

//! A small asynchronous client for the admin agent that runs next to each
//! member. One session is one TCP (optionally TLS) connection.

use super::stream::AgentStream;
use super::{
    Address, Connector, Credentials, InstanceReport, InstanceSession, Result, SystemVariable,
    TlsMode,
};
use crate::core::errors::ClusterAdminError;
use crate::core::metadata::{CatalogChange, CatalogSnapshot};
use crate::core::protocol::{Frame, FrameCodec};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, rustls};
use tokio_util::codec::Framed;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens [`RespSession`]s.
#[derive(Debug, Clone)]
pub struct RespConnector {
    read_timeout: Duration,
}

impl RespConnector {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for RespConnector {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

#[async_trait]
impl Connector for RespConnector {
    async fn connect(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> Result<Box<dyn InstanceSession>> {
        let session = RespSession::connect(address, credentials, self.read_timeout).await?;
        Ok(Box::new(session))
    }
}

pub struct RespSession {
    address: Address,
    framed: Framed<AgentStream, FrameCodec>,
    read_timeout: Duration,
}

impl RespSession {
    /// Connects, optionally upgrades to TLS, and authenticates.
    pub async fn connect(
        address: &Address,
        credentials: &Credentials,
        read_timeout: Duration,
    ) -> Result<Self> {
        let tcp = TcpStream::connect((address.host(), address.port())).await?;

        let stream = match credentials.tls {
            TlsMode::Disabled => AgentStream::Tcp(tcp),
            TlsMode::Required | TlsMode::VerifyCa => {
                let connector = tls_connector(credentials).await?;
                let domain = rustls::pki_types::ServerName::try_from(address.host())
                    .map_err(|_| {
                        ClusterAdminError::Protocol(format!(
                            "'{}' is not a valid TLS server name",
                            address.host()
                        ))
                    })?
                    .to_owned();
                let tls = connector.connect(domain, tcp).await?;
                AgentStream::Tls(Box::new(tls))
            }
        };

        let mut session = Self {
            address: address.clone(),
            framed: Framed::new(stream, FrameCodec),
            read_timeout,
        };

        let reply = session
            .call(vec![
                "AUTH".to_string(),
                credentials.user.clone(),
                credentials.password.clone(),
            ])
            .await
            .map_err(|e| match e {
                ClusterAdminError::NotAuthorized { .. } => ClusterAdminError::NotAuthorized {
                    user: credentials.user.clone(),
                    address: address.to_string(),
                },
                other => other,
            })?;
        session.expect_ok(reply)?;
        debug!("Authenticated to admin agent at {}", address);
        Ok(session)
    }

    /// Sends one command and waits for exactly one reply frame.
    async fn call(&mut self, words: Vec<String>) -> Result<Frame> {
        self.framed.send(Frame::command(words)).await?;

        let next = tokio::time::timeout(self.read_timeout, self.framed.next())
            .await
            .map_err(|_| {
                ClusterAdminError::Timeout(format!("waiting for a reply from {}", self.address))
            })?;

        match next {
            None => Err(ClusterAdminError::Io(Arc::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection to {} closed by peer", self.address),
            )))),
            Some(Err(e)) => Err(e),
            Some(Ok(Frame::Error(message))) => Err(self.map_error_reply(message)),
            Some(Ok(frame)) => Ok(frame),
        }
    }

    fn map_error_reply(&self, message: String) -> ClusterAdminError {
        if message.starts_with("WRONGPASS") || message.starts_with("NOAUTH") {
            ClusterAdminError::NotAuthorized {
                user: String::new(),
                address: self.address.to_string(),
            }
        } else {
            ClusterAdminError::instance(&self.address, message)
        }
    }

    fn expect_ok(&self, reply: Frame) -> Result<()> {
        match reply {
            Frame::Simple(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
            other => Err(ClusterAdminError::Protocol(format!(
                "{} replied {other:?} where OK was expected",
                self.address
            ))),
        }
    }

    fn expect_bulk(&self, reply: Frame) -> Result<bytes::Bytes> {
        match reply {
            Frame::Bulk(b) => Ok(b),
            other => Err(ClusterAdminError::Protocol(format!(
                "{} replied {other:?} where a bulk payload was expected",
                self.address
            ))),
        }
    }

    fn expect_integer(&self, reply: Frame) -> Result<i64> {
        match reply {
            Frame::Integer(i) => Ok(i),
            other => Err(ClusterAdminError::Protocol(format!(
                "{} replied {other:?} where an integer was expected",
                self.address
            ))),
        }
    }
}

fn words(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

async fn tls_connector(credentials: &Credentials) -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    match &credentials.ssl_ca {
        Some(path) => {
            let pem = tokio::fs::read(path).await?;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                roots.add(cert?).map_err(|e| {
                    ClusterAdminError::Protocol(format!(
                        "invalid CA certificate in {}: {e}",
                        path.display()
                    ))
                })?;
            }
        }
        None if credentials.tls == TlsMode::VerifyCa => {
            return Err(ClusterAdminError::InvalidOptions(
                "tls = \"verify-ca\" requires ssl_ca".to_string(),
            ));
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[async_trait]
impl InstanceSession for RespSession {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn report(&mut self) -> Result<InstanceReport> {
        let reply = self.call(words(&["GROUP", "REPORT"])).await?;
        let payload = self.expect_bulk(reply)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    async fn read_catalog(&mut self) -> Result<Option<CatalogSnapshot>> {
        match self.call(words(&["CATALOG", "READ"])).await? {
            Frame::Null => Ok(None),
            reply => {
                let payload = self.expect_bulk(reply)?;
                Ok(Some(serde_json::from_slice(&payload)?))
            }
        }
    }

    async fn apply_catalog_change(&mut self, change: &CatalogChange) -> Result<()> {
        let payload = serde_json::to_string(change)?;
        let reply = self
            .call(vec!["CATALOG".into(), "APPLY".into(), payload])
            .await?;
        self.expect_ok(reply)
    }

    async fn try_lock(&mut self, name: &str, holder: Uuid, wait: Duration) -> Result<bool> {
        let reply = self
            .call(vec![
                "LOCK".into(),
                "ACQUIRE".into(),
                name.to_string(),
                holder.to_string(),
                wait.as_millis().to_string(),
            ])
            .await?;
        Ok(self.expect_integer(reply)? == 1)
    }

    async fn release_lock(&mut self, name: &str, holder: Uuid) -> Result<()> {
        let reply = self
            .call(vec![
                "LOCK".into(),
                "RELEASE".into(),
                name.to_string(),
                holder.to_string(),
            ])
            .await?;
        self.expect_integer(reply).map(|_| ())
    }

    async fn set_global(&mut self, variable: SystemVariable, value: &str) -> Result<()> {
        let reply = self
            .call(vec![
                "SETGLOBAL".into(),
                variable.to_string(),
                value.to_string(),
            ])
            .await?;
        self.expect_ok(reply)
    }

    async fn start_group_replication(&mut self) -> Result<()> {
        let reply = self.call(words(&["GROUP", "START"])).await?;
        self.expect_ok(reply)
    }

    async fn stop_group_replication(&mut self) -> Result<()> {
        let reply = self.call(words(&["GROUP", "STOP"])).await?;
        self.expect_ok(reply)
    }

    async fn close(&mut self) -> Result<()> {
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}
