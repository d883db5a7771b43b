//! bb8 connection pool over tiberius.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::Pool;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Result, SyncError};

use super::connection::MssqlConnection;

/// Pooled tiberius client.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

/// Enable TCP keepalives on a freshly connected socket.
fn with_keepalive(tcp: TcpStream) -> std::result::Result<TcpStream, tiberius::error::Error> {
    let std_tcp = tcp.into_std().map_err(|e| io_error(e, "detaching socket"))?;
    let socket = socket2::Socket::from(std_tcp);

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_INTERVAL)
        .with_interval(TCP_KEEPALIVE_INTERVAL);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
    }

    let std_tcp: std::net::TcpStream = socket.into();
    std_tcp
        .set_nonblocking(true)
        .map_err(|e| io_error(e, "restoring non-blocking mode"))?;
    TcpStream::from_std(std_tcp).map_err(|e| io_error(e, "converting socket"))
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error(e, "connecting"))?;
        tcp.set_nodelay(true).ok();

        let tcp = with_keepalive(tcp)?;
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Pool for one database plus the statement timeout its connections use.
#[derive(Clone)]
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
    command_timeout: Option<Duration>,
    endpoint: String,
}

impl MssqlPool {
    /// Build the pool and prove it can reach the server.
    pub async fn connect(
        config: &ConnectionConfig,
        command_timeout: Option<Duration>,
        role: &str,
    ) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| SyncError::pool(e, format!("creating {} pool", role)))?;

        let this = Self {
            pool,
            command_timeout,
            endpoint: config.endpoint(),
        };
        this.ping().await?;

        info!(
            "Connected to {} {} (pool_size={})",
            role, this.endpoint, config.max_connections
        );
        Ok(this)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    pub(crate) fn inner(&self) -> &Pool<TiberiusConnectionManager> {
        &self.pool
    }

    /// Check out a connection for the lifetime of a job.
    pub async fn connection(&self) -> Result<MssqlConnection> {
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| SyncError::pool(e, format!("getting connection to {}", self.endpoint)))?;
        Ok(MssqlConnection::new(conn, self.command_timeout))
    }

    /// Round trip `SELECT 1`, returning the latency.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, format!("testing connection to {}", self.endpoint)))?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(started.elapsed())
    }
}
