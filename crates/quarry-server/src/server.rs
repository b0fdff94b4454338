use crate::auth::AuthManager;
use crate::config::Config;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use quarry_core::{Catalog, CatalogService, ConnectionIdGenerator};
use quarry_protocol::messages::{
    ErrPacket, OkPacket, COM_CHANGE_USER, COM_INIT_DB, COM_PING, COM_QUIT, DEFAULT_CHARSET,
    ER_CON_COUNT_ERROR, ER_MALFORMED_PACKET, ER_UNKNOWN_COM_ERROR,
};
use quarry_protocol::{
    CapabilityFlags, Channel, ChangeUserHandler, HandshakeConfig, Negotiator, Outcome, Rejection,
    Session, StreamChannel, TransportError,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub async fn run(config: Config) -> anyhow::Result<()> {
    if config.metrics.enabled {
        spawn_metrics_exporter(config.metrics.listen_addr.clone())?;
    }

    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    info!("Quarry listening on {}", config.server.listen_addr);

    let frontend = Frontend::new(&config)?;
    let limiter = Arc::new(Semaphore::new(config.server.max_connections));
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
        };
        let channel = StreamChannel::new(
            socket,
            peer.ip().to_string(),
            config.server.max_allowed_packet,
        );
        let Ok(permit) = limiter.clone().try_acquire_owned() else {
            counter!("mysql_connections_refused_total").increment(1);
            warn!(peer = %peer, "connection limit reached");
            tokio::spawn(refuse_connection(channel));
            continue;
        };
        let frontend = frontend.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client(channel, &frontend).await {
                error!(peer = %peer, "connection error: {err}");
            }
            drop(permit);
        });
    }
}

fn spawn_metrics_exporter(listen_addr: String) -> anyhow::Result<()> {
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(move || async move { metrics_handle.render() }))
            .route("/health", get(|| async { "ok" }));
        let listener = match TcpListener::bind(&listen_addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("metrics listener on {listen_addr} failed: {err}");
                return;
            }
        };
        if let Err(err) = axum::serve(listener, app).await {
            error!("metrics server error: {err}");
        }
    });
    Ok(())
}

/// Everything a connection task needs; cheap to clone.
#[derive(Clone)]
struct Frontend {
    negotiator: Negotiator,
    change_user: ChangeUserHandler,
    catalog: Arc<Catalog>,
    ids: Arc<ConnectionIdGenerator>,
    audit_enabled: bool,
}

impl Frontend {
    fn new(config: &Config) -> anyhow::Result<Self> {
        let mut catalog = Catalog::new();
        for name in &config.catalog.databases {
            catalog.create_database(name)?;
        }
        for grant in &config.catalog.grants {
            for database in &grant.databases {
                catalog.grant(&grant.user, database);
            }
        }
        let catalog = Arc::new(catalog);
        let auth = Arc::new(AuthManager::new(&config.security.auth)?);
        let handshake = HandshakeConfig {
            server_version: config.server.server_version.clone(),
            capabilities: CapabilityFlags::SERVER_DEFAULT,
            charset: DEFAULT_CHARSET,
        };
        let negotiator = Negotiator::new(handshake, auth, catalog.clone());
        Ok(Self {
            change_user: negotiator.change_user_handler(),
            negotiator,
            catalog,
            ids: Arc::new(ConnectionIdGenerator::new()),
            audit_enabled: config.security.audit.enabled,
        })
    }

    fn audit(&self, session: &Session, event: &str) {
        if self.audit_enabled {
            let user = session
                .identity()
                .map(|identity| identity.to_string())
                .unwrap_or_else(|| "anonymous".into());
            info!(
                target: "audit",
                connection_id = session.connection_id(),
                user = %user,
                database = session.database().unwrap_or_default(),
                event = event
            );
        }
    }
}

/// Tells a client over the connection limit to go away. Nothing has been
/// negotiated yet, so the packet carries no SQL state.
async fn refuse_connection<C: Channel>(mut channel: C) {
    let packet = ErrPacket::new(ER_CON_COUNT_ERROR, "Too many connections");
    if let Err(err) = channel
        .send_and_flush(&packet.encode(CapabilityFlags::empty()))
        .await
    {
        debug!("refusing connection: {err}");
    }
}

async fn handle_client<C: Channel>(
    mut channel: C,
    frontend: &Frontend,
) -> Result<(), TransportError> {
    let mut session = Session::new(frontend.ids.next_id());
    counter!("mysql_connections_total").increment(1);

    let outcome = frontend.negotiator.negotiate(&mut session, &mut channel).await?;
    if let Outcome::Rejected(rejection) = outcome {
        counter!("mysql_handshake_rejected_total").increment(1);
        if frontend.audit_enabled {
            info!(
                target: "audit",
                connection_id = session.connection_id(),
                host = channel.remote_address(),
                reason = %rejection,
                event = "login_failed"
            );
        }
        return Ok(());
    }
    counter!("mysql_handshake_success_total").increment(1);
    frontend.audit(&session, "login");

    loop {
        channel.reset_sequence();
        let packet = match channel.fetch_one_packet().await {
            Ok(packet) => packet,
            Err(TransportError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        };
        let Some(&command) = packet.first() else {
            let err = ErrPacket::new(ER_MALFORMED_PACKET, "Malformed packet: empty command");
            channel
                .send_and_flush(&err.encode(session.capabilities()))
                .await?;
            continue;
        };
        counter!("mysql_command_total").increment(1);
        match command {
            COM_QUIT => {
                frontend.audit(&session, "quit");
                return Ok(());
            }
            COM_PING => {
                channel
                    .send_and_flush(&OkPacket::new().encode(session.capabilities()))
                    .await?;
            }
            COM_INIT_DB => init_db(&mut session, &mut channel, frontend, packet).await?,
            COM_CHANGE_USER => {
                let outcome = frontend
                    .change_user
                    .change_user(&mut session, &mut channel, packet)
                    .await?;
                if outcome.is_success() {
                    frontend.audit(&session, "change_user");
                } else {
                    counter!("mysql_change_user_rejected_total").increment(1);
                }
            }
            other => {
                debug!(connection_id = session.connection_id(), "unsupported command 0x{other:02x}");
                let err =
                    ErrPacket::new(ER_UNKNOWN_COM_ERROR, format!("Unknown command 0x{other:02x}"));
                channel
                    .send_and_flush(&err.encode(session.capabilities()))
                    .await?;
            }
        }
    }
}

async fn init_db<C: Channel>(
    session: &mut Session,
    channel: &mut C,
    frontend: &Frontend,
    packet: Bytes,
) -> Result<(), TransportError> {
    let name = String::from_utf8_lossy(&packet[1..]).into_owned();
    let bound = match session.identity() {
        Some(identity) => frontend
            .catalog
            .bind_database(identity, &name)
            .map_err(Rejection::DatabaseBind),
        None => Err(Rejection::NotEstablished),
    };
    match bound {
        Ok(database) => {
            session.set_database(database);
            channel
                .send_and_flush(&OkPacket::new().encode(session.capabilities()))
                .await?;
            frontend.audit(session, "init_db");
        }
        Err(rejection) => {
            debug!(connection_id = session.connection_id(), reason = %rejection, "init db rejected");
            if let Some(err) = rejection.err_packet() {
                channel
                    .send_and_flush(&err.encode(session.capabilities()))
                    .await?;
            }
        }
    }
    Ok(())
}
