//! Listeners and session wiring.
//!
//! [`BbsServer`] owns the shared services (repositories, chat broker, door
//! launcher, menu registry, node manager) and runs three listeners: Telnet,
//! SSH and the HTTP health endpoint. Every accepted connection becomes a
//! task; the node manager gates how many run at once.

pub mod ssh;
pub mod telnet;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::{routing::get, Router};
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::art::Loader;
use crate::chat::Broker;
use crate::config::Config;
use crate::door::Launcher;
use crate::filearea::FileRepo;
use crate::menu::engine::{start_menu_for, Engine};
use crate::menu::Registry;
use crate::message::MessageRepo;
use crate::node::NodeManager;
use crate::script::{PreAuth, ScriptCtx};
use crate::terminal::{LinkReader, Terminal, TermWriter};
use crate::user::UserRepo;

/// How long to wait for the telnet client to answer the NAWS/TTYPE offers
/// before wrapping the connection in a terminal.
const NEGOTIATION_WINDOW: Duration = Duration::from_millis(300);

struct Shared {
    config: Config,
    users: UserRepo,
    messages: MessageRepo,
    files: FileRepo,
    broker: Arc<Broker>,
    launcher: Arc<Launcher>,
    registry: Arc<Registry>,
    loader: Loader,
    manager: Arc<NodeManager>,
    // Keeps the database open for the lifetime of the server.
    _db: sled::Db,
}

/// The BBS server: shared services plus the listener loops.
pub struct BbsServer {
    shared: Arc<Shared>,
}

impl BbsServer {
    /// Open storage, seed defaults, and scan the menu directories.
    pub async fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.paths.data)
            .map_err(|e| anyhow!("create data directory {}: {}", config.paths.data, e))?;

        let db_path = PathBuf::from(&config.paths.data).join("twilight.db");
        let db = sled::open(&db_path)
            .map_err(|e| anyhow!("open database {}: {}", db_path.display(), e))?;
        info!("Database opened: {}", db_path.display());

        let users = UserRepo::open(&db)?;
        let messages = MessageRepo::open(&db)?;
        let files = FileRepo::open(&db)?;
        messages.seed_defaults()?;
        files.seed_defaults()?;

        let broker = Arc::new(Broker::new());
        let launcher = Arc::new(Launcher::new(
            &config.door_engine.dosemu_path,
            &config.door_engine.drive_c,
            PathBuf::from(&config.paths.data).join("doors_tmp"),
        ));

        let registry = Arc::new(Registry::new([config.paths.menus.clone()]));
        registry.scan()?;

        let loader = Loader::new([config.paths.menus.clone(), config.paths.text.clone()]);

        let manager = Arc::new(NodeManager::new(
            config.bbs.max_nodes,
            &config.bbs.name,
            &config.bbs.sysop,
        ));

        Ok(BbsServer {
            shared: Arc::new(Shared {
                config,
                users,
                messages,
                files,
                broker,
                launcher,
                registry,
                loader,
                manager,
                _db: db,
            }),
        })
    }

    /// Run all listeners until SIGINT/SIGTERM, then broadcast a shutdown
    /// notice and close every live session.
    pub async fn run(self) -> Result<()> {
        let shared = self.shared;
        let cfg = &shared.config.server;

        info!(
            "Starting {} (sysop: {})",
            shared.config.bbs.name, shared.config.bbs.sysop
        );

        // Telnet listener.
        {
            let shared = shared.clone();
            let port = cfg.telnet_port;
            tokio::spawn(async move {
                if let Err(e) = serve_telnet(shared, port).await {
                    error!("Telnet server error: {}", e);
                }
            });
        }

        // SSH listener and its session intake.
        {
            let (ssh_tx, mut ssh_rx) = mpsc::unbounded_channel::<ssh::IncomingSsh>();
            let key_path = PathBuf::from(&shared.config.paths.data).join("ssh_host_key");
            let port = cfg.ssh_port;
            tokio::spawn(async move {
                if let Err(e) = ssh::serve(port, key_path, ssh_tx).await {
                    error!("SSH server error: {}", e);
                }
            });

            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(incoming) = ssh_rx.recv().await {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        let term = Terminal::new(
                            LinkReader::Ssh(incoming.reader),
                            TermWriter::Ssh(incoming.writer),
                            incoming.width,
                            incoming.height,
                            // SSH clients are ANSI-capable in practice.
                            true,
                        );
                        run_session(shared, term, incoming.remote, incoming.preauth).await;
                    });
                }
            });
        }

        // Health endpoint.
        {
            let port = cfg.health_port;
            tokio::spawn(async move {
                if let Err(e) = serve_health(port).await {
                    error!("Health server error: {}", e);
                }
            });
        }

        info!(
            "{} is running (telnet:{} ssh:{} health:{} nodes:{})",
            shared.config.bbs.name,
            cfg.telnet_port,
            cfg.ssh_port,
            cfg.health_port,
            shared.config.bbs.max_nodes
        );

        wait_for_shutdown().await;
        info!("Received shutdown signal");

        shared
            .manager
            .broadcast("System is shutting down NOW. Goodbye!")
            .await;
        shared.manager.close_all().await;

        info!("{} shut down complete.", shared.config.bbs.name);
        Ok(())
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn serve_telnet(shared: Arc<Shared>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| anyhow!("listen :{}: {}", port, e))?;
    info!("Telnet server listening on :{}", port);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Telnet accept error: {}", e);
                continue;
            }
        };

        let shared = shared.clone();
        tokio::spawn(async move {
            match telnet::setup(stream).await {
                Ok((mut reader, writer)) => {
                    reader.collect_negotiation(NEGOTIATION_WINDOW).await;
                    let (width, height, ansi) =
                        (reader.width, reader.height, reader.ansi_capable);
                    let term = Terminal::new(
                        LinkReader::Telnet(reader),
                        TermWriter::Telnet(writer),
                        width,
                        height,
                        ansi,
                    );
                    run_session(shared, term, peer.to_string(), PreAuth::default()).await;
                }
                Err(e) => {
                    warn!("Telnet negotiation error from {}: {}", peer, e);
                }
            }
        });
    }
}

async fn serve_health(port: u16) -> Result<()> {
    let app = Router::new().route("/healthz", get(|| async { "ok" }));
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| anyhow!("listen :{}: {}", port, e))?;
    info!("Health endpoint listening on :{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

/// One connection, start to finish: slot acquisition, menu loop, cleanup.
/// Cleanup runs on every exit path - normal return, engine error, panic -
/// and always unsubscribes from the broker before closing the terminal.
async fn run_session(shared: Arc<Shared>, term: Terminal, remote: String, preauth: PreAuth) {
    let Some(node_id) = shared.manager.acquire() else {
        let _ = term
            .send_line("Sorry, all nodes are busy. Please try again later.")
            .await;
        term.close().await;
        return;
    };

    info!("Node {} connected from {}", node_id, remote);
    shared.manager.attach(node_id, &remote, term.writer());
    shared
        .broker
        .register_online(node_id, &format!("Node {}", node_id));

    let term = Arc::new(tokio::sync::Mutex::new(term));
    let ctx = ScriptCtx::new(
        node_id,
        &shared.config,
        term.clone(),
        shared.loader.clone(),
        preauth,
        Some(shared.users.clone()),
        Some(shared.messages.clone()),
        Some(shared.files.clone()),
        Some(shared.broker.clone()),
        Some(shared.launcher.clone()),
        Some(shared.manager.clone()),
    );

    let start = start_menu_for(&shared.registry);
    let registry = shared.registry.clone();
    let engine_ctx = ctx.clone();

    // The inner task is the panic boundary: a scripting or engine panic is
    // logged and the session cleaned up, not the whole server.
    let outcome = tokio::spawn(async move {
        let mut engine = Engine::new(registry, engine_ctx);
        engine.run(&start).await
    })
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Node {} menu engine error: {}", node_id, e),
        Err(e) if e.is_panic() => error!("Node {} panicked: {}", node_id, e),
        Err(_) => {}
    }

    shared.broker.unsubscribe(node_id);
    shared.broker.unregister_online(node_id);
    shared.manager.release(node_id);
    {
        let t = term.lock().await;
        t.close().await;
    }
    info!("Node {} disconnected ({})", node_id, remote);
}
