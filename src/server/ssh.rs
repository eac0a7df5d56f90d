//! SSH transport.
//!
//! An SSH-2 server front end for the BBS. The SSH layer requires no real
//! authentication - `none` and `password` are both accepted, and password
//! credentials are only captured so the login script can pre-fill them - the
//! BBS runs its own login screen. Host keys are an Ed25519 key plus a 4096-bit
//! RSA key for legacy terminal clients (SyncTerm and friends), generated on
//! first run.
//!
//! Connections are grouped by remote IP for an adaptive slowdown: a burst of
//! reconnects earns growing delays and eventually a hard drop.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use rand::rngs::OsRng;
use russh::keys::ssh_key;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Preferred};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::logutil::clean_for_log;
use crate::script::PreAuth;

const SERVER_ID: &str = "SSH-2.0-TwilightBBS";
const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(20);

/// Read side of an accepted SSH shell: channel data is pushed here by the
/// protocol handler and drained byte-wise by the terminal.
pub struct SshReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buf: std::collections::VecDeque<u8>,
}

impl SshReader {
    fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        SshReader {
            rx,
            buf: std::collections::VecDeque::new(),
        }
    }

    pub async fn read_byte(&mut self) -> io::Result<u8> {
        loop {
            if let Some(b) = self.buf.pop_front() {
                return Ok(b);
            }
            match self.rx.recv().await {
                Some(chunk) => self.buf.extend(chunk),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "ssh channel closed",
                    ))
                }
            }
        }
    }
}

/// Write side of an accepted SSH shell. Cloneable; writes go through the
/// session handle.
#[derive(Clone)]
pub struct SshWriter {
    handle: server::Handle,
    channel: ChannelId,
}

impl SshWriter {
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "ssh channel closed"))
    }

    pub async fn close(&self) {
        let _ = self.handle.close(self.channel).await;
    }
}

/// A fully negotiated SSH shell, ready to be wrapped in a terminal and given
/// a node.
pub struct IncomingSsh {
    pub reader: SshReader,
    pub writer: SshWriter,
    pub width: u16,
    pub height: u16,
    pub term_type: String,
    pub remote: String,
    pub preauth: PreAuth,
}

/// Per-remote-host adaptive slowdown. Within a rolling 10-second window the
/// first three connections are free; each one after that waits 250 ms per
/// attempt up to 5 s. More than 30 attempts inside 30 s drops the
/// connection outright. Counters reset after 30 s of quiet.
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Attempt>>,
}

struct Attempt {
    last: Instant,
    count: u32,
}

const RATE_WINDOW: Duration = Duration::from_secs(10);
const RATE_RESET_AFTER: Duration = Duration::from_secs(30);
const RATE_MAX_COUNT: u32 = 30;
const RATE_STEP: Duration = Duration::from_millis(250);
const RATE_MAX_DELAY: Duration = Duration::from_secs(5);
const RATE_FREE_ATTEMPTS: u32 = 3;

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter {
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter::default()
    }

    /// Some(delay) admits the connection after the delay; None drops it.
    pub fn check(&self, host: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap();

        let a = attempts.entry(host.to_string()).or_insert(Attempt {
            last: now,
            count: 0,
        });

        if now.duration_since(a.last) > RATE_RESET_AFTER {
            a.count = 0;
        }
        if now.duration_since(a.last) <= RATE_WINDOW {
            a.count += 1;
        } else {
            a.count = 1;
        }
        a.last = now;

        if a.count > RATE_MAX_COUNT {
            return None;
        }
        if a.count <= RATE_FREE_ATTEMPTS {
            return Some(Duration::ZERO);
        }
        Some(((a.count - RATE_FREE_ATTEMPTS) * RATE_STEP).min(RATE_MAX_DELAY))
    }
}

/// Load the Ed25519 and RSA host keys, generating any that are missing.
/// Fresh keys are written mode 0600 into a directory created mode 0700.
pub fn load_or_generate_host_keys(primary_path: &Path) -> Result<Vec<ssh_key::PrivateKey>> {
    ensure_key_dir(primary_path)?;

    let mut keys = Vec::with_capacity(2);

    keys.push(load_or_generate(primary_path, || {
        ssh_key::PrivateKey::random(&mut OsRng, ssh_key::Algorithm::Ed25519)
            .map_err(|e| anyhow!("generate ed25519 key: {}", e))
    })?);

    let rsa_path = rsa_key_path(primary_path);
    keys.push(load_or_generate(&rsa_path, || {
        let pair = ssh_key::private::RsaKeypair::random(&mut OsRng, 4096)
            .map_err(|e| anyhow!("generate rsa key: {}", e))?;
        ssh_key::PrivateKey::new(ssh_key::private::KeypairData::Rsa(pair), "twilightbbs")
            .map_err(|e| anyhow!("wrap rsa key: {}", e))
    })?);

    Ok(keys)
}

fn rsa_key_path(primary: &Path) -> PathBuf {
    let mut s = primary.as_os_str().to_os_string();
    s.push("_rsa");
    PathBuf::from(s)
}

/// Host key algorithms to advertise for the loaded keys. Modern stacks only
/// offer rsa-sha2-256/512 for RSA keys; SyncTerm's libssh2 only understands
/// ssh-rsa, so the RSA key is advertised under the legacy name as well.
fn advertised_key_algorithms(keys: &[ssh_key::PrivateKey]) -> Vec<ssh_key::Algorithm> {
    keys.iter()
        .flat_map(|key| expand_key_algorithm(key.algorithm()))
        .collect()
}

fn expand_key_algorithm(algo: ssh_key::Algorithm) -> Vec<ssh_key::Algorithm> {
    match algo {
        ssh_key::Algorithm::Rsa { .. } => vec![
            ssh_key::Algorithm::Rsa {
                hash: Some(ssh_key::HashAlg::Sha512),
            },
            ssh_key::Algorithm::Rsa {
                hash: Some(ssh_key::HashAlg::Sha256),
            },
            // Legacy ssh-rsa for SyncTerm/libssh2.
            ssh_key::Algorithm::Rsa { hash: None },
        ],
        other => vec![other],
    }
}

fn ensure_key_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context("create key dir")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }
    }
    Ok(())
}

fn load_or_generate(
    path: &Path,
    generate: impl FnOnce() -> Result<ssh_key::PrivateKey>,
) -> Result<ssh_key::PrivateKey> {
    if path.exists() {
        let key = russh::keys::load_secret_key(path, None)
            .map_err(|e| anyhow!("parse host key {}: {}", path.display(), e))?;
        info!(
            "SSH: loaded host key from {} ({})",
            path.display(),
            key.algorithm()
        );
        return Ok(key);
    }

    let key = generate()?;
    let pem = key
        .to_openssh(ssh_key::LineEnding::LF)
        .map_err(|e| anyhow!("encode host key: {}", e))?;
    std::fs::write(path, pem.as_bytes())
        .map_err(|e| anyhow!("write host key {}: {}", path.display(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    info!(
        "SSH: generated new host key at {} ({})",
        path.display(),
        key.algorithm()
    );
    Ok(key)
}

/// Accept SSH connections on `port` and hand negotiated shells to the
/// session channel. Runs until the listener fails.
pub async fn serve(
    port: u16,
    host_key_path: PathBuf,
    sessions_tx: mpsc::UnboundedSender<IncomingSsh>,
) -> Result<()> {
    let keys = load_or_generate_host_keys(&host_key_path)?;
    let key_algorithms = advertised_key_algorithms(&keys);

    let config = Arc::new(server::Config {
        server_id: russh::SshId::Standard(SERVER_ID.to_string()),
        keys,
        inactivity_timeout: Some(Duration::from_secs(3600)),
        auth_rejection_time: Duration::from_secs(3),
        auth_rejection_time_initial: Some(Duration::ZERO),
        preferred: Preferred {
            // Keep the legacy DH groups so old BBS terminal software
            // (SyncTerm/libssh2) still negotiates.
            kex: Cow::Borrowed(&[
                russh::kex::CURVE25519,
                russh::kex::DH_G14_SHA256,
                russh::kex::DH_G16_SHA512,
                russh::kex::DH_G14_SHA1,
                russh::kex::DH_G1_SHA1,
            ]),
            key: Cow::Owned(key_algorithms),
            ..Preferred::default()
        },
        ..Default::default()
    });

    let limiter = Arc::new(RateLimiter::new());
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| anyhow!("listen :{}: {}", port, e))?;

    info!("SSH server listening on :{}", port);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("SSH accept error: {}", e);
                continue;
            }
        };

        let delay = match limiter.check(&peer.ip().to_string()) {
            Some(d) => d,
            None => {
                warn!("SSH: dropping flooding host {}", peer.ip());
                continue;
            }
        };

        let config = config.clone();
        let sessions_tx = sessions_tx.clone();
        tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }

            let handler = SshHandler::new(sessions_tx, peer.to_string());
            let handshake = tokio::time::timeout(
                HANDSHAKE_DEADLINE,
                server::run_stream(config, stream, handler),
            );
            match handshake.await {
                Ok(Ok(session)) => {
                    if let Err(e) = session.await {
                        info!("SSH session from {} ended: {}", peer, e);
                    }
                }
                Ok(Err(e)) => {
                    warn!("SSH handshake failed from {}: {}", peer, e);
                }
                Err(_) => {
                    warn!("SSH handshake timed out from {}", peer);
                }
            }
        });
    }
}

/// Protocol handler for one SSH connection.
pub struct SshHandler {
    sessions_tx: mpsc::UnboundedSender<IncomingSsh>,
    remote: String,
    width: u16,
    height: u16,
    term_type: String,
    preauth: PreAuth,
    input_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    input_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl SshHandler {
    fn new(sessions_tx: mpsc::UnboundedSender<IncomingSsh>, remote: String) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        SshHandler {
            sessions_tx,
            remote,
            width: 80,
            height: 24,
            term_type: "xterm".to_string(),
            preauth: PreAuth::default(),
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
        }
    }
}

#[async_trait::async_trait]
impl server::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        self.preauth.username = user.to_string();
        Ok(Auth::Accept)
    }

    // Accept all passwords at the SSH level; the BBS login menu does the real
    // authentication. The credentials are kept for script pre-fill.
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.preauth = PreAuth {
            username: user.to_string(),
            password: password.to_string(),
        };
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.term_type = term.to_string();
        self.width = col_width.min(u16::MAX as u32) as u16;
        self.height = row_height.min(u16::MAX as u32) as u16;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow!("shell already started"))?;

        info!(
            "SSH connection from {} (user: {})",
            self.remote,
            clean_for_log(&self.preauth.username)
        );

        let incoming = IncomingSsh {
            reader: SshReader::new(rx),
            writer: SshWriter {
                handle: session.handle(),
                channel,
            },
            width: self.width,
            height: self.height,
            term_type: self.term_type.clone(),
            remote: self.remote.clone(),
            preauth: self.preauth.clone(),
        };
        self.sessions_tx
            .send(incoming)
            .map_err(|_| anyhow!("session intake closed"))?;
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = &self.input_tx {
            let _ = tx.send(data.to_vec());
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.width = col_width.min(u16::MAX as u32) as u16;
        self.height = row_height.min(u16::MAX as u32) as u16;
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the sender lets the session reader drain out.
        self.input_tx = None;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.input_tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_thresholds() {
        let limiter = RateLimiter::new();

        // First three attempts in the window are free.
        for _ in 0..3 {
            assert_eq!(limiter.check("10.0.0.1"), Some(Duration::ZERO));
        }
        // Fourth waits one step, fifth two.
        assert_eq!(limiter.check("10.0.0.1"), Some(Duration::from_millis(250)));
        assert_eq!(limiter.check("10.0.0.1"), Some(Duration::from_millis(500)));

        // Delay caps at five seconds...
        for _ in 6..=30 {
            let delay = limiter.check("10.0.0.1").expect("still admitted");
            assert!(delay <= Duration::from_secs(5));
        }
        // ...and attempt 31 is dropped.
        assert_eq!(limiter.check("10.0.0.1"), None);
    }

    #[test]
    fn rate_limiter_tracks_hosts_independently() {
        let limiter = RateLimiter::new();
        for _ in 0..10 {
            limiter.check("10.0.0.1");
        }
        assert_eq!(limiter.check("10.0.0.2"), Some(Duration::ZERO));
    }

    #[test]
    fn rsa_path_is_sibling() {
        assert_eq!(
            rsa_key_path(Path::new("/data/ssh_host_key")),
            PathBuf::from("/data/ssh_host_key_rsa")
        );
    }

    #[test]
    fn rsa_key_advertises_legacy_ssh_rsa() {
        let names: Vec<String> = expand_key_algorithm(ssh_key::Algorithm::Rsa {
            hash: Some(ssh_key::HashAlg::Sha256),
        })
        .iter()
        .map(|a| a.to_string())
        .collect();
        assert_eq!(names, vec!["rsa-sha2-512", "rsa-sha2-256", "ssh-rsa"]);
    }

    #[test]
    fn non_rsa_keys_advertise_themselves_only() {
        let names: Vec<String> = expand_key_algorithm(ssh_key::Algorithm::Ed25519)
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(names, vec!["ssh-ed25519"]);
    }
}
