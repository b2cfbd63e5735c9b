// PeerPad node: host or join a PIN session on the LAN, edit a shared document from stdin,
// send files, and save to / load from the local expiring store.

mod config;
mod discovery;
mod store;
mod transport;

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use peerpad_core::protocol::DEFAULT_MIME;
use peerpad_core::{
    OutboundTransfer, OutgoingFile, RemoteStore, SessionEvent, SessionManager, SessionState,
    StoredPayload,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::store::FsStore;
use crate::transport::{TcpTransport, TransportConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: peerpad host | peerpad join <PIN> | peerpad --version";
/// Time given to writer tasks to drain after leaving.
const LINGER: std::time::Duration = std::time::Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Host,
    Join(String),
}

fn parse_args(args: &[String]) -> anyhow::Result<Mode> {
    match args {
        [cmd] if cmd == "host" => Ok(Mode::Host),
        [cmd, pin] if cmd == "join" => Ok(Mode::Join(pin.clone())),
        _ => bail!(USAGE),
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("peerpad {}", VERSION);
        return Ok(());
    }
    let mode = parse_args(&args)?;
    let cfg = config::load();
    init_logging(&cfg.log_level);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(cfg, mode))
}

/// Log to stderr; RUST_LOG wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

type Session = SessionManager<TcpTransport>;

/// A file being streamed to the peer, one chunk per free outbound slot.
struct Sending {
    transfer: OutboundTransfer,
    source: File,
}

/// What a stdin line asked for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Append(&'a str),
    Send(&'a str),
    Save,
    SaveFile(&'a str),
    Load(&'a str),
    Show,
    Status,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let Some(cmd) = line.strip_prefix('/') else {
        return Input::Append(line);
    };
    let (name, arg) = match cmd.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (cmd, ""),
    };
    match (name, arg.is_empty()) {
        ("send", false) => Input::Send(arg),
        ("save", true) => Input::Save,
        ("savefile", false) => Input::SaveFile(arg),
        ("load", false) => Input::Load(arg),
        ("show", true) => Input::Show,
        ("status", true) => Input::Status,
        ("quit", true) => Input::Quit,
        _ => Input::Unknown(line),
    }
}

async fn run(cfg: Config, mode: Mode) -> anyhow::Result<()> {
    let (transport, mut events) = TcpTransport::spawn(TransportConfig::from(&cfg));
    let mut session = SessionManager::new(transport);
    let backend = FsStore::open(&cfg.store_dir)
        .with_context(|| format!("opening store at {}", cfg.store_dir.display()))?;
    let mut store = RemoteStore::new(backend);

    match &mode {
        Mode::Host => {
            let pin = session.create_session()?;
            println!("hosting session, PIN: {pin}");
        }
        Mode::Join(pin) => {
            session.join_session(pin)?;
            println!("joining session {pin}...");
        }
    }

    let gate = session.transport().outbound_gate();
    let mut sending: Option<Sending> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            Some(ev) = events.recv() => {
                for event in session.handle_event(ev) {
                    present(&cfg, &session, event).await;
                }
            }
            permit = gate.clone().acquire_owned(), if sending.is_some() => {
                drop(permit);
                send_next_chunk(&mut session, &mut sending);
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&cfg, &mut session, &mut store, &mut sending, &line).await {
                        break;
                    }
                }
                None => break,
            },
            res = &mut shutdown => {
                res?;
                break;
            }
        }
        if session.state() == SessionState::Closed {
            break;
        }
    }
    session.leave();
    tokio::time::sleep(LINGER).await;
    info!("bye");
    Ok(())
}

async fn present(cfg: &Config, session: &Session, event: SessionEvent) {
    match event {
        SessionEvent::Connected => println!("peer connected"),
        SessionEvent::DocumentUpdated => println!("--- document ---\n{}\n---", session.document()),
        SessionEvent::TransferStarted { name, size } => println!("receiving {name} ({size} bytes)"),
        SessionEvent::TransferProgress { percent } => println!("  {percent:.2}%"),
        SessionEvent::FileReceived { index } => {
            let Some(file) = session.received_files().get(index) else {
                return;
            };
            match write_download(&cfg.download_dir, &file.name, &file.data).await {
                Ok(path) => println!("received {} -> {}", file.name, path.display()),
                Err(e) => eprintln!("could not save {}: {e:#}", file.name),
            }
        }
        SessionEvent::TransferAbandoned { name, received, size } => {
            println!("transfer of {name} abandoned at {received}/{size} bytes")
        }
        SessionEvent::PeerRejected { from } => println!("turned away {from}: session is full"),
        SessionEvent::PeerDisconnected => println!("peer disconnected"),
        SessionEvent::Failed(e) => eprintln!("error: {e}"),
    }
}

fn send_next_chunk(session: &mut Session, sending: &mut Option<Sending>) {
    let Some(s) = sending.as_mut() else {
        return;
    };
    match session.send_next_chunk(&mut s.transfer, &mut s.source) {
        Ok(false) => return,
        Ok(true) => {
            let report = s.transfer.report();
            println!(
                "sent {} ({} bytes, {} chunks)",
                s.transfer.name(),
                report.bytes,
                report.chunks
            );
        }
        Err(e) => eprintln!(
            "sending {} stopped at {}/{} bytes: {e}",
            s.transfer.name(),
            s.transfer.sent(),
            s.transfer.size()
        ),
    }
    *sending = None;
}

/// Returns false when the user asked to quit.
async fn handle_line(
    cfg: &Config,
    session: &mut Session,
    store: &mut RemoteStore<FsStore>,
    sending: &mut Option<Sending>,
    line: &str,
) -> bool {
    if let Err(e) = run_input(cfg, session, store, sending, parse_input(line)).await {
        eprintln!("error: {e:#}");
    }
    !matches!(parse_input(line), Input::Quit)
}

async fn run_input(
    cfg: &Config,
    session: &mut Session,
    store: &mut RemoteStore<FsStore>,
    sending: &mut Option<Sending>,
    input: Input<'_>,
) -> anyhow::Result<()> {
    match input {
        Input::Append(text) => {
            let mut doc = session.document().to_string();
            if !doc.is_empty() {
                doc.push('\n');
            }
            doc.push_str(text);
            session.apply_local_edit(doc)?;
        }
        Input::Send(path) => {
            if let Some(s) = sending {
                bail!("still sending {}", s.transfer.name());
            }
            let next = open_outgoing(session, Path::new(path))?;
            println!("sending {} ({} bytes)", next.transfer.name(), next.transfer.size());
            *sending = Some(next);
        }
        Input::Save => {
            let code = store.save_snippet(session.document(), &cfg.language)?;
            println!("saved snippet: {code} (expires in 72h)");
        }
        Input::SaveFile(path) => {
            let file = read_outgoing(Path::new(path)).await?;
            let code = store.save_file(&file)?;
            println!("saved {}: {code} (expires in 24h)", file.name);
        }
        Input::Load(code) => {
            let item = store.load(code)?;
            match &item.payload {
                StoredPayload::Snippet { content, language } => {
                    session.apply_local_edit(content.clone())?;
                    println!("loaded {language} snippet into the document");
                }
                StoredPayload::File { name, .. } => {
                    let bytes = store.download(&item)?;
                    let path = write_download(&cfg.download_dir, name, &bytes).await?;
                    println!("downloaded {name} -> {}", path.display());
                }
            }
        }
        Input::Show => println!("--- document ---\n{}\n---", session.document()),
        Input::Status => {
            println!("state: {:?}", session.state());
            if let Some(code) = session.code() {
                println!("PIN: {code}");
            }
            if let Some(p) = session.progress() {
                println!("incoming: {p:.2}%");
            }
            println!("files received: {}", session.received_files().len());
        }
        Input::Quit => {}
        Input::Unknown(line) => {
            warn!(%line, "unknown command");
            println!("commands: /send <path> /save /savefile <path> /load <CODE> /show /status /quit");
        }
    }
    Ok(())
}

fn outgoing_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

/// Announce the file at `path`. Its size is taken once, here; chunks are read as they go out.
fn open_outgoing(session: &mut Session, path: &Path) -> anyhow::Result<Sending> {
    let source = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let size = source
        .metadata()
        .with_context(|| format!("reading {}", path.display()))?
        .len();
    let transfer = session.start_file(&outgoing_name(path), DEFAULT_MIME, size)?;
    Ok(Sending { transfer, source })
}

async fn read_outgoing(path: &Path) -> anyhow::Result<OutgoingFile> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(OutgoingFile::new(outgoing_name(path), DEFAULT_MIME, data))
}

/// Strip a peer-supplied name down to a plain file name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let clean: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim_start_matches('.')
        .trim()
        .to_string();
    if clean.is_empty() {
        "received.bin".to_string()
    } else {
        clean
    }
}

/// `dir/name`, or `dir/name-N` when taken.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{name}-{n}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

async fn write_download(dir: &Path, name: &str, data: &[u8]) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = unique_path(dir, &sanitize_file_name(name));
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
