use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use replymatch::{Envelope, EnvelopeCodec, EnvelopeStage};
use replymatch_peer::{Connection, ConnectionConfig, Listener};
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

type EnvelopeConnection = Connection<Envelope, EnvelopeCodec, UnixStream>;

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let delay = args.delay.as_deref().map(parse_duration).transpose()?;
    // The server never waits on replies of its own, so nothing needs sweeping.
    let listener = Listener::bind(&args.path)
        .map_err(|err| peer_error("bind failed", err))?
        .with_connection_config(ConnectionConfig::default().without_sweeper());
    let stage = Arc::new(EnvelopeStage::new(EnvelopeCodec));

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut workers = Vec::new();
    while running.load(Ordering::SeqCst) {
        if args.max_connections.is_some_and(|max| workers.len() >= max) {
            break;
        }
        let conn = listener
            .accept(&stage)
            .map_err(|err| peer_error("accept failed", err))?;
        let worker = thread::Builder::new()
            .name(format!("serve-{}", conn.session_id()))
            .spawn(move || serve_connection(conn, delay))
            .map_err(|err| CliError::new(INTERNAL, format!("worker spawn failed: {err}")))?;
        workers.push(worker);
    }

    let answered: usize = workers
        .into_iter()
        .map(|worker| worker.join().unwrap_or_default())
        .sum();
    info!(answered, "server stopped");
    Ok(SUCCESS)
}

fn serve_connection(conn: EnvelopeConnection, delay: Option<Duration>) -> usize {
    let session = conn.session_id();
    let mut answered = 0usize;
    while let Ok(inbound) = conn.recv() {
        let Some(envelope) = inbound.into_message() else {
            continue;
        };
        if envelope.reply {
            debug!(%session, id = envelope.id, "ignoring unsolicited reply");
            continue;
        }
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        debug!(%session, id = envelope.id, "replying");
        if let Err(err) = conn.send(envelope.echo()) {
            warn!(%session, error = %err, "reply failed, dropping connection");
            break;
        }
        answered += 1;
    }
    info!(%session, answered, "connection finished");
    answered
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
