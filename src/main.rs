//! Line-delimited JSON worker: one request per stdin line, one response per
//! stdout line, in the same order.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use futures::channel::oneshot;
use tracing::{error, info, warn};

use sqlite_worker::envelope::{self, Response};
use sqlite_worker::{logging, BoundaryClient, BoundaryRuntime, SqliteEngine, WorkerConfig};

enum Pending {
    Queued(oneshot::Receiver<Response>),
    Ready(Response),
}

fn main() -> Result<()> {
    logging::init_tracing();

    let config = match std::env::args_os().nth(1) {
        Some(path) => WorkerConfig::load(&PathBuf::from(path))?,
        None => WorkerConfig::default(),
    };
    let engine = SqliteEngine::open(&config.sqlite).context("failed to open sqlite database")?;
    let runtime = BoundaryRuntime::spawn(engine, config.runtime.clone())?;
    let client = runtime.client();
    info!(handle = %runtime.handle_id(), "sqlite worker ready");

    let (pending_tx, pending_rx) = mpsc::channel();
    let writer = thread::Builder::new()
        .name("sqlite-worker-writer".to_string())
        .spawn(move || write_loop(pending_rx))
        .context("failed to spawn writer thread")?;

    read_requests(io::stdin().lock(), &client, &pending_tx);

    // Let every submitted request finish before closing the handle.
    drop(pending_tx);
    writer
        .join()
        .map_err(|_| anyhow!("writer thread panicked"))??;
    runtime.shutdown()?;
    info!("sqlite worker stopped");
    Ok(())
}

/// Submit one request per input line until EOF. Every non-blank line yields
/// exactly one entry on `pending`, so undecodable lines get a response in
/// their place. A read error ends input the same way EOF does.
fn read_requests(
    mut input: impl BufRead,
    client: &BoundaryClient,
    pending: &mpsc::Sender<Pending>,
) {
    let mut frame = Vec::new();
    loop {
        frame.clear();
        match input.read_until(b'\n', &mut frame) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                error!(%err, "failed to read request; draining");
                break;
            }
        }
        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let item = match envelope::decode_request_bytes(&frame) {
            Ok(request) => Pending::Queued(client.submit(request)),
            Err(err) => {
                warn!(%err, "rejected request frame");
                Pending::Ready(Response::err(err))
            }
        };
        if pending.send(item).is_err() {
            break;
        }
    }
}

fn write_loop(pending: mpsc::Receiver<Pending>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    while let Ok(item) = pending.recv() {
        let response = match item {
            Pending::Ready(response) => response,
            Pending::Queued(receiver) => futures::executor::block_on(receiver)
                .unwrap_or_else(|_| Response::boundary_closed()),
        };
        let line = envelope::encode_response(&response).context("failed to encode response")?;
        writeln!(out, "{line}").context("failed to write response")?;
        out.flush()?;
    }
    Ok(())
}
