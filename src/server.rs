use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::observability;
use crate::orchestrator::{parse_query_window, Orchestrator};
use crate::protocol::{self, Command, Reply};

/// Shared handles every connection dispatches into.
#[derive(Clone)]
pub struct Handler {
    orchestrator: Arc<Orchestrator>,
    engine: Arc<Engine>,
}

impl Handler {
    pub fn new(orchestrator: Arc<Orchestrator>, engine: Arc<Engine>) -> Self {
        Self { orchestrator, engine }
    }

    /// Handle one request line and return the response line.
    pub async fn handle_line(&self, line: &str) -> String {
        let cmd = match protocol::parse_command(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return protocol::encode_error(&e);
            }
        };

        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute(cmd).await;
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(reply) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "command" => label, "status" => "ok")
                    .increment(1);
                protocol::encode_reply(&reply)
            }
            Err(e) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "command" => label, "status" => "error")
                    .increment(1);
                protocol::encode_error(&e)
            }
        }
    }

    async fn execute(&self, cmd: Command) -> Result<Reply, EngineError> {
        let orch = &self.orchestrator;
        match cmd {
            Command::CreateBooking(request) => orch.create_booking(request).await.map(Reply::Receipt),
            Command::Confirm { booking_id, reason } => {
                orch.confirm(&booking_id, reason).await.map(Reply::Receipt)
            }
            Command::Cancel { booking_id, reason } => {
                orch.cancel(&booking_id, reason).await.map(Reply::Receipt)
            }
            Command::Reject { booking_id, reason } => {
                orch.reject(&booking_id, reason).await.map(Reply::Receipt)
            }
            Command::Complete { booking_id, reason } => {
                orch.complete(&booking_id, reason).await.map(Reply::Receipt)
            }
            Command::Annotate { booking_id, reason } => {
                orch.annotate(&booking_id, reason).await.map(Reply::Receipt)
            }
            Command::GetBooking { booking_id } => orch.get_booking(&booking_id).await.map(Reply::Receipt),
            Command::ListBookings { resource_id } => {
                let bookings = self.engine.list_bookings(&resource_id).await;
                Ok(Reply::Bookings { resource_id, bookings })
            }
            Command::Availability {
                resource_id,
                start_date,
                end_date,
            } => {
                let window = parse_query_window(&start_date, &end_date)?;
                let available = orch.availability(&resource_id, &window).await?;
                Ok(Reply::Available {
                    resource_id,
                    window,
                    available,
                })
            }
            Command::Calendar {
                resource_id,
                start_date,
                end_date,
            } => {
                let window = parse_query_window(&start_date, &end_date)?;
                let calendar = self.engine.calendar(&resource_id, &window).await?;
                Ok(Reply::Calendar { resource_id, calendar })
            }
            Command::Ping => Ok(Reply::Pong { pong: true }),
        }
    }
}

/// Serve one client until it disconnects: one JSON request per line in, one
/// JSON response per line out.
pub async fn process_connection(
    socket: TcpStream,
    handler: Handler,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    socket.set_nodelay(true)?;
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = lines.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_LINE_LEN} bytes, closing connection");
                let err = EngineError::LimitExceeded("request line too long");
                lines.send(protocol::encode_error(&err)).await?;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        debug!("request: {line}");
        let response = handler.handle_line(&line).await;
        lines.send(response).await?;
    }
    Ok(())
}

/// Accept connections until `shutdown` resolves, at most `max_connections` at
/// once; extra clients are dropped on accept. Then wait up to `drain` for open
/// connections to finish and return how many were still open.
pub async fn serve(
    listener: TcpListener,
    handler: Handler,
    max_connections: usize,
    drain: Duration,
    shutdown: impl Future<Output = ()>,
) -> usize {
    let slots = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => break,
        };

        let Ok(slot) = slots.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };
        info!("connection from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = process_connection(socket, handler).await {
                error!("connection error from {peer}: {e}");
            }
            info!("connection from {peer} closed");
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
            drop(slot);
        });
    }

    info!("stopped accepting, draining connections");
    let all = u32::try_from(max_connections).unwrap_or(u32::MAX);
    match tokio::time::timeout(drain, slots.acquire_many(all)).await {
        Ok(_) => 0,
        Err(_) => max_connections - slots.available_permits(),
    }
}
