//! Protocol dispatcher and session lifecycle.
//!
//! One cooperative loop serves the whole session: it multiplexes the
//! framed client channel, the callback signal channel, and a generation
//! tick that fires whenever the pipeline can make progress. With
//! generation possible the wait is effectively zero; otherwise the loop
//! blocks until the next inbound event.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use attune_core::config::keys;
use attune_core::ConfigStore;
use attune_wire::{Body, FrameReader, FrameWriter, Message, MessageKind, Status, WirePoint};

use crate::engine::{Engine, FetchOutcome};
use crate::error::SessionError;
use crate::registry::PluginRegistry;

/// Run a tuning session over a duplex channel.
///
/// Reads the initial SESSION request, builds the engine from its space
/// and config, and serves requests until the channel reaches EOF (clean
/// shutdown) or a fatal error occurs. `base_cfg` supplies values seeded
/// before the handshake (e.g. from the environment); the SESSION
/// request's config map is laid over it.
pub async fn serve<S>(
    stream: S,
    base_cfg: ConfigStore,
    registry: &PluginRegistry,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    let Some(hello) = reader.recv().await? else {
        info!(target: "attune::session", "channel closed before the session handshake");
        return Ok(());
    };
    let src_id = hello.src_id.clone();

    match establish(hello, base_cfg, registry) {
        Ok((mut engine, mut signals)) => {
            writer
                .send(&Message {
                    kind: MessageKind::Session,
                    status: Status::Ok,
                    src_id,
                    body: Body::Empty,
                })
                .await?;
            info!(
                target: "attune::session",
                space = engine.space().name(),
                dims = engine.space().len(),
                strategy = engine.strategy_name(),
                layers = ?engine.layer_names(),
                capacity = engine.pool_capacity(),
                "session established"
            );
            debug!(target: "attune::session", config = %engine.config().summary(), "session configuration");

            let result = run(&mut engine, &mut reader, &mut writer, &mut signals).await;
            engine.shutdown();
            result
        }
        Err(e) => {
            // Best-effort FAIL so the launcher sees why, then abort.
            let _ = writer
                .send(&Message::fail(MessageKind::Session, src_id, e.to_string()))
                .await;
            Err(e)
        }
    }
}

/// Validate the handshake message and build the engine from it.
fn establish(
    hello: Message,
    mut cfg: ConfigStore,
    registry: &PluginRegistry,
) -> Result<(Engine, UnboundedReceiver<u64>), SessionError> {
    if hello.kind != MessageKind::Session || hello.status != Status::Request {
        return Err(SessionError::Protocol(format!(
            "expected a session request to open the channel, got {:?}/{:?}",
            hello.kind, hello.status
        )));
    }
    let Body::Session { space, config } = hello.body else {
        return Err(SessionError::Protocol(
            "session request carried the wrong body".into(),
        ));
    };
    if space.is_empty() {
        return Err(SessionError::Protocol(
            "session space has no dimensions".into(),
        ));
    }
    for (key, value) in &config {
        cfg.set(key, value);
    }

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let engine = Engine::new(space, cfg, registry, signal_tx)?;
    Ok((engine, signal_rx))
}

/// The dispatcher loop. Returns on clean EOF or a fatal error.
async fn run<R, W>(
    engine: &mut Engine,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    signals: &mut UnboundedReceiver<u64>,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            Some(id) = signals.recv() => {
                engine.on_signal(id)?;
            }

            incoming = reader.recv() => match incoming {
                Ok(None) => {
                    info!(target: "attune::session", "client channel closed; shutting down");
                    return Ok(());
                }
                Ok(Some(request)) => dispatch(engine, request, writer).await?,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(target: "attune::session", error = %e, "discarding undecodable request");
                    writer
                        .send(&Message::fail(MessageKind::Session, "", e.to_string()))
                        .await?;
                }
            },

            _ = std::future::ready(()), if engine.can_generate() => {
                engine.generate_trial()?;
            }
        }
    }
}

/// Route one request, bracketing it with `CURRENT_CLIENT`, and send the
/// response. Request-scoped failures become FAIL replies; fatal errors
/// propagate after a best-effort FAIL.
async fn dispatch<W>(
    engine: &mut Engine,
    request: Message,
    writer: &mut FrameWriter<W>,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let kind = request.kind;
    let src_id = request.src_id.clone();

    if request.status != Status::Request {
        writer
            .send(&Message::fail(
                kind,
                src_id,
                format!("expected a request, got {:?}", request.status),
            ))
            .await?;
        return Ok(());
    }

    engine.config_mut().set(keys::CURRENT_CLIENT, &src_id);
    let outcome = handle(engine, &request);
    engine.config_mut().unset(keys::CURRENT_CLIENT);

    match outcome {
        Ok((status, body)) => {
            writer
                .send(&Message {
                    kind,
                    status,
                    src_id,
                    body,
                })
                .await?;
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            let _ = writer
                .send(&Message::fail(kind, src_id, e.to_string()))
                .await;
            Err(e)
        }
        Err(e) => {
            debug!(target: "attune::session", ?kind, error = %e, "request failed");
            writer
                .send(&Message::fail(kind, src_id, e.to_string()))
                .await?;
            Ok(())
        }
    }
}

/// The request handler table.
fn handle(engine: &mut Engine, request: &Message) -> Result<(Status, Body), SessionError> {
    match (request.kind, &request.body) {
        (MessageKind::Join, Body::Space(offered)) => {
            let authoritative = engine.join(&request.src_id, offered)?;
            Ok((Status::Ok, Body::Space(authoritative)))
        }

        (MessageKind::GetCfg, Body::Text(key)) => {
            let value = engine.config().get(key).unwrap_or("").to_string();
            Ok((Status::Ok, Body::Text(value)))
        }

        (MessageKind::SetCfg, Body::Text(assignment)) => {
            let (key, value) = assignment.split_once('=').ok_or_else(|| {
                SessionError::Protocol(format!("malformed assignment {assignment:?}"))
            })?;
            let prior = engine.config().get(key).unwrap_or("").to_string();
            engine.setcfg(key, value)?;
            Ok((Status::Ok, Body::Text(prior)))
        }

        (MessageKind::Best, Body::Empty) => {
            let best = WirePoint::resolve(&engine.best(), engine.space())?;
            Ok((Status::Ok, Body::Point(best)))
        }

        (MessageKind::Fetch, Body::FetchReq { best_id }) => match engine.fetch(*best_id)? {
            FetchOutcome::Candidate { cand, best } => {
                let cand = WirePoint::resolve(&cand, engine.space())?;
                let best = match best {
                    Some(point) => Some(WirePoint::resolve(&point, engine.space())?),
                    None => None,
                };
                Ok((Status::Ok, Body::FetchOk { cand, best }))
            }
            FetchOutcome::Busy(best) => {
                let best = WirePoint::resolve(&best, engine.space())?;
                Ok((Status::Busy, Body::Point(best)))
            }
        },

        (MessageKind::Report, Body::Report { id, perf }) => {
            engine.report(*id, perf)?;
            Ok((Status::Ok, Body::Empty))
        }

        (MessageKind::Restart, Body::Empty) => {
            engine.restart()?;
            Ok((Status::Ok, Body::Empty))
        }

        (MessageKind::Session, _) => Err(SessionError::Protocol(
            "session already established".into(),
        )),

        (kind, _) => Err(SessionError::Protocol(format!(
            "request body does not match type {kind:?}"
        ))),
    }
}
