//! End-to-end session tests over an in-memory duplex channel, with
//! scripted plug-ins registered through the extension seam.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use attune_core::config::keys;
use attune_core::{ConfigStore, Point, Space, Trial, Value};
use attune_session::{
    serve, CallbackSignal, Flow, Layer, PluginContext, PluginRegistry, SessionError, Strategy,
    Waiting,
};
use attune_wire::{Body, FrameReader, FrameWriter, Message, MessageKind, Status, WireError, WirePoint};

type Log = Rc<RefCell<Vec<String>>>;
type SignalCell = Rc<RefCell<Option<CallbackSignal>>>;

// ── Scripted plug-ins ────────────────────────────────────────────────

/// Deterministic strategy: ids count up from zero and every coordinate
/// is `id mod dimension-size`.
struct IdentityStrategy {
    sizes: Vec<usize>,
    next_id: i32,
    best: Point,
    best_perf: f64,
    events: Option<Log>,
}

impl IdentityStrategy {
    fn new(events: Option<Log>) -> Self {
        Self {
            sizes: Vec::new(),
            next_id: 0,
            best: Point::invalid(),
            best_perf: f64::INFINITY,
            events,
        }
    }

    fn log(&self, entry: &str) {
        if let Some(events) = &self.events {
            events.borrow_mut().push(entry.to_string());
        }
    }
}

impl Strategy for IdentityStrategy {
    fn init(&mut self, _ctx: &mut PluginContext<'_>, space: &Space) -> Result<(), SessionError> {
        self.log("strategy.init");
        self.sizes = space.sizes();
        self.next_id = 0;
        self.best = Point::invalid();
        self.best_perf = f64::INFINITY;
        Ok(())
    }

    fn generate(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        point: &mut Point,
    ) -> Result<Flow, SessionError> {
        point.id = self.next_id;
        point.step = 0;
        point.coords = self
            .sizes
            .iter()
            .map(|&n| self.next_id as usize % n)
            .collect();
        self.next_id += 1;
        Ok(Flow::Accept)
    }

    fn rejected(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        point: &mut Point,
    ) -> Result<Flow, SessionError> {
        point.coords = self.sizes.iter().map(|&n| n - 1).collect();
        Ok(Flow::Accept)
    }

    fn analyze(&mut self, _ctx: &mut PluginContext<'_>, trial: &Trial) -> Result<(), SessionError> {
        let unified = trial.perf.unified();
        if unified < self.best_perf {
            self.best_perf = unified;
            self.best = trial.point.clone();
        }
        Ok(())
    }

    fn best(&self) -> Point {
        self.best.clone()
    }
}

/// Records its lifecycle hooks into the shared log.
struct RecorderLayer {
    tag: &'static str,
    events: Log,
}

impl Layer for RecorderLayer {
    fn name(&self) -> &'static str {
        self.tag
    }

    fn init(&mut self, _ctx: &mut PluginContext<'_>, _space: &Space) -> Result<(), SessionError> {
        self.events.borrow_mut().push(format!("{}.init", self.tag));
        Ok(())
    }

    fn fini(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), SessionError> {
        self.events.borrow_mut().push(format!("{}.fini", self.tag));
        Ok(())
    }
}

/// Holds the first trial on its waitlist until an external signal.
struct GateLayer {
    armed: bool,
    signal_out: SignalCell,
}

impl Layer for GateLayer {
    fn name(&self) -> &'static str {
        "gate"
    }

    fn generate(
        &mut self,
        ctx: &mut PluginContext<'_>,
        _trial: &mut Trial,
    ) -> Result<Flow, SessionError> {
        if !self.armed {
            self.armed = true;
            *self.signal_out.borrow_mut() = Some(ctx.callback_generate()?);
            return Ok(Flow::Wait);
        }
        Ok(Flow::Accept)
    }

    fn resume(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        _waiting: &mut Waiting<'_>,
    ) -> Result<(usize, Flow), SessionError> {
        Ok((0, Flow::Accept))
    }
}

/// Rejects the first candidate it sees.
struct PickyLayer {
    rejected_once: bool,
}

impl Layer for PickyLayer {
    fn name(&self) -> &'static str {
        "picky"
    }

    fn generate(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        _trial: &mut Trial,
    ) -> Result<Flow, SessionError> {
        if !self.rejected_once {
            self.rejected_once = true;
            return Ok(Flow::Reject);
        }
        Ok(Flow::Accept)
    }
}

fn test_registry(events: Log, gate: SignalCell) -> PluginRegistry {
    let mut registry = PluginRegistry::builtin();
    {
        let events = events.clone();
        registry.register_strategy("identity", move || {
            Box::new(IdentityStrategy::new(Some(events.clone())))
        });
    }
    for tag in ["rec1", "rec2"] {
        let events = events.clone();
        registry.register_layer(tag, move || {
            Box::new(RecorderLayer {
                tag,
                events: events.clone(),
            })
        });
    }
    {
        let gate = gate.clone();
        registry.register_layer("gate", move || {
            Box::new(GateLayer {
                armed: false,
                signal_out: gate.clone(),
            })
        });
    }
    registry.register_layer("picky", || Box::new(PickyLayer { rejected_once: false }));
    registry
}

// ── Client-side harness ──────────────────────────────────────────────

struct Client {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    id: String,
}

impl Client {
    fn new(io: DuplexStream, id: &str) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            id: id.to_string(),
        }
    }

    /// Send a request under this client's id and await the reply, which
    /// must echo the request's type.
    async fn exchange(&mut self, kind: MessageKind, body: Body) -> Message {
        self.exchange_as(kind, &self.id.clone(), body).await
    }

    async fn exchange_as(&mut self, kind: MessageKind, src_id: &str, body: Body) -> Message {
        self.writer
            .send(&Message::request(kind, src_id, body))
            .await
            .expect("request sent");
        let reply = self
            .reader
            .recv()
            .await
            .expect("channel alive")
            .expect("reply before EOF");
        assert_eq!(reply.kind, kind, "reply type echoes the request");
        reply
    }

    async fn open(&mut self, space: &Space, config: &[(&str, &str)]) {
        let reply = self
            .exchange(
                MessageKind::Session,
                Body::Session {
                    space: space.clone(),
                    config: config
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
            )
            .await;
        assert_eq!(reply.status, Status::Ok, "handshake accepted: {reply:?}");
    }

    async fn fetch(&mut self, best_id: i32) -> Message {
        self.exchange(MessageKind::Fetch, Body::FetchReq { best_id })
            .await
    }

    async fn report(&mut self, id: i32, perf: &[f64]) -> Message {
        self.exchange(
            MessageKind::Report,
            Body::Report {
                id,
                perf: perf.to_vec(),
            },
        )
        .await
    }

    async fn best(&mut self) -> WirePoint {
        let reply = self.exchange(MessageKind::Best, Body::Empty).await;
        assert_eq!(reply.status, Status::Ok);
        match reply.body {
            Body::Point(point) => point,
            other => panic!("unexpected best body: {other:?}"),
        }
    }

    async fn setcfg(&mut self, key: &str, value: &str) -> String {
        let reply = self
            .exchange(MessageKind::SetCfg, Body::Text(format!("{key}={value}")))
            .await;
        assert_eq!(reply.status, Status::Ok);
        match reply.body {
            Body::Text(prior) => prior,
            other => panic!("unexpected setcfg body: {other:?}"),
        }
    }

    async fn getcfg(&mut self, key: &str) -> String {
        let reply = self
            .exchange(MessageKind::GetCfg, Body::Text(key.to_string()))
            .await;
        assert_eq!(reply.status, Status::Ok);
        match reply.body {
            Body::Text(value) => value,
            other => panic!("unexpected getcfg body: {other:?}"),
        }
    }
}

fn one_dim_space() -> Space {
    let mut space = Space::new("tuning");
    space.int("x", 0, 9, 1).unwrap();
    space
}

/// Expect a fetched candidate and return it.
fn candidate(reply: &Message) -> (WirePoint, Option<WirePoint>) {
    assert_eq!(reply.status, Status::Ok, "expected a candidate: {reply:?}");
    match &reply.body {
        Body::FetchOk { cand, best } => (cand.clone(), best.clone()),
        other => panic!("unexpected fetch body: {other:?}"),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_single_client() {
    let events: Log = Rc::default();
    let gate: SignalCell = Rc::default();
    let registry = test_registry(events, gate);

    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        client
            .open(&one_dim_space(), &[("SESSION_STRATEGY", "identity")])
            .await;

        let (cand, best) = candidate(&client.fetch(-1).await);
        assert_eq!(cand.id, 0);
        assert_eq!(cand.values, vec![Value::Int(0)]);
        assert!(best.is_none(), "no incumbent before the first report");

        assert_eq!(client.report(0, &[1.0]).await.status, Status::Ok);

        let (cand, best) = candidate(&client.fetch(-1).await);
        assert_eq!(cand.id, 1);
        assert_eq!(cand.values, vec![Value::Int(1)]);
        assert_eq!(
            best.map(|b| b.id),
            Some(0),
            "a stale client gets the incumbent alongside the candidate"
        );

        assert_eq!(client.report(1, &[0.5]).await.status, Status::Ok);

        let best = client.best().await;
        assert_eq!(best.id, 1);
        assert_eq!(best.values, vec![Value::Int(1)]);
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn pause_answers_busy_and_discards_the_best_report() {
    let registry = test_registry(Rc::default(), Rc::default());
    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        client
            .open(&one_dim_space(), &[("SESSION_STRATEGY", "identity")])
            .await;

        let (cand, _) = candidate(&client.fetch(-1).await);
        assert_eq!(cand.id, 0);
        assert_eq!(client.report(0, &[1.0]).await.status, Status::Ok);

        assert_eq!(client.setcfg(keys::PAUSED, "1").await, "0");

        let reply = client.fetch(0).await;
        assert_eq!(reply.status, Status::Busy);
        let busy_best = match reply.body {
            Body::Point(point) => point,
            other => panic!("unexpected busy body: {other:?}"),
        };
        assert_eq!(busy_best.id, 0, "busy fetch falls back to the best");

        // Reporting against the paused best id is quietly accepted.
        assert_eq!(client.report(busy_best.id, &[9.0]).await.status, Status::Ok);
        let best = client.best().await;
        assert_eq!(best.id, 0, "discarded report must not shift the best");

        assert_eq!(client.setcfg(keys::PAUSED, "0").await, "1");
        let (cand, _) = candidate(&client.fetch(0).await);
        assert_eq!(cand.id, 1, "unpaused fetch hands out a fresh candidate");
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn restart_reinitialises_plugins_and_resets_the_best() {
    let events: Log = Rc::default();
    let registry = test_registry(events.clone(), Rc::default());
    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        client
            .open(
                &one_dim_space(),
                &[
                    ("SESSION_STRATEGY", "identity"),
                    ("SESSION_LAYERS", "rec1;rec2"),
                ],
            )
            .await;

        for expected in 0..2 {
            let (cand, _) = candidate(&client.fetch(expected - 1).await);
            assert_eq!(cand.id, expected);
            assert_eq!(client.report(cand.id, &[1.0]).await.status, Status::Ok);
        }

        events.borrow_mut().clear();
        let reply = client.exchange(MessageKind::Restart, Body::Empty).await;
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(
            events.borrow().as_slice(),
            [
                "rec2.fini",
                "rec1.fini",
                "strategy.init",
                "rec1.init",
                "rec2.init",
            ],
            "finis run in reverse load order, inits forward"
        );

        let best = client.best().await;
        assert_eq!(best.id, -1, "restart resets the incumbent");
        assert!(best.values.is_empty());

        // The pipeline keeps producing after the restart.
        let (cand, _) = candidate(&client.fetch(-1).await);
        assert_eq!(client.report(cand.id, &[0.5]).await.status, Status::Ok);
        assert_eq!(client.best().await.id, cand.id);
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn layer_wait_parks_until_the_callback_fires() {
    let gate: SignalCell = Rc::default();
    let registry = test_registry(Rc::default(), gate.clone());
    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        client
            .open(
                &one_dim_space(),
                &[("SESSION_STRATEGY", "identity"), ("SESSION_LAYERS", "gate")],
            )
            .await;

        // The only candidate is parked on the gate's waitlist, so fetch
        // has nothing ready.
        let reply = client.fetch(-1).await;
        assert_eq!(reply.status, Status::Busy);

        let signal = gate
            .borrow_mut()
            .take()
            .expect("gate registered its callback");
        signal.raise();

        // The engine resumes the parked trial before serving this fetch.
        let (cand, _) = candidate(&client.fetch(-1).await);
        assert_eq!(cand.id, 0);
        assert_eq!(client.report(0, &[1.0]).await.status, Status::Ok);
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn rejected_candidates_are_rewritten_before_reaching_clients() {
    let registry = test_registry(Rc::default(), Rc::default());
    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        client
            .open(
                &one_dim_space(),
                &[("SESSION_STRATEGY", "identity"), ("SESSION_LAYERS", "picky")],
            )
            .await;

        let (cand, _) = candidate(&client.fetch(-1).await);
        assert_eq!(cand.id, 0, "the rejected point keeps its id");
        assert_eq!(
            cand.values,
            vec![Value::Int(9)],
            "the strategy's rewrite reaches the client"
        );

        // Exactly one ready entry came out of the reject cycle.
        let reply = client.fetch(-1).await;
        assert_eq!(reply.status, Status::Busy);
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn join_with_a_different_space_fails_without_breaking_the_session() {
    let registry = test_registry(Rc::default(), Rc::default());
    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        let space = one_dim_space();
        client
            .open(&space, &[("SESSION_STRATEGY", "identity")])
            .await;

        let reply = client
            .exchange_as(MessageKind::Join, "client-2", Body::Space(space.clone()))
            .await;
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(
            reply.body,
            Body::Space(space.clone()),
            "accepted joins echo the authoritative space"
        );

        let mut other = Space::new("tuning");
        other.int("x", 0, 9, 1).unwrap();
        other.int("y", 0, 1, 1).unwrap();
        let reply = client
            .exchange_as(MessageKind::Join, "client-3", Body::Space(other))
            .await;
        assert_eq!(reply.status, Status::Fail, "mismatched space is rejected");

        // The earlier clients are unaffected.
        let (cand, _) = candidate(&client.fetch(-1).await);
        assert_eq!(cand.id, 0);
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn reports_for_unknown_ids_fail_but_the_session_survives() {
    let registry = test_registry(Rc::default(), Rc::default());
    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        client
            .open(&one_dim_space(), &[("SESSION_STRATEGY", "identity")])
            .await;

        let reply = client.report(4711, &[1.0]).await;
        assert_eq!(reply.status, Status::Fail);

        // The dispatcher keeps serving after the failed request.
        assert_eq!(client.getcfg(keys::SESSION_STRATEGY).await, "identity");
        let (cand, _) = candidate(&client.fetch(-1).await);
        assert_eq!(cand.id, 0);
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn setcfg_round_trips_and_returns_the_prior_value() {
    let registry = test_registry(Rc::default(), Rc::default());
    let (server_io, client_io) = duplex(4096);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        let mut client = Client::new(client_io, "client-1");
        client
            .open(&one_dim_space(), &[("SESSION_STRATEGY", "identity")])
            .await;

        assert_eq!(client.getcfg("APP_WINDOW").await, "");
        assert_eq!(client.setcfg("APP_WINDOW", "64").await, "");
        assert_eq!(client.getcfg("APP_WINDOW").await, "64");
        assert_eq!(client.setcfg("APP_WINDOW", "128").await, "64");
        assert_eq!(client.getcfg("APP_WINDOW").await, "128");

        let reply = client
            .exchange(MessageKind::SetCfg, Body::Text("no-equals-sign".into()))
            .await;
        assert_eq!(reply.status, Status::Fail);
    };

    let (result, ()) = tokio::join!(server, script);
    result.expect("clean shutdown");
}

#[tokio::test]
async fn garbage_on_the_channel_is_a_fatal_framing_error() {
    let registry = test_registry(Rc::default(), Rc::default());
    let (server_io, mut client_io) = duplex(1024);
    let server = serve(server_io, ConfigStore::new(), &registry);

    let script = async move {
        client_io
            .write_all(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x10, 0x00, 0x05])
            .await
            .unwrap();
        client_io.flush().await.unwrap();
        // Keep the stream open; the bad magic alone must kill the session.
        client_io
    };

    let (result, _io) = tokio::join!(server, script);
    match result {
        Err(SessionError::Wire(WireError::BadMagic(magic))) => {
            assert_eq!(magic, 0xDEADBEEF);
        }
        other => panic!("expected a framing error, got {other:?}"),
    }
}
