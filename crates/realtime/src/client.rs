//! WebSocket transport for OpenAI-compatible realtime services.
//!
//! After `start`, a link runs two tasks:
//!
//! - a writer that owns the socket's sink and serializes [`ClientEvent`]s,
//! - a reader that maps server events onto [`SessionEvent`]s and answers
//!   tool calls through the session's [`ToolBridge`].

use crate::{
    config::{Provider, RealtimeConfig},
    protocol::{ClientEvent, Item, ServerEvent, SessionConfig, ToolDefinition, function_call_reply},
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use kemet_core::{
    events::{AgentState, SessionEvent, UserState},
    signal::CloseReason,
    tools::ToolBridge,
    transport::{RealtimeLink, RealtimeTransport, SessionSetup, TransportError},
};
use secrecy::ExposeSecret;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, error, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, WsMessage>;
type SocketStream = SplitStream<Socket>;

const OUTBOUND_BUFFER: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens websocket connections to a realtime provider.
pub struct WebSocketTransport {
    config: RealtimeConfig,
}

impl WebSocketTransport {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn RealtimeLink>, TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let bearer = format!("Bearer {}", self.config.api_key.expose_secret())
            .parse()
            .map_err(|_| TransportError::Connect("API key is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", bearer);
        if self.config.provider == Provider::OpenAI {
            request
                .headers_mut()
                .insert("OpenAI-Beta", "realtime=v1".parse().map_err(|_| {
                    TransportError::Connect("invalid OpenAI-Beta header".into())
                })?);
        }

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(provider = %self.config.provider, "Connected to realtime API.");

        Ok(Box::new(WebSocketLink::new(socket)))
    }
}

/// Outbound instruction for the writer task.
#[derive(Debug)]
enum Outbound {
    Event(ClientEvent),
    Close,
}

/// A single realtime session over one websocket.
pub struct WebSocketLink {
    socket: Option<Socket>,
    outbound: Option<mpsc::Sender<Outbound>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketLink {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket: Some(socket),
            outbound: None,
            writer: None,
            reader: None,
        }
    }
}

#[async_trait]
impl RealtimeLink for WebSocketLink {
    async fn start(
        &mut self,
        setup: SessionSetup,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<(), TransportError> {
        let socket = self.socket.take().ok_or(TransportError::Closed)?;
        let (mut sink, stream) = socket.split();

        let tools: Vec<ToolDefinition> = setup
            .tools
            .definitions()
            .await
            .map_err(|e| TransportError::Protocol(format!("listing tools failed: {}", e)))?
            .into_iter()
            .map(ToolDefinition::from)
            .collect();
        info!(tools = tools.len(), voice = %setup.voice, "Configuring realtime session");

        send_event(
            &mut sink,
            &ClientEvent::SessionUpdate {
                session: SessionConfig::voice(setup.instructions, setup.voice, tools),
            },
        )
        .await?;
        for message in setup.context.messages() {
            send_event(
                &mut sink,
                &ClientEvent::ConversationItemCreate {
                    item: Item::from(message),
                },
            )
            .await?;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.writer = Some(tokio::spawn(write_loop(sink, outbound_rx)));
        self.reader = Some(tokio::spawn(read_loop(
            stream,
            events,
            outbound_tx.clone(),
            setup.tools,
        )));
        self.outbound = Some(outbound_tx);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outbound::Close).await;
        }
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                warn!("Realtime writer did not finish in time; aborting.");
                writer.abort();
            }
        }
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

async fn send_event(sink: &mut SocketSink, event: &ClientEvent) -> Result<(), TransportError> {
    let payload =
        serde_json::to_string(event).map_err(|e| TransportError::Protocol(e.to_string()))?;
    sink.send(WsMessage::Text(payload.into()))
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

async fn write_loop(mut sink: SocketSink, mut outbound: mpsc::Receiver<Outbound>) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Event(event) => {
                if let Err(e) = send_event(&mut sink, &event).await {
                    error!(error = %e, "Failed to send realtime event");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
    debug!("Realtime writer stopped.");
}

/// Tracks the last agent state so repeated server events are reported once.
struct AgentTracker {
    current: AgentState,
}

impl AgentTracker {
    fn transition(&mut self, next: AgentState) -> Option<SessionEvent> {
        if self.current == next {
            None
        } else {
            self.current = next;
            Some(SessionEvent::AgentStateChanged(next))
        }
    }
}

/// Maps one server event to the session events it implies.
fn translate(event: ServerEvent, agent: &mut AgentTracker) -> Vec<SessionEvent> {
    match event {
        ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
            agent.transition(AgentState::Listening).into_iter().collect()
        }
        ServerEvent::SpeechStarted => vec![SessionEvent::UserStateChanged(UserState::Speaking)],
        ServerEvent::SpeechStopped => {
            std::iter::once(SessionEvent::UserStateChanged(UserState::Listening))
                .chain(agent.transition(AgentState::Thinking))
                .collect()
        }
        ServerEvent::TranscriptionCompleted { transcript } => vec![SessionEvent::InputTranscribed {
            transcript,
            is_final: true,
        }],
        ServerEvent::ResponseCreated => {
            agent.transition(AgentState::Thinking).into_iter().collect()
        }
        ServerEvent::ResponseAudioDelta => {
            agent.transition(AgentState::Speaking).into_iter().collect()
        }
        ServerEvent::ResponseDone => agent.transition(AgentState::Listening).into_iter().collect(),
        ServerEvent::Error { error } => vec![SessionEvent::Error {
            message: error.summary(),
        }],
        ServerEvent::FunctionCallArgumentsDone { .. } | ServerEvent::Other => Vec::new(),
    }
}

async fn read_loop(
    mut stream: SocketStream,
    events: mpsc::Sender<SessionEvent>,
    outbound: mpsc::Sender<Outbound>,
    tools: Arc<ToolBridge>,
) {
    let mut agent = AgentTracker {
        current: AgentState::Initializing,
    };

    let close_reason = loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break CloseReason::TransportClosed(e.to_string()),
            None => break CloseReason::TransportClosed(String::new()),
        };

        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(frame) => {
                break CloseReason::TransportClosed(
                    frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                );
            }
            _ => continue,
        };

        let server_event = match serde_json::from_str::<ServerEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable realtime event");
                continue;
            }
        };

        if let ServerEvent::FunctionCallArgumentsDone {
            call_id,
            name,
            arguments,
        } = &server_event
        {
            spawn_tool_call(
                tools.clone(),
                outbound.clone(),
                call_id.clone(),
                name.clone(),
                arguments.clone(),
            );
        }

        for event in translate(server_event, &mut agent) {
            if events.send(event).await.is_err() {
                debug!("Session event receiver dropped; stopping reader.");
                return;
            }
        }
    };

    info!(reason = %close_reason, "Realtime connection closed by peer.");
    let _ = events
        .send(SessionEvent::Close {
            reason: close_reason,
        })
        .await;
}

/// Runs a tool off the reader task and posts its result back to the model.
fn spawn_tool_call(
    tools: Arc<ToolBridge>,
    outbound: mpsc::Sender<Outbound>,
    call_id: String,
    name: String,
    arguments: String,
) {
    tokio::spawn(async move {
        let output = tools.call(&name, &arguments).await;
        for event in function_call_reply(call_id, output) {
            if outbound.send(Outbound::Event(event)).await.is_err() {
                warn!(tool = %name, "Session closed before tool result could be sent");
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorDetail;
    use kemet_core::{
        context::Persona,
        events::SessionObserver,
        gateway::VehicleGateway,
        session::{SessionOrchestrator, TransportLease},
        tools::VehicleTools,
    };
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl Recorder {
        fn push(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl SessionObserver for Recorder {
        fn on_user_state_changed(&self, state: UserState) {
            self.push(SessionEvent::UserStateChanged(state));
        }
        fn on_agent_state_changed(&self, state: AgentState) {
            self.push(SessionEvent::AgentStateChanged(state));
        }
        fn on_input_transcribed(&self, transcript: &str, is_final: bool) {
            self.push(SessionEvent::InputTranscribed {
                transcript: transcript.to_string(),
                is_final,
            });
        }
        fn on_error(&self, message: &str) {
            self.push(SessionEvent::Error {
                message: message.to_string(),
            });
        }
        fn on_close(&self, reason: &CloseReason) {
            self.push(SessionEvent::Close {
                reason: reason.clone(),
            });
        }
    }

    #[test]
    fn agent_state_changes_are_deduplicated() {
        let mut agent = AgentTracker {
            current: AgentState::Initializing,
        };
        assert_eq!(
            translate(ServerEvent::SessionCreated, &mut agent),
            vec![SessionEvent::AgentStateChanged(AgentState::Listening)]
        );
        assert!(translate(ServerEvent::SessionUpdated, &mut agent).is_empty());
        assert_eq!(
            translate(ServerEvent::SpeechStopped, &mut agent),
            vec![
                SessionEvent::UserStateChanged(UserState::Listening),
                SessionEvent::AgentStateChanged(AgentState::Thinking),
            ]
        );
        assert!(translate(ServerEvent::ResponseCreated, &mut agent).is_empty());
        assert_eq!(
            translate(ServerEvent::ResponseAudioDelta, &mut agent),
            vec![SessionEvent::AgentStateChanged(AgentState::Speaking)]
        );
        assert!(translate(ServerEvent::ResponseAudioDelta, &mut agent).is_empty());
        assert_eq!(
            translate(
                ServerEvent::Error {
                    error: ErrorDetail {
                        message: Some("oops".into()),
                        ..Default::default()
                    }
                },
                &mut agent
            ),
            vec![SessionEvent::Error {
                message: "oops".into()
            }]
        );
    }

    #[test]
    fn user_turn_events_are_translated() {
        let mut agent = AgentTracker {
            current: AgentState::Speaking,
        };
        assert_eq!(
            translate(ServerEvent::SpeechStarted, &mut agent),
            vec![SessionEvent::UserStateChanged(UserState::Speaking)]
        );
        assert_eq!(
            translate(
                ServerEvent::TranscriptionCompleted {
                    transcript: "Turn on the AC".into()
                },
                &mut agent
            ),
            vec![SessionEvent::InputTranscribed {
                transcript: "Turn on the AC".into(),
                is_final: true,
            }]
        );
        assert_eq!(
            translate(ServerEvent::ResponseDone, &mut agent),
            vec![SessionEvent::AgentStateChanged(AgentState::Listening)]
        );
        assert!(translate(ServerEvent::ResponseDone, &mut agent).is_empty());
        assert_eq!(
            translate(
                ServerEvent::Error {
                    error: ErrorDetail::default()
                },
                &mut agent
            ),
            vec![SessionEvent::Error {
                message: "unspecified realtime error".into()
            }]
        );
    }

    async fn next_json(socket: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Expected a text frame, got {:?}", other),
            }
        }
    }

    async fn send_json(socket: &mut WebSocketStream<TcpStream>, value: Value) {
        socket
            .send(WsMessage::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    /// Plays the server side of one conversation: the user asks whether the
    /// car is locked, the model calls the tool and answers, then the peer
    /// hangs up.
    async fn scripted_server(listener: TcpListener) -> Vec<Value> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        let mut received = Vec::new();

        let update = next_json(&mut socket).await;
        let context = next_json(&mut socket).await;
        received.push(update);
        received.push(context);

        send_json(&mut socket, json!({"type": "session.created", "session": {}})).await;
        send_json(&mut socket, json!({"type": "input_audio_buffer.speech_started"})).await;
        send_json(&mut socket, json!({"type": "input_audio_buffer.speech_stopped"})).await;
        send_json(
            &mut socket,
            json!({
                "type": "conversation.item.input_audio_transcription.completed",
                "item_id": "item_1",
                "transcript": "Is my car locked?"
            }),
        )
        .await;
        send_json(
            &mut socket,
            json!({
                "type": "response.function_call_arguments.done",
                "call_id": "call_1",
                "name": "is_car_locked",
                "arguments": "{}"
            }),
        )
        .await;
        send_json(&mut socket, json!({"type": "response.audio.delta", "delta": "AAAA"})).await;
        send_json(&mut socket, json!({"type": "response.done", "response": {}})).await;

        received.push(next_json(&mut socket).await);
        received.push(next_json(&mut socket).await);

        socket.close(None).await.unwrap();
        received
    }

    fn persona() -> Persona {
        Persona {
            name: "test".into(),
            system_prompt: "You are Kemet Assistant.".into(),
            instructions: "Kemet Assistant Identity.".into(),
            voice: "Rex".into(),
        }
    }

    #[tokio::test]
    async fn full_session_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(scripted_server(listener));

        let transport = Arc::new(WebSocketTransport::new(RealtimeConfig {
            provider: Provider::Xai,
            url: format!("ws://{}", addr),
            api_key: SecretString::from("test-key".to_string()),
        }));
        let tools = VehicleTools::new(Arc::new(VehicleGateway::mock()), "demo-vehicle-01");
        let recorder = Arc::new(Recorder::default());
        let report = SessionOrchestrator::new(persona(), tools, transport)
            .with_observer(recorder.clone())
            .run(std::future::pending())
            .await
            .unwrap();

        assert!(matches!(report.close_reason, CloseReason::TransportClosed(_)));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                SessionEvent::AgentStateChanged(AgentState::Listening),
                SessionEvent::UserStateChanged(UserState::Speaking),
                SessionEvent::UserStateChanged(UserState::Listening),
                SessionEvent::AgentStateChanged(AgentState::Thinking),
                SessionEvent::InputTranscribed {
                    transcript: "Is my car locked?".into(),
                    is_final: true,
                },
                SessionEvent::AgentStateChanged(AgentState::Speaking),
                SessionEvent::AgentStateChanged(AgentState::Listening),
                SessionEvent::Close {
                    reason: report.close_reason.clone(),
                },
            ]
        );

        let received = server.await.unwrap();
        assert_eq!(received[0]["type"], "session.update");
        assert_eq!(received[0]["session"]["instructions"], "Kemet Assistant Identity.");
        let tool_names: Vec<&str> = received[0]["session"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(tool_names.contains(&"is_car_locked"));
        assert!(tool_names.contains(&"set_ac_state"));

        assert_eq!(received[1]["item"]["role"], "system");
        assert_eq!(
            received[1]["item"]["content"][0]["text"],
            "You are Kemet Assistant."
        );

        assert_eq!(received[2]["item"]["type"], "function_call_output");
        assert_eq!(received[2]["item"]["call_id"], "call_1");
        assert_eq!(received[2]["item"]["output"], "The car is currently locked.");
        assert_eq!(received[3]["type"], "response.create");
    }

    /// Accepts one client, drains the session setup and counts the close
    /// frames it receives until the connection goes away.
    async fn counting_server(listener: TcpListener) -> usize {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        next_json(&mut socket).await;
        next_json(&mut socket).await;

        let mut closes = 0;
        while let Some(message) = socket.next().await {
            match message {
                Ok(WsMessage::Close(_)) => closes += 1,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        closes
    }

    #[tokio::test]
    async fn close_sends_one_frame_and_stops_the_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(counting_server(listener));

        let transport = WebSocketTransport::new(RealtimeConfig {
            provider: Provider::Xai,
            url: format!("ws://{}", addr),
            api_key: SecretString::from("test-key".to_string()),
        });
        let tools = VehicleTools::new(Arc::new(VehicleGateway::mock()), "demo-vehicle-01");
        let bridge = Arc::new(ToolBridge::start(tools).await.unwrap());
        let persona = persona();
        let (events_tx, mut events_rx) = mpsc::channel(8);

        let mut lease = TransportLease::new(transport.connect().await.unwrap());
        lease
            .link()
            .unwrap()
            .start(
                SessionSetup {
                    context: persona.context(),
                    instructions: persona.instructions.clone(),
                    voice: persona.voice.clone(),
                    tools: bridge,
                },
                events_tx,
            )
            .await
            .unwrap();

        lease.release().await;
        lease.release().await;

        let closes = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closes, 1);

        let after_close = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
            .await
            .unwrap();
        assert_eq!(after_close, None);
    }

    #[tokio::test]
    async fn link_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            let mut closes = 0;
            while let Some(Ok(message)) = socket.next().await {
                if message.is_close() {
                    closes += 1;
                }
            }
            closes
        });

        let transport = WebSocketTransport::new(RealtimeConfig {
            provider: Provider::Xai,
            url: format!("ws://{}", addr),
            api_key: SecretString::from("test-key".to_string()),
        });
        let mut link = transport.connect().await.unwrap();
        link.close().await;
        link.close().await;

        let closes = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn unreachable_service_fails_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(RealtimeConfig {
            provider: Provider::OpenAI,
            url: format!("ws://{}", addr),
            api_key: SecretString::from("test-key".to_string()),
        });
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(_))
        ));
    }
}
