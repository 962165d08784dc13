use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pilesnap_protocol::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

mod bots;
mod game;
mod registry;
mod timers;

use registry::Registry;
use timers::{TimerEvent, Timers};

#[derive(Clone)]
struct AppState {
    registry: Arc<Mutex<Registry>>,
}

#[derive(Parser)]
#[command(name = "pilesnap-server", about = "pilesnap game server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9001")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<TimerEvent>();
    let state = AppState {
        registry: Arc::new(Mutex::new(Registry::new(Timers::new(timer_tx)))),
    };

    // Fired timers re-enter the registry exactly like client events,
    // one run-to-completion mutation at a time.
    let dispatch_state = state.clone();
    tokio::spawn(async move {
        while let Some(event) = timer_rx.recv().await {
            dispatch_state.registry.lock().handle_timer_event(event);
        }
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    println!("server listening on ws://{}/ws", args.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx_out, mut rx_out) = mpsc::unbounded_channel::<ServerToClient>();

    tokio::spawn(async move {
        while let Some(msg) = rx_out.recv().await {
            let text = serde_json::to_string(&msg).unwrap();
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let my_id = Uuid::new_v4();
    let _ = tx_out.send(ServerToClient::Hello { your_id: my_id });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(t) => {
                if let Ok(cmd) = serde_json::from_str::<ClientToServer>(&t) {
                    route_cmd(cmd, &state, my_id, &tx_out);
                } else {
                    let _ = tx_out.send(ServerToClient::Error {
                        message: "bad json".into(),
                    });
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // A dropped connection counts as leaving the room.
    let _ = state.registry.lock().leave_room(my_id);
}

fn route_cmd(
    cmd: ClientToServer,
    state: &AppState,
    my_id: Uuid,
    tx_out: &mpsc::UnboundedSender<ServerToClient>,
) {
    eprintln!("[WS] from {} → {:?}", &my_id.to_string()[..8], cmd);

    let mut registry = state.registry.lock();
    let result = match cmd {
        ClientToServer::CreateRoom { name } => registry
            .create_room(name, my_id, Some(tx_out.clone()))
            .map(|_| ()),
        ClientToServer::JoinRoom { code, name } => registry
            .join_room(&code, name, my_id, Some(tx_out.clone()))
            .map(|_| ()),
        ClientToServer::Leave => registry.leave_room(my_id),
        ClientToServer::ToggleReady => registry.toggle_ready(my_id),
        ClientToServer::AddBot => registry.add_bot(my_id).map(|_| ()),
        ClientToServer::RemoveBot { bot_id } => registry.remove_bot(my_id, bot_id),
        ClientToServer::StartGame => registry.start_game(my_id),
        ClientToServer::FlipCard => registry.flip_card(my_id),
        ClientToServer::ClaimAttempt { claim_id } => registry.claim_attempt(my_id, claim_id),
    };

    // Rejections go only to the requester, never into the broadcast.
    if let Err(rejection) = result {
        let _ = tx_out.send(ServerToClient::Error {
            message: rejection.to_string(),
        });
    }
}
