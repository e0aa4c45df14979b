use crate::core::CoreEvent;
use crate::BroadcastMessage;
use genradio_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use genradio_proto::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest command frame body a client may announce.
const MAX_FRAME_LEN: usize = 64 * 1024;

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx, shutdown).await;
    })
}

/// Accept loop over an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    shutdown: CancellationToken,
) {
    let mut client_id = 0usize;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("TCP server shutting down");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                let token = shutdown.clone();

                tokio::spawn(async move {
                    handle_client(stream, sm, id, evt_tx, bcast_rx, token).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<CoreEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
    shutdown: CancellationToken,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello with the current snapshot first
    match encode_hello(&state_manager).await {
        Ok(encoded) => {
            if write_half.write_all(&encoded).await.is_err() {
                return;
            }
        }
        Err(e) => {
            warn!("Client {}: cannot encode hello: {}", client_id, e);
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        debug!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            if frame_len(&read_buf) - 4 > MAX_FRAME_LEN {
                                warn!(
                                    "Client {} announced a {} byte frame, dropping connection",
                                    client_id,
                                    frame_len(&read_buf) - 4
                                );
                                return;
                            }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    if event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
                                        warn!("CoreEvent channel closed");
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) if !frame_complete(&read_buf) => break,
                                Err(e) => {
                                    // complete frame that is not a valid message
                                    warn!("Client {} sent an undecodable frame: {}", client_id, e);
                                    let skip = frame_len(&read_buf);
                                    read_buf.drain(..skip);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        Message::Broadcast(Broadcast::Error { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn frame_len(buf: &[u8]) -> usize {
    (u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize).saturating_add(4)
}

fn frame_complete(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf.len() >= frame_len(buf)
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use genradio_proto::protocol::Command;
    use genradio_proto::session::PlaybackSession;

    async fn read_message(stream: &mut TcpStream) -> Message {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().0
    }

    #[tokio::test]
    async fn test_hello_commands_and_broadcasts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sm = Arc::new(StateManager::new(PlaybackSession::new(0.3)));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (bcast_tx, _) = broadcast::channel(16);
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            sm.clone(),
            event_tx,
            bcast_tx.clone(),
            token.clone(),
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        match read_message(&mut client).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
                ..
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.session.volume, 0.3);
            }
            other => panic!("expected hello, got {:?}", other),
        }

        // a command split across two writes
        let encoded = Message::Command(Command::Toggle).encode().unwrap();
        client.write_all(&encoded[..3]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(&encoded[3..]).await.unwrap();
        match event_rx.recv().await {
            Some(CoreEvent::Command(Command::Toggle)) => {}
            other => panic!("expected toggle, got {:?}", other),
        }

        bcast_tx
            .send(BroadcastMessage::Error("Cannot play this stream: gone".into()))
            .unwrap();
        match read_message(&mut client).await {
            Message::Broadcast(Broadcast::Error { message }) => {
                assert!(message.starts_with("Cannot play"));
            }
            other => panic!("expected error, got {:?}", other),
        }

        token.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_drops_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sm = Arc::new(StateManager::new(PlaybackSession::new(0.3)));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (bcast_tx, _) = broadcast::channel(16);
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(listener, sm, event_tx, bcast_tx, token.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            read_message(&mut client).await,
            Message::Broadcast(Broadcast::Hello { .. })
        ));

        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(std::time::Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("server closes the connection")
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(event_rx.try_recv().is_err());

        token.cancel();
        server.await.unwrap();
    }
}
