use genradio_daemon::controller::PlaybackController;
use genradio_daemon::core::{CoreEvent, PlayerCore};
use genradio_daemon::directory::DirectoryClient;
use genradio_daemon::mpv_engine::MpvEngine;
use genradio_daemon::{http, socket, BroadcastMessage};
use genradio_proto::config::Config;
use genradio_proto::protocol::Command;
use genradio_proto::session::clamp_volume;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let now = chrono::Local::now();
        let mut message = format!("{} [{}] ", now.format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = genradio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,genradio_daemon=debug,genradio_proto=debug,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    info!("Station directory: {}", config.directory.base_url);

    let shutdown = CancellationToken::new();

    // All external inputs funnel into PlayerCore
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);

    // Engine events are forwarded into the core for the life of the process
    let volume = clamp_volume(config.playback.default_volume).unwrap_or(0.8);
    let (engine_tx, mut engine_rx) = mpsc::channel(64);
    let (engine, engine_task) = MpvEngine::spawn(volume, engine_tx);
    {
        let core_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = engine_rx.recv().await {
                if core_tx.send(CoreEvent::Engine(evt)).await.is_err() {
                    break;
                }
            }
        });
    }

    let directory = DirectoryClient::new(&config.directory)?;
    let controller = PlaybackController::new(engine, volume);
    let core = PlayerCore::new(
        controller,
        directory,
        config.directory.top_limit,
        event_tx.clone(),
        broadcast_tx.clone(),
        shutdown.clone(),
    );
    let state_manager = core.state_manager();

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        genradio_proto::platform::DAEMON_TCP_PORT,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
        shutdown.clone(),
    );

    let http_handle = if config.http.enabled {
        Some(http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
            shutdown.clone(),
        ))
    } else {
        None
    };

    // Initial listing
    let _ = event_tx
        .send(CoreEvent::Command(Command::LoadTop { limit: None }))
        .await;

    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    let _ = tx.send(CoreEvent::Shutdown).await;
                }
                Err(e) => warn!("Cannot listen for ctrl-c: {}", e),
            }
        });
    }
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    core.run(event_rx).await?;

    if let Some(handle) = http_handle {
        let _ = handle.await;
    }
    if let Err(e) = engine_task.await {
        warn!("mpv engine task ended abnormally: {}", e);
    }
    info!("Daemon stopped");
    Ok(())
}
