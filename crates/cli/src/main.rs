//! mobicall - drive scripted calls through the call core
//!
//! Every collaborator is an in-memory loopback, so the binary needs no
//! network or platform APIs. It replays a call the way a device would see
//! it and prints the lifecycle events the UI layer would receive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;

use mobicall_call_core::logging::{log_welcome, parse_log_level};
use mobicall_call_core::loopback::{
    EndBehavior, LoopbackHarness, LoopbackInitiator, StaticCredentials,
};
use mobicall_call_core::{
    Call, CallConfig, CallSessionController, CallSlotRegistry, CallStatus, LifecycleEvent,
    LoggingConfig, MediaLeg, MediaState, NativeUiAction, RemoteStatus, SessionSetupFlow,
    SetupTrigger, SignalingSender, SignalingUpdate, setup_logging,
};

#[derive(Parser, Debug)]
#[command(name = "mobicall", version, about = "Replay voice calls through the mobicall call core")]
struct Cli {
    /// TOML file with call configuration
    #[arg(short, long, env = "MOBICALL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive a call delivered by push
    Inbound {
        /// Raw push payload
        #[arg(
            long,
            default_value = r#"{"direction":"inbound","callerHandle":"+98912","accessToken":"tok1","id":"c1"}"#
        )]
        push: String,

        /// Decline the call instead of answering it
        #[arg(long)]
        decline: bool,
    },
    /// Dial out to a handle
    Outbound {
        /// Number or handle to call
        destination: String,

        /// API token used to place the call
        #[arg(long, env = "MOBICALL_API_TOKEN", default_value = "demo-token")]
        api_token: String,

        /// Leave the native end request unconfirmed to show the local fallback
        #[arg(long)]
        unconfirmed_end: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::new(parse_log_level(&cli.log_level)?);
    if cli.json {
        logging = logging.with_json();
    }
    setup_logging(logging)?;
    log_welcome("mobicall", mobicall_call_core::VERSION);

    let config = match &cli.config {
        Some(path) => CallConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CallConfig::default(),
    };

    match cli.command {
        Command::Inbound { push, decline } => run_inbound(config, &push, decline).await,
        Command::Outbound {
            destination,
            api_token,
            unconfirmed_end,
        } => run_outbound(config, &destination, api_token, unconfirmed_end).await,
    }
}

struct Session {
    harness: LoopbackHarness,
    controller: CallSessionController,
    printer: tokio::task::JoinHandle<()>,
}

impl Session {
    async fn start(config: CallConfig, setup: &SessionSetupFlow, trigger: SetupTrigger) -> Result<Self> {
        let init = setup.resolve(trigger).await.context("call setup failed")?;
        info!(call_id = %init.id, direction = %init.direction, "Call resolved");

        let harness = LoopbackHarness::new();
        let controller = CallSessionController::new(
            config,
            harness.telephony.clone(),
            harness.signaling.clone(),
            harness.audio.clone(),
        );
        harness.telephony.connect(controller.native_ui_sender());
        let printer = tokio::spawn(print_events(controller.subscribe()));

        controller
            .start(Call::new(init))
            .await
            .context("call start failed")?;
        Ok(Self {
            harness,
            controller,
            printer,
        })
    }

    fn remote(&self) -> Result<SignalingSender> {
        self.harness
            .signaling
            .remote()
            .context("signaling channel is not open")
    }

    async fn reach(&self, status: CallStatus) -> Result<()> {
        self.controller
            .wait_for_status(status)
            .await
            .map(|_| ())
            .with_context(|| format!("call ended before reaching {}", status))
    }

    async fn finish(self) -> Result<()> {
        self.controller.closed().await;
        let snapshot = self.controller.snapshot().context("call never started")?;
        println!(
            "call {} finished: {}",
            snapshot.id,
            snapshot
                .finish_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".into())
        );
        println!(
            "audio operations: {}, native requests: {}, signaling sent: {:?}",
            self.harness.audio.ops().len(),
            self.harness.telephony.ops().len(),
            self.harness.signaling.sent()
        );
        drop(self.controller);
        let _ = self.printer.await;
        Ok(())
    }
}

async fn run_inbound(config: CallConfig, push: &str, decline: bool) -> Result<()> {
    let setup = SessionSetupFlow::new(
        config.clone(),
        CallSlotRegistry::new(),
        Arc::new(StaticCredentials::new(None)),
        Arc::new(LoopbackInitiator::new()),
    );
    let session = Session::start(config, &setup, SetupTrigger::push(push)).await?;
    pause().await;

    if decline {
        session.controller.hangup();
        return session.finish().await;
    }

    session
        .controller
        .native_ui_sender()
        .deliver(NativeUiAction::Accept);
    session.reach(CallStatus::Accepted).await?;

    let remote = session.remote()?;
    connect_legs(&remote);
    session.reach(CallStatus::Conversation).await?;
    pause().await;

    match session.controller.toggle_mute().await {
        Ok(muted) => info!(muted, "Mute toggled"),
        Err(e) => info!(error = %e, "Mute toggle failed"),
    }
    pause().await;

    remote.deliver(SignalingUpdate::Terminate { rejected: false });
    session.finish().await
}

async fn run_outbound(
    config: CallConfig,
    destination: &str,
    api_token: String,
    unconfirmed_end: bool,
) -> Result<()> {
    let setup = SessionSetupFlow::new(
        config.clone(),
        CallSlotRegistry::new(),
        Arc::new(StaticCredentials::new(Some(api_token))),
        Arc::new(LoopbackInitiator::new()),
    );
    let session = Session::start(config, &setup, SetupTrigger::dial(destination)).await?;
    let remote = session.remote()?;

    pause().await;
    remote.deliver(SignalingUpdate::StatusUpdate {
        status: RemoteStatus::Ringing,
    });
    pause().await;
    remote.deliver(SignalingUpdate::StatusUpdate {
        status: RemoteStatus::Accepted,
    });
    session.reach(CallStatus::Accepted).await?;
    connect_legs(&remote);
    session.reach(CallStatus::Conversation).await?;

    session.controller.toggle_speaker();
    pause().await;

    if unconfirmed_end {
        session.harness.telephony.set_end_behavior(EndBehavior::Ignore);
    }
    session.controller.hangup();
    session.finish().await
}

fn connect_legs(remote: &SignalingSender) {
    for leg in [MediaLeg::Caller, MediaLeg::Receptor] {
        remote.deliver(SignalingUpdate::MediaUpdate {
            leg,
            state: MediaState::Connected,
        });
    }
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

async fn print_events(mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", describe(&event)),
            Err(broadcast::error::RecvError::Lagged(n)) => println!("({} events skipped)", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe(event: &LifecycleEvent) -> String {
    match event {
        LifecycleEvent::StateChanged {
            call_id,
            old,
            new,
            is_local,
        } => {
            let origin = if *is_local { "local" } else { "remote" };
            match old {
                Some(old) => format!("[{}] {} -> {} ({})", call_id, old, new, origin),
                None => format!("[{}] -> {} ({})", call_id, new, origin),
            }
        }
        LifecycleEvent::MediaStateChanged {
            call_id,
            leg,
            old,
            new,
        } => format!("[{}] {} media {} -> {}", call_id, leg, old, new),
        LifecycleEvent::MuteChanged { call_id, muted } => {
            format!("[{}] muted: {}", call_id, muted)
        }
        LifecycleEvent::SpeakerChanged { call_id, enabled } => {
            format!("[{}] speaker: {}", call_id, enabled)
        }
        LifecycleEvent::ActionFailed { call_id, error } => {
            format!("[{}] action failed: {}", call_id, error)
        }
        LifecycleEvent::Finished { call_id, reason } => {
            format!("[{}] finished: {}", call_id, reason)
        }
    }
}
