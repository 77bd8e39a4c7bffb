use std::sync::Arc;

use clap::Parser;
use dentline_core::session::SessionError;
use dentline_core::{
    AppointmentId, AuthContext, Config, NullSink, Role, RoomId, Session, SessionConfig,
    SessionEvent, SyntheticCapture, UserProfile,
};

#[derive(Parser, Debug)]
#[command(name = "dentline", about = "Join a consultation call room")]
struct Cli {
    /// Room identifier shared with the other participant.
    #[arg(long)]
    room: String,

    /// Role to join as: patient, dentist, or admin.
    #[arg(long, default_value = "patient")]
    role: String,

    /// Bearer token for the REST backend.
    #[arg(long, env = "DENTLINE_TOKEN", default_value = "")]
    token: String,

    /// Appointment the call is tied to (enables consultation submission).
    #[arg(long)]
    appointment: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    dentline_core::telemetry::init("info");

    let cli = Cli::parse();
    let config = Config::from_env();
    let role: Role = cli
        .role
        .parse()
        .map_err(|err: String| anyhow::anyhow!(err))?;

    let auth = AuthContext {
        token: cli.token,
        user: UserProfile {
            id: "local".into(),
            user_name: "local".into(),
            role,
        },
    };

    let mut session_config = SessionConfig::new(RoomId::new(cli.room));
    session_config.appointment_id = cli.appointment.map(AppointmentId::new);

    let session = match Session::start(
        &config,
        auth,
        session_config,
        Arc::new(SyntheticCapture),
        Arc::new(NullSink),
    )
    .await
    {
        Ok(session) => session,
        Err(SessionError::Media(err)) => {
            eprintln!("{}", err.user_hint());
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(room = %session.room(), "joined; press ctrl-c to hang up");

    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("session event stream unavailable"))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("hanging up");
                session.hang_up().await;
            }
            event = events.recv() => match event {
                Some(SessionEvent::Ended { reason }) => {
                    tracing::info!(?reason, "call ended");
                    break;
                }
                Some(event) => tracing::info!(?event, "session event"),
                None => break,
            },
        }
    }

    Ok(())
}
