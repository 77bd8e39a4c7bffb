//! End-to-end call flow against the real relay, mounted in-process.

use std::sync::Arc;
use std::time::Duration;

use dentline_core::{
    AuthContext, Config, NullSink, Role, RoomId, Session, SessionConfig, SessionState,
    SyntheticCapture, UserProfile,
};
use dentline_desk::{router, DeskState};
use tokio::time::{sleep, timeout};
use webrtc::peer_connection::signaling_state::RTCSignalingState;

async fn spawn_desk() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(DeskState::new())).await.unwrap();
    });
    format!("http://{addr}")
}

fn config_for(desk_url: &str) -> Config {
    Config {
        relay_url: Some(desk_url.to_string()),
        api_url: desk_url.to_string(),
        // Loopback-only: host candidates are enough, no STUN round trips.
        stun_servers: vec![],
    }
}

fn auth_for(role: Role) -> AuthContext {
    AuthContext {
        token: "test".into(),
        user: UserProfile {
            id: format!("{role:?}").to_lowercase(),
            user_name: "tester".into(),
            role,
        },
    }
}

async fn start_session(config: &Config, role: Role, room: &str) -> Arc<Session> {
    Session::start(
        config,
        auth_for(role),
        SessionConfig::new(RoomId::new(room)),
        Arc::new(SyntheticCapture),
        Arc::new(NullSink),
    )
    .await
    .expect("session start")
}

async fn wait_for_stable_pair(a: &Session, b: &Session) {
    timeout(Duration::from_secs(15), async {
        loop {
            let a_states = a.peers().signaling_states().await;
            let b_states = b.peers().signaling_states().await;
            let settled = |states: &[(dentline_core::PeerId, RTCSignalingState)]| {
                states.len() == 1 && states[0].1 == RTCSignalingState::Stable
            };
            if settled(&a_states) && settled(&b_states) {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("negotiation did not reach stable state");
}

async fn wait_for_state(session: &Session, wanted: SessionState, limit: Duration) {
    let mut state = session.state();
    timeout(limit, async {
        while *state.borrow() != wanted {
            state.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {wanted:?}"));
}

#[tokio::test]
async fn two_participants_negotiate_one_connection_each() {
    let desk_url = spawn_desk().await;
    let config = config_for(&desk_url);

    let patient = start_session(&config, Role::Patient, "exam-room-1").await;
    // Let the patient settle into the room before the second join so the
    // peer-joined event lands on exactly one side.
    sleep(Duration::from_millis(200)).await;
    let dentist = start_session(&config, Role::Dentist, "exam-room-1").await;

    wait_for_stable_pair(&patient, &dentist).await;

    assert_eq!(patient.peers().peer_count().await, 1);
    assert_eq!(dentist.peers().peer_count().await, 1);

    patient.hang_up().await;
    dentist.hang_up().await;
}

#[tokio::test]
async fn remote_media_arrives_and_sessions_go_active() {
    let desk_url = spawn_desk().await;
    let config = config_for(&desk_url);

    let patient = start_session(&config, Role::Patient, "exam-room-2").await;
    sleep(Duration::from_millis(200)).await;
    let dentist = start_session(&config, Role::Dentist, "exam-room-2").await;

    wait_for_stable_pair(&patient, &dentist).await;

    // Synthetic capture keeps pumping frames; once ICE/DTLS complete over
    // loopback the first RTP packet flips each session to Active.
    wait_for_state(&patient, SessionState::Active, Duration::from_secs(30)).await;
    wait_for_state(&dentist, SessionState::Active, Duration::from_secs(30)).await;

    let patient_states = patient.peers().signaling_states().await;
    let handle = patient.peers().handle(&patient_states[0].0).await.unwrap();
    assert!(handle.remote_media().track_count() >= 1);

    dentist.hang_up().await;
}

#[tokio::test]
async fn dentist_hang_up_ends_the_call_for_the_patient() {
    let desk_url = spawn_desk().await;
    let config = config_for(&desk_url);

    let patient = start_session(&config, Role::Patient, "exam-room-3").await;
    sleep(Duration::from_millis(200)).await;
    let dentist = start_session(&config, Role::Dentist, "exam-room-3").await;

    wait_for_stable_pair(&patient, &dentist).await;

    dentist.hang_up().await;
    wait_for_state(&dentist, SessionState::Ended, Duration::from_secs(5)).await;
    // The relayed end-call tears the patient side down without any local
    // hang-up.
    wait_for_state(&patient, SessionState::Ended, Duration::from_secs(10)).await;
    assert_eq!(patient.peers().peer_count().await, 0);
}
