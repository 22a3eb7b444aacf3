//! End-to-end session behavior against an in-memory host.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use hostbridge_core::{
    AuthFailure, BridgeConfig, BridgeError, Credential, Mode, ProtocolFailure, QueryReply,
    TerminalCommand, TerminalQuery, TerminalSink, TextOrigin,
};
use hostbridge_session::SessionHandle;
use hostbridge_shell::loopback::{LoopbackHost, loopback};
use tokio_test::{assert_err, assert_ok};

const SENTINEL: &str = "\u{1e}";

#[derive(Default)]
struct RecordingSink {
    pushed: Mutex<Vec<TerminalCommand>>,
}

impl RecordingSink {
    fn text(&self, origin: TextOrigin) -> String {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                TerminalCommand::Write { text, origin: o } if *o == origin => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .concat()
    }
}

#[async_trait]
impl TerminalSink for RecordingSink {
    fn push(&self, command: TerminalCommand) {
        self.pushed.lock().unwrap().push(command);
    }

    async fn query(&self, _query: TerminalQuery) -> Result<QueryReply, BridgeError> {
        Err(BridgeError::Terminal("not supported".to_string()))
    }
}

struct Harness {
    session: SessionHandle,
    host: LoopbackHost,
    sink: Arc<RecordingSink>,
}

fn harness() -> Harness {
    let mut config = BridgeConfig::default();
    config.login.wait_timeout_ms = 300;
    let (connector, host) = loopback();
    let sink = Arc::new(RecordingSink::default());
    let (session, _task) = SessionHandle::spawn(&config, Arc::new(connector), sink.clone());
    Harness {
        session,
        host,
        sink,
    }
}

/// Host that accepts ACCESS1/VERIFY1 and lands on the main menu.
fn friendly(h: &Harness) {
    h.host.greet(["ACCESS CODE: "]);
    h.host.reply_on("VERIFY1", "\r\nSelect Option: ");
}

async fn sign_in(h: &Harness) -> Result<(), BridgeError> {
    h.session
        .login(Credential::from("ACCESS1"), Credential::from("VERIFY1"))
        .await
}

/// Round-trip through the actor so queued commands have been handled.
async fn settle(h: &Harness) {
    assert_ok!(h.session.current_prompt().await);
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_login_reaches_default_input() {
    let h = harness();
    friendly(&h);

    assert_ok!(sign_in(&h).await);
    assert_eq!(h.session.mode(), Mode::DefaultInput);
    assert!(assert_ok!(h.session.is_signed_in().await));
    assert!(h.sink.text(TextOrigin::Host).contains("Select Option:"));
    assert_eq!(assert_ok!(h.session.current_prompt().await), "Select Option:");
}

#[tokio::test]
async fn test_bad_credentials() {
    let h = harness();
    h.host
        .reply_on("VERIFY1", "Not a valid ACCESS CODE/VERIFY CODE pair.");

    let err = assert_err!(sign_in(&h).await);
    assert!(matches!(
        err,
        BridgeError::Authentication(AuthFailure::BadCredentials)
    ));
    assert_eq!(h.session.mode(), Mode::Disconnected);
    assert_eq!(h.host.live(), 0);
}

#[tokio::test]
async fn test_verify_code_change_is_distinct() {
    let h = harness();
    h.host
        .reply_on("VERIFY1", "You must change your VERIFY CODE at this time.");

    let err = assert_err!(sign_in(&h).await);
    assert!(matches!(
        err,
        BridgeError::Authentication(AuthFailure::VerifyCodeChangeRequired)
    ));
}

#[tokio::test]
async fn test_round_bound_leaves_disconnected() {
    let h = harness();
    h.host.reply_on("VERIFY1", "Press any key to continue");
    h.host.reply_on(" ", "Press any key to continue");

    let err = assert_err!(sign_in(&h).await);
    assert!(matches!(
        err,
        BridgeError::Protocol(ProtocolFailure::UnrecognizedHostState { rounds: 20 })
    ));
    assert_eq!(h.session.mode(), Mode::Disconnected);
    assert!(!assert_ok!(h.session.is_signed_in().await));
}

#[tokio::test]
async fn test_silent_host_times_out() {
    let h = harness();
    h.host.greet(["ACCESS CODE: "]);

    let err = assert_err!(sign_in(&h).await);
    assert!(matches!(
        err,
        BridgeError::Protocol(ProtocolFailure::Timeout(_))
    ));
    assert_eq!(h.session.mode(), Mode::Disconnected);
    assert_eq!(h.host.live(), 0);
}

#[tokio::test]
async fn test_failed_sign_in_screen_stays_visible() {
    let h = harness();
    h.host.greet(["Volume set: ROU\r\nACCESS CODE: "]);
    h.host.reply_on("VERIFY1", "System is shutting down...");

    let err = assert_err!(sign_in(&h).await);
    assert!(matches!(
        err,
        BridgeError::Protocol(ProtocolFailure::Timeout(_))
    ));
    let shown = h.sink.text(TextOrigin::Host);
    assert!(shown.contains("Volume set: ROU"));
    assert!(shown.contains("System is shutting down..."));
    let lines = assert_ok!(h.session.history_lines().await);
    assert!(
        lines
            .iter()
            .any(|line| line.contains("System is shutting down..."))
    );
}

#[tokio::test]
async fn test_shutdown_during_sign_in_cancels() {
    let h = harness();
    let session = h.session.clone();
    let login = tokio::spawn(async move {
        session
            .login(Credential::from("ACCESS1"), Credential::from("VERIFY1"))
            .await
    });

    let host = h.host.clone();
    eventually(move || host.opened() == 1).await;
    h.session.shutdown();

    let err = assert_err!(login.await.unwrap());
    assert!(matches!(
        err,
        BridgeError::Protocol(ProtocolFailure::Cancelled)
    ));
    assert_eq!(h.host.live(), 0);
    assert_eq!(h.session.mode(), Mode::Disconnected);
}

#[tokio::test]
async fn test_relogin_replaces_channel() {
    let h = harness();
    friendly(&h);

    assert_ok!(sign_in(&h).await);
    assert_ok!(sign_in(&h).await);
    assert_eq!(h.host.opened(), 2);
    assert_eq!(h.host.closed(), 1);
    assert_eq!(h.host.peak_live(), 1);
}

#[tokio::test]
async fn test_command_switches_mode_before_sentinel() {
    let h = harness();
    friendly(&h);
    assert_ok!(sign_in(&h).await);
    h.host.observe_mode(h.session.subscribe_mode());
    let before = h.host.writes().len();

    assert_ok!(h.session.input("D ^XUP\r").await);
    settle(&h).await;

    let writes = h.host.writes();
    let sent: Vec<_> = writes[before..].iter().map(|w| w.text.as_str()).collect();
    assert_eq!(sent, vec!["D ^XUP\r", SENTINEL]);
    assert_eq!(writes[before + 1].mode, Some(Mode::DefaultReceive));
    assert_eq!(h.session.mode(), Mode::DefaultReceive);
}

#[tokio::test]
async fn test_sentinel_echo_completes_response() {
    let h = harness();
    friendly(&h);
    h.host.reply_on(SENTINEL, "\r\nVolume set: ROU\r\nSelect Option: \u{1e}");
    assert_ok!(sign_in(&h).await);
    let mut modes = h.session.subscribe_mode();

    assert_ok!(h.session.input("^\r").await);
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        modes.wait_for(|m| *m == Mode::DefaultInput).await.is_ok()
    })
    .await;
    assert!(matches!(reached, Ok(true)));

    settle(&h).await;
    let shown = h.sink.text(TextOrigin::Host);
    assert!(shown.contains("Volume set: ROU"));
    assert!(!shown.contains(SENTINEL));
}

#[tokio::test]
async fn test_report_mode_drops_keystrokes() {
    let h = harness();
    friendly(&h);
    assert_ok!(sign_in(&h).await);
    let before = h.host.written_text();

    assert_ok!(h.session.enter_report().await);
    assert_ok!(h.session.input("abc\r").await);
    settle(&h).await;
    assert_eq!(h.session.mode(), Mode::Report);
    assert_eq!(h.host.written_text(), before);

    assert_ok!(h.session.leave_report().await);
    assert_ok!(h.session.input("x").await);
    settle(&h).await;
    assert_eq!(h.host.written_text(), format!("{before}x"));
}

#[tokio::test]
async fn test_keystroke_while_disconnected_reconnects() {
    let h = harness();

    assert_ok!(h.session.input("x").await);
    settle(&h).await;

    assert_eq!(h.host.opened(), 1);
    assert_eq!(h.host.written_text(), "");
    assert_eq!(h.session.mode(), Mode::DefaultInput);
    assert!(!assert_ok!(h.session.is_signed_in().await));
}

#[tokio::test]
async fn test_stale_channel_reconnects_once() {
    let h = harness();
    friendly(&h);
    assert_ok!(sign_in(&h).await);

    h.host.dispose();
    assert_ok!(h.session.input("x").await);
    settle(&h).await;

    assert_eq!(h.host.opened(), 2);
    assert_eq!(h.host.peak_live(), 1);
    assert_eq!(h.session.mode(), Mode::DefaultInput);
    assert!(h.sink.text(TextOrigin::Echo).contains("reconnecting"));
}

#[tokio::test]
async fn test_failed_reconnect_stays_disconnected() {
    let h = harness();
    h.host.refuse_connections(true);

    assert_ok!(h.session.input("x").await);
    settle(&h).await;
    assert_eq!(h.session.mode(), Mode::Disconnected);
    assert!(h.sink.text(TextOrigin::Echo).contains("reconnect failed"));

    let err = assert_err!(h.session.reconnect().await);
    assert!(matches!(err, BridgeError::Connection(_)));
}

#[tokio::test]
async fn test_host_output_reaches_history() {
    let h = harness();
    assert_ok!(h.session.reconnect().await);

    h.host.push("\r\nPATIENT NAME: DOE,JANE// ");
    let sink = h.sink.clone();
    eventually(move || sink.text(TextOrigin::Host).contains("DOE,JANE")).await;

    assert_eq!(
        assert_ok!(h.session.current_prompt().await),
        "PATIENT NAME: DOE,JANE// "
    );
    assert_eq!(assert_ok!(h.session.extract_value().await), "DOE,JANE");
    let lines = assert_ok!(h.session.history_lines().await);
    assert_eq!(
        lines.last().map(String::as_str),
        Some("PATIENT NAME: DOE,JANE// ")
    );
}

#[tokio::test]
async fn test_hang_up_and_logout() {
    let h = harness();
    friendly(&h);
    assert_ok!(sign_in(&h).await);

    h.host.hang_up();
    let mut modes = h.session.subscribe_mode();
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        modes.wait_for(|m| *m == Mode::Disconnected).await.is_ok()
    })
    .await;
    assert!(matches!(reached, Ok(true)));

    assert_ok!(sign_in(&h).await);
    assert_ok!(h.session.logout().await);
    assert_eq!(h.session.mode(), Mode::Disconnected);
    assert_eq!(h.host.live(), 0);
}

#[tokio::test]
async fn test_resize_and_transcript() {
    let h = harness();
    friendly(&h);
    assert_ok!(sign_in(&h).await);

    assert_ok!(h.session.resize(132, 40).await);
    assert_ok!(h.session.download_transcript().await);
    settle(&h).await;

    assert_eq!(h.host.resizes(), vec![(132, 40)]);
    let pushed = h.sink.pushed.lock().unwrap();
    assert!(pushed.iter().any(|c| matches!(
        c,
        TerminalCommand::DownloadTranscript { contents, .. } if contents.contains("Select Option:")
    )));
}

#[tokio::test]
async fn test_shutdown_closes_channel() {
    let h = harness();
    friendly(&h);
    assert_ok!(sign_in(&h).await);

    h.session.shutdown();
    let host = h.host.clone();
    eventually(move || host.live() == 0).await;
    let err = assert_err!(h.session.current_prompt().await);
    assert!(matches!(err, BridgeError::SessionClosed));
}
