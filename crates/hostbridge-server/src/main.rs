//! Web server bridging an xterm.js terminal to a legacy host.
//!
//! Run with: cargo run -p hostbridge-server -- --config bridge.yaml
//!
//! Then open http://localhost:3000 in your browser.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use clap::Parser;
use hostbridge_core::BridgeConfig;
use hostbridge_shell::SshConnector;
use hostbridge_transport::websocket::{WsState, create_ws_router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "hostbridge", version, about = "Browser terminal for a legacy host")]
struct Cli {
    /// Configuration file (YAML). Falls back to $HOSTBRIDGE_CONFIG, then the
    /// user config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config =
        BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    tracing::info!(
        host = %config.host.address,
        port = config.host.port,
        term = %config.terminal.term,
        "Bridge configured"
    );

    let bind = config.server.bind.clone();
    let state = WsState::new(Arc::new(config), Arc::new(SshConnector::new()));

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Host Terminal</title>
    <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/xterm@5.3.0/css/xterm.css" />
    <script src="https://cdn.jsdelivr.net/npm/xterm@5.3.0/lib/xterm.js"></script>
    <script src="https://cdn.jsdelivr.net/npm/xterm-addon-fit@0.8.0/lib/xterm-addon-fit.js"></script>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            font-family: system-ui, sans-serif;
            color: #ddd;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        #terminal-container {
            width: 100%;
            height: calc(100vh - 160px);
        }
        .status {
            color: #888;
            font-size: 14px;
            margin-bottom: 10px;
        }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
        .toolbar { margin-bottom: 10px; }
        .toolbar button { margin-right: 6px; }
        dialog { background: #2a2a2a; color: #ddd; border: 1px solid #555; }
        dialog input { display: block; margin: 6px 0 12px; }
    </style>
</head>
<body>
    <h1>Host Terminal</h1>
    <div class="status" id="status">Connecting...</div>
    <div class="toolbar">
        <button id="signon-btn">Sign on</button>
        <button id="logout-btn">Log out</button>
        <button id="reconnect-btn">Reconnect</button>
        <button id="report-btn">Report mode</button>
        <button id="transcript-btn">Download transcript</button>
        <span id="mode">disconnected</span>
    </div>
    <div id="terminal-container"></div>

    <dialog id="signon">
        <form method="dialog" id="signon-form">
            <label>Access code <input type="password" id="access-code" autocomplete="off" /></label>
            <label>Verify code <input type="password" id="verify-code" autocomplete="off" /></label>
            <button type="submit">Sign on</button>
        </form>
    </dialog>

    <script>
        const term = new Terminal({
            cursorBlink: true,
            fontSize: 14,
            fontFamily: 'Menlo, Monaco, "Courier New", monospace',
            theme: {
                background: '#1e1e1e',
                foreground: '#d4d4d4',
            }
        });
        const fitAddon = new FitAddon.FitAddon();
        term.loadAddon(fitAddon);
        term.open(document.getElementById('terminal-container'));
        fitAddon.fit();

        const status = document.getElementById('status');
        const modeLabel = document.getElementById('mode');
        const encoder = new TextEncoder();
        const decoder = new TextDecoder();
        let ws;
        let reportActive = false;

        function toBase64(text) {
            let binary = '';
            for (const byte of encoder.encode(text)) binary += String.fromCharCode(byte);
            return btoa(binary);
        }

        function fromBase64(data) {
            const binary = atob(data);
            const bytes = new Uint8Array(binary.length);
            for (let i = 0; i < binary.length; i++) bytes[i] = binary.charCodeAt(i);
            return decoder.decode(bytes);
        }

        function send(msg) {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify(msg));
            }
        }

        async function answer(msg) {
            let reply;
            if (msg.query === 'clipboard') {
                let text = '';
                try { text = await navigator.clipboard.readText(); } catch (e) {}
                reply = { kind: 'clipboard', text };
            } else {
                reply = { kind: 'window_geometry', width: window.innerWidth, height: window.innerHeight };
            }
            send({ type: 'query_reply', request_id: msg.request_id, reply });
        }

        function handle(msg) {
            switch (msg.type) {
                case 'output':
                    term.write(fromBase64(msg.data));
                    break;
                case 'clear':
                    term.clear();
                    break;
                case 'reinitialize':
                    term.reset();
                    break;
                case 'scroll_to':
                    if (msg.target) {
                        document.getElementById(msg.target)?.scrollIntoView();
                    } else {
                        term.scrollToBottom();
                    }
                    break;
                case 'download': {
                    const blob = new Blob([fromBase64(msg.data)], { type: 'text/plain' });
                    const link = document.createElement('a');
                    link.href = URL.createObjectURL(blob);
                    link.download = msg.file_name;
                    link.click();
                    URL.revokeObjectURL(link.href);
                    break;
                }
                case 'show_dialog':
                    document.getElementById(msg.id)?.showModal();
                    break;
                case 'hide_dialog':
                    document.getElementById(msg.id)?.close();
                    break;
                case 'copy_to_clipboard':
                    navigator.clipboard.writeText(msg.text).catch(() => {});
                    break;
                case 'query':
                    answer(msg);
                    break;
                case 'mode_changed':
                    modeLabel.textContent = msg.mode;
                    reportActive = msg.mode === 'report';
                    break;
                case 'login_result':
                    if (!msg.success) {
                        term.writeln(`\r\n[Sign-on failed: ${msg.error}]\r\n`);
                    }
                    break;
                case 'session_started':
                    console.log('Session started:', msg.session_id);
                    break;
                case 'error':
                    term.writeln(`\r\n[Error: ${msg.message}]\r\n`);
                    break;
            }
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';

                // Send initial resize
                const { cols, rows } = term;
                send({ type: 'resize', cols, rows });
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                modeLabel.textContent = 'disconnected';
                setTimeout(connect, 2000);
            };

            ws.onerror = (err) => {
                console.error('WebSocket error:', err);
            };

            ws.onmessage = (event) => {
                try {
                    handle(JSON.parse(event.data));
                } catch (e) {
                    console.error('Failed to parse message:', e);
                }
            };
        }

        // Handle terminal input
        term.onData((data) => send({ type: 'input', data: toBase64(data) }));

        document.getElementById('signon-btn').onclick = () =>
            document.getElementById('signon').showModal();
        document.getElementById('signon-form').onsubmit = () => {
            const access = document.getElementById('access-code');
            const verify = document.getElementById('verify-code');
            send({ type: 'login', access_code: access.value, verify_code: verify.value });
            access.value = '';
            verify.value = '';
        };
        document.getElementById('logout-btn').onclick = () => send({ type: 'logout' });
        document.getElementById('reconnect-btn').onclick = () => send({ type: 'reconnect' });
        document.getElementById('report-btn').onclick = () =>
            send({ type: 'report_mode', active: !reportActive });
        document.getElementById('transcript-btn').onclick = () =>
            send({ type: 'download_transcript' });

        // Handle resize
        window.addEventListener('resize', () => {
            fitAddon.fit();
            const { cols, rows } = term;
            send({ type: 'resize', cols, rows });
        });

        // Keepalive
        setInterval(() => send({ type: 'ping' }), 30000);

        // Start connection
        connect();
    </script>
</body>
</html>
"#;
