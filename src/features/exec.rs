//! Interactive shell in a pod container over a WebSocket.

use std::{
    io,
    net::TcpStream,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Result;
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use serde_json::json;
use tungstenite::{
    client::IntoClientRequest as _,
    http::HeaderValue,
    stream::MaybeTlsStream,
    Message, WebSocket,
};
use url::Url;

use crate::{
    api::{endpoint, AuthenticatedFetch, ClusterContext, Fetch as _},
    error::Error,
    logger,
};

const READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    /// First container when `None`
    pub container: Option<String>,
}

impl ExecTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }

    pub fn container(mut self, container: Option<impl Into<String>>) -> Self {
        self.container = container.map(Into::into);
        self
    }
}

/// `ws(s)://<host>/api/pods/exec?namespace=&pod=&container=&cluster=`
pub fn exec_url(base: &Url, target: &ExecTarget, cluster: &ClusterContext) -> Result<Url> {
    let mut url = base
        .join(endpoint::POD_EXEC.trim_start_matches('/'))
        .map_err(Error::from)?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::validation(format!("unsupported scheme {}", other)).into());
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| Error::validation(format!("cannot use scheme {}", scheme)))?;

    {
        let mut query = url.query_pairs_mut();

        query
            .append_pair("namespace", &target.namespace)
            .append_pair("pod", &target.pod);

        if let Some(container) = &target.container {
            query.append_pair("container", container);
        }

        if let Some((k, v)) = cluster.query_pair() {
            query.append_pair(&k, &v);
        }
    }

    Ok(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Output(Bytes),
    Closed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecInput {
    Stdin(Bytes),
    Resize { cols: u16, rows: u16 },
    Close,
}

impl ExecInput {
    fn into_message(self) -> Message {
        match self {
            Self::Stdin(bytes) => Message::Binary(bytes.to_vec()),
            Self::Resize { cols, rows } => Message::Text(
                json!({ "type": "resize", "cols": cols, "rows": rows }).to_string(),
            ),
            Self::Close => Message::Close(None),
        }
    }
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

fn set_read_timeout(socket: &Socket, timeout: Duration) -> io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        MaybeTlsStream::NativeTls(stream) => stream.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Io(e) => {
            matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        }
        _ => false,
    }
}

pub struct ExecSession {
    tx_input: Sender<ExecInput>,
    rx_event: Receiver<ExecEvent>,
    handle: Option<JoinHandle<()>>,
}

impl ExecSession {
    /// Opens the socket with the session cookie header and starts the I/O thread.
    pub fn connect(fetch: &AuthenticatedFetch, target: &ExecTarget) -> Result<Self> {
        let url = exec_url(fetch.base_url(), target, &fetch.cluster())?;

        logger!(info, "exec {}/{} {:?}", target.namespace, target.pod, target.container);

        let mut request = url.as_str().into_client_request().map_err(Error::from)?;

        if let Some(cookie) = fetch.cookie_header() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| Error::validation(format!("invalid session cookie: {}", e)))?;

            request.headers_mut().insert("Cookie", value);
        }

        let (socket, _) = tungstenite::connect(request).map_err(Error::from)?;

        set_read_timeout(&socket, READ_TIMEOUT).map_err(Error::from)?;

        let (tx_input, rx_input) = unbounded();
        let (tx_event, rx_event) = unbounded();

        let handle = thread::Builder::new()
            .name("exec".into())
            .spawn(move || run(socket, rx_input, tx_event))
            .map_err(Error::from)?;

        Ok(Self {
            tx_input,
            rx_event,
            handle: Some(handle),
        })
    }

    pub fn send(&self, input: ExecInput) -> Result<()> {
        self.tx_input
            .send(input)
            .map_err(|_| Error::Raw("exec session is closed".into()))?;

        Ok(())
    }

    pub fn events(&self) -> &Receiver<ExecEvent> {
        &self.rx_event
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx_input.send(ExecInput::Close);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                logger!(error, "exec thread panicked");
            }
        }
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut socket: Socket, rx_input: Receiver<ExecInput>, tx_event: Sender<ExecEvent>) {
    let send_event = |event: ExecEvent| tx_event.send(event).is_ok();

    loop {
        match socket.read() {
            Ok(Message::Binary(bytes)) => {
                if !send_event(ExecEvent::Output(Bytes::from(bytes))) {
                    break;
                }
            }
            Ok(Message::Text(text)) => {
                if !send_event(ExecEvent::Output(Bytes::from(text))) {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                logger!(info, "exec closed by server {:?}", frame);
                send_event(ExecEvent::Closed);
                break;
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                send_event(ExecEvent::Closed);
                break;
            }
            Err(e) => {
                logger!(error, "exec read failed: {}", e);
                send_event(ExecEvent::Error(e.to_string()));
                break;
            }
        }

        loop {
            let input = match rx_input.try_recv() {
                Ok(input) => input,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => ExecInput::Close,
            };

            let closing = input == ExecInput::Close;

            if let Err(e) = socket.send(input.into_message()) {
                if !closing {
                    logger!(error, "exec write failed: {}", e);
                    send_event(ExecEvent::Error(e.to_string()));
                }
                return;
            }

            if closing {
                send_event(ExecEvent::Closed);
                return;
            }
        }
    }
}
