//! Utilities to help with testing against Redis and Sentinel.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};

pub fn setup_tracing_subscriber() {
    use tracing_subscriber::fmt::format::FmtSpan;
    let _ = tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_span_events(FmtSpan::ENTER)
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Returns an address on which nothing is listening.
pub async fn unused_address() -> SocketAddr {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    listener.local_addr().unwrap()
}

/// Encoded RESP replies.
pub mod reply {
    pub fn simple(s: &str) -> Vec<u8> {
        format!("+{s}\r\n").into_bytes()
    }

    pub fn error(s: &str) -> Vec<u8> {
        format!("-{s}\r\n").into_bytes()
    }

    pub fn integer(i: i64) -> Vec<u8> {
        format!(":{i}\r\n").into_bytes()
    }

    pub fn nil() -> Vec<u8> {
        b"$-1\r\n".to_vec()
    }

    pub fn nil_array() -> Vec<u8> {
        b"*-1\r\n".to_vec()
    }

    pub fn bulk(s: &str) -> Vec<u8> {
        format!("${}\r\n{s}\r\n", s.len()).into_bytes()
    }

    pub fn array(items: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", items.len()).into_bytes();
        for item in items {
            out.extend(bulk(item));
        }
        out
    }
}

type Handler = Arc<dyn Fn(&[String]) -> Vec<u8> + Send + Sync>;

#[derive(Default)]
struct Shared {
    commands: Mutex<Vec<Vec<String>>>,
    connections: Mutex<Vec<AbortHandle>>,
    accepted: AtomicUsize,
    closed_by_client: AtomicUsize,
    delays: Mutex<Vec<(String, Duration)>>,
}

/// A fake Redis (or Sentinel) server speaking just enough RESP for tests.
///
/// Every command is recorded and answered by the handler. Commands the
/// handler doesn't care about should be answered with `+OK`.
pub struct FakeRedis {
    address: SocketAddr,
    shared: Arc<Shared>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl FakeRedis {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&[String]) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let address = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(handler);
        let shared = Arc::new(Shared::default());

        let accept = tokio::task::spawn({
            let shared = shared.clone();
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    shared.accepted.fetch_add(1, Ordering::SeqCst);
                    let handle = tokio::task::spawn(serve(stream, handler.clone(), shared.clone()));
                    shared
                        .connections
                        .lock()
                        .unwrap()
                        .push(handle.abort_handle());
                }
            }
        });

        Self {
            address,
            shared,
            accept: Mutex::new(Some(accept)),
        }
    }

    /// A data node answering `PING`, and `+OK` to anything else.
    pub async fn data_node() -> Self {
        Self::start(|cmd| match cmd[0].as_str() {
            "PING" => reply::simple("PONG"),
            _ => reply::simple("OK"),
        })
        .await
    }

    /// A sentinel which reports whatever address `master` currently holds.
    pub async fn sentinel(master: Arc<Mutex<Option<SocketAddr>>>) -> Self {
        Self::start(move |cmd| {
            let is_lookup = cmd.len() == 3
                && cmd[0].eq_ignore_ascii_case("SENTINEL")
                && cmd[1].eq_ignore_ascii_case("get-master-addr-by-name");
            if !is_lookup {
                return reply::simple("OK");
            }
            match *master.lock().unwrap() {
                Some(address) => reply::array(&[
                    &address.ip().to_string(),
                    &address.port().to_string(),
                ]),
                None => reply::nil_array(),
            }
        })
        .await
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// All commands received so far, across all connections.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// Number of commands received so far whose name matches `name`.
    pub fn count(&self, name: &str) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| cmd[0].eq_ignore_ascii_case(name))
            .count()
    }

    /// Holds back the reply to every `name` command for `delay`.
    pub fn delay_replies_to(&self, name: &str, delay: Duration) {
        self.shared
            .delays
            .lock()
            .unwrap()
            .push((name.to_string(), delay));
    }

    pub fn connections_accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn connections_closed_by_client(&self) -> usize {
        self.shared.closed_by_client.load(Ordering::SeqCst)
    }

    /// Waits (in real time, up to a few seconds) until clients have closed
    /// `n` connections.
    pub async fn wait_for_closed_connections(&self, n: usize) -> bool {
        for _ in 0..500 {
            if self.connections_closed_by_client() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Stops listening and severs every open connection, as a crashed node
    /// would.
    ///
    /// Returns once the listening socket is closed, so later connection
    /// attempts are refused.
    pub async fn stop(&self) {
        let accept = self.accept.lock().unwrap().take();
        if let Some(accept) = accept {
            accept.abort();
            let _ = accept.await;
        }
        self.sever_connections();
    }

    fn sever_connections(&self) {
        for conn in self.shared.connections.lock().unwrap().drain(..) {
            conn.abort();
        }
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        if let Some(accept) = self.accept.lock().unwrap().take() {
            accept.abort();
        }
        self.sever_connections();
    }
}

async fn serve(stream: TcpStream, handler: Handler, shared: Arc<Shared>) {
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);
    loop {
        let Some(cmd) = read_command(&mut read).await else {
            shared.closed_by_client.fetch_add(1, Ordering::SeqCst);
            return;
        };
        let response = handler(&cmd);
        let delay = shared
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| cmd[0].eq_ignore_ascii_case(name))
            .map(|(_, delay)| *delay);
        shared.commands.lock().unwrap().push(cmd);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if write.write_all(&response).await.is_err() {
            return;
        }
    }
}

// Reads one RESP array of bulk strings. Returns None on EOF or garbage.
async fn read_command<R>(read: &mut R) -> Option<Vec<String>>
where
    R: AsyncBufReadExt + AsyncReadExt + Unpin,
{
    let count = read_header(read, b'*').await?;
    let mut cmd = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_header(read, b'$').await?;
        let mut data = vec![0; len + 2];
        read.read_exact(&mut data).await.ok()?;
        data.truncate(len);
        cmd.push(String::from_utf8_lossy(&data).into_owned());
    }
    if cmd.is_empty() {
        return None;
    }
    Some(cmd)
}

async fn read_header<R>(read: &mut R, prefix: u8) -> Option<usize>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    if read.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let line = line.trim_end();
    if line.as_bytes().first() != Some(&prefix) {
        return None;
    }
    line[1..].parse().ok()
}
