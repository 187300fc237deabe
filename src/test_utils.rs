// src/test_utils.rs
//! Test helpers: local stub servers and an instrumented provider

use crate::provider::{underlying_constructor, Provider, SocketArgs, SocketHandle, TargetAddr};
use crate::utils::errors::Result;
use once_cell::sync::Lazy;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

static GLOBAL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialises tests that touch the process-wide registry
pub fn global_lock() -> &'static Mutex<()> {
    &GLOBAL_LOCK
}

/// Provider counting its calls and delegating to the native constructor
#[derive(Debug)]
pub struct CountingProvider {
    name: String,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for CountingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn socket(&self, args: SocketArgs) -> Result<SocketHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        underlying_constructor()(args)
    }
}

async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// TCP echo server
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = bind_local().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// UDP echo server
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });
    addr
}

/// Read the 4-byte "ping" a client sends through an established tunnel and
/// answer "pong"
async fn ping_pong(stream: &mut TcpStream) -> Vec<u8> {
    let mut payload = [0u8; 4];
    if stream.read_exact(&mut payload).await.is_err() {
        return Vec::new();
    }
    let _ = stream.write_all(b"pong").await;
    payload.to_vec()
}

/// What a SOCKS5 stub saw
#[derive(Debug)]
pub struct Socks5Observation {
    pub methods: Vec<u8>,
    pub auth: Option<(String, String)>,
    pub target: TargetAddr,
    pub payload: Vec<u8>,
}

/// Single-connection SOCKS5 server. With `credentials`, username/password
/// authentication is required.
pub async fn spawn_socks5_stub(
    credentials: Option<(&str, &str)>,
) -> (SocketAddr, JoinHandle<Socks5Observation>) {
    let (listener, addr) = bind_local().await;
    let credentials = credentials.map(|(u, p)| (u.to_string(), p.to_string()));

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x05);
        let mut methods = vec![0u8; header[1] as usize];
        stream.read_exact(&mut methods).await.unwrap();

        let mut auth = None;
        if let Some((username, password)) = &credentials {
            assert!(methods.contains(&0x02), "client did not offer password auth");
            stream.write_all(&[0x05, 0x02]).await.unwrap();

            let mut version_len = [0u8; 2];
            stream.read_exact(&mut version_len).await.unwrap();
            let mut user = vec![0u8; version_len[1] as usize];
            stream.read_exact(&mut user).await.unwrap();
            let mut pass_len = [0u8; 1];
            stream.read_exact(&mut pass_len).await.unwrap();
            let mut pass = vec![0u8; pass_len[0] as usize];
            stream.read_exact(&mut pass).await.unwrap();

            let seen = (
                String::from_utf8(user).unwrap(),
                String::from_utf8(pass).unwrap(),
            );
            if &seen.0 != username || &seen.1 != password {
                stream.write_all(&[0x01, 0x01]).await.unwrap();
                return Socks5Observation {
                    methods,
                    auth: Some(seen),
                    target: TargetAddr::Domain(String::new(), 0),
                    payload: Vec::new(),
                };
            }
            stream.write_all(&[0x01, 0x00]).await.unwrap();
            auth = Some(seen);
        } else {
            stream.write_all(&[0x05, 0x00]).await.unwrap();
        }

        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await.unwrap();
        assert_eq!(&request[..3], &[0x05, 0x01, 0x00]);

        let host = match request[3] {
            0x01 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await.unwrap();
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            0x04 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await.unwrap();
                Some(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            _ => None,
        };
        let domain = if host.is_none() {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.unwrap();
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await.unwrap();
            String::from_utf8(name).unwrap()
        } else {
            String::new()
        };
        let mut port = [0u8; 2];
        stream.read_exact(&mut port).await.unwrap();
        let port = u16::from_be_bytes(port);

        let target = match host {
            Some(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
            None => TargetAddr::Domain(domain, port),
        };

        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let payload = ping_pong(&mut stream).await;

        Socks5Observation {
            methods,
            auth,
            target,
            payload,
        }
    });

    (addr, handle)
}

/// What a SOCKS4 stub saw
#[derive(Debug)]
pub struct Socks4Observation {
    pub target: TargetAddr,
    pub user_id: String,
    pub payload: Vec<u8>,
}

async fn read_nul_terminated(stream: &mut TcpStream) -> String {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.unwrap();
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).unwrap()
}

/// Single-connection SOCKS4/4a server
pub async fn spawn_socks4_stub() -> (SocketAddr, JoinHandle<Socks4Observation>) {
    let (listener, addr) = bind_local().await;

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut request = [0u8; 8];
        stream.read_exact(&mut request).await.unwrap();
        assert_eq!(request[0], 0x04);
        assert_eq!(request[1], 0x01);
        let port = u16::from_be_bytes([request[2], request[3]]);
        let ip = Ipv4Addr::new(request[4], request[5], request[6], request[7]);

        let user_id = read_nul_terminated(&mut stream).await;
        let target = if ip.octets()[..3] == [0, 0, 0] && ip.octets()[3] != 0 {
            TargetAddr::Domain(read_nul_terminated(&mut stream).await, port)
        } else {
            TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
        };

        stream
            .write_all(&[0x00, 0x5A, 0, 80, 127, 0, 0, 1])
            .await
            .unwrap();
        let payload = ping_pong(&mut stream).await;

        Socks4Observation {
            target,
            user_id,
            payload,
        }
    });

    (addr, handle)
}

/// What an HTTP CONNECT stub saw
#[derive(Debug)]
pub struct HttpObservation {
    pub request_line: String,
    pub proxy_authorization: Option<String>,
    pub payload: Vec<u8>,
}

/// Single-connection HTTP proxy answering CONNECT with `status`
pub async fn spawn_http_connect_stub(status: u16) -> (SocketAddr, JoinHandle<HttpObservation>) {
    let (listener, addr) = bind_local().await;

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        let head = String::from_utf8(head).unwrap();
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default().to_string();
        let proxy_authorization = lines
            .filter_map(|line| line.split_once(": "))
            .find(|(name, _)| name.eq_ignore_ascii_case("proxy-authorization"))
            .map(|(_, value)| value.to_string());

        let payload = if status == 200 {
            stream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            ping_pong(&mut stream).await
        } else {
            let response = format!("HTTP/1.1 {} Denied\r\nContent-Length: 0\r\n\r\n", status);
            stream.write_all(response.as_bytes()).await.unwrap();
            Vec::new()
        };

        HttpObservation {
            request_line,
            proxy_authorization,
            payload,
        }
    });

    (addr, handle)
}

/// Behaviour of a stub Tor control port
#[derive(Debug, Clone)]
pub struct TorStub {
    password: String,
    listeners: Vec<String>,
    multiline: bool,
}

impl TorStub {
    pub fn new(password: &str, listeners: &[&str]) -> Self {
        Self {
            password: password.to_string(),
            listeners: listeners.iter().map(|l| l.to_string()).collect(),
            multiline: false,
        }
    }

    /// Answer GETINFO with a `250+` data block
    pub fn multiline(mut self) -> Self {
        self.multiline = true;
        self
    }

    fn answer(&self, line: &str) -> String {
        if let Some(arg) = line.strip_prefix("AUTHENTICATE") {
            let secret = arg.trim().trim_matches('"');
            return if secret == self.password {
                "250 OK\r\n".to_string()
            } else {
                "515 Authentication failed: Password did not match HashedControlPassword value from configuration\r\n".to_string()
            };
        }

        if line == "GETINFO net/listeners/socks" {
            let quoted: Vec<String> = self.listeners.iter().map(|l| format!("\"{}\"", l)).collect();
            return if self.multiline {
                let mut reply = "250+net/listeners/socks=\r\n".to_string();
                for listener in &quoted {
                    reply.push_str(listener);
                    reply.push_str("\r\n");
                }
                reply.push_str(".\r\n250 OK\r\n");
                reply
            } else {
                format!("250-net/listeners/socks={}\r\n250 OK\r\n", quoted.join(" "))
            };
        }

        "510 Unrecognized command\r\n".to_string()
    }
}

/// Tor control port stub accepting any number of connections
pub async fn spawn_tor_control_stub(stub: TorStub) -> SocketAddr {
    let (listener, addr) = bind_local().await;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stub = stub.clone();
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let reply = stub.answer(line.trim_end_matches('\r'));
                    if writer.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}
