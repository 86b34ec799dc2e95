//! Loopback MQTT broker for tests against the real rumqttc transport.
//!
//! Speaks just enough MQTT 3.1.1 over plain TCP on 127.0.0.1: answers
//! CONNECT with a scripted CONNACK code, acknowledges QoS 1 publishes and
//! subscriptions, and answers pings. Every publish is counted.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::{MqttConfig, TransportScheme};

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    publishes: AtomicUsize,
}

/// A broker listening on an ephemeral loopback port until dropped.
#[derive(Debug)]
pub struct LoopbackBroker {
    port: u16,
    counters: Arc<Counters>,
    acceptor: JoinHandle<()>,
}

impl LoopbackBroker {
    /// Start a broker that accepts every connection.
    pub async fn start() -> io::Result<Self> {
        Self::with_connack_code(0).await
    }

    /// Start a broker answering CONNECT with `code` (0 accepts; 5 is
    /// "not authorized").
    pub async fn with_connack_code(code: u8) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let counters = Arc::new(Counters::default());

        let acceptor = {
            let counters = counters.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let counters = counters.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, code, &counters).await {
                            tracing::debug!(error = %e, "loopback connection closed");
                        }
                    });
                }
            })
        };

        Ok(Self {
            port,
            counters,
            acceptor,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host to pair with `config()` when deriving an identity.
    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    /// Plain-TCP transport settings pointing at this broker.
    pub fn config(&self) -> MqttConfig {
        MqttConfig {
            scheme: TransportScheme::Mqtt,
            port: Some(self.port),
            connect_timeout_secs: 5,
            reconnect_delay_secs: 1,
            ..MqttConfig::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.counters.publishes.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` publishes arrived. Returns the final
    /// count, which is lower than `count` if `timeout` elapsed first.
    pub async fn wait_for_publishes(&self, count: usize, timeout: Duration) -> usize {
        let wait = async {
            while self.publish_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
        self.publish_count()
    }
}

impl Drop for LoopbackBroker {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn serve(mut stream: TcpStream, connack_code: u8, counters: &Counters) -> io::Result<()> {
    let (header, _) = read_packet(&mut stream).await?;
    if header >> 4 != CONNECT {
        return Err(invalid("first packet was not CONNECT"));
    }
    counters.connects.fetch_add(1, Ordering::SeqCst);
    stream.write_all(&[0x20, 0x02, 0x00, connack_code]).await?;
    if connack_code != 0 {
        return Ok(());
    }

    loop {
        let (header, body) = read_packet(&mut stream).await?;
        match header >> 4 {
            PUBLISH => {
                counters.publishes.fetch_add(1, Ordering::SeqCst);
                let qos = (header >> 1) & 0x03;
                if qos > 0 {
                    let (hi, lo) = publish_packet_id(&body)?;
                    stream.write_all(&[0x40, 0x02, hi, lo]).await?;
                }
            }
            SUBSCRIBE => {
                let [hi, lo, ..] = body.as_slice() else {
                    return Err(invalid("SUBSCRIBE without packet id"));
                };
                stream.write_all(&[0x90, 0x03, *hi, *lo, 0x01]).await?;
            }
            PINGREQ => stream.write_all(&[0xD0, 0x00]).await?,
            DISCONNECT => return Ok(()),
            _ => {}
        }
    }
}

/// Read one packet: fixed-header byte and body.
async fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(invalid("remaining length overflow"));
        }
    }
    let mut body = vec![0; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Packet id of a QoS > 0 PUBLISH: it follows the length-prefixed topic.
fn publish_packet_id(body: &[u8]) -> io::Result<(u8, u8)> {
    let [len_hi, len_lo, rest @ ..] = body else {
        return Err(invalid("PUBLISH without topic"));
    };
    let topic_len = usize::from(u16::from_be_bytes([*len_hi, *len_lo]));
    match rest.get(topic_len..topic_len + 2) {
        Some(&[hi, lo]) => Ok((hi, lo)),
        _ => Err(invalid("PUBLISH without packet id")),
    }
}

fn invalid(reason: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}
