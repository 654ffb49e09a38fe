//! Seam to the wire-protocol collaborator.
//!
//! Packet encoding and the UDP socket itself live outside this crate.
//! Implementors of [`Transport`] own both; everything here speaks in the
//! typed messages below and never sees bytes.

use std::net::Ipv4Addr;
use std::time::Duration;

use futures::stream::BoxStream;
use uuid::Uuid;

use crate::errors::Error;
use crate::registry::Device;
use crate::runtime::{self, BoxFuture};
use crate::types::Hsbk;

type Result<T> = std::result::Result<T, Error>;

/// A network-wide query sent over the broadcast address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Ask every device on the network to announce itself.
    GetService,
}

/// A request addressed to a single device.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetLabel,
    GetGroup,
    GetLocation,
    GetPower,
    GetColor,
    /// Set the device power level immediately.
    SetPower { level: u16 },
    /// Set all four color channels over `duration_ms`.
    SetColor { color: Hsbk, duration_ms: u32 },
    /// Set the light power level with a fade over `duration_ms`.
    SetLightPower { level: u16, duration_ms: u32 },
}

impl Request {
    /// Protocol name of this request, for logs and timeout errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::GetLabel => "GetLabel",
            Request::GetGroup => "GetGroup",
            Request::GetLocation => "GetLocation",
            Request::GetPower => "GetPower",
            Request::GetColor => "GetColor",
            Request::SetPower { .. } => "SetPower",
            Request::SetColor { .. } => "SetColor",
            Request::SetLightPower { .. } => "SetLightPower",
        }
    }
}

/// A reply from a single device.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Label(String),
    Group { id: Uuid, label: String },
    Location { id: Uuid, label: String },
    Power { level: u16 },
    /// Full light state as reported by `GetColor`.
    LightState {
        color: Hsbk,
        power: u16,
        label: String,
    },
    Acknowledged,
}

/// A device announcing itself in reply to [`Query::GetService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Stable serial identifier (hex, e.g. `d073d5112233`).
    pub serial: String,
    /// Wire-protocol target id.
    pub target: u64,
    /// Address the device answered from.
    pub addr: Ipv4Addr,
    /// Service port the device listens on.
    pub port: u16,
}

/// The transport collaborator.
///
/// One shared endpoint serves all traffic; requests suspend until the
/// device answers or the transport gives up. Callers inside this crate
/// additionally wrap every call in their own deadline.
pub trait Transport: Send + Sync {
    /// Send a query to the broadcast address.
    fn broadcast(&self, query: Query) -> BoxFuture<'_, Result<()>>;

    /// Send a request to one device and wait for its typed reply.
    fn unicast<'a>(&'a self, device: &'a Device, request: Request)
    -> BoxFuture<'a, Result<Response>>;

    /// Send a request to one device, waiting only for the acknowledgement.
    fn unicast_ack<'a>(&'a self, device: &'a Device, request: Request)
    -> BoxFuture<'a, Result<()>>;

    /// Stream of devices announcing themselves.
    ///
    /// Each call returns an independent subscription.
    fn announcements(&self) -> BoxStream<'static, Announcement>;
}

/// Unicast with a deadline, mapping expiry to [`Error::Timeout`].
pub(crate) async fn unicast_with_deadline(
    transport: &dyn Transport,
    device: &Device,
    request: Request,
    deadline: Duration,
) -> Result<Response> {
    let action = request.kind();
    runtime::timeout(deadline, transport.unicast(device, request))
        .await
        .map_err(|_| Error::timeout(device.serial(), action))?
}

/// Ack-only unicast with a deadline.
pub(crate) async fn unicast_ack_with_deadline(
    transport: &dyn Transport,
    device: &Device,
    request: Request,
    deadline: Duration,
) -> Result<()> {
    let action = request.kind();
    runtime::timeout(deadline, transport.unicast_ack(device, request))
        .await
        .map_err(|_| Error::timeout(device.serial(), action))?
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport for unit tests.

    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use futures::channel::mpsc::{self, UnboundedSender};

    use super::*;

    /// Replays scripted replies keyed by `(serial, request kind)` and
    /// records everything that was sent.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        replies: Mutex<HashMap<(String, &'static str), VecDeque<Result<Response>>>>,
        hanging: Mutex<HashSet<String>>,
        sent: Mutex<Vec<(String, Request)>>,
        broadcasts: AtomicUsize,
        subscribers: Mutex<Vec<UnboundedSender<Announcement>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Script the next reply for `kind` requests against `serial`.
        pub fn on(&self, serial: &str, kind: &'static str, reply: Result<Response>) {
            self.replies
                .lock()
                .unwrap()
                .entry((serial.to_string(), kind))
                .or_default()
                .push_back(reply);
        }

        /// Make every unicast against `serial` block forever.
        pub fn hang(&self, serial: &str) {
            self.hanging.lock().unwrap().insert(serial.to_string());
        }

        /// Push an announcement to every subscribed discovery loop.
        pub fn announce(&self, announcement: Announcement) {
            self.subscribers
                .lock()
                .unwrap()
                .retain(|tx| tx.unbounded_send(announcement.clone()).is_ok());
        }

        pub fn broadcast_count(&self) -> usize {
            self.broadcasts.load(Ordering::SeqCst)
        }

        pub fn sent(&self) -> Vec<(String, Request)> {
            self.sent.lock().unwrap().clone()
        }

        /// Kinds of requests sent to `serial`, in order.
        pub fn sent_kinds(&self, serial: &str) -> Vec<&'static str> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _)| s == serial)
                .map(|(_, request)| request.kind())
                .collect()
        }

        fn record(&self, device: &Device, request: &Request) {
            self.sent
                .lock()
                .unwrap()
                .push((device.serial().to_string(), request.clone()));
        }

        fn next_reply(&self, device: &Device, request: &Request) -> Option<Result<Response>> {
            self.replies
                .lock()
                .unwrap()
                .get_mut(&(device.serial().to_string(), request.kind()))
                .and_then(VecDeque::pop_front)
        }
    }

    impl Transport for MockTransport {
        fn broadcast(&self, _query: Query) -> BoxFuture<'_, Result<()>> {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn unicast<'a>(
            &'a self,
            device: &'a Device,
            request: Request,
        ) -> BoxFuture<'a, Result<Response>> {
            Box::pin(async move {
                self.record(device, &request);
                if self.hanging.lock().unwrap().contains(device.serial()) {
                    futures::future::pending::<()>().await;
                    unreachable!();
                }
                self.next_reply(device, &request).unwrap_or_else(|| {
                    Err(Error::remote(
                        device.serial(),
                        format!("no reply scripted for {}", request.kind()),
                    ))
                })
            })
        }

        fn unicast_ack<'a>(
            &'a self,
            device: &'a Device,
            request: Request,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.record(device, &request);
                if self.hanging.lock().unwrap().contains(device.serial()) {
                    futures::future::pending::<()>().await;
                    unreachable!();
                }
                // Acks succeed unless a failure was scripted.
                match self.next_reply(device, &request) {
                    Some(Err(e)) => Err(e),
                    Some(Ok(_)) | None => Ok(()),
                }
            })
        }

        fn announcements(&self) -> BoxStream<'static, Announcement> {
            let (tx, rx) = mpsc::unbounded();
            self.subscribers.lock().unwrap().push(tx);
            rx.boxed()
        }
    }
}
