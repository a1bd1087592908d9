use crate::error::{Error, Result};
use crate::link::Link;
use crate::rip::table::{RipTable, RIP_ROUTE_LIFETIME};
use crate::timer::time_until;
use crate::udp::UdpSocket;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use netstack_packets::{
    is_infinite, RipCommand, RipEntry, RipMessage, RIP_ENTRY_LEN, RIP_HEADER_LEN,
    RIP_MAX_ENTRIES, RIP_METRIC_INFINITY, RIP_MULTICAST_ADDR, RIP_PORT,
};
use std::convert::TryFrom;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Time between two unsolicited advertisements of the whole table.
pub const RIP_ADVERTISE_INTERVAL: Duration = Duration::from_secs(10);

const RIP_BUFFER_LEN: usize = RIP_HEADER_LEN + RIP_MAX_ENTRIES * RIP_ENTRY_LEN;

fn multicast_group() -> SocketAddrV4 {
    SocketAddrV4::new(RIP_MULTICAST_ADDR, RIP_PORT)
}

/// A poisoned table is still a consistent table: every update is a single slot write.
fn lock(table: &Mutex<RipTable>) -> MutexGuard<RipTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds the RESPONSE to `request`.
///
/// A request for the whole table gets every stored route. Otherwise each requested entry is
/// echoed back with the metric of the exactly matching route, or infinity if there is none.
pub fn answer_request(table: &RipTable, request: &RipMessage) -> RipMessage {
    if request.is_request_all() {
        return advertisement(table);
    }
    let entries = request
        .entries
        .iter()
        .map(|entry| {
            let metric = table
                .find(entry.subnet, entry.mask)
                .and_then(|index| table.get(index))
                .map_or(RIP_METRIC_INFINITY, |route| route.metric);
            RipEntry { metric, ..*entry }
        })
        .collect();
    RipMessage::response(entries)
}

/// Merges the routes `sender` advertised into `table`, giving new and refreshed routes
/// `lifetime`. Returns how many routes were added or changed.
///
/// Each advertised metric costs one more hop through `sender`. A route learned from `sender`
/// always follows what `sender` says now; a route through another gateway only moves to
/// `sender` when the new metric is strictly lower.
pub fn apply_response(
    table: &mut RipTable,
    sender: Ipv4Addr,
    response: &RipMessage,
    lifetime: Duration,
) -> usize {
    let mut changed = 0;
    for entry in &response.entries {
        if entry.is_infinite() {
            continue;
        }
        let metric = entry.metric + 1;

        let index = match table.find(entry.subnet, entry.mask) {
            Some(index) => index,
            None => {
                if is_infinite(metric) {
                    continue;
                }
                let route = RipEntry::new(entry.subnet, entry.mask, sender, metric);
                match table.add_with_lifetime(route, lifetime) {
                    Ok(index) => {
                        debug!(
                            index,
                            subnet = %entry.subnet,
                            mask = %entry.mask,
                            %sender,
                            metric,
                            "learned route"
                        );
                        changed += 1;
                    }
                    Err(_) => warn!(subnet = %entry.subnet, "route table full, dropping route"),
                }
                continue;
            }
        };

        let route = match table.get_mut(index) {
            Some(route) => route,
            None => continue,
        };
        if route.next_hop == sender {
            if route.metric != metric {
                debug!(
                    index,
                    subnet = %route.subnet,
                    old = route.metric,
                    new = metric,
                    "metric changed"
                );
                route.metric = metric;
                changed += 1;
            }
            table.reset_timer(index, lifetime);
        } else if metric < route.metric {
            debug!(
                index,
                subnet = %route.subnet,
                old = %route.next_hop,
                new = %sender,
                metric,
                "better route"
            );
            route.next_hop = sender;
            route.metric = metric;
            changed += 1;
            table.reset_timer(index, lifetime);
        }
    }
    changed
}

/// A RESPONSE carrying every stored route.
pub fn advertisement(table: &RipTable) -> RipMessage {
    RipMessage::response(table.routes())
}

/// Multicasts the current contents of `table`. An empty table is not advertised.
fn advertise<L: Link>(socket: &UdpSocket<L>, table: &Mutex<RipTable>) -> Result<usize> {
    let message = advertisement(&lock(table));
    if message.entries.is_empty() {
        trace!("nothing to advertise");
        return Ok(0);
    }
    let sent = socket.send(multicast_group(), &message.to_bytes())?;
    debug!(routes = message.entries.len(), "sent periodic advertisement");
    Ok(sent)
}

/// Background thread multicasting the table every interval until stopped or dropped.
pub struct Advertiser {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Advertiser {
    pub fn spawn<L: Link + 'static>(
        socket: Arc<UdpSocket<L>>,
        table: Arc<Mutex<RipTable>>,
        interval: Duration,
    ) -> Result<Advertiser> {
        let (shutdown, stop) = channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("rip-advertiser".to_string())
            .spawn(move || loop {
                match stop.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(error) = advertise(&socket, &table) {
                            warn!(%error, "periodic advertisement failed");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(Error::Io)?;
        Ok(Advertiser {
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// Stops the thread and waits for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel, which ends the loop.
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("advertiser thread panicked");
            }
        }
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A RIPv2 router: answers requests, learns from responses and ages out its routes.
pub struct RipServer<L: Link> {
    socket: Arc<UdpSocket<L>>,
    table: Arc<Mutex<RipTable>>,
    table_path: Option<PathBuf>,
    advertise_interval: Duration,
    route_lifetime: Duration,
}

impl<L: Link + 'static> RipServer<L> {
    /// A server using `socket`, which should be bound to the RIP port, starting from `table`.
    pub fn new(socket: UdpSocket<L>, table: RipTable) -> RipServer<L> {
        RipServer {
            socket: Arc::new(socket),
            table: Arc::new(Mutex::new(table)),
            table_path: None,
            advertise_interval: RIP_ADVERTISE_INTERVAL,
            route_lifetime: RIP_ROUTE_LIFETIME,
        }
    }

    /// Seeds the table from `rip_routes_path`, binds the RIP port on the configured interface
    /// and keeps `rip_routes_path` up to date with the table.
    pub fn open<F>(
        config_path: impl AsRef<Path>,
        routes_path: impl AsRef<Path>,
        rip_routes_path: impl AsRef<Path>,
        open_link: F,
    ) -> Result<RipServer<L>>
    where
        F: FnOnce(&str) -> io::Result<L>,
    {
        let table = RipTable::read(&rip_routes_path)?;
        let socket = UdpSocket::open(RIP_PORT, config_path, routes_path, open_link)?;
        Ok(RipServer::new(socket, table).with_table_file(rip_routes_path.as_ref()))
    }

    /// Rewrites `path` with the table after every processing cycle.
    pub fn with_table_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.table_path = Some(path.into());
        self
    }

    pub fn with_advertise_interval(mut self, interval: Duration) -> Self {
        self.advertise_interval = interval;
        self
    }

    pub fn with_route_lifetime(mut self, lifetime: Duration) -> Self {
        self.route_lifetime = lifetime;
        self
    }

    /// Shared handle to the route table.
    pub fn table(&self) -> Arc<Mutex<RipTable>> {
        self.table.clone()
    }

    pub fn socket(&self) -> &UdpSocket<L> {
        &self.socket
    }

    /// Asks every neighbour for its whole table.
    pub fn request_all(&self) -> Result<usize> {
        let sent = self
            .socket
            .send(multicast_group(), &RipMessage::request_all().to_bytes())?;
        debug!("sent request for all routes");
        Ok(sent)
    }

    /// Multicasts the table once.
    pub fn advertise(&self) -> Result<usize> {
        advertise(&self.socket, &self.table)
    }

    pub fn spawn_advertiser(&self) -> Result<Advertiser> {
        Advertiser::spawn(
            self.socket.clone(),
            self.table.clone(),
            self.advertise_interval,
        )
    }

    /// Announces itself, starts advertising and then serves forever. Returns only on a link
    /// failure.
    pub fn run(&self) -> Result<()> {
        self.request_all()?;
        info!("RIP routes:\n{}", lock(&self.table));
        let _advertiser = self.spawn_advertiser()?;
        loop {
            self.step()?;
        }
    }

    /// Waits for one datagram, no longer than until the next route expires, then drops expired
    /// routes, handles the datagram if there was one and saves the table.
    pub fn step(&self) -> Result<()> {
        let timeout = lock(&self.table).time_left();
        let mut buf = [0u8; RIP_BUFFER_LEN];
        let received = self.socket.recv(&mut buf, timeout)?;

        {
            let mut table = lock(&self.table);
            let removed = table.remove_expired();
            if removed > 0 {
                info!(removed, "expired routes removed");
            }
            self.save(&table);
        }

        if let Some((len, peer)) = received {
            self.handle(peer, &buf[..len.min(buf.len())]);
            let table = lock(&self.table);
            debug!("RIP routes:\n{}", table);
            self.save(&table);
        }
        Ok(())
    }

    fn handle(&self, peer: SocketAddrV4, data: &[u8]) {
        if peer.port() != RIP_PORT {
            trace!(%peer, "ignoring datagram from non-RIP port");
            return;
        }
        if *peer.ip() == self.socket.ipv4().local_addr() {
            trace!("ignoring own datagram");
            return;
        }
        let message = match RipMessage::try_from(data) {
            Ok(message) => message,
            Err(reason) => {
                trace!(%peer, reason, "ignoring malformed RIP message");
                return;
            }
        };
        if message.entries.is_empty() {
            trace!(%peer, "ignoring RIP message without entries");
            return;
        }

        match message.command {
            RipCommand::Request => {
                let answer = answer_request(&lock(&self.table), &message);
                debug!(%peer, entries = answer.entries.len(), "answering request");
                let dest = SocketAddrV4::new(*peer.ip(), RIP_PORT);
                if let Err(error) = self.socket.send(dest, &answer.to_bytes()) {
                    warn!(%peer, %error, "could not answer request");
                }
            }
            RipCommand::Response => {
                let mut table = lock(&self.table);
                let changed =
                    apply_response(&mut table, *peer.ip(), &message, self.route_lifetime);
                debug!(%peer, entries = message.entries.len(), changed, "processed response");
            }
        }
    }

    fn save(&self, table: &RipTable) {
        if let Some(path) = &self.table_path {
            if let Err(error) = table.write(path) {
                warn!(path = %path.display(), %error, "could not save RIP routes");
            }
        }
    }
}

/// Queries a RIP router for routes.
pub struct RipClient<L: Link> {
    socket: UdpSocket<L>,
}

impl<L: Link> RipClient<L> {
    pub fn new(socket: UdpSocket<L>) -> RipClient<L> {
        RipClient { socket }
    }

    /// Binds the RIP port on the configured interface.
    pub fn open<F>(
        config_path: impl AsRef<Path>,
        routes_path: impl AsRef<Path>,
        open_link: F,
    ) -> Result<RipClient<L>>
    where
        F: FnOnce(&str) -> io::Result<L>,
    {
        let socket = UdpSocket::open(RIP_PORT, config_path, routes_path, open_link)?;
        Ok(RipClient::new(socket))
    }

    pub fn socket(&self) -> &UdpSocket<L> {
        &self.socket
    }

    /// Sends `request` to `server`, which may be the RIP multicast group.
    pub fn send_request(&self, server: Ipv4Addr, request: &RipMessage) -> Result<usize> {
        let dest = SocketAddrV4::new(server, RIP_PORT);
        let sent = self.socket.send(dest, &request.to_bytes())?;
        debug!(%dest, entries = request.entries.len(), "sent RIP request");
        Ok(sent)
    }

    /// Waits for the first RESPONSE sent from the RIP port. Anything else is skipped.
    pub fn recv_response(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<(Ipv4Addr, RipMessage)>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut buf = [0u8; RIP_BUFFER_LEN];
        loop {
            let (len, peer) = match self.socket.recv(&mut buf, time_until(deadline))? {
                Some(received) => received,
                None => return Ok(None),
            };
            if peer.port() != RIP_PORT {
                continue;
            }
            match RipMessage::try_from(&buf[..len.min(buf.len())]) {
                Ok(message) if message.command == RipCommand::Response => {
                    return Ok(Some((*peer.ip(), message)))
                }
                Ok(_) => trace!(%peer, "skipping RIP request"),
                Err(reason) => trace!(%peer, reason, "skipping malformed RIP message"),
            }
        }
    }

    /// Asks `server` for its whole table.
    pub fn request_all(
        &self,
        server: Ipv4Addr,
        timeout: Option<Duration>,
    ) -> Result<Option<(Ipv4Addr, RipMessage)>> {
        self.send_request(server, &RipMessage::request_all())?;
        self.recv_response(timeout)
    }

    /// Asks `server` for the metrics of `routes`.
    pub fn request(
        &self,
        server: Ipv4Addr,
        routes: Vec<RipEntry>,
        timeout: Option<Duration>,
    ) -> Result<Option<(Ipv4Addr, RipMessage)>> {
        self.send_request(server, &RipMessage::request(routes))?;
        self.recv_response(timeout)
    }
}
