//! The connection layer: one mio poll loop multiplexes every socket, with
//! thread pools doing the actual reads and writes.
//!
//! Each connection owns a bounded outbound packet queue. [`ConnSender`] is
//! the transmitter handle given to shards and the dispatcher; it never
//! blocks, and a full queue kills the session (a client missing packets
//! would desync anyway).

use crate::{
  game::Game,
  player::Player,
  proto::{cb, sb},
};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use mg_common::util::{Buffer, ThreadPool};
use mio::{
  net::{TcpListener, TcpStream},
  Events, Interest, Poll, Token, Waker,
};
use parking_lot::{Mutex, RwLock};
use std::{
  collections::HashMap,
  fmt, io,
  io::{Read, Write},
  net::SocketAddr,
  sync::Arc,
  time::{Duration, Instant},
};

pub(crate) mod packet;

/// A connection must finish logging in within this long.
const LOGIN_DEADLINE: Duration = Duration::from_secs(30);
/// A playing session that has sent nothing for this long (it answers the
/// 1 Hz keep-alive while healthy) is dead.
const IDLE_DEADLINE: Duration = Duration::from_secs(60);

/// Where a connection is in its lifecycle. Only the transition out of
/// `AwaitLogin` adds a player to the roster.
pub enum SessionState {
  Handshaking,
  /// The handshake reply went out (and auth passed, if required); the next
  /// packet must be the login.
  AwaitLogin { username: String },
  Playing,
}

pub enum WakeEvent {
  /// Packets are queued for this connection.
  Clientbound(Token),
  /// This connection's queue overflowed; kill it.
  Kill(Token),
}

pub struct Connection {
  stream:            TcpStream,
  pub(crate) state:  SessionState,

  created:     Instant,
  last_active: Instant,

  /// Sending on this will send a packet to the client.
  tx:    Sender<cb::Packet>,
  rx:    Receiver<cb::Packet>,
  wake:  Sender<WakeEvent>,
  waker: Arc<Waker>,
  tok:   Token,

  incoming: Vec<u8>,
  outgoing: Vec<u8>,
  garbage:  Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ConnSender {
  tx:    Sender<cb::Packet>,
  wake:  Sender<WakeEvent>,
  waker: Arc<Waker>,
  tok:   Token,
}

impl fmt::Debug for Connection {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("Connection").field("tok", &self.tok).finish()
  }
}

impl ConnSender {
  #[cfg(test)]
  pub(crate) fn mock(poll: &Poll) -> (Receiver<cb::Packet>, Receiver<WakeEvent>, Self) {
    const WAKE: Token = Token(0xfffffffe);

    let (tx, rx) = crossbeam_channel::bounded(2048);
    let (wake_tx, wake_rx) = crossbeam_channel::bounded(2048);
    let waker = Arc::new(Waker::new(poll.registry(), WAKE).unwrap());
    (rx, wake_rx, ConnSender { tx, wake: wake_tx, waker, tok: Token(0) })
  }

  /// Queues the packet for the client. This never blocks: if the queue is
  /// full the session is marked for death instead, since the client can no
  /// longer be kept consistent.
  ///
  /// Packets are silently dropped once the connection has closed.
  pub fn send(&self, p: cb::Packet) {
    match self.tx.try_send(p) {
      Ok(()) => {
        if self.wake.send(WakeEvent::Clientbound(self.tok)).is_ok() {
          let _ = self.waker.wake();
        }
      }
      Err(TrySendError::Full(_)) => {
        warn!("outbound queue overflow, killing connection {:?}", self.tok);
        if self.wake.send(WakeEvent::Kill(self.tok)).is_ok() {
          let _ = self.waker.wake();
        }
      }
      Err(TrySendError::Disconnected(_)) => {}
    }
  }
}

impl Connection {
  pub(crate) fn new(
    stream: TcpStream,
    wake: Sender<WakeEvent>,
    waker: Arc<Waker>,
    tok: Token,
  ) -> Self {
    // A full view square is several hundred chunk packets, so the queue
    // must comfortably hold one resubscribe burst.
    let (tx, rx) = crossbeam_channel::bounded(1024);
    Connection {
      stream,
      state: SessionState::Handshaking,
      created: Instant::now(),
      last_active: Instant::now(),
      tx,
      rx,
      wake,
      waker,
      tok,
      incoming: Vec::with_capacity(1024),
      outgoing: Vec::with_capacity(1024),
      garbage: vec![0; 256 * 1024],
    }
  }

  /// Creates a sender that will send packets to the client on this
  /// connection.
  pub fn sender(&self) -> ConnSender {
    ConnSender {
      tx:    self.tx.clone(),
      wake:  self.wake.clone(),
      waker: self.waker.clone(),
      tok:   self.tok,
    }
  }

  /// True once this connection has blown its login or idle deadline.
  fn timed_out(&self, now: Instant) -> bool {
    match self.state {
      SessionState::Playing => now.duration_since(self.last_active) > IDLE_DEADLINE,
      _ => now.duration_since(self.created) > LOGIN_DEADLINE,
    }
  }

  /// If this returns Ok(true) or an error, the connection should be closed.
  /// Ok(false) is normal operation. This will never return Err(WouldBlock).
  fn read(&mut self) -> io::Result<(bool, Vec<sb::Packet>)> {
    let mut out = vec![];
    loop {
      let n = match self.stream.read(&mut self.garbage) {
        Ok(0) => return Ok((true, out)),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          if !out.is_empty() {
            self.last_active = Instant::now();
          }
          return Ok((false, out));
        }
        Err(e) => return Err(e),
      };
      self.incoming.extend_from_slice(&self.garbage[..n]);
      out.extend(self.read_incoming()?);
    }
  }

  fn read_incoming(&mut self) -> io::Result<Vec<sb::Packet>> {
    let mut out = vec![];
    loop {
      let mut buf = Buffer::new(self.incoming.as_slice());
      match sb::Packet::read(&mut buf) {
        Ok(p) => {
          let n = buf.index();
          self.incoming.drain(0..n);
          out.push(p);
        }
        Err(e) if e.is_partial() => break,
        Err(e) => {
          // A malformed frame is fatal to this session only.
          return Err(io::Error::new(io::ErrorKind::InvalidData, format!("{e}")));
        }
      }
      if self.incoming.is_empty() {
        break;
      }
    }
    Ok(out)
  }

  fn try_send(&mut self) -> io::Result<()> {
    loop {
      match self.rx.try_recv() {
        Ok(p) => self.send_to_client(&p)?,
        Err(TryRecvError::Empty) => break,
        Err(_e) => unreachable!(),
      }
    }
    Ok(())
  }

  fn send_to_client(&mut self, p: &cb::Packet) -> io::Result<()> {
    self.outgoing.extend_from_slice(&p.serialize());
    self.try_flush()
  }

  fn try_flush(&mut self) -> io::Result<()> {
    while !self.outgoing.is_empty() {
      let n = match self.stream.write(&self.outgoing) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) => return Err(e),
      };
      self.outgoing.drain(0..n);
    }
    Ok(())
  }

  /// Writes a disconnect frame straight onto the socket, best effort. Used
  /// during login failures and timeouts, where the poll loop may never get
  /// another chance to flush the queue.
  pub(crate) fn write_disconnect(&mut self, reason: &str) {
    let _ = self.send_to_client(&cb::Packet::Disconnect { reason: reason.into() });
    let _ = self.try_flush();
  }
}

pub(crate) struct ConnPlayer {
  pub(crate) conn:   Mutex<Connection>,
  pub(crate) player: Option<Arc<Player>>,
}

impl ConnPlayer {
  fn new(conn: Connection) -> Self { ConnPlayer { conn: Mutex::new(conn), player: None } }
}

pub(crate) type Conns = Arc<RwLock<HashMap<Token, ConnPlayer>>>;

pub struct ConnectionManager {
  connections: Conns,
  game:        Arc<Game>,
}

struct State {
  game:  Arc<Game>,
  conns: Conns,
}

impl ConnectionManager {
  pub fn new(game: Arc<Game>) -> ConnectionManager {
    ConnectionManager { connections: Arc::new(RwLock::new(HashMap::new())), game }
  }

  pub fn run(&mut self, addr: SocketAddr) -> io::Result<()> {
    const LISTEN: Token = Token(0xffffffff);
    const WAKE: Token = Token(0xfffffffe);

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(128);
    let mut listen = TcpListener::bind(addr)?;

    let waker = Arc::new(Waker::new(poll.registry(), WAKE)?);

    poll.registry().register(&mut listen, LISTEN, Interest::READABLE)?;

    let mut next_token = 0;

    let (tx, rx) = crossbeam_channel::bounded(1024);

    let write_pool = ThreadPool::auto("network writer", || State {
      game:  self.game.clone(),
      conns: self.connections.clone(),
    });
    let read_pool = ThreadPool::auto("network reader", || State {
      game:  self.game.clone(),
      conns: self.connections.clone(),
    });

    let mut last_sweep = Instant::now();

    loop {
      loop {
        match poll.poll(&mut events, Some(Duration::from_secs(1))) {
          Ok(()) => break,
          Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
          Err(e) => return Err(e),
        }
      }

      for event in events.iter() {
        match event.token() {
          LISTEN => loop {
            let (mut conn, _addr) = match listen.accept() {
              Ok(v) => v,
              Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
              Err(e) => return Err(e),
            };

            let token = Token(next_token);
            next_token += 1;
            poll.registry().register(&mut conn, token, Interest::READABLE | Interest::WRITABLE)?;

            self
              .connections
              .write()
              .insert(token, ConnPlayer::new(Connection::new(conn, tx.clone(), waker.clone(), token)));
          },
          WAKE => {
            let r = rx.clone();
            write_pool.execute(move |s| loop {
              match r.try_recv() {
                Ok(ev) => Self::wake_event(s, ev),
                Err(TryRecvError::Empty) => break,
                Err(_) => unreachable!(),
              }
            });
          }
          token => {
            let readable = event.is_readable();
            let writable = event.is_writable();
            read_pool.execute(move |s| {
              if Self::handle(s, token, readable, writable) {
                Self::remove(s, token, None);
              }
            });
          }
        }
      }

      // Deadline sweep; the 1s poll timeout guarantees this runs even with
      // no socket activity.
      if last_sweep.elapsed() >= Duration::from_secs(1) {
        last_sweep = Instant::now();
        self.sweep_deadlines();
      }
    }
  }

  fn sweep_deadlines(&self) {
    let now = Instant::now();
    let mut dead = vec![];
    {
      let rl = self.connections.read();
      for (tok, cp) in rl.iter() {
        if cp.conn.lock().timed_out(now) {
          dead.push(*tok);
        }
      }
    }
    let state = State { game: self.game.clone(), conns: self.connections.clone() };
    for tok in dead {
      info!("connection {tok:?} timed out");
      Self::remove(&state, tok, Some("Timed out"));
    }
  }

  /// Removes a connection, telling every other actor the player is gone.
  /// A reason, if given, is sent as a best-effort disconnect frame first.
  fn remove(s: &State, token: Token, reason: Option<&str>) {
    let cp = match s.conns.write().remove(&token) {
      Some(cp) => cp,
      // Another thread already removed it.
      None => return,
    };
    if let Some(reason) = reason {
      cp.conn.lock().write_disconnect(reason);
    }
    match &cp.player {
      Some(player) => player.remove(&s.game),
      None => info!("a client who has not finished logging in has left"),
    }
  }

  /// If this is not a normal disconnect, log the error before removal.
  fn handle_error(e: io::Error) {
    if !matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) {
      error!("error in connection: {}", e);
    }
  }

  fn wake_event(s: &State, ev: WakeEvent) {
    match ev {
      WakeEvent::Clientbound(tok) => {
        let mut remove = false;
        if let Some(cp) = s.conns.read().get(&tok) {
          remove = match cp.conn.lock().try_send() {
            Ok(()) => false,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
              Self::handle_error(e);
              true
            }
          };
        }
        if remove {
          Self::remove(s, tok, None);
        }
      }
      WakeEvent::Kill(tok) => Self::remove(s, tok, Some("Outbound queue overflow")),
    }
  }

  /// Handles one readiness event. Returns true if the connection should be
  /// removed.
  fn handle(s: &State, token: Token, readable: bool, writable: bool) -> bool {
    if readable {
      let rl = s.conns.read();
      // If this isn't present, another thread has removed the connection.
      let cp = match rl.get(&token) {
        Some(cp) => cp,
        None => return false,
      };
      let (disconnect, packets) = match cp.conn.lock().read() {
        Ok(v) => v,
        Err(e) => {
          Self::handle_error(e);
          return true;
        }
      };
      if disconnect {
        return true;
      }
      if let Some(player) = cp.player.clone() {
        drop(rl);
        for p in packets {
          if !packet::handle(&s.game, &player, p) {
            return true;
          }
        }
      } else if !packets.is_empty() {
        // Still logging in. The login flow can block on the auth probe and
        // needs to mutate the connection map, so the read lock goes first.
        drop(rl);
        for p in packets {
          match packet::handle_login(&s.game, &s.conns, token, p) {
            packet::LoginFlow::Continue => {}
            packet::LoginFlow::Close => return true,
          }
        }
      }
    }
    if writable {
      let rl = s.conns.read();
      if let Some(cp) = rl.get(&token) {
        let mut conn = cp.conn.lock();
        match conn.try_flush() {
          Ok(()) => {}
          Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
          Err(e) => {
            Self::handle_error(e);
            return true;
          }
        }
      }
    }
    false
  }
}
