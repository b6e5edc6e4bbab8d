//! Pending answers to requests and the callbacks attached to them.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use tunelink_value::{Envelope, List, Value};
use tunelink_wire::ids::{object, signal_cmd};
use tunelink_wire::Message;

use crate::connection::Shared;
use crate::error::{ClientError, Result};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a result reacts to deliveries on its cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    /// One answer, then done.
    Default,
    /// One delivery per registration; re-registered while notifiers remain.
    Signal,
    /// Every delivery until disconnected.
    Broadcast,
}

/// What a notifier is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// Courier envelopes are unwrapped to their payload.
    Default,
    /// Always a full envelope.
    Raw,
    C2c,
}

/// Callback invoked with each delivered value. Returning `false` detaches it.
pub type NotifierFn = Box<dyn FnMut(&Value) -> bool + Send>;

struct Notifier {
    flavor: Flavor,
    callback: NotifierFn,
}

impl Notifier {
    /// `courier` is true when `value` came in on a courier exchange; only
    /// then is an envelope-shaped Dict treated as an envelope.
    fn fire(&mut self, value: &Value, courier: bool) -> bool {
        let envelope = if courier && Envelope::is_envelope(value) {
            Envelope::from_value(value).ok()
        } else {
            None
        };
        match (self.flavor, envelope) {
            (Flavor::Default, Some(envelope)) => (self.callback)(&envelope.payload),
            (Flavor::Default, None) => (self.callback)(value),
            (Flavor::Raw | Flavor::C2c, Some(_)) => (self.callback)(value),
            (Flavor::Raw | Flavor::C2c, None) => {
                (self.callback)(&Envelope::anonymous(value.clone()).to_value())
            }
        }
    }
}

struct State {
    cookie: u32,
    /// Retained delivery. Broadcast results drop it once the notifiers have
    /// run; finished signal results drop it too.
    value: Option<Value>,
    deliveries: u64,
    finished: bool,
    notifiers: Vec<Notifier>,
    /// Threads blocked in `wait_until`.
    waiting: usize,
    /// Latest delivery, kept only while someone is waiting for it.
    handoff: Option<Value>,
}

pub(crate) struct ResultInner {
    conn: Weak<Shared>,
    class: ResultClass,
    c2c: bool,
    /// Signal id re-registered on restart.
    signal: Option<u32>,
    state: Mutex<State>,
    cond: Condvar,
}

impl ResultInner {
    pub(crate) fn new(
        conn: &Arc<Shared>,
        class: ResultClass,
        c2c: bool,
        signal: Option<u32>,
        cookie: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn: Arc::downgrade(conn),
            class,
            c2c,
            signal,
            state: Mutex::new(State {
                cookie,
                value: None,
                deliveries: 0,
                finished: false,
                notifiers: Vec::new(),
                waiting: 0,
                handoff: None,
            }),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn class(&self) -> ResultClass {
        self.class
    }

    /// Hand one delivery to the waiters and notifiers.
    pub(crate) fn deliver(self: &Arc<Self>, conn: &Arc<Shared>, value: Value) {
        let mut notifiers = {
            let mut state = lock(&self.state);
            if state.finished {
                return;
            }
            state.value = Some(value.clone());
            state.deliveries += 1;
            if state.waiting > 0 {
                state.handoff = Some(value.clone());
            }
            if self.class == ResultClass::Default {
                state.finished = true;
            }
            std::mem::take(&mut state.notifiers)
        };
        self.cond.notify_all();

        notifiers.retain_mut(|notifier| notifier.fire(&value, self.c2c));

        match self.class {
            ResultClass::Default => return,
            ResultClass::Signal if notifiers.is_empty() => {
                let mut state = lock(&self.state);
                state.finished = true;
                state.value = None;
                drop(state);
                self.cond.notify_all();
                return;
            }
            ResultClass::Signal => self.restart(conn),
            ResultClass::Broadcast => {}
        }

        let mut state = lock(&self.state);
        notifiers.append(&mut state.notifiers);
        state.notifiers = notifiers;
        if self.class == ResultClass::Broadcast {
            state.value = None;
        }
    }

    // Register the signal again under a fresh cookie.
    fn restart(self: &Arc<Self>, conn: &Arc<Shared>) {
        let Some(signal) = self.signal else { return };
        let cookie = conn.next_cookie();
        let old = std::mem::replace(&mut lock(&self.state).cookie, cookie);
        trace!(signal, old, cookie, "restarting signal");
        let message = Message::new(
            object::SIGNAL,
            signal_cmd::SIGNAL,
            cookie,
            Value::list(List::from_ints([i64::from(signal)])),
        );
        if let Err(err) = conn.send(message, Some(Arc::clone(self))) {
            debug!(signal, error = %err, "signal restart failed");
            self.fail(&err.to_string());
        }
    }

    /// The connection failed: deliver a synthesized Error and finish.
    pub(crate) fn fail(&self, reason: &str) {
        let value = Value::error(reason);
        let mut notifiers = {
            let mut state = lock(&self.state);
            if state.finished {
                return;
            }
            state.value = Some(value.clone());
            state.deliveries += 1;
            if state.waiting > 0 {
                state.handoff = Some(value.clone());
            }
            state.finished = true;
            std::mem::take(&mut state.notifiers)
        };
        self.cond.notify_all();
        for notifier in &mut notifiers {
            notifier.fire(&value, self.c2c);
        }
    }

    fn attach(&self, mut notifier: Notifier) {
        let ready = {
            let mut state = lock(&self.state);
            if self.class == ResultClass::Default && state.finished {
                state.value.clone()
            } else {
                state.notifiers.push(notifier);
                return;
            }
        };
        // The answer is already here; run the callback now.
        if let Some(value) = ready {
            notifier.fire(&value, self.c2c);
        }
    }

    /// A retained value is returned at once. Otherwise block for the next
    /// delivery and return the value that woke us, even if the result has
    /// released it again in the meantime.
    fn wait_until(&self, deadline: Option<Instant>) -> Option<Value> {
        let mut state = lock(&self.state);
        if let Some(value) = &state.value {
            return Some(value.clone());
        }
        if state.finished {
            return None;
        }

        let seen = state.deliveries;
        state.waiting += 1;
        let woken = loop {
            if state.deliveries != seen {
                break state.handoff.clone();
            }
            if state.finished {
                break state.value.clone();
            }
            state = match deadline {
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break None;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        };
        state.waiting -= 1;
        if state.waiting == 0 {
            state.handoff = None;
        }
        woken
    }
}

/// The answer to a request, possibly still on its way.
///
/// Clones share the same underlying result.
#[derive(Clone)]
pub struct CallResult {
    inner: Arc<ResultInner>,
}

impl CallResult {
    pub(crate) fn new(inner: Arc<ResultInner>) -> Self {
        Self { inner }
    }

    pub fn class(&self) -> ResultClass {
        self.inner.class
    }

    /// True for results of courier requests and subscriptions.
    pub fn is_c2c(&self) -> bool {
        self.inner.c2c
    }

    /// Cookie the next delivery is expected on.
    pub fn cookie(&self) -> u32 {
        lock(&self.inner.state).cookie
    }

    /// True until the first value arrives or the connection fails.
    pub fn is_pending(&self) -> bool {
        let state = lock(&self.inner.state);
        state.deliveries == 0 && !state.finished
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.inner.state).finished
    }

    /// The retained delivery, if any.
    ///
    /// Default results keep their answer. Broadcast results hold a value only
    /// while its notifiers run, and a finished signal result holds none.
    pub fn value(&self) -> Option<Value> {
        lock(&self.inner.state).value.clone()
    }

    /// Parse the most recent delivery as a courier envelope.
    pub fn envelope(&self) -> Option<Envelope> {
        self.value()
            .and_then(|value| Envelope::from_value(&value).ok())
    }

    /// Block until a value is available and return it.
    ///
    /// Returns the retained value at once if there is one, otherwise the
    /// next delivery. A connection failure yields an Error value.
    pub fn wait(&self) -> Value {
        self.inner
            .wait_until(None)
            .unwrap_or_else(|| Value::error("result finished without a value"))
    }

    /// Like [`CallResult::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Value> {
        self.inner.wait_until(Some(Instant::now() + timeout))
    }

    /// Wait and turn an Error value into [`ClientError::Server`].
    pub fn wait_ok(&self, timeout: Duration) -> Result<Value> {
        let value = self
            .wait_timeout(timeout)
            .ok_or(ClientError::Timeout(timeout))?;
        match value.as_error() {
            Ok(message) => Err(ClientError::Server(message.to_string())),
            Err(_) => Ok(value),
        }
    }

    /// Attach a callback; courier envelopes are unwrapped to their payload.
    pub fn notifier_set<F>(&self, callback: F)
    where
        F: FnMut(&Value) -> bool + Send + 'static,
    {
        self.attach(Flavor::Default, Box::new(callback));
    }

    /// Attach a callback that always sees a full envelope.
    pub fn notifier_set_raw<F>(&self, callback: F)
    where
        F: FnMut(&Value) -> bool + Send + 'static,
    {
        self.attach(Flavor::Raw, Box::new(callback));
    }

    /// Same contract as [`CallResult::notifier_set_raw`].
    pub fn notifier_set_c2c<F>(&self, callback: F)
    where
        F: FnMut(&Value) -> bool + Send + 'static,
    {
        self.attach(Flavor::C2c, Box::new(callback));
    }

    fn attach(&self, flavor: Flavor, callback: NotifierFn) {
        self.inner.attach(Notifier { flavor, callback });
    }

    /// Stop listening: drop every notifier and forget the cookie locally.
    /// The server-side registration is left alone.
    pub fn disconnect(&self) {
        let cookie = {
            let mut state = lock(&self.inner.state);
            state.notifiers.clear();
            state.finished = true;
            state.cookie
        };
        self.inner.cond.notify_all();
        if let Some(conn) = self.inner.conn.upgrade() {
            conn.forget(cookie);
        }
    }
}

impl std::fmt::Debug for CallResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("CallResult")
            .field("class", &self.inner.class)
            .field("cookie", &state.cookie)
            .field("deliveries", &state.deliveries)
            .field("finished", &state.finished)
            .finish()
    }
}
