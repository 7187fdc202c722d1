//! In-process [`Bus`] implementation.
//!
//! `MemoryBus` does not deliver anything anywhere: it records what the
//! mediation layer sends and subscribes to, keeps a set of owned names, and
//! answers blocking calls through an optional responder. Failures can be
//! switched on per operation, which is what the stateful tests rely on.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::time::Duration;

use mcebus_core::Message;

use super::traits::{Bus, BusError, RequestNameReply};

type Responder = Box<dyn Fn(&Message) -> Result<Message, BusError>>;

/// Loopback bus for tests and embedding without a daemon.
///
/// # Single-Threaded Design
///
/// Uses `Cell` and `RefCell` for interior mutability; not `Send` or `Sync`.
#[derive(Default)]
pub struct MemoryBus {
    sent: RefCell<Vec<Message>>,
    matches: RefCell<Vec<String>>,
    owners: RefCell<HashSet<String>>,
    next_serial: Cell<u32>,
    filter_installed: Cell<bool>,
    name_reply: Cell<Option<RequestNameReply>>,
    fail_send: Cell<bool>,
    fail_add_match: Cell<bool>,
    fail_remove_match: Cell<bool>,
    fail_owner_query: Cell<bool>,
    responder: RefCell<Option<Responder>>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_serial(&self) -> u32 {
        let serial = self.next_serial.get() + 1;
        self.next_serial.set(serial);
        serial
    }

    /// Messages sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent.borrow().clone()
    }

    /// Drains the record of sent messages.
    pub fn take_sent(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    /// Currently active match expressions, in subscription order.
    #[must_use]
    pub fn matches(&self) -> Vec<String> {
        self.matches.borrow().clone()
    }

    #[must_use]
    pub fn filter_installed(&self) -> bool {
        self.filter_installed.get()
    }

    /// Marks `name` as owned or not owned by some connection.
    pub fn set_owner(&self, name: &str, owned: bool) {
        let mut owners = self.owners.borrow_mut();
        if owned {
            owners.insert(name.to_string());
        } else {
            owners.remove(name);
        }
    }

    /// Overrides the daemon's answer to `request_name`.
    pub fn set_name_reply(&self, reply: RequestNameReply) {
        self.name_reply.set(Some(reply));
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.set(fail);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_add_match.set(fail);
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_remove_match.set(fail);
    }

    pub fn fail_owner_query(&self, fail: bool) {
        self.fail_owner_query.set(fail);
    }

    /// Installs the function answering blocking calls.
    pub fn respond_with(&self, responder: impl Fn(&Message) -> Result<Message, BusError> + 'static) {
        *self.responder.borrow_mut() = Some(Box::new(responder));
    }
}

impl Bus for MemoryBus {
    fn send(&self, mut msg: Message) -> Result<u32, BusError> {
        if self.fail_send.get() {
            return Err(BusError::Disconnected);
        }
        let serial = self.next_serial();
        msg.set_serial(serial);
        self.sent.borrow_mut().push(msg);
        Ok(serial)
    }

    fn send_blocking(&self, mut msg: Message, _timeout: Duration) -> Result<Message, BusError> {
        if self.fail_send.get() {
            return Err(BusError::Disconnected);
        }
        msg.set_serial(self.next_serial());
        self.sent.borrow_mut().push(msg.clone());
        match &*self.responder.borrow() {
            Some(responder) => responder(&msg),
            None => Err(BusError::NoReply),
        }
    }

    fn add_filter(&self) -> Result<(), BusError> {
        self.filter_installed.set(true);
        Ok(())
    }

    fn add_match(&self, expression: &str) -> Result<(), BusError> {
        if self.fail_add_match.get() {
            return Err(BusError::Transport(format!("cannot add match {expression}")));
        }
        self.matches.borrow_mut().push(expression.to_string());
        Ok(())
    }

    fn remove_match(&self, expression: &str) -> Result<(), BusError> {
        if self.fail_remove_match.get() {
            return Err(BusError::Transport(format!("cannot remove match {expression}")));
        }
        let mut matches = self.matches.borrow_mut();
        match matches.iter().position(|m| m == expression) {
            Some(index) => {
                matches.remove(index);
                Ok(())
            }
            None => Err(BusError::Transport(format!("no such match {expression}"))),
        }
    }

    fn request_name(&self, name: &str) -> Result<RequestNameReply, BusError> {
        let reply = self.name_reply.get().unwrap_or(RequestNameReply::PrimaryOwner);
        if matches!(reply, RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) {
            self.owners.borrow_mut().insert(name.to_string());
        }
        Ok(reply)
    }

    fn name_has_owner(&self, name: &str) -> Result<bool, BusError> {
        if self.fail_owner_query.get() {
            return Err(BusError::Transport("NameHasOwner failed".to_string()));
        }
        Ok(self.owners.borrow().contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> Message {
        Message::method_call("com.example", "/", "com.example", "Ping")
    }

    #[test]
    fn send_assigns_increasing_serials() {
        let bus = MemoryBus::new();
        let a = bus.send(ping()).unwrap();
        let b = bus.send(ping()).unwrap();
        assert!(b > a);
        let sent = bus.take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].serial(), b);
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn matches_are_a_multiset() {
        let bus = MemoryBus::new();
        bus.add_match("type='signal'").unwrap();
        bus.add_match("type='signal'").unwrap();
        bus.remove_match("type='signal'").unwrap();
        assert_eq!(bus.matches(), vec!["type='signal'"]);
        bus.remove_match("type='signal'").unwrap();
        assert!(bus.remove_match("type='signal'").is_err());
    }

    #[test]
    fn request_name_takes_ownership() {
        let bus = MemoryBus::new();
        assert!(!bus.name_has_owner("com.example").unwrap());
        assert_eq!(bus.request_name("com.example").unwrap(), RequestNameReply::PrimaryOwner);
        assert!(bus.name_has_owner("com.example").unwrap());

        bus.set_name_reply(RequestNameReply::InQueue);
        assert_eq!(bus.request_name("com.other").unwrap(), RequestNameReply::InQueue);
        assert!(!bus.name_has_owner("com.other").unwrap());
    }

    #[test]
    fn blocking_call_without_responder_times_out() {
        let bus = MemoryBus::new();
        assert_eq!(
            bus.send_blocking(ping(), Duration::from_millis(1)),
            Err(BusError::NoReply)
        );
        bus.respond_with(|call| Message::method_return(call).map_err(|e| BusError::Transport(e.to_string())));
        let reply = bus.send_blocking(ping(), Duration::from_millis(1)).unwrap();
        assert_eq!(reply.reply_serial(), Some(2));
    }

    #[test]
    fn injected_failures() {
        let bus = MemoryBus::new();
        bus.fail_send(true);
        assert_eq!(bus.send(ping()), Err(BusError::Disconnected));
        bus.fail_subscribe(true);
        assert!(bus.add_match("x").is_err());
        bus.fail_owner_query(true);
        assert!(bus.name_has_owner("x").is_err());
    }
}
