//! Typed channels over `crossbeam-channel`.
//!
//! Capacity 0 is a rendezvous: a send completes only once a receiver has
//! taken the value. Objects placed on a channel have their in-transit
//! counter raised until they are received.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use relish_core::TypeId;

use crate::error::RuntimeError;
use crate::value::Value;

pub struct RChannel {
    type_id: TypeId,
    elem_type: TypeId,
    capacity: usize,
    sender: Mutex<Option<Sender<Value>>>,
    receiver: Receiver<Value>,
}

fn enter_transit(value: &Value) {
    if let Value::Object(o) = value {
        o.enter_transit();
    }
}

fn leave_transit(value: &Value) {
    if let Value::Object(o) = value {
        o.leave_transit();
    }
}

impl RChannel {
    /// A channel of `Channel[elem_type]` (`type_id`) holding up to `capacity` values.
    pub fn new(type_id: TypeId, elem_type: TypeId, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        RChannel {
            type_id,
            elem_type,
            capacity,
            sender: Mutex::new(Some(tx)),
            receiver: rx,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn elem_type(&self) -> TypeId {
        self.elem_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued values.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn sender(&self) -> Result<Sender<Value>, RuntimeError> {
        self.sender.lock().clone().ok_or(RuntimeError::ChannelClosed)
    }

    /// Blocks while the buffer is full.
    pub fn send(&self, value: Value) -> Result<(), RuntimeError> {
        let tx = self.sender()?;
        enter_transit(&value);
        tx.send(value).map_err(|e| {
            leave_transit(&e.0);
            RuntimeError::ChannelClosed
        })
    }

    /// Non-blocking send; `Ok(false)` when the buffer is full.
    pub fn try_send(&self, value: Value) -> Result<bool, RuntimeError> {
        let tx = self.sender()?;
        enter_transit(&value);
        match tx.try_send(value) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(v)) => {
                leave_transit(&v);
                Ok(false)
            }
            Err(TrySendError::Disconnected(v)) => {
                leave_transit(&v);
                Err(RuntimeError::ChannelClosed)
            }
        }
    }

    /// Blocks until a value arrives. A closed and drained channel yields
    /// `(Nil, false)`.
    pub fn recv(&self) -> (Value, bool) {
        match self.receiver.recv() {
            Ok(v) => {
                leave_transit(&v);
                (v, true)
            }
            Err(_) => (Value::Nil, false),
        }
    }

    /// Non-blocking receive; `None` when nothing is queued.
    pub fn try_recv(&self) -> Option<(Value, bool)> {
        match self.receiver.try_recv() {
            Ok(v) => {
                leave_transit(&v);
                Some((v, true))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some((Value::Nil, false)),
        }
    }

    /// Closes the channel. Queued values can still be received.
    pub fn close(&self) -> Result<(), RuntimeError> {
        match self.sender.lock().take() {
            Some(_) => Ok(()),
            None => Err(RuntimeError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::RObject;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn chan(capacity: usize) -> Arc<RChannel> {
        Arc::new(RChannel::new(TypeId::CHANNEL, TypeId::ANY, capacity))
    }

    #[test]
    fn fifo_order() {
        let ch = chan(8);
        for i in 0..5 {
            ch.send(Value::Int(i)).unwrap();
        }
        assert_eq!(ch.len(), 5);
        let got: Vec<_> = (0..5).map(|_| ch.recv().0).collect();
        assert_eq!(got, (0..5).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn rendezvous_send_waits_for_receiver() {
        let ch = chan(0);
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(Value::str("v")).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!sender.is_finished());
        assert_eq!(ch.recv(), (Value::str("v"), true));
        sender.join().unwrap();
    }

    #[test]
    fn closed_channel() {
        let ch = chan(2);
        ch.send(Value::Int(1)).unwrap();
        ch.close().unwrap();
        assert!(matches!(ch.send(Value::Int(2)), Err(RuntimeError::ChannelClosed)));
        assert_eq!(ch.recv(), (Value::Int(1), true));
        assert_eq!(ch.recv(), (Value::Nil, false));
        assert!(ch.close().is_err());
    }

    #[test]
    fn objects_are_in_transit_while_queued() {
        let ch = chan(1);
        let obj = RObject::new_struct(TypeId(30), 0);
        ch.send(Value::Object(Arc::clone(&obj))).unwrap();
        assert_eq!(obj.in_transit(), 1);
        assert!(!ch.try_send(Value::Object(Arc::clone(&obj))).unwrap());
        assert_eq!(obj.in_transit(), 1);
        ch.recv();
        assert_eq!(obj.in_transit(), 0);
    }

    #[test]
    fn try_recv_on_empty() {
        let ch = chan(1);
        assert!(ch.try_recv().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn values_arrive_in_send_order(
            xs in proptest::collection::vec(any::<i64>(), 0..64),
            capacity in 0usize..4,
        ) {
            let ch = chan(capacity);
            let sender = {
                let ch = Arc::clone(&ch);
                let xs = xs.clone();
                thread::spawn(move || {
                    for x in xs {
                        ch.send(Value::Int(x)).unwrap();
                    }
                    ch.close().unwrap();
                })
            };
            let mut got = Vec::new();
            loop {
                match ch.recv() {
                    (Value::Int(x), true) => got.push(x),
                    (_, false) => break,
                    (other, true) => panic!("unexpected {other:?}"),
                }
            }
            sender.join().unwrap();
            prop_assert_eq!(got, xs);
        }
    }
}
