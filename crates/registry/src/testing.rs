// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! In-process transport fake for tests and embedding experiments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::transport::{Handshake, SendError, TransportEvent, TransportHandle};

/// Records everything the registry does to it. Disconnecting emits a
/// `Disconnect` event, the way a real transport reports its own close.
pub struct RecordingHandle {
    local_id: String,
    handshake: Handshake,
    connected: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<(String, serde_json::Value)>>,
    disconnects: Mutex<Vec<bool>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl RecordingHandle {
    pub fn new(local_id: &str) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            local_id: local_id.to_string(),
            handshake: Handshake {
                address: "127.0.0.1".to_string(),
                user_agent: Some("recording-handle".to_string()),
                referer: None,
            },
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(vec![]),
            disconnects: Mutex::new(vec![]),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Inject a lifecycle event as if the client produced it.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Drop the event sender, as a transport does when it goes away without
    /// reporting a disconnect.
    pub fn close_events(&self) {
        self.events_tx.lock().unwrap().take();
    }

    /// Make subsequent sends fail while still reporting connected.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent_events(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<(String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn disconnect_calls(&self) -> Vec<bool> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn was_force_closed(&self) -> bool {
        self.disconnects.lock().unwrap().iter().any(|force| *force)
    }
}

impl TransportHandle for RecordingHandle {
    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn handshake(&self) -> Handshake {
        self.handshake.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, event: &str, payload: serde_json::Value) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SendError::Failed("injected failure".to_string()));
        }
        self.sent.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }

    fn disconnect(&self, force: bool) {
        self.disconnects.lock().unwrap().push(force);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnect("server namespace disconnect".to_string()));
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }
}
