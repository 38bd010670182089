use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(self) -> bool {
        matches!(self, ConnectivityState::Online)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        }
    }
}

/// Explicit two-state connectivity machine. The signal is advisory: an
/// online report does not guarantee any particular endpoint is reachable,
/// so replay failures are still handled by the queue's retry logic.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Returns true only on a real Offline -> Online transition, so the
    /// drain trigger fires exactly once per reconnect.
    pub fn set_online(&self) -> bool {
        let transitioned = self.tx.send_if_modified(|state| {
            if *state == ConnectivityState::Offline {
                *state = ConnectivityState::Online;
                true
            } else {
                false
            }
        });
        if transitioned {
            tracing::info!("connectivity: back online");
        }
        transitioned
    }

    pub fn set_offline(&self) -> bool {
        let transitioned = self.tx.send_if_modified(|state| {
            if *state == ConnectivityState::Online {
                *state = ConnectivityState::Offline;
                true
            } else {
                false
            }
        });
        if transitioned {
            tracing::warn!("connectivity: going offline");
        }
        transitioned
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}
