// Copyright (C) 2026 The Floe Catalog Authors
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::{Arc, Condvar, Mutex};

/// The reason a server woke up from `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Work is pending: a watch event fired or a request was queued.
    Work,
    /// The server has been asked to finish the current iteration and exit.
    End,
}

#[derive(Default)]
struct SignalState {
    work_pending: bool,
    ended: bool,
}

/// A work signaller is shared between a server thread and its callers. Callers
/// signal it when there is something to do; the server waits on it between scan
/// iterations. It's the server's responsibility to respect an end request.
#[derive(Clone)]
pub struct WorkSignaller {
    state: Arc<Mutex<SignalState>>,
    condvar: Arc<Condvar>,
}

impl WorkSignaller {
    /// Creates a new work signaller.
    pub fn new() -> WorkSignaller {
        WorkSignaller {
            state: Arc::new(Mutex::new(SignalState::default())),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Flags pending work and wakes the server.
    pub fn signal(&self) {
        let mut state = self.state.lock().expect("Error getting lock");
        state.work_pending = true;
        self.condvar.notify_all();
    }

    /// Asks the server to exit after its current iteration and wakes it.
    pub fn end(&self) {
        let mut state = self.state.lock().expect("Error getting lock");
        state.ended = true;
        self.condvar.notify_all();
    }

    /// Returns true if the server has been asked to exit.
    pub fn is_ended(&self) -> bool {
        self.state.lock().expect("Error getting lock").ended
    }

    /// Blocks until work is signalled or the server is asked to exit. Consumes
    /// the pending-work flag so the next wait blocks again.
    pub fn wait(&self) -> WakeReason {
        let state = self.state.lock().expect("Error getting lock");
        let mut state = self
            .condvar
            .wait_while(state, |state| !state.work_pending && !state.ended)
            .expect("Error getting lock");
        if state.ended {
            WakeReason::End
        } else {
            state.work_pending = false;
            WakeReason::Work
        }
    }
}

impl Default for WorkSignaller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_signal_wakes_waiter() {
        let signaller = WorkSignaller::new();

        let join = {
            let signaller = signaller.clone();
            thread::spawn(move || signaller.wait())
        };

        signaller.signal();
        assert_eq!(WakeReason::Work, join.join().expect("thread panicked"));
        assert!(!signaller.is_ended());
    }

    #[test]
    fn test_end_wakes_waiter() {
        let signaller = WorkSignaller::new();

        let join = {
            let signaller = signaller.clone();
            thread::spawn(move || signaller.wait())
        };

        signaller.end();
        assert_eq!(WakeReason::End, join.join().expect("thread panicked"));
        assert!(signaller.is_ended());
    }

    #[test]
    fn test_work_flag_is_consumed() {
        let signaller = WorkSignaller::new();
        signaller.signal();
        assert_eq!(WakeReason::Work, signaller.wait());

        // The next wait would block, so only check the flag state.
        assert!(!signaller.state.lock().expect("lock").work_pending);
    }
}
