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

//! A thread-safe notification list for surfacing errors and tips to a UI.
//!
//! Entries are keyed by a stable id: reporting the same id again replaces the
//! previous entry instead of stacking duplicates.

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Stable identity. The same failing operation reports the same id.
    pub id: u64,
    pub title: String,
    pub message: Option<String>,
    /// A short error code for display, when the notification is an error.
    pub error_code: Option<String>,
}

#[derive(Default)]
pub struct ErrorNotifications {
    entries: Mutex<Vec<Notification>>,
}

impl ErrorNotifications {
    pub fn new() -> ErrorNotifications {
        ErrorNotifications::default()
    }

    /// Adds or replaces the notification with this id.
    pub fn report(&self, notification: Notification) {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|n| n.id == notification.id) {
            Some(existing) => *existing = notification,
            None => entries.push(notification),
        }
    }

    pub fn dismiss(&self, id: u64) {
        self.entries.lock().retain(|n| n.id != id);
    }

    /// A copy of the current entries, oldest first.
    pub fn current(&self) -> Vec<Notification> {
        self.entries.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn note(id: u64, title: &str) -> Notification {
        Notification {
            id,
            title: title.to_string(),
            message: None,
            error_code: None,
        }
    }

    #[test]
    fn test_same_id_replaces() {
        let notifications = ErrorNotifications::new();
        notifications.report(note(1, "first"));
        notifications.report(note(2, "other"));
        notifications.report(note(1, "updated"));

        let current = notifications.current();
        assert_eq!(2, current.len());
        assert_eq!("updated", current[0].title);
    }

    #[test]
    fn test_dismiss() {
        let notifications = ErrorNotifications::new();
        notifications.report(note(1, "a"));
        notifications.dismiss(1);
        assert!(notifications.is_empty());
    }
}
