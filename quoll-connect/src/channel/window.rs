use crate::{Error, Result};

/// The window we granted to the peer: how much the peer may still send,
/// and how much has been consumed downstream since the last adjust.
#[derive(Debug)]
pub(crate) struct LocalWindow {
    window: u32,
    done: u32,
    initial: u32,
}

impl LocalWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            window: initial,
            done: 0,
            initial,
        }
    }

    /// Account inbound channel data against the grant; a peer exceeding
    /// it is violating the protocol.
    pub fn consume(&mut self, size: u32) -> Result<()> {
        self.window = self
            .window
            .checked_sub(size)
            .ok_or_else(|| Error::Protocol("peer sent more data than the granted window".into()))?;

        Ok(())
    }

    /// Account bytes handed off to the local consumer.
    pub fn drained(&mut self, size: u32) {
        self.done += size;
    }

    /// Replenish once half the initial window has been consumed
    /// downstream; returns the `SSH_MSG_CHANNEL_WINDOW_ADJUST` credit.
    pub fn adjustable(&mut self) -> Option<u32> {
        if self.done < self.initial / 2 {
            return None;
        }

        let add = self.done;
        self.window += add;
        self.done = 0;

        Some(add)
    }
}

/// The window the peer granted to us: transmission credit.
#[derive(Debug, Default)]
pub(crate) struct RemoteWindow {
    window: u32,
}

impl RemoteWindow {
    pub fn grant(&mut self, initial: u32) {
        self.window = initial;
    }

    /// The most we may currently put in a single data message.
    pub fn reserve(&self, want: u32) -> u32 {
        self.window.min(want)
    }

    pub fn consume(&mut self, size: u32) {
        debug_assert!(size <= self.window);
        self.window -= size;
    }

    /// Credit from a peer `SSH_MSG_CHANNEL_WINDOW_ADJUST`; overflowing
    /// `u32` is a protocol violation.
    pub fn replenish(&mut self, add: u32) -> Result<()> {
        self.window = self
            .window
            .checked_add(add)
            .ok_or_else(|| Error::Protocol("peer overflowed the transmit window".into()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_adjusts_at_half() {
        let mut window = LocalWindow::new(1024);

        window.consume(400).expect("within grant");
        window.drained(400);
        assert_eq!(window.adjustable(), None);

        window.consume(200).expect("within grant");
        window.drained(200);
        assert_eq!(window.adjustable(), Some(600));
        assert_eq!(window.adjustable(), None);
    }

    #[test]
    fn local_rejects_overrun() {
        let mut window = LocalWindow::new(64);

        window.consume(64).expect("within grant");
        assert!(window.consume(1).is_err());
    }

    #[test]
    fn remote_reserves_and_replenishes() {
        let mut window = RemoteWindow::default();
        window.grant(100);

        assert_eq!(window.reserve(1024), 100);
        window.consume(100);
        assert_eq!(window.reserve(1024), 0);

        window.replenish(50).expect("no overflow");
        assert_eq!(window.reserve(20), 20);

        assert!(window.replenish(u32::MAX).is_err());
    }
}
