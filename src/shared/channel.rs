//! channel.rs
//! Unbounded FIFO channels between the roles and the pipes that carry them across processes.
//!
//! - in-process both directions are plain crossbeam unbounded channels (send never blocks)
//! - `MessageOutbox` owns the master -> slave sender; closing it emits exactly one `Exit` and
//!   refuses every later `Data`, whichever thread closes it first
//! - `pump_*` bridge a channel to a line-oriented pipe (child stdin/stdout)

use std::{
    fmt::Display,
    io::{self, BufRead, Write},
    str::FromStr,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::shared::{
    error::{ChannelClosedError, WireError},
    wire::Message,
};

pub const MASTER_TO_SLAVE: &str = "master->slave";
pub const SLAVE_TO_MASTER: &str = "slave->master";

/// Result of offering a `Data` message to the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The outbox was closed (sentinel already sent); nothing was queued.
    Closed,
}

struct OpenOutbox {
    tx: Sender<Message>,
    // Dropped together with `tx`; wakes `wait_closed` callers.
    _wake: Sender<()>,
}

/// Sending half of the master -> slave channel, shared by the master loop and `stop()`.
pub struct MessageOutbox {
    open: Mutex<Option<OpenOutbox>>,
    closed: Receiver<()>,
}

impl MessageOutbox {
    pub fn new(tx: Sender<Message>) -> Self {
        let (wake, closed) = unbounded();
        Self {
            open: Mutex::new(Some(OpenOutbox { tx, _wake: wake })),
            closed,
        }
    }

    /// Queue `Data{sequence}` unless the outbox has been closed.
    pub fn send_data(&self, sequence: u64) -> Result<Delivery, ChannelClosedError> {
        let open = self.open.lock();
        match open.as_ref() {
            Some(outbox) => outbox
                .tx
                .send(Message::Data { sequence })
                .map(|_| Delivery::Sent)
                .map_err(|_| ChannelClosedError(MASTER_TO_SLAVE)),
            None => Ok(Delivery::Closed),
        }
    }

    /// Send the `Exit` sentinel and close. Returns `Ok(false)` if already closed.
    pub fn close_with_exit(&self) -> Result<bool, ChannelClosedError> {
        let taken = self.open.lock().take();
        match taken {
            Some(outbox) => {
                outbox
                    .tx
                    .send(Message::Exit)
                    .map_err(|_| ChannelClosedError(MASTER_TO_SLAVE))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.open.lock().is_none()
    }

    /// Sleep up to `timeout`, returning early (with `true`) once the outbox is closed.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        matches!(
            self.closed.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

/// Drain `rx` into `writer`, one item per line, until every sender is gone.
pub fn pump_to_writer<T, W>(rx: Receiver<T>, mut writer: W, label: &str) -> io::Result<u64>
where
    T: Display,
    W: Write,
{
    let mut written = 0u64;
    for item in rx.iter() {
        writeln!(writer, "{}", item)?;
        writer.flush()?;
        written += 1;
    }
    debug!("[Channel] {} writer done after {} item(s)", label, written);
    Ok(written)
}

/// Parse lines from `reader` into `tx` until EOF. Malformed lines are logged and skipped.
/// `wrap` runs on the reader thread as soon as an item is parsed (e.g. to stamp its arrival).
pub fn pump_from_reader<T, U, R, F>(reader: R, tx: Sender<U>, label: &str, mut wrap: F) -> io::Result<u64>
where
    T: FromStr<Err = WireError>,
    R: BufRead,
    F: FnMut(T) -> U,
{
    let mut forwarded = 0u64;
    for line in reader.lines() {
        let line = line?;
        match line.parse::<T>() {
            Ok(item) => {
                if tx.send(wrap(item)).is_err() {
                    debug!("[Channel] {} consumer gone, reader stops", label);
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!("[Channel] {}: {}", label, e),
        }
    }
    debug!("[Channel] {} reader done after {} item(s)", label, forwarded);
    Ok(forwarded)
}

pub fn spawn_writer<T, W>(
    label: &'static str,
    rx: Receiver<T>,
    writer: W,
) -> io::Result<JoinHandle<io::Result<u64>>>
where
    T: Display + Send + 'static,
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-writer", label))
        .spawn(move || pump_to_writer(rx, writer, label))
}

pub fn spawn_reader<T, U, R, F>(
    label: &'static str,
    reader: R,
    tx: Sender<U>,
    wrap: F,
) -> io::Result<JoinHandle<io::Result<u64>>>
where
    T: FromStr<Err = WireError> + 'static,
    U: Send + 'static,
    R: BufRead + Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-reader", label))
        .spawn(move || pump_from_reader(reader, tx, label, wrap))
}

/// Join a bridge thread, folding panics into an io error.
pub fn join_bridge(handle: JoinHandle<io::Result<u64>>, label: &str) -> io::Result<u64> {
    handle
        .join()
        .map_err(|_| io::Error::other(format!("{} bridge panicked", label)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::wire::Ack;
    use std::{io::Cursor, sync::Arc, time::Instant};

    #[test]
    fn exit_is_sent_once_and_last() {
        let (tx, rx) = unbounded();
        let outbox = MessageOutbox::new(tx);

        assert_eq!(outbox.send_data(0), Ok(Delivery::Sent));
        assert_eq!(outbox.send_data(1), Ok(Delivery::Sent));
        assert_eq!(outbox.close_with_exit(), Ok(true));
        assert_eq!(outbox.close_with_exit(), Ok(false));
        assert_eq!(outbox.send_data(2), Ok(Delivery::Closed));
        assert!(outbox.is_closed());

        let seen: Vec<Message> = rx.iter().collect();
        assert_eq!(
            seen,
            vec![
                Message::Data { sequence: 0 },
                Message::Data { sequence: 1 },
                Message::Exit
            ]
        );
    }

    #[test]
    fn send_to_a_vanished_consumer_is_channel_closed() {
        let (tx, rx) = unbounded();
        let outbox = MessageOutbox::new(tx);
        drop(rx);
        assert_eq!(outbox.send_data(0), Err(ChannelClosedError(MASTER_TO_SLAVE)));
        assert!(outbox.close_with_exit().is_err());
    }

    #[test]
    fn wait_closed_wakes_on_close_from_another_thread() {
        let (tx, _rx) = unbounded();
        let outbox = Arc::new(MessageOutbox::new(tx));
        assert!(!outbox.wait_closed(Duration::from_millis(5)));

        let closer = {
            let outbox = outbox.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                outbox.close_with_exit()
            })
        };
        let start = Instant::now();
        assert!(outbox.wait_closed(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(closer.join().unwrap(), Ok(true));
    }

    #[test]
    fn concurrent_close_sends_a_single_exit() {
        let (tx, rx) = unbounded();
        let outbox = Arc::new(MessageOutbox::new(tx));
        let closers: Vec<_> = (0..8)
            .map(|_| {
                let outbox = outbox.clone();
                thread::spawn(move || outbox.close_with_exit().unwrap())
            })
            .collect();
        let winners = closers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|sent| *sent)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(rx.iter().filter(|m| *m == Message::Exit).count(), 1);
    }

    #[test]
    fn writer_emits_one_line_per_item() {
        let (tx, rx) = unbounded();
        tx.send(Message::Data { sequence: 3 }).unwrap();
        tx.send(Message::Exit).unwrap();
        drop(tx);

        let mut out = Vec::new();
        let written = pump_to_writer(rx, &mut out, MASTER_TO_SLAVE).unwrap();
        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "DATA_3\nEXIT\n");
    }

    #[test]
    fn reader_skips_malformed_lines() {
        let input = Cursor::new("ACK_DATA_0\ngarbage\nACK_DATA_1\n\nACK_DATA_2\n");
        let (tx, rx) = unbounded::<Ack>();
        let forwarded = pump_from_reader(input, tx, SLAVE_TO_MASTER, |ack: Ack| ack).unwrap();
        assert_eq!(forwarded, 3);
        let seqs: Vec<u64> = rx.iter().map(|a| a.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
