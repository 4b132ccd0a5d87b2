//! Buffered writes into a sink shared between threads.
//!
//! Each thread owns a `BufferedWriter` and all of them point at the same
//! `Mutex<S>`. Values collect in the private buffer; once `soft_limit` is
//! reached the writer flushes only if the lock is free, and at `hard_limit`
//! it waits for the lock.

use std::sync::{Mutex, MutexGuard, TryLockError};

use strata_core::types::Scalar;

use crate::error::{Error, Result};
use crate::table_writer::SegmentOutput;

/// Anything values can be written into, one at a time.
pub trait RowSink<T> {
    fn put(&mut self, value: T) -> Result<()>;
}

impl<T> RowSink<T> for Vec<T> {
    fn put(&mut self, value: T) -> Result<()> {
        self.push(value);
        Ok(())
    }
}

impl RowSink<Vec<Scalar>> for SegmentOutput {
    fn put(&mut self, row: Vec<Scalar>) -> Result<()> {
        self.write_row(&row)
    }
}

impl RowSink<Scalar> for SegmentOutput {
    fn put(&mut self, value: Scalar) -> Result<()> {
        self.write_value(value)
    }
}

pub struct BufferedWriter<'a, T, S: RowSink<T>> {
    sink: &'a Mutex<S>,
    buffer: Vec<T>,
    soft_limit: usize,
    hard_limit: usize,
}

impl<'a, T, S: RowSink<T>> BufferedWriter<'a, T, S> {
    /// Requires `0 < soft_limit < hard_limit`.
    pub fn new(sink: &'a Mutex<S>, soft_limit: usize, hard_limit: usize) -> Result<Self> {
        if soft_limit == 0 || hard_limit <= soft_limit {
            return Err(Error::Invalid(format!(
                "buffered writer needs 0 < soft limit < hard limit, got {soft_limit} and {hard_limit}"
            )));
        }
        Ok(Self {
            sink,
            buffer: Vec::with_capacity(hard_limit),
            soft_limit,
            hard_limit,
        })
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn write(&mut self, value: T) -> Result<()> {
        self.buffer.push(value);
        let sink = self.sink;
        if self.buffer.len() >= self.hard_limit {
            self.flush()
        } else if self.buffer.len() >= self.soft_limit {
            match sink.try_lock() {
                Ok(guard) => self.flush_locked(guard),
                Err(TryLockError::WouldBlock) => Ok(()),
                Err(TryLockError::Poisoned(_)) => Err(poisoned()),
            }
        } else {
            Ok(())
        }
    }

    /// Write everything buffered, waiting for the lock if needed.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let sink = self.sink;
        let guard = sink.lock().map_err(|_| poisoned())?;
        self.flush_locked(guard)
    }

    /// A failed `put` consumes the value it was given; the values after it
    /// stay buffered for the next flush.
    fn flush_locked(&mut self, mut guard: MutexGuard<'_, S>) -> Result<()> {
        let mut pending = std::mem::take(&mut self.buffer);
        let mut result = Ok(());
        let mut values = pending.drain(..);
        for value in values.by_ref() {
            if let Err(e) = guard.put(value) {
                result = Err(e);
                break;
            }
        }
        let unwritten: Vec<T> = values.collect();
        pending.extend(unwritten);
        self.buffer = pending;
        result
    }
}

fn poisoned() -> Error {
    Error::Invariant("buffered writer sink lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_validated() {
        let sink: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        assert!(BufferedWriter::new(&sink, 4, 4).is_err());
        assert!(BufferedWriter::new(&sink, 0, 4).is_err());
        assert!(BufferedWriter::new(&sink, 4, 8).is_ok());
    }

    #[test]
    fn flushes_at_soft_limit_when_free() {
        let sink = Mutex::new(Vec::new());
        let mut w = BufferedWriter::new(&sink, 4, 8).unwrap();
        for i in 0..3 {
            w.write(i).unwrap();
        }
        assert_eq!(w.pending(), 3);
        w.write(3).unwrap();
        assert_eq!(w.pending(), 0);
        assert_eq!(*sink.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn keeps_buffering_while_locked_then_blocks_at_hard_limit() {
        let sink = Mutex::new(Vec::new());
        let mut w = BufferedWriter::new(&sink, 4, 8).unwrap();
        {
            let _held = sink.lock().unwrap();
            for i in 0..7 {
                w.write(i).unwrap();
            }
            assert_eq!(w.pending(), 7);
        }
        w.write(7).unwrap();
        assert_eq!(w.pending(), 0);
        assert_eq!(*sink.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    /// Accepts `capacity` values, then fails every `put`.
    struct Bounded {
        rows: Vec<u32>,
        capacity: usize,
    }

    impl RowSink<u32> for Bounded {
        fn put(&mut self, value: u32) -> Result<()> {
            if self.rows.len() == self.capacity {
                return Err(Error::Invalid("sink full".into()));
            }
            self.rows.push(value);
            Ok(())
        }
    }

    #[test]
    fn failed_flush_keeps_unwritten_values() {
        let sink = Mutex::new(Bounded { rows: Vec::new(), capacity: 3 });
        let mut w = BufferedWriter::new(&sink, 8, 16).unwrap();
        for i in 0..5 {
            w.write(i).unwrap();
        }
        assert!(matches!(w.flush(), Err(Error::Invalid(_))));
        assert_eq!(w.pending(), 1);
        assert_eq!(sink.lock().unwrap().rows, vec![0, 1, 2]);

        sink.lock().unwrap().capacity = 10;
        w.flush().unwrap();
        assert_eq!(w.pending(), 0);
        assert_eq!(sink.lock().unwrap().rows, vec![0, 1, 2, 4]);
    }

    #[test]
    fn poisoned_sink_is_an_error() {
        let sink = Mutex::new(Vec::<u8>::new());
        let _ = std::panic::catch_unwind(|| {
            let _g = sink.lock().unwrap();
            panic!("poison");
        });
        let mut w = BufferedWriter::new(&sink, 1, 2).unwrap();
        assert!(matches!(w.write(1), Err(Error::Invariant(_))));
    }
}
