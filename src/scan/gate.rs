use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Counting semaphore bounding how many probes may be in flight.
#[derive(Debug)]
pub struct Gate {
    width: usize,
    in_flight: Mutex<usize>,
    freed: Condvar,
}

/// One admitted unit. Released on drop, whatever path the holder takes.
#[derive(Debug)]
#[must_use = "the unit is released as soon as the permit is dropped"]
pub struct Permit<'a> {
    gate: &'a Gate,
}

impl Gate {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            in_flight: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn in_flight(&self) -> usize {
        *self.count()
    }

    /// Blocks the calling thread until a unit is free.
    pub fn acquire(&self) -> Permit<'_> {
        let mut in_flight = self.count();
        while *in_flight >= self.width {
            in_flight = self
                .freed
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;

        Permit { gate: self }
    }

    fn release(&self) {
        let mut in_flight = self.count();
        *in_flight -= 1;
        drop(in_flight);

        self.freed.notify_one();
    }

    // A panicking holder can't leave the counter half updated.
    fn count(&self) -> MutexGuard<'_, usize> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
