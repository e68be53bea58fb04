//! A counting semaphore built from a mutex and condition variable.
//!
//! Worker pools and the side-channel bus block on these; there is no async
//! runtime anywhere in the pipeline, every long-lived worker has a dedicated
//! OS thread.
use parking_lot::{Condvar, Mutex};

pub struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Semaphore {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cv.wait(&mut count);
        }
        *count -= 1;
    }

    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_release_counts() {
        let sem = Semaphore::new(2);
        sem.acquire();
        sem.acquire();
        sem.release();
        sem.acquire();
    }

    #[test]
    fn release_wakes_blocked_acquirer() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = sem.clone();

        let handle = std::thread::spawn(move || sem2.acquire());
        std::thread::sleep(std::time::Duration::from_millis(10));
        sem.release();
        handle.join().unwrap();
    }
}
