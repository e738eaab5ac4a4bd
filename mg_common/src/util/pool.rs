use crossbeam_channel::Sender;
use std::thread;

type BoxFn<S> = Box<dyn FnOnce(&S) + Send>;

/// A pool of threads. Each thread will be created with some state. The
/// `new_state` function passed to the constructor will be called once for every
/// thread that is created. This state will then be passed to each thread
/// whenever they execute. This can be used for things such as cloning an arc on
/// initialization, instead of cloning it every time you call `execute`.
pub struct ThreadPool<S> {
  tx: Sender<BoxFn<S>>,
}

impl<S: Send + 'static> ThreadPool<S> {
  /// Creates a thread pool with the same number of workers as cores on the
  /// system. These are logical cores, so features like hyper threading will be
  /// accounted for.
  pub fn auto<F: Fn() -> S>(name: &str, new_state: F) -> Self {
    ThreadPool::new(name, num_cpus::get() as u32, new_state)
  }

  /// Creates a thread pool with the given number of worker threads. A
  /// reasonable number should be chosen here. Anything too large will crash the
  /// program and/or host system.
  ///
  /// # Panics
  ///
  /// Panics if the number of workers is 0.
  pub fn new<F: Fn() -> S>(name: &str, workers: u32, new_state: F) -> Self {
    if workers == 0 {
      panic!("cannot create a thread pool with no workers");
    }
    let (tx, rx): (Sender<BoxFn<S>>, _) = crossbeam_channel::bounded(256);
    for i in 0..workers {
      let s = new_state();
      let rx = rx.clone();
      thread::Builder::new()
        .name(format!("{name}-{i}"))
        .spawn(move || {
          while let Ok(f) = rx.recv() {
            f(&s)
          }
        })
        .expect("failed to spawn worker thread");
    }
    ThreadPool { tx }
  }

  /// Executes the given task on the next worker thread.
  pub fn execute<F: FnOnce(&S) + Send + 'static>(&self, f: F) {
    self.tx.send(Box::new(f)).expect("thread unexpectedly closed");
  }

  /// Waits for all tasks to be submitted to workers.
  pub fn wait(&self) {
    loop {
      if self.tx.is_empty() {
        break;
      }
      std::thread::yield_now();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
  };

  #[test]
  fn executes_all() {
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();
    let pool = ThreadPool::new("test", 2, move || c.clone());
    for _ in 0..16 {
      pool.execute(|c: &Arc<AtomicU32>| {
        c.fetch_add(1, Ordering::SeqCst);
      });
    }
    pool.wait();
    // wait() only waits for submission, so give the workers a moment.
    for _ in 0..100 {
      if count.load(Ordering::SeqCst) == 16 {
        return;
      }
      std::thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("pool did not run all tasks");
  }
}
