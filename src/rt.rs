// Copyright 2018-2024 the Deno authors. MIT license.

use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

pub type BoxedFuture = LocalBoxFuture<'static, ()>;

/// An executor for futures.
///
/// This trait allows the resolver to build modules and write coverage
/// entries as background tasks.
pub trait Executor {
  /// Spawns a future to run on this executor.
  fn execute(&self, fut: BoxedFuture) -> BoxedFuture;
}

/// Spawns onto the current thread's tokio runtime. On wasm the future is
/// run when it is first awaited.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutor;

impl Executor for DefaultExecutor {
  #[cfg(not(target_arch = "wasm32"))]
  fn execute(&self, fut: BoxedFuture) -> BoxedFuture {
    use futures::FutureExt;
    deno_unsync::spawn(fut).map(|_| ()).boxed_local()
  }

  #[cfg(target_arch = "wasm32")]
  fn execute(&self, fut: BoxedFuture) -> BoxedFuture {
    fut
  }
}

pub(crate) struct JoinHandle<T> {
  rx: oneshot::Receiver<T>,
  fut: BoxedFuture,
}

impl<T> Future for JoinHandle<T> {
  type Output = T;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
    if let Poll::Ready(()) = Pin::new(&mut self.fut).poll(cx) {
      if let Poll::Ready(Ok(res)) = Pin::new(&mut self.rx).poll(cx) {
        Poll::Ready(res)
      } else {
        panic!("task panic");
      }
    } else {
      Poll::Pending
    }
  }
}

pub(crate) fn spawn<F, T: 'static>(
  executor: &dyn Executor,
  f: F,
) -> JoinHandle<T>
where
  F: Future<Output = T> + 'static,
{
  let (tx, rx) = oneshot::channel();
  let fut = executor.execute(Box::pin(async move {
    tx.send(f.await).ok();
  }));

  JoinHandle { rx, fut }
}
