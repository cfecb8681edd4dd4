use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::GatewayError;

pub type DataCallback<T> = Box<dyn FnMut(T) + Send + 'static>;
pub type ErrorCallback = Box<dyn FnOnce(GatewayError) + Send + 'static>;

/// Handle to a live, push-driven query. Released exactly once, either through
/// `unsubscribe` or when the handle is dropped.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(future)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
