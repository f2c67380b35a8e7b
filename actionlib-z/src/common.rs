use std::sync::Arc;

/// Core abstraction for handling incoming data in subscriptions
pub enum DataHandler<T> {
    /// Queue-based: store for later retrieval
    Queue(flume::Sender<T>),

    /// Direct callback: process immediately on the node's spinner
    Callback(Arc<dyn Fn(T) + Send + Sync>),
}

impl<T> DataHandler<T> {
    pub fn handle(&self, data: T) {
        match self {
            DataHandler::Queue(tx) => {
                if tx.send(data).is_err() {
                    tracing::trace!("[SUB] Queue receiver dropped, discarding sample");
                }
            }
            DataHandler::Callback(cb) => cb(data),
        }
    }
}

impl<T> Clone for DataHandler<T> {
    fn clone(&self) -> Self {
        match self {
            DataHandler::Queue(tx) => DataHandler::Queue(tx.clone()),
            DataHandler::Callback(cb) => DataHandler::Callback(cb.clone()),
        }
    }
}
