//! Chunked result processing and listener dispatch.
//!
//! A [`ChunkHandler`] either runs work inline on the calling task's thread or
//! hands it to a dedicated OS thread. Callers await completion in both modes,
//! so ordering between chunks of one response is preserved.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use bytes::Bytes;
use geode_core::protocol::{read_chunk_part_header, ChunkObjectType};
use geode_core::{Deserializable, GeodeError, ObjectDataInput, Result};
use tokio::sync::oneshot;

/// Consumer of the chunks of one chunked response.
///
/// `handle_chunk` is called once per chunk in arrival order, then
/// `finalize` once after the last chunk. Implementations accumulate into
/// interior state, since the same result may be driven from the chunk
/// handler thread.
pub trait ChunkedResult: Send + Sync {
    /// Processes the parts of one chunk.
    fn handle_chunk(&self, message_type: i32, input: &mut ObjectDataInput<'_>) -> Result<()>;

    /// Called after the last chunk was handled.
    fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

/// One unit of chunk work: a chunk payload or the end-of-stream sentinel.
#[derive(Debug, Clone)]
pub struct ChunkedContext {
    message_type: i32,
    chunk: Option<Bytes>,
}

impl ChunkedContext {
    /// Wraps the payload of a chunk.
    pub fn chunk(message_type: i32, payload: Bytes) -> Self {
        Self {
            message_type,
            chunk: Some(payload),
        }
    }

    /// Creates the end-of-stream sentinel.
    pub fn end(message_type: i32) -> Self {
        Self {
            message_type,
            chunk: None,
        }
    }

    /// Returns true for the end-of-stream sentinel.
    pub fn is_end(&self) -> bool {
        self.chunk.is_none()
    }

    /// Feeds this context to `result`.
    pub fn apply(self, result: &dyn ChunkedResult) -> Result<()> {
        match self.chunk {
            Some(payload) => {
                let mut input = ObjectDataInput::new(&payload);
                result.handle_chunk(self.message_type, &mut input)
            }
            None => result.finalize(),
        }
    }
}

/// Reads the next object of a chunk.
///
/// Returns `Ok(None)` for a null object and the mapped server error for an
/// exception part.
pub fn read_chunk_object<T: Deserializable>(
    input: &mut ObjectDataInput<'_>,
    method: &str,
) -> Result<Option<T>> {
    match read_chunk_part_header(input, method, None)? {
        ChunkObjectType::Object => T::deserialize(input).map(Some),
        ChunkObjectType::NullObject => Ok(None),
        ChunkObjectType::Exception(exception) => Err(exception.into_error()),
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Worker {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    thread_id: ThreadId,
}

enum Mode {
    Inline,
    Threaded(Worker),
}

/// Runs chunk processing and listener callbacks.
#[derive(Clone)]
pub struct ChunkHandler {
    mode: Arc<Mode>,
}

impl std::fmt::Debug for ChunkHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkHandler")
            .field("threaded", &self.is_threaded())
            .finish()
    }
}

impl ChunkHandler {
    /// Creates a handler that runs work on the calling thread.
    pub fn inline() -> Self {
        Self {
            mode: Arc::new(Mode::Inline),
        }
    }

    /// Creates a handler backed by a dedicated thread.
    pub fn threaded() -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("geode-chunk-handler".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!("chunk handler job panicked");
                    }
                }
                tracing::debug!("chunk handler thread stopped");
            })?;
        Ok(Self {
            mode: Arc::new(Mode::Threaded(Worker {
                sender: Mutex::new(Some(sender)),
                thread_id: handle.thread().id(),
            })),
        })
    }

    /// Creates the handler selected by the cache configuration.
    pub fn from_config(enable_thread: bool) -> Result<Self> {
        if enable_thread {
            Self::threaded()
        } else {
            Ok(Self::inline())
        }
    }

    /// Returns true if work runs on the dedicated thread.
    pub fn is_threaded(&self) -> bool {
        matches!(*self.mode, Mode::Threaded(_))
    }

    /// Returns the id of the dedicated thread, if any.
    pub fn thread_id(&self) -> Option<ThreadId> {
        match &*self.mode {
            Mode::Inline => None,
            Mode::Threaded(worker) => Some(worker.thread_id),
        }
    }

    /// Runs `f` and returns its result.
    pub async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match &*self.mode {
            Mode::Inline => Ok(f()),
            Mode::Threaded(worker) => {
                let sender = worker
                    .sender
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .ok_or_else(stopped)?;
                let (tx, rx) = oneshot::channel();
                sender
                    .send(Box::new(move || {
                        let _ = tx.send(f());
                    }))
                    .map_err(|_| stopped())?;
                rx.await.map_err(|_| stopped())
            }
        }
    }

    /// Feeds `context` to `result`.
    pub async fn process(
        &self,
        result: Arc<dyn ChunkedResult>,
        context: ChunkedContext,
    ) -> Result<()> {
        self.run(move || context.apply(result.as_ref())).await?
    }

    /// Stops the dedicated thread once queued work is done.
    pub fn shutdown(&self) {
        if let Mode::Threaded(worker) = &*self.mode {
            worker
                .sender
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
        }
    }
}

fn stopped() -> GeodeError {
    GeodeError::CacheClosed("chunk handler stopped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use geode_core::protocol::{Part, ServerException};

    #[derive(Default)]
    struct Collect {
        values: Mutex<Vec<Option<String>>>,
        finalized: Mutex<bool>,
    }

    impl ChunkedResult for Collect {
        fn handle_chunk(&self, _message_type: i32, input: &mut ObjectDataInput<'_>) -> Result<()> {
            while input.remaining() > 0 {
                let value = read_chunk_object::<String>(input, "collect")?;
                self.values.lock().unwrap().push(value);
            }
            Ok(())
        }

        fn finalize(&self) -> Result<()> {
            *self.finalized.lock().unwrap() = true;
            Ok(())
        }
    }

    fn payload(parts: &[Part]) -> Bytes {
        let mut buf = BytesMut::new();
        for part in parts {
            part.write_to(&mut buf);
        }
        buf.freeze()
    }

    #[tokio::test]
    async fn test_inline_processing() {
        let handler = ChunkHandler::inline();
        let result = Arc::new(Collect::default());
        let chunk = payload(&[
            Part::object(&"a".to_string()).unwrap(),
            Part::null_object(),
            Part::object(&"b".to_string()).unwrap(),
        ]);
        handler
            .process(result.clone(), ChunkedContext::chunk(1, chunk))
            .await
            .unwrap();
        handler
            .process(result.clone(), ChunkedContext::end(1))
            .await
            .unwrap();
        assert_eq!(
            *result.values.lock().unwrap(),
            vec![Some("a".to_string()), None, Some("b".to_string())]
        );
        assert!(*result.finalized.lock().unwrap());
    }

    #[tokio::test]
    async fn test_exception_part_is_surfaced() {
        let handler = ChunkHandler::inline();
        let result = Arc::new(Collect::default());
        let exception = ServerException {
            class_name: "org.apache.geode.cache.query.QueryInvalidException".to_string(),
            message: "bad query".to_string(),
        };
        let chunk = payload(&exception.to_parts());
        let err = handler
            .process(result, ChunkedContext::chunk(2, chunk))
            .await
            .unwrap_err();
        assert!(matches!(err, GeodeError::Server { message, .. } if message == "bad query"));
    }

    #[tokio::test]
    async fn test_raw_part_is_a_framing_error() {
        let handler = ChunkHandler::inline();
        let result = Arc::new(Collect::default());
        let chunk = payload(&[Part::int(3)]);
        let err = handler
            .process(result, ChunkedContext::chunk(1, chunk))
            .await
            .unwrap_err();
        assert!(matches!(err, GeodeError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_threaded_runs_off_caller_thread() {
        let handler = ChunkHandler::threaded().unwrap();
        let caller = std::thread::current().id();
        let worker = handler.run(|| std::thread::current().id()).await.unwrap();
        assert_ne!(worker, caller);
        assert_eq!(Some(worker), handler.thread_id());
        handler.shutdown();
        assert!(handler.run(|| ()).await.is_err());
    }

    #[tokio::test]
    async fn test_inline_runs_on_caller_thread() {
        let handler = ChunkHandler::inline();
        let caller = std::thread::current().id();
        assert_eq!(handler.run(|| std::thread::current().id()).await.unwrap(), caller);
        assert!(handler.thread_id().is_none());
    }
}
