//! Function execution results.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use geode_core::protocol::{read_chunk_part_header, ChunkObjectType};
use geode_core::{Deserializable, GeodeError, ObjectDataInput, Result};
use tokio::sync::watch;

use crate::chunk_handler::ChunkedResult;

struct Shared<R> {
    results: Mutex<Vec<R>>,
    failure: Mutex<Option<GeodeError>>,
    done: watch::Sender<bool>,
}

/// Collects the results of one function execution.
///
/// Results arrive in the background; [`ResultCollector::get_result`] waits
/// for the last one.
pub struct ResultCollector<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for ResultCollector<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R> std::fmt::Debug for ResultCollector<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCollector")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<R> ResultCollector<R> {
    /// Returns true once every result arrived or the execution failed.
    pub fn is_done(&self) -> bool {
        *self.shared.done.borrow()
    }
}

impl<R: Clone> ResultCollector<R> {
    pub(crate) fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                results: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                done,
            }),
        }
    }

    pub(crate) fn add_results(&self, results: Vec<R>) {
        self.shared
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(results);
    }

    /// Marks the collection complete. Called once after the last result.
    pub(crate) fn end_results(&self, outcome: Result<()>) {
        if let Err(e) = outcome {
            *self.shared.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(e);
        }
        self.shared.done.send_replace(true);
    }

    /// Waits up to `timeout` for the execution to finish and returns its
    /// results.
    ///
    /// Fails with [`GeodeError::Timeout`] if the results are not complete
    /// in time; the collector can be waited on again afterwards.
    pub async fn get_result(&self, timeout: Duration) -> Result<Vec<R>> {
        let mut done = self.shared.done.subscribe();
        let waited = tokio::time::timeout(timeout, done.wait_for(|finished| *finished)).await;
        match waited {
            Err(_) => {
                return Err(GeodeError::Timeout(format!(
                    "function results not complete after {:?}",
                    timeout
                )))
            }
            Ok(Err(_)) => {
                return Err(GeodeError::IllegalState(
                    "function execution abandoned".to_string(),
                ))
            }
            Ok(Ok(_)) => {}
        }

        if let Some(e) = &*self.shared.failure.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(e.clone());
        }
        Ok(self
            .shared
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

/// Chunk consumer of one execution attempt.
#[derive(Debug)]
pub(crate) struct FunctionChunks<R> {
    results: Mutex<Vec<R>>,
}

impl<R> Default for FunctionChunks<R> {
    fn default() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
        }
    }
}

impl<R> FunctionChunks<R> {
    pub(crate) fn take(&self) -> Vec<R> {
        std::mem::take(&mut *self.results.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl<R: Deserializable + Send> ChunkedResult for FunctionChunks<R> {
    fn handle_chunk(&self, _message_type: i32, input: &mut ObjectDataInput<'_>) -> Result<()> {
        while input.remaining() > 0 {
            match read_chunk_part_header(input, "execute_function", None)? {
                ChunkObjectType::Object => {
                    let value = R::deserialize(input)?;
                    self.results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(value);
                }
                ChunkObjectType::NullObject => {}
                ChunkObjectType::Exception(exception) => return Err(exception.into_error()),
            }
        }
        Ok(())
    }
}
